/// CSV record source.
///
/// Rows are read headerless and flexible, keyed by the natural-key column and
/// returned in bounded batches. Converters registered per column run before
/// a row is keyed, so the key column itself may be normalized.
///
/// # Examples
///
/// ```
/// use bulk_import_rs::core::convert::Converters;
/// use bulk_import_rs::core::item::RecordSource;
/// use bulk_import_rs::item::csv::csv_reader::CsvRecordSourceBuilder;
///
/// let mut converters = Converters::new();
/// converters.register(0, Converters::parse("lower").unwrap());
///
/// let source = CsvRecordSourceBuilder::new()
///     .delimiter(b';')
///     .converters(converters)
///     .from_reader("SKU-1;Shirt\nSKU-2;Socks\n".as_bytes());
///
/// let batch = source.read_batch(1000).unwrap();
/// assert_eq!(batch.codes().collect::<Vec<_>>(), vec!["sku-1", "sku-2"]);
/// ```
pub mod csv_reader;
