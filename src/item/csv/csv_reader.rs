use csv::{ByteRecordsIntoIter, ReaderBuilder, Terminator};
use log::debug;
use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use crate::{
    core::{
        convert::Converters,
        item::{DuplicateKeyPolicy, RawRecord, RecordBatch, RecordSource, RecordSourceResult},
    },
    error::BatchError,
};

/// A line-oriented record source over CSV data.
///
/// Rows are read without header handling and may have varying lengths.
/// Each row is decoded (invalid UTF-8 is replaced), passed through the
/// configured converters and keyed by the trimmed value of the key column.
/// A row that cannot be keyed is rejected, not fatal; an I/O or parse error
/// of the underlying file is fatal.
///
/// # Examples
///
/// ```
/// use bulk_import_rs::item::csv::csv_reader::CsvRecordSourceBuilder;
/// use bulk_import_rs::core::item::RecordSource;
///
/// let data = "code,label\np1,First\np2,Second\n";
///
/// let source = CsvRecordSourceBuilder::new()
///     .skip_lines(1)
///     .key_column(0)
///     .from_reader(data.as_bytes());
///
/// let batch = source.read_batch(10).unwrap();
/// assert_eq!(batch.len(), 2);
/// assert_eq!(batch.get("p2").unwrap()[1], "Second");
///
/// assert!(source.read_batch(10).unwrap().is_exhausted());
/// ```
pub struct CsvRecordSource<R> {
    records: RefCell<Option<ByteRecordsIntoIter<R>>>,
    /// Keyed row that ended the previous batch as a duplicate.
    pending: RefCell<Option<(String, RawRecord)>>,
    path: Option<PathBuf>,
    skip_lines: Cell<usize>,
    key_column: usize,
    converters: Converters,
    duplicates: DuplicateKeyPolicy,
}

impl<R: Read> CsvRecordSource<R> {
    /// Turns a raw row into a keyed record.
    fn key(&self, mut record: RawRecord) -> Result<(String, RawRecord), String> {
        self.converters
            .apply(&mut record)
            .map_err(|err| format!("{} in row {:?}", err, record))?;

        let code = record
            .get(self.key_column)
            .map(|code| code.trim().to_string())
            .unwrap_or_default();
        if code.is_empty() {
            return Err(format!(
                "no code in column {} of row {:?}",
                self.key_column, record
            ));
        }
        Ok((code, record))
    }
}

impl<R: Read> RecordSource<RawRecord> for CsvRecordSource<R> {
    fn read_batch(&self, max_count: usize) -> RecordSourceResult<RawRecord> {
        let mut batch = RecordBatch::new(self.duplicates);
        let mut guard = self.records.borrow_mut();
        let Some(records) = guard.as_mut() else {
            return Ok(batch);
        };

        let mut read = 0;
        if let Some((code, record)) = self.pending.borrow_mut().take() {
            batch.push(code, record);
            read += 1;
        }

        while read < max_count {
            let Some(result) = records.next() else {
                break;
            };
            let byte_record = result.map_err(|error| BatchError::ItemReader(error.to_string()))?;

            if self.skip_lines.get() > 0 {
                self.skip_lines.set(self.skip_lines.get() - 1);
                continue;
            }

            let record: RawRecord = byte_record
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect();

            match self.key(record) {
                Ok((code, record)) if !batch.accepts(&code) => {
                    debug!("Code {} repeats, ending batch after {} row(s)", code, read);
                    *self.pending.borrow_mut() = Some((code, record));
                    break;
                }
                Ok((code, record)) => batch.push(code, record),
                Err(message) => batch.reject(message),
            }
            read += 1;
        }

        Ok(batch)
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn close(&self) -> Result<(), BatchError> {
        self.records.borrow_mut().take();
        self.pending.borrow_mut().take();
        Ok(())
    }
}

/// A builder for [`CsvRecordSource`].
///
/// # Default Configuration
///
/// - Delimiter: comma (,)
/// - Terminator: CRLF (also accepts `\n`)
/// - Skipped lines: none
/// - Key column: 0
/// - Duplicates: a repeated code starts a new batch, the last row wins
pub struct CsvRecordSourceBuilder {
    delimiter: u8,
    terminator: Terminator,
    skip_lines: usize,
    key_column: usize,
    converters: Converters,
    duplicates: DuplicateKeyPolicy,
}

impl Default for CsvRecordSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvRecordSourceBuilder {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            terminator: Terminator::CRLF,
            skip_lines: 0,
            key_column: 0,
            converters: Converters::new(),
            duplicates: DuplicateKeyPolicy::default(),
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Number of leading lines (headers) to drop.
    pub fn skip_lines(mut self, skip_lines: usize) -> Self {
        self.skip_lines = skip_lines;
        self
    }

    /// Column holding the natural key.
    pub fn key_column(mut self, key_column: usize) -> Self {
        self.key_column = key_column;
        self
    }

    pub fn converters(mut self, converters: Converters) -> Self {
        self.converters = converters;
        self
    }

    pub fn duplicates(mut self, duplicates: DuplicateKeyPolicy) -> Self {
        self.duplicates = duplicates;
        self
    }

    fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(false)
            .flexible(true);
        builder
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> CsvRecordSource<R> {
        let records = self.reader_builder().from_reader(rdr).into_byte_records();
        self.build(records, None)
    }

    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<CsvRecordSource<File>, BatchError> {
        let path = path.as_ref();
        let records = self
            .reader_builder()
            .from_path(path)
            .map_err(|error| {
                BatchError::ItemReader(format!("{}: {}", path.display(), error))
            })?
            .into_byte_records();
        Ok(self.build(records, Some(path.to_path_buf())))
    }

    fn build<R>(self, records: ByteRecordsIntoIter<R>, path: Option<PathBuf>) -> CsvRecordSource<R> {
        CsvRecordSource {
            records: RefCell::new(Some(records)),
            pending: RefCell::new(None),
            path,
            skip_lines: Cell::new(self.skip_lines),
            key_column: self.key_column,
            converters: self.converters,
            duplicates: self.duplicates,
        }
    }
}
