#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 <div align="center">
   <h1>Bulk Import for Rust</h1>
   <h3>Streaming CSV/XML entity imports for e-commerce back offices</h3>

   ![license](https://shields.io/badge/license-MIT%2FApache--2.0-blue)

  </div>

 # Bulk Import for Rust

 Imports catalogs, products, suppliers and attributes from delimited text or
 XML files into a domain entity store. Files are read in bounded batches,
 existing entities are loaded with one query per batch, and every record is
 imported in its own transaction: a broken row is rolled back, logged and
 counted while the rest of the file goes on.

 ## Core Concepts

- **Record source:** reads a file in batches of `code -> record`, see
  [`item::csv`] and [`item::xml`].
- **Mapper:** splits a record into the `item` fields and one list of entries
  per facet (texts, media, prices, ...).
- **Prefetcher:** loads the existing entities of a batch by natural key.
- **Facet processor:** brings one facet of an entity in line with the file,
  adding, updating and removing associations.
- **Coordinator:** creates or updates each entity, places tree nodes, runs the
  facet processors and commits, one natural key at a time.
- **Step / Job:** a step imports one file; a job imports every file of a
  location, XML files in parallel.

 ## Features

| **Feature** | **Description**                                        |
|-------------|--------------------------------------------------------|
| csv         | Enables the CSV record source                          |
| xml         | Enables the streaming XML record source                |
| memory      | Enables the in-memory entity store                     |
| full        | Enables all available features                         |

 ## Getting Started

```rust
# use std::sync::Arc;
# use bulk_import_rs::{
#     core::{
#         entity::ManagerFactory,
#         facet::ProcessorRegistry,
#         mapping::{ColumnMapper, ColumnMapping},
#         step::ImportStepBuilder,
#     },
#     error::BatchError,
#     item::{csv::csv_reader::CsvRecordSourceBuilder, memory::MemoryStore},
#     config::ImportConfig,
# };
fn main() -> Result<(), BatchError> {
    let csv = "code,label,text type,text
p1,Shirt,name,Blue shirt
p2,Socks,name,Woolen socks";

    let config = ImportConfig::from_json(r#"{
        "domain": "product",
        "location": ".",
        "mapping": {
            "item": { "0": "product.code", "1": "product.label" },
            "text": { "2": "text.type", "3": "text.content" }
        }
    }"#)?;
    config.validate()?;

    let store = MemoryStore::new();
    let manager = store.manager("product")?;
    let processors = vec![ProcessorRegistry::with_defaults().build(
        "text",
        &bulk_import_rs::core::facet::ProcessorContext {
            domain: "product".to_string(),
            facet: "text".to_string(),
            managers: Arc::new(store.clone()),
            types: Arc::new(store.clone()),
        },
    )?];

    let source = CsvRecordSourceBuilder::new()
        .skip_lines(1)
        .key_column(config.code_position()?)
        .from_reader(csv.as_bytes());
    let mapper = ColumnMapper::new(ColumnMapping::from_config(&config.mapping)?, false);

    let step = ImportStepBuilder::new("product")
        .source(&source)
        .mapper(&mapper)
        .manager(manager.as_ref())
        .processors(&processors)
        .build()?;

    let stats = step.execute()?;
    assert_eq!(stats.success(), 2);
    assert_eq!(store.find("product", "p1").unwrap().list_items.len(), 1);

    Ok(())
}
```

 Whole directories are imported with [`core::job::ImportJob`].

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.

 ## Contribution
 Unless you explicitly state otherwise, any contribution intentionally submitted
 for inclusion in the work by you, as defined in the Apache-2.0 license, shall be
 dual licensed as above, without any additional terms or conditions

 */

/// Import configuration
pub mod config;

/// Core module for import pipelines
pub mod core;

/// Error types for import operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Record sources and entity stores
pub mod item;

/// Facet processors
pub mod processor;

/// Tasklets run around the record pipeline
pub mod tasklet;
