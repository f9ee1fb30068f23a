mod common;

use std::sync::Arc;

use bulk_import_rs::{
    config::ImportConfig,
    core::{
        entity::Item,
        facet::ProcessorRegistry,
        job::ImportJobBuilder,
        mapping::{ColumnMapper, ColumnMapping},
        step::{ImportStepBuilder, StepStatus},
    },
    error::BatchError,
    item::{csv::csv_reader::CsvRecordSourceBuilder, memory::MemoryStore},
};
use common::{MockManager, init_logger};

fn supplier_mapper() -> ColumnMapper {
    let mut config = ImportConfig::new("supplier", ".");
    config.mapping.insert(
        "item".to_string(),
        [(0, "supplier.code".to_string()), (1, "supplier.label".to_string())].into(),
    );
    ColumnMapper::new(config.column_mapping().unwrap(), false)
}

#[test]
fn config_without_item_mapping_is_rejected() {
    let config = ImportConfig::from_json(
        r#"{ "domain": "product", "location": ".", "mapping": { "text": { "0": "text.content" } } }"#,
    )
    .unwrap();

    assert!(matches!(config.validate(), Err(BatchError::Configuration(_))));
}

#[test]
fn unknown_config_keys_are_rejected() {
    let result = ImportConfig::from_json(r#"{ "domain": "product", "location": ".", "chunk": 3 }"#);

    assert!(matches!(result, Err(BatchError::Configuration(_))));
}

#[test]
fn disallowed_processor_fails_before_any_file_is_read() {
    let mut config = ImportConfig::new("attribute", "/nonexistent");
    config.mapping.insert(
        "item".to_string(),
        [(0, "attribute.code".to_string())].into(),
    );
    config
        .mapping
        .insert("catalog".to_string(), [(1, "catalog.code".to_string())].into());
    let store = MemoryStore::new();

    let result = ImportJobBuilder::new()
        .config(config)
        .managers(Arc::new(store.clone()))
        .types(Arc::new(store))
        .registry(ProcessorRegistry::with_defaults().only(&["text", "media"]))
        .build();

    match result {
        Err(BatchError::Configuration(message)) => assert!(message.contains("catalog")),
        _ => panic!("the catalog processor must be refused"),
    }
}

#[test]
fn missing_location_fails_the_run() {
    let mut config = ImportConfig::new("supplier", "/nonexistent/location");
    config.mapping.insert(
        "item".to_string(),
        [(0, "supplier.code".to_string())].into(),
    );
    let store = MemoryStore::new();
    let job = common::job(config, &store);

    assert!(matches!(
        job.run_blocking(),
        Err(BatchError::Configuration(_))
    ));
}

#[test]
fn failed_commit_is_rolled_back_and_counted() {
    init_logger();

    let mut manager = MockManager::new();
    manager.expect_search().returning(|_| Ok(Vec::new()));
    manager.expect_create().returning(|| Item::new("supplier"));
    manager.expect_begin().times(2).returning(|| Ok(()));
    manager.expect_save().returning(|item| {
        item.id.get_or_insert(7);
        Ok(())
    });

    let mut attempt = 0;
    manager.expect_commit().times(2).returning(move || {
        attempt += 1;
        if attempt == 1 {
            Err(BatchError::Persistence("deadlock detected".to_string()))
        } else {
            Ok(())
        }
    });
    manager.expect_rollback().times(1).returning(|| Ok(()));
    manager.expect_delete().never();

    let source = CsvRecordSourceBuilder::new().from_reader("s1,First\ns2,Second\n".as_bytes());
    let mapper = supplier_mapper();

    let step = ImportStepBuilder::new("supplier")
        .source(&source)
        .mapper(&mapper)
        .manager(&manager)
        .build()
        .unwrap();

    let result = step.execute();

    assert!(matches!(
        result,
        Err(BatchError::Incomplete {
            errors: 1,
            total: 2
        })
    ));
    assert_eq!(step.get_status(), StepStatus::ERROR);
    assert_eq!(step.stats().success(), 1);
}

#[test]
fn failed_prefetch_aborts_the_file() {
    init_logger();

    let mut manager = MockManager::new();
    manager
        .expect_search()
        .returning(|_| Err(BatchError::Persistence("connection lost".to_string())));
    manager.expect_begin().never();

    let source = CsvRecordSourceBuilder::new().from_reader("s1,First\n".as_bytes());
    let mapper = supplier_mapper();

    let step = ImportStepBuilder::new("supplier")
        .source(&source)
        .mapper(&mapper)
        .manager(&manager)
        .build()
        .unwrap();

    assert!(matches!(step.execute(), Err(BatchError::Persistence(_))));
    assert_eq!(step.get_status(), StepStatus::ERROR);
}

#[test]
fn mapping_must_not_reuse_a_position() {
    let mut config = ImportConfig::new("product", ".");
    config
        .mapping
        .insert("item".to_string(), [(0, "product.code".to_string())].into());
    config
        .mapping
        .insert("text".to_string(), [(0, "text.content".to_string())].into());

    assert!(matches!(
        ColumnMapping::from_config(&config.mapping),
        Err(BatchError::Configuration(_))
    ));
}
