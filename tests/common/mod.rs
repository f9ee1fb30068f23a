#![allow(dead_code)]

mod mocks;

pub use mocks::MockManager;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use bulk_import_rs::{
    config::ImportConfig,
    core::job::{ImportJob, ImportJobBuilder},
    item::memory::MemoryStore,
};
use rand::distr::{Alphanumeric, SampleString};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Writes `content` to a file with a random name and the given extension.
pub fn write_random(dir: &Path, extension: &str, content: &str) -> PathBuf {
    let name = Alphanumeric.sample_string(&mut rand::rng(), 12);
    write_named(dir, &format!("{}.{}", name, extension), content)
}

pub fn write_named(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

pub fn job(config: ImportConfig, store: &MemoryStore) -> ImportJob {
    ImportJobBuilder::new()
        .name("test-import".to_string())
        .config(config)
        .managers(Arc::new(store.clone()))
        .types(Arc::new(store.clone()))
        .build()
        .unwrap()
}
