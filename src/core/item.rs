use std::collections::BTreeMap;

use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// Domain key to value, e.g. `"text.content" -> "Shoes"`.
pub type FieldMap = BTreeMap<String, String>;

/// A CSV row as read from the file, indexed by column position.
pub type RawRecord = Vec<String>;

/// Result of a single `read_batch` call.
pub type RecordSourceResult<R> = Result<RecordBatch<R>, BatchError>;

/// A record split into its base chunk and per-facet entries.
///
/// The `item` chunk is always present, even when empty. Facets are kept in
/// mapping declaration order; a facet that is present with no entries still
/// runs its processor so stale associations get removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    pub item: FieldMap,
    pub facets: IndexMap<String, Vec<FieldMap>>,
}

impl MappedRecord {
    pub fn new(item: FieldMap) -> Self {
        Self {
            item,
            facets: IndexMap::new(),
        }
    }

    pub fn facet(&self, name: &str) -> Option<&[FieldMap]> {
        self.facets.get(name).map(Vec::as_slice)
    }
}

/// What to do when the same natural key appears twice in one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateKeyPolicy {
    /// The repeated row ends the batch and is read again as the first row
    /// of the next one, so both rows are imported in file order and the
    /// later one wins.
    #[default]
    LastWins,
    /// The first row is kept, the later one is rejected as a record error.
    Reject,
}

/// An ordered `code -> record` map produced by one read of a record source.
///
/// Rows that could not be keyed (empty code, converter failure, rejected
/// duplicate) are kept as messages in `rejected` so the caller can count them.
#[derive(Debug)]
pub struct RecordBatch<R> {
    records: IndexMap<String, R>,
    rejected: Vec<String>,
    policy: DuplicateKeyPolicy,
}

impl<R> RecordBatch<R> {
    pub fn new(policy: DuplicateKeyPolicy) -> Self {
        Self {
            records: IndexMap::new(),
            rejected: Vec::new(),
            policy,
        }
    }

    /// `false` when `code` is already in the batch and the batch has to end
    /// before the row holding it. Sources keep such a row for the next read.
    pub fn accepts(&self, code: &str) -> bool {
        self.policy != DuplicateKeyPolicy::LastWins || !self.records.contains_key(code)
    }

    /// Adds a record under its natural key, applying the duplicate policy.
    ///
    /// A duplicate pushed despite [`RecordBatch::accepts`] replaces the
    /// earlier record in place under `LastWins`.
    pub fn push(&mut self, code: String, record: R) {
        if self.records.contains_key(&code) {
            match self.policy {
                DuplicateKeyPolicy::LastWins => {
                    warn!("Duplicate code {} in batch, keeping the last row", code);
                }
                DuplicateKeyPolicy::Reject => {
                    self.reject(format!("duplicate code {} in batch", code));
                    return;
                }
            }
        }
        self.records.insert(code, record);
    }

    pub fn reject(&mut self, message: String) {
        warn!("Rejected record: {}", message);
        self.rejected.push(message);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// End of input is signalled by a batch with neither records nor rejections.
    pub fn is_exhausted(&self) -> bool {
        self.records.is_empty() && self.rejected.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn get(&self, code: &str) -> Option<&R> {
        self.records.get(code)
    }

    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    pub fn into_parts(self) -> (IndexMap<String, R>, Vec<String>) {
        (self.records, self.rejected)
    }
}

/// Produces bounded batches of raw records keyed by natural key.
///
/// Opening happens in the source's builder; `read_batch` returns at most
/// `max_count` records (for XML sources: nodes) and an exhausted batch at the
/// end of input. Read failures are fatal for the run.
pub trait RecordSource<R> {
    fn read_batch(&self, max_count: usize) -> RecordSourceResult<R>;

    /// Path of the underlying file, if any, used for logging and backup.
    fn path(&self) -> Option<&std::path::Path> {
        None
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Splits a raw record into its base chunk and facet entries.
pub trait RecordMapper<R> {
    fn map(&self, code: &str, record: &R) -> Result<MappedRecord, BatchError>;
}
