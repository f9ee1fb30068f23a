use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::{
    core::{
        entity::{ManagerFactory, SearchFilter},
        tasklet::{RepeatStatus, Tasklet},
    },
    error::BatchError,
};

/// Removes the entities of a domain that were not saved since `before`,
/// typically the start of an import job that covered the whole domain.
///
/// Each call deletes one page in its own transaction and reports
/// [`RepeatStatus::Continuable`] while full pages are found.
pub struct CleanupTasklet {
    managers: Arc<dyn ManagerFactory>,
    domain: String,
    before: DateTime<Utc>,
    page_size: usize,
}

impl CleanupTasklet {
    pub fn new(managers: Arc<dyn ManagerFactory>, domain: &str, before: DateTime<Utc>) -> Self {
        Self {
            managers,
            domain: domain.to_string(),
            before,
            page_size: 100,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl Tasklet for CleanupTasklet {
    fn execute(&self) -> Result<RepeatStatus, BatchError> {
        let manager = self.managers.manager(&self.domain)?;

        let filter = SearchFilter::new()
            .modified_before(self.before)
            .slice(0, self.page_size);
        let ids: Vec<u64> = manager
            .search(&filter)?
            .into_iter()
            .filter_map(|item| item.id)
            .collect();

        if ids.is_empty() {
            debug!("No stale {} entities left", self.domain);
            return Ok(RepeatStatus::Finished);
        }

        manager.begin()?;
        if let Err(err) = manager.delete(&ids).and_then(|_| manager.commit()) {
            manager.rollback()?;
            return Err(BatchError::Tasklet(format!(
                "removing stale {} entities failed: {}",
                self.domain, err
            )));
        }
        info!(
            "Removed {} {} entities not modified since {}",
            ids.len(),
            self.domain,
            self.before
        );

        if ids.len() < self.page_size {
            Ok(RepeatStatus::Finished)
        } else {
            Ok(RepeatStatus::Continuable)
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::CleanupTasklet;
    use crate::{
        core::{
            entity::{EntityManager, ManagerFactory},
            tasklet::Tasklet,
        },
        item::memory::MemoryStore,
    };

    fn save(manager: &dyn EntityManager, code: &str) {
        let mut item = manager.create();
        item.code = code.to_string();
        manager.save(&mut item).unwrap();
    }

    #[test]
    fn only_entities_older_than_the_cutoff_are_removed() {
        let store = MemoryStore::new();
        let manager = store.manager("supplier").unwrap();
        for code in ["s1", "s2", "s3"] {
            save(manager.as_ref(), code);
        }

        std::thread::sleep(std::time::Duration::from_millis(5));
        let cutoff = Utc::now();
        save(manager.as_ref(), "fresh");

        CleanupTasklet::new(Arc::new(store.clone()), "supplier", cutoff)
            .page_size(2)
            .run()
            .unwrap();

        let left = store.items("supplier");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].code, "fresh");
    }
}
