use indexmap::IndexMap;
use log::{debug, error, warn};

use crate::error::BatchError;

use super::{
    entity::{EntityManager, Item, NaturalKeyMap},
    facet::FacetProcessor,
    hierarchy::{HierarchyResolver, Placement},
    item::MappedRecord,
    step::ImportStats,
};

/// Imports the records of one batch, one transaction per natural key.
///
/// A failing record is rolled back, logged and counted; it never stops the
/// batch. Every committed item is put back into the [`NaturalKeyMap`] so
/// later records of the batch see it.
pub struct UpsertCoordinator<'a> {
    domain: &'a str,
    manager: &'a dyn EntityManager,
    processors: &'a [Box<dyn FacetProcessor>],
    hierarchy: Option<&'a HierarchyResolver>,
}

impl<'a> UpsertCoordinator<'a> {
    pub fn new(
        domain: &'a str,
        manager: &'a dyn EntityManager,
        processors: &'a [Box<dyn FacetProcessor>],
    ) -> Self {
        Self {
            domain,
            manager,
            processors,
            hierarchy: None,
        }
    }

    pub fn hierarchy(mut self, hierarchy: Option<&'a HierarchyResolver>) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn import(
        &self,
        map: &mut NaturalKeyMap,
        records: IndexMap<String, MappedRecord>,
    ) -> ImportStats {
        let mut stats = ImportStats::default();

        for (code, record) in records {
            stats.total += 1;
            match self.import_one(map, &code, &record) {
                Ok(item) => map.insert(item),
                Err(err) => {
                    error!(
                        "unable to import {} with code {}: {}",
                        self.domain, code, err
                    );
                    stats.errors += 1;
                }
            }
        }

        debug!(
            "Imported batch of {} {} record(s), {} error(s)",
            stats.total, self.domain, stats.errors
        );
        stats
    }

    fn import_one(
        &self,
        map: &NaturalKeyMap,
        code: &str,
        record: &MappedRecord,
    ) -> Result<Item, BatchError> {
        self.manager.begin()?;

        let result = self
            .upsert(map, code, record)
            .and_then(|item| self.manager.commit().map(|_| item));

        if result.is_err() {
            if let Err(err) = self.manager.rollback() {
                warn!("Rollback of {} \"{}\" failed: {}", self.domain, code, err);
            }
        }
        result
    }

    fn upsert(
        &self,
        map: &NaturalKeyMap,
        code: &str,
        record: &MappedRecord,
    ) -> Result<Item, BatchError> {
        let mut item = match map.get(code) {
            Some(existing) => existing.clone(),
            None => {
                let mut item = self.manager.create();
                item.code = code.to_string();
                item
            }
        };
        item.apply(&record.item)?;

        match self.hierarchy {
            Some(hierarchy) => {
                let placement = hierarchy.placement(map, &record.item, &item)?;
                hierarchy.observe(self.manager, code, placement.target(&item))?;
                self.place(&mut item, placement)?;
            }
            None => self.manager.save(&mut item)?,
        }

        for processor in self.processors {
            if let Some(entries) = record.facet(processor.facet()) {
                processor.process(&mut item, entries)?;
            }
        }

        self.manager.save(&mut item)?;
        Ok(item)
    }

    fn place(&self, item: &mut Item, placement: Placement) -> Result<(), BatchError> {
        match placement {
            Placement::Insert { parent } => self.manager.insert(item, parent),
            Placement::Move { old, new } => {
                self.manager.save(item)?;
                let id = item.id.ok_or_else(|| {
                    BatchError::Persistence(format!("{} \"{}\" has no id", self.domain, item.code))
                })?;
                self.manager.move_item(id, old, new)?;
                item.parent_id = new;
                Ok(())
            }
            Placement::Keep => self.manager.save(item),
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use indexmap::IndexMap;

    use crate::{
        core::{
            entity::{EntityManager, ManagerFactory, NaturalKeyMap},
            hierarchy::HierarchyResolver,
            item::{FieldMap, MappedRecord},
        },
        item::memory::MemoryStore,
    };

    use super::UpsertCoordinator;

    fn record(code: &str, parent: &str, label: &str) -> MappedRecord {
        let mut item = FieldMap::new();
        item.insert("catalog.code".to_string(), code.to_string());
        item.insert("catalog.parent".to_string(), parent.to_string());
        item.insert("catalog.label".to_string(), label.to_string());
        MappedRecord::new(item)
    }

    #[test]
    fn children_resolve_parents_created_earlier_in_the_batch() {
        let store = MemoryStore::new();
        let manager = store.manager("catalog").unwrap();
        let resolver = HierarchyResolver::new("catalog", false);
        let coordinator =
            UpsertCoordinator::new("catalog", manager.as_ref(), &[]).hierarchy(Some(&resolver));

        let mut records = IndexMap::new();
        records.insert("cat1".to_string(), record("cat1", "", "Shoes"));
        records.insert("cat2".to_string(), record("cat2", "cat1", "Sneakers"));

        let mut map = NaturalKeyMap::new();
        let stats = coordinator.import(&mut map, records);

        assert_eq!(stats.total, 2);
        assert_eq!(stats.errors, 0);
        let cat1 = store.find("catalog", "cat1").unwrap();
        let cat2 = store.find("catalog", "cat2").unwrap();
        assert_eq!(cat2.parent_id, cat1.id);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn failed_record_is_rolled_back_and_counted() {
        let store = MemoryStore::new();
        let manager = store.manager("catalog").unwrap();
        let resolver = HierarchyResolver::new("catalog", false);
        let coordinator =
            UpsertCoordinator::new("catalog", manager.as_ref(), &[]).hierarchy(Some(&resolver));

        let mut records = IndexMap::new();
        records.insert("ok".to_string(), record("ok", "", "Fine"));
        records.insert("bad".to_string(), record("bad", "nowhere", "Orphan"));

        let mut map = NaturalKeyMap::new();
        let stats = coordinator.import(&mut map, records);

        assert_eq!(stats.errors, 1);
        assert_eq!(stats.success(), 1);
        assert!(store.find("catalog", "bad").is_none());
        assert!(!map.contains("bad"));
    }
}
