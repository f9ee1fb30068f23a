use std::collections::BTreeSet;

use log::debug;

use crate::error::BatchError;

use super::entity::{EntityManager, NaturalKeyMap, SearchFilter};

/// Bulk-loads the existing items of a batch in a single query.
pub struct Prefetcher<'a> {
    manager: &'a dyn EntityManager,
    domains: &'a [String],
}

impl<'a> Prefetcher<'a> {
    pub fn new(manager: &'a dyn EntityManager, domains: &'a [String]) -> Self {
        Self { manager, domains }
    }

    /// Returns the existing items for `codes`. A code missing from the map
    /// does not exist yet and has to be created.
    pub fn prefetch(&self, codes: &BTreeSet<String>) -> Result<NaturalKeyMap, BatchError> {
        if codes.is_empty() {
            return Ok(NaturalKeyMap::new());
        }

        let filter = SearchFilter::new()
            .codes(codes.iter().cloned())
            .domains(self.domains)
            .slice(0, codes.len());

        let map: NaturalKeyMap = self.manager.search(&filter)?.into_iter().collect();
        debug!("Prefetched {} of {} code(s)", map.len(), codes.len());

        Ok(map)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::collections::BTreeSet;

    use crate::core::entity::{EntityManager, ManagerFactory};
    use crate::item::memory::MemoryStore;

    use super::Prefetcher;

    #[test]
    fn prefetch_returns_only_existing_codes() {
        let store = MemoryStore::new();
        let manager = store.manager("product").unwrap();
        for code in ["p1", "p2", "p3"] {
            let mut item = manager.create();
            item.code = code.to_string();
            manager.save(&mut item).unwrap();
        }

        let domains = vec!["text".to_string()];
        let prefetcher = Prefetcher::new(manager.as_ref(), &domains);
        let codes: BTreeSet<String> = ["p1", "p3", "p9"].iter().map(|c| c.to_string()).collect();
        let map = prefetcher.prefetch(&codes).unwrap();

        assert_eq!(map.len(), 2);
        assert!(map.contains("p1"));
        assert!(map.contains("p3"));
        assert!(!map.contains("p9"));
    }

    #[test]
    fn empty_code_set_does_not_query() {
        let store = MemoryStore::new();
        let manager = store.manager("product").unwrap();
        let domains = Vec::new();

        let map = Prefetcher::new(manager.as_ref(), &domains)
            .prefetch(&BTreeSet::new())
            .unwrap();
        assert!(map.is_empty());
    }
}
