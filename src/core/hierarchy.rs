use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
};

use log::{debug, info};

use crate::error::BatchError;

use super::{
    entity::{EntityManager, Item, NaturalKeyMap, SearchFilter},
    item::{FieldMap, MappedRecord},
};

/// How a tree node is stored by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// New node below `parent` (`None` = root).
    Insert { parent: Option<u64> },
    /// Existing node whose parent changed; the subtree moves along.
    Move { old: Option<u64>, new: Option<u64> },
    /// Existing node staying where it is.
    Keep,
}

impl Placement {
    /// Parent of the node once the placement is applied.
    pub fn target(&self, item: &Item) -> Option<u64> {
        match *self {
            Placement::Insert { parent } => parent,
            Placement::Move { new, .. } => new,
            Placement::Keep => item.parent_id,
        }
    }
}

/// Resolves the `<domain>.parent` column of tree domains (catalogs) to
/// parent ids and tracks the child lists the file is authoritative for.
///
/// Parent codes are looked up in the batch's [`NaturalKeyMap`], which also
/// holds nodes committed earlier in the same batch, so a child may follow
/// its parent in the same file.
pub struct HierarchyResolver {
    parent_key: String,
    sweep: bool,
    /// parent id -> child codes found when the parent was first referenced
    expected: RefCell<BTreeMap<u64, BTreeSet<String>>>,
    confirmed: RefCell<BTreeSet<String>>,
}

impl HierarchyResolver {
    pub fn new(domain: &str, sweep: bool) -> Self {
        Self {
            parent_key: format!("{}.parent", domain),
            sweep,
            expected: RefCell::new(BTreeMap::new()),
            confirmed: RefCell::new(BTreeSet::new()),
        }
    }

    /// Non-empty parent codes referenced by `records`, to be prefetched along
    /// with the records' own codes.
    pub fn parent_codes<'a, I>(&self, records: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a MappedRecord>,
    {
        records
            .into_iter()
            .filter_map(|record| record.item.get(&self.parent_key))
            .map(|parent| parent.trim())
            .filter(|parent| !parent.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Returns the parent id named by `chunk`, `None` for an empty parent
    /// (root node).
    pub fn resolve_parent(
        &self,
        map: &NaturalKeyMap,
        chunk: &FieldMap,
        code: &str,
    ) -> Result<Option<u64>, BatchError> {
        let parent = chunk.get(&self.parent_key).map_or("", |p| p.trim());
        if parent.is_empty() {
            return Ok(None);
        }
        if parent == code {
            return Err(BatchError::Record(format!(
                "\"{}\" cannot be its own parent",
                code
            )));
        }

        map.get(parent)
            .and_then(|node| node.id)
            .map(Some)
            .ok_or_else(|| BatchError::Record(format!("unknown parent code \"{}\"", parent)))
    }

    /// Decides between insert, move and plain save. Without a parent column
    /// an existing node keeps its parent and a new node becomes a root.
    pub fn placement(
        &self,
        map: &NaturalKeyMap,
        chunk: &FieldMap,
        item: &Item,
    ) -> Result<Placement, BatchError> {
        let parent = if chunk.contains_key(&self.parent_key) {
            self.resolve_parent(map, chunk, &item.code)?
        } else {
            item.parent_id
        };

        if item.is_new() {
            return Ok(Placement::Insert { parent });
        }
        if item.parent_id != parent {
            return Ok(Placement::Move {
                old: item.parent_id,
                new: parent,
            });
        }
        Ok(Placement::Keep)
    }

    /// Marks `code` as confirmed by the file. The first time an existing
    /// parent is referenced, its current children become the expected set.
    pub fn observe(
        &self,
        manager: &dyn EntityManager,
        code: &str,
        parent: Option<u64>,
    ) -> Result<(), BatchError> {
        if !self.sweep {
            return Ok(());
        }

        self.confirmed.borrow_mut().insert(code.to_string());

        let Some(parent_id) = parent else {
            return Ok(());
        };
        if self.expected.borrow().contains_key(&parent_id) {
            return Ok(());
        }

        let filter = SearchFilter::new()
            .parent(Some(parent_id))
            .slice(0, usize::MAX);
        let children: BTreeSet<String> = manager
            .search(&filter)?
            .into_iter()
            .map(|child| child.code)
            .collect();
        debug!("Parent {} has {} known child(ren)", parent_id, children.len());
        self.expected.borrow_mut().insert(parent_id, children);
        Ok(())
    }

    /// Deletes, with their subtrees, the expected children that the file
    /// never confirmed and that are still attached to the expected parent.
    pub fn sweep(&self, manager: &dyn EntityManager) -> Result<usize, BatchError> {
        if !self.sweep {
            return Ok(0);
        }

        let confirmed = self.confirmed.borrow();
        let mut ids = Vec::new();
        for (parent_id, children) in self.expected.borrow().iter() {
            let stale: Vec<&String> = children.difference(&confirmed).collect();
            if stale.is_empty() {
                continue;
            }
            let filter = SearchFilter::new()
                .codes(stale.iter().map(|code| code.as_str()))
                .parent(Some(*parent_id))
                .slice(0, stale.len());
            ids.extend(manager.search(&filter)?.into_iter().filter_map(|node| node.id));
        }

        if ids.is_empty() {
            return Ok(0);
        }

        manager.begin()?;
        if let Err(err) = manager.delete(&ids).and_then(|_| manager.commit()) {
            manager.rollback()?;
            return Err(err);
        }

        info!("Removed {} node(s) no longer present in the file", ids.len());
        Ok(ids.len())
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use crate::{
        core::{
            entity::{EntityManager, Item, ManagerFactory, NaturalKeyMap},
            item::FieldMap,
        },
        error::BatchError,
        item::memory::MemoryStore,
    };

    use super::{HierarchyResolver, Placement};

    fn node(manager: &dyn EntityManager, code: &str, parent: Option<u64>) -> Item {
        let mut item = manager.create();
        item.code = code.to_string();
        manager.insert(&mut item, parent).unwrap();
        item
    }

    fn chunk(code: &str, parent: &str) -> FieldMap {
        let mut chunk = FieldMap::new();
        chunk.insert("catalog.code".to_string(), code.to_string());
        chunk.insert("catalog.parent".to_string(), parent.to_string());
        chunk
    }

    #[test]
    fn placement_distinguishes_insert_move_and_keep() {
        let store = MemoryStore::new();
        let manager = store.manager("catalog").unwrap();
        let a = node(manager.as_ref(), "a", None);
        let b = node(manager.as_ref(), "b", a.id);
        let c = node(manager.as_ref(), "c", None);
        let map: NaturalKeyMap = [a.clone(), b.clone(), c.clone()].into_iter().collect();
        let resolver = HierarchyResolver::new("catalog", false);

        let mut fresh = manager.create();
        fresh.code = "d".to_string();
        assert_eq!(
            resolver.placement(&map, &chunk("d", "a"), &fresh).unwrap(),
            Placement::Insert { parent: a.id }
        );
        assert_eq!(
            resolver.placement(&map, &chunk("b", "c"), &b).unwrap(),
            Placement::Move { old: a.id, new: c.id }
        );
        assert_eq!(
            resolver.placement(&map, &chunk("b", "a"), &b).unwrap(),
            Placement::Keep
        );
        assert_eq!(
            resolver.placement(&map, &FieldMap::new(), &b).unwrap(),
            Placement::Keep
        );
    }

    #[test]
    fn unknown_or_self_parent_is_a_record_error() {
        let resolver = HierarchyResolver::new("catalog", false);
        let map = NaturalKeyMap::new();

        assert!(matches!(
            resolver.resolve_parent(&map, &chunk("x", "missing"), "x"),
            Err(BatchError::Record(_))
        ));
        assert!(matches!(
            resolver.resolve_parent(&map, &chunk("x", "x"), "x"),
            Err(BatchError::Record(_))
        ));
        assert_eq!(resolver.resolve_parent(&map, &chunk("x", " "), "x").unwrap(), None);
    }

    #[test]
    fn sweep_removes_unconfirmed_children_only() {
        let store = MemoryStore::new();
        let manager = store.manager("catalog").unwrap();
        let root = node(manager.as_ref(), "root", None);
        node(manager.as_ref(), "kept", root.id);
        let gone = node(manager.as_ref(), "gone", root.id);
        node(manager.as_ref(), "grandchild", gone.id);

        let resolver = HierarchyResolver::new("catalog", true);
        resolver.observe(manager.as_ref(), "kept", root.id).unwrap();

        assert_eq!(resolver.sweep(manager.as_ref()).unwrap(), 1);
        assert!(store.find("catalog", "kept").is_some());
        assert!(store.find("catalog", "gone").is_none());
        assert!(store.find("catalog", "grandchild").is_none());
    }
}
