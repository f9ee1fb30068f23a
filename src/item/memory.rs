//! In-memory entity store.
//!
//! [`MemoryStore`] is shared between workers; every [`MemoryEntityManager`]
//! opened from it is one "connection" with its own transaction journal.
//! Saves, inserts, moves and deletes issued inside a transaction are staged
//! in the journal and become visible to other connections on commit only.
//! A commit fails if another connection committed one of its new codes
//! first.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Utc;
use log::debug;

use crate::{
    core::entity::{EntityManager, Item, ManagerFactory, SearchFilter, TypeRegistry},
    error::BatchError,
};

#[derive(Debug, Default)]
struct StoreState {
    next_id: u64,
    items: BTreeMap<u64, Item>,
    types: BTreeSet<(String, String)>,
}

impl StoreState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared in-memory persistence for all domains.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, BatchError> {
        lock(&self.state)
    }

    /// Committed items of a domain, ordered by id.
    pub fn items(&self, domain: &str) -> Vec<Item> {
        self.lock()
            .map(|state| {
                state
                    .items
                    .values()
                    .filter(|item| item.domain == domain)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Committed item of a domain by code.
    pub fn find(&self, domain: &str, code: &str) -> Option<Item> {
        self.items(domain).into_iter().find(|item| item.code == code)
    }

    /// Registered type codes as `(type domain, code)` pairs.
    pub fn types(&self) -> Vec<(String, String)> {
        self.lock()
            .map(|state| state.types.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl ManagerFactory for MemoryStore {
    fn manager(&self, domain: &str) -> Result<Box<dyn EntityManager>, BatchError> {
        Ok(Box::new(MemoryEntityManager::new(self.clone(), domain)))
    }
}

impl TypeRegistry for MemoryStore {
    fn register(&self, domain: &str, code: &str) -> Result<bool, BatchError> {
        let mut state = self.lock()?;
        Ok(state.types.insert((domain.to_string(), code.to_string())))
    }
}

fn lock(state: &Mutex<StoreState>) -> Result<MutexGuard<'_, StoreState>, BatchError> {
    state
        .lock()
        .map_err(|_| BatchError::Persistence("memory store lock poisoned".to_string()))
}

/// Work staged by an open transaction.
#[derive(Debug, Default)]
struct Journal {
    saved: BTreeMap<u64, Item>,
    deleted: BTreeSet<u64>,
}

/// One connection to a [`MemoryStore`] for a single domain.
pub struct MemoryEntityManager {
    store: MemoryStore,
    domain: String,
    journal: RefCell<Option<Journal>>,
}

impl MemoryEntityManager {
    pub fn new<S: Into<String>>(store: MemoryStore, domain: S) -> Self {
        Self {
            store,
            domain: domain.into(),
            journal: RefCell::new(None),
        }
    }

    /// Items of the domain as seen by this connection: committed state with
    /// the open transaction's changes applied on top.
    fn visible(&self) -> Result<BTreeMap<u64, Item>, BatchError> {
        let mut items: BTreeMap<u64, Item> = self
            .store
            .lock()?
            .items
            .iter()
            .filter(|(_, item)| item.domain == self.domain)
            .map(|(id, item)| (*id, item.clone()))
            .collect();

        if let Some(journal) = self.journal.borrow().as_ref() {
            for id in &journal.deleted {
                items.remove(id);
            }
            for (id, item) in &journal.saved {
                items.insert(*id, item.clone());
            }
        }

        Ok(items)
    }

    fn find(&self, id: u64) -> Result<Item, BatchError> {
        self.visible()?.remove(&id).ok_or_else(|| {
            BatchError::Persistence(format!("no {} item with id {}", self.domain, id))
        })
    }

    fn write(&self, item: Item) -> Result<(), BatchError> {
        let id = item
            .id
            .ok_or_else(|| BatchError::Persistence("item without id".to_string()))?;

        let mut journal = self.journal.borrow_mut();
        match journal.as_mut() {
            Some(journal) => {
                journal.deleted.remove(&id);
                journal.saved.insert(id, item);
            }
            None => {
                self.store.lock()?.items.insert(id, item);
            }
        }
        Ok(())
    }

    fn remove(&self, ids: &BTreeSet<u64>) -> Result<(), BatchError> {
        let mut journal = self.journal.borrow_mut();
        match journal.as_mut() {
            Some(journal) => {
                for id in ids {
                    journal.saved.remove(id);
                    journal.deleted.insert(*id);
                }
            }
            None => {
                let mut state = self.store.lock()?;
                for id in ids {
                    state.items.remove(id);
                }
            }
        }
        Ok(())
    }

    /// Ids of `root` and all of its descendants.
    fn subtree(items: &BTreeMap<u64, Item>, root: u64) -> BTreeSet<u64> {
        let mut ids = BTreeSet::from([root]);
        let mut pending = vec![root];

        while let Some(parent) = pending.pop() {
            for (id, item) in items {
                if item.parent_id == Some(parent) && ids.insert(*id) {
                    pending.push(*id);
                }
            }
        }

        ids
    }
}

impl EntityManager for MemoryEntityManager {
    fn create(&self) -> Item {
        Item::new(self.domain.as_str())
    }

    fn search(&self, filter: &SearchFilter) -> Result<Vec<Item>, BatchError> {
        Ok(self
            .visible()?
            .into_values()
            .filter(|item| filter.matches(item))
            .skip(filter.start)
            .take(filter.size)
            .collect())
    }

    fn save(&self, item: &mut Item) -> Result<(), BatchError> {
        if item.domain != self.domain {
            return Err(BatchError::Persistence(format!(
                "cannot save {} item with {} manager",
                item.domain, self.domain
            )));
        }
        if item.code.is_empty() {
            return Err(BatchError::Persistence(format!(
                "{} item without code",
                self.domain
            )));
        }

        let visible = self.visible()?;
        if let Some(other) = visible
            .values()
            .find(|other| other.code == item.code && other.id != item.id)
        {
            return Err(BatchError::Persistence(format!(
                "duplicate {} code \"{}\" (id {:?})",
                self.domain, item.code, other.id
            )));
        }
        if let Some(parent_id) = item.parent_id {
            if !visible.contains_key(&parent_id) {
                return Err(BatchError::Persistence(format!(
                    "parent {} of {} \"{}\" does not exist",
                    parent_id, self.domain, item.code
                )));
            }
        }

        {
            let mut state = self.store.lock()?;
            if item.id.is_none() {
                item.id = Some(state.next_id());
            }
            for list_item in item.list_items.iter_mut().filter(|li| li.id.is_none()) {
                list_item.id = Some(state.next_id());
            }
            for property in item.property_items.iter_mut().filter(|p| p.id.is_none()) {
                property.id = Some(state.next_id());
            }
        }

        item.modified = Some(Utc::now());
        self.write(item.clone())
    }

    fn begin(&self) -> Result<(), BatchError> {
        let mut journal = self.journal.borrow_mut();
        if journal.is_some() {
            return Err(BatchError::Persistence(
                "transaction already started".to_string(),
            ));
        }
        *journal = Some(Journal::default());
        Ok(())
    }

    fn commit(&self) -> Result<(), BatchError> {
        let journal = self
            .journal
            .borrow_mut()
            .take()
            .ok_or_else(|| BatchError::Persistence("no transaction to commit".to_string()))?;

        let mut state = self.store.lock()?;
        for (id, item) in &journal.saved {
            let taken = state.items.iter().any(|(other_id, other)| {
                other_id != id
                    && !journal.deleted.contains(other_id)
                    && other.domain == item.domain
                    && other.code == item.code
            });
            if taken {
                return Err(BatchError::Persistence(format!(
                    "duplicate {} code \"{}\" committed by another connection",
                    item.domain, item.code
                )));
            }
        }

        for id in &journal.deleted {
            state.items.remove(id);
        }
        for (id, item) in journal.saved {
            state.items.insert(id, item);
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), BatchError> {
        if let Some(journal) = self.journal.borrow_mut().take() {
            debug!(
                "Rolled back {} staged save(s) and {} delete(s)",
                journal.saved.len(),
                journal.deleted.len()
            );
        }
        Ok(())
    }

    fn delete(&self, ids: &[u64]) -> Result<(), BatchError> {
        let visible = self.visible()?;
        let mut doomed = BTreeSet::new();
        for id in ids {
            if visible.contains_key(id) {
                doomed.extend(Self::subtree(&visible, *id));
            }
        }
        self.remove(&doomed)
    }

    fn move_item(
        &self,
        id: u64,
        old_parent: Option<u64>,
        new_parent: Option<u64>,
    ) -> Result<(), BatchError> {
        let mut item = self.find(id)?;
        if item.parent_id != old_parent {
            return Err(BatchError::Persistence(format!(
                "{} \"{}\" is not below {:?}",
                self.domain, item.code, old_parent
            )));
        }

        if let Some(parent) = new_parent {
            let visible = self.visible()?;
            if !visible.contains_key(&parent) {
                return Err(BatchError::Persistence(format!(
                    "parent {} does not exist",
                    parent
                )));
            }
            if Self::subtree(&visible, id).contains(&parent) {
                return Err(BatchError::Persistence(format!(
                    "cannot move {} \"{}\" below its own subtree",
                    self.domain, item.code
                )));
            }
        }

        item.parent_id = new_parent;
        item.modified = Some(Utc::now());
        self.write(item)
    }
}
