//! Facet processors: one pluggable processor per facet of an item (texts,
//! media, prices, attributes, properties, category links).
//!
//! Processors are looked up by name in a [`ProcessorRegistry`] when the
//! import is configured, so an unknown name fails before any record is read.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use log::{debug, info};

use crate::error::BatchError;

use super::{
    entity::{Item, ListItem, ManagerFactory, TypeRegistry},
    item::FieldMap,
};

/// Updates one facet of an item from the facet's entries of a record.
pub trait FacetProcessor {
    /// Name of the facet this processor owns.
    fn facet(&self) -> &str;

    /// Adds, updates and removes the item's associations for this facet so
    /// they match `entries`. An empty slice removes all of them.
    fn process(&self, item: &mut Item, entries: &[FieldMap]) -> Result<(), BatchError>;

    /// Called once after the last batch of a run.
    fn finish(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Everything a processor may need when it is constructed.
#[derive(Clone)]
pub struct ProcessorContext {
    /// Domain of the imported items (`product`, `catalog`, ...).
    pub domain: String,
    /// Facet name from the mapping.
    pub facet: String,
    pub managers: Arc<dyn ManagerFactory>,
    pub types: Arc<dyn TypeRegistry>,
}

pub type ProcessorConstructor = fn(&ProcessorContext) -> Result<Box<dyn FacetProcessor>, BatchError>;

/// Static map from processor name to constructor.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    constructors: BTreeMap<String, ProcessorConstructor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all processors shipped with the crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("text", crate::processor::text::TextProcessor::build);
        registry.register("media", crate::processor::media::MediaProcessor::build);
        registry.register("price", crate::processor::price::PriceProcessor::build);
        registry.register(
            "attribute",
            crate::processor::attribute::AttributeProcessor::build,
        );
        registry.register(
            "property",
            crate::processor::property::PropertyProcessor::build,
        );
        registry.register("catalog", crate::processor::reference::build_catalog);
        registry.register("supplier", crate::processor::reference::build_supplier);
        registry
    }

    pub fn register<S: Into<String>>(&mut self, name: S, constructor: ProcessorConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Keeps only the named processors, e.g. to disallow category links in
    /// an attribute import.
    pub fn only(mut self, names: &[&str]) -> Self {
        self.constructors
            .retain(|name, _| names.contains(&name.as_str()));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn build(
        &self,
        name: &str,
        context: &ProcessorContext,
    ) -> Result<Box<dyn FacetProcessor>, BatchError> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            BatchError::Configuration(format!(
                "unknown or disallowed processor \"{}\" for facet \"{}\"",
                name, context.facet
            ))
        })?;
        constructor(context)
    }
}

/// The associations of one domain an item had before the current record
/// was applied.
///
/// Processors take the existing list items out of the item, confirm the
/// ones still present in the record and push them back; whatever is left
/// unconfirmed is stale and gets dropped with the set.
#[derive(Debug, Default)]
pub struct StaleSet {
    pending: Vec<ListItem>,
}

impl StaleSet {
    /// Moves all list items of `domain` out of `item`.
    pub fn take(item: &mut Item, domain: &str) -> Self {
        let (pending, kept): (Vec<ListItem>, Vec<ListItem>) = std::mem::take(&mut item.list_items)
            .into_iter()
            .partition(|li| li.domain == domain);
        item.list_items = kept;
        Self { pending }
    }

    /// Removes and returns the first pending list item with the given key.
    pub fn confirm(&mut self, ref_key: &str, ref_type: &str, list_type: &str) -> Option<ListItem> {
        let index = self
            .pending
            .iter()
            .position(|li| li.matches(ref_key, ref_type, list_type))?;
        Some(self.pending.remove(index))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops the unconfirmed list items and reports how many were removed.
    pub fn discard(self, item: &Item) -> usize {
        if !self.pending.is_empty() {
            debug!(
                "Removing {} stale association(s) from {} \"{}\"",
                self.pending.len(),
                item.domain,
                item.code
            );
        }
        self.pending.len()
    }
}

/// Collects the type codes used by a processor during a run and registers
/// them on `finish`.
pub struct TypeCollector {
    registry: Arc<dyn TypeRegistry>,
    seen: RefCell<BTreeSet<(String, String)>>,
}

impl TypeCollector {
    pub fn new(registry: Arc<dyn TypeRegistry>) -> Self {
        Self {
            registry,
            seen: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn add(&self, domain: &str, code: &str) {
        if code.is_empty() {
            return;
        }
        self.seen
            .borrow_mut()
            .insert((domain.to_string(), code.to_string()));
    }

    /// Registers all collected codes and returns how many were new.
    pub fn flush(&self) -> Result<usize, BatchError> {
        let seen = std::mem::take(&mut *self.seen.borrow_mut());
        let mut added = 0;
        for (domain, code) in &seen {
            if self.registry.register(domain, code)? {
                added += 1;
            }
        }
        if added > 0 {
            info!("Registered {} new type code(s)", added);
        }
        Ok(added)
    }
}

/// Returns the trimmed value of `key`, or `None` when missing or blank.
pub fn value<'a>(entry: &'a FieldMap, key: &str) -> Option<&'a str> {
    entry
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}
