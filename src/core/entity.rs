use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BatchError;

use super::item::FieldMap;

/// A persisted domain object: catalog node, product, supplier or attribute.
///
/// `code` is the natural key, unique per domain; `id` is assigned by the
/// entity manager on first save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Option<u64>,
    pub domain: String,
    pub code: String,
    pub label: String,
    pub item_type: String,
    pub status: i32,
    pub parent_id: Option<u64>,
    pub fields: BTreeMap<String, String>,
    pub list_items: Vec<ListItem>,
    pub property_items: Vec<PropertyItem>,
    pub modified: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new<S: Into<String>>(domain: S) -> Self {
        Self {
            id: None,
            domain: domain.into(),
            code: String::new(),
            label: String::new(),
            item_type: "default".to_string(),
            status: 1,
            parent_id: None,
            fields: BTreeMap::new(),
            list_items: Vec::new(),
            property_items: Vec::new(),
            modified: None,
        }
    }

    /// Overwrites the fields present in `chunk`; absent keys keep their value.
    ///
    /// Keys are expected as `<domain>.<name>`. `code`, `label`, `type` and
    /// `status` go to the typed fields, `parent` is left to the hierarchy
    /// resolver and everything else is stored in `fields`.
    pub fn apply(&mut self, chunk: &FieldMap) -> Result<(), BatchError> {
        let prefix = format!("{}.", self.domain);

        for (key, value) in chunk {
            let name = key.strip_prefix(prefix.as_str()).unwrap_or(key.as_str());
            match name {
                "code" => self.code = value.trim().to_string(),
                "label" => self.label = value.clone(),
                "type" => {
                    if !value.is_empty() {
                        self.item_type = value.clone();
                    }
                }
                "status" => self.status = parse_status(value)?,
                "parent" => {}
                _ => {
                    self.fields.insert(name.to_string(), value.clone());
                }
            }
        }

        if self.label.is_empty() {
            self.label = self.code.clone();
        }

        Ok(())
    }

    pub fn list_items_of<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a ListItem> {
        self.list_items.iter().filter(move |li| li.domain == domain)
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

/// Parses a status column; empty means enabled.
pub fn parse_status(value: &str) -> Result<i32, BatchError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(1);
    }
    value
        .parse()
        .map_err(|_| BatchError::Record(format!("invalid status \"{}\"", value)))
}

/// A typed association from an item to a referenced sub-entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: Option<u64>,
    /// Domain of the referenced entity (`text`, `media`, `catalog`, ...).
    pub domain: String,
    /// Association type, e.g. `default` or `variant`.
    pub list_type: String,
    /// Type of the referenced entity, e.g. `name` for texts.
    pub ref_type: String,
    /// Natural key of the referenced entity within its type.
    pub ref_key: String,
    /// Id of the referenced entity when it is a stored item.
    pub ref_id: Option<u64>,
    pub position: usize,
    pub status: i32,
    /// Payload of the referenced entity (content, url, value, ...).
    pub ref_fields: FieldMap,
}

impl ListItem {
    pub fn new<S: Into<String>>(domain: S, list_type: S, ref_type: S, ref_key: S) -> Self {
        Self {
            id: None,
            domain: domain.into(),
            list_type: list_type.into(),
            ref_type: ref_type.into(),
            ref_key: ref_key.into(),
            ref_id: None,
            position: 0,
            status: 1,
            ref_fields: FieldMap::new(),
        }
    }

    pub fn matches(&self, ref_key: &str, ref_type: &str, list_type: &str) -> bool {
        self.ref_key == ref_key && self.ref_type == ref_type && self.list_type == list_type
    }
}

/// A typed property value of an item, e.g. a package weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyItem {
    pub id: Option<u64>,
    pub prop_type: String,
    pub language_id: Option<String>,
    pub value: String,
}

/// Criteria for [`EntityManager::search`]. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub codes: Option<Vec<String>>,
    /// `Some(None)` selects root nodes.
    pub parent_id: Option<Option<u64>>,
    pub modified_before: Option<DateTime<Utc>>,
    /// Related domains to load eagerly.
    pub domains: Vec<String>,
    pub start: usize,
    pub size: usize,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self {
            size: 100,
            ..Default::default()
        }
    }

    pub fn codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes = Some(codes.into_iter().map(Into::into).collect());
        self
    }

    pub fn parent(mut self, parent_id: Option<u64>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn modified_before(mut self, time: DateTime<Utc>) -> Self {
        self.modified_before = Some(time);
        self
    }

    pub fn domains(mut self, domains: &[String]) -> Self {
        self.domains = domains.to_vec();
        self
    }

    pub fn slice(mut self, start: usize, size: usize) -> Self {
        self.start = start;
        self.size = size;
        self
    }

    /// Whether `item` satisfies the criteria, slicing aside.
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(codes) = &self.codes {
            if !codes.iter().any(|code| *code == item.code) {
                return false;
            }
        }
        if let Some(parent_id) = self.parent_id {
            if item.parent_id != parent_id {
                return false;
            }
        }
        if let Some(before) = self.modified_before {
            if item.modified.is_some_and(|modified| modified >= before) {
                return false;
            }
        }
        true
    }
}

/// A connection to the persistence layer for one entity domain.
///
/// Managers are used by a single worker; transactions are per connection so
/// a rollback never discards another connection's committed work.
pub trait EntityManager {
    /// Returns a new, unsaved item of the manager's domain.
    fn create(&self) -> Item;

    fn search(&self, filter: &SearchFilter) -> Result<Vec<Item>, BatchError>;

    /// Stores the item and assigns ids to it and its new list items.
    fn save(&self, item: &mut Item) -> Result<(), BatchError>;

    fn begin(&self) -> Result<(), BatchError>;

    fn commit(&self) -> Result<(), BatchError>;

    fn rollback(&self) -> Result<(), BatchError>;

    /// Deletes items; tree managers delete the subtrees as well.
    fn delete(&self, ids: &[u64]) -> Result<(), BatchError>;

    /// Stores a new tree node below `parent_id`.
    fn insert(&self, item: &mut Item, parent_id: Option<u64>) -> Result<(), BatchError> {
        item.parent_id = parent_id;
        self.save(item)
    }

    /// Re-attaches the node `id` and its subtree from `old_parent` to `new_parent`.
    fn move_item(
        &self,
        id: u64,
        old_parent: Option<u64>,
        new_parent: Option<u64>,
    ) -> Result<(), BatchError> {
        let _ = (id, old_parent, new_parent);
        Err(BatchError::Persistence(
            "moving items is not supported by this manager".to_string(),
        ))
    }
}

/// Opens entity managers; shared by all workers of a job.
pub trait ManagerFactory: Send + Sync {
    fn manager(&self, domain: &str) -> Result<Box<dyn EntityManager>, BatchError>;
}

/// Registry of type codes (list types, text types, property types, ...).
pub trait TypeRegistry: Send + Sync {
    /// Registers `code` for the type domain, e.g. (`product/lists`, `default`).
    /// Returns `true` if the code was not known before.
    fn register(&self, domain: &str, code: &str) -> Result<bool, BatchError>;
}

/// Batch-scoped `code -> item` table.
///
/// Built by the prefetcher and intentionally updated while the batch runs:
/// the coordinator inserts every committed item, so later records of the
/// same batch can reference codes created by earlier ones (e.g. as parent).
#[derive(Debug, Default)]
pub struct NaturalKeyMap {
    items: HashMap<String, Item>,
}

impl NaturalKeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code: &str) -> Option<&Item> {
        self.items.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.items.contains_key(code)
    }

    pub fn insert(&mut self, item: Item) {
        self.items.insert(item.code.clone(), item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<Item> for NaturalKeyMap {
    fn from_iter<T: IntoIterator<Item = Item>>(iter: T) -> Self {
        let mut map = NaturalKeyMap::new();
        for item in iter {
            map.insert(item);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn apply_overwrites_present_keys_only() {
        let mut item = Item::new("product");
        item.apply(&chunk(&[
            ("product.code", " p1 "),
            ("product.label", "Shoe"),
            ("product.datestart", "2024-01-01"),
        ]))
        .unwrap();

        item.apply(&chunk(&[("product.status", "0")])).unwrap();

        assert_eq!(item.code, "p1");
        assert_eq!(item.label, "Shoe");
        assert_eq!(item.status, 0);
        assert_eq!(item.fields["datestart"], "2024-01-01");
    }

    #[test]
    fn label_defaults_to_code_and_parent_is_not_stored() {
        let mut item = Item::new("catalog");
        item.apply(&chunk(&[("catalog.code", "cat1"), ("catalog.parent", "root")]))
            .unwrap();

        assert_eq!(item.label, "cat1");
        assert!(item.fields.is_empty());
    }

    #[test]
    fn invalid_status_is_a_record_error() {
        let mut item = Item::new("product");
        let result = item.apply(&chunk(&[("product.status", "yes")]));
        assert!(matches!(result, Err(BatchError::Record(_))));
    }

    #[test]
    fn filter_matches_codes_parent_and_age() {
        let mut item = Item::new("catalog");
        item.code = "cat1".to_string();
        item.parent_id = Some(4);
        item.modified = Some(Utc::now());

        assert!(SearchFilter::new().codes(["cat1", "cat2"]).matches(&item));
        assert!(!SearchFilter::new().codes(["cat2"]).matches(&item));
        assert!(SearchFilter::new().parent(Some(4)).matches(&item));
        assert!(!SearchFilter::new().parent(None).matches(&item));
        assert!(
            !SearchFilter::new()
                .modified_before(Utc::now() - chrono::Duration::hours(1))
                .matches(&item)
        );
    }
}
