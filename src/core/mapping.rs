//! Column mapping: splits a position-indexed row (or an XML item element)
//! into the base `item` chunk and one list of entries per facet.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::BatchError;

use super::item::{FieldMap, MappedRecord, RawRecord, RecordMapper};

/// Name of the facet holding the base entity mapping.
pub const ITEM_FACET: &str = "item";

/// One mapped column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub position: usize,
    pub key: String,
}

impl FieldMapping {
    pub fn new<S: Into<String>>(position: usize, key: S) -> Self {
        Self {
            position,
            key: key.into(),
        }
    }
}

/// Validated `{ facet -> [position -> domain key] }` mapping.
///
/// Invariants checked once at construction:
/// - the `item` facet exists and is not empty,
/// - every position belongs to exactly one facet.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    facets: IndexMap<String, Vec<FieldMapping>>,
}

impl ColumnMapping {
    pub fn new(facets: IndexMap<String, Vec<FieldMapping>>) -> Result<Self, BatchError> {
        match facets.get(ITEM_FACET) {
            Some(item) if !item.is_empty() => {}
            _ => {
                return Err(BatchError::Configuration(
                    "no \"item\" mapping available".to_string(),
                ));
            }
        }

        let mut seen = BTreeSet::new();
        let mut sorted = IndexMap::with_capacity(facets.len());

        for (facet, mut fields) in facets {
            for field in &fields {
                if !seen.insert(field.position) {
                    return Err(BatchError::Configuration(format!(
                        "column {} is mapped more than once (facet \"{}\")",
                        field.position, facet
                    )));
                }
            }
            fields.sort_by_key(|field| field.position);
            sorted.insert(facet, fields);
        }

        Ok(Self { facets: sorted })
    }

    /// Builds the mapping from its configuration form,
    /// `{ facet -> { position -> key } }`.
    pub fn from_config(
        config: &IndexMap<String, BTreeMap<usize, String>>,
    ) -> Result<Self, BatchError> {
        let facets = config
            .iter()
            .map(|(facet, fields)| {
                let fields = fields
                    .iter()
                    .map(|(position, key)| FieldMapping::new(*position, key.clone()))
                    .collect();
                (facet.clone(), fields)
            })
            .collect();

        Self::new(facets)
    }

    pub fn item(&self) -> &[FieldMapping] {
        self.facets
            .get(ITEM_FACET)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Facet names other than `item`, in declaration order.
    pub fn facet_names(&self) -> impl Iterator<Item = &str> {
        self.facets
            .keys()
            .map(String::as_str)
            .filter(|name| *name != ITEM_FACET)
    }

    /// Position of a base key, e.g. the `product.code` column.
    pub fn position_of(&self, key: &str) -> Option<usize> {
        self.item()
            .iter()
            .find(|field| field.key == key)
            .map(|field| field.position)
    }

    fn mapped_positions(&self) -> BTreeSet<usize> {
        self.facets
            .values()
            .flatten()
            .map(|field| field.position)
            .collect()
    }
}

/// Applies a [`ColumnMapping`] to CSV rows.
pub struct ColumnMapper {
    mapping: ColumnMapping,
    strict: bool,
    positions: BTreeSet<usize>,
}

impl ColumnMapper {
    pub fn new(mapping: ColumnMapping, strict: bool) -> Self {
        let positions = mapping.mapped_positions();
        Self {
            mapping,
            strict,
            positions,
        }
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Splits one row into `{ facet -> chunk }`.
    ///
    /// Every mapped position present in the row lands in exactly one facet.
    /// The `item` chunk keeps empty values so a present column always
    /// overwrites; facet entries made only of empty values are dropped.
    pub fn split(&self, record: &RawRecord) -> MappedRecord {
        let mut item = FieldMap::new();
        for field in self.mapping.item() {
            if let Some(value) = record.get(field.position) {
                item.insert(field.key.clone(), value.clone());
            }
        }

        let mut mapped = MappedRecord::new(item);
        for facet in self.mapping.facet_names() {
            let fields = &self.mapping.facets[facet];
            mapped
                .facets
                .insert(facet.to_string(), Self::entries(fields, record));
        }

        if self.strict {
            for (position, value) in record.iter().enumerate() {
                if !self.positions.contains(&position) && !value.trim().is_empty() {
                    warn!("Unmapped column {} with value \"{}\"", position, value);
                }
            }
        }

        mapped
    }

    /// Groups a facet's fields into entries; a key that repeats starts a new
    /// entry.
    fn entries(fields: &[FieldMapping], record: &RawRecord) -> Vec<FieldMap> {
        let mut entries = Vec::new();
        let mut current = FieldMap::new();

        for field in fields {
            if current.contains_key(&field.key) {
                entries.push(std::mem::take(&mut current));
            }
            if let Some(value) = record.get(field.position) {
                current.insert(field.key.clone(), value.clone());
            }
        }
        entries.push(current);

        entries.retain(|entry| entry.values().any(|value| !value.trim().is_empty()));
        entries
    }
}

impl RecordMapper<RawRecord> for ColumnMapper {
    fn map(&self, _code: &str, record: &RawRecord) -> Result<MappedRecord, BatchError> {
        Ok(self.split(record))
    }
}

/// Maps XML item elements, see [`crate::item::xml::XmlNode`].
#[cfg(feature = "xml")]
pub struct NodeMapper {
    domain: String,
    key_attribute: String,
    facets: BTreeSet<String>,
    strict: bool,
}

#[cfg(feature = "xml")]
impl NodeMapper {
    pub fn new<S: Into<String>>(domain: S, key_attribute: S, facets: &[String], strict: bool) -> Self {
        Self {
            domain: domain.into(),
            key_attribute: key_attribute.into(),
            facets: facets.iter().cloned().collect(),
            strict,
        }
    }

    fn qualify(&self, name: &str) -> String {
        if name.contains('.') {
            name.to_string()
        } else {
            format!("{}.{}", self.domain, name)
        }
    }

    fn entry(node: &crate::item::xml::XmlNode) -> FieldMap {
        let mut entry: FieldMap = node
            .attributes
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for child in node.children.iter().filter(|child| child.is_leaf()) {
            entry.insert(child.name.clone(), child.text.clone());
        }
        entry
    }
}

#[cfg(feature = "xml")]
impl RecordMapper<crate::item::xml::XmlNode> for NodeMapper {
    fn map(
        &self,
        code: &str,
        node: &crate::item::xml::XmlNode,
    ) -> Result<MappedRecord, BatchError> {
        let mut item = FieldMap::new();
        item.insert(self.qualify("code"), code.to_string());

        for (name, value) in &node.attributes {
            if *name != self.key_attribute {
                item.insert(self.qualify(name), value.clone());
            }
        }

        let mut mapped = MappedRecord::new(FieldMap::new());
        for child in &node.children {
            if self.facets.contains(&child.name) {
                let entries = child
                    .children
                    .iter()
                    .map(Self::entry)
                    .filter(|entry| entry.values().any(|value| !value.trim().is_empty()))
                    .collect();
                mapped.facets.insert(child.name.clone(), entries);
            } else if child.is_leaf() {
                item.insert(self.qualify(&child.name), child.text.clone());
            } else if self.strict {
                warn!(
                    "Unknown element <{}> in {} with code {}",
                    child.name, self.domain, code
                );
            }
        }

        mapped.item = item;
        Ok(mapped)
    }
}
