use std::collections::{BTreeMap, BTreeSet};

use crate::{
    core::{
        entity::{EntityManager, Item, SearchFilter},
        facet::{FacetProcessor, ProcessorContext, TypeCollector, value},
        item::FieldMap,
    },
    error::BatchError,
};

use super::{Association, list_type, replace_lists, skip};

/// Links an item to stored items of another domain by their code, e.g. a
/// product to its categories (`catalog.code`) or suppliers
/// (`supplier.code`).
///
/// Referenced codes must exist; an unknown code fails the record.
pub struct ReferenceProcessor {
    facet: String,
    ref_domain: String,
    code_key: String,
    list_keys: Vec<String>,
    list_domain: String,
    manager: Box<dyn EntityManager>,
    types: TypeCollector,
}

impl ReferenceProcessor {
    pub fn new(context: &ProcessorContext, ref_domain: &str) -> Result<Self, BatchError> {
        Ok(Self {
            facet: context.facet.clone(),
            ref_domain: ref_domain.to_string(),
            code_key: format!("{}.code", ref_domain),
            list_keys: vec![
                format!("{}.lists.type", ref_domain),
                format!("{}.lists.type", context.domain),
            ],
            list_domain: format!("{}/lists", ref_domain),
            manager: context.managers.manager(ref_domain)?,
            types: TypeCollector::new(context.types.clone()),
        })
    }

    /// Resolves all referenced codes of a record with one query.
    fn resolve(&self, codes: &BTreeSet<&str>) -> Result<BTreeMap<String, u64>, BatchError> {
        if codes.is_empty() {
            return Ok(BTreeMap::new());
        }

        let filter = SearchFilter::new()
            .codes(codes.iter().copied())
            .slice(0, codes.len());

        Ok(self
            .manager
            .search(&filter)?
            .into_iter()
            .filter_map(|found| found.id.map(|id| (found.code, id)))
            .collect())
    }
}

pub fn build_catalog(context: &ProcessorContext) -> Result<Box<dyn FacetProcessor>, BatchError> {
    Ok(Box::new(ReferenceProcessor::new(context, "catalog")?))
}

pub fn build_supplier(context: &ProcessorContext) -> Result<Box<dyn FacetProcessor>, BatchError> {
    Ok(Box::new(ReferenceProcessor::new(context, "supplier")?))
}

impl FacetProcessor for ReferenceProcessor {
    fn facet(&self) -> &str {
        &self.facet
    }

    fn process(&self, item: &mut Item, entries: &[FieldMap]) -> Result<(), BatchError> {
        let codes: BTreeSet<&str> = entries
            .iter()
            .filter_map(|entry| value(entry, &self.code_key))
            .collect();
        let ids = self.resolve(&codes)?;

        let mut associations = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(code) = value(entry, &self.code_key) else {
                skip(item, &self.facet, &self.code_key);
                continue;
            };
            let id = ids.get(code).copied().ok_or_else(|| {
                BatchError::Record(format!("unknown {} code \"{}\"", self.ref_domain, code))
            })?;
            let list_type = list_type(entry, &self.list_keys);
            self.types.add(&self.list_domain, &list_type);

            associations.push(Association {
                ref_key: code.to_string(),
                ref_type: "default".to_string(),
                list_type,
                ref_id: Some(id),
                status: 1,
                fields: FieldMap::new(),
            });
        }

        replace_lists(item, &self.ref_domain, associations);
        Ok(())
    }

    fn finish(&self) -> Result<(), BatchError> {
        self.types.flush().map(|_| ())
    }
}
