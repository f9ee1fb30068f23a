use crate::{
    core::{
        entity::Item,
        facet::{FacetProcessor, ProcessorContext, TypeCollector, value},
        item::FieldMap,
    },
    error::BatchError,
};

use super::{Association, list_type, payload, replace_lists, skip};

/// Attribute links such as colour or size, identified by attribute code
/// and attribute type.
pub struct AttributeProcessor {
    facet: String,
    list_keys: Vec<String>,
    list_domain: String,
    types: TypeCollector,
}

impl AttributeProcessor {
    pub fn build(context: &ProcessorContext) -> Result<Box<dyn FacetProcessor>, BatchError> {
        Ok(Box::new(Self {
            facet: context.facet.clone(),
            list_keys: vec![format!("{}.lists.type", context.domain)],
            list_domain: format!("{}/lists", context.domain),
            types: TypeCollector::new(context.types.clone()),
        }))
    }
}

impl FacetProcessor for AttributeProcessor {
    fn facet(&self) -> &str {
        &self.facet
    }

    fn process(&self, item: &mut Item, entries: &[FieldMap]) -> Result<(), BatchError> {
        let mut associations = Vec::with_capacity(entries.len());

        for entry in entries {
            let (Some(code), Some(attr_type)) =
                (value(entry, "attribute.code"), value(entry, "attribute.type"))
            else {
                skip(item, &self.facet, "attribute.code/attribute.type");
                continue;
            };
            let list_type = list_type(entry, &self.list_keys);

            self.types.add("attribute", attr_type);
            self.types.add(&self.list_domain, &list_type);

            associations.push(Association {
                ref_key: code.to_string(),
                ref_type: attr_type.to_string(),
                list_type,
                ref_id: None,
                status: 1,
                fields: payload(entry, &["attribute.code", "attribute.type", "attribute.label"]),
            });
        }

        replace_lists(item, "attribute", associations);
        Ok(())
    }

    fn finish(&self) -> Result<(), BatchError> {
        self.types.flush().map(|_| ())
    }
}
