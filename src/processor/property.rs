use crate::{
    core::{
        entity::{Item, PropertyItem},
        facet::{FacetProcessor, ProcessorContext, TypeCollector, value},
        item::FieldMap,
    },
    error::BatchError,
};

use super::skip;

/// Typed property values of an item (`<domain>.property.type`,
/// `<domain>.property.value`, `<domain>.property.languageid`).
///
/// Existing properties are matched by type and language; unmatched ones are
/// removed.
pub struct PropertyProcessor {
    facet: String,
    type_key: String,
    value_key: String,
    language_key: String,
    type_domain: String,
    types: TypeCollector,
}

impl PropertyProcessor {
    pub fn build(context: &ProcessorContext) -> Result<Box<dyn FacetProcessor>, BatchError> {
        Ok(Box::new(Self {
            facet: context.facet.clone(),
            type_key: format!("{}.property.type", context.domain),
            value_key: format!("{}.property.value", context.domain),
            language_key: format!("{}.property.languageid", context.domain),
            type_domain: format!("{}/property", context.domain),
            types: TypeCollector::new(context.types.clone()),
        }))
    }
}

impl FacetProcessor for PropertyProcessor {
    fn facet(&self) -> &str {
        &self.facet
    }

    fn process(&self, item: &mut Item, entries: &[FieldMap]) -> Result<(), BatchError> {
        let mut pending = std::mem::take(&mut item.property_items);

        for entry in entries {
            let (Some(prop_type), Some(prop_value)) =
                (value(entry, &self.type_key), value(entry, &self.value_key))
            else {
                skip(item, &self.facet, &self.type_key);
                continue;
            };
            let language = value(entry, &self.language_key).map(str::to_string);

            let mut property = match pending
                .iter()
                .position(|p| p.prop_type == prop_type && p.language_id == language)
            {
                Some(index) => pending.remove(index),
                None => PropertyItem {
                    id: None,
                    prop_type: prop_type.to_string(),
                    language_id: language,
                    value: String::new(),
                },
            };
            property.value = prop_value.to_string();

            self.types.add(&self.type_domain, prop_type);
            item.property_items.push(property);
        }

        Ok(())
    }

    fn finish(&self) -> Result<(), BatchError> {
        self.types.flush().map(|_| ())
    }
}
