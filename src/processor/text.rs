use crate::{
    core::{
        entity::{Item, parse_status},
        facet::{FacetProcessor, ProcessorContext, TypeCollector, value},
        item::FieldMap,
    },
    error::BatchError,
};

use super::{Association, list_type, payload, replace_lists, skip};

const MAX_LABEL: usize = 255;

/// Texts of an item, one per `(language, text type, list type)`.
///
/// Entry keys: `text.content` (required), `text.type`, `text.languageid`,
/// `text.label`, `text.status` and `<domain>.lists.type`.
pub struct TextProcessor {
    facet: String,
    list_keys: Vec<String>,
    list_domain: String,
    types: TypeCollector,
}

impl TextProcessor {
    pub fn new(context: &ProcessorContext) -> Self {
        Self {
            facet: context.facet.clone(),
            list_keys: vec![format!("{}.lists.type", context.domain)],
            list_domain: format!("{}/lists", context.domain),
            types: TypeCollector::new(context.types.clone()),
        }
    }

    pub fn build(context: &ProcessorContext) -> Result<Box<dyn FacetProcessor>, BatchError> {
        Ok(Box::new(Self::new(context)))
    }

    fn association(&self, entry: &FieldMap) -> Result<Option<Association>, BatchError> {
        let Some(content) = value(entry, "text.content") else {
            return Ok(None);
        };

        let text_type = value(entry, "text.type").unwrap_or("default");
        let language = value(entry, "text.languageid").unwrap_or("");
        let list_type = list_type(entry, &self.list_keys);

        let mut fields = payload(entry, &["text.content", "text.label"]);
        if !fields.contains_key("text.label") {
            let label: String = content.chars().take(MAX_LABEL).collect();
            fields.insert("text.label".to_string(), label);
        }

        self.types.add("text", text_type);
        self.types.add(&self.list_domain, &list_type);

        Ok(Some(Association {
            ref_key: language.to_string(),
            ref_type: text_type.to_string(),
            list_type,
            ref_id: None,
            status: parse_status(entry.get("text.status").map_or("", String::as_str))?,
            fields,
        }))
    }
}

impl FacetProcessor for TextProcessor {
    fn facet(&self) -> &str {
        &self.facet
    }

    fn process(&self, item: &mut Item, entries: &[FieldMap]) -> Result<(), BatchError> {
        let mut associations = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.association(entry)? {
                Some(association) => associations.push(association),
                None => skip(item, &self.facet, "text.content"),
            }
        }

        replace_lists(item, "text", associations);
        Ok(())
    }

    fn finish(&self) -> Result<(), BatchError> {
        self.types.flush().map(|_| ())
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::sync::Arc;

    use crate::{
        core::{
            entity::Item,
            facet::{FacetProcessor, ProcessorContext},
            item::FieldMap,
        },
        item::memory::MemoryStore,
    };

    use super::TextProcessor;

    fn entry(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn processor(store: &MemoryStore) -> TextProcessor {
        TextProcessor::new(&ProcessorContext {
            domain: "product".to_string(),
            facet: "text".to_string(),
            managers: Arc::new(store.clone()),
            types: Arc::new(store.clone()),
        })
    }

    #[test]
    fn texts_are_added_updated_and_removed() {
        let store = MemoryStore::new();
        let processor = processor(&store);
        let mut item = Item::new("product");

        processor
            .process(
                &mut item,
                &[
                    entry(&[("text.type", "name"), ("text.languageid", "en"), ("text.content", "Shoe")]),
                    entry(&[("text.type", "name"), ("text.languageid", "de"), ("text.content", "Schuh")]),
                ],
            )
            .unwrap();
        assert_eq!(item.list_items.len(), 2);
        item.list_items[0].id = Some(1);

        processor
            .process(
                &mut item,
                &[entry(&[("text.type", "name"), ("text.languageid", "en"), ("text.content", "Sneaker")])],
            )
            .unwrap();

        assert_eq!(item.list_items.len(), 1);
        assert_eq!(item.list_items[0].id, Some(1));
        assert_eq!(item.list_items[0].ref_fields["text.content"], "Sneaker");
        assert_eq!(item.list_items[0].ref_fields["text.label"], "Sneaker");
    }

    #[test]
    fn entries_without_content_are_skipped() {
        let store = MemoryStore::new();
        let processor = processor(&store);
        let mut item = Item::new("product");

        processor
            .process(&mut item, &[entry(&[("text.type", "name")])])
            .unwrap();
        assert!(item.list_items.is_empty());
    }

    #[test]
    fn finish_registers_seen_types() {
        let store = MemoryStore::new();
        let processor = processor(&store);
        let mut item = Item::new("product");

        processor
            .process(
                &mut item,
                &[entry(&[("text.type", "short"), ("text.content", "Short text")])],
            )
            .unwrap();
        assert!(store.types().is_empty());

        processor.finish().unwrap();
        let types = store.types();
        assert!(types.contains(&("text".to_string(), "short".to_string())));
        assert!(types.contains(&("product/lists".to_string(), "default".to_string())));
    }
}
