use crate::{
    core::{
        entity::{Item, parse_status},
        facet::{FacetProcessor, ProcessorContext, TypeCollector, value},
        item::FieldMap,
    },
    error::BatchError,
};

use super::{Association, list_type, payload, replace_lists, skip};

/// Media references of an item, matched by URL and media type.
pub struct MediaProcessor {
    facet: String,
    list_keys: Vec<String>,
    list_domain: String,
    types: TypeCollector,
}

impl MediaProcessor {
    pub fn build(context: &ProcessorContext) -> Result<Box<dyn FacetProcessor>, BatchError> {
        Ok(Box::new(Self {
            facet: context.facet.clone(),
            list_keys: vec![format!("{}.lists.type", context.domain)],
            list_domain: format!("{}/lists", context.domain),
            types: TypeCollector::new(context.types.clone()),
        }))
    }

    fn association(&self, entry: &FieldMap) -> Result<Option<Association>, BatchError> {
        let Some(url) = value(entry, "media.url") else {
            return Ok(None);
        };

        let media_type = value(entry, "media.type").unwrap_or("default");
        let list_type = list_type(entry, &self.list_keys);

        let mut fields = payload(
            entry,
            &["media.url", "media.label", "media.languageid", "media.mimetype"],
        );
        fields
            .entry("media.label".to_string())
            .or_insert_with(|| url.rsplit('/').next().unwrap_or(url).to_string());

        self.types.add("media", media_type);
        self.types.add(&self.list_domain, &list_type);

        Ok(Some(Association {
            ref_key: url.to_string(),
            ref_type: media_type.to_string(),
            list_type,
            ref_id: None,
            status: parse_status(entry.get("media.status").map_or("", String::as_str))?,
            fields,
        }))
    }
}

impl FacetProcessor for MediaProcessor {
    fn facet(&self) -> &str {
        &self.facet
    }

    fn process(&self, item: &mut Item, entries: &[FieldMap]) -> Result<(), BatchError> {
        let mut associations = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.association(entry)? {
                Some(association) => associations.push(association),
                None => skip(item, &self.facet, "media.url"),
            }
        }

        replace_lists(item, "media", associations);
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
        error::BatchError,
        item::memory::MemoryStore,
    };

    use super::MediaProcessor;

    fn entry(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn processor(store: &MemoryStore) -> Box<dyn FacetProcessor> {
        MediaProcessor::build(&ProcessorContext {
            domain: "product".to_string(),
            facet: "media".to_string(),
            managers: Arc::new(store.clone()),
            types: Arc::new(store.clone()),
        })
        .unwrap()
    }

    #[test]
    fn media_are_matched_by_url_and_type() {
        let store = MemoryStore::new();
        let processor = processor(&store);
        let mut item = Item::new("product");

        processor
            .process(
                &mut item,
                &[
                    entry(&[("media.url", "img/front.jpg"), ("media.type", "default")]),
                    entry(&[("media.url", "img/front.jpg"), ("media.type", "thumbnail")]),
                    entry(&[("media.url", "img/back.jpg")]),
                ],
            )
            .unwrap();
        assert_eq!(item.list_items.len(), 3);
        assert_eq!(item.list_items[2].ref_fields["media.label"], "back.jpg");
        for (id, list_item) in item.list_items.iter_mut().enumerate() {
            list_item.id = Some(id as u64 + 1);
        }

        processor
            .process(
                &mut item,
                &[
                    entry(&[("media.url", "img/front.jpg"), ("media.type", "thumbnail")]),
                    entry(&[("media.url", "img/front.jpg"), ("media.label", "Front")]),
                ],
            )
            .unwrap();

        let kept: Vec<_> = item
            .list_items
            .iter()
            .map(|li| (li.ref_type.as_str(), li.id))
            .collect();
        assert_eq!(kept, vec![("thumbnail", Some(2)), ("default", Some(1))]);
        assert_eq!(item.list_items[1].ref_fields["media.label"], "Front");
    }

    #[test]
    fn entries_without_url_are_skipped() {
        let store = MemoryStore::new();
        let processor = processor(&store);
        let mut item = Item::new("product");

        processor
            .process(
                &mut item,
                &[
                    entry(&[("media.type", "default"), ("media.label", "nothing")]),
                    entry(&[("media.url", "a.png")]),
                ],
            )
            .unwrap();

        assert_eq!(item.list_items.len(), 1);
        assert_eq!(item.list_items[0].ref_key, "a.png");
    }

    #[test]
    fn invalid_status_fails_the_record() {
        let store = MemoryStore::new();
        let processor = processor(&store);
        let mut item = Item::new("product");

        let result = processor.process(
            &mut item,
            &[entry(&[("media.url", "a.png"), ("media.status", "on")])],
        );
        assert!(matches!(result, Err(BatchError::Record(_))));
    }
}
