//! # Facet processors
//!
//! One processor per facet of an imported item. All list-based processors
//! convert their entries into [`Association`]s and hand them to
//! [`replace_lists`], which re-uses matching list items (same referenced key,
//! referenced type and list type), appends new ones and drops the rest.

use log::warn;

use crate::core::{
    entity::{Item, ListItem},
    facet::{StaleSet, value},
    item::FieldMap,
};

/// Attribute links (`attribute.code`, `attribute.type`).
pub mod attribute;

/// Media references (`media.url`).
pub mod media;

/// Prices per currency and quantity.
pub mod price;

/// Typed property values stored on the item itself.
pub mod property;

/// Links to other stored items: categories and suppliers.
pub mod reference;

/// Localized texts.
pub mod text;

/// One association built from a facet entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub ref_key: String,
    pub ref_type: String,
    pub list_type: String,
    pub ref_id: Option<u64>,
    pub status: i32,
    pub fields: FieldMap,
}

/// Makes the list items of `ref_domain` on `item` equal to `associations`.
///
/// Existing list items are matched by `(ref_key, ref_type, list_type)` and
/// keep their id; unmatched existing ones are removed. Returns the number
/// of removed list items.
pub fn replace_lists(item: &mut Item, ref_domain: &str, associations: Vec<Association>) -> usize {
    let mut stale = StaleSet::take(item, ref_domain);

    for (position, association) in associations.into_iter().enumerate() {
        let mut list_item = stale
            .confirm(
                &association.ref_key,
                &association.ref_type,
                &association.list_type,
            )
            .unwrap_or_else(|| {
                ListItem::new(
                    ref_domain,
                    association.list_type.as_str(),
                    association.ref_type.as_str(),
                    association.ref_key.as_str(),
                )
            });

        list_item.position = position;
        list_item.status = association.status;
        list_item.ref_id = association.ref_id;
        list_item.ref_fields = association.fields;
        item.list_items.push(list_item);
    }

    stale.discard(item)
}

/// First non-blank value among `keys`, `default` otherwise.
pub(crate) fn list_type(entry: &FieldMap, keys: &[String]) -> String {
    keys.iter()
        .find_map(|key| value(entry, key))
        .unwrap_or("default")
        .to_string()
}

/// Copies the non-blank values of `keys` into a payload map.
pub(crate) fn payload(entry: &FieldMap, keys: &[&str]) -> FieldMap {
    keys.iter()
        .filter_map(|key| value(entry, key).map(|v| (key.to_string(), v.to_string())))
        .collect()
}

pub(crate) fn skip(item: &Item, facet: &str, missing: &str) {
    warn!(
        "Skipping {} entry without \"{}\" for {} \"{}\"",
        facet, missing, item.domain, item.code
    );
}
