use crate::{
    core::{
        entity::{Item, parse_status},
        facet::{FacetProcessor, ProcessorContext, TypeCollector, value},
        item::FieldMap,
    },
    error::BatchError,
};

use super::{Association, list_type, replace_lists, skip};

/// Prices of an item, one per `(currency/quantity, price type, list type)`.
///
/// Entry keys: `price.currencyid` (required), `price.value`, `price.costs`,
/// `price.rebate`, `price.taxrate`, `price.quantity`, `price.type`,
/// `price.status`. Amounts are normalized to two decimals.
pub struct PriceProcessor {
    facet: String,
    list_keys: Vec<String>,
    list_domain: String,
    types: TypeCollector,
}

impl PriceProcessor {
    pub fn build(context: &ProcessorContext) -> Result<Box<dyn FacetProcessor>, BatchError> {
        Ok(Box::new(Self {
            facet: context.facet.clone(),
            list_keys: vec![format!("{}.lists.type", context.domain)],
            list_domain: format!("{}/lists", context.domain),
            types: TypeCollector::new(context.types.clone()),
        }))
    }

    fn amount(entry: &FieldMap, key: &str) -> Result<String, BatchError> {
        let raw = value(entry, key).unwrap_or("0");
        let amount: f64 = raw
            .replace(',', ".")
            .parse()
            .map_err(|_| BatchError::Record(format!("invalid amount \"{}\" for {}", raw, key)))?;
        Ok(format!("{:.2}", amount))
    }

    fn association(&self, entry: &FieldMap) -> Result<Option<Association>, BatchError> {
        let Some(currency) = value(entry, "price.currencyid") else {
            return Ok(None);
        };

        let quantity: u32 = value(entry, "price.quantity")
            .unwrap_or("1")
            .parse()
            .map_err(|_| BatchError::Record("invalid price quantity".to_string()))?;
        let price_type = value(entry, "price.type").unwrap_or("default");
        let list_type = list_type(entry, &self.list_keys);

        let mut fields = FieldMap::new();
        fields.insert("price.currencyid".to_string(), currency.to_uppercase());
        fields.insert("price.quantity".to_string(), quantity.to_string());
        for key in ["price.value", "price.costs", "price.rebate", "price.taxrate"] {
            fields.insert(key.to_string(), Self::amount(entry, key)?);
        }

        self.types.add("price", price_type);
        self.types.add(&self.list_domain, &list_type);

        Ok(Some(Association {
            ref_key: format!("{}/{}", currency.to_uppercase(), quantity),
            ref_type: price_type.to_string(),
            list_type,
            ref_id: None,
            status: parse_status(entry.get("price.status").map_or("", String::as_str))?,
            fields,
        }))
    }
}

impl FacetProcessor for PriceProcessor {
    fn facet(&self) -> &str {
        &self.facet
    }

    fn process(&self, item: &mut Item, entries: &[FieldMap]) -> Result<(), BatchError> {
        let mut associations = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.association(entry)? {
                Some(association) => associations.push(association),
                None => skip(item, &self.facet, "price.currencyid"),
            }
        }

        replace_lists(item, "price", associations);
        Ok(())
    }

    fn finish(&self) -> Result<(), BatchError> {
        self.types.flush().map(|_| ())
    }
}
