use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use crate::types::{AttributeName, AttributeValue, RecordId};

/// Labeled product record as read from the record store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable store identifier (used for updates and snapshot matching).
    pub id: RecordId,
    /// Serial display number shown to the reviewer.
    pub serial: u64,
    /// Image reference (URL) for the product.
    pub image_url: String,
    /// Current attribute values, in the store's field order.
    pub attributes: IndexMap<AttributeName, AttributeValue>,
}

impl Record {
    /// Build a record with no attributes.
    pub fn new(id: impl Into<RecordId>, serial: u64, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            serial,
            image_url: image_url.into(),
            attributes: IndexMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(
        mut self,
        name: impl Into<AttributeName>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Current value of `attribute`, if the record carries one.
    pub fn value(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }
}

/// Closed set of permitted values per attribute for one record category.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    attributes: IndexMap<AttributeName, Vec<AttributeValue>>,
}

impl Taxonomy {
    /// Empty taxonomy (every attribute has no valid replacement).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register the ordered options for `attribute` (duplicates and empty values dropped).
    pub fn with_options<A, V, I>(mut self, attribute: A, options: I) -> Self
    where
        A: Into<AttributeName>,
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        let mut collected: Vec<AttributeValue> = Vec::new();
        for option in options {
            let option = option.into();
            if option.is_empty() || collected.contains(&option) {
                continue;
            }
            collected.push(option);
        }
        self.attributes.insert(attribute.into(), collected);
        self
    }

    /// Permitted replacement values for `attribute`; empty when the taxonomy has no entry.
    pub fn options(&self, attribute: &str) -> &[AttributeValue] {
        self.attributes
            .get(attribute)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True when `value` is a permitted replacement for `attribute`.
    pub fn allows(&self, attribute: &str, value: &str) -> bool {
        self.options(attribute).iter().any(|option| option == value)
    }

    /// True when no attribute has options.
    pub fn is_empty(&self) -> bool {
        self.attributes.values().all(Vec::is_empty)
    }
}
