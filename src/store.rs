//! Collaborator interfaces the review core depends on, plus in-memory backends.
//!
//! Every trait call is synchronous with no retry inside the core; failures
//! surface to the caller as `ReviewError::Store`.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

use crate::data::{Record, Taxonomy};
use crate::errors::ReviewError;
use crate::metrics::{BatchEvaluation, EvaluationRow};
use crate::types::{AttributeName, AttributeValue, CategoryId, RecordId};

/// Query used to load the candidate record set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RecordFilter {
    /// Every record in the collection.
    #[default]
    All,
    /// Only the listed ids (missing ids are skipped).
    Ids(Vec<RecordId>),
}

/// External document store holding the labeled records.
pub trait RecordStore: Send + Sync {
    /// Records matching `filter`.
    fn find(&self, filter: &RecordFilter) -> Result<Vec<Record>, ReviewError>;
    /// Current persisted record, or `None` if it no longer exists.
    fn find_one(&self, id: &RecordId) -> Result<Option<Record>, ReviewError>;
    /// Set every field in `fields` on one record in a single operation.
    ///
    /// Returns the number of records actually modified (0 or 1); a write
    /// whose values are already stored reports 0.
    fn update_fields(
        &self,
        id: &RecordId,
        fields: &IndexMap<AttributeName, AttributeValue>,
    ) -> Result<u64, ReviewError>;
}

/// Source of per-category taxonomies.
pub trait TaxonomyStore: Send + Sync {
    /// Taxonomy for `category`; empty when none is registered.
    fn taxonomy(&self, category: &CategoryId) -> Result<Taxonomy, ReviewError>;
}

/// Sink for completed-session evaluation output. Inserts are not deduplicated.
pub trait EvaluationStore: Send + Sync {
    /// Insert one row per sampled record.
    fn insert_evaluation_rows(&self, rows: &[EvaluationRow]) -> Result<(), ReviewError>;
    /// Insert the batch summary.
    fn insert_batch_summary(&self, summary: &BatchEvaluation) -> Result<(), ReviewError>;
}

/// Image retrieval collaborator.
pub trait ImageSource: Send + Sync {
    /// Raw image bytes for `url`.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ReviewError>;
}

/// Fetch an image, degrading any failure to `None` ("no image").
pub fn load_image_or_placeholder(source: &dyn ImageSource, url: &str) -> Option<Vec<u8>> {
    if url.trim().is_empty() {
        return None;
    }
    match source.fetch(url) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => {
            warn!("[review:image] empty image payload for {}", url);
            None
        }
        Err(err) => {
            warn!("[review:image] image unavailable for {}: {}", url, err);
            None
        }
    }
}

/// In-memory record store keyed by record id (insertion order preserved).
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<IndexMap<RecordId, Record>>,
}

impl InMemoryRecordStore {
    /// Build a store from `records`; later duplicates replace earlier ones.
    pub fn new(records: Vec<Record>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Current copy of one record.
    pub fn get(&self, id: &str) -> Option<Record> {
        self.records.read().ok()?.get(id).cloned()
    }

    /// Delete a record (simulates a concurrent removal).
    pub fn remove(&self, id: &str) -> Result<Option<Record>, ReviewError> {
        Ok(self
            .records
            .write()
            .map_err(|_| ReviewError::Store("record store lock poisoned".into()))?
            .shift_remove(id))
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// True when the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for InMemoryRecordStore {
    fn find(&self, filter: &RecordFilter) -> Result<Vec<Record>, ReviewError> {
        let guard = self
            .records
            .read()
            .map_err(|_| ReviewError::Store("record store lock poisoned".into()))?;
        Ok(match filter {
            RecordFilter::All => guard.values().cloned().collect(),
            RecordFilter::Ids(ids) => ids.iter().filter_map(|id| guard.get(id).cloned()).collect(),
        })
    }

    fn find_one(&self, id: &RecordId) -> Result<Option<Record>, ReviewError> {
        Ok(self
            .records
            .read()
            .map_err(|_| ReviewError::Store("record store lock poisoned".into()))?
            .get(id)
            .cloned())
    }

    fn update_fields(
        &self,
        id: &RecordId,
        fields: &IndexMap<AttributeName, AttributeValue>,
    ) -> Result<u64, ReviewError> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| ReviewError::Store("record store lock poisoned".into()))?;
        let Some(record) = guard.get_mut(id) else {
            return Ok(0);
        };
        let mut changed = false;
        for (name, value) in fields {
            if record.value(name) != Some(value.as_str()) {
                record.attributes.insert(name.clone(), value.clone());
                changed = true;
            }
        }
        Ok(u64::from(changed))
    }
}

/// In-memory taxonomy registry.
#[derive(Debug, Default)]
pub struct InMemoryTaxonomyStore {
    taxonomies: HashMap<CategoryId, Taxonomy>,
}

impl InMemoryTaxonomyStore {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_taxonomy(mut self, category: impl Into<CategoryId>, taxonomy: Taxonomy) -> Self {
        self.taxonomies.insert(category.into(), taxonomy);
        self
    }
}

impl TaxonomyStore for InMemoryTaxonomyStore {
    fn taxonomy(&self, category: &CategoryId) -> Result<Taxonomy, ReviewError> {
        match self.taxonomies.get(category) {
            Some(taxonomy) => Ok(taxonomy.clone()),
            None => {
                warn!("[review:taxonomy] no taxonomy found for category '{}'", category);
                Ok(Taxonomy::empty())
            }
        }
    }
}

/// In-memory evaluation sink that records every insert call.
#[derive(Debug, Default)]
pub struct InMemoryEvaluationStore {
    rows: RwLock<Vec<EvaluationRow>>,
    summaries: RwLock<Vec<BatchEvaluation>>,
}

impl InMemoryEvaluationStore {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every inserted row, in insert order.
    pub fn rows(&self) -> Vec<EvaluationRow> {
        self.rows.read().map(|guard| guard.clone()).unwrap_or_default()
    }

    /// Every inserted summary, in insert order.
    pub fn summaries(&self) -> Vec<BatchEvaluation> {
        self.summaries
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl EvaluationStore for InMemoryEvaluationStore {
    fn insert_evaluation_rows(&self, rows: &[EvaluationRow]) -> Result<(), ReviewError> {
        self.rows
            .write()
            .map_err(|_| ReviewError::Store("evaluation rows lock poisoned".into()))?
            .extend_from_slice(rows);
        Ok(())
    }

    fn insert_batch_summary(&self, summary: &BatchEvaluation) -> Result<(), ReviewError> {
        self.summaries
            .write()
            .map_err(|_| ReviewError::Store("batch summaries lock poisoned".into()))?
            .push(summary.clone());
        Ok(())
    }
}
