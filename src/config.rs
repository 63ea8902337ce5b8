use serde::{Deserialize, Serialize};

use crate::constants::session::{
    DEFAULT_CATEGORY, DEFAULT_PAGE_SIZE, DEFAULT_SAMPLE_FRACTION, DEFAULT_SEED,
};
use crate::errors::ReviewError;
use crate::types::{BatchId, CategoryId};

/// Scoring policy for a `Wrong` judgment that has no replacement chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnscoredWrongPolicy {
    /// Score the pair as a guaranteed mismatch (lowers accuracy, adds no label).
    #[default]
    CountAsMismatch,
    /// Leave the pair out of the metric entirely.
    Exclude,
}

/// Top-level review session configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Record category; selects the taxonomy and tags the batch summary.
    pub category: CategoryId,
    /// RNG seed that controls the deterministic sample and its order.
    pub seed: u64,
    /// Fraction of the record set to sample, clamped into `(0, 1]`.
    pub sample_fraction: f64,
    /// Records per page.
    pub page_size: usize,
    /// How `Wrong` judgments without a replacement are scored.
    pub unscored_wrong: UnscoredWrongPolicy,
    /// Apply whole-sample corrections before computing metrics on finish.
    pub apply_on_finish: bool,
    /// Explicit batch id; derived from the sample when `None`.
    pub batch_id: Option<BatchId>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            seed: DEFAULT_SEED,
            sample_fraction: DEFAULT_SAMPLE_FRACTION,
            page_size: DEFAULT_PAGE_SIZE,
            unscored_wrong: UnscoredWrongPolicy::default(),
            apply_on_finish: true,
            batch_id: None,
        }
    }
}

impl ReviewConfig {
    /// Reject configurations the session cannot run with.
    pub fn validated(self) -> Result<Self, ReviewError> {
        if self.page_size == 0 {
            return Err(ReviewError::Configuration(
                "page size must be greater than zero".to_string(),
            ));
        }
        if !self.sample_fraction.is_finite() {
            return Err(ReviewError::Configuration(
                "sample fraction must be a finite number".to_string(),
            ));
        }
        if let Some(batch_id) = &self.batch_id
            && batch_id.trim().is_empty()
        {
            return Err(ReviewError::Configuration(
                "batch id must not be blank".to_string(),
            ));
        }
        Ok(self)
    }
}
