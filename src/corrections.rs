use indexmap::IndexMap;
use std::ops::Range;
use tracing::{debug, info, warn};

use crate::data::Record;
use crate::feedback::{FeedbackStore, Judgment};
use crate::store::RecordStore;
use crate::types::{AttributeName, AttributeValue, RecordId, SampleIndex};

/// One reviewer-approved field change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldUpdate {
    /// Sample index the feedback was recorded against.
    pub index: SampleIndex,
    /// Target record.
    pub record_id: RecordId,
    /// Serial display number of the target record.
    pub serial: u64,
    /// Corrected attribute.
    pub attribute: AttributeName,
    /// Value in the session snapshot (absent when the record had none).
    pub previous: Option<AttributeValue>,
    /// Replacement to persist.
    pub value: AttributeValue,
}

/// Field updates derived from feedback, in sample order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CorrectionSet {
    updates: Vec<FieldUpdate>,
}

impl CorrectionSet {
    /// All field updates.
    pub fn updates(&self) -> &[FieldUpdate] {
        &self.updates
    }

    /// Number of field updates.
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// True when nothing needs persisting.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Updates grouped per record (first-seen order), one field map each.
    pub fn by_record(&self) -> IndexMap<RecordId, RecordFields> {
        let mut grouped: IndexMap<RecordId, RecordFields> = IndexMap::new();
        for update in &self.updates {
            grouped
                .entry(update.record_id.clone())
                .or_insert_with(|| RecordFields {
                    serial: update.serial,
                    fields: IndexMap::new(),
                })
                .fields
                .insert(update.attribute.clone(), update.value.clone());
        }
        grouped
    }
}

/// Combined field map for one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFields {
    /// Serial display number.
    pub serial: u64,
    /// Attribute to replacement value.
    pub fields: IndexMap<AttributeName, AttributeValue>,
}

/// Build the correction set for sample indices inside `range`.
///
/// A key contributes only when its judgment is `Wrong`, it has a replacement,
/// and the replacement differs from the record's value in the sample.
pub fn compute_corrections(
    sample: &[Record],
    feedback: &FeedbackStore,
    range: Range<SampleIndex>,
) -> CorrectionSet {
    let mut updates = Vec::new();
    for (index, attribute, entry) in feedback.all() {
        if !range.contains(&index) || entry.judgment() != Judgment::Wrong {
            continue;
        }
        let Some(record) = sample.get(index) else {
            continue;
        };
        let Some(replacement) = entry.replacement() else {
            continue;
        };
        let previous = record.value(attribute);
        if previous == Some(replacement) {
            continue;
        }
        updates.push(FieldUpdate {
            index,
            record_id: record.id.clone(),
            serial: record.serial,
            attribute: attribute.to_string(),
            previous: previous.map(str::to_string),
            value: replacement.to_string(),
        });
    }
    CorrectionSet { updates }
}

/// A record whose fields were modified by an apply pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedUpdate {
    /// Modified record.
    pub record_id: RecordId,
    /// Serial display number.
    pub serial: u64,
    /// Fields written in the combined update.
    pub fields: Vec<AttributeName>,
}

/// Outcome of an apply pass; the pass itself never fails as a whole.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Records the store reported as modified.
    pub modified: Vec<AppliedUpdate>,
    /// Records that already held every corrected value.
    pub unchanged: usize,
    /// Records that no longer exist in the store.
    pub missing: Vec<RecordId>,
    /// Records whose lookup or update failed, with the failure text.
    pub failed: Vec<(RecordId, String)>,
}

impl ApplyReport {
    /// Number of records actually modified.
    pub fn applied_count(&self) -> usize {
        self.modified.len()
    }
}

/// Persist `corrections`, one combined update per record.
///
/// Each record is re-read first and only fields whose persisted value still
/// differs are written; the modified count comes from the store.
pub fn apply_corrections(store: &dyn RecordStore, corrections: &CorrectionSet) -> ApplyReport {
    let mut report = ApplyReport::default();
    for (record_id, RecordFields { serial, fields }) in corrections.by_record() {
        let current = match store.find_one(&record_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(
                    "[review:apply] record '{}' (serial {}) no longer exists; skipped",
                    record_id, serial
                );
                report.missing.push(record_id);
                continue;
            }
            Err(err) => {
                warn!("[review:apply] lookup failed for '{}': {}", record_id, err);
                report.failed.push((record_id, err.to_string()));
                continue;
            }
        };

        let pending: IndexMap<AttributeName, AttributeValue> = fields
            .into_iter()
            .filter(|(name, value)| current.value(name) != Some(value.as_str()))
            .collect();
        if pending.is_empty() {
            debug!("[review:apply] record '{}' already up to date", record_id);
            report.unchanged += 1;
            continue;
        }

        match store.update_fields(&record_id, &pending) {
            Ok(modified) if modified > 0 => {
                let fields: Vec<AttributeName> = pending.keys().cloned().collect();
                info!(
                    "[review:apply] updated serial {} fields={:?}",
                    serial, fields
                );
                report.modified.push(AppliedUpdate {
                    record_id,
                    serial,
                    fields,
                });
            }
            Ok(_) => report.unchanged += 1,
            Err(err) => {
                warn!("[review:apply] update failed for '{}': {}", record_id, err);
                report.failed.push((record_id, err.to_string()));
            }
        }
    }
    info!(
        "[review:apply] total updated documents: {} (unchanged={}, missing={}, failed={})",
        report.applied_count(),
        report.unchanged,
        report.missing.len(),
        report.failed.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ReviewError;
    use crate::store::{InMemoryRecordStore, RecordFilter};

    fn sample() -> Vec<Record> {
        vec![
            Record::new("r0", 10, "")
                .with_attribute("Silhouette", "Curved")
                .with_attribute("Pattern", "Solid"),
            Record::new("r1", 11, "").with_attribute("Silhouette", "Straight"),
            Record::new("r2", 12, "").with_attribute("Silhouette", "Lawson"),
        ]
    }

    fn wrong(feedback: &mut FeedbackStore, index: usize, attribute: &str, value: &str) {
        feedback.set_judgment(index, attribute, Judgment::Wrong);
        feedback.set_replacement(index, attribute, value);
    }

    #[test]
    fn only_wrong_with_differing_replacement_is_emitted() {
        let sample = sample();
        let mut feedback = FeedbackStore::new();
        wrong(&mut feedback, 0, "Silhouette", "Tuxedo");
        wrong(&mut feedback, 0, "Pattern", "Solid");
        feedback.set_judgment(1, "Silhouette", Judgment::Wrong);
        feedback.set_judgment(2, "Silhouette", Judgment::Correct);

        let set = compute_corrections(&sample, &feedback, 0..sample.len());
        assert_eq!(set.len(), 1);
        let update = &set.updates()[0];
        assert_eq!(update.record_id, "r0");
        assert_eq!(update.previous.as_deref(), Some("Curved"));
        assert_eq!(update.value, "Tuxedo");
    }

    #[test]
    fn range_scopes_corrections_to_a_page() {
        let sample = sample();
        let mut feedback = FeedbackStore::new();
        wrong(&mut feedback, 0, "Silhouette", "Tuxedo");
        wrong(&mut feedback, 2, "Silhouette", "Tuxedo");

        let page = compute_corrections(&sample, &feedback, 2..3);
        assert_eq!(page.len(), 1);
        assert_eq!(page.updates()[0].record_id, "r2");
    }

    #[test]
    fn fields_for_one_record_are_combined() {
        let sample = sample();
        let mut feedback = FeedbackStore::new();
        wrong(&mut feedback, 0, "Silhouette", "Tuxedo");
        wrong(&mut feedback, 0, "Pattern", "Floral");
        wrong(&mut feedback, 0, "Sheen", "Matte");

        let set = compute_corrections(&sample, &feedback, 0..3);
        let grouped = set.by_record();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped["r0"].fields.len(), 3);

        let store = InMemoryRecordStore::new(sample);
        let report = apply_corrections(&store, &set);
        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.modified[0].fields.len(), 3);
        let stored = store.get("r0").unwrap();
        assert_eq!(stored.value("Sheen"), Some("Matte"));
        assert_eq!(stored.value("Pattern"), Some("Floral"));
    }

    #[test]
    fn reapplying_the_same_set_modifies_nothing() {
        let sample = sample();
        let mut feedback = FeedbackStore::new();
        wrong(&mut feedback, 0, "Silhouette", "Tuxedo");
        wrong(&mut feedback, 1, "Silhouette", "Curved");
        let set = compute_corrections(&sample, &feedback, 0..3);

        let store = InMemoryRecordStore::new(sample);
        assert_eq!(apply_corrections(&store, &set).applied_count(), 2);
        let second = apply_corrections(&store, &set);
        assert_eq!(second.applied_count(), 0);
        assert_eq!(second.unchanged, 2);
    }

    #[test]
    fn deleted_records_are_skipped_without_aborting() {
        let sample = sample();
        let mut feedback = FeedbackStore::new();
        wrong(&mut feedback, 0, "Silhouette", "Tuxedo");
        wrong(&mut feedback, 1, "Silhouette", "Curved");
        let set = compute_corrections(&sample, &feedback, 0..3);

        let store = InMemoryRecordStore::new(sample);
        store.remove("r0").unwrap();
        let report = apply_corrections(&store, &set);
        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.missing, vec!["r0".to_string()]);
    }

    struct FailingStore {
        inner: InMemoryRecordStore,
        broken: RecordId,
    }

    impl RecordStore for FailingStore {
        fn find(&self, filter: &RecordFilter) -> Result<Vec<Record>, ReviewError> {
            self.inner.find(filter)
        }

        fn find_one(&self, id: &RecordId) -> Result<Option<Record>, ReviewError> {
            self.inner.find_one(id)
        }

        fn update_fields(
            &self,
            id: &RecordId,
            fields: &IndexMap<AttributeName, AttributeValue>,
        ) -> Result<u64, ReviewError> {
            if *id == self.broken {
                return Err(ReviewError::Store("connection reset".into()));
            }
            self.inner.update_fields(id, fields)
        }
    }

    #[test]
    fn single_update_failure_is_counted_separately() {
        let sample = sample();
        let mut feedback = FeedbackStore::new();
        wrong(&mut feedback, 0, "Silhouette", "Tuxedo");
        wrong(&mut feedback, 2, "Silhouette", "Curved");
        let set = compute_corrections(&sample, &feedback, 0..3);

        let store = FailingStore {
            inner: InMemoryRecordStore::new(sample),
            broken: "r0".into(),
        };
        let report = apply_corrections(&store, &set);
        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.modified[0].record_id, "r2");
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("connection reset"));
    }
}
