use chrono::{DateTime, SubsecRound, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::config::UnscoredWrongPolicy;
use crate::constants::metrics::{VERDICT_CORRECT, VERDICT_UNRESOLVED, VERDICT_WRONG};
use crate::data::Record;
use crate::errors::ReviewError;
use crate::feedback::{FeedbackStore, Judgment};
use crate::types::{AttributeName, BatchId, CategoryId, RecordId};

/// Agreement scores for one attribute.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeMetrics {
    /// Fraction of pairs whose prediction equals the true label.
    pub accuracy: f64,
    /// Macro-averaged precision over the true-label set.
    pub precision: f64,
    /// Macro-averaged recall over the true-label set.
    pub recall: f64,
    /// Number of comparison pairs scored.
    pub support: usize,
}

/// Metric result for one attribute; `NoData` when nothing eligible was judged.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttributeScore {
    /// No eligible comparison pairs.
    NoData,
    /// Scores over at least one pair.
    Scored(AttributeMetrics),
}

impl AttributeScore {
    /// Scores, if any.
    pub fn metrics(&self) -> Option<&AttributeMetrics> {
        match self {
            Self::NoData => None,
            Self::Scored(metrics) => Some(metrics),
        }
    }
}

impl fmt::Display for AttributeScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => write!(f, "no validated records yet"),
            Self::Scored(m) => write!(
                f,
                "accuracy {:.2}% | precision {:.2}% | recall {:.2}% (n={})",
                m.accuracy * 100.0,
                m.precision * 100.0,
                m.recall * 100.0,
                m.support
            ),
        }
    }
}

/// (true label, predicted label); `None` prediction never matches any label.
pub type LabelPair<'a> = (&'a str, Option<&'a str>);

/// Build comparison pairs for `attribute` from every judged sample index.
///
/// Indices with no judgment, or whose record has no value for the attribute,
/// are left out.
pub fn comparison_pairs<'a>(
    sample: &'a [Record],
    feedback: &'a FeedbackStore,
    attribute: &'a str,
    policy: UnscoredWrongPolicy,
) -> Vec<LabelPair<'a>> {
    feedback
        .for_attribute(attribute)
        .filter_map(|(index, entry)| {
            let truth = sample.get(index)?.value(attribute)?;
            match (entry.judgment(), entry.replacement()) {
                (Judgment::Correct, _) => Some((truth, Some(truth))),
                (Judgment::Wrong, Some(replacement)) => Some((truth, Some(replacement))),
                (Judgment::Wrong, None) => match policy {
                    UnscoredWrongPolicy::CountAsMismatch => Some((truth, None)),
                    UnscoredWrongPolicy::Exclude => None,
                },
            }
        })
        .collect()
}

/// Accuracy plus macro precision/recall; `None` for an empty pair set.
///
/// Labels are the distinct true labels. A label never predicted contributes
/// zero precision rather than NaN.
pub fn agreement_scores(pairs: &[LabelPair<'_>]) -> Option<AttributeMetrics> {
    if pairs.is_empty() {
        return None;
    }
    let matches = pairs
        .iter()
        .filter(|(truth, predicted)| *predicted == Some(*truth))
        .count();
    let labels: BTreeSet<&str> = pairs.iter().map(|(truth, _)| *truth).collect();

    let mut precision_sum = 0.0;
    let mut recall_sum = 0.0;
    for label in &labels {
        let mut true_positive = 0usize;
        let mut predicted = 0usize;
        let mut actual = 0usize;
        for (truth, prediction) in pairs {
            let is_true = truth == label;
            let is_predicted = *prediction == Some(*label);
            actual += usize::from(is_true);
            predicted += usize::from(is_predicted);
            true_positive += usize::from(is_true && is_predicted);
        }
        precision_sum += ratio(true_positive, predicted);
        recall_sum += ratio(true_positive, actual);
    }

    let label_count = labels.len() as f64;
    Some(AttributeMetrics {
        accuracy: ratio(matches, pairs.len()),
        precision: precision_sum / label_count,
        recall: recall_sum / label_count,
        support: pairs.len(),
    })
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Score one attribute over the feedback recorded so far.
pub fn compute_metrics(
    sample: &[Record],
    feedback: &FeedbackStore,
    attribute: &str,
    policy: UnscoredWrongPolicy,
) -> AttributeScore {
    let pairs = comparison_pairs(sample, feedback, attribute, policy);
    match agreement_scores(&pairs) {
        Some(metrics) => AttributeScore::Scored(metrics),
        None => AttributeScore::NoData,
    }
}

/// Aggregate evaluation persisted once per completed session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluation {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Record category.
    pub category: CategoryId,
    /// Number of sampled records.
    pub sample_size: usize,
    /// Per-attribute scores in attribute order.
    pub attribute_scores: IndexMap<AttributeName, AttributeScore>,
    /// Completion time, truncated to milliseconds.
    pub completed_at: DateTime<Utc>,
}

impl BatchEvaluation {
    /// Score for `attribute`; `NoData` for attributes outside the batch.
    pub fn score(&self, attribute: &str) -> AttributeScore {
        self.attribute_scores
            .get(attribute)
            .copied()
            .unwrap_or(AttributeScore::NoData)
    }
}

/// `AttributeMetrics` with a fixed-width support count.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct StoredMetrics {
    /// Accuracy.
    pub accuracy: f64,
    /// Macro precision.
    pub precision: f64,
    /// Macro recall.
    pub recall: f64,
    /// Pair count.
    pub support: u64,
}

/// Encodable form of a `BatchEvaluation`, shared by summary records and
/// session snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct StoredEvaluation {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Record category.
    pub category: CategoryId,
    /// Number of sampled records.
    pub sample_size: u64,
    /// Completion time as epoch milliseconds.
    pub completed_at_millis: i64,
    /// Per-attribute scores in attribute order; `None` is `NoData`.
    pub scores: Vec<(AttributeName, Option<StoredMetrics>)>,
}

impl From<&BatchEvaluation> for StoredEvaluation {
    fn from(evaluation: &BatchEvaluation) -> Self {
        Self {
            batch_id: evaluation.batch_id.clone(),
            category: evaluation.category.clone(),
            sample_size: evaluation.sample_size as u64,
            completed_at_millis: evaluation.completed_at.timestamp_millis(),
            scores: evaluation
                .attribute_scores
                .iter()
                .map(|(attribute, score)| {
                    let metrics = score.metrics().map(|m| StoredMetrics {
                        accuracy: m.accuracy,
                        precision: m.precision,
                        recall: m.recall,
                        support: m.support as u64,
                    });
                    (attribute.clone(), metrics)
                })
                .collect(),
        }
    }
}

impl TryFrom<StoredEvaluation> for BatchEvaluation {
    type Error = ReviewError;

    fn try_from(stored: StoredEvaluation) -> Result<Self, Self::Error> {
        let completed_at = DateTime::from_timestamp_millis(stored.completed_at_millis)
            .ok_or_else(|| {
                ReviewError::Persist(format!(
                    "evaluation timestamp {} out of range",
                    stored.completed_at_millis
                ))
            })?;
        let attribute_scores = stored
            .scores
            .into_iter()
            .map(|(attribute, metrics)| {
                let score = match metrics {
                    Some(m) => AttributeScore::Scored(AttributeMetrics {
                        accuracy: m.accuracy,
                        precision: m.precision,
                        recall: m.recall,
                        support: m.support as usize,
                    }),
                    None => AttributeScore::NoData,
                };
                (attribute, score)
            })
            .collect();
        Ok(Self {
            batch_id: stored.batch_id,
            category: stored.category,
            sample_size: stored.sample_size as usize,
            attribute_scores,
            completed_at,
        })
    }
}

/// Score every attribute and package the results for one persistence call.
pub fn compute_batch(
    sample: &[Record],
    feedback: &FeedbackStore,
    attributes: &[AttributeName],
    batch_id: &str,
    category: &str,
    policy: UnscoredWrongPolicy,
) -> BatchEvaluation {
    let attribute_scores = attributes
        .iter()
        .map(|attribute| {
            (
                attribute.clone(),
                compute_metrics(sample, feedback, attribute, policy),
            )
        })
        .collect();
    BatchEvaluation {
        batch_id: batch_id.to_string(),
        category: category.to_string(),
        sample_size: sample.len(),
        attribute_scores,
        completed_at: Utc::now().trunc_subsecs(3),
    }
}

/// Per-attribute verdict stored on an evaluation row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowVerdict {
    /// Accepted.
    Correct,
    /// Flagged with a replacement.
    Wrong,
    /// Flagged without a replacement.
    Unresolved,
}

impl RowVerdict {
    /// Stable text label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => VERDICT_CORRECT,
            Self::Wrong => VERDICT_WRONG,
            Self::Unresolved => VERDICT_UNRESOLVED,
        }
    }

    /// Parse a stable text label.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            VERDICT_CORRECT => Some(Self::Correct),
            VERDICT_WRONG => Some(Self::Wrong),
            VERDICT_UNRESOLVED => Some(Self::Unresolved),
            _ => None,
        }
    }
}

/// Raw per-record evaluation output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRow {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Evaluated record.
    pub record_id: RecordId,
    /// Serial display number.
    pub serial: u64,
    /// Verdict per judged attribute (unjudged attributes omitted).
    pub verdicts: IndexMap<AttributeName, RowVerdict>,
}

/// One row per sampled record, in sample order.
pub fn evaluation_rows(
    sample: &[Record],
    feedback: &FeedbackStore,
    attributes: &[AttributeName],
    batch_id: &str,
) -> Vec<EvaluationRow> {
    sample
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let verdicts = attributes
                .iter()
                .filter_map(|attribute| {
                    let entry = feedback.judged(index, attribute)?;
                    let verdict = match entry.judgment() {
                        Judgment::Correct => RowVerdict::Correct,
                        Judgment::Wrong if entry.is_unresolved() => RowVerdict::Unresolved,
                        Judgment::Wrong => RowVerdict::Wrong,
                    };
                    Some((attribute.clone(), verdict))
                })
                .collect();
            EvaluationRow {
                batch_id: batch_id.to_string(),
                record_id: record.id.clone(),
                serial: record.serial,
                verdicts,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATTR: &str = "Silhouette";

    fn sample(values: &[&str]) -> Vec<Record> {
        values
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                Record::new(format!("r{idx}"), idx as u64, "").with_attribute(ATTR, *value)
            })
            .collect()
    }

    fn judge(feedback: &mut FeedbackStore, index: usize, replacement: Option<&str>) {
        match replacement {
            None => feedback.set_judgment(index, ATTR, Judgment::Correct),
            Some(value) => {
                feedback.set_judgment(index, ATTR, Judgment::Wrong);
                feedback.set_replacement(index, ATTR, value);
            }
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn mixed_judgments_score_one_third_accuracy() {
        let sample = sample(&["A", "B", "A"]);
        let mut feedback = FeedbackStore::new();
        judge(&mut feedback, 0, None);
        judge(&mut feedback, 1, Some("A"));
        judge(&mut feedback, 2, Some("B"));

        let pairs = comparison_pairs(&sample, &feedback, ATTR, UnscoredWrongPolicy::default());
        assert_eq!(
            pairs,
            vec![("A", Some("A")), ("B", Some("A")), ("A", Some("B"))]
        );

        let score = compute_metrics(&sample, &feedback, ATTR, UnscoredWrongPolicy::default());
        let metrics = score.metrics().copied().unwrap();
        assert!(close(metrics.accuracy, 1.0 / 3.0));
        // A: precision 1/2, recall 1/2; B: never correctly predicted.
        assert!(close(metrics.precision, 0.25));
        assert!(close(metrics.recall, 0.25));
        assert_eq!(metrics.support, 3);
    }

    #[test]
    fn no_judgments_report_no_data() {
        let sample = sample(&["A", "B"]);
        let feedback = FeedbackStore::new();
        let score = compute_metrics(&sample, &feedback, ATTR, UnscoredWrongPolicy::default());
        assert_eq!(score, AttributeScore::NoData);
        assert!(score.metrics().is_none());
        assert_eq!(score.to_string(), "no validated records yet");
    }

    #[test]
    fn unresolved_wrong_follows_policy() {
        let sample = sample(&["A", "A"]);
        let mut feedback = FeedbackStore::new();
        judge(&mut feedback, 0, None);
        feedback.set_judgment(1, ATTR, Judgment::Wrong);

        let counted = compute_metrics(
            &sample,
            &feedback,
            ATTR,
            UnscoredWrongPolicy::CountAsMismatch,
        );
        let counted = counted.metrics().copied().unwrap();
        assert!(close(counted.accuracy, 0.5));
        assert!(close(counted.precision, 1.0));
        assert!(close(counted.recall, 0.5));

        let excluded = compute_metrics(&sample, &feedback, ATTR, UnscoredWrongPolicy::Exclude);
        let excluded = excluded.metrics().copied().unwrap();
        assert!(close(excluded.accuracy, 1.0));
        assert_eq!(excluded.support, 1);

        let mut only_unresolved = FeedbackStore::new();
        only_unresolved.set_judgment(0, ATTR, Judgment::Wrong);
        assert_eq!(
            compute_metrics(&sample, &only_unresolved, ATTR, UnscoredWrongPolicy::Exclude),
            AttributeScore::NoData
        );
    }

    #[test]
    fn records_without_a_value_are_not_scored() {
        let sample = vec![Record::new("r0", 0, ""), Record::new("r1", 1, "").with_attribute(ATTR, "A")];
        let mut feedback = FeedbackStore::new();
        judge(&mut feedback, 0, None);
        let score = compute_metrics(&sample, &feedback, ATTR, UnscoredWrongPolicy::default());
        assert_eq!(score, AttributeScore::NoData);

        judge(&mut feedback, 1, None);
        let score = compute_metrics(&sample, &feedback, ATTR, UnscoredWrongPolicy::default());
        assert_eq!(score.metrics().map(|m| m.support), Some(1));
    }

    #[test]
    fn predicted_label_outside_truth_set_adds_no_class() {
        let pairs = vec![("A", Some("Z")), ("A", Some("A"))];
        let metrics = agreement_scores(&pairs).unwrap();
        assert!(close(metrics.accuracy, 0.5));
        assert!(close(metrics.precision, 1.0));
        assert!(close(metrics.recall, 0.5));
        assert!(agreement_scores(&[]).is_none());
    }

    #[test]
    fn batch_packages_every_attribute_and_rows_capture_verdicts() {
        let sample = vec![
            Record::new("r0", 5, "")
                .with_attribute(ATTR, "A")
                .with_attribute("Pattern", "Solid"),
            Record::new("r1", 6, "").with_attribute(ATTR, "B"),
        ];
        let attributes = vec![ATTR.to_string(), "Pattern".to_string()];
        let mut feedback = FeedbackStore::new();
        judge(&mut feedback, 0, None);
        judge(&mut feedback, 1, Some("A"));
        feedback.set_judgment(0, "Pattern", Judgment::Wrong);

        let batch = compute_batch(
            &sample,
            &feedback,
            &attributes,
            "b1",
            "sofa",
            UnscoredWrongPolicy::Exclude,
        );
        assert_eq!(batch.batch_id, "b1");
        assert_eq!(batch.sample_size, 2);
        assert!(close(batch.score(ATTR).metrics().unwrap().accuracy, 0.5));
        assert_eq!(batch.score("Pattern"), AttributeScore::NoData);
        assert_eq!(batch.score("Sheen"), AttributeScore::NoData);

        let rows = evaluation_rows(&sample, &feedback, &attributes, "b1");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].verdicts[ATTR], RowVerdict::Correct);
        assert_eq!(rows[0].verdicts["Pattern"], RowVerdict::Unresolved);
        assert_eq!(rows[1].verdicts[ATTR], RowVerdict::Wrong);
        assert!(!rows[1].verdicts.contains_key("Pattern"));
        assert_eq!(rows[1].serial, 6);
    }

    #[test]
    fn stored_evaluation_restores_the_same_batch() {
        let sample = sample(&["A", "B", "B"]);
        let mut feedback = FeedbackStore::new();
        judge(&mut feedback, 0, None);
        judge(&mut feedback, 1, Some("A"));
        let attributes = vec![ATTR.to_string(), "Pattern".to_string()];
        let batch = compute_batch(
            &sample,
            &feedback,
            &attributes,
            "b1",
            "sofa",
            UnscoredWrongPolicy::CountAsMismatch,
        );
        assert_eq!(batch.completed_at.timestamp_subsec_nanos() % 1_000_000, 0);

        let stored = StoredEvaluation::from(&batch);
        assert_eq!(stored.scores[1], ("Pattern".to_string(), None));
        assert_eq!(BatchEvaluation::try_from(stored).unwrap(), batch);

        let mut out_of_range = StoredEvaluation::from(&batch);
        out_of_range.completed_at_millis = i64::MAX;
        let err = BatchEvaluation::try_from(out_of_range).unwrap_err();
        assert!(matches!(err, ReviewError::Persist(msg) if msg.contains("out of range")));
    }

    #[test]
    fn verdict_labels_parse_back() {
        for verdict in [RowVerdict::Correct, RowVerdict::Wrong, RowVerdict::Unresolved] {
            assert_eq!(RowVerdict::parse(verdict.as_str()), Some(verdict));
        }
        assert_eq!(RowVerdict::parse("maybe"), None);
    }

    #[test]
    fn score_serialises_with_status_tag() {
        let json = serde_json::to_value(AttributeScore::NoData).unwrap();
        assert_eq!(json["status"], "no_data");
        let scored = AttributeScore::Scored(AttributeMetrics {
            accuracy: 1.0,
            precision: 1.0,
            recall: 1.0,
            support: 2,
        });
        let json = serde_json::to_value(scored).unwrap();
        assert_eq!(json["status"], "scored");
        assert_eq!(json["support"], 2);
    }
}
