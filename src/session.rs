//! Review session state and command dispatch.
//!
//! A `ReviewSession` owns everything the reviewer mutates: feedback, the
//! current page, and the completion state. The sample and taxonomy are
//! loaded once at start and never change afterwards; store mutations made
//! elsewhere are only observed by a new session.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReviewConfig;
use crate::constants::session::BATCH_ID_HEX_LEN;
use crate::corrections::{ApplyReport, apply_corrections, compute_corrections};
use crate::data::{Record, Taxonomy};
use crate::errors::ReviewError;
use crate::feedback::{
    FeedbackEntry, FeedbackStore, InvalidStateWarning, Judgment, ReplacementWrite, WarningReason,
};
use crate::hash::{stable_hash_seq, stable_hash_str};
use crate::metrics::{
    AttributeScore, BatchEvaluation, StoredEvaluation, compute_batch, compute_metrics,
    evaluation_rows,
};
use crate::pager::{PageWindow, window};
use crate::sampler::sample_records;
use crate::store::{EvaluationStore, RecordFilter, RecordStore, TaxonomyStore};
use crate::types::{AttributeName, AttributeValue, BatchId, CategoryId, RecordId, SampleIndex};

/// Completion lifecycle; persistence happens on the transitions, once each.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
pub enum CompletionState {
    /// Feedback may change.
    #[default]
    Open,
    /// Evaluation rows are stored; the summary is still pending.
    RowsPersisted,
    /// Rows and summary are stored.
    Completed,
}

/// Collaborators used by store-touching commands.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    /// Record store receiving corrections.
    pub records: &'a dyn RecordStore,
    /// Sink for evaluation rows and the batch summary.
    pub evaluations: &'a dyn EvaluationStore,
}

/// Discrete reviewer actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReviewCommand {
    /// Move forward one page (no-op on the last page).
    NextPage,
    /// Move back one page (no-op on the first page).
    PreviousPage,
    /// Jump to a page (clamped).
    GoToPage(usize),
    /// Record a judgment.
    SetJudgment {
        /// Sample index.
        index: SampleIndex,
        /// Attribute name.
        attribute: AttributeName,
        /// Verdict.
        judgment: Judgment,
    },
    /// Choose a replacement for a `Wrong` key (blank clears it).
    SetReplacement {
        /// Sample index.
        index: SampleIndex,
        /// Attribute name.
        attribute: AttributeName,
        /// Replacement value.
        value: AttributeValue,
    },
    /// Mark every unjudged valued attribute on the current page `Correct`.
    AcceptPage,
    /// Apply corrections for the current page.
    SavePage,
    /// Complete the session and persist its evaluation once.
    Finish,
}

/// What a command did.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    /// Page after navigation.
    Navigated(PageWindow),
    /// Judgment stored.
    JudgmentRecorded,
    /// Replacement write result.
    Replacement(ReplacementWrite),
    /// Number of keys marked `Correct`.
    PageAccepted {
        /// Keys newly judged.
        marked: usize,
    },
    /// Apply report for the page.
    Saved(ApplyReport),
    /// Finish report.
    Finished(Box<FinishReport>),
}

/// Result of a finish action.
#[derive(Clone, Debug, PartialEq)]
pub struct FinishReport {
    /// Batch evaluation for the session.
    pub evaluation: BatchEvaluation,
    /// Whole-sample apply performed before scoring, if any.
    pub applied: Option<ApplyReport>,
    /// False when the session had already completed and nothing was inserted.
    pub newly_completed: bool,
}

/// One attribute of one record as shown to the reviewer.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeView<'a> {
    /// Attribute name.
    pub attribute: &'a str,
    /// Value in the sample snapshot.
    pub value: Option<&'a str>,
    /// Feedback (default when unjudged).
    pub feedback: FeedbackEntry,
    /// Whether a judgment was recorded.
    pub judged: bool,
    /// Valid replacement options.
    pub options: &'a [AttributeValue],
}

/// One record on the current page.
#[derive(Clone, Debug, PartialEq)]
pub struct PageItem<'a> {
    /// Sample index.
    pub index: SampleIndex,
    /// Record snapshot.
    pub record: &'a Record,
    /// Per-attribute view in session attribute order.
    pub attributes: Vec<AttributeView<'a>>,
}

/// Current page with its records and feedback.
#[derive(Clone, Debug, PartialEq)]
pub struct PageView<'a> {
    /// Resolved page.
    pub window: PageWindow,
    /// Sample size.
    pub sample_len: usize,
    /// Records on the page.
    pub items: Vec<PageItem<'a>>,
}

impl PageView<'_> {
    /// Human-readable position line.
    pub fn summary(&self) -> String {
        if self.window.is_empty() {
            return format!("No items (Page 1/{})", self.window.total_pages);
        }
        format!(
            "Displaying items {}-{} of {} (Page {}/{})",
            self.window.range.start + 1,
            self.window.range.end,
            self.sample_len,
            self.window.page_index + 1,
            self.window.total_pages
        )
    }
}

/// One feedback entry inside a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct SnapshotEntry {
    /// Sample index.
    pub index: u64,
    /// Attribute.
    pub attribute: AttributeName,
    /// Judgment.
    pub judgment: Judgment,
    /// Replacement (only meaningful for `Wrong`).
    pub replacement: Option<AttributeValue>,
}

/// One sampled record as it was when the session started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct SnapshotRecord {
    /// Store identifier.
    pub id: RecordId,
    /// Serial display number.
    pub serial: u64,
    /// Image reference.
    pub image_url: String,
    /// Original attribute values in field order.
    pub attributes: Vec<(AttributeName, AttributeValue)>,
}

impl From<&Record> for SnapshotRecord {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            serial: record.serial,
            image_url: record.image_url.clone(),
            attributes: record
                .attributes
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }
}

impl From<&SnapshotRecord> for Record {
    fn from(saved: &SnapshotRecord) -> Self {
        Self {
            id: saved.id.clone(),
            serial: saved.serial,
            image_url: saved.image_url.clone(),
            attributes: saved.attributes.iter().cloned().collect(),
        }
    }
}

/// Saved session state.
///
/// The sample is stored with its original values, so corrections written to
/// the record store never leak into the labels a resumed session scores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct SessionSnapshot {
    /// Record category.
    pub category: CategoryId,
    /// Sampler seed.
    pub seed: u64,
    /// Sample fraction.
    pub sample_fraction: f64,
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Sampled records in sample order, as originally drawn.
    pub sample: Vec<SnapshotRecord>,
    /// Current page.
    pub page_index: u64,
    /// Completion state.
    pub completion: CompletionState,
    /// Recorded feedback.
    pub entries: Vec<SnapshotEntry>,
    /// Evaluation fixed when the rows were stored; `None` while open.
    pub evaluation: Option<StoredEvaluation>,
}

/// Explicit review-session state.
#[derive(Debug)]
pub struct ReviewSession {
    config: ReviewConfig,
    batch_id: BatchId,
    sample: Vec<Record>,
    attributes: Vec<AttributeName>,
    taxonomy: Taxonomy,
    feedback: FeedbackStore,
    page_index: usize,
    completion: CompletionState,
    evaluation: Option<BatchEvaluation>,
}

impl ReviewSession {
    /// Load the record set, draw the sample, and fetch the taxonomy.
    pub fn start(
        config: ReviewConfig,
        records: &dyn RecordStore,
        taxonomies: &dyn TaxonomyStore,
    ) -> Result<Self, ReviewError> {
        let config = config.validated()?;
        let population = records.find(&RecordFilter::All)?;
        let sample = sample_records(&population, config.sample_fraction, config.seed)?;
        let taxonomy = taxonomies.taxonomy(&config.category)?;
        let attributes = discover_attributes(&sample);
        let batch_id = match &config.batch_id {
            Some(batch_id) => batch_id.clone(),
            None => derive_batch_id(&config, &sample),
        };
        for attribute in &attributes {
            if taxonomy.options(attribute).is_empty() {
                warn!(
                    "[review:session] attribute '{}' has no taxonomy options; only 'wrong' without replacement is possible",
                    attribute
                );
            }
        }
        info!(
            "[review:session] started batch {} (category={}, population={}, sample={}, attributes={})",
            batch_id,
            config.category,
            population.len(),
            sample.len(),
            attributes.len()
        );
        Ok(Self {
            config,
            batch_id,
            sample,
            attributes,
            taxonomy,
            feedback: FeedbackStore::new(),
            page_index: 0,
            completion: CompletionState::Open,
            evaluation: None,
        })
    }

    /// Rebuild a saved session.
    ///
    /// The sample is re-drawn only to check membership; scoring uses the
    /// saved original values. Fails if the re-drawn ids differ.
    pub fn resume(
        config: ReviewConfig,
        records: &dyn RecordStore,
        taxonomies: &dyn TaxonomyStore,
        snapshot: &SessionSnapshot,
    ) -> Result<Self, ReviewError> {
        if config.seed != snapshot.seed
            || config.category != snapshot.category
            || (config.sample_fraction - snapshot.sample_fraction).abs() > f64::EPSILON
        {
            return Err(ReviewError::SessionMismatch {
                details: "seed, category, or sample fraction differs from the snapshot".into(),
            });
        }
        let config = ReviewConfig {
            batch_id: Some(snapshot.batch_id.clone()),
            ..config
        };
        let mut session = Self::start(config, records, taxonomies)?;
        if session.sample.len() != snapshot.sample.len()
            || session
                .sample
                .iter()
                .zip(&snapshot.sample)
                .any(|(drawn, saved)| drawn.id != saved.id)
        {
            return Err(ReviewError::SessionMismatch {
                details: format!(
                    "re-drawn sample of {} records does not match saved sample of {}",
                    session.sample.len(),
                    snapshot.sample.len()
                ),
            });
        }
        session.sample = snapshot.sample.iter().map(Record::from).collect();
        session.attributes = discover_attributes(&session.sample);

        for entry in &snapshot.entries {
            let index = entry.index as usize;
            session.check_key(index, &entry.attribute).map_err(|err| {
                ReviewError::SessionMismatch {
                    details: err.to_string(),
                }
            })?;
            let restored = match entry.judgment {
                Judgment::Correct => FeedbackEntry::correct(),
                Judgment::Wrong => FeedbackEntry::wrong(entry.replacement.clone()),
            };
            session.feedback.restore(index, &entry.attribute, restored);
        }
        session.evaluation = match (&snapshot.evaluation, snapshot.completion) {
            (Some(stored), _) => Some(BatchEvaluation::try_from(stored.clone())?),
            (None, CompletionState::Open) => None,
            (None, state) => {
                return Err(ReviewError::SessionMismatch {
                    details: format!("snapshot in state {state:?} carries no evaluation"),
                });
            }
        };
        session.page_index = session.window_for(snapshot.page_index as usize).page_index;
        session.completion = snapshot.completion;
        info!(
            "[review:session] resumed batch {} at page {} with {} feedback entries ({:?})",
            session.batch_id,
            session.page_index + 1,
            session.feedback.len(),
            session.completion
        );
        Ok(session)
    }

    /// Capture the session for later resume.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            category: self.config.category.clone(),
            seed: self.config.seed,
            sample_fraction: self.config.sample_fraction,
            batch_id: self.batch_id.clone(),
            sample: self.sample.iter().map(SnapshotRecord::from).collect(),
            page_index: self.page_index as u64,
            completion: self.completion,
            entries: self
                .feedback
                .all()
                .map(|(index, attribute, entry)| SnapshotEntry {
                    index: index as u64,
                    attribute: attribute.to_string(),
                    judgment: entry.judgment(),
                    replacement: entry.replacement().map(str::to_string),
                })
                .collect(),
            evaluation: self.evaluation.as_ref().map(StoredEvaluation::from),
        }
    }

    /// Dispatch one command.
    pub fn apply(
        &mut self,
        command: ReviewCommand,
        backends: Backends<'_>,
    ) -> Result<CommandOutcome, ReviewError> {
        debug!("[review:session] command {:?}", command);
        Ok(match command {
            ReviewCommand::NextPage => CommandOutcome::Navigated(self.next_page()),
            ReviewCommand::PreviousPage => CommandOutcome::Navigated(self.previous_page()),
            ReviewCommand::GoToPage(page) => CommandOutcome::Navigated(self.go_to_page(page)),
            ReviewCommand::SetJudgment {
                index,
                attribute,
                judgment,
            } => {
                self.set_judgment(index, &attribute, judgment)?;
                CommandOutcome::JudgmentRecorded
            }
            ReviewCommand::SetReplacement {
                index,
                attribute,
                value,
            } => CommandOutcome::Replacement(self.set_replacement(index, &attribute, &value)?),
            ReviewCommand::AcceptPage => CommandOutcome::PageAccepted {
                marked: self.accept_page()?,
            },
            ReviewCommand::SavePage => CommandOutcome::Saved(self.save_page(backends.records)),
            ReviewCommand::Finish => CommandOutcome::Finished(Box::new(self.finish(backends)?)),
        })
    }

    /// Advance one page, clamped.
    pub fn next_page(&mut self) -> PageWindow {
        let window = self.window_for(self.page_index.saturating_add(1));
        self.page_index = window.page_index;
        window
    }

    /// Go back one page, clamped.
    pub fn previous_page(&mut self) -> PageWindow {
        let window = self.window_for(self.page_index.saturating_sub(1));
        self.page_index = window.page_index;
        window
    }

    /// Jump to `page`, clamped.
    pub fn go_to_page(&mut self, page: usize) -> PageWindow {
        let window = self.window_for(page);
        self.page_index = window.page_index;
        window
    }

    /// Current page window.
    pub fn page_window(&self) -> PageWindow {
        self.window_for(self.page_index)
    }

    /// Current page with records, feedback, and options.
    pub fn current_page(&self) -> PageView<'_> {
        let window = self.page_window();
        let items = window
            .range
            .clone()
            .map(|index| {
                let record = &self.sample[index];
                let attributes = self
                    .attributes
                    .iter()
                    .map(|attribute| AttributeView {
                        attribute: attribute.as_str(),
                        value: record.value(attribute),
                        feedback: self.feedback.get(index, attribute),
                        judged: self.feedback.judged(index, attribute).is_some(),
                        options: self.taxonomy.options(attribute),
                    })
                    .collect();
                PageItem {
                    index,
                    record,
                    attributes,
                }
            })
            .collect();
        PageView {
            window,
            sample_len: self.sample.len(),
            items,
        }
    }

    /// Record a judgment for a key.
    pub fn set_judgment(
        &mut self,
        index: SampleIndex,
        attribute: &str,
        judgment: Judgment,
    ) -> Result<(), ReviewError> {
        self.ensure_open()?;
        self.check_key(index, attribute)?;
        self.feedback.set_judgment(index, attribute, judgment);
        Ok(())
    }

    /// Choose a replacement; rejected writes come back as `Ignored`.
    pub fn set_replacement(
        &mut self,
        index: SampleIndex,
        attribute: &str,
        value: &str,
    ) -> Result<ReplacementWrite, ReviewError> {
        self.ensure_open()?;
        self.check_key(index, attribute)?;
        if !value.is_empty() && !self.taxonomy.allows(attribute, value) {
            let warning = InvalidStateWarning {
                index,
                attribute: attribute.to_string(),
                attempted: value.to_string(),
                reason: WarningReason::NotInTaxonomy,
            };
            warn!("[review:session] {}", warning);
            return Ok(ReplacementWrite::Ignored(warning));
        }
        Ok(self.feedback.set_replacement(index, attribute, value))
    }

    /// Mark unjudged, valued attributes on the current page `Correct`.
    pub fn accept_page(&mut self) -> Result<usize, ReviewError> {
        self.ensure_open()?;
        let mut marked = 0;
        for index in self.page_window().range {
            let record = &self.sample[index];
            for attribute in &self.attributes {
                if record.value(attribute).is_none()
                    || self.feedback.judged(index, attribute).is_some()
                {
                    continue;
                }
                self.feedback.set_judgment(index, attribute, Judgment::Correct);
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// Apply corrections for the current page.
    pub fn save_page(&self, records: &dyn RecordStore) -> ApplyReport {
        let window = self.page_window();
        let corrections = compute_corrections(&self.sample, &self.feedback, window.range);
        info!(
            "[review:session] saving page {} ({} field updates)",
            window.page_index + 1,
            corrections.len()
        );
        apply_corrections(records, &corrections)
    }

    /// Apply corrections for the whole sample.
    pub fn save_all(&self, records: &dyn RecordStore) -> ApplyReport {
        let corrections = compute_corrections(&self.sample, &self.feedback, 0..self.sample.len());
        apply_corrections(records, &corrections)
    }

    /// Live score for one attribute over the feedback recorded so far.
    pub fn metrics(&self, attribute: &str) -> AttributeScore {
        compute_metrics(
            &self.sample,
            &self.feedback,
            attribute,
            self.config.unscored_wrong,
        )
    }

    /// Complete the session.
    ///
    /// The first successful call inserts the evaluation rows and then the
    /// summary; later calls return the evaluation without inserting. If the
    /// summary insert fails after rows were stored, a retry inserts only the
    /// summary.
    pub fn finish(&mut self, backends: Backends<'_>) -> Result<FinishReport, ReviewError> {
        if self.completion == CompletionState::Completed {
            info!(
                "[review:session] batch {} already completed; nothing inserted",
                self.batch_id
            );
            return Ok(FinishReport {
                evaluation: self.evaluation_or_compute(),
                applied: None,
                newly_completed: false,
            });
        }
        let window = self.page_window();
        if !window.is_last() {
            return Err(ReviewError::FinishBeforeLastPage {
                page: window.page_index,
                total_pages: window.total_pages,
            });
        }

        let applied = self
            .config
            .apply_on_finish
            .then(|| self.save_all(backends.records));
        let evaluation = self.evaluation_or_compute();

        if self.completion == CompletionState::Open {
            let rows = evaluation_rows(&self.sample, &self.feedback, &self.attributes, &self.batch_id);
            backends.evaluations.insert_evaluation_rows(&rows)?;
            self.evaluation = Some(evaluation.clone());
            self.completion = CompletionState::RowsPersisted;
            info!(
                "[review:session] inserted {} evaluation rows for batch {}",
                rows.len(),
                self.batch_id
            );
        }
        backends.evaluations.insert_batch_summary(&evaluation)?;
        self.completion = CompletionState::Completed;
        info!("[review:session] batch {} completed", self.batch_id);

        Ok(FinishReport {
            evaluation,
            applied,
            newly_completed: true,
        })
    }

    /// Batch identifier.
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Session configuration.
    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    /// Sampled records in sample order.
    pub fn sample(&self) -> &[Record] {
        &self.sample
    }

    /// Attributes under review.
    pub fn attributes(&self) -> &[AttributeName] {
        &self.attributes
    }

    /// Session taxonomy.
    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Recorded feedback.
    pub fn feedback(&self) -> &FeedbackStore {
        &self.feedback
    }

    /// Completion state.
    pub fn completion(&self) -> CompletionState {
        self.completion
    }

    /// True once rows and summary are stored.
    pub fn is_completed(&self) -> bool {
        self.completion == CompletionState::Completed
    }

    fn evaluation_or_compute(&self) -> BatchEvaluation {
        match &self.evaluation {
            Some(evaluation) => evaluation.clone(),
            None => compute_batch(
                &self.sample,
                &self.feedback,
                &self.attributes,
                &self.batch_id,
                &self.config.category,
                self.config.unscored_wrong,
            ),
        }
    }

    fn window_for(&self, page: usize) -> PageWindow {
        window(self.sample.len(), self.config.page_size, page)
    }

    fn ensure_open(&self) -> Result<(), ReviewError> {
        match self.completion {
            CompletionState::Open => Ok(()),
            _ => Err(ReviewError::SessionCompleted),
        }
    }

    fn check_key(&self, index: SampleIndex, attribute: &str) -> Result<(), ReviewError> {
        if index >= self.sample.len() {
            return Err(ReviewError::IndexOutOfRange {
                index,
                len: self.sample.len(),
            });
        }
        if !self.attributes.iter().any(|known| known == attribute) {
            return Err(ReviewError::UnknownAttribute(attribute.to_string()));
        }
        Ok(())
    }
}

/// Union of attribute names over `sample`, in first-seen order.
pub fn discover_attributes(sample: &[Record]) -> Vec<AttributeName> {
    let names: IndexSet<&str> = sample
        .iter()
        .flat_map(|record| record.attributes.keys().map(String::as_str))
        .collect();
    names.into_iter().map(str::to_string).collect()
}

fn derive_batch_id(config: &ReviewConfig, sample: &[Record]) -> BatchId {
    let seed = stable_hash_str(config.seed, &config.category);
    let hash = stable_hash_seq(seed, sample.iter().map(|record| record.id.as_str()));
    let hex = format!("{hash:016x}");
    hex[..BATCH_ID_HEX_LEN.min(hex.len())].to_string()
}
