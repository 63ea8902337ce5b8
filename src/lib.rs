#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Review session configuration types.
pub mod config;
/// Centralized constants used across sampling, sessions, metrics, and persistence.
pub mod constants;
/// Correction derivation and apply.
pub mod corrections;
/// Record and taxonomy types.
pub mod data;
/// Reusable example runners shared by downstream crates.
pub mod example_apps;
/// In-session feedback store.
pub mod feedback;
mod hash;
/// Agreement metrics and evaluation output.
pub mod metrics;
/// Page arithmetic.
pub mod pager;
/// File-backed persistence and session-state stores.
pub mod persist;
/// Deterministic record sampling.
pub mod sampler;
/// Review session state and commands.
pub mod session;
/// Collaborator traits and in-memory backends.
pub mod store;
/// Shared type aliases.
pub mod types;

mod errors;

pub use config::{ReviewConfig, UnscoredWrongPolicy};
pub use corrections::{ApplyReport, CorrectionSet, FieldUpdate, apply_corrections, compute_corrections};
pub use data::{Record, Taxonomy};
pub use errors::ReviewError;
pub use feedback::{
    FeedbackEntry, FeedbackStore, InvalidStateWarning, Judgment, ReplacementWrite, WarningReason,
};
pub use metrics::{
    AttributeMetrics, AttributeScore, BatchEvaluation, EvaluationRow, RowVerdict, StoredEvaluation,
    StoredMetrics, compute_batch, compute_metrics, evaluation_rows,
};
pub use pager::PageWindow;
pub use persist::{FileReviewStore, InMemorySessionStore, SessionStateStore};
pub use sampler::{sample_records, sample_size};
pub use session::{
    Backends, CommandOutcome, CompletionState, FinishReport, PageView, ReviewCommand,
    ReviewSession, SessionSnapshot, SnapshotEntry, SnapshotRecord,
};
pub use store::{
    EvaluationStore, ImageSource, InMemoryEvaluationStore, InMemoryRecordStore,
    InMemoryTaxonomyStore, RecordFilter, RecordStore, TaxonomyStore, load_image_or_placeholder,
};
pub use types::{AttributeName, AttributeValue, BatchId, CategoryId, RecordId, SampleIndex};
