use std::io;

use thiserror::Error;

use crate::types::{AttributeName, RecordId, SampleIndex};

/// Error type for session load, configuration, store, and persistence failures.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("no records available to sample")]
    EmptyInput,
    #[error("invalid record '{record_id}': {reason}")]
    InvalidRecord { record_id: RecordId, reason: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sample index {index} is out of range (sample size {len})")]
    IndexOutOfRange { index: SampleIndex, len: usize },
    #[error("attribute '{0}' is not part of this review session")]
    UnknownAttribute(AttributeName),
    #[error("review session already completed; feedback is frozen")]
    SessionCompleted,
    #[error("finish requires the last page (current page {page}, total pages {total_pages})")]
    FinishBeforeLastPage { page: usize, total_pages: usize },
    #[error("session snapshot does not match the current sample: {details}")]
    SessionMismatch { details: String },
    #[error("store failure: {0}")]
    Store(String),
    #[error("persistence failure: {0}")]
    Persist(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
