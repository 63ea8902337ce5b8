//! In-session reviewer feedback keyed by (sample index, attribute).
//!
//! The store only enforces the judgment/replacement invariant: a `Correct`
//! judgment never carries a replacement. Taxonomy membership is checked by
//! the session before a replacement reaches the store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::types::{AttributeName, AttributeValue, SampleIndex};

/// Reviewer verdict on a record's current attribute value.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
pub enum Judgment {
    /// The stored value is right.
    #[default]
    Correct,
    /// The stored value is wrong; a replacement may follow.
    Wrong,
}

impl fmt::Display for Judgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Correct => write!(f, "Correct"),
            Self::Wrong => write!(f, "Wrong"),
        }
    }
}

/// Judgment plus optional replacement for one (record, attribute) key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    judgment: Judgment,
    replacement: Option<AttributeValue>,
}

impl FeedbackEntry {
    /// Accepted value.
    pub fn correct() -> Self {
        Self::default()
    }

    /// Flagged value with an optional replacement (blank means "none yet").
    pub fn wrong(replacement: Option<AttributeValue>) -> Self {
        Self {
            judgment: Judgment::Wrong,
            replacement: replacement.filter(|value| !value.is_empty()),
        }
    }

    /// Reviewer verdict.
    pub fn judgment(&self) -> Judgment {
        self.judgment
    }

    /// Chosen replacement; always `None` for `Correct`.
    pub fn replacement(&self) -> Option<&str> {
        self.replacement.as_deref()
    }

    /// `Wrong` with no replacement chosen.
    pub fn is_unresolved(&self) -> bool {
        self.judgment == Judgment::Wrong && self.replacement.is_none()
    }
}

/// Why a replacement write was not accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarningReason {
    /// The key's judgment is `Correct` (or was never set).
    JudgmentNotWrong,
    /// The value is not a permitted option for the attribute.
    NotInTaxonomy,
}

/// Non-fatal signal for a rejected replacement write.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("replacement '{attempted}' for #{index}/{attribute} ignored: {reason:?}")]
pub struct InvalidStateWarning {
    /// Sample index of the key.
    pub index: SampleIndex,
    /// Attribute of the key.
    pub attribute: AttributeName,
    /// Value that was not stored.
    pub attempted: AttributeValue,
    /// Rejection reason.
    pub reason: WarningReason,
}

/// Result of a replacement write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplacementWrite {
    /// Stored (a blank value clears the replacement).
    Accepted,
    /// Not stored; the store is unchanged.
    Ignored(InvalidStateWarning),
}

impl ReplacementWrite {
    /// True when the write was stored.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Session-scoped feedback mapping.
#[derive(Clone, Debug, Default)]
pub struct FeedbackStore {
    entries: BTreeMap<SampleIndex, BTreeMap<AttributeName, FeedbackEntry>>,
}

impl FeedbackStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the judgment for a key; `Correct` clears any replacement.
    pub fn set_judgment(&mut self, index: SampleIndex, attribute: &str, judgment: Judgment) {
        let entry = self
            .entries
            .entry(index)
            .or_default()
            .entry(attribute.to_string())
            .or_default();
        entry.judgment = judgment;
        if judgment == Judgment::Correct {
            entry.replacement = None;
        }
    }

    /// Store a replacement, but only while the key's judgment is `Wrong`.
    pub fn set_replacement(
        &mut self,
        index: SampleIndex,
        attribute: &str,
        value: &str,
    ) -> ReplacementWrite {
        let stored = self
            .entries
            .get_mut(&index)
            .and_then(|attributes| attributes.get_mut(attribute));
        match stored {
            Some(entry) if entry.judgment == Judgment::Wrong => {
                entry.replacement = (!value.is_empty()).then(|| value.to_string());
                ReplacementWrite::Accepted
            }
            _ => {
                let warning = InvalidStateWarning {
                    index,
                    attribute: attribute.to_string(),
                    attempted: value.to_string(),
                    reason: WarningReason::JudgmentNotWrong,
                };
                warn!("[review:feedback] {}", warning);
                ReplacementWrite::Ignored(warning)
            }
        }
    }

    /// Entry for a key, or the default (`Correct`, no replacement) when unjudged.
    pub fn get(&self, index: SampleIndex, attribute: &str) -> FeedbackEntry {
        self.judged(index, attribute).cloned().unwrap_or_default()
    }

    /// Entry for a key only if a judgment was recorded.
    pub fn judged(&self, index: SampleIndex, attribute: &str) -> Option<&FeedbackEntry> {
        self.entries.get(&index)?.get(attribute)
    }

    /// Restore an entry wholesale (snapshot resume).
    pub(crate) fn restore(&mut self, index: SampleIndex, attribute: &str, entry: FeedbackEntry) {
        let entry = match entry.judgment {
            Judgment::Correct => FeedbackEntry::correct(),
            Judgment::Wrong => entry,
        };
        self.entries
            .entry(index)
            .or_default()
            .insert(attribute.to_string(), entry);
    }

    /// All recorded entries ordered by sample index, then attribute name.
    ///
    /// Borrowing iterator; call again to restart.
    pub fn all(&self) -> impl Iterator<Item = (SampleIndex, &str, &FeedbackEntry)> + '_ {
        self.entries.iter().flat_map(|(index, attributes)| {
            attributes
                .iter()
                .map(move |(attribute, entry)| (*index, attribute.as_str(), entry))
        })
    }

    /// Recorded entries for one attribute, ordered by sample index.
    pub fn for_attribute<'a>(
        &'a self,
        attribute: &'a str,
    ) -> impl Iterator<Item = (SampleIndex, &'a FeedbackEntry)> + 'a {
        self.entries
            .iter()
            .filter_map(move |(index, attributes)| attributes.get(attribute).map(|e| (*index, e)))
    }

    /// Number of recorded keys.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// True when nothing has been judged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
