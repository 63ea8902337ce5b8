use indexmap::IndexMap;
use simd_r_drive::storage_engine::DataStore;
use simd_r_drive::storage_engine::traits::{DataStoreReader, DataStoreWriter};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::constants::persist::{
    BATCH_SUMMARY_PREFIX, BATCH_SUMMARY_RECORD_VERSION, BITCODE_PREFIX, COUNT_SUFFIX,
    DEFAULT_STORE_DIR, DEFAULT_STORE_FILENAME, EVALUATION_ROWS_PREFIX,
    EVALUATION_ROWS_RECORD_VERSION, META_KEY, SESSION_PREFIX, SESSION_RECORD_VERSION,
    STORE_VERSION,
};
use crate::errors::ReviewError;
use crate::metrics::{BatchEvaluation, EvaluationRow, RowVerdict, StoredEvaluation};
use crate::session::SessionSnapshot;
use crate::store::EvaluationStore;
use crate::types::BatchId;

/// Persistence for in-progress review sessions, keyed by batch id.
pub trait SessionStateStore: Send + Sync {
    /// Latest snapshot for `batch_id`, if one was saved.
    fn load_session(&self, batch_id: &str) -> Result<Option<SessionSnapshot>, ReviewError>;
    /// Replace the snapshot stored under the snapshot's batch id.
    fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), ReviewError>;
}

/// In-memory session-state store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<BatchId, SessionSnapshot>>,
}

impl InMemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStateStore for InMemorySessionStore {
    fn load_session(&self, batch_id: &str) -> Result<Option<SessionSnapshot>, ReviewError> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| ReviewError::Persist("session store lock poisoned".into()))?;
        Ok(guard.get(batch_id).cloned())
    }

    fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), ReviewError> {
        self.sessions
            .write()
            .map_err(|_| ReviewError::Persist("session store lock poisoned".into()))?
            .insert(snapshot.batch_id.clone(), snapshot.clone());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, bitcode::Encode, bitcode::Decode)]
struct StoreMeta {
    version: u8,
}

#[derive(Clone, Debug, bitcode::Encode, bitcode::Decode)]
struct PersistedRow {
    batch_id: String,
    record_id: String,
    serial: u64,
    verdicts: Vec<(String, String)>,
}

/// File-backed evaluation and session store.
///
/// Evaluation inserts append under a per-batch counter: the record is written
/// first and the counter bumped second, so a reader never counts a record
/// that was not fully written. Nothing is deduplicated.
pub struct FileReviewStore {
    store: DataStore,
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl fmt::Debug for FileReviewStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileReviewStore")
            .field("path", &self.path)
            .finish()
    }
}

impl FileReviewStore {
    /// Open (or create) a store at `path`; a directory gets the default filename.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, ReviewError> {
        let path = coerce_store_path(path.into());
        ensure_parent_dir(&path)?;
        let store = DataStore::open(path.as_path()).map_err(map_store_err)?;
        let store = Self {
            store,
            path,
            append_lock: Mutex::new(()),
        };
        store.verify_metadata()?;
        info!("[review:persist] opened {}", store.path.display());
        Ok(store)
    }

    /// Default store file path under the crate's default store directory.
    pub fn default_path() -> PathBuf {
        Self::default_path_in_dir(DEFAULT_STORE_DIR)
    }

    /// Default store file path inside a custom directory.
    pub fn default_path_in_dir<P: AsRef<Path>>(dir: P) -> PathBuf {
        dir.as_ref().join(DEFAULT_STORE_FILENAME)
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every evaluation row inserted for `batch_id`, in insert order.
    pub fn evaluation_rows(&self, batch_id: &str) -> Result<Vec<EvaluationRow>, ReviewError> {
        let mut rows = Vec::new();
        for bytes in self.read_all(EVALUATION_ROWS_PREFIX, batch_id)? {
            for row in decode_rows(&bytes)? {
                rows.push(row_from_persisted(row)?);
            }
        }
        Ok(rows)
    }

    /// Every batch summary inserted for `batch_id`, in insert order.
    pub fn batch_summaries(&self, batch_id: &str) -> Result<Vec<BatchEvaluation>, ReviewError> {
        self.read_all(BATCH_SUMMARY_PREFIX, batch_id)?
            .iter()
            .map(|bytes| BatchEvaluation::try_from(decode_summary(bytes)?))
            .collect()
    }

    fn verify_metadata(&self) -> Result<(), ReviewError> {
        match read_bytes(&self.store, META_KEY)? {
            Some(bytes) => {
                let meta = decode_store_meta(&bytes)?;
                if meta.version != STORE_VERSION {
                    return Err(ReviewError::Persist(format!(
                        "review store version mismatch (expected {}, found {})",
                        STORE_VERSION, meta.version
                    )));
                }
            }
            None => {
                let meta = StoreMeta {
                    version: STORE_VERSION,
                };
                write_bytes(&self.store, META_KEY, &encode_store_meta(&meta))?;
            }
        }
        Ok(())
    }

    fn append(&self, prefix: &str, batch_id: &str, payload: &[u8]) -> Result<(), ReviewError> {
        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| ReviewError::Persist("review store lock poisoned".into()))?;
        let count_key = counter_key(prefix, batch_id);
        let count = self.read_count(&count_key)?;
        let key = entry_key(prefix, batch_id, count);
        write_bytes(&self.store, &key, payload)?;
        write_bytes(&self.store, &count_key, &(count + 1).to_le_bytes())?;
        debug!(
            "[review:persist] appended {}{} #{}",
            prefix, batch_id, count
        );
        Ok(())
    }

    fn read_all(&self, prefix: &str, batch_id: &str) -> Result<Vec<Vec<u8>>, ReviewError> {
        let count = self.read_count(&counter_key(prefix, batch_id))?;
        (0..count)
            .map(|n| {
                read_bytes(&self.store, &entry_key(prefix, batch_id, n))?.ok_or_else(|| {
                    ReviewError::Persist(format!(
                        "missing record {n} under {prefix}{batch_id}"
                    ))
                })
            })
            .collect()
    }

    fn read_count(&self, key: &[u8]) -> Result<u64, ReviewError> {
        match read_bytes(&self.store, key)? {
            None => Ok(0),
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    ReviewError::Persist(format!(
                        "record counter has {} bytes, expected 8",
                        bytes.len()
                    ))
                })?;
                Ok(u64::from_le_bytes(raw))
            }
        }
    }
}

impl EvaluationStore for FileReviewStore {
    fn insert_evaluation_rows(&self, rows: &[EvaluationRow]) -> Result<(), ReviewError> {
        let mut by_batch: IndexMap<&str, Vec<&EvaluationRow>> = IndexMap::new();
        for row in rows {
            by_batch.entry(row.batch_id.as_str()).or_default().push(row);
        }
        for (batch_id, rows) in by_batch {
            self.append(EVALUATION_ROWS_PREFIX, batch_id, &encode_rows(&rows))?;
        }
        Ok(())
    }

    fn insert_batch_summary(&self, summary: &BatchEvaluation) -> Result<(), ReviewError> {
        self.append(BATCH_SUMMARY_PREFIX, &summary.batch_id, &encode_summary(summary))
    }
}

impl SessionStateStore for FileReviewStore {
    fn load_session(&self, batch_id: &str) -> Result<Option<SessionSnapshot>, ReviewError> {
        match read_bytes(&self.store, &session_key(batch_id))? {
            Some(bytes) => decode_session(&bytes),
            None => Ok(None),
        }
    }

    fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), ReviewError> {
        write_bytes(
            &self.store,
            &session_key(&snapshot.batch_id),
            &encode_session(snapshot),
        )
    }
}

fn session_key(batch_id: &str) -> Vec<u8> {
    format!("{SESSION_PREFIX}{batch_id}").into_bytes()
}

fn counter_key(prefix: &str, batch_id: &str) -> Vec<u8> {
    format!("{prefix}{batch_id}:{COUNT_SUFFIX}").into_bytes()
}

fn entry_key(prefix: &str, batch_id: &str, n: u64) -> Vec<u8> {
    format!("{prefix}{batch_id}:{n:020}").into_bytes()
}

fn encode_store_meta(meta: &StoreMeta) -> Vec<u8> {
    encode_bitcode_payload(&bitcode::encode(meta))
}

fn decode_store_meta(bytes: &[u8]) -> Result<StoreMeta, ReviewError> {
    let raw = decode_bitcode_payload(bytes)?;
    bitcode::decode(&raw)
        .map_err(|err| ReviewError::Persist(format!("failed to decode review store metadata: {err}")))
}

fn versioned(version: u8, bytes: &[u8]) -> Vec<u8> {
    let payload = encode_bitcode_payload(bytes);
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(version);
    buf.extend_from_slice(&payload);
    buf
}

fn unversioned(version: u8, bytes: &[u8], label: &str) -> Result<Vec<u8>, ReviewError> {
    match bytes.first() {
        Some(found) if *found == version => decode_bitcode_payload(&bytes[1..]),
        Some(_) => Err(ReviewError::Persist(format!(
            "{label} record version mismatch"
        ))),
        None => Err(ReviewError::Persist(format!("{label} record is empty"))),
    }
}

fn encode_rows(rows: &[&EvaluationRow]) -> Vec<u8> {
    let persisted: Vec<PersistedRow> = rows
        .iter()
        .map(|row| PersistedRow {
            batch_id: row.batch_id.clone(),
            record_id: row.record_id.clone(),
            serial: row.serial,
            verdicts: row
                .verdicts
                .iter()
                .map(|(attribute, verdict)| (attribute.clone(), verdict.as_str().to_string()))
                .collect(),
        })
        .collect();
    versioned(EVALUATION_ROWS_RECORD_VERSION, &bitcode::encode(&persisted))
}

fn decode_rows(bytes: &[u8]) -> Result<Vec<PersistedRow>, ReviewError> {
    let raw = unversioned(EVALUATION_ROWS_RECORD_VERSION, bytes, "evaluation rows")?;
    bitcode::decode(&raw)
        .map_err(|err| ReviewError::Persist(format!("corrupt evaluation rows record: {err}")))
}

fn row_from_persisted(row: PersistedRow) -> Result<EvaluationRow, ReviewError> {
    let mut verdicts = IndexMap::with_capacity(row.verdicts.len());
    for (attribute, raw) in row.verdicts {
        let verdict = RowVerdict::parse(&raw).ok_or_else(|| {
            ReviewError::Persist(format!("unknown row verdict '{raw}' for '{attribute}'"))
        })?;
        verdicts.insert(attribute, verdict);
    }
    Ok(EvaluationRow {
        batch_id: row.batch_id,
        record_id: row.record_id,
        serial: row.serial,
        verdicts,
    })
}

fn encode_summary(summary: &BatchEvaluation) -> Vec<u8> {
    let stored = StoredEvaluation::from(summary);
    versioned(BATCH_SUMMARY_RECORD_VERSION, &bitcode::encode(&stored))
}

fn decode_summary(bytes: &[u8]) -> Result<StoredEvaluation, ReviewError> {
    let raw = unversioned(BATCH_SUMMARY_RECORD_VERSION, bytes, "batch summary")?;
    bitcode::decode(&raw)
        .map_err(|err| ReviewError::Persist(format!("corrupt batch summary record: {err}")))
}

fn encode_session(snapshot: &SessionSnapshot) -> Vec<u8> {
    versioned(SESSION_RECORD_VERSION, &bitcode::encode(snapshot))
}

fn decode_session(bytes: &[u8]) -> Result<Option<SessionSnapshot>, ReviewError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let raw = unversioned(SESSION_RECORD_VERSION, bytes, "session")?;
    bitcode::decode(&raw)
        .map(Some)
        .map_err(|err| ReviewError::Persist(format!("corrupt session record: {err}")))
}

fn encode_bitcode_payload(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(BITCODE_PREFIX);
    out.extend_from_slice(bytes);
    out
}

fn decode_bitcode_payload(bytes: &[u8]) -> Result<Vec<u8>, ReviewError> {
    if bytes.first().copied() != Some(BITCODE_PREFIX) {
        return Err(ReviewError::Persist(
            "bitcode payload missing expected prefix".into(),
        ));
    }
    Ok(bytes[1..].to_vec())
}

fn coerce_store_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        return path.join(DEFAULT_STORE_FILENAME);
    }
    path
}

fn ensure_parent_dir(path: &Path) -> Result<(), ReviewError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn read_bytes(store: &DataStore, key: &[u8]) -> Result<Option<Vec<u8>>, ReviewError> {
    store
        .read(key)
        .map_err(map_store_err)?
        .map(|entry| Ok(entry.as_ref().to_vec()))
        .transpose()
}

fn write_bytes(store: &DataStore, key: &[u8], payload: &[u8]) -> Result<(), ReviewError> {
    store.write(key, payload).map_err(map_store_err)?;
    Ok(())
}

fn map_store_err(err: io::Error) -> ReviewError {
    ReviewError::Persist(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use crate::feedback::Judgment;
    use crate::metrics::{AttributeMetrics, AttributeScore};
    use crate::session::{CompletionState, SnapshotEntry, SnapshotRecord};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn row(batch_id: &str, record_id: &str) -> EvaluationRow {
        let mut verdicts = IndexMap::new();
        verdicts.insert("Silhouette".to_string(), RowVerdict::Wrong);
        verdicts.insert("Pattern".to_string(), RowVerdict::Unresolved);
        EvaluationRow {
            batch_id: batch_id.to_string(),
            record_id: record_id.to_string(),
            serial: 7,
            verdicts,
        }
    }

    fn summary(batch_id: &str) -> BatchEvaluation {
        let mut attribute_scores = IndexMap::new();
        attribute_scores.insert(
            "Silhouette".to_string(),
            AttributeScore::Scored(AttributeMetrics {
                accuracy: 0.5,
                precision: 0.25,
                recall: 0.5,
                support: 4,
            }),
        );
        attribute_scores.insert("Pattern".to_string(), AttributeScore::NoData);
        BatchEvaluation {
            batch_id: batch_id.to_string(),
            category: "sofa".to_string(),
            sample_size: 4,
            attribute_scores,
            completed_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        }
    }

    fn snapshot(batch_id: &str) -> SessionSnapshot {
        SessionSnapshot {
            category: "sofa".into(),
            seed: 42,
            sample_fraction: 0.1,
            batch_id: batch_id.into(),
            sample: vec![
                SnapshotRecord::from(&Record::new("a", 1, "").with_attribute("Pattern", "Solid")),
                SnapshotRecord::from(&Record::new("b", 2, "").with_attribute("Pattern", "Striped")),
            ],
            page_index: 0,
            completion: CompletionState::Open,
            entries: vec![SnapshotEntry {
                index: 1,
                attribute: "Pattern".into(),
                judgment: Judgment::Wrong,
                replacement: Some("Floral".into()),
            }],
            evaluation: None,
        }
    }

    #[test]
    fn file_store_round_trips_rows_and_summaries_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("review.bin");
        let store = FileReviewStore::open(&path).unwrap();
        store
            .insert_evaluation_rows(&[row("b1", "r1"), row("b2", "r9")])
            .unwrap();
        store.insert_evaluation_rows(&[row("b1", "r2")]).unwrap();
        store.insert_batch_summary(&summary("b1")).unwrap();
        drop(store);

        let reopened = FileReviewStore::open(&path).unwrap();
        let rows = reopened.evaluation_rows("b1").unwrap();
        let ids: Vec<&str> = rows.iter().map(|row| row.record_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(rows[0], row("b1", "r1"));
        assert_eq!(reopened.batch_summaries("b1").unwrap(), vec![summary("b1")]);
        assert!(reopened.batch_summaries("b2").unwrap().is_empty());
    }

    #[test]
    fn inserts_are_not_deduplicated() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::open(dir.path()).unwrap();
        store.insert_batch_summary(&summary("b1")).unwrap();
        store.insert_batch_summary(&summary("b1")).unwrap();
        assert_eq!(store.batch_summaries("b1").unwrap().len(), 2);
        assert!(dir.path().join(DEFAULT_STORE_FILENAME).is_file());
    }

    #[test]
    fn session_snapshots_replace_previous_saves() {
        let dir = tempdir().unwrap();
        let path = FileReviewStore::default_path_in_dir(dir.path());
        let store = FileReviewStore::open(&path).unwrap();
        assert!(store.load_session("b1").unwrap().is_none());

        let mut first = snapshot("b1");
        store.save_session(&first).unwrap();
        first.page_index = 3;
        store.save_session(&first).unwrap();
        drop(store);

        let reopened = FileReviewStore::open(&path).unwrap();
        assert_eq!(reopened.load_session("b1").unwrap(), Some(first));
    }

    #[test]
    fn in_memory_session_store_matches_file_semantics() {
        let store = InMemorySessionStore::new();
        assert!(store.load_session("b1").unwrap().is_none());
        store.save_session(&snapshot("b1")).unwrap();
        assert_eq!(store.load_session("b1").unwrap(), Some(snapshot("b1")));
    }

    #[test]
    fn bitcode_payload_requires_prefix() {
        let err = decode_bitcode_payload(&[0x00, 0x01]).unwrap_err();
        assert!(matches!(err, ReviewError::Persist(msg) if msg.contains("missing expected prefix")));
    }

    #[test]
    fn decoders_reject_version_mismatch_and_corrupt_payloads() {
        let rows_mismatch = decode_rows(&[EVALUATION_ROWS_RECORD_VERSION.wrapping_add(1), 1]);
        assert!(matches!(
            rows_mismatch,
            Err(ReviewError::Persist(msg)) if msg.contains("version mismatch")
        ));
        let summary_corrupt =
            decode_summary(&[BATCH_SUMMARY_RECORD_VERSION, BITCODE_PREFIX, 0xFF]).unwrap_err();
        assert!(matches!(summary_corrupt, ReviewError::Persist(msg) if msg.contains("corrupt")));
        assert!(decode_session(&[]).unwrap().is_none());
        let session_corrupt =
            decode_session(&[SESSION_RECORD_VERSION, BITCODE_PREFIX, 0xFF]).unwrap_err();
        assert!(matches!(session_corrupt, ReviewError::Persist(msg) if msg.contains("corrupt")));
    }

    #[test]
    fn completed_snapshot_keeps_its_evaluation() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::open(dir.path()).unwrap();
        let mut completed = snapshot("b1");
        completed.completion = CompletionState::Completed;
        completed.evaluation = Some(StoredEvaluation::from(&summary("b1")));
        store.save_session(&completed).unwrap();
        let loaded = store.load_session("b1").unwrap().unwrap();
        assert_eq!(loaded.sample[1].attributes, vec![("Pattern".to_string(), "Striped".to_string())]);
        let evaluation = BatchEvaluation::try_from(loaded.evaluation.unwrap()).unwrap();
        assert_eq!(evaluation, summary("b1"));
    }

    #[test]
    fn open_rejects_foreign_store_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("review.bin");
        {
            let raw = DataStore::open(path.as_path()).unwrap();
            let meta = StoreMeta {
                version: STORE_VERSION.wrapping_add(1),
            };
            write_bytes(&raw, META_KEY, &encode_store_meta(&meta)).unwrap();
        }
        let err = FileReviewStore::open(&path).unwrap_err();
        assert!(matches!(err, ReviewError::Persist(msg) if msg.contains("version mismatch")));
    }

    #[test]
    fn batches_keep_separate_counters() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::open(dir.path()).unwrap();
        store.insert_evaluation_rows(&[row("b1", "r1")]).unwrap();
        store.insert_evaluation_rows(&[row("b1:x", "r2")]).unwrap();
        store.insert_evaluation_rows(&[row("b1", "r3")]).unwrap();
        assert_eq!(
            store.read_count(&counter_key(EVALUATION_ROWS_PREFIX, "b1")).unwrap(),
            2
        );
        let ids: Vec<String> = store
            .evaluation_rows("b1")
            .unwrap()
            .into_iter()
            .map(|row| row.record_id)
            .collect();
        assert_eq!(ids, vec!["r1", "r3"]);
        assert_eq!(store.evaluation_rows("b1:x").unwrap().len(), 1);
        assert!(store.evaluation_rows("b2").unwrap().is_empty());
    }

    #[test]
    fn counter_with_wrong_width_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::open(dir.path()).unwrap();
        write_bytes(&store.store, &counter_key(BATCH_SUMMARY_PREFIX, "b1"), &[1, 2, 3]).unwrap();
        let err = store.batch_summaries("b1").unwrap_err();
        assert!(matches!(err, ReviewError::Persist(msg) if msg.contains("expected 8")));
    }
}
