use tempfile::tempdir;

use attribute_review::{
    Backends, CompletionState, FileReviewStore, InMemoryRecordStore, InMemoryTaxonomyStore,
    Judgment, Record, ReviewConfig, ReviewSession, RowVerdict, SessionStateStore, Taxonomy,
};

fn records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|idx| {
            Record::new(format!("rec-{idx:04}"), idx as u64, "")
                .with_attribute("Pattern", if idx % 2 == 0 { "Solid" } else { "Floral" })
        })
        .collect()
}

fn taxonomies() -> InMemoryTaxonomyStore {
    InMemoryTaxonomyStore::new().with_taxonomy(
        "sofa",
        Taxonomy::empty().with_options("Pattern", ["Solid", "Floral", "Geometric"]),
    )
}

#[test]
fn completed_session_survives_store_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state").join("review.bin");
    let record_store = InMemoryRecordStore::new(records(60));
    let config = ReviewConfig {
        sample_fraction: 0.1,
        ..ReviewConfig::default()
    };

    let (batch_id, evaluation) = {
        let store = FileReviewStore::open(&path).unwrap();
        let mut session = ReviewSession::start(config.clone(), &record_store, &taxonomies()).unwrap();
        session.set_judgment(0, "Pattern", Judgment::Wrong).unwrap();
        session.set_replacement(0, "Pattern", "Geometric").unwrap();
        session.accept_page().unwrap();
        let backends = Backends {
            records: &record_store,
            evaluations: &store,
        };
        let report = session.finish(backends).unwrap();
        assert_eq!(report.applied.as_ref().map(|r| r.applied_count()), Some(1));
        store.save_session(&session.snapshot()).unwrap();
        (session.batch_id().to_string(), report.evaluation)
    };

    let store = FileReviewStore::open(&path).unwrap();
    let rows = store.evaluation_rows(&batch_id).unwrap();
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0].verdicts["Pattern"], RowVerdict::Wrong);
    assert!(rows[1..].iter().all(|row| row.verdicts["Pattern"] == RowVerdict::Correct));
    let summaries = store.batch_summaries(&batch_id).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0], evaluation);

    // The store now holds the corrected value; the resumed session still
    // scores against the value the reviewer saw.
    let snapshot = store.load_session(&batch_id).unwrap().unwrap();
    assert_eq!(snapshot.completion, CompletionState::Completed);
    let mut resumed = ReviewSession::resume(config, &record_store, &taxonomies(), &snapshot).unwrap();
    assert!(resumed.is_completed());
    let backends = Backends {
        records: &record_store,
        evaluations: &store,
    };
    assert_eq!(resumed.metrics("Pattern"), evaluation.score("Pattern"));
    let again = resumed.finish(backends).unwrap();
    assert!(!again.newly_completed);
    assert_eq!(again.evaluation, evaluation);
    assert_eq!(store.batch_summaries(&batch_id).unwrap().len(), 1);
    assert_eq!(store.evaluation_rows(&batch_id).unwrap().len(), 6);
}

#[test]
fn in_progress_session_resumes_from_file_snapshot() {
    let dir = tempdir().unwrap();
    let record_store = InMemoryRecordStore::new(records(80));
    let config = ReviewConfig {
        sample_fraction: 0.5,
        page_size: 15,
        ..ReviewConfig::default()
    };
    let store = FileReviewStore::open(dir.path()).unwrap();
    let mut session = ReviewSession::start(config.clone(), &record_store, &taxonomies()).unwrap();
    session.accept_page().unwrap();
    session.next_page();
    session.set_judgment(17, "Pattern", Judgment::Wrong).unwrap();
    store.save_session(&session.snapshot()).unwrap();
    drop(store);

    let reopened = FileReviewStore::open(FileReviewStore::default_path_in_dir(dir.path())).unwrap();
    let snapshot = reopened.load_session(session.batch_id()).unwrap().unwrap();
    let resumed = ReviewSession::resume(config, &record_store, &taxonomies(), &snapshot).unwrap();
    assert_eq!(resumed.page_window().page_index, 1);
    assert_eq!(resumed.feedback().len(), session.feedback().len());
    assert!(resumed.feedback().get(17, "Pattern").is_unresolved());
    assert_eq!(resumed.feedback().get(0, "Pattern").judgment(), Judgment::Correct);
}
