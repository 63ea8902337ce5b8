use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum, error::ErrorKind};
use rand::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::config::{ReviewConfig, UnscoredWrongPolicy};
use crate::constants::demo::{IMAGE_BASE_URL, SOFA_TAXONOMY};
use crate::data::{Record, Taxonomy};
use crate::errors::ReviewError;
use crate::feedback::Judgment;
use crate::metrics::BatchEvaluation;
use crate::persist::{FileReviewStore, InMemorySessionStore, SessionStateStore};
use crate::session::{Backends, CommandOutcome, CompletionState, ReviewCommand, ReviewSession};
use crate::store::{
    EvaluationStore, InMemoryEvaluationStore, InMemoryRecordStore, InMemoryTaxonomyStore,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UnscoredWrongArg {
    Mismatch,
    Exclude,
}

impl From<UnscoredWrongArg> for UnscoredWrongPolicy {
    fn from(value: UnscoredWrongArg) -> Self {
        match value {
            UnscoredWrongArg::Mismatch => UnscoredWrongPolicy::CountAsMismatch,
            UnscoredWrongArg::Exclude => UnscoredWrongPolicy::Exclude,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "review_demo",
    disable_help_subcommand = true,
    about = "Run a scripted attribute review over a synthetic catalog",
    long_about = "Sample a synthetic sofa catalog, judge every page with a scripted reviewer, apply corrections, and print the batch evaluation as JSON.",
    after_help = "With --store-path or --store-dir, evaluation output and session snapshots persist across runs; rerunning with the same seed resumes the saved session."
)]
/// CLI for `review_demo`.
///
/// Common usage:
/// - In-memory run with defaults: `review_demo`
/// - Persist to the default file location: `--store-dir .review_store`
/// - Flag more values wrong: `--wrong-rate 0.4`
struct ReviewDemoCli {
    #[arg(long, default_value_t = 42, help = "Deterministic seed for sampling")]
    seed: u64,
    #[arg(
        long = "fraction",
        default_value_t = 0.1,
        value_parser = parse_unit_fraction,
        help = "Fraction of the catalog to sample"
    )]
    fraction: f64,
    #[arg(
        long = "page-size",
        default_value_t = 20,
        value_parser = parse_positive_usize,
        help = "Records shown per page"
    )]
    page_size: usize,
    #[arg(
        long = "records",
        default_value_t = 200,
        value_parser = parse_positive_usize,
        help = "Synthetic catalog size"
    )]
    records: usize,
    #[arg(long, default_value = "sofa", help = "Record category")]
    category: String,
    #[arg(
        long = "wrong-rate",
        default_value_t = 0.15,
        value_parser = parse_unit_fraction,
        help = "Probability the scripted reviewer flags a value as wrong"
    )]
    wrong_rate: f64,
    #[arg(
        long = "unscored-wrong",
        value_enum,
        default_value = "mismatch",
        help = "Scoring for wrong judgments without a replacement"
    )]
    unscored_wrong: UnscoredWrongArg,
    #[arg(
        long = "store-path",
        value_name = "STORE_PATH",
        help = "Optional path for the persisted review store file"
    )]
    store_path: Option<PathBuf>,
    #[arg(
        long = "store-dir",
        value_name = "DIR",
        conflicts_with = "store_path",
        help = "Optional directory for the persisted review store (uses review_store.bin filename)"
    )]
    store_dir: Option<PathBuf>,
}

/// JSON summary printed by `review_demo`.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewDemoReport {
    /// Batch identifier.
    pub batch_id: String,
    /// Catalog size before sampling.
    pub population: usize,
    /// Records in the sample.
    pub sample_size: usize,
    /// Pages reviewed in this run.
    pub pages_reviewed: usize,
    /// Records modified by page saves and the final apply.
    pub records_corrected: usize,
    /// Whether this run inserted the evaluation (false on a completed resume).
    pub newly_completed: bool,
    /// Batch evaluation.
    pub evaluation: BatchEvaluation,
}

/// Run the scripted review demo with CLI-style args (program name excluded).
pub fn run_review_demo<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) =
        parse_cli::<ReviewDemoCli, _>(std::iter::once("review_demo".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };
    let report = review_demo_report(&cli)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn review_demo_report(cli: &ReviewDemoCli) -> Result<ReviewDemoReport, ReviewError> {
    let catalog = synthetic_catalog(cli.records, &cli.category, cli.seed);
    let population = catalog.len();
    let records = InMemoryRecordStore::new(catalog);
    let taxonomies = InMemoryTaxonomyStore::new().with_taxonomy(cli.category.clone(), demo_taxonomy());
    let (evaluations, sessions) = open_backends(cli)?;

    let config = ReviewConfig {
        category: cli.category.clone(),
        seed: cli.seed,
        sample_fraction: cli.fraction,
        page_size: cli.page_size,
        unscored_wrong: cli.unscored_wrong.into(),
        ..ReviewConfig::default()
    };
    let mut session = ReviewSession::start(config.clone(), &records, &taxonomies)?;
    if let Some(snapshot) = sessions.load_session(session.batch_id())? {
        session = ReviewSession::resume(config, &records, &taxonomies, &snapshot)?;
    }
    let backends = Backends {
        records: &records,
        evaluations: evaluations.as_ref(),
    };

    let mut reviewer = StdRng::seed_from_u64(cli.seed.wrapping_add(1));
    let mut pages_reviewed = 0;
    let mut records_corrected = 0;
    while session.completion() == CompletionState::Open {
        review_current_page(&mut session, &mut reviewer, cli.wrong_rate, backends)?;
        pages_reviewed += 1;
        if let CommandOutcome::Saved(report) = session.apply(ReviewCommand::SavePage, backends)? {
            records_corrected += report.applied_count();
        }
        sessions.save_session(&session.snapshot())?;
        if session.page_window().is_last() {
            break;
        }
        session.apply(ReviewCommand::NextPage, backends)?;
    }
    if !session.page_window().is_last() {
        let last = session.page_window().total_pages - 1;
        session.apply(ReviewCommand::GoToPage(last), backends)?;
    }

    let CommandOutcome::Finished(finish) = session.apply(ReviewCommand::Finish, backends)? else {
        return Err(ReviewError::Persist("finish produced no report".into()));
    };
    sessions.save_session(&session.snapshot())?;
    if let Some(applied) = &finish.applied {
        records_corrected += applied.applied_count();
    }
    for (attribute, score) in &finish.evaluation.attribute_scores {
        info!("[review:demo] {}: {}", attribute, score);
    }
    Ok(ReviewDemoReport {
        batch_id: session.batch_id().to_string(),
        population,
        sample_size: session.sample().len(),
        pages_reviewed,
        records_corrected,
        newly_completed: finish.newly_completed,
        evaluation: finish.evaluation,
    })
}

fn review_current_page(
    session: &mut ReviewSession,
    reviewer: &mut StdRng,
    wrong_rate: f64,
    backends: Backends<'_>,
) -> Result<(), ReviewError> {
    let mut commands = Vec::new();
    for item in session.current_page().items {
        for view in item.attributes {
            let Some(value) = view.value else {
                continue;
            };
            if !reviewer.random_bool(wrong_rate) {
                continue;
            }
            commands.push(ReviewCommand::SetJudgment {
                index: item.index,
                attribute: view.attribute.to_string(),
                judgment: Judgment::Wrong,
            });
            // One flagged value in four is left without a replacement.
            let alternatives: Vec<&String> =
                view.options.iter().filter(|option| *option != value).collect();
            if reviewer.random_bool(0.75)
                && let Some(choice) = alternatives.choose(reviewer)
            {
                commands.push(ReviewCommand::SetReplacement {
                    index: item.index,
                    attribute: view.attribute.to_string(),
                    value: (*choice).clone(),
                });
            }
        }
    }
    commands.push(ReviewCommand::AcceptPage);
    for command in commands {
        session.apply(command, backends)?;
    }
    Ok(())
}

type DemoBackends = (Arc<dyn EvaluationStore>, Arc<dyn SessionStateStore>);

fn open_backends(cli: &ReviewDemoCli) -> Result<DemoBackends, ReviewError> {
    let path = match (&cli.store_path, &cli.store_dir) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(dir)) => Some(FileReviewStore::default_path_in_dir(dir)),
        (None, None) => None,
    };
    let Some(path) = path else {
        let evaluations: Arc<dyn EvaluationStore> = Arc::new(InMemoryEvaluationStore::new());
        let sessions: Arc<dyn SessionStateStore> = Arc::new(InMemorySessionStore::new());
        return Ok((evaluations, sessions));
    };
    let store = Arc::new(FileReviewStore::open(path)?);
    let evaluations: Arc<dyn EvaluationStore> = store.clone();
    let sessions: Arc<dyn SessionStateStore> = store;
    Ok((evaluations, sessions))
}

/// Taxonomy built from the demo sofa attribute table.
pub fn demo_taxonomy() -> Taxonomy {
    SOFA_TAXONOMY
        .iter()
        .fold(Taxonomy::empty(), |taxonomy, (attribute, options)| {
            taxonomy.with_options(*attribute, options.iter().copied())
        })
}

/// Deterministic synthetic catalog; roughly one value in ten is left unset.
pub fn synthetic_catalog(count: usize, category: &str, seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|idx| {
            let id = format!("{category}-{idx:05}");
            let url = format!("{IMAGE_BASE_URL}/{id}.jpg");
            let mut record = Record::new(id, idx as u64 + 1, url);
            for (attribute, options) in SOFA_TAXONOMY {
                if rng.random_range(0..10) == 0 {
                    continue;
                }
                if let Some(value) = options.choose(&mut rng) {
                    record = record.with_attribute(*attribute, *value);
                }
            }
            record
        })
        .collect()
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("Could not parse '{}' as a positive integer", raw))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_unit_fraction(raw: &str) -> Result<f64, String> {
    let parsed = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid fraction '{}': must be a float", raw.trim()))?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(format!("fraction must be within [0, 1], got {parsed}"));
    }
    Ok(parsed)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
