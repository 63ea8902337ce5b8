/// Constants used by the deterministic sampler.
pub mod sampler {
    /// Offset mixed into the sampler RNG seed so sample order is independent of other seeded streams.
    pub const SAMPLE_SEED_OFFSET: u64 = 0x5A3D_1E5E;
    /// Slack added before flooring `fraction * len` to absorb binary rounding (`0.29 * 100`).
    pub const FRACTION_EPSILON: f64 = 1e-9;
}

/// Constants used by review session defaults and bookkeeping.
pub mod session {
    /// Default number of records shown per page.
    pub const DEFAULT_PAGE_SIZE: usize = 20;
    /// Default fraction of the record set drawn into a session sample.
    pub const DEFAULT_SAMPLE_FRACTION: f64 = 0.1;
    /// Default sampler seed.
    pub const DEFAULT_SEED: u64 = 42;
    /// Default record category.
    pub const DEFAULT_CATEGORY: &str = "sofa";
    /// Number of hex characters kept from the derived batch hash.
    pub const BATCH_ID_HEX_LEN: usize = 16;
}

/// Constants used by evaluation-row verdict labels.
pub mod metrics {
    /// Row verdict for an attribute the reviewer accepted.
    pub const VERDICT_CORRECT: &str = "correct";
    /// Row verdict for an attribute flagged wrong with a replacement chosen.
    pub const VERDICT_WRONG: &str = "wrong";
    /// Row verdict for an attribute flagged wrong without a replacement.
    pub const VERDICT_UNRESOLVED: &str = "unresolved";
}

/// Constants used by the file-backed review store.
pub mod persist {
    /// Version tag for review-store metadata compatibility checks.
    pub const STORE_VERSION: u8 = 2;
    /// Key used for review-store global metadata.
    pub const META_KEY: &[u8] = b"__meta__";
    /// Version tag for persisted evaluation-row records.
    pub const EVALUATION_ROWS_RECORD_VERSION: u8 = 1;
    /// Version tag for persisted batch-summary records.
    pub const BATCH_SUMMARY_RECORD_VERSION: u8 = 1;
    /// Version tag for persisted session snapshots.
    pub const SESSION_RECORD_VERSION: u8 = 2;
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';
    /// Key prefix for evaluation-row records (one record per batch per insert call).
    pub const EVALUATION_ROWS_PREFIX: &str = "eval_rows:";
    /// Key prefix for batch-summary records (one record per insert call).
    pub const BATCH_SUMMARY_PREFIX: &str = "batch:";
    /// Key prefix for saved session snapshots.
    pub const SESSION_PREFIX: &str = "session:";
    /// Key suffix for per-batch record counters.
    pub const COUNT_SUFFIX: &str = "count";
    /// Default directory for persisted review-store files.
    pub const DEFAULT_STORE_DIR: &str = ".review_store";
    /// Default filename for persisted review-store files.
    pub const DEFAULT_STORE_FILENAME: &str = "review_store.bin";
}

/// Constants used by the demo runner.
pub mod demo {
    /// Attribute values used to build the synthetic sofa catalog.
    pub const SOFA_TAXONOMY: &[(&str, &[&str])] = &[
        ("Sub Type", &["Loveseat", "Sectional", "Sleeper", "Standard", "Modular", "Chaise"]),
        (
            "Silhouette",
            &["Straight", "Curved", "L-shaped", "U-shaped", "Tuxedo", "Camelback", "Lawson"],
        ),
        ("Back Style", &["Tight", "Pillow", "Tufted", "Channel", "Split"]),
        ("Pattern", &["Solid", "Striped", "Floral", "Geometric", "Abstract"]),
        ("Leg Visibility", &["Exposed", "Hidden", "No legs"]),
        ("Visual Weight", &["Light", "Medium", "Heavy"]),
    ];
    /// Image host used for synthetic record image references.
    pub const IMAGE_BASE_URL: &str = "https://images.example.com/catalog";
}
