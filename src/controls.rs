//! Ingestion tunables and the command-line surface that builds them.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rand::Rng;

/// Randomized delay a worker waits after each record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacingPolicy {
    min: Duration,
    max: Duration,
}

impl PacingPolicy {
    /// Uniform jitter in `[min, max]`; bounds are swapped if given in reverse.
    pub fn jitter(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// No delay between records.
    pub fn none() -> Self {
        Self::jitter(Duration::ZERO, Duration::ZERO)
    }

    /// Lower bound.
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draws one delay.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self::jitter(Duration::from_millis(500), Duration::from_millis(2000))
    }
}

/// Knobs that bound an ingestion run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestControls {
    workers: usize,
    pacing: PacingPolicy,
    progress_every: usize,
}

impl IngestControls {
    /// Constructs a new set of controls. `workers` is clamped to at least one.
    pub fn new(workers: usize, pacing: PacingPolicy) -> Self {
        Self {
            workers: workers.max(1),
            pacing,
            progress_every: 25,
        }
    }

    /// Logs a progress line every `n` completed records (0 disables).
    pub fn with_progress_every(mut self, n: usize) -> Self {
        self.progress_every = n;
        self
    }

    /// Number of concurrent workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Per-worker delay between records.
    pub fn pacing(&self) -> PacingPolicy {
        self.pacing
    }

    /// Progress logging interval.
    pub fn progress_every(&self) -> usize {
        self.progress_every
    }
}

impl Default for IngestControls {
    fn default() -> Self {
        Self::new(40, PacingPolicy::default())
    }
}

/// Command-line interface for the `thumbsearch` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "thumbsearch",
    about = "Embed a channel's video thumbnails and search them with natural language"
)]
pub struct Cli {
    /// Channel (creator namespace) to ingest and search
    #[arg(long, env = "THUMBSEARCH_CHANNEL")]
    pub channel: String,

    /// JSONL file of catalog entries ({channel_name, video_id, video_title}) to import first
    #[arg(long)]
    pub import: Option<PathBuf>,

    /// Re-embed every catalog record for the channel
    #[arg(long, default_value_t = false, conflicts_with = "reconcile")]
    pub refetch: bool,

    /// Embed only catalog records missing from the vector index
    #[arg(long, default_value_t = false)]
    pub reconcile: bool,

    /// Free-text query to run after ingestion
    #[arg(long)]
    pub search_query: Option<String>,

    /// Number of results to return
    #[arg(long, default_value_t = 5)]
    pub n_results: usize,

    /// SQLite catalog path
    #[arg(long, env = "THUMBSEARCH_CATALOG", default_value = "thumbsearch_catalog.sqlite")]
    pub catalog: PathBuf,

    /// Directory holding the persisted vector index
    #[arg(long, env = "THUMBSEARCH_INDEX_DIR", default_value = "thumbsearch_index")]
    pub index_dir: PathBuf,

    /// Vector index collection name
    #[arg(
        long,
        env = "THUMBSEARCH_COLLECTION",
        default_value = "thumbnail_embeddings"
    )]
    pub collection: String,

    /// Base URL of the CLIP inference server
    #[arg(
        long,
        env = "THUMBSEARCH_EMBED_URL",
        default_value = "http://127.0.0.1:8000"
    )]
    pub embed_url: String,

    /// Expected embedding dimensionality (checked on every response)
    #[arg(long, env = "THUMBSEARCH_EMBED_DIMENSIONS")]
    pub embed_dimensions: Option<usize>,

    /// Seconds before an embedding request times out
    #[arg(long, env = "THUMBSEARCH_EMBED_TIMEOUT_SECS", default_value_t = 60)]
    pub embed_timeout_secs: u64,

    /// Attempts for rate-limited or transient embedding failures
    #[arg(long, env = "THUMBSEARCH_EMBED_MAX_RETRIES", default_value_t = 3)]
    pub embed_max_retries: usize,

    /// Seconds before a thumbnail download times out
    #[arg(long, env = "THUMBSEARCH_FETCH_TIMEOUT_SECS", default_value_t = 20)]
    pub fetch_timeout_secs: u64,

    /// Number of concurrent ingestion workers
    #[arg(long, env = "THUMBSEARCH_WORKERS", default_value_t = 40)]
    pub workers: usize,

    /// Minimum per-worker pause between records, in milliseconds
    #[arg(long, env = "THUMBSEARCH_PACING_MIN_MS", default_value_t = 500)]
    pub pacing_min_ms: u64,

    /// Maximum per-worker pause between records, in milliseconds
    #[arg(long, env = "THUMBSEARCH_PACING_MAX_MS", default_value_t = 2000)]
    pub pacing_max_ms: u64,

    /// Log a progress line every N records (0 disables)
    #[arg(long, env = "THUMBSEARCH_PROGRESS_EVERY", default_value_t = 25)]
    pub progress_every: usize,
}

impl Cli {
    /// Converts the parsed CLI into `IngestControls`.
    pub fn build_controls(&self) -> IngestControls {
        IngestControls::new(
            self.workers,
            PacingPolicy::jitter(
                Duration::from_millis(self.pacing_min_ms),
                Duration::from_millis(self.pacing_max_ms),
            ),
        )
        .with_progress_every(self.progress_every)
    }

    /// Embedding request timeout.
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs.max(1))
    }

    /// Thumbnail request timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn samples_stay_within_bounds() {
        let policy = PacingPolicy::jitter(Duration::from_millis(20), Duration::from_millis(5));
        assert_eq!(policy.min(), Duration::from_millis(5));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = policy.sample(&mut rng);
            assert!(d >= policy.min() && d <= policy.max(), "{d:?} out of range");
        }
        assert_eq!(PacingPolicy::none().sample(&mut rng), Duration::ZERO);
    }

    #[test]
    fn cli_builds_controls() {
        let cli = Cli::parse_from([
            "thumbsearch",
            "--channel",
            "C",
            "--workers",
            "0",
            "--pacing-min-ms",
            "10",
            "--pacing-max-ms",
            "30",
        ]);
        let controls = cli.build_controls();
        assert_eq!(controls.workers(), 1);
        assert_eq!(
            controls.pacing(),
            PacingPolicy::jitter(Duration::from_millis(10), Duration::from_millis(30))
        );
        assert_eq!(cli.n_results, 5);
    }

    #[test]
    fn refetch_and_reconcile_conflict() {
        let parsed = Cli::try_parse_from([
            "thumbsearch",
            "--channel",
            "C",
            "--refetch",
            "--reconcile",
        ]);
        assert!(parsed.is_err());
    }
}
