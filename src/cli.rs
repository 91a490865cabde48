use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::services::generation::DEFAULT_GENERATION_BASE_URL;

#[derive(Parser, Debug)]
#[command(
    name = "expertfind",
    version,
    about = "Reviewer fitness ranking, justification, and cross-run analysis tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Profile(ProfileArgs),
    Rank(RankArgs),
    Consolidate(ConsolidateArgs),
    Agreement(AgreementArgs),
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum AggregationMode {
    Aggregate,
    Summarize,
}

impl AggregationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate",
            Self::Summarize => "summarize",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbeddingBackend {
    LocalHash,
    OpenaiCompat,
}

impl EmbeddingBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalHash => "local-hash",
            Self::OpenaiCompat => "openai-compat",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProfileArgs {
    #[arg(long, default_value = "./database.jsonl")]
    pub database: PathBuf,

    #[arg(long, default_value = "./author_profile.json")]
    pub profile_cache: PathBuf,

    #[arg(long, default_value = "log")]
    pub log_dir: PathBuf,

    #[arg(long, default_value = "qwen-plus")]
    pub llm: String,

    #[arg(long, default_value = DEFAULT_GENERATION_BASE_URL)]
    pub llm_base_url: String,

    /// Rebuild the cache even when a profile snapshot already exists.
    #[arg(long, default_value_t = false)]
    pub refresh: bool,

    /// Build profiles without narrative summaries (no generation calls).
    #[arg(long, default_value_t = false)]
    pub skip_summaries: bool,

    #[arg(long, default_value_t = 200)]
    pub summary_words: usize,

    /// Estimated-token ceiling for the publication block handed to the
    /// summarizer.
    #[arg(long, default_value_t = 6000)]
    pub token_budget: usize,

    #[arg(long, default_value_t = 10_000)]
    pub fetch_timeout_ms: u64,

    #[arg(long, default_value_t = 10)]
    pub retry_attempts: usize,

    #[arg(long, default_value_t = 3)]
    pub retry_delay_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct RankArgs {
    #[arg(long, default_value = "./query.json")]
    pub queries: PathBuf,

    #[arg(long, default_value = "./database.jsonl")]
    pub database: PathBuf,

    #[arg(long, default_value = "./author_profile.json")]
    pub profile_cache: PathBuf,

    #[arg(long, default_value = "log")]
    pub log_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = AggregationMode::Aggregate)]
    pub mode: AggregationMode,

    #[arg(long, default_value_t = 10)]
    pub top_k: usize,

    /// Run only the selected query indices (default: every query in the file).
    #[arg(long = "query-index")]
    pub query_indices: Vec<usize>,

    /// Stop after ranking and the fitness score file; skip justification
    /// generation.
    #[arg(long, default_value_t = false)]
    pub rank_only: bool,

    #[arg(long, value_enum, default_value_t = EmbeddingBackend::LocalHash)]
    pub embedding_backend: EmbeddingBackend,

    /// Embedding model identifier; resolved to a backend default when empty.
    #[arg(long, default_value = "")]
    pub embedding_model: String,

    #[arg(long, default_value_t = 384)]
    pub embedding_dim: usize,

    #[arg(long, default_value = DEFAULT_GENERATION_BASE_URL)]
    pub embedding_base_url: String,

    #[arg(long, default_value = "qwen-plus")]
    pub llm: String,

    #[arg(long, default_value = DEFAULT_GENERATION_BASE_URL)]
    pub llm_base_url: String,

    #[arg(long, default_value_t = 10)]
    pub retry_attempts: usize,

    #[arg(long, default_value_t = 3)]
    pub retry_delay_secs: u64,

    /// Pause between successive justification requests, to stay polite with
    /// the upstream service.
    #[arg(long, default_value_t = 2)]
    pub request_gap_secs: u64,

    #[arg(long, default_value_t = 200)]
    pub summary_words: usize,

    #[arg(long, default_value_t = 6000)]
    pub token_budget: usize,

    #[arg(long, default_value_t = 10_000)]
    pub fetch_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ConsolidateArgs {
    #[arg(long, default_value = "log")]
    pub log_dir: PathBuf,

    /// Modes to consolidate (default: both).
    #[arg(long = "mode", value_enum)]
    pub modes: Vec<AggregationMode>,

    /// Query indices to consolidate (default: discovered from the log
    /// directory).
    #[arg(long = "query")]
    pub queries: Vec<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct AgreementArgs {
    #[arg(long, default_value = "log")]
    pub log_dir: PathBuf,

    /// Scoring systems to compare (default: gpt, gemini, summarize,
    /// aggregate).
    #[arg(long = "system")]
    pub systems: Vec<String>,

    /// Query/document ids to compare (default: discovered from the
    /// consolidated directories).
    #[arg(long = "doc-id")]
    pub doc_ids: Vec<String>,

    #[arg(long, default_value_t = 10)]
    pub top_n: usize,

    #[arg(long, default_value = "agreement_report.csv")]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "log")]
    pub log_dir: PathBuf,

    #[arg(long, default_value = "./author_profile.json")]
    pub profile_cache: PathBuf,

    #[arg(long, default_value = "./database.jsonl")]
    pub database: PathBuf,

    #[arg(long, default_value = "agreement_report.csv")]
    pub agreement_report: PathBuf,
}
