use serde::Deserialize;

/// Main configuration structure for Paperflow
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub job: JobConfig,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub scraper: Option<ScraperConfig>,
}

/// Worker pool and checkpoint cadence
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of items in flight at once
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: usize,

    /// Number of completed items between checkpoint saves
    #[serde(rename = "checkpoint-every")]
    pub checkpoint_every: usize,

    /// Process only the first N items (dry runs against a live endpoint)
    #[serde(rename = "test-mode-sample-size", default)]
    pub test_mode_sample_size: Option<usize>,
}

/// Backoff policy for transient remote failures
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per remote call, including the first
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Lower bound of every backoff sleep (milliseconds)
    #[serde(rename = "min-delay-ms")]
    pub min_delay_ms: u64,

    /// Upper bound of every backoff sleep (milliseconds)
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,
}

/// Budget for regenerating a response that failed to parse
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(rename = "min-delay-ms")]
    pub min_delay_ms: u64,

    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 1_000,
            max_delay_ms: 20_000,
        }
    }
}

/// Item source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// Path to a JSON Lines file, one work item per line
    pub path: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite checkpoint database
    #[serde(rename = "checkpoint-path")]
    pub checkpoint_path: String,

    /// Path to the final ordered result file
    #[serde(rename = "output-path")]
    pub output_path: String,

    #[serde(default)]
    pub format: OutputFormat,
}

/// Serialization of the final result file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// A single pretty-printed JSON array
    #[default]
    Json,
    /// One JSON object per line
    Jsonl,
}

/// Which concrete job the pipeline drives
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub kind: JobKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Ask a chat-completion endpoint whether each paper is relevant
    Classify,
    /// Fetch each paper page and extract its metadata
    Scrape,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Scrape => "scrape",
        }
    }
}

/// Chat-completion endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (e.g. "https://api.openai.com/v1")
    #[serde(rename = "api-base")]
    pub api_base: String,

    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(rename = "api-key-env", default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(rename = "request-timeout-secs", default = "default_llm_timeout")]
    pub request_timeout_secs: u64,

    /// Overrides the built-in relevance prompt
    #[serde(rename = "system-prompt", default)]
    pub system_prompt: Option<String>,
}

/// Page fetcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    #[serde(rename = "request-timeout-secs", default = "default_scraper_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_scraper_timeout() -> u64 {
    30
}
