use crate::config::types::{
    Config, JobKind, LlmConfig, OutputConfig, PipelineConfig, RetryConfig, ScraperConfig,
    ValidationConfig,
};
use crate::ConfigError;
use url::Url;

/// Upper bound on worker concurrency
pub const MAX_CONCURRENCY: usize = 256;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_pipeline_config(&config.pipeline)?;
    validate_retry_config(&config.retry)?;
    validate_validation_config(&config.validation, &config.retry)?;
    validate_output_config(&config.output)?;

    if config.input.path.is_empty() {
        return Err(ConfigError::Validation(
            "input path cannot be empty".to_string(),
        ));
    }

    match config.job.kind {
        JobKind::Classify => {
            let llm = config.llm.as_ref().ok_or_else(|| ConfigError::MissingSection {
                section: "llm".to_string(),
                kind: config.job.kind.as_str().to_string(),
            })?;
            validate_llm_config(llm)?;
        }
        JobKind::Scrape => {
            let scraper = config
                .scraper
                .as_ref()
                .ok_or_else(|| ConfigError::MissingSection {
                    section: "scraper".to_string(),
                    kind: config.job.kind.as_str().to_string(),
                })?;
            validate_scraper_config(scraper)?;
        }
    }

    Ok(())
}

/// Validates worker pool and cadence settings
fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 || config.max_concurrency > MAX_CONCURRENCY {
        return Err(ConfigError::Validation(format!(
            "max_concurrency must be between 1 and {}, got {}",
            MAX_CONCURRENCY, config.max_concurrency
        )));
    }

    if config.checkpoint_every < 1 {
        return Err(ConfigError::Validation(format!(
            "checkpoint_every must be >= 1, got {}",
            config.checkpoint_every
        )));
    }

    if config.test_mode_sample_size == Some(0) {
        return Err(ConfigError::Validation(
            "test_mode_sample_size must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates the backoff policy for remote calls
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "retry max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    validate_delays("retry", config.min_delay_ms, config.max_delay_ms)
}

/// Validates the parse-retry budget
///
/// The parse budget may not exceed the network budget.
fn validate_validation_config(
    config: &ValidationConfig,
    retry: &RetryConfig,
) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "validation max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.max_attempts > retry.max_attempts {
        return Err(ConfigError::Validation(format!(
            "validation max_attempts ({}) must not exceed retry max_attempts ({})",
            config.max_attempts, retry.max_attempts
        )));
    }

    validate_delays("validation", config.min_delay_ms, config.max_delay_ms)
}

fn validate_delays(section: &str, min_delay_ms: u64, max_delay_ms: u64) -> Result<(), ConfigError> {
    if min_delay_ms > max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "{} min_delay_ms ({}) must be <= max_delay_ms ({})",
            section, min_delay_ms, max_delay_ms
        )));
    }
    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.checkpoint_path.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint_path cannot be empty".to_string(),
        ));
    }

    if config.output_path.is_empty() {
        return Err(ConfigError::Validation(
            "output_path cannot be empty".to_string(),
        ));
    }

    if config.checkpoint_path == config.output_path {
        return Err(ConfigError::Validation(
            "checkpoint_path and output_path must differ".to_string(),
        ));
    }

    Ok(())
}

/// Validates the chat-completion endpoint settings
fn validate_llm_config(config: &LlmConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.api_base)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api_base: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "api_base '{}' must use http or https",
            config.api_base
        )));
    }

    if config.model.is_empty() {
        return Err(ConfigError::Validation("model cannot be empty".to_string()));
    }

    if config.api_key_env.is_empty() {
        return Err(ConfigError::Validation(
            "api_key_env cannot be empty".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "llm request_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates page fetcher settings
fn validate_scraper_config(config: &ScraperConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "scraper request_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}
