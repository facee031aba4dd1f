//! Configuration module for Paperflow
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use paperflow::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("paperflow.toml")).unwrap();
//! println!("Workers: {}", config.pipeline.max_concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, InputConfig, JobConfig, JobKind, LlmConfig, OutputConfig, OutputFormat,
    PipelineConfig, RetryConfig, ScraperConfig, ValidationConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::{validate, MAX_CONCURRENCY};
