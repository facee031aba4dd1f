//! Final result file
//!
//! The complete, index-ordered result table is written to a temporary file
//! next to the destination and renamed into place, so readers never observe
//! a half-written output.

use crate::config::OutputFormat;
use crate::state::ItemResult;
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors raised while writing the output file
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record {index}: {source}")]
    Serialize {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// One row of the output file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord<T> {
    pub index: usize,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl<T: Clone> OutputRecord<T> {
    pub fn from_result(index: usize, result: &ItemResult<T>) -> Self {
        Self {
            index,
            status: result.status_str(),
            payload: result.payload().cloned(),
            reason: result.reason().map(str::to_string),
        }
    }
}

/// Writes `records` to `path` atomically
///
/// # Arguments
///
/// * `path` - Destination file
/// * `format` - JSON array or JSON Lines
/// * `records` - Rows in output order
pub fn write_output<T: Serialize>(
    path: &Path,
    format: OutputFormat,
    records: &[OutputRecord<T>],
) -> Result<(), OutputError> {
    let io_err = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());

        match format {
            OutputFormat::Json => {
                writer.write_all(b"[\n").map_err(io_err)?;
                for (i, record) in records.iter().enumerate() {
                    if i > 0 {
                        writer.write_all(b",\n").map_err(io_err)?;
                    }
                    serde_json::to_writer_pretty(&mut writer, record).map_err(|source| {
                        OutputError::Serialize {
                            index: record.index,
                            source,
                        }
                    })?;
                }
                writer.write_all(b"\n]\n").map_err(io_err)?;
            }
            OutputFormat::Jsonl => {
                for record in records {
                    serde_json::to_writer(&mut writer, record).map_err(|source| {
                        OutputError::Serialize {
                            index: record.index,
                            source,
                        }
                    })?;
                    writer.write_all(b"\n").map_err(io_err)?;
                }
            }
        }

        writer.flush().map_err(io_err)?;
    }

    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    tracing::info!("Wrote {} records to {}", records.len(), path.display());

    Ok(())
}
