//! Item source
//!
//! Work items are read from a JSON Lines file, one item per line. The
//! position of a line among the non-blank lines is the item's index.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading the item source
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid item on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize item {index}: {source}")]
    Serialize {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Loads every item from a JSON Lines file
///
/// Blank lines are skipped. Parse errors carry the 1-based line number.
pub fn load_items<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, InputError> {
    let file = File::open(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut items = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if line.trim().is_empty() {
            continue;
        }

        let item = serde_json::from_str(&line)
            .map_err(|source| InputError::Parse { line: i + 1, source })?;
        items.push(item);
    }

    tracing::debug!("Loaded {} items from {}", items.len(), path.display());

    Ok(items)
}

/// Computes a SHA-256 fingerprint of an item list
///
/// Covers each item's JSON serialization and its position, so reordering,
/// editing, adding or removing items changes the fingerprint.
pub fn fingerprint_items<T: Serialize>(items: &[T]) -> Result<String, InputError> {
    let mut hasher = Sha256::new();
    hasher.update((items.len() as u64).to_le_bytes());

    for (index, item) in items.iter().enumerate() {
        let encoded =
            serde_json::to_vec(item).map_err(|source| InputError::Serialize { index, source })?;
        hasher.update((encoded.len() as u64).to_le_bytes());
        hasher.update(&encoded);
    }

    Ok(hex::encode(hasher.finalize()))
}
