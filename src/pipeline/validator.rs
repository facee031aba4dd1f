//! Structured response extraction
//!
//! Remote endpoints answer with free text that is supposed to contain one
//! JSON object. The validator finds the first balanced `{...}` block, checks
//! it is well-formed JSON and decodes it into the caller's type.

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Reasons a raw response could not be turned into a typed result
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no structured data found in response")]
    NoStructuredDataFound,

    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// Semantic checks applied after a value decodes
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Returns the first balanced-brace block in `raw`
///
/// Braces inside JSON string literals are ignored, so `{"a": "}"}` is one
/// block.
pub fn extract_json_block(raw: &str) -> Result<&str, ValidationError> {
    let start = raw.find('{').ok_or(ValidationError::NoStructuredDataFound)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Ok(&raw[start..end]);
                }
            }
            _ => {}
        }
    }

    Err(ValidationError::MalformedData(
        "unbalanced braces in response".to_string(),
    ))
}

/// Extracts and decodes the first JSON object in `raw`
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ValidationError> {
    let block = extract_json_block(raw)?;

    let value: serde_json::Value =
        serde_json::from_str(block).map_err(|e| ValidationError::MalformedData(e.to_string()))?;

    serde_json::from_value(value).map_err(|e| ValidationError::SchemaMismatch(e.to_string()))
}

/// Like [`parse_structured`], then runs the value's own checks
pub fn parse_validated<T>(raw: &str) -> Result<T, ValidationError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = parse_structured(raw)?;
    value.validate().map_err(ValidationError::SchemaMismatch)?;
    Ok(value)
}
