//! Shared HTTP plumbing for the concrete jobs
//!
//! This module handles:
//! - Building HTTP clients with a user agent and timeouts
//! - Mapping transport errors and HTTP status codes to `RemoteError`

use crate::pipeline::RemoteError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Builds an HTTP client
///
/// # Arguments
///
/// * `user_agent` - Value of the `User-Agent` header
/// * `timeout` - Whole-request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .gzip(true)
        .brotli(true)
        .build()
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_connect() || e.is_request() || e.is_body() {
            RemoteError::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            classify_status(status, None)
        } else if e.is_decode() {
            RemoteError::InvalidRequest(format!("undecodable response: {}", e))
        } else {
            RemoteError::Connection(e.to_string())
        }
    }
}

/// Maps a non-success HTTP status to a `RemoteError`
///
/// | Status | Error |
/// |--------|-------|
/// | 408 | Timeout |
/// | 429 | RateLimited (with `Retry-After` seconds when present) |
/// | 401, 403 | Unauthorized |
/// | other 4xx | InvalidRequest |
/// | 5xx | Server |
pub fn classify_status(status: StatusCode, headers: Option<&HeaderMap>) -> RemoteError {
    match status {
        StatusCode::REQUEST_TIMEOUT => RemoteError::Timeout,
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited {
            retry_after: headers.and_then(retry_after),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        s if s.is_server_error() => RemoteError::Server { status: s.as_u16() },
        s => RemoteError::InvalidRequest(format!("HTTP {}", s.as_u16())),
    }
}

/// Parses a `Retry-After` header given in seconds
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_build_http_client() {
        let client = build_http_client("paperflow-test/0.1", Duration::from_secs(5));
        assert!(client.is_ok());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(StatusCode::REQUEST_TIMEOUT, None),
            RemoteError::Timeout
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, None),
            RemoteError::Unauthorized
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY, None),
            RemoteError::Server { status: 502 }
        );
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None),
            RemoteError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_rate_limit_reads_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));

        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(&headers)),
            RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(12))
            }
        );

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(&headers)),
            RemoteError::RateLimited { retry_after: None }
        );
    }
}
