//! Concrete jobs
//!
//! - `classify`: paper relevance through a chat-completion endpoint
//! - `scrape`: paper metadata from conference pages

pub mod classify;
mod http;
pub mod scrape;

pub use classify::{ChatClient, ClassifyJob, Paper, Relevance, DEFAULT_SYSTEM_PROMPT};
pub use http::{build_http_client, classify_status};
pub use scrape::{parse_paper_page, PageFetcher, PaperDetails, PaperLink, ScrapeJob};
