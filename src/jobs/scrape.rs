//! Paper page scraping
//!
//! Fetches a conference paper page and extracts its presentation format,
//! title, authors and abstract with CSS selectors.

use crate::config::ScraperConfig;
use crate::jobs::http::{build_http_client, classify_status};
use crate::pipeline::{Job, RemoteError, ValidationError};
use crate::PaperflowError;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder stored when a page has no abstract
pub const ABSTRACT_NOT_FOUND: &str = "Abstract text not found";

const FORMAT_SELECTOR: &str = "h3.text-center";
const TITLE_SELECTOR: &str = ".card-title.main-title.text-center";
const AUTHORS_SELECTOR: &str = ".card-subtitle.mb-2.text-muted.text-center";
const ABSTRACT_CONTAINER_SELECTOR: &str = "#abstract_details";

/// Tried in order inside the abstract container
const ABSTRACT_SELECTORS: [&str; 4] = ["p.card-text", "#abstractExample", ".card-body p", "p"];

/// A paper page to scrape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperLink {
    pub url: String,
}

/// Metadata extracted from a paper page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperDetails {
    /// Presentation format, e.g. "Poster" or "Oral"
    pub format: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub url: String,
}

/// Fetches paper pages over HTTP
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &ScraperConfig) -> Result<Self, PaperflowError> {
        let client = build_http_client(
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::new(client))
    }

    /// GETs `url` and returns the body
    pub async fn fetch(&self, url: &str) -> Result<String, RemoteError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, Some(response.headers())));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(RemoteError::EmptyResponse);
        }

        Ok(body)
    }
}

/// Extracts paper metadata from page HTML
///
/// # Errors
///
/// * `NoStructuredDataFound` - The page has no paper title (not a paper page)
/// * `SchemaMismatch` - The format or author line is missing
pub fn parse_paper_page(html: &str, url: &str) -> Result<PaperDetails, ValidationError> {
    let document = Html::parse_document(html);

    let title =
        first_text(&document, TITLE_SELECTOR)?.ok_or(ValidationError::NoStructuredDataFound)?;

    let format = first_text(&document, FORMAT_SELECTOR)?
        .ok_or_else(|| ValidationError::SchemaMismatch("missing presentation format".into()))?;

    let authors: Vec<String> = first_text(&document, AUTHORS_SELECTOR)?
        .ok_or_else(|| ValidationError::SchemaMismatch("missing author line".into()))?
        .split('·')
        .map(|author| author.trim().to_string())
        .filter(|author| !author.is_empty())
        .collect();

    let abstract_text = extract_abstract(&document)?;

    Ok(PaperDetails {
        format,
        title,
        authors,
        abstract_text,
        url: url.to_string(),
    })
}

fn selector(css: &str) -> Result<Selector, ValidationError> {
    Selector::parse(css)
        .map_err(|e| ValidationError::MalformedData(format!("selector {}: {:?}", css, e)))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whitespace-normalized text of the first match, if non-empty
fn first_text(document: &Html, css: &str) -> Result<Option<String>, ValidationError> {
    let selector = selector(css)?;
    Ok(document
        .select(&selector)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty()))
}

fn extract_abstract(document: &Html) -> Result<String, ValidationError> {
    let container_selector = selector(ABSTRACT_CONTAINER_SELECTOR)?;
    let Some(container) = document.select(&container_selector).next() else {
        return Ok(ABSTRACT_NOT_FOUND.to_string());
    };

    for css in ABSTRACT_SELECTORS {
        let selector = selector(css)?;
        if let Some(element) = container.select(&selector).next() {
            // First "Abstract:" label anywhere in the text
            let text = element_text(element).replacen("Abstract:", "", 1);
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !text.is_empty() {
                return Ok(text);
            }
        }
    }

    Ok(ABSTRACT_NOT_FOUND.to_string())
}

/// Scrapes paper pages into structured metadata
pub struct ScrapeJob {
    fetcher: PageFetcher,
}

impl ScrapeJob {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self { fetcher }
    }

    pub fn from_config(config: &ScraperConfig) -> Result<Self, PaperflowError> {
        Ok(Self::new(PageFetcher::from_config(config)?))
    }
}

#[async_trait]
impl Job for ScrapeJob {
    type Item = PaperLink;
    type Output = PaperDetails;

    fn name(&self) -> &str {
        "scrape"
    }

    async fn call(&self, link: &PaperLink) -> Result<String, RemoteError> {
        self.fetcher.fetch(&link.url).await
    }

    fn parse(&self, link: &PaperLink, raw: &str) -> Result<PaperDetails, ValidationError> {
        parse_paper_page(raw, &link.url)
    }

    fn fallback(&self, link: &PaperLink) -> PaperDetails {
        PaperDetails {
            format: String::new(),
            title: String::new(),
            authors: Vec::new(),
            abstract_text: String::new(),
            url: link.url.clone(),
        }
    }
}
