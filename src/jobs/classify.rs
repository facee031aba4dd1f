//! Paper relevance classification through a chat-completion endpoint
//!
//! Each paper's title and abstract are sent to an OpenAI-compatible
//! `/chat/completions` endpoint together with a system prompt describing the
//! research area. The model answers with a JSON object carrying a short
//! justification and a boolean verdict.

use crate::config::LlmConfig;
use crate::jobs::http::{build_http_client, classify_status};
use crate::pipeline::{parse_validated, Job, RemoteError, Validate, ValidationError};
use crate::{ConfigError, PaperflowError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Default instructions for the classifier
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an AI assistant tasked with determining the relevance of research papers to the field of \
Machine Learning Data Curation. This field includes, but is not limited to, the following topics: \
synthetic data generation, continuous pre-training, multimodal data curation, text data curation, \
data mixing, data augmentation, data filtering, data pruning, deduplication, target distribution \
matching, heuristic filtering, and automated curation.

You are given a research paper title and abstract. Your task is to determine if the paper is \
relevant to the field of Machine Learning Data Curation, also called Data-Centric AI.

Please first reason and provide a justification for your answer. Then, provide your answer as a \
boolean value. Please respond in JSON format with the following two fields:
- justification: A justification for your answer. Please be very concise and to the point.
- is_relevant: A boolean value indicating if the paper is relevant to the field of Machine Learning \
Data Curation.";

/// A paper to classify
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub title: String,

    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

/// The classifier's verdict for one paper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relevance {
    pub justification: String,
    pub is_relevant: bool,
}

impl Validate for Relevance {
    fn validate(&self) -> Result<(), String> {
        if self.justification.trim().is_empty() {
            return Err("verdict without justification".to_string());
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Minimal OpenAI-compatible chat client
pub struct ChatClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl ChatClient {
    /// Creates a client for `{api_base}/chat/completions`
    pub fn new(
        client: Client,
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let endpoint = format!("{}/chat/completions", api_base.trim_end_matches('/'));
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", api_base, e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Builds a client from the `[llm]` section, reading the key from the environment
    pub fn from_config(config: &LlmConfig) -> Result<Self, PaperflowError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| ConfigError::MissingEnv(config.api_key_env.clone()))?;

        let user_agent = format!("paperflow/{}", env!("CARGO_PKG_VERSION"));
        let client = build_http_client(
            &user_agent,
            Duration::from_secs(config.request_timeout_secs),
        )?;

        Ok(Self::new(client, &config.api_base, api_key, &config.model)?)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends one system + user exchange and returns the assistant's text
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, RemoteError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, Some(response.headers())));
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            RemoteError::Connection(format!("unreadable completion body: {}", e))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(RemoteError::EmptyResponse)
    }
}

/// Classifies papers as relevant or not
pub struct ClassifyJob {
    client: ChatClient,
    system_prompt: String,
}

impl ClassifyJob {
    pub fn new(client: ChatClient, system_prompt: Option<String>) -> Self {
        Self {
            client,
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, PaperflowError> {
        let client = ChatClient::from_config(config)?;
        Ok(Self::new(client, config.system_prompt.clone()))
    }
}

/// Formats the user message for one paper
pub fn user_prompt(paper: &Paper) -> String {
    format!("Title: {}\nAbstract: {}", paper.title, paper.abstract_text)
}

#[async_trait]
impl Job for ClassifyJob {
    type Item = Paper;
    type Output = Relevance;

    fn name(&self) -> &str {
        "classify"
    }

    async fn call(&self, paper: &Paper) -> Result<String, RemoteError> {
        self.client
            .complete(&self.system_prompt, &user_prompt(paper))
            .await
    }

    fn parse(&self, _paper: &Paper, raw: &str) -> Result<Relevance, ValidationError> {
        parse_validated(raw)
    }

    fn fallback(&self, _paper: &Paper) -> Relevance {
        Relevance {
            justification: String::new(),
            is_relevant: false,
        }
    }
}
