//! AI enrichment client
//!
//! [`EnrichmentProvider`] is the seam between the sync engine and the
//! generative AI service. [`HttpEnrichmentClient`] talks to an
//! OpenAI-compatible chat-completions endpoint and asks for a JSON object
//! with the fields of [`AiResponse`].
//!
//! # Error mapping
//! - HTTP 429 → `RateLimited` (with `Retry-After` when present)
//! - 5xx, timeouts, connection failures → `Transient`
//! - unparseable body or content → `InvalidResponse`
//! - any other 4xx → `Rejected`
//!
//! Requests are paced by a shared `governor` quota so concurrent workers
//! stay under the provider's per-minute limit.

use crate::error::EnrichmentError;
use crate::types::{AiResponse, CandidateItem, LabelField};
use crate::vocabulary::VocabularyStore;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use govsync_common::config::AiConfig;
use govsync_common::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Everything the provider needs to enrich one candidate
#[derive(Debug, Clone)]
pub struct EnrichmentRequest {
    pub candidate: CandidateItem,
}

impl EnrichmentRequest {
    pub fn new(candidate: CandidateItem) -> Self {
        Self { candidate }
    }
}

/// Source of AI enrichment
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn enrich(&self, request: &EnrichmentRequest) -> std::result::Result<AiResponse, EnrichmentError>;
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

// ============================================================================
// Prompt
// ============================================================================

/// Builds the system and user prompts for one candidate
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system: String,
}

impl PromptBuilder {
    /// Embed every vocabulary in the system prompt
    pub fn new(store: &VocabularyStore) -> Self {
        let mut system = String::from(
            "You summarize and classify Israeli government decisions. \
             Answer with a single JSON object with the keys \
             \"summary\" (Hebrew, 2-4 complete sentences), \
             \"classification\" (\"operative\" or \"non-operative\"), \
             \"policy_areas\", \"government_bodies\" and \"locations\" \
             (arrays of labels). Use only labels from the lists below; \
             omit a label rather than invent one.\n",
        );
        for field in LabelField::ALL {
            let vocabulary = store.get(field);
            system.push_str(&format!("\n{}:\n", field));
            for label in vocabulary.labels() {
                system.push_str("- ");
                system.push_str(label);
                system.push('\n');
            }
        }
        Self { system }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system
    }

    pub fn user_prompt(&self, candidate: &CandidateItem) -> String {
        let mut prompt = format!(
            "Decision {} ({})\nTitle: {}\n",
            candidate.key,
            candidate.date.format("%Y-%m-%d"),
            candidate.title
        );
        if let Some(committee) = &candidate.committee {
            prompt.push_str(&format!("Committee: {}\n", committee));
        }
        prompt.push('\n');
        prompt.push_str(&candidate.body);
        prompt
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// OpenAI-compatible chat-completions client
pub struct HttpEnrichmentClient {
    http: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: String,
    prompts: PromptBuilder,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl HttpEnrichmentClient {
    pub fn new(config: &AiConfig, api_key: String, store: &VocabularyStore) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            prompts: PromptBuilder::new(store),
            limiter,
        })
    }

    fn headers(&self) -> std::result::Result<HeaderMap, EnrichmentError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| EnrichmentError::Rejected("API key is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl EnrichmentProvider for HttpEnrichmentClient {
    async fn enrich(&self, request: &EnrichmentRequest) -> std::result::Result<AiResponse, EnrichmentError> {
        self.limiter.until_ready().await;

        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.prompts.system_prompt().to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: self.prompts.user_prompt(&request.candidate),
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
        };

        debug!(
            decision_key = %request.candidate.key,
            model = %self.model,
            "AI enrichment request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| EnrichmentError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &text));
        }

        let text = response
            .text()
            .await
            .map_err(|e| EnrichmentError::Transient(e.to_string()))?;
        parse_chat_response(&text)
    }
}

/// Map a non-success status to an enrichment error
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> EnrichmentError {
    let detail = format!("{}: {}", status, truncate(body, 200));
    if status == StatusCode::TOO_MANY_REQUESTS {
        EnrichmentError::RateLimited { retry_after }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        EnrichmentError::Transient(detail)
    } else {
        EnrichmentError::Rejected(detail)
    }
}

/// `Retry-After` in delta-seconds form
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Extract the AI payload from a chat-completions body
pub fn parse_chat_response(text: &str) -> std::result::Result<AiResponse, EnrichmentError> {
    let chat: ChatResponse = serde_json::from_str(text)
        .map_err(|e| EnrichmentError::InvalidResponse(format!("envelope: {}", e)))?;
    let content = chat
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| EnrichmentError::InvalidResponse("no content in response".into()))?;

    serde_json::from_str(strip_code_fence(&content))
        .map_err(|e| EnrichmentError::InvalidResponse(format!("content: {}", e)))
}

/// Models sometimes wrap JSON in a ```json fence despite the response format
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
