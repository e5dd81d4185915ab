//! Answer generation with the Gemini `generateContent` REST endpoint.
//!
//! The prompt is the user's question followed by the extracted document
//! text under a `PDF Content:` heading. One request per call, no retries.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GeminiConfig;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Error generating response: failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Error generating response: request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Error generating response: backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Error generating response: malformed response: {0}")]
    Malformed(String),

    #[error("Error generating response: prompt was blocked ({0})")]
    Blocked(String),

    #[error("Error generating response: model returned no text")]
    Empty,
}

/// Produces an answer to a prompt, grounded in document text.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, document_text: &str) -> Result<String, GenerateError>;
}

/// Combine the user's prompt with the document text.
pub fn build_prompt(prompt: &str, document_text: &str) -> String {
    format!("{prompt}\n\nPDF Content:\n{document_text}")
}

pub struct GeminiGenerator {
    config: GeminiConfig,
    api_key: String,
    client: Client,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig, api_key: String) -> Result<Self, GenerateError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(GenerateError::Client)?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.host.trim_end_matches('/'),
            self.config.model
        )
    }

    fn request_body(&self, full_prompt: &str) -> serde_json::Value {
        json!({
            "contents": [
                { "role": "user", "parts": [ { "text": full_prompt } ] }
            ],
            "generationConfig": {
                "temperature": self.config.temperature,
                "topP": self.config.top_p,
                "topK": self.config.top_k
            }
        })
    }
}

#[async_trait]
impl ResponseGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str, document_text: &str) -> Result<String, GenerateError> {
        let full_prompt = build_prompt(prompt, document_text);
        debug!(
            "Sending to Gemini model '{}': {} chars ({} from document)",
            self.config.model,
            full_prompt.len(),
            document_text.len()
        );

        let t0 = Instant::now();
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(&full_prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    warn!("Cannot connect to Gemini at {}", self.config.host);
                } else if e.is_timeout() {
                    warn!("Gemini request timed out");
                }
                GenerateError::Request(e)
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(GenerateError::Request)?;
        if !status.is_success() {
            warn!("Gemini returned status {status}");
            return Err(GenerateError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let text = parse_response(&body)?;
        info!(
            "Gemini answered with {} chars in {:.0}ms",
            text.len(),
            t0.elapsed().as_secs_f64() * 1000.0
        );
        Ok(text)
    }
}

// --- Response parsing ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Text of the first candidate, parts joined in order.
fn parse_response(body: &str) -> Result<String, GenerateError> {
    let data: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| GenerateError::Malformed(e.to_string()))?;

    if let Some(reason) = data.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerateError::Blocked(reason));
    }

    let Some(candidate) = data.candidates.into_iter().next() else {
        return Err(GenerateError::Empty);
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        if let Some(reason) = candidate.finish_reason {
            debug!("Gemini candidate finished with {reason} and no text");
        }
        return Err(GenerateError::Empty);
    }
    Ok(text)
}

/// Pull `error.message` out of an error body, or fall back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
