//! Vision model client: one (prompt, image) pair in, plain text out.
//!
//! [`VisionModel`] is the seam the chain runner talks to; [`GeminiClient`]
//! is the production implementation against Google's `generateContent`
//! REST endpoint. Tests and embedders inject their own implementation via
//! [`crate::config::ChainConfigBuilder::model_client`].
//!
//! ## Envelope
//!
//! The text of a completion lives at `candidates[0].content.parts[0].text`.
//! Any deviation (blocked prompt with no candidates, a candidate without
//! content, a non-text first part) is reported as
//! [`ModelError::UnexpectedEnvelope`] rather than defaulted to an empty
//! string, so "the model said nothing" is never confused with "no documents".

use crate::config::ChainConfig;
use crate::error::{DocChainError, ModelError};
use crate::pipeline::encode::ImagePayload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default Gemini REST base URL.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default Gemini model.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Raw text returned by the model for one stage, plus reported usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A vision-capable completion provider.
///
/// Implementations must not retain or modify the image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, image: &ImagePayload) -> Result<Completion, ModelError>;
}

/// Client for Gemini `models/{model}:generateContent`.
pub struct GeminiClient {
    client: reqwest::Client,
    timeout_secs: u64,
    endpoint: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GeminiClient {
    /// Build a client with its own connection pool and request timeout.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, DocChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DocChainError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// Build a client from the config, falling back to `GEMINI_API_KEY`.
    pub fn from_config(config: &ChainConfig) -> Result<Self, DocChainError> {
        let api_key = match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => key.to_string(),
            None => std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| DocChainError::ProviderNotConfigured {
                    provider: "gemini".to_string(),
                    hint: "Set GEMINI_API_KEY or pass --api-key.".to_string(),
                })?,
        };
        Self::new(
            api_key,
            &config.model,
            &config.endpoint,
            config.api_timeout_secs,
        )
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    fn transport_error(&self, e: reqwest::Error) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            ModelError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl VisionModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, image: &ImagePayload) -> Result<Completion, ModelError> {
        let body = build_request(prompt, image);

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body, retry_after_secs));
        }

        let envelope: GenerateContentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                ModelError::UnexpectedEnvelope(format!("invalid JSON body: {e}"))
            }
        })?;

        let completion = completion_from_envelope(envelope)?;
        debug!(
            "{}: {} input tokens, {} output tokens, {} chars",
            self.model,
            completion.input_tokens,
            completion.output_tokens,
            completion.text.len()
        );
        Ok(completion)
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

/// Request body carrying the prompt text and the inline image.
fn build_request<'a>(prompt: &'a str, image: &'a ImagePayload) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
        contents: vec![RequestContent {
            parts: vec![
                RequestPart::Text { text: prompt },
                RequestPart::InlineData {
                    inline_data: InlineData {
                        mime_type: image.mime_type(),
                        data: image.to_base64(),
                    },
                },
            ],
        }],
    }
}

/// Pull `candidates[0].content.parts[0].text` out of the envelope.
fn completion_from_envelope(envelope: GenerateContentResponse) -> Result<Completion, ModelError> {
    let usage = envelope.usage_metadata.unwrap_or_default();

    let candidate = envelope
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::UnexpectedEnvelope("response has no candidates".into()))?;

    let finish_reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
    let content = candidate.content.ok_or_else(|| {
        ModelError::UnexpectedEnvelope(format!(
            "first candidate has no content (finishReason: {finish_reason})"
        ))
    })?;

    let text = content
        .parts
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::UnexpectedEnvelope("first candidate has no parts".into()))?
        .text
        .ok_or_else(|| ModelError::UnexpectedEnvelope("first part is not text".into()))?;

    Ok(Completion {
        text,
        input_tokens: usage.prompt_token_count,
        output_tokens: usage.candidates_token_count,
    })
}

fn status_error(status: u16, body: String, retry_after_secs: Option<u64>) -> ModelError {
    match status {
        401 | 403 => ModelError::Auth { detail: body },
        429 => ModelError::RateLimited { retry_after_secs },
        _ => ModelError::Api { status, body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(v: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(v).expect("envelope deserialises")
    }

    #[test]
    fn request_body_matches_generate_content_shape() {
        let image = ImagePayload::new(b"abc".to_vec(), "image/png");
        let body = serde_json::to_value(build_request("classify", &image)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{
                    "parts": [
                        {"text": "classify"},
                        {"inline_data": {"mime_type": "image/png", "data": "YWJj"}}
                    ]
                }]
            })
        );
    }

    #[test]
    fn extracts_first_candidate_first_part() {
        let completion = completion_from_envelope(envelope(json!({
            "candidates": [
                {"content": {"parts": [{"text": "[\"Procuração\"]"}, {"text": "ignored"}]}},
                {"content": {"parts": [{"text": "second candidate"}]}}
            ],
            "usageMetadata": {"promptTokenCount": 1200, "candidatesTokenCount": 8}
        })))
        .unwrap();
        assert_eq!(completion.text, "[\"Procuração\"]");
        assert_eq!(completion.input_tokens, 1200);
        assert_eq!(completion.output_tokens, 8);
    }

    #[test]
    fn missing_usage_defaults_to_zero() {
        let completion = completion_from_envelope(envelope(json!({
            "candidates": [{"content": {"parts": [{"text": "[]"}]}}]
        })))
        .unwrap();
        assert_eq!(completion, Completion::new("[]"));
    }

    #[test]
    fn empty_candidates_is_an_error() {
        let err = completion_from_envelope(envelope(json!({
            "candidates": [],
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .unwrap_err();
        assert!(matches!(err, ModelError::UnexpectedEnvelope(_)));
        assert!(err.to_string().contains("no candidates"));
    }

    #[test]
    fn absent_candidates_is_an_error() {
        let err = completion_from_envelope(envelope(json!({}))).unwrap_err();
        assert!(matches!(err, ModelError::UnexpectedEnvelope(_)));
    }

    #[test]
    fn candidate_without_content_reports_finish_reason() {
        let err = completion_from_envelope(envelope(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        })))
        .unwrap_err();
        assert!(err.to_string().contains("SAFETY"), "got: {err}");
    }

    #[test]
    fn empty_parts_and_non_text_parts_are_errors() {
        let err = completion_from_envelope(envelope(json!({
            "candidates": [{"content": {"parts": []}}]
        })))
        .unwrap_err();
        assert!(err.to_string().contains("no parts"));

        let err = completion_from_envelope(envelope(json!({
            "candidates": [{"content": {"parts": [{"inlineData": {}}]}}]
        })))
        .unwrap_err();
        assert!(err.to_string().contains("not text"));
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert!(matches!(status_error(401, "bad key".into(), None), ModelError::Auth { .. }));
        assert!(matches!(status_error(403, String::new(), None), ModelError::Auth { .. }));
        assert!(matches!(
            status_error(429, String::new(), Some(7)),
            ModelError::RateLimited {
                retry_after_secs: Some(7)
            }
        ));
        assert!(matches!(
            status_error(500, "oops".into(), None),
            ModelError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn debug_redacts_api_key() {
        let client = GeminiClient::new("secret-key", DEFAULT_MODEL, DEFAULT_ENDPOINT, 5).unwrap();
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("gemini-1.5-flash"));
    }

    /// Accepts connections on a local port and never answers them.
    async fn silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}/v1beta")
    }

    #[tokio::test]
    async fn unanswered_request_is_a_timeout() {
        let endpoint = silent_server().await;
        let client = GeminiClient::new("k", DEFAULT_MODEL, endpoint, 1).unwrap();
        let image = ImagePayload::new(b"abc".to_vec(), "image/png");

        let err = client.complete("classify", &image).await.unwrap_err();
        assert!(matches!(err, ModelError::Timeout { secs: 1 }), "got: {err}");
    }

    #[test]
    fn url_trims_trailing_slash() {
        let client = GeminiClient::new("k", "gemini-1.5-pro", "http://localhost:8080/v1beta/", 5)
            .unwrap();
        assert_eq!(
            client.url(),
            "http://localhost:8080/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }
}
