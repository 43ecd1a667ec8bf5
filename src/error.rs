//! Error types for the docchain library.
//!
//! Three failure modes, plus [`ImageError`] which tags a fatal error with
//! its image label inside a batch:
//!
//! * [`DocChainError`]: **Fatal**. The chain for an image cannot produce a
//!   trustworthy result (unreadable input, provider not configured, the
//!   vision API failed or timed out). Returned as `Err(DocChainError)` from
//!   the top-level `process*` functions.
//!
//! * [`ModelError`]: a single call to the vision provider failed. The chain
//!   runner wraps it in [`DocChainError::StageFailed`] with the stage number.
//!
//! * [`ParseFailure`]: **Non-fatal**. A completion arrived but no JSON array
//!   could be recovered from it. Stored in [`crate::output::StageReport`];
//!   whether the chain continues is decided by
//!   [`crate::config::ParseFailurePolicy`].
//!
//! Keeping "no documents found" (`Ok` with an empty list) apart from
//! "pipeline broke" (`Err`) is the point of the split.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docchain library.
#[derive(Debug, Error)]
pub enum DocChainError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The image contained zero bytes.
    #[error("Image '{label}' is empty")]
    EmptyImage { label: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// No API key or model client is available.
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The vision call for a stage failed; the chain cannot continue.
    #[error("Stage {stage} failed: {source}")]
    StageFailed {
        stage: usize,
        #[source]
        source: ModelError,
    },

    /// The vision call for a stage did not finish within the timeout.
    #[error("API call timed out after {elapsed_ms}ms on stage {stage}")]
    ApiTimeout { stage: usize, elapsed_ms: u64 },

    /// A stage's completion could not be parsed and the policy is `Abort`.
    #[error("Stage {stage} returned unparsable output: {reason}")]
    ParseAborted { stage: usize, reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A chain failure for one image of a batch, tagged with the image label.
///
/// Yielded by [`crate::stream::process_stream`] so one bad image does not
/// end the stream.
#[derive(Debug, Error)]
#[error("{label}: {source}")]
pub struct ImageError {
    pub label: String,
    #[source]
    pub source: DocChainError,
}

/// A failed call to the vision provider.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The request never produced an HTTP response (DNS, TLS, reset, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The HTTP client gave up waiting for the provider.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider rejected the API key (HTTP 401/403).
    #[error("authentication rejected by provider: {detail}")]
    Auth { detail: String },

    /// HTTP 429.
    #[error("rate limit exceeded{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// Any other non-success status.
    #[error("API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body was not the expected `generateContent` envelope.
    #[error("unexpected response envelope: {0}")]
    UnexpectedEnvelope(String),
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|s| format!(" (retry after {s}s)"))
        .unwrap_or_default()
}

/// A completion that could not be turned into a JSON value.
///
/// `raw_text` is the complete completion text so it can be logged as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error("{reason}")]
pub struct ParseFailure {
    pub reason: String,
    pub raw_text: String,
}

impl ParseFailure {
    pub fn new(reason: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw_text: raw_text.into(),
        }
    }
}
