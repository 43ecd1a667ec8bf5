//! Configuration for chain runs.
//!
//! All behaviour is controlled through [`ChainConfig`], built via its
//! [`ChainConfigBuilder`]. The prompt stages live here too: they are fixed,
//! immutable data handed to the chain runner, never process-wide state.

use crate::error::DocChainError;
use crate::pipeline::encode::DEFAULT_MIME_TYPE;
use crate::pipeline::llm::{VisionModel, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::progress::ProgressCallback;
use crate::prompts::{default_stages, PromptStage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for processing one or more images.
///
/// # Example
/// ```rust
/// use docchain::{ChainConfig, ParseFailurePolicy};
///
/// let config = ChainConfig::builder()
///     .model("gemini-1.5-pro")
///     .parse_failure_policy(ParseFailurePolicy::Abort)
///     .api_timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ChainConfig {
    /// Gemini API key. If None, `GEMINI_API_KEY` is read when the client is built.
    pub api_key: Option<String>,

    /// Gemini model identifier. Default: `gemini-1.5-flash`.
    pub model: String,

    /// REST base URL. Default: the public v1beta endpoint.
    pub endpoint: String,

    /// MIME type sent with the image bytes. Default: `image/png`.
    pub mime_type: String,

    /// Detect the MIME type from magic bytes, using `mime_type` only as the
    /// fallback. Default: false (the label is fixed).
    pub detect_mime_type: bool,

    /// Ordered prompt stages. Default: classification, then extraction.
    pub stages: Vec<PromptStage>,

    /// What to do when a stage's completion cannot be parsed.
    pub parse_failure_policy: ParseFailurePolicy,

    /// Skip a stage that consumes prior results when there are none.
    /// Default: true.
    ///
    /// With nothing classified there is nothing to extract; the call would
    /// only give the model a chance to invent documents.
    ///
    /// This default differs from the plain chain algorithm, which always
    /// calls every stage and sends `[]` when nothing was carried. Set it to
    /// `false` for that behaviour.
    pub skip_empty_stages: bool,

    /// Per-model-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Maximum number of images processed at once by
    /// [`crate::stream::process_stream`]. Default: 4.
    ///
    /// Each image's chain is sequential; this only bounds how many chains
    /// are in flight.
    pub concurrency: usize,

    /// Pre-constructed model client. Takes precedence over `api_key`.
    pub model_client: Option<Arc<dyn VisionModel>>,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            detect_mime_type: false,
            stages: default_stages(),
            parse_failure_policy: ParseFailurePolicy::default(),
            skip_empty_stages: true,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            concurrency: 4,
            model_client: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("mime_type", &self.mime_type)
            .field("detect_mime_type", &self.detect_mime_type)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .field("parse_failure_policy", &self.parse_failure_policy)
            .field("skip_empty_stages", &self.skip_empty_stages)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field(
                "model_client",
                &self.model_client.as_ref().map(|_| "<dyn VisionModel>"),
            )
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl ChainConfig {
    /// Create a new builder for `ChainConfig`.
    pub fn builder() -> ChainConfigBuilder {
        ChainConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ChainConfig`].
#[derive(Debug)]
pub struct ChainConfigBuilder {
    config: ChainConfig,
}

impl ChainConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.config.mime_type = mime.into();
        self
    }

    pub fn detect_mime_type(mut self, v: bool) -> Self {
        self.config.detect_mime_type = v;
        self
    }

    /// Replace the whole chain.
    pub fn stages(mut self, stages: Vec<PromptStage>) -> Self {
        self.config.stages = stages;
        self
    }

    pub fn parse_failure_policy(mut self, policy: ParseFailurePolicy) -> Self {
        self.config.parse_failure_policy = policy;
        self
    }

    pub fn skip_empty_stages(mut self, v: bool) -> Self {
        self.config.skip_empty_stages = v;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model_client(mut self, client: Arc<dyn VisionModel>) -> Self {
        self.config.model_client = Some(client);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ChainConfig, DocChainError> {
        let c = &self.config;
        if c.stages.is_empty() {
            return Err(DocChainError::InvalidConfig(
                "At least one prompt stage is required".into(),
            ));
        }
        if let Some(stage) = c.stages.iter().find(|s| s.template.trim().is_empty()) {
            return Err(DocChainError::InvalidConfig(format!(
                "Prompt stage '{}' has an empty template",
                stage.name
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(DocChainError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(DocChainError::InvalidConfig("Model must not be empty".into()));
        }
        if c.mime_type.trim().is_empty() {
            return Err(DocChainError::InvalidConfig(
                "MIME type must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Policy applied when a stage's completion cannot be parsed.
///
/// | Policy | Effect |
/// |--------|--------|
/// | `ContinueEmpty` | log, record the failure in the stage report, carry `[]` forward (default) |
/// | `Abort` | fail the whole chain with [`DocChainError::ParseAborted`] |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParseFailurePolicy {
    #[default]
    ContinueEmpty,
    Abort,
}
