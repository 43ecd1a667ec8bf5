//! Single-image entry points.
//!
//! These wrap the chain runner with input loading, model resolution and
//! output writing. Use [`crate::stream::process_stream`] to process many
//! images with bounded concurrency.

use crate::config::ChainConfig;
use crate::error::DocChainError;
use crate::output::ChainOutput;
use crate::pipeline::chain::ChainRunner;
use crate::pipeline::encode::ImagePayload;
use crate::pipeline::input;
use crate::pipeline::llm::{GeminiClient, VisionModel};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Run the chain over image bytes already in memory.
///
/// `label` only names the image in logs, progress events and the output.
///
/// # Returns
/// `Ok(ChainOutput)` when every stage's model call succeeded, even if no
/// documents were found (check `output.is_degraded()` to tell an unreadable
/// completion from an empty image).
///
/// # Errors
/// Returns `Err(DocChainError)` when the provider is not configured, a model
/// call fails or times out, or a completion is unparsable under
/// [`crate::config::ParseFailurePolicy::Abort`].
///
/// # Example
/// ```rust,no_run
/// use docchain::{process_image, ChainConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("scan.png")?;
/// let output = process_image(bytes, "scan.png", &ChainConfig::default()).await?;
/// for doc in &output.documents {
///     println!("{:?}", doc.document_type());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn process_image(
    bytes: impl Into<Arc<[u8]>>,
    label: &str,
    config: &ChainConfig,
) -> Result<ChainOutput, DocChainError> {
    let payload = build_payload(bytes, config);
    if payload.is_empty() {
        return Err(DocChainError::EmptyImage {
            label: label.to_string(),
        });
    }
    let model = resolve_model(config)?;
    ChainRunner::new(model, config).run(&payload, label).await
}

/// Load an image from a local path or HTTP/HTTPS URL and run the chain.
pub async fn process_file(
    input_str: impl AsRef<str>,
    config: &ChainConfig,
) -> Result<ChainOutput, DocChainError> {
    let input_str = input_str.as_ref();
    info!("Processing: {}", input_str);
    let image = input::load_image(input_str, config.download_timeout_secs).await?;
    process_image(image.bytes, &image.label, config).await
}

/// Process an image and write its documents to `output_path` as JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn process_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ChainConfig,
) -> Result<ChainOutput, DocChainError> {
    let output = process_file(input_str, config).await?;
    let path = output_path.as_ref();
    let write_err = |e: std::io::Error| DocChainError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_string_pretty(&output.documents)
        .map_err(|e| DocChainError::Internal(format!("Failed to serialise documents: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }

    Ok(output)
}

/// Synchronous wrapper around [`process_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    input_str: impl AsRef<str>,
    config: &ChainConfig,
) -> Result<ChainOutput, DocChainError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocChainError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_file(input_str, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Label the bytes according to the MIME settings.
pub(crate) fn build_payload(bytes: impl Into<Arc<[u8]>>, config: &ChainConfig) -> ImagePayload {
    if config.detect_mime_type {
        ImagePayload::detect(bytes, &config.mime_type)
    } else {
        ImagePayload::new(bytes, config.mime_type.as_str())
    }
}

/// Resolve the vision model: an injected client wins, otherwise Gemini
/// with the configured or environment API key.
pub(crate) fn resolve_model(config: &ChainConfig) -> Result<Arc<dyn VisionModel>, DocChainError> {
    if let Some(ref model) = config.model_client {
        return Ok(Arc::clone(model));
    }
    Ok(Arc::new(GeminiClient::from_config(config)?))
}
