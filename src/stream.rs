//! Multi-image API: run many chains with bounded concurrency.
//!
//! Each image gets its own chain run with its own carried results; the only
//! things shared between runs are the model client and the read-only prompt
//! stages. [`process_stream`] yields results as each chain finishes, so
//! they may arrive out of input order (match on `label` if order matters).
//! [`process_batch`] collects them back in input order.

use crate::config::ChainConfig;
use crate::error::{DocChainError, ImageError};
use crate::output::ChainOutput;
use crate::pipeline::chain::ChainRunner;
use crate::pipeline::input;
use crate::process::{build_payload, resolve_model};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-image chain results.
pub type ImageStream = Pin<Box<dyn Stream<Item = Result<ChainOutput, ImageError>> + Send>>;

/// Run the chain over every input, streaming results as chains complete.
///
/// At most `config.concurrency` images are in flight at once. A failing
/// image yields an `Err(ImageError)` item and does not stop the others.
///
/// # Returns
/// - `Ok(ImageStream)`: a stream of `Result<ChainOutput, ImageError>`
/// - `Err(DocChainError)`: the model could not be resolved (no API key etc.)
///
/// # Example
/// ```rust,no_run
/// use docchain::{process_stream, ChainConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let inputs = vec!["front.png".to_string(), "back.png".to_string()];
/// let mut stream = process_stream(inputs, &ChainConfig::default())?;
/// while let Some(result) = stream.next().await {
///     match result {
///         Ok(out) => println!("{}: {} documents", out.label, out.documents.len()),
///         Err(e) => eprintln!("Error: {e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn process_stream(
    inputs: Vec<String>,
    config: &ChainConfig,
) -> Result<ImageStream, DocChainError> {
    let model = resolve_model(config)?;
    let runner = Arc::new(ChainRunner::new(model, config));
    let concurrency = config.concurrency.max(1);
    let config = Arc::new(config.clone());

    info!(
        "Processing {} images (concurrency {})",
        inputs.len(),
        concurrency
    );

    let s = stream::iter(inputs.into_iter().map(move |input_str| {
        let runner = Arc::clone(&runner);
        let config = Arc::clone(&config);
        async move { run_one(&runner, &input_str, &config).await }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}

/// Run the chain over every input and return the results in input order.
pub async fn process_batch(
    inputs: Vec<String>,
    config: &ChainConfig,
) -> Result<Vec<Result<ChainOutput, ImageError>>, DocChainError> {
    let model = resolve_model(config)?;
    let runner = ChainRunner::new(model, config);
    let concurrency = config.concurrency.max(1);

    let results: Vec<_> = stream::iter(inputs.iter())
        .map(|input_str| run_one(&runner, input_str, config))
        .buffered(concurrency)
        .collect()
        .await;
    Ok(results)
}

async fn run_one(
    runner: &ChainRunner,
    input_str: &str,
    config: &ChainConfig,
) -> Result<ChainOutput, ImageError> {
    let tag = |source: DocChainError| ImageError {
        label: input_str.to_string(),
        source,
    };

    let image = input::load_image(input_str, config.download_timeout_secs)
        .await
        .map_err(tag)?;
    let payload = build_payload(image.bytes, config);
    runner.run(&payload, &image.label).await.map_err(tag)
}
