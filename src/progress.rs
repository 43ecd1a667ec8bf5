//! Progress-callback trait for per-stage chain events.
//!
//! Inject an [`Arc<dyn ChainProgressCallback>`] via
//! [`crate::config::ChainConfigBuilder::progress_callback`] to receive
//! events as each image moves through the chain. Every method receives the
//! image label because several chains may run at once under
//! [`crate::stream::process_stream`].
//!
//! # Example
//!
//! ```rust
//! use docchain::{ChainConfig, ChainProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     stages: AtomicUsize,
//! }
//!
//! impl ChainProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, label: &str, stage: usize, total: usize, items: usize) {
//!         self.stages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{label}: stage {stage}/{total} → {items} items");
//!     }
//! }
//!
//! let config = ChainConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { stages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the chain runner as it processes an image.
///
/// Implementations must be `Send + Sync`; with several images in flight the
/// methods are called concurrently for different labels. All methods have
/// default no-op implementations.
pub trait ChainProgressCallback: Send + Sync {
    /// Called once before the first stage.
    fn on_chain_start(&self, label: &str, total_stages: usize) {
        let _ = (label, total_stages);
    }

    /// Called just before the model request for a stage is sent.
    fn on_stage_start(&self, label: &str, stage: usize, total_stages: usize) {
        let _ = (label, stage, total_stages);
    }

    /// Called when a stage's completion parsed to an array of `items` elements.
    fn on_stage_complete(&self, label: &str, stage: usize, total_stages: usize, items: usize) {
        let _ = (label, stage, total_stages, items);
    }

    /// Called when a stage is skipped because there were no prior results.
    fn on_stage_skipped(&self, label: &str, stage: usize, total_stages: usize) {
        let _ = (label, stage, total_stages);
    }

    /// Called when a stage's completion could not be parsed.
    fn on_parse_failure(&self, label: &str, stage: usize, reason: &str) {
        let _ = (label, stage, reason);
    }

    /// Called once after normalisation with the number of documents found.
    fn on_chain_complete(&self, label: &str, documents: usize) {
        let _ = (label, documents);
    }

    /// Called once when the chain fails.
    fn on_chain_error(&self, label: &str, error: &str) {
        let _ = (label, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ChainProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ChainConfig`].
pub type ProgressCallback = Arc<dyn ChainProgressCallback>;
