//! # docchain
//!
//! Extract structured document records from a photographed or scanned image
//! by chaining prompts through a vision model (Google Gemini).
//!
//! ## Why a chain?
//!
//! A single prompt that both finds and transcribes every document on a page
//! tends to miss documents or mix their fields. Instead the first stage only
//! classifies what is on the image, and the second stage receives that list
//! together with the same image and extracts the fields for each document.
//! Each stage's parsed JSON array is carried into the next prompt.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image (path / URL / bytes)
//!  │
//!  ├─ 1. Input      read a local file or download from URL
//!  ├─ 2. Encode     label with a MIME type, base64 for the request
//!  ├─ 3. Stage 1    classify: ["Fatura de Energia", "RG", ...]
//!  ├─ 4. Stage 2    extract fields for each classified document
//!  │                (each stage: model call → JSON extraction → carry)
//!  ├─ 5. Normalize  drop null fields, keep objects only
//!  └─ 6. Output     documents + per-stage reports + token stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docchain::{process_file, ChainConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key read from GEMINI_API_KEY
//!     let config = ChainConfig::default();
//!     let output = process_file("scan.png", &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.documents)?);
//!     if output.is_degraded() {
//!         eprintln!("some stages returned unreadable output");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docchain` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docchain = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ChainConfig, ChainConfigBuilder, ParseFailurePolicy};
pub use error::{DocChainError, ImageError, ModelError, ParseFailure};
pub use output::{ChainOutput, ChainStats, DocumentRecord, StageOutcome, StageReport};
pub use pipeline::chain::{run_chain, ChainRunner, ChainState};
pub use pipeline::encode::ImagePayload;
pub use pipeline::extract::{extract, Extraction};
pub use pipeline::llm::{Completion, GeminiClient, VisionModel};
pub use pipeline::normalize::normalize;
pub use process::{process_file, process_image, process_sync, process_to_file};
pub use progress::{ChainProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::{default_stages, PromptStage};
pub use stream::{process_batch, process_stream, ImageStream};
