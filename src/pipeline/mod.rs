//! Pipeline stages for image-to-documents processing.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ chain ─┬─▶ llm ──▶ extract ─┐ (per stage)
//! (path/URL) (MIME)           └────────◀───────────┘
//!                             └─▶ normalize
//! ```
//!
//! 1. [`input`]      read a local file or download a URL into memory
//! 2. [`encode`]     label the bytes with a MIME type; base64 on demand
//! 3. [`chain`]      run the prompt stages in order, carrying each parsed
//!    array into the next prompt
//! 4. [`llm`]        one vision call per stage; the only stage with network I/O
//! 5. [`extract`]    recover JSON from fenced or bare completion text
//! 6. [`normalize`]  drop null fields from the final records

pub mod chain;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod normalize;
