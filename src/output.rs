//! Result types returned by a chain run.

use crate::error::ParseFailure;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One extracted document: field name → value, in the order the model
/// emitted them. Never contains a `null` value, including when
/// deserialised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct DocumentRecord(Map<String, Value>);

impl From<Map<String, Value>> for DocumentRecord {
    fn from(object: Map<String, Value>) -> Self {
        Self::from_object(object)
    }
}

impl From<DocumentRecord> for Map<String, Value> {
    fn from(record: DocumentRecord) -> Self {
        record.0
    }
}

impl DocumentRecord {
    /// Key under which stage 2 tags each record with its category.
    pub const DOCUMENT_TYPE: &'static str = "document_type";

    /// Build a record from a JSON object, dropping null values.
    pub fn from_object(object: Map<String, Value>) -> Self {
        Self(object.into_iter().filter(|(_, v)| !v.is_null()).collect())
    }

    /// The `document_type` field, when the model provided it as a string.
    pub fn document_type(&self) -> Option<&str> {
        self.get(Self::DOCUMENT_TYPE).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Field names in emission order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// What happened to one stage's completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The completion parsed to an array with `items` elements.
    Parsed { items: usize },
    /// The stage needed prior results and there were none; no call was made.
    Skipped,
    /// The completion could not be parsed; the carry was reset to `[]`.
    ParseFailed(ParseFailure),
}

/// Per-stage record of a chain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// 1-based position in the chain.
    pub stage: usize,
    pub name: String,
    pub outcome: StageOutcome,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub duration_ms: u64,
}

/// Totals for a chain run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {
    pub stages_run: usize,
    pub stages_skipped: usize,
    pub parse_failures: usize,
    pub documents: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything produced by one chain run over one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOutput {
    /// Label of the processed image (file name, URL, or caller-supplied).
    pub label: String,
    /// The normalised document records.
    pub documents: Vec<DocumentRecord>,
    pub stages: Vec<StageReport>,
    pub stats: ChainStats,
}

impl ChainOutput {
    /// Parse failures tolerated under
    /// [`crate::config::ParseFailurePolicy::ContinueEmpty`].
    ///
    /// A non-empty result means `documents` may be empty because the model
    /// output was unreadable, not because the image had no documents.
    pub fn parse_failures(&self) -> impl Iterator<Item = (usize, &ParseFailure)> {
        self.stages.iter().filter_map(|s| match &s.outcome {
            StageOutcome::ParseFailed(f) => Some((s.stage, f)),
            _ => None,
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.parse_failures().next().is_some()
    }
}
