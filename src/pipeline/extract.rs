//! Response extraction: recover a JSON value from raw model text.
//!
//! Vision models are asked for "a JSON array" but routinely wrap it in a
//! ```` ```json ```` fence, surround it with prose, or answer with a bare
//! `[]`. This module isolates *recovering* structure from *deciding what to
//! do* when recovery fails: [`extract`] never errors, it returns an
//! [`Extraction`] and the chain runner applies the configured policy.

use crate::error::ParseFailure;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Outcome of [`extract`].
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The candidate text parsed as JSON. Shape is not checked here.
    Parsed(Value),
    /// No JSON could be recovered.
    Failed(ParseFailure),
}

impl Extraction {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Extraction::Parsed(_))
    }

    /// Require the parsed value to be a JSON array.
    ///
    /// Anything else (an object, a string, a number) cannot be carried to the
    /// next stage and is reported as a failure with the original text.
    pub fn into_array(self, raw_text: &str) -> Result<Vec<Value>, ParseFailure> {
        match self {
            Extraction::Parsed(Value::Array(items)) => Ok(items),
            Extraction::Parsed(other) => Err(ParseFailure::new(
                format!("expected a JSON array, got {}", json_kind(&other)),
                raw_text,
            )),
            Extraction::Failed(failure) => Err(failure),
        }
    }
}

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\r?\n(.*?)\r?\n```").unwrap());

/// Recover a JSON value from a model completion.
///
/// 1. Use the interior of the first ```` ```json ```` fence if present,
///    otherwise the whole text.
/// 2. Trim trailing whitespace.
/// 3. Empty or exactly `[]` → empty array, without running the parser.
/// 4. Parse; on error return [`Extraction::Failed`] carrying the full text.
pub fn extract(text: &str) -> Extraction {
    let candidate = match RE_JSON_FENCE.captures(text) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => text,
    };
    let candidate = candidate.trim_end();

    if candidate.is_empty() || candidate == "[]" {
        return Extraction::Parsed(Value::Array(Vec::new()));
    }

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Extraction::Parsed(value),
        Err(e) => Extraction::Failed(ParseFailure::new(e.to_string(), text)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_array() {
        assert_eq!(
            extract(r#"["Fatura de Energia"]"#),
            Extraction::Parsed(json!(["Fatura de Energia"]))
        );
    }

    #[test]
    fn test_empty_and_empty_array_short_circuit() {
        assert_eq!(extract(""), Extraction::Parsed(json!([])));
        assert_eq!(extract("[]"), Extraction::Parsed(json!([])));
        assert_eq!(extract("[]\n\n  "), Extraction::Parsed(json!([])));
        assert_eq!(extract("   \n"), Extraction::Parsed(json!([])));
    }

    #[test]
    fn test_fence_is_transparent() {
        let interiors = [
            r#"["Procuração", "Laudo de Vistoria"]"#,
            r#"[{"document_type": "Fatura de Energia", "cep": "01311-920"}]"#,
            "[\n  {\"a\": 1},\n  {\"b\": null}\n]",
            "[]",
        ];
        for interior in interiors {
            let fenced = format!("```json\n{interior}\n```");
            assert_eq!(extract(&fenced), extract(interior), "interior: {interior}");
        }
    }

    #[test]
    fn test_fence_with_surrounding_prose() {
        let text = "Aqui está o resultado:\n```json\n[\"Procuração\"]\n```\nEspero ter ajudado!";
        assert_eq!(extract(text), Extraction::Parsed(json!(["Procuração"])));
    }

    #[test]
    fn test_fenced_empty_block_short_circuits() {
        assert_eq!(extract("```json\n\n```"), Extraction::Parsed(json!([])));
    }

    #[test]
    fn test_crlf_fence() {
        let text = "```json\r\n[1, 2]\r\n```";
        assert_eq!(extract(text), Extraction::Parsed(json!([1, 2])));
    }

    #[test]
    fn test_invalid_json_is_failure_with_raw_text() {
        let text = "[{bad json";
        match extract(text) {
            Extraction::Failed(f) => {
                assert_eq!(f.raw_text, text);
                assert!(!f.reason.is_empty());
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_prose_without_fence_fails() {
        let text = "I could not find any documents in this image.";
        assert!(!extract(text).is_parsed());
    }

    #[test]
    fn test_failure_keeps_full_text_not_fence_interior() {
        let text = "prefix\n```json\n[oops\n```";
        match extract(text) {
            Extraction::Failed(f) => assert_eq!(f.raw_text, text),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_object_is_parsed_but_not_an_array() {
        let text = r#"{"document_type": "Procuração"}"#;
        let extraction = extract(text);
        assert!(extraction.is_parsed());
        let err = extraction.into_array(text).unwrap_err();
        assert!(err.reason.contains("an object"), "got: {}", err.reason);
        assert_eq!(err.raw_text, text);
    }

    #[test]
    fn test_into_array_passes_items_through() {
        let items = extract(r#"[{"a": 1}, "b"]"#).into_array("").unwrap();
        assert_eq!(items, vec![json!({"a": 1}), json!("b")]);
    }
}
