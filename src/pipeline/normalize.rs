//! Result normalisation: turn the final stage's array into document records.
//!
//! Models emit `"cpf": null` for fields they were told to omit. Records
//! handed to callers contain only the fields that have a value; everything
//! else (field names, value types) passes through untouched.

use crate::output::DocumentRecord;
use serde_json::Value;
use tracing::warn;

/// Drop null fields from every record, preserving key and record order.
///
/// Elements that are not JSON objects cannot be records and are skipped.
pub fn normalize(records: Vec<Value>) -> Vec<DocumentRecord> {
    records
        .into_iter()
        .enumerate()
        .filter_map(|(idx, record)| match record {
            Value::Object(fields) => Some(DocumentRecord::from_object(fields)),
            other => {
                warn!("Skipping element {} of final stage: not an object ({})", idx, other);
                None
            }
        })
        .collect()
}
