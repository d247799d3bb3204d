//! Normalized records, the engine's output unit.
//!
//! Index records are opaque JSON values owned by the source; the engine only
//! ever reads them through [`FieldPath`] lookups.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of the paginated listing, exactly as the source returned it
pub type IndexRecord = Value;

/// A funding opportunity in the common output schema.
///
/// Built once by a source's `normalize` call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Namespaced identifier ("{source}:{item_id}")
    pub id: String,

    /// Source name that produced the record
    pub source: String,

    pub title: String,

    /// Public page for the opportunity
    pub url: String,

    pub status: Option<String>,
    pub programme: Option<String>,
    pub call_id: Option<String>,
    pub open_date: Option<String>,
    pub close_date: Option<String>,

    /// Originating index record, kept for lossless re-derivation downstream
    pub raw: Value,
}

impl NormalizedRecord {
    /// Create a record with every required field; optional fields start empty
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        raw: Value,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            title: title.into(),
            url: url.into(),
            status: None,
            programme: None,
            call_id: None,
            open_date: None,
            close_date: None,
            raw,
        }
    }

    pub fn with_status(mut self, status: Option<String>) -> Self {
        self.status = status;
        self
    }

    pub fn with_programme(mut self, programme: Option<String>) -> Self {
        self.programme = programme;
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_dates(mut self, open_date: Option<String>, close_date: Option<String>) -> Self {
        self.open_date = open_date;
        self.close_date = close_date;
        self
    }
}

/// Dotted path into an index record, e.g. `metadata.callccm2Id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve the path against a record. Missing segments yield `None`.
    pub fn lookup<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        self.0
            .split('.')
            .try_fold(record, |value, segment| value.get(segment))
    }

    /// True when the path resolves to a value that carries content
    pub fn is_present(&self, record: &Value) -> bool {
        self.lookup(record).is_some_and(has_content)
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Null, `false`, zero and empty strings/arrays/objects carry no content.
pub fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a scalar or the first element of an array as a string.
///
/// Listing APIs often wrap single values in one-element arrays.
pub fn first_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.first().and_then(first_scalar),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_path_lookup() {
        let record = json!({
            "reference": "REF-1",
            "metadata": { "callccm2Id": ["10381"], "title": "" }
        });

        assert_eq!(
            FieldPath::from("metadata.callccm2Id").lookup(&record),
            Some(&json!(["10381"]))
        );
        assert!(FieldPath::from("reference").is_present(&record));
        assert!(!FieldPath::from("metadata.title").is_present(&record));
        assert!(!FieldPath::from("metadata.missing.deeper").is_present(&record));
    }

    #[test]
    fn test_first_scalar() {
        assert_eq!(first_scalar(&json!(["a", "b"])), Some("a".to_string()));
        assert_eq!(first_scalar(&json!(42)), Some("42".to_string()));
        assert_eq!(first_scalar(&json!([])), None);
        assert_eq!(first_scalar(&json!("")), None);
    }

    #[test]
    fn test_record_serialization_keeps_null_optionals() {
        let record = NormalizedRecord::new("src:1", "src", "Title", "https://x", json!({}))
            .with_call_id("1");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["call_id"], json!("1"));
        assert_eq!(value["open_date"], Value::Null);
        assert_eq!(value["raw"], json!({}));
    }
}
