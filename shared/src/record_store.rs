//! Contract for the flat, filter-queryable table service that backs every
//! project and comment row.
//!
//! Rows are addressed by an opaque `record_id` assigned by the store. Logical
//! ids (`id`, `parentId`, ...) are ordinary fields and are only reachable
//! through [`RecordStore::search`] with a [`Filter`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Page size requested from the remote store for every search.
pub const SEARCH_PAGE_SIZE: usize = 500;

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRow {
    pub record_id: String,
    #[serde(default)]
    pub fields: Fields,
}

impl StoreRow {
    pub fn text(&self, field: &str) -> String {
        field_text(self.fields.get(field))
    }

    pub fn number(&self, field: &str) -> Option<i64> {
        match self.fields.get(field)? {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value as i64)),
            Value::String(raw) => raw.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

/// Conjunction of field-equality clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    clauses: Vec<(String, String)>,
}

impl Filter {
    pub fn field_eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::default().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, String)] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| field_text(fields.get(field)) == *expected)
    }

    /// Renders the filter in the Bitable formula dialect, e.g.
    /// `AND(CurrentValue.[projectId]="p1", CurrentValue.[pageUrl]="u")`.
    pub fn to_formula(&self) -> String {
        let rendered = self
            .clauses
            .iter()
            .map(|(field, value)| format!("CurrentValue.[{field}]=\"{}\"", escape_formula(value)))
            .collect::<Vec<_>>();
        match rendered.len() {
            0 => String::new(),
            1 => rendered.into_iter().next().unwrap_or_default(),
            _ => format!("AND({})", rendered.join(", ")),
        }
    }
}

/// Flat table service. Implementations must not retry.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns every row matching `filter` (all rows when `None`), bounded by
    /// the store's page ceiling.
    async fn search(&self, table: &str, filter: Option<&Filter>) -> Result<Vec<StoreRow>>;

    async fn create(&self, table: &str, fields: Fields) -> Result<StoreRow>;

    /// Replaces the supplied fields of an existing row; other fields keep
    /// their value. Unknown `record_id` is `NotFound`.
    async fn update(&self, table: &str, record_id: &str, fields: Fields) -> Result<StoreRow>;

    async fn delete(&self, table: &str, record_id: &str) -> Result<()>;
}

/// Table ids for the two logical tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIds {
    pub projects: String,
    pub comments: String,
}

impl TableIds {
    pub fn new(projects: impl Into<String>, comments: impl Into<String>) -> Self {
        Self {
            projects: projects.into(),
            comments: comments.into(),
        }
    }
}

/// Plain-text rendering of a stored field value. Absent and null are empty;
/// rich-text segment arrays are concatenated.
pub fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(Value::Array(segments)) => segments
            .iter()
            .map(|segment| match segment {
                Value::Object(map) => field_text(map.get("text")),
                other => field_text(Some(other)),
            })
            .collect(),
        Some(Value::Object(map)) => field_text(map.get("text")),
    }
}

fn escape_formula(input: &str) -> String {
    input.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn single_clause_renders_without_and() {
        let filter = Filter::field_eq("id", "c1");
        assert_eq!(filter.to_formula(), r#"CurrentValue.[id]="c1""#);
    }

    #[test]
    fn multiple_clauses_render_as_and() {
        let filter = Filter::field_eq("projectId", "p1").and_eq("pageUrl", "https://x/doc");
        assert_eq!(
            filter.to_formula(),
            r#"AND(CurrentValue.[projectId]="p1", CurrentValue.[pageUrl]="https://x/doc")"#
        );
    }

    #[test]
    fn formula_escapes_quotes_in_values() {
        let filter = Filter::field_eq("id", r#"a"b\c"#);
        assert_eq!(filter.to_formula(), r#"CurrentValue.[id]="a\"b\\c""#);
    }

    #[test]
    fn absent_fields_only_match_empty_values() {
        let fields = json!({"type": "THREAD"}).as_object().cloned().unwrap_or_default();
        assert!(Filter::field_eq("type", "THREAD").matches(&fields));
        assert!(!Filter::field_eq("parentId", "c1").matches(&fields));
        assert!(Filter::field_eq("parentId", "").matches(&fields));
    }

    #[test]
    fn numbers_match_by_decimal_rendering() {
        let fields = json!({"timestamp": 1700000000000_i64})
            .as_object()
            .cloned()
            .unwrap_or_default();
        assert!(Filter::field_eq("timestamp", "1700000000000").matches(&fields));
    }

    #[test]
    fn field_text_flattens_rich_text_segments() {
        let value = json!([
            {"type": "text", "text": "https://x/"},
            {"type": "text", "text": "doc"}
        ]);
        assert_eq!(field_text(Some(&value)), "https://x/doc");
    }

    #[test]
    fn row_number_reads_numeric_strings() {
        let row = StoreRow {
            record_id: "rec1".to_string(),
            fields: json!({"timestamp": "42", "createdAt": 7.0})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        };
        assert_eq!(row.number("timestamp"), Some(42));
        assert_eq!(row.number("createdAt"), Some(7));
        assert_eq!(row.number("missing"), None);
    }
}
