//! Serialization of the variable comment payload stored in the `content`
//! field of every comment row.
//!
//! Stored blobs are JSON objects tagged with a format version:
//! `{"v":1,"author":"...","commentText":"...","timestamp":...}`. Blobs written
//! before versioning carry no `v` and are read as version 1.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{AnnotationError, Result};

pub const CONTENT_FORMAT_VERSION: u64 = 1;

const VERSION_KEY: &str = "v";

/// Author-supplied creation time, kept in whatever shape the client sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentTimestamp {
    Millis(i64),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentContent {
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub author: String,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub comment_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<ContentTimestamp>,
    /// Fields this version does not model, carried through untouched. A `v`
    /// key here is dropped on encode.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Legacy writers stored `"author":null` for anonymous comments.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl CommentContent {
    pub fn new(
        author: impl Into<String>,
        comment_text: impl Into<String>,
        timestamp: Option<ContentTimestamp>,
    ) -> Self {
        Self {
            author: author.into(),
            comment_text: comment_text.into(),
            timestamp,
            extra: Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.author.is_empty()
            && self.comment_text.is_empty()
            && self.timestamp.is_none()
            && self.extra.is_empty()
    }
}

pub fn encode(content: &CommentContent) -> Result<String> {
    let Value::Object(mut body) = serde_json::to_value(content)? else {
        return Err(AnnotationError::Corrupt(
            "comment content did not serialize to an object".to_string(),
        ));
    };
    body.remove(VERSION_KEY);
    let mut envelope = Map::with_capacity(body.len() + 1);
    envelope.insert(VERSION_KEY.to_string(), Value::from(CONTENT_FORMAT_VERSION));
    envelope.extend(body);
    Ok(Value::Object(envelope).to_string())
}

/// Decodes a stored blob. Empty input is the empty payload.
pub fn decode(raw: &str) -> Result<CommentContent> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(CommentContent::default());
    }

    let Value::Object(mut body) = serde_json::from_str::<Value>(raw)? else {
        return Err(AnnotationError::Corrupt("comment content is not an object".to_string()));
    };
    match body.remove(VERSION_KEY) {
        None => {},
        Some(Value::Number(version)) if version.as_u64() == Some(CONTENT_FORMAT_VERSION) => {},
        Some(other) => {
            return Err(AnnotationError::Corrupt(format!(
                "unsupported comment content version {other}"
            )));
        },
    }
    Ok(serde_json::from_value(Value::Object(body))?)
}

/// Read-path variant: corrupt blobs are logged and replaced by the empty
/// payload.
pub fn decode_lossy(raw: &str, record_id: &str) -> CommentContent {
    match decode(raw) {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!("substituting empty content for record {record_id}: {err}");
            CommentContent::default()
        },
    }
}
