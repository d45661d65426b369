//! Comment threads and replies stored as independent flat rows.
//!
//! A THREAD row anchors a discussion to a page; REPLY rows point at their
//! thread through `parentId` and inherit its `pageUrl`, so a single filtered
//! search on `projectId` + `pageUrl` returns everything needed to rebuild the
//! two-level tree in memory.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    content_codec::{self, CommentContent, ContentTimestamp},
    entity_locks::EntityLocks,
    error::{AnnotationError, Result},
    record_store::{Fields, Filter, RecordStore, StoreRow},
};

pub const COMMENT_FIELD_ID: &str = "id";
pub const COMMENT_FIELD_TYPE: &str = "type";
pub const COMMENT_FIELD_PROJECT_ID: &str = "projectId";
pub const COMMENT_FIELD_PAGE_URL: &str = "pageUrl";
pub const COMMENT_FIELD_SELECTOR: &str = "selector";
pub const COMMENT_FIELD_PARENT_ID: &str = "parentId";
pub const COMMENT_FIELD_CONTENT: &str = "content";
pub const COMMENT_FIELD_STATUS: &str = "status";
pub const COMMENT_FIELD_TIMESTAMP: &str = "timestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommentKind {
    Thread,
    Reply,
}

impl CommentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thread => "THREAD",
            Self::Reply => "REPLY",
        }
    }
}

impl fmt::Display for CommentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommentKind {
    type Err = AnnotationError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "THREAD" => Ok(Self::Thread),
            "REPLY" => Ok(Self::Reply),
            other => Err(AnnotationError::Corrupt(format!("unknown comment type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewThreadInput {
    pub project_id: String,
    pub comment_id: String,
    pub page_url: String,
    pub selector: String,
    pub comment_text: String,
    pub author: String,
    pub status: String,
    pub timestamp: Option<ContentTimestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReplyInput {
    pub project_id: String,
    pub reply_id: String,
    pub parent_id: String,
    pub comment_text: String,
    pub author: String,
    pub timestamp: Option<ContentTimestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub reply_id: String,
    pub parent_id: String,
    #[serde(flatten)]
    pub content: CommentContent,
}

impl Reply {
    /// Content keys that would collide with the reply's own ids are dropped.
    pub fn new(
        reply_id: impl Into<String>,
        parent_id: impl Into<String>,
        mut content: CommentContent,
    ) -> Self {
        content.extra.remove("replyId");
        content.extra.remove("parentId");
        Self {
            reply_id: reply_id.into(),
            parent_id: parent_id.into(),
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub comment_id: String,
    pub page_url: String,
    pub selector: String,
    pub initial_comment: CommentContent,
    pub status: String,
    pub replies: Vec<Reply>,
}

/// Row-level view of one comment row, before projection.
#[derive(Debug, Clone, PartialEq)]
struct CommentRow {
    record_id: String,
    id: String,
    kind: CommentKind,
    page_url: String,
    selector: String,
    parent_id: String,
    status: String,
    sort_key: i64,
    content: CommentContent,
}

impl CommentRow {
    fn from_store_row(row: &StoreRow) -> Option<Self> {
        let kind = match row.text(COMMENT_FIELD_TYPE).parse::<CommentKind>() {
            Ok(kind) => kind,
            Err(err) => {
                tracing::debug!("skipping comment row {}: {err}", row.record_id);
                return None;
            },
        };
        Some(Self {
            record_id: row.record_id.clone(),
            id: row.text(COMMENT_FIELD_ID),
            kind,
            page_url: row.text(COMMENT_FIELD_PAGE_URL),
            selector: row.text(COMMENT_FIELD_SELECTOR),
            parent_id: row.text(COMMENT_FIELD_PARENT_ID),
            status: row.text(COMMENT_FIELD_STATUS),
            sort_key: row.number(COMMENT_FIELD_TIMESTAMP).unwrap_or_default(),
            content: content_codec::decode_lossy(&row.text(COMMENT_FIELD_CONTENT), &row.record_id),
        })
    }
}

/// Rebuilds the thread tree from the flat rows of one page.
///
/// Two passes: rows are partitioned by type while replies are indexed by
/// `parentId`, then each thread takes its bucket. Threads are ordered by
/// (`timestamp`, `commentId`) and replies by (`timestamp`, `replyId`), so the
/// result does not depend on the order the store returned rows in. Replies
/// whose thread is not among `rows` are dropped.
pub fn assemble_threads(rows: &[StoreRow]) -> Vec<Thread> {
    let mut threads = Vec::new();
    let mut replies_by_parent: HashMap<String, Vec<(i64, Reply)>> = HashMap::new();

    for row in rows.iter().filter_map(CommentRow::from_store_row) {
        match row.kind {
            CommentKind::Thread => threads.push(row),
            CommentKind::Reply => {
                replies_by_parent
                    .entry(row.parent_id.clone())
                    .or_default()
                    .push((row.sort_key, Reply::new(row.id, row.parent_id, row.content)));
            },
        }
    }

    threads.sort_by(|left, right| {
        left.sort_key
            .cmp(&right.sort_key)
            .then_with(|| left.id.cmp(&right.id))
    });

    threads
        .into_iter()
        .map(|thread| {
            let mut replies = replies_by_parent.get(&thread.id).cloned().unwrap_or_default();
            replies.sort_by(|left, right| {
                left.0
                    .cmp(&right.0)
                    .then_with(|| left.1.reply_id.cmp(&right.1.reply_id))
            });
            Thread {
                comment_id: thread.id,
                page_url: thread.page_url,
                selector: thread.selector,
                initial_comment: thread.content,
                status: thread.status,
                replies: replies.into_iter().map(|(_, reply)| reply).collect(),
            }
        })
        .collect()
}

/// Comment rows of every project.
pub struct CommentStore {
    store: Arc<dyn RecordStore>,
    table: String,
    locks: EntityLocks,
}

impl CommentStore {
    pub fn new(store: Arc<dyn RecordStore>, table: impl Into<String>, locks: EntityLocks) -> Self {
        Self {
            store,
            table: table.into(),
            locks,
        }
    }

    /// One filtered search for the page, then an in-memory join.
    pub async fn get_comments(&self, project_id: &str, page_url: &str) -> Result<Vec<Thread>> {
        let filter = Filter::field_eq(COMMENT_FIELD_PROJECT_ID, project_id)
            .and_eq(COMMENT_FIELD_PAGE_URL, page_url);
        let rows = self.store.search(&self.table, Some(&filter)).await?;
        Ok(assemble_threads(&rows))
    }

    pub async fn create_thread(&self, input: NewThreadInput) -> Result<()> {
        let row_timestamp = row_timestamp(input.timestamp.as_ref())?;
        let content = content_codec::encode(&CommentContent::new(
            input.author,
            input.comment_text,
            input.timestamp,
        ))?;

        let mut fields = Fields::new();
        fields.insert(COMMENT_FIELD_ID.to_string(), Value::from(input.comment_id.clone()));
        fields.insert(COMMENT_FIELD_PROJECT_ID.to_string(), Value::from(input.project_id));
        fields.insert(
            COMMENT_FIELD_TYPE.to_string(),
            Value::from(CommentKind::Thread.as_str()),
        );
        fields.insert(COMMENT_FIELD_PAGE_URL.to_string(), Value::from(input.page_url));
        fields.insert(COMMENT_FIELD_SELECTOR.to_string(), Value::from(input.selector));
        fields.insert(COMMENT_FIELD_CONTENT.to_string(), Value::from(content));
        fields.insert(COMMENT_FIELD_STATUS.to_string(), Value::from(input.status));
        fields.insert(COMMENT_FIELD_TIMESTAMP.to_string(), Value::from(row_timestamp));
        self.store.create(&self.table, fields).await?;

        tracing::info!("created thread {}", input.comment_id);
        Ok(())
    }

    /// Resolves the parent thread to copy its `pageUrl`, then writes the
    /// reply. Holding the parent's lock keeps a same-instance delete from
    /// interleaving between the two steps.
    pub async fn add_reply(&self, input: NewReplyInput) -> Result<()> {
        let row_timestamp = row_timestamp(input.timestamp.as_ref())?;
        let _guard = self.locks.lock(&thread_lock_key(&input.parent_id)).await;

        let parent = self
            .find_thread_row(&input.parent_id)
            .await?
            .ok_or_else(|| AnnotationError::NotFound("Parent thread not found".to_string()))?;
        let parent_page_url = parent.text(COMMENT_FIELD_PAGE_URL);

        let content = content_codec::encode(&CommentContent::new(
            input.author,
            input.comment_text,
            input.timestamp,
        ))?;

        let mut fields = Fields::new();
        fields.insert(COMMENT_FIELD_ID.to_string(), Value::from(input.reply_id.clone()));
        fields.insert(COMMENT_FIELD_PROJECT_ID.to_string(), Value::from(input.project_id));
        fields.insert(
            COMMENT_FIELD_TYPE.to_string(),
            Value::from(CommentKind::Reply.as_str()),
        );
        fields.insert(COMMENT_FIELD_PARENT_ID.to_string(), Value::from(input.parent_id.clone()));
        fields.insert(COMMENT_FIELD_PAGE_URL.to_string(), Value::from(parent_page_url));
        fields.insert(COMMENT_FIELD_CONTENT.to_string(), Value::from(content));
        fields.insert(COMMENT_FIELD_TIMESTAMP.to_string(), Value::from(row_timestamp));
        self.store.create(&self.table, fields).await?;

        tracing::info!("added reply {} to thread {}", input.reply_id, input.parent_id);
        Ok(())
    }

    /// Overwrites the free-form status tag. Transitions are not validated.
    pub async fn update_status(&self, comment_id: &str, new_status: &str) -> Result<()> {
        let _guard = self.locks.lock(&thread_lock_key(comment_id)).await;
        let row = self
            .find_thread_row(comment_id)
            .await?
            .ok_or_else(|| AnnotationError::NotFound("Thread not found".to_string()))?;

        let mut fields = Fields::new();
        fields.insert(COMMENT_FIELD_STATUS.to_string(), Value::from(new_status));
        self.store.update(&self.table, &row.record_id, fields).await?;
        Ok(())
    }

    /// Deletes the thread row (absent is fine) and then every reply row that
    /// points at it. Reply deletions run concurrently and are all awaited; a
    /// reply that is already gone counts as deleted, any other failure fails
    /// the whole operation after the rest have completed.
    pub async fn delete_thread(&self, comment_id: &str) -> Result<()> {
        let _guard = self.locks.lock(&thread_lock_key(comment_id)).await;

        if let Some(row) = self.find_thread_row(comment_id).await? {
            self.delete_row_if_present(&row.record_id).await?;
        }

        let reply_filter = Filter::field_eq(COMMENT_FIELD_PARENT_ID, comment_id)
            .and_eq(COMMENT_FIELD_TYPE, CommentKind::Reply.as_str());
        let replies = self.store.search(&self.table, Some(&reply_filter)).await?;
        let total = replies.len();

        let outcomes = join_all(
            replies
                .iter()
                .map(|reply| self.delete_row_if_present(&reply.record_id)),
        )
        .await;

        let mut failed = 0usize;
        for (reply, outcome) in replies.iter().zip(outcomes) {
            if let Err(err) = outcome {
                failed += 1;
                tracing::error!(
                    "failed to delete reply row {} of thread {comment_id}: {err}",
                    reply.record_id
                );
            }
        }
        if failed > 0 {
            return Err(AnnotationError::Upstream(format!(
                "Failed to delete {failed} of {total} replies of thread {comment_id}"
            )));
        }

        tracing::info!("deleted thread {comment_id} with {total} replies");
        Ok(())
    }

    async fn find_thread_row(&self, comment_id: &str) -> Result<Option<StoreRow>> {
        let filter = Filter::field_eq(COMMENT_FIELD_ID, comment_id)
            .and_eq(COMMENT_FIELD_TYPE, CommentKind::Thread.as_str());
        let rows = self.store.search(&self.table, Some(&filter)).await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_row_if_present(&self, record_id: &str) -> Result<()> {
        match self.store.delete(&self.table, record_id).await {
            Err(err) if err.is_not_found() => {
                tracing::debug!("comment row {record_id} already removed");
                Ok(())
            },
            other => other,
        }
    }
}

fn thread_lock_key(comment_id: &str) -> String {
    format!("thread:{comment_id}")
}

/// Epoch millis for the row `timestamp` column.
pub fn row_timestamp(timestamp: Option<&ContentTimestamp>) -> Result<i64> {
    match timestamp {
        None => Ok(Utc::now().timestamp_millis()),
        Some(ContentTimestamp::Millis(value)) => Ok(*value),
        Some(ContentTimestamp::Text(raw)) => {
            let raw = raw.trim();
            if let Ok(value) = raw.parse::<i64>() {
                return Ok(value);
            }
            DateTime::parse_from_rfc3339(raw)
                .map(|value| value.timestamp_millis())
                .map_err(|_| AnnotationError::Validation(format!("Invalid timestamp: {raw}")))
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(record_id: &str, fields: serde_json::Value) -> StoreRow {
        StoreRow {
            record_id: record_id.to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    fn thread_row(record_id: &str, id: &str, ts: i64) -> StoreRow {
        row(
            record_id,
            json!({
                "id": id,
                "type": "THREAD",
                "projectId": "p1",
                "pageUrl": "https://x/doc",
                "selector": ".para1",
                "status": "Open",
                "timestamp": ts,
                "content": format!(r#"{{"v":1,"author":"alice","commentText":"{id}","timestamp":{ts}}}"#),
            }),
        )
    }

    fn reply_row(record_id: &str, id: &str, parent: &str, ts: i64) -> StoreRow {
        row(
            record_id,
            json!({
                "id": id,
                "type": "REPLY",
                "projectId": "p1",
                "pageUrl": "https://x/doc",
                "parentId": parent,
                "timestamp": ts,
                "content": format!(r#"{{"author":"bob","commentText":"{id}","timestamp":{ts}}}"#),
            }),
        )
    }

    fn reply_ids(thread: &Thread) -> Vec<&str> {
        thread
            .replies
            .iter()
            .map(|reply| reply.reply_id.as_str())
            .collect()
    }

    #[test]
    fn join_attaches_replies_to_their_thread() {
        let rows = vec![
            thread_row("rec1", "c1", 10),
            reply_row("rec2", "r1", "c1", 20),
            thread_row("rec3", "c2", 30),
            reply_row("rec4", "r2", "c2", 40),
            reply_row("rec5", "r3", "c1", 50),
        ];
        let threads = assemble_threads(&rows);

        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].comment_id, "c1");
        assert_eq!(reply_ids(&threads[0]), vec!["r1", "r3"]);
        assert_eq!(threads[1].comment_id, "c2");
        assert_eq!(reply_ids(&threads[1]), vec!["r2"]);
        assert_eq!(threads[0].initial_comment.author, "alice");
        assert_eq!(threads[0].replies[0].content.author, "bob");
    }

    #[test]
    fn join_does_not_depend_on_fetch_order() {
        let mut rows = vec![
            reply_row("rec5", "r3", "c1", 50),
            thread_row("rec3", "c2", 30),
            reply_row("rec2", "r1", "c1", 20),
            reply_row("rec4", "r2", "c2", 40),
            thread_row("rec1", "c1", 10),
        ];
        let expected = assemble_threads(&rows);
        rows.reverse();
        assert_eq!(assemble_threads(&rows), expected);
        rows.rotate_left(2);
        assert_eq!(assemble_threads(&rows), expected);
    }

    #[test]
    fn orphan_replies_and_unknown_types_are_dropped() {
        let rows = vec![
            thread_row("rec1", "c1", 10),
            reply_row("rec2", "r-orphan", "gone", 20),
            row("rec3", json!({"id": "x", "type": "NOTE"})),
        ];
        let threads = assemble_threads(&rows);
        assert_eq!(threads.len(), 1);
        assert!(threads[0].replies.is_empty());
    }

    #[test]
    fn corrupt_content_surfaces_as_empty_payload() {
        let mut broken = thread_row("rec1", "c1", 10);
        broken
            .fields
            .insert(COMMENT_FIELD_CONTENT.to_string(), json!("{not json"));
        let threads = assemble_threads(&[broken]);

        assert_eq!(threads.len(), 1);
        assert!(threads[0].initial_comment.is_empty());
        assert_eq!(threads[0].status, "Open");
    }

    #[test]
    fn thread_projection_serializes_with_wire_names() -> anyhow::Result<()> {
        let threads = assemble_threads(&[thread_row("rec1", "c1", 10), reply_row("rec2", "r1", "c1", 20)]);
        let value = serde_json::to_value(&threads)?;
        assert_eq!(
            value,
            json!([{
                "commentId": "c1",
                "pageUrl": "https://x/doc",
                "selector": ".para1",
                "initialComment": {"author": "alice", "commentText": "c1", "timestamp": 10},
                "status": "Open",
                "replies": [{
                    "replyId": "r1",
                    "parentId": "c1",
                    "author": "bob",
                    "commentText": "r1",
                    "timestamp": 20
                }]
            }])
        );
        Ok(())
    }

    #[test]
    fn reply_content_cannot_shadow_reply_ids() -> anyhow::Result<()> {
        let mut reply = reply_row("rec2", "r1", "c1", 20);
        reply.fields.insert(
            COMMENT_FIELD_CONTENT.to_string(),
            json!(r#"{"author":"bob","commentText":"hi","replyId":"fake","parentId":"other","mood":"ok"}"#),
        );
        let threads = assemble_threads(&[thread_row("rec1", "c1", 10), reply]);

        let encoded = serde_json::to_string(&threads[0].replies[0])?;
        assert_eq!(encoded.matches("\"replyId\"").count(), 1);
        assert_eq!(encoded.matches("\"parentId\"").count(), 1);
        let value: serde_json::Value = serde_json::from_str(&encoded)?;
        assert_eq!(value["replyId"], json!("r1"));
        assert_eq!(value["parentId"], json!("c1"));
        assert_eq!(value["mood"], json!("ok"));
        Ok(())
    }

    #[test]
    fn row_timestamp_accepts_millis_and_rfc3339() -> anyhow::Result<()> {
        assert_eq!(row_timestamp(Some(&ContentTimestamp::Millis(42)))?, 42);
        assert_eq!(row_timestamp(Some(&ContentTimestamp::Text("42".to_string())))?, 42);
        assert_eq!(
            row_timestamp(Some(&ContentTimestamp::Text("1970-01-01T00:00:01Z".to_string())))?,
            1000
        );
        let err = row_timestamp(Some(&ContentTimestamp::Text("yesterday".to_string())))
            .expect_err("not a timestamp");
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        Ok(())
    }
}
