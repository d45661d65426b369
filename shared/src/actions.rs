//! Transport-agnostic action protocol: `{action, payload}` in,
//! `{success, data?, message?}` out.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    comments_store::{CommentStore, NewReplyInput, NewThreadInput},
    content_codec::ContentTimestamp,
    entity_locks::EntityLocks,
    error::{AnnotationError, Result},
    projects_store::{NewProjectInput, ProjectConfigStore},
    record_store::{RecordStore, TableIds},
};

pub const BACKEND_TYPE: &str = "LARK_PROXY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    InitProject,
    UpdateProjectConfig,
    GetProjectConfig,
    GetComments,
    CreateThread,
    AddReply,
    UpdateStatus,
    DeleteThread,
}

impl Action {
    pub fn parse(raw: &str) -> Option<Self> {
        let action = match raw {
            "INIT_PROJECT" => Self::InitProject,
            "UPDATE_PROJECT_CONFIG" => Self::UpdateProjectConfig,
            "GET_PROJECT_CONFIG" => Self::GetProjectConfig,
            "GET_COMMENTS" => Self::GetComments,
            "CREATE_THREAD" => Self::CreateThread,
            "ADD_REPLY" => Self::AddReply,
            "UPDATE_STATUS" => Self::UpdateStatus,
            "DELETE_THREAD" => Self::DeleteThread,
            _ => return None,
        };
        Some(action)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Successful outcome of one action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    Data(Value),
    Message(&'static str),
}

impl From<ActionOutput> for ActionResponse {
    fn from(output: ActionOutput) -> Self {
        match output {
            ActionOutput::Data(data) => Self {
                success: true,
                data: Some(data),
                message: None,
            },
            ActionOutput::Message(message) => Self {
                success: true,
                data: None,
                message: Some(message.to_string()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitProjectPayload {
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    pages: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectConfigPayload {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetCommentsPayload {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    page_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateThreadPayload {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    comment_id: Option<String>,
    #[serde(default)]
    page_url: Option<String>,
    #[serde(default)]
    selector: Value,
    #[serde(default)]
    comment_text: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    timestamp: Option<ContentTimestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddReplyPayload {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    reply_id: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    comment_text: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    timestamp: Option<ContentTimestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusPayload {
    #[serde(default)]
    comment_id: Option<String>,
    #[serde(default)]
    new_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteThreadPayload {
    #[serde(default)]
    comment_id: Option<String>,
}

/// Routes actions to the project and comment stores. Holds no per-request
/// state; the record store is the only source of truth.
pub struct AnnotationService {
    projects: ProjectConfigStore,
    comments: CommentStore,
}

impl AnnotationService {
    pub fn new(store: Arc<dyn RecordStore>, tables: TableIds) -> Self {
        let locks = EntityLocks::new();
        Self {
            projects: ProjectConfigStore::new(store.clone(), tables.projects, locks.clone()),
            comments: CommentStore::new(store, tables.comments, locks),
        }
    }

    pub async fn dispatch(&self, request: ActionRequest) -> Result<ActionOutput> {
        let raw_action = request.action.unwrap_or_default();
        let Some(action) = Action::parse(&raw_action) else {
            let shown = if raw_action.is_empty() { "undefined" } else { raw_action.as_str() };
            return Err(AnnotationError::Validation(format!("Unknown action: {shown}")));
        };
        let payload = request.payload;

        match action {
            Action::InitProject => {
                let payload: InitProjectPayload = parse_payload(payload)?;
                let project = self
                    .projects
                    .create_project(NewProjectInput {
                        name: required(payload.project_name, "projectName")?,
                        owner: payload.nickname.unwrap_or_default(),
                        pages: payload.pages,
                    })
                    .await?;
                Ok(ActionOutput::Data(json!({
                    "projectId": project.id,
                    "backendType": BACKEND_TYPE,
                })))
            },
            Action::UpdateProjectConfig => {
                let payload: ProjectConfigPayload = parse_payload(payload)?;
                let project_id = required(payload.project_id, "projectId")?;
                self.projects.set_config(&project_id, &payload.config).await?;
                Ok(ActionOutput::Message("Config updated"))
            },
            Action::GetProjectConfig => {
                let payload: ProjectConfigPayload = parse_payload(payload)?;
                let project_id = required(payload.project_id, "projectId")?;
                Ok(ActionOutput::Data(self.projects.get_config(&project_id).await?))
            },
            Action::GetComments => {
                let payload: GetCommentsPayload = parse_payload(payload)?;
                let project_id = required(payload.project_id, "projectId")?;
                let page_url = required(payload.page_url, "pageUrl")?;
                let threads = self.comments.get_comments(&project_id, &page_url).await?;
                Ok(ActionOutput::Data(serde_json::to_value(threads)?))
            },
            Action::CreateThread => {
                let payload: CreateThreadPayload = parse_payload(payload)?;
                self.comments
                    .create_thread(NewThreadInput {
                        project_id: required(payload.project_id, "projectId")?,
                        comment_id: required(payload.comment_id, "commentId")?,
                        page_url: required(payload.page_url, "pageUrl")?,
                        selector: selector_text(payload.selector),
                        comment_text: payload.comment_text.unwrap_or_default(),
                        author: payload.author.unwrap_or_default(),
                        status: payload.status.unwrap_or_default(),
                        timestamp: payload.timestamp,
                    })
                    .await?;
                Ok(ActionOutput::Message("Thread created"))
            },
            Action::AddReply => {
                let payload: AddReplyPayload = parse_payload(payload)?;
                self.comments
                    .add_reply(NewReplyInput {
                        project_id: required(payload.project_id, "projectId")?,
                        reply_id: required(payload.reply_id, "replyId")?,
                        parent_id: required(payload.parent_id, "parentId")?,
                        comment_text: payload.comment_text.unwrap_or_default(),
                        author: payload.author.unwrap_or_default(),
                        timestamp: payload.timestamp,
                    })
                    .await?;
                Ok(ActionOutput::Message("Reply added"))
            },
            Action::UpdateStatus => {
                let payload: UpdateStatusPayload = parse_payload(payload)?;
                let comment_id = required(payload.comment_id, "commentId")?;
                let new_status = required(payload.new_status, "newStatus")?;
                self.comments.update_status(&comment_id, &new_status).await?;
                Ok(ActionOutput::Message("Status updated"))
            },
            Action::DeleteThread => {
                let payload: DeleteThreadPayload = parse_payload(payload)?;
                let comment_id = required(payload.comment_id, "commentId")?;
                self.comments.delete_thread(&comment_id).await?;
                Ok(ActionOutput::Message("Thread deleted"))
            },
        }
    }
}

fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T> {
    let payload = match payload {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(payload)
        .map_err(|err| AnnotationError::Validation(format!("Invalid payload: {err}")))
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AnnotationError::missing_field(field))
}

fn selector_text(selector: Value) -> String {
    match selector {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, memory_store::MemoryRecordStore};

    fn service() -> AnnotationService {
        AnnotationService::new(
            Arc::new(MemoryRecordStore::new()),
            TableIds::new("projects", "comments"),
        )
    }

    fn request(action: &str, payload: Value) -> ActionRequest {
        ActionRequest {
            action: Some(action.to_string()),
            payload,
        }
    }

    #[tokio::test]
    async fn unknown_action_echoes_name() {
        let err = service()
            .dispatch(request("DROP_TABLES", json!({})))
            .await
            .expect_err("unknown action");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "Unknown action: DROP_TABLES");
    }

    #[tokio::test]
    async fn missing_action_reads_as_undefined() {
        let err = service()
            .dispatch(ActionRequest::default())
            .await
            .expect_err("missing action");
        let response = ActionResponse::failure(err.to_string());
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("Unknown action: undefined"));
    }

    #[tokio::test]
    async fn missing_required_fields_are_validation_errors() {
        let service = service();
        let cases = [
            ("GET_PROJECT_CONFIG", json!({}), "Missing projectId"),
            ("UPDATE_PROJECT_CONFIG", json!({"config": {}}), "Missing projectId"),
            ("GET_COMMENTS", json!({"projectId": "p1"}), "Missing pageUrl"),
            ("UPDATE_STATUS", json!({"commentId": "c1"}), "Missing newStatus"),
            ("DELETE_THREAD", json!({"commentId": "  "}), "Missing commentId"),
            ("INIT_PROJECT", Value::Null, "Missing projectName"),
        ];
        for (action, payload, message) in cases {
            let err = service
                .dispatch(request(action, payload))
                .await
                .expect_err(action);
            assert_eq!(err.kind(), ErrorKind::Validation, "{action}");
            assert_eq!(err.to_string(), message, "{action}");
        }
    }

    #[tokio::test]
    async fn structured_selector_is_stored_as_json_text() -> anyhow::Result<()> {
        let service = service();
        service
            .dispatch(request(
                "CREATE_THREAD",
                json!({
                    "projectId": "p1",
                    "commentId": "c1",
                    "pageUrl": "https://x/doc",
                    "selector": {"css": ".para1"},
                    "commentText": "hi",
                    "author": "alice",
                    "status": "Open",
                    "timestamp": 1
                }),
            ))
            .await?;

        let output = service
            .dispatch(request(
                "GET_COMMENTS",
                json!({"projectId": "p1", "pageUrl": "https://x/doc"}),
            ))
            .await?;
        let ActionOutput::Data(threads) = output else {
            panic!("expected data output");
        };
        assert_eq!(threads[0]["selector"], json!(r#"{"css":".para1"}"#));
        Ok(())
    }

    #[tokio::test]
    async fn init_project_reports_backend_type() -> anyhow::Result<()> {
        let output = service()
            .dispatch(request("INIT_PROJECT", json!({"projectName": "Docs", "nickname": "alice"})))
            .await?;
        let ActionOutput::Data(data) = output else {
            panic!("expected data output");
        };
        assert_eq!(data["backendType"], json!(BACKEND_TYPE));
        assert!(data["projectId"]
            .as_str()
            .is_some_and(|id| id.starts_with("proj-")));
        Ok(())
    }
}
