use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    entity_locks::EntityLocks,
    error::{AnnotationError, Result},
    record_store::{Fields, Filter, RecordStore, StoreRow},
};

pub const PROJECT_FIELD_ID: &str = "id";
pub const PROJECT_FIELD_NAME: &str = "name";
pub const PROJECT_FIELD_OWNER: &str = "owner";
pub const PROJECT_FIELD_CREATED_AT: &str = "createdAt";
pub const PROJECT_FIELD_CONFIG: &str = "config";

const PROJECT_ID_PREFIX: &str = "proj";
const PROJECT_ID_SUFFIX_LEN: usize = 5;
const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProjectInput {
    pub name: String,
    pub owner: String,
    pub pages: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub created_at: i64,
    pub config: Value,
}

/// Project rows and their wholesale-replaced config blob.
pub struct ProjectConfigStore {
    store: Arc<dyn RecordStore>,
    table: String,
    locks: EntityLocks,
}

impl ProjectConfigStore {
    pub fn new(store: Arc<dyn RecordStore>, table: impl Into<String>, locks: EntityLocks) -> Self {
        Self {
            store,
            table: table.into(),
            locks,
        }
    }

    /// Creates a project with `config = {pages: pages ?? []}`. Not idempotent:
    /// every call mints a new id.
    pub async fn create_project(&self, input: NewProjectInput) -> Result<ProjectRecord> {
        let created_at = now_ms();
        let record = ProjectRecord {
            id: generate_project_id(created_at),
            name: input.name,
            owner: input.owner,
            created_at,
            config: default_config(input.pages),
        };

        let mut fields = Fields::new();
        fields.insert(PROJECT_FIELD_ID.to_string(), Value::from(record.id.clone()));
        fields.insert(PROJECT_FIELD_NAME.to_string(), Value::from(record.name.clone()));
        fields.insert(PROJECT_FIELD_OWNER.to_string(), Value::from(record.owner.clone()));
        fields.insert(PROJECT_FIELD_CREATED_AT.to_string(), Value::from(created_at));
        fields.insert(PROJECT_FIELD_CONFIG.to_string(), Value::from(record.config.to_string()));
        self.store.create(&self.table, fields).await?;

        tracing::info!("created project {} owned by {}", record.id, record.owner);
        Ok(record)
    }

    pub async fn get_config(&self, project_id: &str) -> Result<Value> {
        let row = self.find_project_row(project_id).await?;
        Ok(parse_config(&row))
    }

    /// Replaces the config blob wholesale. No merge with the stored value.
    pub async fn set_config(&self, project_id: &str, config: &Value) -> Result<()> {
        let _guard = self.locks.lock(&lock_key(project_id)).await;
        let row = self.find_project_row(project_id).await?;

        let mut fields = Fields::new();
        fields.insert(PROJECT_FIELD_CONFIG.to_string(), Value::from(config.to_string()));
        self.store.update(&self.table, &row.record_id, fields).await?;
        Ok(())
    }

    async fn find_project_row(&self, project_id: &str) -> Result<StoreRow> {
        let filter = Filter::field_eq(PROJECT_FIELD_ID, project_id);
        let rows = self.store.search(&self.table, Some(&filter)).await?;
        if rows.len() > 1 {
            tracing::warn!("project id {project_id} matches {} rows; using the first", rows.len());
        }
        rows.into_iter()
            .next()
            .ok_or_else(|| AnnotationError::NotFound("Project not found".to_string()))
    }
}

fn lock_key(project_id: &str) -> String {
    format!("project:{project_id}")
}

fn default_config(pages: Option<Value>) -> Value {
    let pages = match pages {
        None | Some(Value::Null) => Value::Array(vec![]),
        Some(pages) => pages,
    };
    json!({ "pages": pages })
}

fn parse_config(row: &StoreRow) -> Value {
    let raw = row.text(PROJECT_FIELD_CONFIG);
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(&raw) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("failed to parse config of project row {}: {err}", row.record_id);
            Value::Object(Map::new())
        },
    }
}

fn generate_project_id(now_ms: i64) -> String {
    let mut rng = rand::thread_rng();
    let suffix = (0..PROJECT_ID_SUFFIX_LEN)
        .map(|_| BASE36_ALPHABET[rng.gen_range(0..BASE36_ALPHABET.len())] as char)
        .collect::<String>();
    format!("{PROJECT_ID_PREFIX}-{now_ms}-{suffix}")
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
