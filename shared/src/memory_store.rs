use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    error::{AnnotationError, Result},
    record_store::{Fields, Filter, RecordStore, StoreRow, SEARCH_PAGE_SIZE},
};

/// Process-local [`RecordStore`] used for local development and tests.
/// Rows keep insertion order; searches return at most one page.
pub struct MemoryRecordStore {
    tables: Mutex<HashMap<String, Vec<StoreRow>>>,
    next_id: AtomicU64,
    page_size: usize,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::with_page_size(SEARCH_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            page_size: page_size.max(1),
        }
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map(Vec::len).unwrap_or(0)
    }

    fn generate_record_id(&self) -> String {
        let counter = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("rec{counter:08}")
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn search(&self, table: &str, filter: Option<&Filter>) -> Result<Vec<StoreRow>> {
        let tables = self.tables.lock();
        let Some(rows) = tables.get(table) else {
            return Ok(vec![]);
        };
        Ok(rows
            .iter()
            .filter(|row| filter.map_or(true, |filter| filter.matches(&row.fields)))
            .take(self.page_size)
            .cloned()
            .collect())
    }

    async fn create(&self, table: &str, fields: Fields) -> Result<StoreRow> {
        let row = StoreRow {
            record_id: self.generate_record_id(),
            fields,
        };
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, record_id: &str, fields: Fields) -> Result<StoreRow> {
        let mut tables = self.tables.lock();
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row.record_id == record_id))
            .ok_or_else(|| AnnotationError::NotFound(format!("record {record_id} not found")))?;
        row.fields.extend(fields);
        Ok(row.clone())
    }

    async fn delete(&self, table: &str, record_id: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| AnnotationError::NotFound(format!("record {record_id} not found")))?;
        let before = rows.len();
        rows.retain(|row| row.record_id != record_id);
        if rows.len() == before {
            return Err(AnnotationError::NotFound(format!("record {record_id} not found")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn update_merges_fields_into_existing_row() -> anyhow::Result<()> {
        let store = MemoryRecordStore::new();
        let created = store
            .create("comments", fields(json!({"id": "c1", "status": "Open"})))
            .await?;
        let updated = store
            .update("comments", &created.record_id, fields(json!({"status": "Resolved"})))
            .await?;

        assert_eq!(updated.text("id"), "c1");
        assert_eq!(updated.text("status"), "Resolved");
        Ok(())
    }

    #[tokio::test]
    async fn stale_record_ids_are_not_found() -> anyhow::Result<()> {
        let store = MemoryRecordStore::new();
        let created = store.create("comments", fields(json!({"id": "c1"}))).await?;
        store.delete("comments", &created.record_id).await?;

        let err = store
            .delete("comments", &created.record_id)
            .await
            .expect_err("second delete must fail");
        assert!(err.is_not_found());
        let err = store
            .update("comments", &created.record_id, Fields::new())
            .await
            .expect_err("update after delete must fail");
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn search_is_capped_at_one_page() -> anyhow::Result<()> {
        let store = MemoryRecordStore::with_page_size(2);
        for idx in 0..3 {
            store
                .create("comments", fields(json!({"id": format!("c{idx}")})))
                .await?;
        }

        let rows = store.search("comments", None).await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(store.row_count("comments"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn search_on_unknown_table_is_empty() -> anyhow::Result<()> {
        let store = MemoryRecordStore::new();
        let filter = Filter::field_eq("id", "c1");
        assert!(store.search("missing", Some(&filter)).await?.is_empty());
        Ok(())
    }
}
