//! Annotation data model shared by the proxy backend: projects, comment
//! threads and replies, mapped onto a flat, filter-queryable record store.

pub mod actions;
pub mod comments_store;
pub mod content_codec;
pub mod entity_locks;
pub mod error;
pub mod memory_store;
pub mod projects_store;
pub mod record_store;

pub use actions::{ActionRequest, ActionResponse, AnnotationService};
pub use error::{AnnotationError, ErrorKind};
pub use memory_store::MemoryRecordStore;
pub use record_store::{Filter, RecordStore, StoreRow, TableIds};
