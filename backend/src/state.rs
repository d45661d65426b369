use std::sync::Arc;

use annotation_proxy_shared::{
    AnnotationError, AnnotationService, MemoryRecordStore, RecordStore, TableIds,
};
use anyhow::Result;

use crate::{
    config::{config_error, BackendConfig, ProxyConfig, StoreConfig},
    lark::LarkRecordStore,
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Backend>,
}

enum Backend {
    Ready(AnnotationService),
    /// Deployment parameters are missing; every action is refused with this
    /// message.
    Misconfigured(String),
}

impl AppState {
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        match &config.backend {
            Ok(backend) => Ok(Self::ready(build_store(backend)?, backend.tables.clone())),
            Err(message) => {
                tracing::error!("server configuration incomplete: {message}");
                Ok(Self::misconfigured(message.clone()))
            },
        }
    }

    pub fn ready(store: Arc<dyn RecordStore>, tables: TableIds) -> Self {
        Self {
            inner: Arc::new(Backend::Ready(AnnotationService::new(store, tables))),
        }
    }

    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Backend::Misconfigured(message.into())),
        }
    }

    pub fn service(&self) -> Result<&AnnotationService, AnnotationError> {
        match self.inner.as_ref() {
            Backend::Ready(service) => Ok(service),
            Backend::Misconfigured(message) => Err(config_error(message)),
        }
    }
}

fn build_store(backend: &BackendConfig) -> Result<Arc<dyn RecordStore>> {
    match &backend.store {
        StoreConfig::Lark(lark) => {
            tracing::info!("Using Lark Bitable store at {}", lark.api_base);
            Ok(Arc::new(LarkRecordStore::new(lark)?))
        },
        StoreConfig::Memory => {
            tracing::warn!("Using in-memory record store; data is lost on restart");
            Ok(Arc::new(MemoryRecordStore::new()))
        },
    }
}
