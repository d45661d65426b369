//! [`RecordStore`] backed by the Lark (Feishu) Bitable open API.

use std::time::Duration;

use annotation_proxy_shared::{
    error::{AnnotationError, Result},
    record_store::{Fields, Filter, RecordStore, StoreRow, SEARCH_PAGE_SIZE},
};
use anyhow::Context;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::{sync::Mutex, time::Instant};

use crate::config::LarkConfig;

/// Bitable code for a `record_id` that does not exist (anymore).
const RECORD_NOT_FOUND_CODE: i64 = 1_254_043;
/// Tokens are refreshed this long before the reported expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Response envelope shared by every Bitable endpoint. `data` stays untyped
/// until `code` says the call succeeded: error replies often carry `"data":{}`.
#[derive(Debug, Deserialize)]
struct LarkEnvelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct TenantTokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    #[serde(default)]
    items: Option<Vec<StoreRow>>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordEnvelope {
    record: StoreRow,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct LarkRecordStore {
    client: reqwest::Client,
    api_base: String,
    base_token: String,
    app_id: String,
    app_secret: String,
    max_pages: usize,
    token: Mutex<Option<CachedToken>>,
}

impl LarkRecordStore {
    pub fn new(config: &LarkConfig) -> anyhow::Result<Self> {
        let mut client_builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_seconds));
        if let Some(proxy_url) = config.proxy_url.as_deref() {
            let proxy = reqwest::Proxy::all(proxy_url)
                .with_context(|| format!("invalid LARK_PROXY_URL: {proxy_url}"))?;
            client_builder = client_builder.proxy(proxy);
        }
        let client = client_builder
            .build()
            .context("failed to build lark http client")?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            base_token: config.base_token.clone(),
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            max_pages: config.max_pages.max(1),
            token: Mutex::new(None),
        })
    }

    fn records_url(&self, table: &str) -> String {
        format!("{}/bitable/v1/apps/{}/tables/{table}/records", self.api_base, self.base_token)
    }

    fn record_url(&self, table: &str, record_id: &str) -> String {
        format!("{}/{record_id}", self.records_url(table))
    }

    /// Returns a tenant access token, reusing the cached one until shortly
    /// before it expires. The lock is held across the auth call so concurrent
    /// requests share one refresh.
    async fn tenant_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/auth/v3/tenant_access_token/internal", self.api_base))
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await
            .map_err(|err| upstream("Auth", err))?;
        let status = response.status();
        let body = response.text().await.map_err(|err| upstream("Auth", err))?;
        let parsed = serde_json::from_str::<TenantTokenResponse>(&body).map_err(|err| {
            AnnotationError::Upstream(format!("Auth Failed: HTTP {status}: {err}"))
        })?;
        if parsed.code != 0 || parsed.tenant_access_token.is_empty() {
            return Err(AnnotationError::Upstream(format!("Auth Failed: {}", parsed.msg)));
        }

        let lifetime = Duration::from_secs(parsed.expire).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: parsed.tenant_access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        tracing::debug!("refreshed lark tenant token, valid for {}s", parsed.expire);
        Ok(parsed.tenant_access_token)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>> {
        let token = self.tenant_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| upstream(operation, err))?;
        let status = response.status();
        let body = response.text().await.map_err(|err| upstream(operation, err))?;

        let envelope = match serde_json::from_str::<LarkEnvelope>(&body) {
            Ok(envelope) => envelope,
            Err(err) if status.is_success() => {
                return Err(AnnotationError::Upstream(format!(
                    "{operation} Failed: invalid response: {err}"
                )));
            },
            Err(_) => {
                return Err(AnnotationError::Upstream(format!("{operation} Failed: HTTP {status}")));
            },
        };
        match envelope.code {
            0 if status.is_success() => {},
            0 => {
                return Err(AnnotationError::Upstream(format!("{operation} Failed: HTTP {status}")));
            },
            RECORD_NOT_FOUND_CODE => {
                return Err(AnnotationError::NotFound(format!(
                    "{operation} Failed: {}",
                    envelope.msg
                )));
            },
            _ => {
                return Err(AnnotationError::Upstream(format!(
                    "{operation} Failed: {}",
                    envelope.msg
                )));
            },
        }

        if envelope.data.is_null() {
            return Ok(None);
        }
        serde_json::from_value(envelope.data).map(Some).map_err(|err| {
            AnnotationError::Upstream(format!("{operation} Failed: invalid response: {err}"))
        })
    }
}

#[async_trait]
impl RecordStore for LarkRecordStore {
    async fn search(&self, table: &str, filter: Option<&Filter>) -> Result<Vec<StoreRow>> {
        let formula = filter
            .filter(|filter| !filter.is_empty())
            .map(Filter::to_formula);
        let page_size = SEARCH_PAGE_SIZE.to_string();
        let mut rows = Vec::new();
        let mut page_token: Option<String> = None;

        for page in 0..self.max_pages {
            let mut query = vec![("page_size", page_size.clone())];
            if let Some(formula) = formula.as_ref() {
                query.push(("filter", formula.clone()));
            }
            if let Some(token) = page_token.take() {
                query.push(("page_token", token));
            }

            let request = self.client.get(self.records_url(table)).query(&query);
            let Some(data) = self.send::<RecordPage>("Search Records", request).await? else {
                break;
            };
            rows.extend(data.items.unwrap_or_default());

            match data.page_token.filter(|token| data.has_more && !token.is_empty()) {
                Some(next) if page + 1 < self.max_pages => page_token = Some(next),
                Some(_) => {
                    tracing::warn!(
                        "search on table {table} truncated after {} pages ({} rows)",
                        self.max_pages,
                        rows.len()
                    );
                    break;
                },
                None => break,
            }
        }

        Ok(rows)
    }

    async fn create(&self, table: &str, fields: Fields) -> Result<StoreRow> {
        let request = self
            .client
            .post(self.records_url(table))
            .json(&json!({ "fields": fields }));
        self.send::<RecordEnvelope>("Create Record", request)
            .await?
            .map(|data| data.record)
            .ok_or_else(|| AnnotationError::Upstream("Create Record Failed: empty response".to_string()))
    }

    async fn update(&self, table: &str, record_id: &str, fields: Fields) -> Result<StoreRow> {
        let request = self
            .client
            .put(self.record_url(table, record_id))
            .json(&json!({ "fields": fields }));
        self.send::<RecordEnvelope>("Update Record", request)
            .await?
            .map(|data| data.record)
            .ok_or_else(|| AnnotationError::Upstream("Update Record Failed: empty response".to_string()))
    }

    async fn delete(&self, table: &str, record_id: &str) -> Result<()> {
        let request = self.client.delete(self.record_url(table, record_id));
        self.send::<Value>("Delete Record", request).await?;
        Ok(())
    }
}

fn upstream(operation: &str, err: reqwest::Error) -> AnnotationError {
    AnnotationError::Upstream(format!("{operation} Failed: {err}"))
}
