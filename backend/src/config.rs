use std::env;

use annotation_proxy_shared::{AnnotationError, TableIds};

pub const DEFAULT_LARK_API_BASE: &str = "https://open.feishu.cn/open-apis";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const MIN_TIMEOUT_SECONDS: u64 = 3;
const MEMORY_PROJECTS_TABLE: &str = "projects";
const MEMORY_COMMENTS_TABLE: &str = "comments";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LarkConfig {
    pub app_id: String,
    pub app_secret: String,
    pub base_token: String,
    pub api_base: String,
    pub timeout_seconds: u64,
    pub proxy_url: Option<String>,
    pub max_pages: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreConfig {
    Lark(LarkConfig),
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub store: StoreConfig,
    pub tables: TableIds,
}

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub bind_addr: String,
    pub port: String,
    /// `Err` carries the missing deployment parameters; the server still
    /// starts and reports them on every request.
    pub backend: Result<BackendConfig, String>,
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = read("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = read("PORT").unwrap_or_else(|| "3000".to_string());
        let use_memory = read("ANNOTATION_STORE")
            .map(|value| value.eq_ignore_ascii_case("memory"))
            .unwrap_or(false);

        let backend = if use_memory {
            Ok(BackendConfig {
                store: StoreConfig::Memory,
                tables: TableIds::new(
                    read("LARK_TABLE_PROJECTS").unwrap_or_else(|| MEMORY_PROJECTS_TABLE.to_string()),
                    read("LARK_TABLE_COMMENTS").unwrap_or_else(|| MEMORY_COMMENTS_TABLE.to_string()),
                ),
            })
        } else {
            let required = [
                "LARK_APP_ID",
                "LARK_APP_SECRET",
                "LARK_BASE_TOKEN",
                "LARK_TABLE_PROJECTS",
                "LARK_TABLE_COMMENTS",
            ];
            let values = required.map(|key| read(key));
            let missing = required
                .iter()
                .zip(values.iter())
                .filter(|(_, value)| value.is_none())
                .map(|(key, _)| *key)
                .collect::<Vec<_>>();

            match values {
                [Some(app_id), Some(app_secret), Some(base_token), Some(projects), Some(comments)] => {
                    let timeout_seconds = read("LARK_HTTP_TIMEOUT_SECONDS")
                        .and_then(|value| value.parse::<u64>().ok())
                        .unwrap_or(DEFAULT_TIMEOUT_SECONDS)
                        .max(MIN_TIMEOUT_SECONDS);
                    let max_pages = read("LARK_SEARCH_MAX_PAGES")
                        .and_then(|value| value.parse::<usize>().ok())
                        .unwrap_or(1)
                        .max(1);
                    Ok(BackendConfig {
                        store: StoreConfig::Lark(LarkConfig {
                            app_id,
                            app_secret,
                            base_token,
                            api_base: read("LARK_API_BASE")
                                .map(|value| value.trim_end_matches('/').to_string())
                                .unwrap_or_else(|| DEFAULT_LARK_API_BASE.to_string()),
                            timeout_seconds,
                            proxy_url: read("LARK_PROXY_URL"),
                            max_pages,
                        }),
                        tables: TableIds::new(projects, comments),
                    })
                },
                _ => Err(format!("Missing Envs: {}", missing.join(", "))),
            }
        };

        Self {
            bind_addr,
            port,
            backend,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// The error answered for every action while deployment parameters are
/// missing.
pub fn config_error(message: &str) -> AnnotationError {
    AnnotationError::Config(message.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ProxyConfig {
        let vars = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        ProxyConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn complete_lark_environment_builds_backend() {
        let config = config_from(&[
            ("LARK_APP_ID", "cli_a"),
            ("LARK_APP_SECRET", "secret"),
            ("LARK_BASE_TOKEN", "base"),
            ("LARK_TABLE_PROJECTS", "tblP"),
            ("LARK_TABLE_COMMENTS", "tblC"),
            ("LARK_API_BASE", "http://127.0.0.1:9000/open-apis/"),
            ("LARK_HTTP_TIMEOUT_SECONDS", "1"),
            ("PORT", "8080"),
        ]);

        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
        let backend = config.backend.expect("backend config");
        assert_eq!(backend.tables, TableIds::new("tblP", "tblC"));
        let StoreConfig::Lark(lark) = backend.store else {
            panic!("expected lark store");
        };
        assert_eq!(lark.api_base, "http://127.0.0.1:9000/open-apis");
        assert_eq!(lark.timeout_seconds, MIN_TIMEOUT_SECONDS);
        assert_eq!(lark.max_pages, 1);
    }

    #[test]
    fn missing_variables_are_listed() {
        let config = config_from(&[("LARK_APP_ID", "cli_a"), ("LARK_TABLE_COMMENTS", " ")]);
        let err = config.backend.expect_err("incomplete environment");
        assert_eq!(
            err,
            "Missing Envs: LARK_APP_SECRET, LARK_BASE_TOKEN, LARK_TABLE_PROJECTS, \
             LARK_TABLE_COMMENTS"
        );
        assert_eq!(
            config_error(&err).to_string(),
            "Server Config Error: Missing Envs: LARK_APP_SECRET, LARK_BASE_TOKEN, \
             LARK_TABLE_PROJECTS, LARK_TABLE_COMMENTS"
        );
    }

    #[test]
    fn memory_store_needs_no_lark_credentials() {
        let config = config_from(&[("ANNOTATION_STORE", "memory")]);
        let backend = config.backend.expect("memory backend");
        assert_eq!(backend.store, StoreConfig::Memory);
        assert_eq!(backend.tables, TableIds::new("projects", "comments"));
    }
}
