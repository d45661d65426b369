use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnnotationError>;

/// Coarse classification used by the transport to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Validation,
    NotFound,
    Upstream,
    Corrupt,
}

#[derive(Debug, Error)]
pub enum AnnotationError {
    /// Deployment parameters are missing; raised before any action runs.
    #[error("Server Config Error: {0}")]
    Config(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

impl AnnotationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Corrupt(_) => ErrorKind::Corrupt,
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::Validation(format!("Missing {field}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for AnnotationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}
