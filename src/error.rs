use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    /// Introspection failures are almost always a connection configuration
    /// problem the user can fix, not an internal fault.
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Message shown to users as a statement's `error.title`.
    pub fn title(&self) -> String {
        match self {
            AppError::Parse(msg)
            | AppError::Routing(msg)
            | AppError::Connection(msg)
            | AppError::Query(msg)
            | AppError::Schema(msg)
            | AppError::Database(msg)
            | AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Internal(msg) => msg.clone(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Parse(_) => "PARSE_ERROR",
            AppError::Routing(_) => "ROUTING_ERROR",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Query(_) => "QUERY_ERROR",
            AppError::Schema(_) => "SCHEMA_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for faults of the crate's own infrastructure (storage, bugs),
    /// as opposed to failures of the user's SQL or target databases.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Internal(_))
    }
}

/// JSON error envelope printed by the command-line runner
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let detail = match err {
            AppError::Schema(msg) => ErrorDetail::new(err.code(), msg.clone())
                .with_details("Check the connection settings and try reloading the schema."),
            AppError::Connection(msg) => ErrorDetail::new(err.code(), msg.clone())
                .with_details("Check that the database is reachable with the stored credentials."),
            _ => ErrorDetail::new(err.code(), err.title()),
        };
        ErrorResponse { error: detail }
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}
