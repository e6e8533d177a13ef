use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One routed, individually tracked SQL command within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub id: String,
    pub batch_id: String,
    /// Ordering key within the batch, assigned at creation and never changed
    pub sequence: u32,
    pub statement_text: String,
    pub connection_id: Option<String>,
    /// Display name of the connection, filled in on read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
    pub database: Option<String>,
    pub status: StatementStatus,
    pub error: Option<StatementError>,
    pub columns: Option<Vec<QueryColumn>>,
    pub rows: Option<Vec<Vec<Value>>>,
    pub row_count: Option<usize>,
    pub incomplete: Option<bool>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatementStatus {
    Queued,
    Started,
    Finished,
    Error,
    Cancelled,
}

impl StatementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementStatus::Queued => "queued",
            StatementStatus::Started => "started",
            StatementStatus::Finished => "finished",
            StatementStatus::Error => "error",
            StatementStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(StatementStatus::Queued),
            "started" => Some(StatementStatus::Started),
            "finished" => Some(StatementStatus::Finished),
            "error" => Some(StatementStatus::Error),
            "cancelled" => Some(StatementStatus::Cancelled),
            _ => None,
        }
    }
}

/// User-visible failure attached to a statement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatementError {
    pub title: String,
}

impl StatementError {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryColumn {
    pub name: String,
    pub data_type: Option<String>,
}

impl QueryColumn {
    pub fn new(name: impl Into<String>, data_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Result of running one statement through a connection client.
///
/// `incomplete` is a heuristic: it is true when the row count equals the
/// max-rows limit the query ran with. A result that happens to have exactly
/// that many rows is reported incomplete as well.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<QueryColumn>,
    pub rows: Vec<Vec<Value>>,
    pub incomplete: bool,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// A statement produced by the router, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedStatement {
    pub statement_text: String,
    pub connection_id: Option<String>,
    pub database: Option<String>,
    pub error: Option<StatementError>,
}

impl RoutedStatement {
    pub fn queued(statement_text: impl Into<String>, connection_id: impl Into<String>, database: Option<String>) -> Self {
        Self {
            statement_text: statement_text.into(),
            connection_id: Some(connection_id.into()),
            database,
            error: None,
        }
    }

    pub fn errored(
        statement_text: impl Into<String>,
        connection_id: Option<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            statement_text: statement_text.into(),
            connection_id,
            database: None,
            error: Some(StatementError::new(title)),
        }
    }

    pub fn status(&self) -> StatementStatus {
        if self.error.is_some() {
            StatementStatus::Error
        } else {
            StatementStatus::Queued
        }
    }

    /// Materialize into a persisted statement record
    pub fn into_statement(self, batch_id: &str, sequence: u32) -> Statement {
        let status = self.status();
        Statement {
            id: Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            sequence,
            statement_text: self.statement_text,
            connection_id: self.connection_id,
            connection_name: None,
            database: self.database,
            status,
            error: self.error,
            columns: None,
            rows: None,
            row_count: None,
            incomplete: None,
            start_time: None,
            stop_time: None,
            duration_ms: None,
        }
    }
}
