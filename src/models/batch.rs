use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::statement::Statement;

/// One user-submitted execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub user_id: String,
    /// Fallback connection for statements the router could not place
    pub connection_id: Option<String>,
    pub selected_text: Option<String>,
    pub batch_text: String,
    pub status: BatchStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub statements: Vec<Statement>,
}

impl Batch {
    pub fn new(request: &NewBatch) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            connection_id: request.connection_id.clone(),
            selected_text: request.selected_text.clone(),
            batch_text: request.batch_text.clone(),
            status: BatchStatus::Queued,
            start_time: None,
            stop_time: None,
            duration_ms: None,
            created_at: Utc::now(),
            statements: Vec::new(),
        }
    }

    /// Text that gets split into statements: the selection when the user
    /// made one, the whole editor text otherwise.
    pub fn query_text(&self) -> &str {
        match self.selected_text.as_deref() {
            Some(selected) if !selected.trim().is_empty() => selected,
            _ => &self.batch_text,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Queued,
    Running,
    Error,
    Finished,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Running => "running",
            BatchStatus::Error => "error",
            BatchStatus::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(BatchStatus::Queued),
            "running" => Some(BatchStatus::Running),
            "error" => Some(BatchStatus::Error),
            "finished" => Some(BatchStatus::Finished),
            _ => None,
        }
    }
}

/// Request to create a batch
#[derive(Debug, Clone, Deserialize)]
pub struct NewBatch {
    pub user_id: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub selected_text: Option<String>,
    pub batch_text: String,
}

impl NewBatch {
    pub fn new(user_id: impl Into<String>, batch_text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            connection_id: None,
            selected_text: None,
            batch_text: batch_text.into(),
        }
    }

    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_selection(mut self, selected_text: impl Into<String>) -> Self {
        self.selected_text = Some(selected_text.into());
        self
    }
}

/// Terminal update of a batch
#[derive(Debug, Clone)]
pub struct BatchUpdate {
    pub status: BatchStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}
