use crate::models::{Batch, Connection};
use std::sync::Mutex;

/// Delivery collaborator told about every statement that reaches a terminal state
///
/// Called exactly once per terminal statement, in execution order. `connection`
/// is `None` when the statement never had one or it was deleted.
pub trait StatementNotifier: Send + Sync {
    fn statement_finished(
        &self,
        user_id: &str,
        connection: Option<&Connection>,
        batch: &Batch,
        statement_id: &str,
    );
}

/// Logs each finished statement
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl StatementNotifier for TracingNotifier {
    fn statement_finished(
        &self,
        user_id: &str,
        connection: Option<&Connection>,
        batch: &Batch,
        statement_id: &str,
    ) {
        tracing::info!(
            user_id,
            batch_id = %batch.id,
            batch_status = batch.status.as_str(),
            statement_id,
            connection = connection.map(|c| c.name.as_str()).unwrap_or("-"),
            "Statement finished"
        );
    }
}

/// Keeps every notification in memory, in the order received
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, Option<String>, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(batch_id, connection_id, statement_id)` per notification
    pub fn events(&self) -> Vec<(String, Option<String>, String)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl StatementNotifier for RecordingNotifier {
    fn statement_finished(
        &self,
        _user_id: &str,
        connection: Option<&Connection>,
        batch: &Batch,
        statement_id: &str,
    ) {
        if let Ok(mut events) = self.events.lock() {
            events.push((
                batch.id.clone(),
                connection.map(|c| c.id.clone()),
                statement_id.to_string(),
            ));
        }
    }
}
