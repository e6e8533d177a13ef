use crate::error::AppError;
use crate::models::{
    Batch, BatchStatus, BatchUpdate, Connection, Statement, StatementError, StatementStatus,
};
use crate::services::connection_client::ConnectionClient;
use crate::services::database::DriverRegistry;
use crate::services::notifier::StatementNotifier;
use crate::storage::SqliteStorage;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Runs the statements of a persisted batch one after another.
///
/// The first failing statement (or a statement that already failed routing)
/// ends the batch with `error`; every statement still queued after it becomes
/// `cancelled`. Failures of the target databases are recorded on the
/// statement. Only storage faults are returned to the caller.
pub struct BatchExecutor {
    storage: Arc<SqliteStorage>,
    registry: Arc<DriverRegistry>,
    notifier: Arc<dyn StatementNotifier>,
    max_rows: usize,
}

impl BatchExecutor {
    pub fn new(
        storage: Arc<SqliteStorage>,
        registry: Arc<DriverRegistry>,
        notifier: Arc<dyn StatementNotifier>,
        max_rows: usize,
    ) -> Self {
        Self {
            storage,
            registry,
            notifier,
            max_rows,
        }
    }

    /// Execute a queued batch and return it in its final state
    pub async fn execute(&self, batch_id: &str) -> Result<Batch, AppError> {
        let mut batch = self.load(batch_id).await?;
        if batch.status != BatchStatus::Queued {
            return Err(AppError::Validation(format!(
                "Batch {} is {} and cannot be executed",
                batch.id,
                batch.status.as_str()
            )));
        }

        let batch_start = Utc::now();
        self.set_batch_status(&mut batch, BatchStatus::Running, batch_start, None)
            .await?;
        tracing::info!(
            "Executing batch {} ({} statement(s))",
            batch.id,
            batch.statements.len()
        );

        match self.run_statements(&mut batch, batch_start).await {
            Ok(true) => {
                let cancelled = self.storage.cancel_queued_statements(&batch.id).await?;
                tracing::info!("Batch {} ended with an error, {} statement(s) cancelled", batch.id, cancelled);
            }
            Ok(false) => {
                self.set_batch_status(&mut batch, BatchStatus::Finished, batch_start, Some(Utc::now()))
                    .await?;
                tracing::info!("Batch {} finished", batch.id);
            }
            Err(e) => {
                tracing::error!("Batch {} aborted: {}", batch.id, e);
                let update = BatchUpdate {
                    status: BatchStatus::Error,
                    start_time: None,
                    stop_time: Some(Utc::now()),
                    duration_ms: Some(elapsed_ms(batch_start, Utc::now())),
                };
                if let Err(mark_err) = self.storage.update_batch(&batch.id, &update).await {
                    tracing::warn!("Could not mark batch {} as errored: {}", batch.id, mark_err);
                }
                let interrupted = StatementError::new(e.title());
                if let Err(mark_err) = self.storage.fail_started_statements(&batch.id, &interrupted).await {
                    tracing::warn!("Could not mark interrupted statement of batch {} as errored: {}", batch.id, mark_err);
                }
                if let Err(cancel_err) = self.storage.cancel_queued_statements(&batch.id).await {
                    tracing::warn!("Could not cancel queued statements of batch {}: {}", batch.id, cancel_err);
                }
                return Err(e);
            }
        }

        self.load(batch_id).await
    }

    /// Returns `Ok(true)` when execution halted on a failed statement
    async fn run_statements(&self, batch: &mut Batch, batch_start: DateTime<Utc>) -> Result<bool, AppError> {
        let statements = std::mem::take(&mut batch.statements);

        for mut statement in statements {
            let connection = match statement.connection_id.as_deref() {
                Some(id) => self.storage.get_connection(id).await?,
                None => None,
            };

            if statement.status == StatementStatus::Error {
                tracing::debug!("Statement {} failed routing, halting batch {}", statement.sequence, batch.id);
                self.set_batch_status(batch, BatchStatus::Error, batch_start, Some(Utc::now()))
                    .await?;
                self.notify(batch, connection.as_ref(), &statement);
                return Ok(true);
            }

            if statement.status != StatementStatus::Queued {
                continue;
            }

            let started = Utc::now();
            match self.run_statement(&mut statement, connection.as_ref(), started).await {
                Ok(()) => self.notify(batch, connection.as_ref(), &statement),
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => {
                    let stopped = Utc::now();
                    tracing::info!("Statement {} of batch {} failed: {}", statement.sequence, batch.id, e);
                    statement.status = StatementStatus::Error;
                    statement.error = Some(StatementError::new(e.title()));
                    statement.start_time.get_or_insert(started);
                    statement.stop_time = Some(stopped);
                    statement.duration_ms = Some(elapsed_ms(started, stopped));
                    self.storage.update_statement(&statement).await?;

                    self.set_batch_status(batch, BatchStatus::Error, batch_start, Some(stopped))
                        .await?;
                    self.notify(batch, connection.as_ref(), &statement);
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    async fn run_statement(
        &self,
        statement: &mut Statement,
        connection: Option<&Connection>,
        started: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let connection = connection.ok_or_else(|| {
            AppError::Routing(format!(
                "Connection {} not found",
                statement.connection_id.as_deref().unwrap_or("-")
            ))
        })?;
        let driver = self.registry.get(&connection.driver)?;
        let working = connection.with_database(statement.database.as_deref());
        let mut client = ConnectionClient::new(driver, working, self.max_rows);

        // Only a client connected here is disconnected here
        let owned = client.requires_connect() && !client.is_connected();
        if owned {
            client.connect().await?;
        }

        let outcome = self.run_on_client(&mut client, statement, started).await;

        if owned {
            client.disconnect().await;
        }
        outcome
    }

    async fn run_on_client(
        &self,
        client: &mut ConnectionClient,
        statement: &mut Statement,
        started: DateTime<Utc>,
    ) -> Result<(), AppError> {
        statement.status = StatementStatus::Started;
        statement.start_time = Some(started);
        self.storage.update_statement(statement).await?;

        let result = client.run_query(&statement.statement_text).await?;

        let stopped = Utc::now();
        statement.status = StatementStatus::Finished;
        statement.row_count = Some(result.row_count());
        statement.incomplete = Some(result.incomplete);
        statement.columns = Some(result.columns);
        statement.rows = Some(result.rows);
        statement.stop_time = Some(stopped);
        statement.duration_ms = Some(elapsed_ms(started, stopped));
        self.storage.update_statement(statement).await?;
        Ok(())
    }

    async fn set_batch_status(
        &self,
        batch: &mut Batch,
        status: BatchStatus,
        batch_start: DateTime<Utc>,
        stop_time: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let update = BatchUpdate {
            status,
            start_time: Some(batch_start),
            stop_time,
            duration_ms: stop_time.map(|stop| elapsed_ms(batch_start, stop)),
        };
        self.storage.update_batch(&batch.id, &update).await?;

        batch.status = status;
        batch.start_time = Some(batch_start);
        batch.stop_time = stop_time;
        batch.duration_ms = update.duration_ms;
        Ok(())
    }

    fn notify(&self, batch: &Batch, connection: Option<&Connection>, statement: &Statement) {
        self.notifier
            .statement_finished(&batch.user_id, connection, batch, &statement.id);
    }

    async fn load(&self, batch_id: &str) -> Result<Batch, AppError> {
        self.storage
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Batch {} not found", batch_id)))
    }
}

fn elapsed_ms(start: DateTime<Utc>, stop: DateTime<Utc>) -> i64 {
    (stop - start).num_milliseconds().max(0)
}
