use crate::error::AppError;
use crate::models::{Batch, BatchUpdate, NewBatch};
use crate::services::metadata_cache::SchemaCache;
use crate::services::statement_router::StatementRouter;
use crate::storage::SqliteStorage;
use std::sync::Arc;

/// Creates batches from raw text and reads them back
pub struct BatchService {
    storage: Arc<SqliteStorage>,
    cache: Arc<dyn SchemaCache>,
}

impl BatchService {
    pub fn new(storage: Arc<SqliteStorage>, cache: Arc<dyn SchemaCache>) -> Self {
        Self { storage, cache }
    }

    /// Route the batch text and persist the batch with all of its statements.
    ///
    /// Routing problems never fail this call; they become error statements.
    pub async fn create(&self, request: NewBatch) -> Result<Batch, AppError> {
        if request.user_id.trim().is_empty() {
            return Err(AppError::Validation("user_id is required".to_string()));
        }
        if let Some(connection_id) = &request.connection_id {
            if self.storage.get_connection(connection_id).await?.is_none() {
                return Err(AppError::Validation(format!(
                    "Unknown connection: {}",
                    connection_id
                )));
            }
        }

        let mut batch = Batch::new(&request);
        let router = StatementRouter::new(
            self.cache.list_all().await?,
            self.storage.list_connections().await?,
            batch.connection_id.clone(),
        );

        batch.statements = router
            .route(batch.query_text())
            .into_iter()
            .enumerate()
            .map(|(sequence, routed)| routed.into_statement(&batch.id, sequence as u32))
            .collect();

        self.storage.create_batch(&batch).await?;
        tracing::info!(
            "Created batch {} with {} statement(s) for user {}",
            batch.id,
            batch.statements.len(),
            batch.user_id
        );

        self.find(&batch.id).await
    }

    /// Batch with statements in sequence order and their connection names
    pub async fn find(&self, id: &str) -> Result<Batch, AppError> {
        self.storage
            .get_batch(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Batch {} not found", id)))
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Batch>, AppError> {
        Ok(self.storage.list_batches_for_user(user_id).await?)
    }

    /// Update batch status and timing. Statements are not touched.
    pub async fn update(&self, id: &str, update: &BatchUpdate) -> Result<Batch, AppError> {
        if !self.storage.update_batch(id, update).await? {
            return Err(AppError::NotFound(format!("Batch {} not found", id)));
        }
        self.find(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchStatus, Connection, Schema, SchemaCacheKey, SchemaDocument, StatementStatus, Table};
    use crate::services::statement_router::{DATABASE_OR_TABLE_NOT_FOUND, NO_DATABASE_SPECIFIED};
    use serde_json::Map;

    async fn service() -> (BatchService, Connection) {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let connection = Connection::new("primary", "postgres", Map::new());
        storage.save_connection(&connection).await.unwrap();

        let document = SchemaDocument::nested(
            connection.id.clone(),
            vec![Schema {
                name: "public".to_string(),
                description: None,
                tables: vec![Table {
                    name: "person".to_string(),
                    description: None,
                    columns: vec![],
                }],
            }],
        );
        storage
            .put_schema(&SchemaCacheKey::new(connection.id.clone(), 2), &document)
            .await
            .unwrap();

        (BatchService::new(storage.clone(), storage), connection)
    }

    #[tokio::test]
    async fn test_create_assigns_contiguous_sequence() {
        let (service, connection) = service().await;
        let batch = service
            .create(NewBatch::new(
                "u1",
                "SELECT * FROM person; SELECT id FROM person;\nSELECT name FROM public.person",
            ))
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Queued);
        let sequences: Vec<u32> = batch.statements.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(batch
            .statements
            .iter()
            .all(|s| s.connection_id.as_deref() == Some(connection.id.as_str())
                && s.connection_name.as_deref() == Some("primary")
                && s.status == StatementStatus::Queued));
    }

    #[tokio::test]
    async fn test_create_never_yields_empty_batch() {
        let (service, _) = service().await;
        for text in ["", "SELECT * FROM nowhere", "DROP TABLE person", "SELEKT * FORM x"] {
            let batch = service.create(NewBatch::new("u1", text)).await.unwrap();
            assert_eq!(batch.statements.len(), 1, "text: {:?}", text);
            assert_eq!(batch.statements[0].status, StatementStatus::Error);
        }

        let batch = service.create(NewBatch::new("u1", "DROP TABLE person")).await.unwrap();
        assert_eq!(batch.statements[0].error.as_ref().unwrap().title, NO_DATABASE_SPECIFIED);
        let batch = service.create(NewBatch::new("u1", "SELECT * FROM nowhere")).await.unwrap();
        assert_eq!(batch.statements[0].error.as_ref().unwrap().title, DATABASE_OR_TABLE_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_routes_only_the_selection() {
        let (service, _) = service().await;
        let batch = service
            .create(NewBatch::new("u1", "SELECT 1 FROM nowhere; SELECT * FROM person").with_selection("SELECT * FROM person"))
            .await
            .unwrap();
        assert_eq!(batch.statements.len(), 1);
        assert_eq!(batch.statements[0].statement_text, "SELECT * FROM person");
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_connection_and_blank_user() {
        let (service, _) = service().await;
        let result = service.create(NewBatch::new("u1", "SELECT 1").with_connection("nope")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        let result = service.create(NewBatch::new(" ", "SELECT 1")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_find_list_and_update() {
        let (service, _) = service().await;
        let batch = service.create(NewBatch::new("u1", "SELECT * FROM person")).await.unwrap();

        assert!(matches!(service.find("missing").await, Err(AppError::NotFound(_))));
        assert_eq!(service.list_for_user("u1").await.unwrap().len(), 1);

        let updated = service
            .update(
                &batch.id,
                &BatchUpdate {
                    status: BatchStatus::Finished,
                    start_time: None,
                    stop_time: Some(chrono::Utc::now()),
                    duration_ms: Some(5),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, BatchStatus::Finished);
        assert_eq!(updated.statements.len(), 1);

        let missing = service
            .update(
                "missing",
                &BatchUpdate {
                    status: BatchStatus::Error,
                    start_time: None,
                    stop_time: None,
                    duration_ms: None,
                },
            )
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }
}
