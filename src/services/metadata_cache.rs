use crate::error::AppError;
use crate::models::{SchemaCacheKey, SchemaDocument};
use crate::storage::SqliteStorage;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keyed store of schema documents.
///
/// A miss is `Ok(None)`, never an error. Documents are replaced whole, so a
/// reader sees either the previous or the new document.
#[async_trait::async_trait]
pub trait SchemaCache: Send + Sync {
    async fn get(&self, key: &SchemaCacheKey) -> Result<Option<Arc<SchemaDocument>>, AppError>;

    async fn put(&self, key: &SchemaCacheKey, document: SchemaDocument) -> Result<(), AppError>;

    /// Every cached document in cache order
    async fn list_all(&self) -> Result<Vec<Arc<SchemaDocument>>, AppError>;
}

/// Process-local cache. Insertion order is the cache order; replacing a key keeps its slot.
#[derive(Default)]
pub struct InMemorySchemaCache {
    entries: RwLock<Vec<(SchemaCacheKey, Arc<SchemaDocument>)>>,
}

impl InMemorySchemaCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SchemaCache for InMemorySchemaCache {
    async fn get(&self, key: &SchemaCacheKey) -> Result<Option<Arc<SchemaDocument>>, AppError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .find(|(cached, _)| cached == key)
            .map(|(_, document)| document.clone()))
    }

    async fn put(&self, key: &SchemaCacheKey, document: SchemaDocument) -> Result<(), AppError> {
        let document = Arc::new(document);
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|(cached, _)| cached == key) {
            Some(entry) => entry.1 = document,
            None => entries.push((key.clone(), document)),
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Arc<SchemaDocument>>, AppError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().map(|(_, document)| document.clone()).collect())
    }
}

#[async_trait::async_trait]
impl SchemaCache for SqliteStorage {
    async fn get(&self, key: &SchemaCacheKey) -> Result<Option<Arc<SchemaDocument>>, AppError> {
        let document = self.get_schema(key).await?;
        tracing::debug!(
            "Schema cache {} for {}",
            if document.is_some() { "hit" } else { "miss" },
            key
        );
        Ok(document.map(Arc::new))
    }

    async fn put(&self, key: &SchemaCacheKey, document: SchemaDocument) -> Result<(), AppError> {
        self.put_schema(key, &document).await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Arc<SchemaDocument>>, AppError> {
        Ok(self.list_schemas().await?.into_iter().map(Arc::new).collect())
    }
}
