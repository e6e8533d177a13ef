use crate::error::AppError;
use crate::models::{Connection, ConnectionSchema, QueryResult, SchemaCacheKey, SchemaDocument};
use crate::services::connection_client::{ConnectionClient, DEFAULT_SCHEMA_MAX_ROWS};
use crate::services::database::DriverRegistry;
use crate::services::metadata_cache::SchemaCache;
use crate::storage::SqliteStorage;
use std::sync::Arc;

/// Introspection depth used for cache keys
pub const DEFAULT_SCHEMA_DEPTH: u8 = 2;

/// Loads, caches and lists connection schemas
pub struct SchemaService {
    storage: Arc<SqliteStorage>,
    cache: Arc<dyn SchemaCache>,
    registry: Arc<DriverRegistry>,
    max_rows: usize,
    schema_max_rows: usize,
    depth: u8,
}

impl SchemaService {
    pub fn new(storage: Arc<SqliteStorage>, cache: Arc<dyn SchemaCache>, registry: Arc<DriverRegistry>) -> Self {
        Self {
            storage,
            cache,
            registry,
            max_rows: crate::config::DEFAULT_MAX_ROWS,
            schema_max_rows: DEFAULT_SCHEMA_MAX_ROWS,
            depth: DEFAULT_SCHEMA_DEPTH,
        }
    }

    pub fn with_limits(mut self, max_rows: usize, schema_max_rows: usize, depth: u8) -> Self {
        self.max_rows = max_rows;
        self.schema_max_rows = schema_max_rows;
        self.depth = depth;
        self
    }

    /// Cached schema of a connection. With `reload`, or on a miss, the
    /// connection is introspected and a non-empty result replaces the cache entry.
    pub async fn get_schema(&self, connection_id: &str, reload: bool) -> Result<Arc<SchemaDocument>, AppError> {
        let connection = self.connection(connection_id).await?;
        let mut client = self.client(&connection)?;
        let key = client.schema_cache_key(self.depth);

        if !reload {
            if let Some(document) = self.cache.get(&key).await? {
                return Ok(document);
            }
        }

        tracing::info!("Loading schema for connection {}", connection.name);
        let mut document = client.get_schema().await?;
        document.connection_id = connection.id.clone();

        if !document.is_empty() {
            self.cache.put(&key, document.clone()).await?;
        }
        Ok(Arc::new(document))
    }

    /// Every cached document with its connection name, in cache order.
    /// Documents whose connection no longer exists are left out.
    pub async fn list_all_schemas(&self) -> Result<Vec<ConnectionSchema>, AppError> {
        let connections = self.storage.list_connections().await?;
        let documents = self.cache.list_all().await?;

        Ok(documents
            .into_iter()
            .filter_map(|document| {
                let connection = connections.iter().find(|c| c.id == document.connection_id)?;
                Some(ConnectionSchema {
                    connection_name: connection.name.clone(),
                    document: (*document).clone(),
                })
            })
            .collect())
    }

    /// Run the driver's probe query against a stored connection
    pub async fn test_connection(&self, connection_id: &str) -> Result<QueryResult, AppError> {
        let connection = self.connection(connection_id).await?;
        let mut client = self.client(&connection)?;
        client.test_connection().await
    }

    /// Introspect every connection that has no cached schema yet.
    /// Failures are logged and skipped; returns how many schemas were loaded.
    pub async fn refresh_missing(&self) -> Result<usize, AppError> {
        let mut loaded = 0;
        for connection in self.storage.list_connections().await? {
            let key = SchemaCacheKey::new(connection.id.clone(), self.depth);
            if self.cache.get(&key).await?.is_some() {
                continue;
            }
            match self.get_schema(&connection.id, true).await {
                Ok(document) if !document.is_empty() => loaded += 1,
                Ok(_) => tracing::debug!("Connection {} has no tables", connection.name),
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => tracing::warn!("Could not load schema for {}: {}", connection.name, e),
            }
        }
        Ok(loaded)
    }

    async fn connection(&self, connection_id: &str) -> Result<Connection, AppError> {
        self.storage
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Connection {} not found", connection_id)))
    }

    fn client(&self, connection: &Connection) -> Result<ConnectionClient, AppError> {
        let driver = self.registry.get(&connection.driver)?;
        Ok(ConnectionClient::new(driver, connection.clone(), self.max_rows)
            .with_schema_max_rows(self.schema_max_rows))
    }
}
