use crate::error::AppError;
use crate::models::{Connection, QueryResult, SchemaCacheKey, SchemaDocument};
use crate::services::database::{fold_schema_rows, Driver, DriverRows, DriverSession, Lifecycle};
use std::sync::Arc;

/// Default fetch limit for introspection queries. Some drivers reject an
/// unbounded fetch size, so a large finite limit is used instead.
pub const DEFAULT_SCHEMA_MAX_ROWS: usize = 1_000_000;

/// Uniform lifecycle over one driver and one stored connection.
///
/// For [`Lifecycle::Persistent`] drivers, [`connect`](Self::connect) opens a
/// session that every following call reuses until
/// [`disconnect`](Self::disconnect). Calls made while not connected, and all
/// calls on [`Lifecycle::PerCall`] drivers, open a session for that call only.
pub struct ConnectionClient {
    driver: Arc<dyn Driver>,
    connection: Connection,
    max_rows: usize,
    schema_max_rows: usize,
    session: Option<Box<dyn DriverSession>>,
}

impl ConnectionClient {
    pub fn new(driver: Arc<dyn Driver>, connection: Connection, max_rows: usize) -> Self {
        Self {
            driver,
            connection,
            max_rows: max_rows.max(1),
            schema_max_rows: DEFAULT_SCHEMA_MAX_ROWS,
            session: None,
        }
    }

    pub fn with_schema_max_rows(mut self, schema_max_rows: usize) -> Self {
        self.schema_max_rows = schema_max_rows.max(1);
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.driver.lifecycle()
    }

    /// Whether explicit connect/disconnect does anything for this driver
    pub fn requires_connect(&self) -> bool {
        self.lifecycle() == Lifecycle::Persistent
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn schema_cache_key(&self, depth: u8) -> SchemaCacheKey {
        SchemaCacheKey::new(self.connection.id.clone(), depth)
    }

    /// Open the persistent session. No-op for per-call drivers or when already connected.
    pub async fn connect(&mut self) -> Result<(), AppError> {
        if !self.requires_connect() || self.session.is_some() {
            return Ok(());
        }
        tracing::debug!(
            "Connecting {} ({})",
            self.connection.name,
            self.connection.display_target()
        );
        self.session = Some(self.driver.open(&self.connection).await?);
        Ok(())
    }

    /// Close the persistent session if there is one. Failures are logged, never returned.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                tracing::warn!(
                    "Error disconnecting {} connection {}: {}",
                    self.driver.id(),
                    self.connection.name,
                    e
                );
            }
        }
    }

    /// Run a statement with the configured max-rows limit.
    ///
    /// `incomplete` is set when the row count equals that limit. This is a
    /// heuristic: a result that is exactly `max_rows` long is also flagged.
    pub async fn run_query(&mut self, text: &str) -> Result<QueryResult, AppError> {
        self.run_with_limit(text, self.max_rows).await
    }

    /// Run the driver's probe query
    pub async fn test_connection(&mut self) -> Result<QueryResult, AppError> {
        let probe = self.driver.probe_query();
        self.run_with_limit(probe, self.max_rows).await
    }

    /// Introspect the connection into a schema document
    pub async fn get_schema(&mut self) -> Result<SchemaDocument, AppError> {
        let schema_sql = self.driver.schema_query();
        let result = self
            .run_with_limit(schema_sql, self.schema_max_rows)
            .await
            .map_err(|e| AppError::Schema(e.title()))?;

        let rows = DriverRows {
            columns: result.columns,
            rows: result.rows,
        };
        fold_schema_rows(&self.connection.id, &rows)
    }

    async fn run_with_limit(&mut self, text: &str, max_rows: usize) -> Result<QueryResult, AppError> {
        let rows = match self.session.as_mut() {
            Some(session) => session.run(text, max_rows).await?,
            None => {
                let mut session = self.driver.open(&self.connection).await?;
                let outcome = session.run(text, max_rows).await;
                if let Err(e) = session.close().await {
                    tracing::warn!(
                        "Error closing {} session for {}: {}",
                        self.driver.id(),
                        self.connection.name,
                        e
                    );
                }
                outcome?
            }
        };

        let incomplete = rows.rows.len() == max_rows;
        Ok(QueryResult {
            columns: rows.columns,
            rows: rows.rows,
            incomplete,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ConfigField, QueryColumn};
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory driver counting session opens and closes
    pub struct CountingDriver {
        pub lifecycle: Lifecycle,
        pub opened: AtomicUsize,
        pub closed: Arc<AtomicUsize>,
    }

    impl CountingDriver {
        pub fn new(lifecycle: Lifecycle) -> Self {
            Self {
                lifecycle,
                opened: AtomicUsize::new(0),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct CountingSession {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Driver for CountingDriver {
        fn id(&self) -> &'static str {
            "counting"
        }
        fn name(&self) -> &'static str {
            "Counting"
        }
        fn fields(&self) -> &'static [ConfigField] {
            &[]
        }
        fn lifecycle(&self) -> Lifecycle {
            self.lifecycle
        }
        fn probe_query(&self) -> &'static str {
            "probe"
        }
        fn schema_query(&self) -> &'static str {
            "schema"
        }
        async fn open(&self, _connection: &Connection) -> Result<Box<dyn DriverSession>, AppError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSession {
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait::async_trait]
    impl DriverSession for CountingSession {
        async fn run(&mut self, sql: &str, max_rows: usize) -> Result<DriverRows, AppError> {
            if sql.contains("fail") {
                return Err(AppError::Query("boom".to_string()));
            }
            match sql {
                "schema" => Ok(DriverRows {
                    columns: vec![
                        QueryColumn::new("table_schema", None),
                        QueryColumn::new("table_name", None),
                        QueryColumn::new("column_name", None),
                        QueryColumn::new("data_type", None),
                    ],
                    rows: vec![vec![json!("public"), json!("person"), json!("id"), json!("int")]],
                }),
                _ => {
                    let count: usize = sql.parse().unwrap_or(1);
                    Ok(DriverRows {
                        columns: vec![QueryColumn::new("n", None)],
                        rows: (0..count.min(max_rows)).map(|i| vec![json!(i)]).collect(),
                    })
                }
            }
        }

        async fn close(self: Box<Self>) -> Result<(), AppError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn client(driver: Arc<CountingDriver>, max_rows: usize) -> ConnectionClient {
        ConnectionClient::new(driver, Connection::new("test", "counting", Map::new()), max_rows)
    }

    #[tokio::test]
    async fn test_incomplete_is_row_count_equals_limit() {
        let driver = Arc::new(CountingDriver::new(Lifecycle::PerCall));
        let mut client = client(driver, 3);

        let result = client.run_query("2").await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert!(!result.incomplete);

        // exactly at the limit is flagged even though nothing was cut off
        let result = client.run_query("3").await.unwrap();
        assert!(result.incomplete);

        let result = client.run_query("10").await.unwrap();
        assert_eq!(result.row_count(), 3);
        assert!(result.incomplete);
    }

    #[tokio::test]
    async fn test_per_call_driver_opens_and_closes_every_call() {
        let driver = Arc::new(CountingDriver::new(Lifecycle::PerCall));
        let mut client = client(driver.clone(), 10);

        client.connect().await.unwrap();
        assert!(!client.is_connected());
        client.run_query("1").await.unwrap();
        let _ = client.run_query("fail").await;
        client.disconnect().await;

        assert_eq!(driver.opened.load(Ordering::SeqCst), 2);
        assert_eq!(driver.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_driver_reuses_session() {
        let driver = Arc::new(CountingDriver::new(Lifecycle::Persistent));
        let mut client = client(driver.clone(), 10);

        client.connect().await.unwrap();
        client.connect().await.unwrap();
        assert!(client.is_connected());
        client.run_query("1").await.unwrap();
        client.test_connection().await.unwrap();
        client.disconnect().await;
        client.disconnect().await;

        assert!(!client.is_connected());
        assert_eq!(driver.opened.load(Ordering::SeqCst), 1);
        assert_eq!(driver.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_schema_folds_rows() {
        let driver = Arc::new(CountingDriver::new(Lifecycle::PerCall));
        let mut client = client(driver, 10);
        let doc = client.get_schema().await.unwrap();
        assert_eq!(doc.connection_id, client.connection().id);
        assert_eq!(doc.schemas()[0].tables[0].name, "person");
        assert_eq!(client.schema_cache_key(2).depth, 2);
    }
}
