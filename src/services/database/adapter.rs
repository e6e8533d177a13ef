// Driver capability contract shared by every database product
use crate::error::AppError;
use crate::models::{ConfigField, Connection, QueryColumn};
use serde_json::Value;

/// How a driver's client lives across calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// A fresh client is opened for every call and closed right after;
    /// explicit connect/disconnect are no-ops.
    PerCall,
    /// One client is connected, reused across calls and explicitly
    /// disconnected by whoever opened it.
    Persistent,
}

/// Rows as returned by a driver, before the client derives `incomplete`
#[derive(Debug, Clone, Default)]
pub struct DriverRows {
    pub columns: Vec<QueryColumn>,
    pub rows: Vec<Vec<Value>>,
}

/// Database driver - one implementation per database product
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Registry identifier stored on connections
    fn id(&self) -> &'static str;

    /// Display name
    fn name(&self) -> &'static str;

    /// Configuration fields a connection for this driver carries
    fn fields(&self) -> &'static [ConfigField];

    fn lifecycle(&self) -> Lifecycle;

    /// Cheap query used to test connectivity
    fn probe_query(&self) -> &'static str;

    /// Structural query returning one row per column with `table_schema`
    /// (optional), `table_name`, `column_name` and `data_type`
    fn schema_query(&self) -> &'static str;

    /// Open a client for the connection
    async fn open(&self, connection: &Connection) -> Result<Box<dyn DriverSession>, AppError>;
}

/// An open client of a driver
#[async_trait::async_trait]
pub trait DriverSession: Send {
    /// Run one statement, fetching at most `max_rows` rows
    async fn run(&mut self, sql: &str, max_rows: usize) -> Result<DriverRows, AppError>;

    /// Tear the client down
    async fn close(self: Box<Self>) -> Result<(), AppError>;
}
