// Driver abstraction layer for multi-database support
pub mod adapter;
pub mod catalog;
pub mod druid;
pub mod mysql;
pub mod postgresql;
pub mod sqlite;

pub use adapter::{Driver, DriverRows, DriverSession, Lifecycle};
pub use catalog::fold_schema_rows;
pub use druid::DruidDriver;
pub use mysql::MySQLDriver;
pub use postgresql::PostgreSQLDriver;
pub use sqlite::SqliteDriver;

use crate::error::AppError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mapping from driver identifier to driver implementation
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<&'static str, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every driver shipped in this crate
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PostgreSQLDriver));
        registry.register(Arc::new(MySQLDriver));
        registry.register(Arc::new(SqliteDriver));
        registry.register(Arc::new(DruidDriver));
        registry
    }

    /// Add a driver, replacing any previous driver with the same id
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        if self.drivers.insert(driver.id(), driver.clone()).is_some() {
            tracing::warn!("Driver {} registered twice, keeping the latest", driver.id());
        }
    }

    /// Look up a driver by id. Common aliases (`postgresql`, `mariadb`...) are accepted.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Driver>, AppError> {
        let normalized = id.trim().to_lowercase();
        let canonical = match normalized.as_str() {
            "postgresql" | "pg" => "postgres",
            "mariadb" => "mysql",
            "sqlite3" => "sqlite",
            other => other,
        };
        self.drivers
            .get(canonical)
            .cloned()
            .ok_or_else(|| AppError::Validation(format!("Unsupported driver: {}", id)))
    }

    pub fn list(&self) -> impl Iterator<Item = &Arc<dyn Driver>> {
        self.drivers.values()
    }
}
