// SQLite driver: a file-backed database kept open for the whole session
use crate::error::AppError;
use crate::models::{ConfigField, Connection, QueryColumn};
use crate::services::database::adapter::{Driver, DriverRows, DriverSession, Lifecycle};
use rusqlite::types::ValueRef;
use rusqlite::OpenFlags;
use serde_json::{json, Value};

const FIELDS: &[ConfigField] = &[
    ConfigField::text("filename", "Filename / path"),
    ConfigField::checkbox("readonly", "Open read-only"),
];

// SQLite has no schema level, so the result folds into a flat document
const SCHEMA_SQL: &str = r#"
    SELECT
        m.name AS table_name,
        p.name AS column_name,
        p.type AS data_type
    FROM sqlite_master m
    JOIN pragma_table_info(m.name) p
    WHERE m.type IN ('table', 'view')
      AND m.name NOT LIKE 'sqlite_%'
    ORDER BY m.name, p.cid
"#;

pub struct SqliteDriver;

#[async_trait::async_trait]
impl Driver for SqliteDriver {
    fn id(&self) -> &'static str {
        "sqlite"
    }

    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Persistent
    }

    fn probe_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn schema_query(&self) -> &'static str {
        SCHEMA_SQL
    }

    async fn open(&self, connection: &Connection) -> Result<Box<dyn DriverSession>, AppError> {
        let filename = connection
            .config_str("filename")
            .ok_or_else(|| AppError::Connection("SQLite filename is required".to_string()))?;

        let flags = if connection.config_bool("readonly") {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::default()
        };

        let conn = rusqlite::Connection::open_with_flags(filename, flags)
            .map_err(|e| AppError::Connection(format!("Failed to open SQLite database {}: {}", filename, e)))?;

        tracing::debug!("Opened SQLite database: {}", filename);
        Ok(Box::new(SqliteSession { conn }))
    }
}

pub struct SqliteSession {
    conn: rusqlite::Connection,
}

#[async_trait::async_trait]
impl DriverSession for SqliteSession {
    async fn run(&mut self, sql: &str, max_rows: usize) -> Result<DriverRows, AppError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| AppError::Query(e.to_string()))?;

        let columns: Vec<QueryColumn> = stmt
            .column_names()
            .into_iter()
            .map(|name| QueryColumn::new(name, None))
            .collect();
        let column_count = columns.len();

        let mut rows = stmt.query([]).map_err(|e| AppError::Query(e.to_string()))?;
        let mut json_rows = Vec::new();
        while json_rows.len() < max_rows {
            let Some(row) = rows.next().map_err(|e| AppError::Query(e.to_string()))? else {
                break;
            };
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value = row.get_ref(idx).map_err(|e| AppError::Query(e.to_string()))?;
                values.push(Self::sqlite_value_to_json(value));
            }
            json_rows.push(values);
        }

        Ok(DriverRows {
            columns,
            rows: json_rows,
        })
    }

    async fn close(self: Box<Self>) -> Result<(), AppError> {
        self.conn
            .close()
            .map_err(|(_, e)| AppError::Connection(format!("Failed to close SQLite database: {}", e)))
    }
}

impl SqliteSession {
    fn sqlite_value_to_json(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => json!(i),
            ValueRef::Real(f) => json!(f),
            ValueRef::Text(bytes) => json!(String::from_utf8_lossy(bytes)),
            ValueRef::Blob(bytes) => json!(format!("<blob {} bytes>", bytes.len())),
        }
    }
}
