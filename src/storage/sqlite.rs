use crate::models::{
    Batch, BatchStatus, BatchUpdate, Connection, QueryColumn, SchemaCacheKey, SchemaDocument,
    Statement, StatementError, StatementStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection as SqliteConnection, OptionalExtension, Result as SqliteResult, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

const BATCH_COLUMNS: &str = "id, user_id, connection_id, selected_text, batch_text, status, \
     start_time, stop_time, duration_ms, created_at";

const STATEMENT_COLUMNS: &str = "s.id, s.batch_id, s.sequence, s.statement_text, s.connection_id, \
     c.name, s.database_name, s.status, s.error, s.result_columns, s.result_rows, s.row_count, s.incomplete, \
     s.start_time, s.stop_time, s.duration_ms";

/// SQLite storage for connections, cached schemas, batches and statements
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl SqliteStorage {
    /// Open (or create) the storage file
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        Self::init(SqliteConnection::open(clean_path)?).await
    }

    /// Storage living only as long as the returned value
    pub async fn in_memory() -> SqliteResult<Self> {
        Self::init(SqliteConnection::open_in_memory()?).await
    }

    async fn init(conn: SqliteConnection) -> SqliteResult<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                driver TEXT NOT NULL,
                config TEXT NOT NULL,
                database_name TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- rowid order is the cache order; upserts keep the original row
            CREATE TABLE IF NOT EXISTS schema_cache (
                cache_key TEXT PRIMARY KEY,
                connection_id TEXT NOT NULL,
                depth INTEGER NOT NULL,
                data TEXT NOT NULL,
                retrieved_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                connection_id TEXT,
                selected_text TEXT,
                batch_text TEXT NOT NULL,
                status TEXT NOT NULL,
                start_time TEXT,
                stop_time TEXT,
                duration_ms INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS statements (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                statement_text TEXT NOT NULL,
                connection_id TEXT,
                database_name TEXT,
                status TEXT NOT NULL,
                error TEXT,
                result_columns TEXT,
                result_rows TEXT,
                row_count INTEGER,
                incomplete INTEGER,
                start_time TEXT,
                stop_time TEXT,
                duration_ms INTEGER,
                FOREIGN KEY (batch_id) REFERENCES batches(id) ON DELETE CASCADE,
                UNIQUE(batch_id, sequence)
            );

            CREATE INDEX IF NOT EXISTS idx_schema_cache_connection ON schema_cache(connection_id);
            CREATE INDEX IF NOT EXISTS idx_batches_user_created ON batches(user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_statements_batch_sequence ON statements(batch_id, sequence);
            "#,
        )?;

        Ok(())
    }

    // ==================== Connections ====================

    /// Insert or update a connection
    pub async fn save_connection(&self, connection: &Connection) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO connections (id, name, driver, config, database_name, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                driver = excluded.driver,
                config = excluded.config,
                database_name = excluded.database_name,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![
                connection.id,
                connection.name,
                connection.driver,
                to_json(&connection.config)?,
                connection.database,
                connection.created_at.to_rfc3339(),
                connection.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_connection(&self, id: &str) -> SqliteResult<Option<Connection>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, name, driver, config, database_name, created_at, updated_at FROM connections WHERE id = ?1",
            [id],
            connection_from_row,
        )
        .optional()
    }

    /// Exact-name lookup, as used by statement directives
    pub async fn get_connection_by_name(&self, name: &str) -> SqliteResult<Option<Connection>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, name, driver, config, database_name, created_at, updated_at FROM connections WHERE name = ?1",
            [name],
            connection_from_row,
        )
        .optional()
    }

    pub async fn list_connections(&self) -> SqliteResult<Vec<Connection>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, driver, config, database_name, created_at, updated_at FROM connections ORDER BY created_at",
        )?;
        let connections = stmt.query_map([], connection_from_row)?;
        connections.collect()
    }

    /// Delete a connection together with its cached schema documents
    pub async fn delete_connection(&self, id: &str) -> SqliteResult<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM schema_cache WHERE connection_id = ?1", [id])?;
        let rows_affected = tx.execute("DELETE FROM connections WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(rows_affected > 0)
    }

    // ==================== Schema Cache ====================

    /// Store a document, replacing any previous document for the key in place
    pub async fn put_schema(&self, key: &SchemaCacheKey, document: &SchemaDocument) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO schema_cache (cache_key, connection_id, depth, data, retrieved_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(cache_key) DO UPDATE SET
                data = excluded.data,
                retrieved_at = excluded.retrieved_at
            "#,
            rusqlite::params![
                key.to_string(),
                key.connection_id,
                key.depth,
                to_json(document)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_schema(&self, key: &SchemaCacheKey) -> SqliteResult<Option<SchemaDocument>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT data FROM schema_cache WHERE cache_key = ?1",
            [key.to_string()],
            |row| json_column(row, 0),
        )
        .optional()
    }

    /// Every cached document in cache (insertion) order
    pub async fn list_schemas(&self) -> SqliteResult<Vec<SchemaDocument>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT data FROM schema_cache ORDER BY rowid")?;
        let documents = stmt.query_map([], |row| json_column(row, 0))?;
        documents.collect()
    }

    // ==================== Batches ====================

    /// Insert a batch and all of its statements in one transaction
    pub async fn create_batch(&self, batch: &Batch) -> SqliteResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO batches ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                BATCH_COLUMNS
            ),
            rusqlite::params![
                batch.id,
                batch.user_id,
                batch.connection_id,
                batch.selected_text,
                batch.batch_text,
                batch.status.as_str(),
                batch.start_time.map(|t| t.to_rfc3339()),
                batch.stop_time.map(|t| t.to_rfc3339()),
                batch.duration_ms,
                batch.created_at.to_rfc3339(),
            ],
        )?;

        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO statements
                (id, batch_id, sequence, statement_text, connection_id, database_name, status, error,
                 result_columns, result_rows, row_count, incomplete, start_time, stop_time, duration_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                "#,
            )?;
            for statement in &batch.statements {
                insert.execute(rusqlite::params![
                    statement.id,
                    statement.batch_id,
                    statement.sequence,
                    statement.statement_text,
                    statement.connection_id,
                    statement.database,
                    statement.status.as_str(),
                    opt_json(&statement.error)?,
                    opt_json(&statement.columns)?,
                    opt_json(&statement.rows)?,
                    statement.row_count.map(|n| n as i64),
                    statement.incomplete,
                    statement.start_time.map(|t| t.to_rfc3339()),
                    statement.stop_time.map(|t| t.to_rfc3339()),
                    statement.duration_ms,
                ])?;
            }
        }

        tx.commit()
    }

    /// Batch with its statements ordered by sequence, each carrying its connection name
    pub async fn get_batch(&self, id: &str) -> SqliteResult<Option<Batch>> {
        let conn = self.conn.lock().await;
        let batch = conn
            .query_row(
                &format!("SELECT {} FROM batches WHERE id = ?1", BATCH_COLUMNS),
                [id],
                batch_from_row,
            )
            .optional()?;

        let Some(mut batch) = batch else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM statements s LEFT JOIN connections c ON c.id = s.connection_id \
             WHERE s.batch_id = ?1 ORDER BY s.sequence",
            STATEMENT_COLUMNS
        ))?;
        let statements = stmt.query_map([id], statement_from_row)?;
        batch.statements = statements.collect::<SqliteResult<Vec<_>>>()?;
        Ok(Some(batch))
    }

    /// Batches of one user, newest first, without their statements
    pub async fn list_batches_for_user(&self, user_id: &str) -> SqliteResult<Vec<Batch>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM batches WHERE user_id = ?1 ORDER BY created_at DESC",
            BATCH_COLUMNS
        ))?;
        let batches = stmt.query_map([user_id], batch_from_row)?;
        batches.collect()
    }

    /// Apply a status transition. Timing fields left as `None` keep their stored value.
    pub async fn update_batch(&self, id: &str, update: &BatchUpdate) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute(
            r#"
            UPDATE batches
            SET status = ?1,
                start_time = COALESCE(?2, start_time),
                stop_time = COALESCE(?3, stop_time),
                duration_ms = COALESCE(?4, duration_ms)
            WHERE id = ?5
            "#,
            rusqlite::params![
                update.status.as_str(),
                update.start_time.map(|t| t.to_rfc3339()),
                update.stop_time.map(|t| t.to_rfc3339()),
                update.duration_ms,
                id,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    // ==================== Statements ====================

    /// Persist the mutable part of a statement (status, results, timing)
    pub async fn update_statement(&self, statement: &Statement) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute(
            r#"
            UPDATE statements
            SET status = ?1, error = ?2, result_columns = ?3, result_rows = ?4, row_count = ?5,
                incomplete = ?6, start_time = ?7, stop_time = ?8, duration_ms = ?9
            WHERE id = ?10
            "#,
            rusqlite::params![
                statement.status.as_str(),
                opt_json(&statement.error)?,
                opt_json(&statement.columns)?,
                opt_json(&statement.rows)?,
                statement.row_count.map(|n| n as i64),
                statement.incomplete,
                statement.start_time.map(|t| t.to_rfc3339()),
                statement.stop_time.map(|t| t.to_rfc3339()),
                statement.duration_ms,
                statement.id,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Move every still-queued statement of a batch to cancelled
    pub async fn cancel_queued_statements(&self, batch_id: &str) -> SqliteResult<usize> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE statements SET status = ?1 WHERE batch_id = ?2 AND status = ?3",
            rusqlite::params![
                StatementStatus::Cancelled.as_str(),
                batch_id,
                StatementStatus::Queued.as_str(),
            ],
        )
    }

    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> SqliteResult<()> {
        self.conn.lock().await.execute_batch(sql)
    }

    /// Mark statements left `started` by an interrupted run as `error`
    pub async fn fail_started_statements(&self, batch_id: &str, error: &StatementError) -> SqliteResult<usize> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE statements SET status = ?1, error = ?2, stop_time = ?3 WHERE batch_id = ?4 AND status = ?5",
            rusqlite::params![
                StatementStatus::Error.as_str(),
                to_json(error)?,
                Utc::now().to_rfc3339(),
                batch_id,
                StatementStatus::Started.as_str(),
            ],
        )
    }
}

fn connection_from_row(row: &Row<'_>) -> SqliteResult<Connection> {
    Ok(Connection {
        id: row.get(0)?,
        name: row.get(1)?,
        driver: row.get(2)?,
        config: json_column::<serde_json::Map<String, serde_json::Value>>(row, 3)?,
        database: row.get(4)?,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
    })
}

fn batch_from_row(row: &Row<'_>) -> SqliteResult<Batch> {
    let status: String = row.get(5)?;
    Ok(Batch {
        id: row.get(0)?,
        user_id: row.get(1)?,
        connection_id: row.get(2)?,
        selected_text: row.get(3)?,
        batch_text: row.get(4)?,
        status: BatchStatus::parse(&status).ok_or_else(|| invalid_text(5, &status))?,
        start_time: opt_timestamp(row, 6)?,
        stop_time: opt_timestamp(row, 7)?,
        duration_ms: row.get(8)?,
        created_at: timestamp(row, 9)?,
        statements: Vec::new(),
    })
}

fn statement_from_row(row: &Row<'_>) -> SqliteResult<Statement> {
    let status: String = row.get(7)?;
    Ok(Statement {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        sequence: row.get(2)?,
        statement_text: row.get(3)?,
        connection_id: row.get(4)?,
        connection_name: row.get(5)?,
        database: row.get(6)?,
        status: StatementStatus::parse(&status).ok_or_else(|| invalid_text(7, &status))?,
        error: opt_json_column::<StatementError>(row, 8)?,
        columns: opt_json_column::<Vec<QueryColumn>>(row, 9)?,
        rows: opt_json_column(row, 10)?,
        row_count: row.get::<_, Option<i64>>(11)?.map(|n| n as usize),
        incomplete: row.get(12)?,
        start_time: opt_timestamp(row, 13)?,
        stop_time: opt_timestamp(row, 14)?,
        duration_ms: row.get(15)?,
    })
}

fn invalid_text(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}

fn timestamp(row: &Row<'_>, idx: usize) -> SqliteResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> SqliteResult<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> SqliteResult<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> SqliteResult<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => json_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> SqliteResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn opt_json<T: serde::Serialize>(value: &Option<T>) -> SqliteResult<Option<String>> {
    value.as_ref().map(to_json).transpose()
}
