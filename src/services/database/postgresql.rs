// PostgreSQL driver: one persistent client per session, rows streamed up to the fetch limit
use crate::error::AppError;
use crate::models::{ConfigField, Connection, QueryColumn};
use crate::services::database::adapter::{Driver, DriverRows, DriverSession, Lifecycle};
use futures::TryStreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};

const FIELDS: &[ConfigField] = &[
    ConfigField::text("host", "Host/Server/IP Address"),
    ConfigField::text("port", "Port (optional)"),
    ConfigField::text("database", "Database"),
    ConfigField::text("username", "Database Username"),
    ConfigField::password("password", "Database Password"),
];

const SCHEMA_SQL: &str = r#"
    SELECT
        c.table_schema,
        c.table_name,
        c.column_name,
        c.data_type
    FROM information_schema.columns c
    WHERE c.table_schema NOT IN ('pg_catalog', 'information_schema')
    ORDER BY c.table_schema, c.table_name, c.ordinal_position
"#;

pub struct PostgreSQLDriver;

#[async_trait::async_trait]
impl Driver for PostgreSQLDriver {
    fn id(&self) -> &'static str {
        "postgres"
    }

    fn name(&self) -> &'static str {
        "Postgres"
    }

    fn fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Persistent
    }

    fn probe_query(&self) -> &'static str {
        "SELECT 1 AS test"
    }

    fn schema_query(&self) -> &'static str {
        SCHEMA_SQL
    }

    /// The config `database` is the database to connect to. The connection's
    /// routed `database` names a schema inside it and is applied as the
    /// session `search_path`.
    async fn open(&self, connection: &Connection) -> Result<Box<dyn DriverSession>, AppError> {
        let mut config = tokio_postgres::Config::new();
        config.host(connection.config_str("host").unwrap_or("localhost"));
        config.port(connection.config_u16("port").unwrap_or(5432));
        config.application_name("db-batch");
        if let Some(user) = connection.config_str("username") {
            config.user(user);
        }
        if let Some(password) = connection.config_str("password") {
            config.password(password);
        }
        if let Some(dbname) = connection.config_str("database") {
            config.dbname(dbname);
        }

        let (client, conn) = config
            .connect(NoTls)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to connect to PostgreSQL: {}", e)))?;

        // The connection object drives the socket; it resolves once the client is dropped
        let driver_task = tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!("PostgreSQL connection closed with error: {}", e);
            }
        });

        if let Some(schema) = connection.database.as_deref() {
            let set_path = format!("SET search_path TO {}", quote_ident(schema));
            if let Err(e) = client.batch_execute(&set_path).await {
                drop(client);
                let _ = driver_task.await;
                return Err(AppError::Connection(format!(
                    "Failed to select schema {}: {}",
                    schema, e
                )));
            }
        }

        Ok(Box::new(PostgreSQLSession { client, driver_task }))
    }
}

pub struct PostgreSQLSession {
    client: Client,
    driver_task: JoinHandle<()>,
}

#[async_trait::async_trait]
impl DriverSession for PostgreSQLSession {
    async fn run(&mut self, sql: &str, max_rows: usize) -> Result<DriverRows, AppError> {
        let statement = self.client.prepare(sql).await.map_err(query_error)?;
        let columns: Vec<QueryColumn> = statement
            .columns()
            .iter()
            .map(|c| QueryColumn::new(c.name(), Some(c.type_().name().to_string())))
            .collect();

        let stream = self
            .client
            .query_raw(&statement, Vec::<String>::new())
            .await
            .map_err(query_error)?;
        futures::pin_mut!(stream);

        // Stop pulling once the limit is reached; the rest of the stream is discarded
        let mut rows = Vec::new();
        while rows.len() < max_rows {
            match stream.try_next().await.map_err(query_error)? {
                Some(row) => rows.push(Self::row_to_json(&row)),
                None => break,
            }
        }

        Ok(DriverRows { columns, rows })
    }

    async fn close(self: Box<Self>) -> Result<(), AppError> {
        let PostgreSQLSession { client, driver_task } = *self;
        drop(client);
        driver_task
            .await
            .map_err(|e| AppError::Connection(format!("PostgreSQL connection task failed: {}", e)))
    }
}

impl PostgreSQLSession {
    fn row_to_json(row: &Row) -> Vec<Value> {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| match column.type_().name() {
                "bool" => opt_json(row.try_get::<_, Option<bool>>(idx)),
                "int2" => opt_json(row.try_get::<_, Option<i16>>(idx)),
                "int4" => opt_json(row.try_get::<_, Option<i32>>(idx)),
                "int8" => opt_json(row.try_get::<_, Option<i64>>(idx)),
                "float4" => opt_json(row.try_get::<_, Option<f32>>(idx)),
                "float8" => opt_json(row.try_get::<_, Option<f64>>(idx)),
                "timestamp" => row
                    .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v.to_string()))
                    .unwrap_or(Value::Null),
                "timestamptz" => row
                    .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v.to_rfc3339()))
                    .unwrap_or(Value::Null),
                "date" => row
                    .try_get::<_, Option<chrono::NaiveDate>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| json!(v.to_string()))
                    .unwrap_or(Value::Null),
                "json" | "jsonb" => row
                    .try_get::<_, Option<Value>>(idx)
                    .ok()
                    .flatten()
                    .unwrap_or(Value::Null),
                type_name => match row.try_get::<_, Option<String>>(idx) {
                    Ok(Some(v)) => json!(v),
                    Ok(None) => Value::Null,
                    // Types without a text mapping (numeric, uuid, arrays...) show their name
                    Err(_) => json!(format!("<{}>", type_name)),
                },
            })
            .collect()
    }
}

fn opt_json<T: serde::Serialize>(value: Result<Option<T>, tokio_postgres::Error>) -> Value {
    value
        .ok()
        .flatten()
        .map(|v| json!(v))
        .unwrap_or(Value::Null)
}

fn query_error(e: tokio_postgres::Error) -> AppError {
    let details = match e.as_db_error() {
        Some(db_error) => format!("{} (code {})", db_error.message(), db_error.code().code()),
        None => e.to_string(),
    };
    AppError::Query(details)
}

/// Quote an identifier for interpolation into a statement
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("public"), "\"public\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_driver_capabilities() {
        let driver = PostgreSQLDriver;
        assert_eq!(driver.lifecycle(), Lifecycle::Persistent);
        assert!(driver.fields().iter().any(|f| f.key == "password"));
        assert!(driver.schema_query().contains("table_schema"));
    }
}
