// Apache Druid driver using the HTTP SQL API
// Every call is an independent HTTP request, so there is nothing to keep open
use crate::error::AppError;
use crate::models::{ConfigField, Connection, QueryColumn};
use crate::services::database::adapter::{Driver, DriverRows, DriverSession, Lifecycle};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use url::Url;

const FIELDS: &[ConfigField] = &[
    ConfigField::text("url", "Router URL (http://host:8888)"),
    ConfigField::text("username", "Username (optional)"),
    ConfigField::password("password", "Password (optional)"),
];

const SCHEMA_SQL: &str = r#"
    SELECT
        TABLE_SCHEMA AS table_schema,
        TABLE_NAME AS table_name,
        COLUMN_NAME AS column_name,
        DATA_TYPE AS data_type
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = 'druid'
    ORDER BY TABLE_NAME, ORDINAL_POSITION
"#;

pub struct DruidDriver;

#[derive(Debug, Serialize)]
struct DruidSqlRequest<'a> {
    query: &'a str,
    #[serde(rename = "resultFormat")]
    result_format: &'static str,
    header: bool,
    context: Value,
}

#[async_trait::async_trait]
impl Driver for DruidDriver {
    fn id(&self) -> &'static str {
        "druid"
    }

    fn name(&self) -> &'static str {
        "Apache Druid"
    }

    fn fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::PerCall
    }

    fn probe_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn schema_query(&self) -> &'static str {
        SCHEMA_SQL
    }

    async fn open(&self, connection: &Connection) -> Result<Box<dyn DriverSession>, AppError> {
        let raw_url = connection
            .config_str("url")
            .ok_or_else(|| AppError::Connection("Druid router URL is required".to_string()))?;
        let base_url = Self::base_url(raw_url)?;

        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Box::new(DruidSession {
            client,
            sql_endpoint: format!("{}/druid/v2/sql", base_url),
            username: connection.config_str("username").map(str::to_string),
            password: connection.config_str("password").map(str::to_string),
        }))
    }
}

impl DruidDriver {
    /// Normalize `druid://host:port` and `http(s)://host:port/...` into a base URL
    fn base_url(connection_url: &str) -> Result<String, AppError> {
        let url = Url::parse(connection_url)
            .map_err(|e| AppError::Connection(format!("Invalid Druid URL: {}", e)))?;
        let host = url.host_str().unwrap_or("localhost");

        match url.scheme() {
            "druid" => Ok(format!("http://{}:{}", host, url.port().unwrap_or(8888))),
            "http" | "https" => Ok(format!(
                "{}://{}{}",
                url.scheme(),
                host,
                url.port().map(|p| format!(":{}", p)).unwrap_or_default()
            )),
            other => Err(AppError::Connection(format!(
                "URL must use druid://, http:// or https:// scheme for Druid, got {}://",
                other
            ))),
        }
    }
}

pub struct DruidSession {
    client: Client,
    sql_endpoint: String,
    username: Option<String>,
    password: Option<String>,
}

#[async_trait::async_trait]
impl DriverSession for DruidSession {
    async fn run(&mut self, sql: &str, max_rows: usize) -> Result<DriverRows, AppError> {
        // Druid enforces the fetch limit server-side through the query context
        let request = DruidSqlRequest {
            query: sql,
            result_format: "array",
            header: true,
            context: json!({
                "sqlTimeZone": "UTC",
                "sqlOuterLimit": max_rows,
            }),
        };

        let mut builder = self.client.post(&self.sql_endpoint).json(&request);
        if let Some(username) = &self.username {
            builder = builder.basic_auth(username, self.password.as_deref());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("HTTP request to Druid failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Query(format!(
                "Druid SQL query failed ({}): {}",
                status,
                Self::error_message(&error_body)
            )));
        }

        let body: Vec<Vec<Value>> = response
            .json()
            .await
            .map_err(|e| AppError::Query(format!("Failed to parse Druid response: {}", e)))?;

        Ok(Self::split_header(body, max_rows))
    }

    async fn close(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

impl DruidSession {
    /// With `header: true` the first array row carries the column names
    fn split_header(body: Vec<Vec<Value>>, max_rows: usize) -> DriverRows {
        let mut rows = body.into_iter();
        let columns = rows
            .next()
            .map(|header| {
                header
                    .into_iter()
                    .map(|name| match name {
                        Value::String(s) => QueryColumn::new(s, None),
                        other => QueryColumn::new(other.to_string(), None),
                    })
                    .collect()
            })
            .unwrap_or_default();

        DriverRows {
            columns,
            rows: rows.take(max_rows).collect(),
        }
    }

    /// Druid error bodies are JSON with an `errorMessage` field
    fn error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("errorMessage").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(DruidDriver::base_url("druid://broker").unwrap(), "http://broker:8888");
        assert_eq!(
            DruidDriver::base_url("https://druid.example.com:9088/unified-console.html").unwrap(),
            "https://druid.example.com:9088"
        );
        assert!(DruidDriver::base_url("postgres://x").is_err());
    }

    #[test]
    fn test_split_header() {
        let body = vec![
            vec![json!("__time"), json!("channel")],
            vec![json!("2024-01-01T00:00:00.000Z"), json!("#en")],
            vec![json!("2024-01-01T00:00:01.000Z"), json!("#fr")],
        ];
        let result = DruidSession::split_header(body, 1);
        assert_eq!(result.columns[1].name, "channel");
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":"Plan validation failed","errorMessage":"Object 'nope' not found"}"#;
        assert_eq!(DruidSession::error_message(body), "Object 'nope' not found");
        assert_eq!(DruidSession::error_message("gateway timeout"), "gateway timeout");
    }
}
