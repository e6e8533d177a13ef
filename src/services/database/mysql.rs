// MySQL driver: a fresh connection per call, closed as soon as the call returns
use crate::error::AppError;
use crate::models::{ConfigField, Connection, QueryColumn};
use crate::services::database::adapter::{Driver, DriverRows, DriverSession, Lifecycle};
use mysql_async::{prelude::*, Conn, OptsBuilder, Row, Value as MySqlValue};
use serde_json::{json, Value};

const FIELDS: &[ConfigField] = &[
    ConfigField::text("host", "Host/Server/IP Address"),
    ConfigField::text("port", "Port (optional)"),
    ConfigField::text("username", "Database Username"),
    ConfigField::password("password", "Database Password"),
];

const SCHEMA_SQL: &str = r#"
    SELECT
        c.TABLE_SCHEMA AS table_schema,
        c.TABLE_NAME AS table_name,
        c.COLUMN_NAME AS column_name,
        c.DATA_TYPE AS data_type
    FROM information_schema.COLUMNS c
    WHERE c.TABLE_SCHEMA NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')
    ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME, c.ORDINAL_POSITION
"#;

pub struct MySQLDriver;

#[async_trait::async_trait]
impl Driver for MySQLDriver {
    fn id(&self) -> &'static str {
        "mysql"
    }

    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn fields(&self) -> &'static [ConfigField] {
        FIELDS
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::PerCall
    }

    fn probe_query(&self) -> &'static str {
        "SELECT 1 AS test"
    }

    fn schema_query(&self) -> &'static str {
        SCHEMA_SQL
    }

    /// The connection's `database` becomes the default schema of the session
    async fn open(&self, connection: &Connection) -> Result<Box<dyn DriverSession>, AppError> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(connection.config_str("host").unwrap_or("localhost"))
            .tcp_port(connection.config_u16("port").unwrap_or(3306))
            .user(connection.config_str("username"))
            .pass(connection.config_str("password"))
            .db_name(connection.database.as_deref());

        let conn = Conn::new(opts)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to connect to MySQL: {}", e)))?;

        Ok(Box::new(MySQLSession { conn }))
    }
}

pub struct MySQLSession {
    conn: Conn,
}

#[async_trait::async_trait]
impl DriverSession for MySQLSession {
    async fn run(&mut self, sql: &str, max_rows: usize) -> Result<DriverRows, AppError> {
        let mut result = self
            .conn
            .query_iter(sql)
            .await
            .map_err(|e| AppError::Query(e.to_string()))?;

        let columns = result
            .columns_ref()
            .iter()
            .map(|c| QueryColumn::new(c.name_str(), Some(format!("{:?}", c.column_type()))))
            .collect();

        // Stop reading rows at the limit; the rest is drained without being kept
        let mut json_rows = Vec::new();
        while json_rows.len() < max_rows {
            match result.next().await.map_err(|e| AppError::Query(e.to_string()))? {
                Some(row) => json_rows.push(Self::row_to_json(&row)),
                None => break,
            }
        }
        result
            .drop_result()
            .await
            .map_err(|e| AppError::Query(e.to_string()))?;

        Ok(DriverRows {
            columns,
            rows: json_rows,
        })
    }

    async fn close(self: Box<Self>) -> Result<(), AppError> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to disconnect from MySQL: {}", e)))
    }
}

impl MySQLSession {
    fn row_to_json(row: &Row) -> Vec<Value> {
        (0..row.len())
            .map(|idx| match row.get_opt::<MySqlValue, usize>(idx) {
                Some(Ok(value)) => Self::mysql_value_to_json(value),
                _ => Value::Null,
            })
            .collect()
    }

    fn mysql_value_to_json(mysql_val: MySqlValue) -> Value {
        match mysql_val {
            MySqlValue::NULL => Value::Null,
            MySqlValue::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(s) => json!(s),
                Err(e) => json!(format!("<binary {} bytes>", e.as_bytes().len())),
            },
            MySqlValue::Int(i) => json!(i),
            MySqlValue::UInt(u) => json!(u),
            MySqlValue::Float(f) => json!(f),
            MySqlValue::Double(d) => json!(d),
            MySqlValue::Date(y, m, d, h, min, s, _) => {
                json!(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, min, s))
            }
            MySqlValue::Time(is_neg, d, h, m, s, _) => {
                let sign = if is_neg { "-" } else { "" };
                let total_hours = d * 24 + h as u32;
                json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_value_to_json() {
        assert_eq!(MySQLSession::mysql_value_to_json(MySqlValue::NULL), Value::Null);
        assert_eq!(MySQLSession::mysql_value_to_json(MySqlValue::Int(-3)), json!(-3));
        assert_eq!(
            MySQLSession::mysql_value_to_json(MySqlValue::Bytes(b"ada".to_vec())),
            json!("ada")
        );
        assert_eq!(
            MySQLSession::mysql_value_to_json(MySqlValue::Date(2024, 2, 29, 13, 5, 0, 0)),
            json!("2024-02-29 13:05:00")
        );
        assert_eq!(
            MySQLSession::mysql_value_to_json(MySqlValue::Time(true, 1, 2, 3, 4, 0)),
            json!("-26:03:04")
        );
    }

    /// Runs against a live server when `MYSQL_TEST_HOST` is set
    #[tokio::test]
    async fn test_run_stops_at_max_rows() {
        let Ok(host) = std::env::var("MYSQL_TEST_HOST") else {
            return;
        };
        let mut config = serde_json::Map::new();
        config.insert("host".to_string(), json!(host));
        for (key, var) in [("username", "MYSQL_TEST_USER"), ("password", "MYSQL_TEST_PASSWORD")] {
            if let Ok(value) = std::env::var(var) {
                config.insert(key.to_string(), json!(value));
            }
        }
        let connection = Connection::new("mysql-test", "mysql", config);
        let mut session = MySQLDriver.open(&connection).await.unwrap();

        let result = session
            .run("SELECT n FROM (SELECT 1 AS n UNION ALL SELECT 2 UNION ALL SELECT 3) t", 2)
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.columns[0].name, "n");

        // column metadata survives an empty result
        let result = session.run("SELECT 1 AS n FROM DUAL WHERE 1 = 0", 2).await.unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.columns.len(), 1);

        session.close().await.unwrap();
    }

    #[test]
    fn test_driver_is_per_call() {
        assert_eq!(MySQLDriver.lifecycle(), Lifecycle::PerCall);
    }
}
