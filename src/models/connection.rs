use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;
use uuid::Uuid;

/// A stored database connection.
///
/// `config` holds the driver-specific fields keyed by the driver's
/// [`ConfigField::key`]s. `database` is the default database (or schema,
/// depending on the driver) and is the only field overridden per statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    pub database: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(name: impl Into<String>, driver: impl Into<String>, config: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            driver: driver.into(),
            config,
            database: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Working copy with the statement-level database applied.
    /// `None` keeps the connection's own default.
    pub fn with_database(&self, database: Option<&str>) -> Self {
        let mut working = self.clone();
        if let Some(database) = database {
            working.database = Some(database.to_string());
        }
        working
    }

    /// String config value, empty strings treated as missing
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Numeric config value; form inputs frequently store numbers as strings
    pub fn config_u16(&self, key: &str) -> Option<u16> {
        match self.config.get(key)? {
            Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Where the connection points, safe to log: passwords are masked or left out
    pub fn display_target(&self) -> String {
        if let Some(raw) = self.config_str("url") {
            return match Url::parse(raw) {
                Ok(mut url) => {
                    if url.password().is_some() {
                        let _ = url.set_password(Some("****"));
                    }
                    url.to_string()
                }
                Err(_) => format!("{}://<invalid url>", self.driver),
            };
        }
        if let Some(filename) = self.config_str("filename") {
            return format!("{}:{}", self.driver, filename);
        }

        let user = self
            .config_str("username")
            .map(|u| format!("{}@", u))
            .unwrap_or_default();
        let port = self
            .config_u16("port")
            .map(|p| format!(":{}", p))
            .unwrap_or_default();
        let database = self
            .database
            .as_deref()
            .or_else(|| self.config_str("database"))
            .map(|d| format!("/{}", d))
            .unwrap_or_default();
        format!(
            "{}://{}{}{}{}",
            self.driver,
            user,
            self.config_str("host").unwrap_or("localhost"),
            port,
            database
        )
    }

    pub fn config_bool(&self, key: &str) -> bool {
        match self.config.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// Input widget used to collect a driver config field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum InputType {
    Text,
    Password,
    Checkbox,
}

/// One configuration field a driver expects on its connections
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConfigField {
    pub key: &'static str,
    pub input_type: InputType,
    pub label: &'static str,
}

impl ConfigField {
    pub const fn text(key: &'static str, label: &'static str) -> Self {
        Self { key, input_type: InputType::Text, label }
    }

    pub const fn password(key: &'static str, label: &'static str) -> Self {
        Self { key, input_type: InputType::Password, label }
    }

    pub const fn checkbox(key: &'static str, label: &'static str) -> Self {
        Self { key, input_type: InputType::Checkbox, label }
    }
}
