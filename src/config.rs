use serde::Deserialize;
use std::env;

pub const DEFAULT_MAX_ROWS: usize = 50_000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub execution: ExecutionConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Fetch limit per statement; a result this long is flagged incomplete
    pub max_rows: usize,
    pub schema_max_rows: usize,
    pub schema_depth: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl LoggingConfig {
    /// Whether log output is colored. `auto` colors only a terminal.
    pub fn use_ansi(&self, is_terminal: bool) -> bool {
        match self.style.to_ascii_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => is_terminal,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "./batches.db")?
            .set_default("execution.max_rows", DEFAULT_MAX_ROWS as u64)?
            .set_default("execution.schema_max_rows", 1_000_000u64)?
            .set_default("execution.schema_depth", 2u64)?
            .set_default("batch.user_id", "local")?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(max_rows) = env::var("QUERY_MAX_ROWS") {
            builder = builder.set_override("execution.max_rows", parse_count(&max_rows, "QUERY_MAX_ROWS")?)?;
        }

        if let Ok(max_rows) = env::var("SCHEMA_MAX_ROWS") {
            builder = builder.set_override(
                "execution.schema_max_rows",
                parse_count(&max_rows, "SCHEMA_MAX_ROWS")?,
            )?;
        }

        if let Ok(user_id) = env::var("BATCH_USER_ID") {
            builder = builder.set_override("batch.user_id", user_id)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        builder.build()?.try_deserialize()
    }
}

fn parse_count(raw: &str, name: &str) -> Result<u64, config::ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(config::ConfigError::Message(format!(
            "{} must be a positive integer, got {:?}",
            name, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        env::remove_var("DATABASE_URL");
        env::remove_var("QUERY_MAX_ROWS");
        env::remove_var("SCHEMA_MAX_ROWS");
        env::remove_var("BATCH_USER_ID");

        let config = Config::from_env().unwrap();
        assert_eq!(config.execution.max_rows, DEFAULT_MAX_ROWS);
        assert_eq!(config.execution.schema_max_rows, 1_000_000);
        assert_eq!(config.execution.schema_depth, 2);
    }

    #[test]
    fn test_logging_style() {
        let logging = |style: &str| LoggingConfig {
            level: "debug".to_string(),
            style: style.to_string(),
        };
        assert!(logging("always").use_ansi(false));
        assert!(!logging("Never").use_ansi(true));
        assert!(logging("auto").use_ansi(true));
        assert!(!logging("auto").use_ansi(false));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(" 200 ", "X").unwrap(), 200);
        assert!(parse_count("0", "X").is_err());
        assert!(parse_count("lots", "X").is_err());
    }
}
