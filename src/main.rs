use anyhow::Context;
use std::io::{IsTerminal, Read};
use std::sync::Arc;
use tracing::{error, info};

use db_batch::config::{Config, LoggingConfig};
use db_batch::error::ErrorResponse;
use db_batch::models::{Batch, NewBatch};
use db_batch::services::{
    BatchExecutor, BatchService, DriverRegistry, SchemaCache, SchemaService, TracingNotifier,
};
use db_batch::storage::SqliteStorage;
use db_batch::AppError;

/// Reads SQL from stdin, runs it as one batch and prints the finished batch as JSON.
/// An optional argument names the connection used for statements the router cannot place.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.logging);

    let storage = Arc::new(
        SqliteStorage::new(&config.database.url)
            .await
            .with_context(|| format!("Failed to initialize database at {}", config.database.url))?,
    );
    info!("Using storage at {}", config.database.url);

    let text = read_stdin().context("Failed to read SQL from stdin")?;
    match run(&config, storage, text).await {
        Ok(batch) => {
            println!("{}", serde_json::to_string_pretty(&batch)?);
            Ok(())
        }
        Err(e) => {
            error!("Batch run failed: {}", e);
            println!("{}", serde_json::to_string_pretty(&ErrorResponse::from(&e))?);
            std::process::exit(1);
        }
    }
}

async fn run(config: &Config, storage: Arc<SqliteStorage>, text: String) -> Result<Batch, AppError> {
    let registry = Arc::new(DriverRegistry::with_builtin_drivers());
    let cache: Arc<dyn SchemaCache> = storage.clone();

    let schemas = SchemaService::new(storage.clone(), cache.clone(), registry.clone()).with_limits(
        config.execution.max_rows,
        config.execution.schema_max_rows,
        config.execution.schema_depth,
    );
    let loaded = schemas.refresh_missing().await?;
    if loaded > 0 {
        info!("Loaded {} connection schema(s)", loaded);
    }

    let mut request = NewBatch::new(config.batch.user_id.clone(), text);
    if let Some(target) = std::env::args().nth(1) {
        let connection = match storage.get_connection_by_name(&target).await? {
            Some(connection) => connection,
            None => storage
                .get_connection(&target)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Unknown connection: {}", target)))?,
        };
        request = request.with_connection(connection.id);
    }

    let batch = BatchService::new(storage.clone(), cache).create(request).await?;
    let executor = BatchExecutor::new(
        storage,
        registry,
        Arc::new(TracingNotifier),
        config.execution.max_rows,
    );
    executor.execute(&batch.id).await
}

/// stderr subscriber filtered by `logging.level`; `logging.style` picks colors
fn init_tracing(logging: &LoggingConfig) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(logging.use_ansi(std::io::stderr().is_terminal()))
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&logging.level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn read_stdin() -> std::io::Result<String> {
    let mut text = String::new();
    std::io::stdin().read_to_string(&mut text)?;
    Ok(text)
}
