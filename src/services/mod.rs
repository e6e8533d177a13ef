pub mod batch_executor;
pub mod batch_service;
pub mod connection_client;
pub mod database; // One driver per database product
pub mod metadata_cache;
pub mod notifier;
pub mod schema_service;
pub mod schema_tree;
pub mod statement_router;

pub use batch_executor::*;
pub use batch_service::*;
pub use connection_client::{ConnectionClient, DEFAULT_SCHEMA_MAX_ROWS};
pub use database::DriverRegistry;
pub use metadata_cache::*;
pub use notifier::*;
pub use schema_service::*;
pub use schema_tree::*;
pub use statement_router::*;
