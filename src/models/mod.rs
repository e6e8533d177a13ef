pub mod batch;
pub mod connection;
pub mod schema;
pub mod statement;

pub use batch::*;
pub use connection::*;
pub use schema::*;
pub use statement::*;
