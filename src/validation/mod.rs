pub mod sql_parser;

pub use sql_parser::{Directive, ParsedStatement, SqlParser, StatementKind};
