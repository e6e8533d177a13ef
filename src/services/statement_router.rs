use crate::models::{Connection, RoutedStatement, SchemaDocument};
use crate::validation::{Directive, SqlParser};
use std::ops::ControlFlow;
use std::sync::Arc;

pub const NO_DATABASE_SPECIFIED: &str = "No Database Specified.";
pub const DATABASE_OR_TABLE_NOT_FOUND: &str = "Database or Table not Found";

/// Outcome of routing a single statement
enum Step {
    Routed(RoutedStatement),
    /// Nothing to bind the statement to; it is left out of the batch
    Skipped,
    /// Routing failed; the error statement is kept and the rest of the text is dropped
    Halt(RoutedStatement),
}

/// Assigns every statement of a batch to a connection and database
///
/// Documents are searched in the order given, which is the cache order. When
/// two connections hold a table with the same name the first document wins.
pub struct StatementRouter {
    documents: Vec<Arc<SchemaDocument>>,
    connections: Vec<Connection>,
    default_connection_id: Option<String>,
}

impl StatementRouter {
    pub fn new(
        documents: Vec<Arc<SchemaDocument>>,
        connections: Vec<Connection>,
        default_connection_id: Option<String>,
    ) -> Self {
        Self {
            documents,
            connections,
            default_connection_id,
        }
    }

    /// Route raw batch text into ordered statement records.
    ///
    /// Never returns an empty list: when nothing routes, one error statement
    /// holding the full text is produced.
    pub fn route(&self, text: &str) -> Vec<RoutedStatement> {
        let chunks = match SqlParser::split_statements(text) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::debug!("Could not split batch text: {}", e);
                return vec![RoutedStatement::errored(
                    text,
                    self.default_connection_id.clone(),
                    e.title(),
                )];
            }
        };

        let folded = chunks.iter().try_fold(Vec::new(), |mut routed, chunk| {
            match self.route_statement(chunk) {
                Step::Routed(statement) => {
                    routed.push(statement);
                    ControlFlow::Continue(routed)
                }
                Step::Skipped => ControlFlow::Continue(routed),
                Step::Halt(statement) => {
                    routed.push(statement);
                    ControlFlow::Break(routed)
                }
            }
        });

        let routed = match folded {
            ControlFlow::Continue(routed) | ControlFlow::Break(routed) => routed,
        };

        if routed.is_empty() {
            return vec![RoutedStatement::errored(
                text,
                self.default_connection_id.clone(),
                DATABASE_OR_TABLE_NOT_FOUND,
            )];
        }
        routed
    }

    fn route_statement(&self, chunk: &str) -> Step {
        let (directive, body) = SqlParser::strip_directive(chunk);
        let directed = directive.as_ref().and_then(|d| self.directive_connection(d));
        let fallback = directed
            .map(|c| c.id.clone())
            .or_else(|| self.default_connection_id.clone());

        let parsed = match SqlParser::parse_statement(body) {
            Ok(parsed) => parsed,
            Err(e) => return Step::Halt(RoutedStatement::errored(body, fallback, e.title())),
        };

        let database = parsed
            .qualifier
            .clone()
            .or_else(|| directive.as_ref().map(|d| d.database.clone()));

        if !parsed.is_select() && database.is_none() {
            return Step::Halt(RoutedStatement::errored(body, fallback, NO_DATABASE_SPECIFIED));
        }

        if let Some(connection) = directed {
            tracing::debug!("Statement bound by directive to {}", connection.name);
            return Step::Routed(RoutedStatement::queued(body, connection.id.clone(), database));
        }

        let found = parsed
            .table
            .as_deref()
            .and_then(|table| self.find_table(table, database.as_deref()));

        match (found, &self.default_connection_id) {
            (Some((connection_id, schema)), _) => {
                tracing::debug!(
                    "Table {:?} found on connection {} ({:?})",
                    parsed.table,
                    connection_id,
                    schema
                );
                Step::Routed(RoutedStatement::queued(body, connection_id, schema))
            }
            (None, Some(default_id)) => {
                tracing::debug!("Table {:?} not cached, using batch connection", parsed.table);
                Step::Routed(RoutedStatement::queued(body, default_id.clone(), database))
            }
            (None, None) => {
                tracing::debug!("Table {:?} not found on any connection, skipping", parsed.table);
                Step::Skipped
            }
        }
    }

    /// Exact-name lookup. A name that matches nothing is ignored.
    fn directive_connection(&self, directive: &Directive) -> Option<&Connection> {
        let name = directive.connection_name.as_deref()?;
        let connection = self.connections.iter().find(|c| c.name == name);
        if connection.is_none() {
            tracing::debug!("Directive names unknown connection {}, ignoring it", name);
        }
        connection
    }

    /// First `(connection_id, schema)` holding the table, constrained to the
    /// database when one is known. Flat documents only match unconstrained lookups.
    fn find_table(&self, table: &str, database: Option<&str>) -> Option<(String, Option<String>)> {
        self.documents.iter().find_map(|document| {
            document
                .tables()
                .find(|(schema, candidate)| {
                    candidate.name.eq_ignore_ascii_case(table)
                        && match (database, schema) {
                            (Some(db), Some(schema)) => schema.eq_ignore_ascii_case(db),
                            (Some(_), None) => false,
                            (None, _) => true,
                        }
                })
                .map(|(schema, _)| (document.connection_id.clone(), schema.map(str::to_string)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Schema, StatementStatus, Table};
    use serde_json::Map;

    fn table(name: &str) -> Table {
        Table {
            name: name.to_string(),
            description: None,
            columns: vec![],
        }
    }

    fn nested(connection_id: &str, schemas: &[(&str, &[&str])]) -> Arc<SchemaDocument> {
        Arc::new(SchemaDocument::nested(
            connection_id,
            schemas
                .iter()
                .map(|(name, tables)| Schema {
                    name: name.to_string(),
                    description: None,
                    tables: tables.iter().map(|t| table(t)).collect(),
                })
                .collect(),
        ))
    }

    fn connection(id: &str, name: &str) -> Connection {
        let mut connection = Connection::new(name, "postgres", Map::new());
        connection.id = id.to_string();
        connection
    }

    fn router(default: Option<&str>) -> StatementRouter {
        StatementRouter::new(
            vec![
                nested("C1", &[("public", &["person", "address"])]),
                nested("C2", &[("sales", &["orders"]), ("public", &["person"])]),
                Arc::new(SchemaDocument::flat("C3", vec![table("events")])),
            ],
            vec![connection("C1", "primary"), connection("C2", "warehouse")],
            default.map(str::to_string),
        )
    }

    #[test]
    fn test_select_routes_to_cached_table() {
        let routed = router(None).route("SELECT * FROM person");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].connection_id.as_deref(), Some("C1"));
        assert_eq!(routed[0].database.as_deref(), Some("public"));
        assert_eq!(routed[0].status(), StatementStatus::Queued);
    }

    #[test]
    fn test_drop_without_database_errors() {
        let routed = router(Some("C2")).route("DROP TABLE person");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].status(), StatementStatus::Error);
        assert_eq!(routed[0].error.as_ref().unwrap().title, NO_DATABASE_SPECIFIED);
        // the batch fallback connection is still attached
        assert_eq!(routed[0].connection_id.as_deref(), Some("C2"));
    }

    #[test]
    fn test_parse_error_stops_routing() {
        let routed = router(None).route("SELEKT * FORM x; SELECT * FROM person");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].status(), StatementStatus::Error);
        assert_eq!(routed[0].statement_text, "SELEKT * FORM x");
        assert!(!routed[0].error.as_ref().unwrap().title.is_empty());
    }

    #[test]
    fn test_statements_before_an_error_are_kept() {
        let routed = router(None).route("SELECT * FROM person; DELETE FROM address; SELECT * FROM orders");
        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0].status(), StatementStatus::Queued);
        assert_eq!(routed[1].error.as_ref().unwrap().title, NO_DATABASE_SPECIFIED);
    }

    #[test]
    fn test_qualifier_constrains_search() {
        let routed = router(None).route("SELECT * FROM sales.orders; SELECT * FROM public.orders; SELECT * FROM orders");
        // public.orders exists nowhere and there is no batch connection
        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0].connection_id.as_deref(), Some("C2"));
        assert_eq!(routed[0].database.as_deref(), Some("sales"));
        assert_eq!(routed[1].statement_text, "SELECT * FROM orders");
    }

    #[test]
    fn test_first_document_wins() {
        let routed = router(None).route("select * from PERSON");
        assert_eq!(routed[0].connection_id.as_deref(), Some("C1"));
    }

    #[test]
    fn test_directive_binds_connection_and_database() {
        let routed = router(None).route("/* warehouse, public */ DELETE FROM person WHERE id = 1");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].connection_id.as_deref(), Some("C2"));
        assert_eq!(routed[0].database.as_deref(), Some("public"));
        assert_eq!(routed[0].statement_text, "DELETE FROM person WHERE id = 1");
    }

    #[test]
    fn test_directive_connection_name_with_spaces() {
        let router = StatementRouter::new(
            vec![nested("C1", &[("public", &["person"])])],
            vec![connection("C1", "primary"), connection("C4", "My Warehouse")],
            None,
        );
        let routed = router.route("/* My Warehouse, public */ DELETE FROM person WHERE id = 1");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].status(), StatementStatus::Queued);
        assert_eq!(routed[0].connection_id.as_deref(), Some("C4"));
        assert_eq!(routed[0].database.as_deref(), Some("public"));
        assert_eq!(routed[0].statement_text, "DELETE FROM person WHERE id = 1");
    }

    #[test]
    fn test_directive_database_only_and_unknown_connection() {
        let routed = router(None).route("/* sales */ DELETE FROM orders");
        assert_eq!(routed[0].connection_id.as_deref(), Some("C2"));
        assert_eq!(routed[0].database.as_deref(), Some("sales"));

        // unknown connection name falls back to a cache search
        let routed = router(None).route("/* nowhere, public */ SELECT * FROM person");
        assert_eq!(routed[0].connection_id.as_deref(), Some("C1"));
    }

    #[test]
    fn test_flat_documents_match_unconstrained_lookups() {
        let routed = router(None).route("SELECT * FROM events");
        assert_eq!(routed[0].connection_id.as_deref(), Some("C3"));
        assert_eq!(routed[0].database, None);

        let routed = router(None).route("SELECT * FROM main.events");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].error.as_ref().unwrap().title, DATABASE_OR_TABLE_NOT_FOUND);
    }

    #[test]
    fn test_unmatched_statement_uses_batch_connection() {
        let routed = router(Some("C1")).route("SELECT 1; SELECT * FROM missing");
        assert_eq!(routed.len(), 2);
        assert!(routed.iter().all(|r| r.connection_id.as_deref() == Some("C1")));
    }

    #[test]
    fn test_nothing_routed_yields_single_error() {
        let text = "SELECT * FROM missing;\nSELECT 2";
        let routed = router(None).route(text);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].statement_text, text);
        assert_eq!(routed[0].error.as_ref().unwrap().title, DATABASE_OR_TABLE_NOT_FOUND);

        let routed = router(None).route("  -- only a comment\n");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].status(), StatementStatus::Error);
    }

    #[test]
    fn test_tokenizer_failure_yields_single_error() {
        let routed = router(Some("C1")).route("SELECT 'oops");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].status(), StatementStatus::Error);
        assert_eq!(routed[0].connection_id.as_deref(), Some("C1"));
    }
}
