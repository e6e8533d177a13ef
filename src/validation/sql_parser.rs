use crate::error::AppError;
use sqlparser::ast::{self, ObjectName, ObjectNamePart, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, TokenWithSpan, Tokenizer, Whitespace};
use std::ops::ControlFlow;

/// Routing hint written as a leading comment: `/* connection, database */` or `/* database */`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub connection_name: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Other,
}

/// What the router needs to know about one statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    pub kind: StatementKind,
    /// Unqualified name of the first table the statement references
    pub table: Option<String>,
    /// Qualifier written in front of that table (`sales` in `sales.orders`)
    pub qualifier: Option<String>,
}

impl ParsedStatement {
    pub fn is_select(&self) -> bool {
        self.kind == StatementKind::Select
    }
}

/// SQL-aware splitting and classification of batch text
pub struct SqlParser;

impl SqlParser {
    /// Split text into statements on `;` tokens. Semicolons inside strings,
    /// quoted identifiers and comments do not split. Chunks holding nothing
    /// but whitespace and comments are dropped.
    pub fn split_statements(sql: &str) -> Result<Vec<String>, AppError> {
        let dialect = GenericDialect {};
        let tokens = Tokenizer::new(&dialect, sql)
            .tokenize_with_location()
            .map_err(|e| AppError::Parse(e.to_string()))?;

        let line_starts = line_starts(sql);
        let mut statements = Vec::new();
        let mut chunk_start = 0usize;
        let mut has_content = false;

        for TokenWithSpan { token, span } in &tokens {
            match token {
                Token::SemiColon => {
                    let end = byte_offset(sql, &line_starts, span.start.line, span.start.column);
                    if has_content {
                        push_chunk(&mut statements, &sql[chunk_start..end]);
                    }
                    chunk_start = end + ';'.len_utf8();
                    has_content = false;
                }
                Token::EOF | Token::Whitespace(_) => {}
                _ => has_content = true,
            }
        }

        if has_content && chunk_start <= sql.len() {
            push_chunk(&mut statements, &sql[chunk_start..]);
        }

        Ok(statements)
    }

    /// Split off a leading directive comment. Comments that do not have the
    /// directive shape are left in the body untouched.
    pub fn strip_directive(statement: &str) -> (Option<Directive>, &str) {
        let trimmed = statement.trim_start();
        let Some(rest) = trimmed.strip_prefix("/*") else {
            return (None, statement.trim());
        };
        let Some(end) = rest.find("*/") else {
            return (None, statement.trim());
        };

        let is_word = |part: &str| !part.is_empty() && !part.chars().any(char::is_whitespace);
        let parts: Vec<&str> = rest[..end].split(',').map(str::trim).collect();

        // Connection names may contain spaces; the database part never does
        let directive = match parts.as_slice() {
            [database] if is_word(*database) => Directive {
                connection_name: None,
                database: database.to_string(),
            },
            [connection, database] if !connection.is_empty() && is_word(*database) => Directive {
                connection_name: Some(connection.to_string()),
                database: database.to_string(),
            },
            _ => return (None, statement.trim()),
        };

        (Some(directive), rest[end + 2..].trim())
    }

    /// Parse one statement and extract its first referenced table
    pub fn parse_statement(sql: &str) -> Result<ParsedStatement, AppError> {
        let dialect = GenericDialect {};
        let statements =
            Parser::parse_sql(&dialect, sql).map_err(|e| AppError::Parse(e.to_string()))?;

        let Some(statement) = statements.first() else {
            return Err(AppError::Parse("Empty statement".to_string()));
        };

        let kind = match statement {
            Statement::Query(_) => StatementKind::Select,
            _ => StatementKind::Other,
        };

        let (qualifier, table) = match Self::first_table(statement) {
            Some(name) => split_object_name(&name),
            None => (None, None),
        };

        Ok(ParsedStatement {
            kind,
            table,
            qualifier,
        })
    }

    fn first_table(statement: &Statement) -> Option<ObjectName> {
        match statement {
            Statement::Drop { names, .. } => return names.first().cloned(),
            Statement::CreateTable(create) => return Some(create.name.clone()),
            Statement::Insert(insert) => {
                if let ast::TableObject::TableName(name) = &insert.table {
                    return Some(name.clone());
                }
            }
            _ => {}
        }

        match ast::visit_relations(statement, |relation| ControlFlow::Break(relation.clone())) {
            ControlFlow::Break(name) => Some(name),
            ControlFlow::Continue(()) => None,
        }
    }
}

/// `(qualifier, table)` from the last two parts of a possibly multi-part name
fn split_object_name(name: &ObjectName) -> (Option<String>, Option<String>) {
    let mut parts: Vec<String> = name
        .0
        .iter()
        .map(|part| match part {
            ObjectNamePart::Identifier(ident) => ident.value.clone(),
            other => other.to_string(),
        })
        .collect();

    let table = parts.pop();
    let qualifier = parts.pop();
    (qualifier, table)
}

fn push_chunk(statements: &mut Vec<String>, chunk: &str) {
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        statements.push(chunk.to_string());
    }
}

/// Byte offset of the first character of every line
fn line_starts(sql: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(idx, _)| idx + 1))
        .collect()
}

/// Tokenizer locations are 1-based lines and 1-based character columns
fn byte_offset(sql: &str, line_starts: &[usize], line: u64, column: u64) -> usize {
    let line_idx = (line.max(1) - 1) as usize;
    let Some(&start) = line_starts.get(line_idx) else {
        return sql.len();
    };
    let chars_before = (column.max(1) - 1) as usize;
    sql[start..]
        .char_indices()
        .nth(chars_before)
        .map(|(idx, _)| start + idx)
        .unwrap_or(sql.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_statements_respects_quotes_and_comments() {
        let sql = "SELECT 'a;b' FROM t1;\n-- note; here\nSELECT \"x;y\" FROM t2 /* ; */;\n\n;  ";
        let statements = SqlParser::split_statements(sql).unwrap();
        assert_eq!(
            statements,
            vec![
                "SELECT 'a;b' FROM t1",
                "-- note; here\nSELECT \"x;y\" FROM t2 /* ; */",
            ]
        );
    }

    #[test]
    fn test_split_statements_skips_comment_only_chunks() {
        let sql = "SELECT 1; /* db */ ; -- trailing";
        assert_eq!(SqlParser::split_statements(sql).unwrap(), vec!["SELECT 1"]);
        assert!(SqlParser::split_statements("   ").unwrap().is_empty());
    }

    #[test]
    fn test_split_statements_multibyte_text() {
        let sql = "SELECT 'héllo' FROM t;\nSELECT 'ü' FROM u";
        assert_eq!(
            SqlParser::split_statements(sql).unwrap(),
            vec!["SELECT 'héllo' FROM t", "SELECT 'ü' FROM u"]
        );
    }

    #[test]
    fn test_split_statements_tokenizer_error() {
        let result = SqlParser::split_statements("SELECT 'unterminated");
        assert!(matches!(result, Err(AppError::Parse(_))));
    }

    #[test]
    fn test_strip_directive() {
        let (directive, body) = SqlParser::strip_directive("/* warehouse, sales */ SELECT * FROM orders");
        assert_eq!(
            directive,
            Some(Directive {
                connection_name: Some("warehouse".to_string()),
                database: "sales".to_string(),
            })
        );
        assert_eq!(body, "SELECT * FROM orders");

        let (directive, body) = SqlParser::strip_directive("  /*public*/\nDROP TABLE person");
        assert_eq!(directive.unwrap().database, "public");
        assert_eq!(body, "DROP TABLE person");

        // free-form comments are not directives
        let (directive, body) = SqlParser::strip_directive("/* fix this later */ SELECT 1");
        assert!(directive.is_none());
        assert_eq!(body, "/* fix this later */ SELECT 1");

        let (directive, _) = SqlParser::strip_directive("/* a, b, c */ SELECT 1");
        assert!(directive.is_none());

        // connection names may contain spaces, the database may not
        let (directive, body) = SqlParser::strip_directive("/* My Warehouse , public */ DELETE FROM person");
        assert_eq!(directive.unwrap().connection_name.as_deref(), Some("My Warehouse"));
        assert_eq!(body, "DELETE FROM person");
        let (directive, _) = SqlParser::strip_directive("/* see ticket, needs review */ SELECT 1");
        assert!(directive.is_none());

        let (directive, body) = SqlParser::strip_directive("SELECT 1 /* db */");
        assert!(directive.is_none());
        assert_eq!(body, "SELECT 1 /* db */");
    }

    #[test]
    fn test_parse_select_and_qualifier() {
        let parsed = SqlParser::parse_statement("SELECT * FROM person").unwrap();
        assert!(parsed.is_select());
        assert_eq!(parsed.table.as_deref(), Some("person"));
        assert_eq!(parsed.qualifier, None);

        let parsed = SqlParser::parse_statement("SELECT p.id FROM sales.orders o JOIN sales.items i ON o.id = i.order_id")
            .unwrap();
        assert_eq!(parsed.table.as_deref(), Some("orders"));
        assert_eq!(parsed.qualifier.as_deref(), Some("sales"));

        let parsed = SqlParser::parse_statement("SELECT * FROM cat.hr.\"Employees\"").unwrap();
        assert_eq!(parsed.table.as_deref(), Some("Employees"));
        assert_eq!(parsed.qualifier.as_deref(), Some("hr"));
    }

    #[test]
    fn test_parse_other_statements() {
        let parsed = SqlParser::parse_statement("DROP TABLE person").unwrap();
        assert_eq!(parsed.kind, StatementKind::Other);
        assert_eq!(parsed.table.as_deref(), Some("person"));

        let parsed = SqlParser::parse_statement("INSERT INTO hr.person (id) VALUES (1)").unwrap();
        assert_eq!(parsed.table.as_deref(), Some("person"));
        assert_eq!(parsed.qualifier.as_deref(), Some("hr"));

        let parsed = SqlParser::parse_statement("UPDATE person SET name = 'x' WHERE id = 1").unwrap();
        assert_eq!(parsed.table.as_deref(), Some("person"));

        let parsed = SqlParser::parse_statement("CREATE TABLE public.audit (id INT)").unwrap();
        assert_eq!(parsed.table.as_deref(), Some("audit"));
        assert_eq!(parsed.qualifier.as_deref(), Some("public"));

        let parsed = SqlParser::parse_statement("SELECT 1").unwrap();
        assert!(parsed.is_select());
        assert!(parsed.table.is_none());
    }

    #[test]
    fn test_parse_error_carries_message() {
        match SqlParser::parse_statement("SELEKT * FORM x") {
            Err(AppError::Parse(msg)) => assert!(!msg.is_empty()),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
