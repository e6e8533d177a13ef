// Flattening and search over cached schemas for tree-style consumers
use crate::models::{ConnectionSchema, Schema, SchemaDocument, SchemaLayout, Table};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::HashMap;

/// Item ids that are expanded (`true`) in a tree view
pub type ExpandedMap = HashMap<String, bool>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchemaItemType {
    Connection,
    Schema,
    Table,
    Column,
}

/// One row of the flattened tree
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SchemaListItem {
    #[serde(rename = "type")]
    pub item_type: SchemaItemType,
    /// Ancestor names joined with `.`, starting at the connection id
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    pub level: u8,
}

/// Depth-first flattening of connection schemas into an indented list.
/// Children are only emitted below items whose id is expanded.
pub fn schema_list(schemas: &[ConnectionSchema], expanded: &ExpandedMap) -> Vec<SchemaListItem> {
    let is_expanded = |id: &str| expanded.get(id).copied().unwrap_or(false);
    let mut items = Vec::new();

    for connection in schemas {
        let connection_id = &connection.document.connection_id;
        items.push(SchemaListItem {
            item_type: SchemaItemType::Connection,
            id: connection_id.clone(),
            name: connection.connection_name.clone(),
            description: None,
            data_type: None,
            level: 0,
        });
        if !is_expanded(connection_id) {
            continue;
        }

        match &connection.document.layout {
            SchemaLayout::Nested { schemas } => {
                for schema in schemas {
                    let schema_id = format!("{}.{}", connection_id, schema.name);
                    let expand_tables = is_expanded(&schema_id);
                    items.push(SchemaListItem {
                        item_type: SchemaItemType::Schema,
                        id: schema_id.clone(),
                        name: schema.name.clone(),
                        description: schema.description.clone(),
                        data_type: None,
                        level: 1,
                    });
                    if expand_tables {
                        push_tables(&mut items, &schema_id, &schema.tables, 2, &is_expanded);
                    }
                }
            }
            SchemaLayout::Flat { tables } => {
                push_tables(&mut items, connection_id, tables, 1, &is_expanded)
            }
        }
    }

    items
}

fn push_tables(
    items: &mut Vec<SchemaListItem>,
    parent_id: &str,
    tables: &[Table],
    level: u8,
    is_expanded: &dyn Fn(&str) -> bool,
) {
    for table in tables {
        let table_id = format!("{}.{}", parent_id, table.name);
        items.push(SchemaListItem {
            item_type: SchemaItemType::Table,
            id: table_id.clone(),
            name: table.name.clone(),
            description: table.description.clone(),
            data_type: None,
            level,
        });
        if !is_expanded(&table_id) {
            continue;
        }
        for column in &table.columns {
            items.push(SchemaListItem {
                item_type: SchemaItemType::Column,
                id: format!("{}.{}", table_id, column.name),
                name: column.name.clone(),
                description: column.description.clone(),
                data_type: Some(column.data_type.clone()),
                level: level + 1,
            });
        }
    }
}

/// Keep the tables whose name, or one of whose column names, matches `term`
/// case-insensitively. An invalid pattern is searched for literally.
///
/// Returns the filtered schema and the expanded map opening every branch
/// leading to a kept table. A blank term returns the schema unchanged.
pub fn search_schema_info(schema: &ConnectionSchema, term: &str) -> (ConnectionSchema, ExpandedMap) {
    let mut expanded = ExpandedMap::new();
    if term.trim().is_empty() {
        return (schema.clone(), expanded);
    }

    let connection_id = &schema.document.connection_id;
    let Some(pattern) = search_pattern(term) else {
        return (schema_without_tables(schema), expanded);
    };

    let layout = match &schema.document.layout {
        SchemaLayout::Nested { schemas } => SchemaLayout::Nested {
            schemas: schemas
                .iter()
                .filter_map(|s| {
                    let tables = matching_tables(&s.tables, &pattern);
                    if tables.is_empty() {
                        return None;
                    }
                    let schema_id = format!("{}.{}", connection_id, s.name);
                    mark_tables(&mut expanded, &schema_id, &tables);
                    expanded.insert(schema_id, true);
                    Some(Schema {
                        tables,
                        ..s.clone()
                    })
                })
                .collect(),
        },
        SchemaLayout::Flat { tables } => {
            let tables = matching_tables(tables, &pattern);
            mark_tables(&mut expanded, connection_id, &tables);
            SchemaLayout::Flat { tables }
        }
    };

    if !expanded.is_empty() {
        expanded.insert(connection_id.clone(), true);
    }

    let filtered = ConnectionSchema {
        connection_name: schema.connection_name.clone(),
        document: SchemaDocument {
            connection_id: connection_id.clone(),
            layout,
        },
    };
    (filtered, expanded)
}

fn search_pattern(term: &str) -> Option<Regex> {
    RegexBuilder::new(term)
        .case_insensitive(true)
        .build()
        .or_else(|_| RegexBuilder::new(&regex::escape(term)).case_insensitive(true).build())
        .ok()
}

fn schema_without_tables(schema: &ConnectionSchema) -> ConnectionSchema {
    let layout = match &schema.document.layout {
        SchemaLayout::Nested { .. } => SchemaLayout::Nested { schemas: Vec::new() },
        SchemaLayout::Flat { .. } => SchemaLayout::Flat { tables: Vec::new() },
    };
    ConnectionSchema {
        connection_name: schema.connection_name.clone(),
        document: SchemaDocument {
            connection_id: schema.document.connection_id.clone(),
            layout,
        },
    }
}

fn matching_tables(tables: &[Table], pattern: &Regex) -> Vec<Table> {
    tables
        .iter()
        .filter(|t| pattern.is_match(&t.name) || t.columns.iter().any(|c| pattern.is_match(&c.name)))
        .cloned()
        .collect()
}

fn mark_tables(expanded: &mut ExpandedMap, parent_id: &str, tables: &[Table]) {
    for table in tables {
        expanded.insert(format!("{}.{}", parent_id, table.name), true);
    }
}
