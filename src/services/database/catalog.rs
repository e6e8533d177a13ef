// Folds flat introspection rows into a schema document
use crate::error::AppError;
use crate::models::{Column, Schema, SchemaDocument, Table};
use crate::services::database::adapter::DriverRows;
use serde_json::Value;
use std::collections::HashMap;

const TABLE_SCHEMA: &str = "table_schema";
const TABLE_NAME: &str = "table_name";
const COLUMN_NAME: &str = "column_name";
const DATA_TYPE: &str = "data_type";

/// Build a [`SchemaDocument`] from the result of a driver's schema query.
///
/// Rows must carry `table_name`, `column_name` and `data_type` columns
/// (matched case-insensitively). When a `table_schema` column is present the
/// document is nested by schema, otherwise it is the flat table list.
/// Ordering follows first appearance in the result set.
pub fn fold_schema_rows(connection_id: &str, result: &DriverRows) -> Result<SchemaDocument, AppError> {
    let position = |name: &str| {
        result
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    };

    let table_idx = position(TABLE_NAME)
        .ok_or_else(|| AppError::Schema(format!("Schema query result is missing `{}`", TABLE_NAME)))?;
    let column_idx = position(COLUMN_NAME)
        .ok_or_else(|| AppError::Schema(format!("Schema query result is missing `{}`", COLUMN_NAME)))?;
    let type_idx = position(DATA_TYPE);
    let schema_idx = position(TABLE_SCHEMA);

    let mut schemas: Vec<Schema> = Vec::new();
    let mut schema_index: HashMap<String, usize> = HashMap::new();
    let mut table_index: HashMap<(String, String), usize> = HashMap::new();
    let mut flat_tables: Vec<Table> = Vec::new();

    for row in &result.rows {
        let Some(table_name) = cell(row, Some(table_idx)) else {
            continue;
        };
        let column = Column {
            name: cell(row, Some(column_idx)).unwrap_or_default(),
            data_type: cell(row, type_idx).unwrap_or_default(),
            description: None,
        };

        let schema_name = match schema_idx {
            Some(idx) => cell(row, Some(idx)).unwrap_or_default(),
            None => {
                let key = (String::new(), table_name.clone());
                let idx = *table_index.entry(key).or_insert_with(|| {
                    flat_tables.push(new_table(&table_name));
                    flat_tables.len() - 1
                });
                flat_tables[idx].columns.push(column);
                continue;
            }
        };

        let s_idx = *schema_index.entry(schema_name.clone()).or_insert_with(|| {
            schemas.push(Schema {
                name: schema_name.clone(),
                description: None,
                tables: Vec::new(),
            });
            schemas.len() - 1
        });
        let tables = &mut schemas[s_idx].tables;
        let t_idx = *table_index
            .entry((schema_name, table_name.clone()))
            .or_insert_with(|| {
                tables.push(new_table(&table_name));
                tables.len() - 1
            });
        tables[t_idx].columns.push(column);
    }

    Ok(match schema_idx {
        Some(_) => SchemaDocument::nested(connection_id, schemas),
        None => SchemaDocument::flat(connection_id, flat_tables),
    })
}

fn new_table(name: &str) -> Table {
    Table {
        name: name.to_string(),
        description: None,
        columns: Vec::new(),
    }
}

fn cell(row: &[Value], idx: Option<usize>) -> Option<String> {
    match row.get(idx?)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryColumn, SchemaLayout};
    use serde_json::json;

    fn rows(columns: &[&str], data: Vec<Vec<Value>>) -> DriverRows {
        DriverRows {
            columns: columns.iter().map(|c| QueryColumn::new(*c, None)).collect(),
            rows: data,
        }
    }

    #[test]
    fn test_nested_fold_preserves_first_appearance_order() {
        let result = rows(
            &["TABLE_SCHEMA", "TABLE_NAME", "COLUMN_NAME", "DATA_TYPE"],
            vec![
                vec![json!("public"), json!("person"), json!("id"), json!("integer")],
                vec![json!("public"), json!("person"), json!("name"), json!("text")],
                vec![json!("audit"), json!("log"), json!("at"), json!("timestamp")],
                vec![json!("public"), json!("pet"), json!("id"), json!("integer")],
            ],
        );
        let doc = fold_schema_rows("c1", &result).unwrap();
        let schemas = doc.schemas();
        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[0].name, "public");
        assert_eq!(schemas[0].tables.len(), 2);
        assert_eq!(schemas[0].tables[0].columns.len(), 2);
        assert_eq!(schemas[0].tables[0].columns[1].data_type, "text");
        assert_eq!(schemas[1].tables[0].name, "log");
    }

    #[test]
    fn test_flat_fold_without_schema_column() {
        let result = rows(
            &["table_name", "column_name", "data_type"],
            vec![
                vec![json!("events"), json!("id"), json!("INTEGER")],
                vec![json!("events"), json!("kind"), Value::Null],
            ],
        );
        let doc = fold_schema_rows("c2", &result).unwrap();
        match doc.layout {
            SchemaLayout::Flat { tables } => {
                assert_eq!(tables.len(), 1);
                assert_eq!(tables[0].columns[1].data_type, "");
            }
            other => panic!("expected flat layout, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_column_is_schema_error() {
        let result = rows(&["table_name"], vec![]);
        assert!(matches!(fold_schema_rows("c1", &result), Err(AppError::Schema(_))));
    }
}
