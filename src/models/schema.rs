use serde::{Deserialize, Serialize};
use std::fmt;

/// Cached structural description of one connection.
///
/// Drivers with a schema (namespace) level produce [`SchemaLayout::Nested`];
/// drivers without one produce the flat [`SchemaLayout::Flat`] table list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaDocument {
    pub connection_id: String,
    #[serde(flatten)]
    pub layout: SchemaLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SchemaLayout {
    Nested { schemas: Vec<Schema> },
    Flat { tables: Vec<Table> },
}

impl SchemaDocument {
    pub fn nested(connection_id: impl Into<String>, schemas: Vec<Schema>) -> Self {
        Self {
            connection_id: connection_id.into(),
            layout: SchemaLayout::Nested { schemas },
        }
    }

    pub fn flat(connection_id: impl Into<String>, tables: Vec<Table>) -> Self {
        Self {
            connection_id: connection_id.into(),
            layout: SchemaLayout::Flat { tables },
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.layout {
            SchemaLayout::Nested { schemas } => schemas.is_empty(),
            SchemaLayout::Flat { tables } => tables.is_empty(),
        }
    }

    pub fn schemas(&self) -> &[Schema] {
        match &self.layout {
            SchemaLayout::Nested { schemas } => schemas,
            SchemaLayout::Flat { .. } => &[],
        }
    }

    /// Every table paired with the name of the schema holding it
    /// (`None` for flat documents), in document order.
    pub fn tables(&self) -> Box<dyn Iterator<Item = (Option<&str>, &Table)> + '_> {
        match &self.layout {
            SchemaLayout::Nested { schemas } => Box::new(schemas.iter().flat_map(|schema| {
                schema
                    .tables
                    .iter()
                    .map(move |table| (Some(schema.name.as_str()), table))
            })),
            SchemaLayout::Flat { tables } => Box::new(tables.iter().map(|table| (None, table))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Identity of a cached schema document: the connection it describes and how
/// deep the introspection went.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaCacheKey {
    pub connection_id: String,
    pub depth: u8,
}

impl SchemaCacheKey {
    pub fn new(connection_id: impl Into<String>, depth: u8) -> Self {
        Self {
            connection_id: connection_id.into(),
            depth,
        }
    }
}

impl fmt::Display for SchemaCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schemacache:{}:{}", self.connection_id, self.depth)
    }
}

/// A cached document together with the display name of its connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSchema {
    pub connection_name: String,
    #[serde(flatten)]
    pub document: SchemaDocument,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(name: &str) -> Table {
        Table {
            name: name.to_string(),
            description: None,
            columns: vec![],
        }
    }

    #[test]
    fn test_document_json_shapes() {
        let nested = SchemaDocument::nested(
            "c1",
            vec![Schema {
                name: "public".to_string(),
                description: None,
                tables: vec![table("person")],
            }],
        );
        let value = serde_json::to_value(&nested).unwrap();
        assert_eq!(value["connection_id"], "c1");
        assert_eq!(value["schemas"][0]["tables"][0]["name"], "person");
        assert!(value.get("tables").is_none());

        let flat: SchemaDocument = serde_json::from_value(json!({
            "connection_id": "c2",
            "tables": [{"name": "events", "columns": []}]
        }))
        .unwrap();
        assert_eq!(flat.layout, SchemaLayout::Flat { tables: vec![table("events")] });
    }

    #[test]
    fn test_tables_iterates_in_document_order() {
        let doc = SchemaDocument::nested(
            "c1",
            vec![
                Schema {
                    name: "a".to_string(),
                    description: None,
                    tables: vec![table("t1"), table("t2")],
                },
                Schema {
                    name: "b".to_string(),
                    description: None,
                    tables: vec![table("t3")],
                },
            ],
        );
        let names: Vec<_> = doc.tables().map(|(s, t)| (s.unwrap(), t.name.as_str())).collect();
        assert_eq!(names, vec![("a", "t1"), ("a", "t2"), ("b", "t3")]);
    }

    #[test]
    fn test_cache_key_display() {
        assert_eq!(SchemaCacheKey::new("c1", 2).to_string(), "schemacache:c1:2");
    }
}
