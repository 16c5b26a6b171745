//! Table schemas derived from parser trees
//!
//! Every match with an enabled merger owns one table named after the match.
//! The parser nodes selected by the merger path define its columns.

use crate::config::{ColumnType, Merger, ParserNode};
use crate::crawler::MatchOption;
use crate::storage::traits::{StoreError, StoreResult};

/// Column holding the row id
pub const ID_COLUMN: &str = "id";

/// One table column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub increments: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            increments: false,
        }
    }

    /// SQLite declaration, `"name" TYPE`
    pub fn declaration(&self) -> String {
        let sql_type = if self.increments {
            "INTEGER"
        } else {
            self.column_type.sql_type()
        };
        format!("{} {}", quote_ident(&self.name), sql_type)
    }
}

/// Schema of a match's table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
    /// Value columns, in column order
    pub keys: Vec<String>,
    /// Target fields; each has a `__<name>_id` column
    pub target_fields: Vec<String>,
    /// Fields deduplicated once every run has ended
    pub uniques: Vec<String>,
}

impl TableSchema {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Name of the foreign key column of a target field
pub fn foreign_key_column(field: &str) -> String {
    format!("__{}_id", field)
}

/// Quotes an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Follows `merger` through the parser tree to the nodes defining columns
///
/// Each path segment must name a node with children. Root and disabled
/// mergers select the top-level parsers.
pub fn resolve_merger_path<'a>(
    parsers: &'a [ParserNode],
    merger: &Merger,
) -> StoreResult<&'a [ParserNode]> {
    let mut nodes = parsers;
    for segment in merger.path() {
        let invalid = |reason: String| StoreError::InvalidMergerPath {
            path: merger.display_path(),
            reason,
        };
        let node = nodes
            .iter()
            .find(|n| &n.name == segment)
            .ok_or_else(|| invalid(format!("no parser named '{}'", segment)))?;
        if node.is_leaf() {
            return Err(invalid(format!("parser '{}' has no children", segment)));
        }
        nodes = &node.children;
    }
    Ok(nodes)
}

/// Derives the table schema of a match
pub fn infer_schema(option: &MatchOption) -> StoreResult<TableSchema> {
    let nodes = resolve_merger_path(&option.parsers, &option.merger)?;

    let mut schema = TableSchema {
        table: option.name.clone(),
        columns: Vec::new(),
        keys: Vec::new(),
        target_fields: Vec::new(),
        uniques: Vec::new(),
    };

    for node in nodes.iter().filter(|n| !n.name.is_empty() && !n.hidden) {
        if node.name == ID_COLUMN {
            tracing::warn!(
                "{}: field 'id' is reserved for the row id and will not be stored",
                option.label()
            );
            continue;
        }
        // Nested objects and lists are stored as JSON text
        let column_type = if node.is_leaf() {
            node.column_type
        } else {
            ColumnType::Text
        };
        schema.columns.push(ColumnSpec {
            name: node.name.clone(),
            column_type,
            increments: node.increments,
        });
        schema.keys.push(node.name.clone());

        if node.target {
            schema.target_fields.push(node.name.clone());
            schema
                .columns
                .push(ColumnSpec::new(foreign_key_column(&node.name), ColumnType::String));
        }
        if node.unique {
            schema.uniques.push(node.name.clone());
        }
    }

    schema
        .columns
        .push(ColumnSpec::new(ID_COLUMN, ColumnType::String));
    Ok(schema)
}

/// `CREATE TABLE IF NOT EXISTS` statement for `columns`
pub fn create_table_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let declarations: Vec<String> = columns.iter().map(|c| c.declaration()).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        declarations.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(parsers: Vec<ParserNode>, merger: Merger) -> MatchOption {
        let mut option = MatchOption::adhoc("items", parsers);
        option.merger = merger;
        option
    }

    fn nested() -> Vec<ParserNode> {
        vec![
            ParserNode::field("title", "h1"),
            ParserNode::list(
                "list-1",
                ".group",
                vec![
                    ParserNode::field("group", "h2"),
                    ParserNode::list(
                        "list-2",
                        ".item",
                        vec![
                            ParserNode::field("name", ".name").with_unique(),
                            ParserNode::field("link", "a::attr(href)").with_target(),
                            ParserNode::field("secret", ".secret").with_hidden(),
                        ],
                    ),
                ],
            ),
        ]
    }

    #[test]
    fn test_root_schema() {
        let schema = infer_schema(&option(nested(), Merger::Root)).unwrap();
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["title", "list-1", "id"]);
        assert_eq!(schema.columns[1].column_type, ColumnType::Text);
        assert!(schema.uniques.is_empty());
    }

    #[test]
    fn test_path_schema() {
        let schema = infer_schema(&option(nested(), Merger::parse("list-1.list-2"))).unwrap();
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "link", "__link_id", "id"]);
        assert_eq!(schema.keys, vec!["name", "link"]);
        assert_eq!(schema.target_fields, vec!["link"]);
        assert_eq!(schema.uniques, vec!["name"]);
        assert_eq!(schema.table, "items");
    }

    #[test]
    fn test_invalid_paths() {
        let parsers = nested();
        let missing = resolve_merger_path(&parsers, &Merger::parse("list-1.nope"));
        assert!(matches!(missing, Err(StoreError::InvalidMergerPath { .. })));

        let leaf = resolve_merger_path(&parsers, &Merger::parse("title"));
        assert!(matches!(leaf, Err(StoreError::InvalidMergerPath { .. })));
    }

    #[test]
    fn test_create_table_sql() {
        let columns = vec![
            ColumnSpec::new("name", ColumnType::String),
            ColumnSpec {
                name: "rank".to_string(),
                column_type: ColumnType::String,
                increments: true,
            },
            ColumnSpec::new("price", ColumnType::Double),
        ];
        assert_eq!(
            create_table_sql("items", &columns),
            r#"CREATE TABLE IF NOT EXISTS "items" ("name" TEXT, "rank" INTEGER, "price" REAL)"#
        );
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }
}
