//! [`DMLEvent`], the logical row-level mutation both producers emit and
//! `WriteTarget` replays.

use replication_offset::ChangePosition;

use crate::schema::{TableIdentity, TableSchema};
use crate::value::RowValue;

/// A single row-level mutation. `Insert`/`Update` carry the post-image
/// (and, for `Update`, the pre-image, needed to decide which row id to
/// key the upsert on if the primary key itself changed); `Delete` carries
/// the pre-image's primary key.
///
/// `position` is `None` for iterator-sourced events (the bulk copy has no
/// notion of a log position) and `Some` for binlog-sourced ones.
#[derive(Debug, Clone, PartialEq)]
pub enum DMLEvent {
    Insert {
        table: TableIdentity,
        row: RowValue,
        position: Option<ChangePosition>,
    },
    Update {
        table: TableIdentity,
        before: RowValue,
        after: RowValue,
        position: Option<ChangePosition>,
    },
    Delete {
        table: TableIdentity,
        row: RowValue,
        position: Option<ChangePosition>,
    },
}

impl DMLEvent {
    pub fn table(&self) -> &TableIdentity {
        match self {
            DMLEvent::Insert { table, .. }
            | DMLEvent::Update { table, .. }
            | DMLEvent::Delete { table, .. } => table,
        }
    }

    pub fn position(&self) -> Option<&ChangePosition> {
        match self {
            DMLEvent::Insert { position, .. }
            | DMLEvent::Update { position, .. }
            | DMLEvent::Delete { position, .. } => position.as_ref(),
        }
    }

    /// Render this event as a parameterised SQL statement against the
    /// target, using `schema` to resolve column names and primary-key
    /// positions. Inserts and updates both use upsert semantics
    /// (`INSERT ... ON DUPLICATE KEY UPDATE`) so replaying an event that
    /// has already been applied — by a retry, or because the iterator and
    /// the streamer both observed the same row — is a no-op rather than a
    /// regression.
    pub fn to_statement(&self, schema: &TableSchema) -> Statement {
        match self {
            DMLEvent::Insert { table, row, .. } | DMLEvent::Update { table, after: row, .. } => {
                upsert_statement(table, schema, row)
            }
            DMLEvent::Delete { table, row, .. } => delete_statement(table, schema, row),
        }
    }
}

/// A rendered statement and its positional bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: RowValue,
}

fn upsert_statement(table: &TableIdentity, schema: &TableSchema, row: &RowValue) -> Statement {
    let columns = schema.column_names();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let column_list = columns.join(", ");
    let update_clause = schema
        .non_key_column_names()
        .into_iter()
        .map(|c| format!("{c} = VALUES({c})"))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = if update_clause.is_empty() {
        // Every column is part of the primary key: nothing to update on
        // conflict, re-applying the same row is already a no-op.
        format!("INSERT INTO {table} ({column_list}) VALUES ({placeholders}) ON DUPLICATE KEY UPDATE {first} = {first}",
            first = columns[0])
    } else {
        format!(
            "INSERT INTO {table} ({column_list}) VALUES ({placeholders}) ON DUPLICATE KEY UPDATE {update_clause}"
        )
    };

    Statement {
        sql,
        params: row.clone(),
    }
}

fn delete_statement(table: &TableIdentity, schema: &TableSchema, row: &RowValue) -> Statement {
    let pk_values = schema.primary_key_values(row);
    let pk_names = schema
        .primary_key
        .iter()
        .map(|&i| schema.columns[i].name.as_str());
    let predicate = pk_names
        .map(|name| format!("{name} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ");

    Statement {
        sql: format!("DELETE FROM {table} WHERE {predicate}"),
        params: pk_values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, SqlType};
    use crate::value::DfValue;

    fn users_schema() -> TableSchema {
        TableSchema {
            columns: vec![
                ColumnSpec {
                    name: "id".into(),
                    ordinal: 0,
                    sql_type: SqlType::Integer,
                    nullable: false,
                },
                ColumnSpec {
                    name: "name".into(),
                    ordinal: 1,
                    sql_type: SqlType::Text,
                    nullable: true,
                },
            ],
            primary_key: vec![0],
        }
    }

    #[test]
    fn insert_renders_as_upsert() {
        let table = TableIdentity::new("db", "users");
        let event = DMLEvent::Insert {
            table: table.clone(),
            row: vec![DfValue::Int(1), DfValue::Text("a".into())],
            position: None,
        };
        let stmt = event.to_statement(&users_schema());
        assert!(stmt.sql.contains("ON DUPLICATE KEY UPDATE name = VALUES(name)"));
        assert_eq!(stmt.params, vec![DfValue::Int(1), DfValue::Text("a".into())]);
    }

    #[test]
    fn delete_keys_on_primary_key_only() {
        let table = TableIdentity::new("db", "users");
        let event = DMLEvent::Delete {
            table,
            row: vec![DfValue::Int(1), DfValue::Text("a".into())],
            position: None,
        };
        let stmt = event.to_statement(&users_schema());
        assert_eq!(stmt.sql, "DELETE FROM db.users WHERE id = ?");
        assert_eq!(stmt.params, vec![DfValue::Int(1)]);
    }
}
