//! Table and column metadata, discovered once at startup and never
//! refreshed: "the system does not tolerate schema changes mid-run."

use std::collections::HashMap;
use std::fmt;

use ferry_errors::FerryError;
use ferry_util::{with_deadline, DEFAULT_QUERY_TIMEOUT};
use mysql_async::prelude::Queryable;
use mysql_async::Pool;

use crate::value::RowValue;

/// A `(schema, table)` pair identifying one applicable table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableIdentity {
    pub schema: String,
    pub table: String,
}

impl TableIdentity {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        TableIdentity {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// The MySQL column-type families the binlog decoder and `WriteTarget`
/// need to special-case. Not a full SQL type system — just enough to pick
/// the right `DfValue` variant and bind-parameter rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    UnsignedInteger,
    Float,
    Text,
    Bytes,
    Timestamp,
    Decimal,
    Json,
}

/// One column's static metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ordinal: usize,
    pub sql_type: SqlType,
    pub nullable: bool,
}

/// Ordinal positions (into `TableSchema::columns`) making up a table's
/// primary key, in declaration order. Composite keys compare
/// lexicographically by this order.
pub type PrimaryKey = Vec<usize>;

/// A table's column layout and primary key, as discovered at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
    pub primary_key: PrimaryKey,
}

impl TableSchema {
    /// Project a full row down to just its primary-key columns, in PK
    /// declaration order — used both for range-scan cursors and for
    /// rendering `WHERE (pk...) = (...)` predicates in `WriteTarget`.
    pub fn primary_key_values(&self, row: &RowValue) -> RowValue {
        self.primary_key.iter().map(|&i| row[i].clone()).collect()
    }

    /// Column names in ordinal order, for rendering `INSERT` column lists.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Column names that are not part of the primary key, in ordinal
    /// order — these are the ones `ON DUPLICATE KEY UPDATE` needs to
    /// overwrite.
    pub fn non_key_column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.primary_key.contains(i))
            .map(|(_, c)| c.name.as_str())
            .collect()
    }
}

/// The immutable, read-once mapping from table identity to schema.
///
/// Built before either producer starts; shared as `Arc<SchemaCache>`
/// thereafter, so it needs no internal locking.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    tables: HashMap<TableIdentity, TableSchema>,
}

impl SchemaCache {
    /// Discover the column layout and primary key of every table in
    /// `tables` by querying `information_schema`. A table with no primary
    /// key is rejected outright — there is no silent-skip mode.
    pub async fn discover(
        pool: &Pool,
        tables: &[TableIdentity],
    ) -> Result<SchemaCache, FerryError> {
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| FerryError::Schema(e.to_string()))?;

        let mut discovered = HashMap::with_capacity(tables.len());
        for table in tables {
            let columns = discover_columns(&mut conn, table).await?;
            let primary_key = discover_primary_key(&mut conn, table, &columns).await?;
            if primary_key.is_empty() {
                return Err(FerryError::Schema(format!(
                    "table {table} has no primary key and cannot be copied"
                )));
            }
            discovered.insert(
                table.clone(),
                TableSchema {
                    columns,
                    primary_key,
                },
            );
        }

        Ok(SchemaCache { tables: discovered })
    }

    /// Build a cache directly from already-known schemas — used by tests
    /// and by any caller that already has the layout in hand.
    pub fn from_tables(tables: HashMap<TableIdentity, TableSchema>) -> Self {
        SchemaCache { tables }
    }

    pub fn get(&self, table: &TableIdentity) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &TableIdentity) -> bool {
        self.tables.contains_key(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableIdentity> {
        self.tables.keys()
    }
}

async fn discover_columns(
    conn: &mut mysql_async::Conn,
    table: &TableIdentity,
) -> Result<Vec<ColumnSpec>, FerryError> {
    let rows: Vec<(String, u64, String, String)> = with_deadline(DEFAULT_QUERY_TIMEOUT, async {
        conn.exec(
            "SELECT column_name, ordinal_position, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = :schema AND table_name = :table \
             ORDER BY ordinal_position ASC",
            mysql_async::params! {
                "schema" => &table.schema,
                "table" => &table.table,
            },
        )
        .await
        .map_err(|e| FerryError::Schema(e.to_string()))
    })
    .await?;

    if rows.is_empty() {
        return Err(FerryError::Schema(format!("table {table} not found")));
    }

    Ok(rows
        .into_iter()
        .map(|(name, ordinal, data_type, nullable)| ColumnSpec {
            name,
            ordinal: (ordinal - 1) as usize,
            sql_type: sql_type_from_mysql(&data_type),
            nullable: nullable.eq_ignore_ascii_case("YES"),
        })
        .collect())
}

async fn discover_primary_key(
    conn: &mut mysql_async::Conn,
    table: &TableIdentity,
    columns: &[ColumnSpec],
) -> Result<PrimaryKey, FerryError> {
    let rows: Vec<String> = with_deadline(DEFAULT_QUERY_TIMEOUT, async {
        conn.exec(
            "SELECT column_name \
             FROM information_schema.key_column_usage \
             WHERE table_schema = :schema AND table_name = :table \
               AND constraint_name = 'PRIMARY' \
             ORDER BY ordinal_position ASC",
            mysql_async::params! {
                "schema" => &table.schema,
                "table" => &table.table,
            },
        )
        .await
        .map_err(|e| FerryError::Schema(e.to_string()))
    })
    .await?;

    rows.into_iter()
        .map(|name| {
            columns
                .iter()
                .position(|c| c.name == name)
                .ok_or_else(|| FerryError::Schema(format!("PK column {name} not in column list")))
        })
        .collect()
}

fn sql_type_from_mysql(data_type: &str) -> SqlType {
    match data_type.to_ascii_lowercase().as_str() {
        "tinyint" | "smallint" | "mediumint" | "int" | "bigint" => SqlType::Integer,
        "tinyint unsigned" | "smallint unsigned" | "mediumint unsigned" | "int unsigned"
        | "bigint unsigned" => SqlType::UnsignedInteger,
        "float" | "double" => SqlType::Float,
        "decimal" | "numeric" => SqlType::Decimal,
        "timestamp" | "datetime" | "date" | "time" => SqlType::Timestamp,
        "json" => SqlType::Json,
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => {
            SqlType::Bytes
        }
        _ => SqlType::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(pk: PrimaryKey) -> TableSchema {
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
            primary_key: pk,
        }
    }

    fn int(v: i64) -> crate::value::DfValue {
        crate::value::DfValue::Int(v)
    }

    #[test]
    fn primary_key_values_projects_in_declaration_order() {
        let s = schema(vec![0]);
        let row = vec![int(1), crate::value::DfValue::Text("a".into())];
        assert_eq!(s.primary_key_values(&row), vec![int(1)]);
    }

    #[test]
    fn non_key_columns_excludes_the_primary_key() {
        let s = schema(vec![0]);
        assert_eq!(s.non_key_column_names(), vec!["name"]);
    }
}
