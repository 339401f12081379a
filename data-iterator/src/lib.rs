//! The `DataIterator`: a bulk, primary-key-range-bounded copier that walks
//! every applicable table once, emitting `Insert` events for rows it reads.
//!
//! A fixed pool of worker tasks pulls tables from a shared queue; each
//! worker owns one table at a time and repeatedly issues
//! `SELECT ... WHERE (pk) > (:cursor) ORDER BY pk LIMIT :batch`, advancing
//! the cursor to the last row returned, until a scan returns fewer than
//! `batch_size` rows.

pub mod recorded;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ferry_common::{
    BatchListener, DMLEvent, DoneListener, RowValue, SchemaCache, TableIdentity, TableSchema,
    Throttle,
};
use ferry_errors::FerryError;
use ferry_util::{with_deadline, CancellationToken, DEFAULT_QUERY_TIMEOUT};
use metrics::counter;
use mysql_async::prelude::Queryable;
use mysql_async::{Pool, Value as MyValue};
use tracing::{debug, info, instrument};

/// Configuration and collaborators for one copy run. Constructed once by
/// `Ferry::start` and consumed by `run`.
pub struct DataIterator {
    source: Pool,
    schema: Arc<SchemaCache>,
    tables: Arc<Mutex<VecDeque<TableIdentity>>>,
    batch_size: u64,
    workers: usize,
    throttle: Arc<Throttle>,
}

impl DataIterator {
    pub fn new(
        source: Pool,
        schema: Arc<SchemaCache>,
        tables: Vec<TableIdentity>,
        batch_size: u64,
        workers: usize,
        throttle: Arc<Throttle>,
    ) -> Self {
        DataIterator {
            source,
            schema,
            tables: Arc::new(Mutex::new(tables.into_iter().collect())),
            batch_size: batch_size.max(1),
            workers: workers.max(1),
            throttle,
        }
    }

    /// Run the copy to completion: drain the table queue across `workers`
    /// concurrent tasks, emit every batch to `listeners` in order, then
    /// invoke `done_listeners` once the queue is empty. A failing done
    /// listener is fatal, exactly like a read or write failure.
    pub async fn run(
        self,
        listeners: Vec<Arc<dyn BatchListener>>,
        done_listeners: Vec<Arc<dyn DoneListener>>,
        cancel: CancellationToken,
    ) -> Result<(), FerryError> {
        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let source = self.source.clone();
            let schema = self.schema.clone();
            let tables = self.tables.clone();
            let listeners = listeners.clone();
            let throttle = self.throttle.clone();
            let cancel = cancel.clone();
            let batch_size = self.batch_size;
            handles.push(tokio::spawn(async move {
                worker_loop(
                    worker_id,
                    tables,
                    source,
                    schema,
                    listeners,
                    throttle,
                    cancel,
                    batch_size,
                )
                .await
            }));
        }

        for handle in handles {
            handle
                .await
                .map_err(|e| FerryError::SourceRead(format!("worker panicked: {e}")))??;
        }

        for done in &done_listeners {
            done.on_done().await?;
        }

        info!("data iterator drained table queue");
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    tables: Arc<Mutex<VecDeque<TableIdentity>>>,
    source: Pool,
    schema: Arc<SchemaCache>,
    listeners: Vec<Arc<dyn BatchListener>>,
    throttle: Arc<Throttle>,
    cancel: CancellationToken,
    batch_size: u64,
) -> Result<(), FerryError> {
    loop {
        let next = tables.lock().unwrap().pop_front();
        let Some(table) = next else {
            return Ok(());
        };

        debug!(worker_id, %table, "worker claimed table");
        copy_table(&table, &source, &schema, &listeners, &throttle, &cancel, batch_size).await?;
        counter!(recorded::ITERATOR_TABLES_COMPLETED, 1u64);
    }
}

#[instrument(skip(source, schema, listeners, throttle, cancel), fields(%table))]
async fn copy_table(
    table: &TableIdentity,
    source: &Pool,
    schema: &Arc<SchemaCache>,
    listeners: &[Arc<dyn BatchListener>],
    throttle: &Arc<Throttle>,
    cancel: &CancellationToken,
    batch_size: u64,
) -> Result<(), FerryError> {
    let table_schema = schema
        .get(table)
        .ok_or_else(|| FerryError::Schema(format!("{table} missing from schema cache")))?;

    let mut cursor: Option<RowValue> = None;

    loop {
        throttle.wait_until_clear(cancel).await;
        if cancel.is_cancelled() {
            return Err(FerryError::Cancelled);
        }

        let rows = select_batch(source, table, table_schema, cursor.as_ref(), batch_size).await?;
        counter!(recorded::ITERATOR_BATCHES_READ, 1u64);
        let returned = rows.len() as u64;

        if rows.is_empty() {
            break;
        }

        cursor = Some(table_schema.primary_key_values(rows.last().expect("checked non-empty")));

        let batch: Vec<DMLEvent> = rows
            .into_iter()
            .map(|row| DMLEvent::Insert {
                table: table.clone(),
                row,
                position: None,
            })
            .collect();

        counter!(recorded::ITERATOR_ROWS_COPIED, batch.len() as u64);
        for listener in listeners {
            listener.on_batch(&batch).await?;
        }

        if returned < batch_size {
            break;
        }
    }

    Ok(())
}

/// Issue one `SELECT ... WHERE (pk) > (:cursor) ORDER BY pk ASC LIMIT
/// :batch` against `table`, decoding each row through `schema`. With no
/// cursor yet (first batch for this table) the predicate is omitted.
/// Composite primary keys compare lexicographically by declaration order,
/// matching MySQL's row-value `(a, b) > (x, y)` tuple semantics.
async fn select_batch(
    source: &Pool,
    table: &TableIdentity,
    schema: &TableSchema,
    cursor: Option<&RowValue>,
    batch_size: u64,
) -> Result<Vec<RowValue>, FerryError> {
    let mut conn = source
        .get_conn()
        .await
        .map_err(|e| FerryError::SourceRead(e.to_string()))?;

    let column_list = schema.column_names().join(", ");
    let pk_names: Vec<&str> = schema
        .primary_key
        .iter()
        .map(|&i| schema.columns[i].name.as_str())
        .collect();

    let (where_clause, params) = match cursor {
        Some(values) => {
            let lhs = format!("({})", pk_names.join(", "));
            let placeholders = vec!["?"; pk_names.len()].join(", ");
            let params: Vec<MyValue> = values.iter().map(MyValue::from).collect();
            (
                format!("WHERE {lhs} > ({placeholders})"),
                params,
            )
        }
        None => (String::new(), Vec::new()),
    };

    let order_by = pk_names.join(", ");
    let sql = format!(
        "SELECT {column_list} FROM {table} {where_clause} ORDER BY {order_by} ASC LIMIT {batch_size}"
    );

    let rows: Vec<mysql_async::Row> = with_deadline(DEFAULT_QUERY_TIMEOUT, async {
        conn.exec(sql, mysql_async::Params::Positional(params))
            .await
            .map_err(|e| FerryError::SourceRead(e.to_string()))
    })
    .await?;

    rows.into_iter()
        .map(|mut row| decode_row(&mut row, schema))
        .collect()
}

fn decode_row(row: &mut mysql_async::Row, schema: &TableSchema) -> Result<RowValue, FerryError> {
    (0..schema.columns.len())
        .map(|idx| {
            let value: MyValue = row
                .take(idx)
                .ok_or_else(|| FerryError::SourceRead(format!("missing column at index {idx}")))?;
            Ok(ferry_common::mysql_value::from_mysql_value(
                value,
                schema.columns[idx].sql_type,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_common::{ColumnSpec, SqlType};
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    struct RecordingListener {
        batches: Mutex<Vec<Vec<DMLEvent>>>,
    }

    #[async_trait::async_trait]
    impl BatchListener for RecordingListener {
        async fn on_batch(&self, batch: &[DMLEvent]) -> Result<(), FerryError> {
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    struct CountingDone {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DoneListener for CountingDone {
        async fn on_done(&self) -> Result<(), FerryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn table_schema_projects_composite_cursor_in_declaration_order() {
        let schema = TableSchema {
            columns: users_schema().columns,
            primary_key: vec![0, 1],
        };
        let row = vec![
            ferry_common::DfValue::Int(1),
            ferry_common::DfValue::Text("a".into()),
        ];
        assert_eq!(
            schema.primary_key_values(&row),
            vec![
                ferry_common::DfValue::Int(1),
                ferry_common::DfValue::Text("a".into())
            ]
        );
    }

    #[tokio::test]
    async fn done_listener_runs_once_queue_drains_with_no_tables() {
        let opts: mysql_async::Opts = mysql_async::OptsBuilder::default()
            .ip_or_hostname("localhost")
            .into();
        let iterator = DataIterator::new(
            Pool::new(opts),
            Arc::new(SchemaCache::from_tables(Default::default())),
            Vec::new(),
            100,
            2,
            Throttle::new(),
        );

        let done = Arc::new(CountingDone {
            calls: AtomicUsize::new(0),
        });

        iterator
            .run(Vec::new(), vec![done.clone()], CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(done.calls.load(Ordering::SeqCst), 1);
    }
}
