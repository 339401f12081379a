//! `WriteTarget`: the built-in `BatchListener` that applies a batch of
//! `DMLEvent`s to the target database in a single transaction, with
//! whole-batch retry.
//!
//! The target connection is reached through [`TargetConnector`] rather
//! than a bare `mysql_async::Pool`, so the session-setup and retry
//! behaviour can be asserted against an in-memory recorder in tests
//! without a live MySQL instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ferry_common::event::Statement;
use ferry_common::{BatchListener, DMLEvent, SchemaCache};
use ferry_errors::FerryError;
use ferry_util::backoff::retry_delays;
use ferry_util::{with_deadline, DEFAULT_QUERY_TIMEOUT};
use metrics::counter;
use mysql_async::{Pool, Value as MyValue};
use tracing::warn;

use crate::recorded;

/// One open transaction against the target, abstracted so tests can swap
/// in a recording fake.
#[async_trait]
pub trait TargetTransaction: Send {
    async fn execute(&mut self, stmt: &Statement) -> Result<(), FerryError>;
    async fn commit(self: Box<Self>) -> Result<(), FerryError>;
    async fn rollback(self: Box<Self>) -> Result<(), FerryError>;
}

/// Opens transactions against the target, performing the session setup
/// every transaction requires (spec.md §4.4) before handing control back.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>, FerryError>;
}

/// The session variables every `WriteTarget` transaction sets up front,
/// required for bit-exact replay of timestamp and truncation semantics.
pub const SESSION_TIME_ZONE: &str = "SET time_zone = '+00:00'";
pub const SESSION_STRICT_MODE: &str =
    "SET SESSION sql_mode = CONCAT(@@SESSION.sql_mode, ',STRICT_ALL_TABLES')";

/// A `TargetConnector` backed by a real `mysql_async::Pool`. Transactions
/// are driven with raw `START TRANSACTION`/`COMMIT`/`ROLLBACK` statements
/// rather than the driver's scoped `Transaction` type, so a transaction
/// can be handed around as an owned `Box<dyn TargetTransaction>` instead
/// of borrowing the connection.
pub struct MySqlTargetConnector {
    pool: Pool,
}

impl MySqlTargetConnector {
    pub fn new(pool: Pool) -> Arc<Self> {
        Arc::new(MySqlTargetConnector { pool })
    }
}

#[async_trait]
impl TargetConnector for MySqlTargetConnector {
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>, FerryError> {
        use mysql_async::prelude::Queryable;

        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| FerryError::TargetWrite(e.to_string()))?;

        with_deadline(DEFAULT_QUERY_TIMEOUT, async {
            conn.query_drop(SESSION_TIME_ZONE)
                .await
                .map_err(|e| FerryError::TargetWrite(e.to_string()))?;
            conn.query_drop(SESSION_STRICT_MODE)
                .await
                .map_err(|e| FerryError::TargetWrite(e.to_string()))?;
            conn.query_drop("START TRANSACTION")
                .await
                .map_err(|e| FerryError::TargetWrite(e.to_string()))
        })
        .await?;

        Ok(Box::new(MySqlTransaction { conn }))
    }
}

struct MySqlTransaction {
    conn: mysql_async::Conn,
}

#[async_trait]
impl TargetTransaction for MySqlTransaction {
    async fn execute(&mut self, stmt: &Statement) -> Result<(), FerryError> {
        use mysql_async::prelude::Queryable;

        let params: Vec<MyValue> = stmt.params.iter().map(MyValue::from).collect();
        let conn = &mut self.conn;
        let sql = stmt.sql.clone();
        with_deadline(DEFAULT_QUERY_TIMEOUT, async {
            conn.exec_drop(sql, mysql_async::Params::Positional(params))
                .await
                .map_err(|e| FerryError::TargetWrite(e.to_string()))
        })
        .await
    }

    async fn commit(mut self: Box<Self>) -> Result<(), FerryError> {
        use mysql_async::prelude::Queryable;
        with_deadline(DEFAULT_QUERY_TIMEOUT, async {
            self.conn
                .query_drop("COMMIT")
                .await
                .map_err(|e| FerryError::TargetWrite(e.to_string()))
        })
        .await
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), FerryError> {
        use mysql_async::prelude::Queryable;
        with_deadline(DEFAULT_QUERY_TIMEOUT, async {
            self.conn
                .query_drop("ROLLBACK")
                .await
                .map_err(|e| FerryError::TargetWrite(e.to_string()))
        })
        .await
    }
}

/// The built-in listener `Ferry::start` appends after any
/// consumer-registered listeners.
pub struct WriteTarget {
    connector: Arc<dyn TargetConnector>,
    schema: Arc<SchemaCache>,
    max_retries: u32,
}

impl WriteTarget {
    pub fn new(connector: Arc<dyn TargetConnector>, schema: Arc<SchemaCache>, max_retries: u32) -> Self {
        WriteTarget {
            connector,
            schema,
            max_retries: max_retries.max(1),
        }
    }

    /// Apply `batch` atomically, retrying the whole batch (unmodified) up
    /// to `max_retries` times on any statement or commit failure.
    pub async fn apply(&self, batch: &[DMLEvent]) -> Result<(), FerryError> {
        let mut last_err = None;

        for (attempt, delay) in retry_delays(
            self.max_retries,
            Duration::from_millis(100),
            Duration::from_secs(5),
        )
        .enumerate()
        {
            counter!(recorded::WRITE_TARGET_RETRIES, 1u64);
            match self.apply_once(batch).await {
                Ok(()) => {
                    counter!(recorded::WRITE_TARGET_BATCHES_APPLIED, 1u64);
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "target write failed, retrying whole batch");
                    last_err = Some(e);
                    match delay {
                        Some(d) => tokio::time::sleep(d).await,
                        None => break,
                    }
                }
            }
        }

        Err(FerryError::TargetWrite(format!(
            "exhausted {} retries: {}",
            self.max_retries,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn apply_once(&self, batch: &[DMLEvent]) -> Result<(), FerryError> {
        let mut tx = self.connector.begin().await?;

        for event in batch {
            let schema = self
                .schema
                .get(event.table())
                .ok_or_else(|| FerryError::Schema(format!("{} missing from schema cache", event.table())))?;
            let stmt = event.to_statement(schema);

            if let Err(e) = tx.execute(&stmt).await {
                let _ = tx.rollback().await;
                return Err(e);
            }
        }

        tx.commit().await
    }
}

#[async_trait]
impl BatchListener for WriteTarget {
    async fn on_batch(&self, batch: &[DMLEvent]) -> Result<(), FerryError> {
        self.apply(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_common::{ColumnSpec, DfValue, SqlType, TableIdentity, TableSchema};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records every statement executed and session-setup call, and can be
    /// told to fail the next N transactions to exercise the retry path.
    struct RecordingConnector {
        statements: Arc<Mutex<Vec<String>>>,
        fail_next: Mutex<u32>,
    }

    impl RecordingConnector {
        fn new(fail_next: u32) -> Arc<Self> {
            Arc::new(RecordingConnector {
                statements: Arc::new(Mutex::new(Vec::new())),
                fail_next: Mutex::new(fail_next),
            })
        }
    }

    struct RecordingTransaction {
        statements: Arc<Mutex<Vec<String>>>,
        should_fail: bool,
    }

    #[async_trait]
    impl TargetTransaction for RecordingTransaction {
        async fn execute(&mut self, stmt: &Statement) -> Result<(), FerryError> {
            if self.should_fail {
                return Err(FerryError::TargetWrite("injected failure".into()));
            }
            self.statements.lock().unwrap().push(stmt.sql.clone());
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<(), FerryError> {
            self.statements.lock().unwrap().push("COMMIT".into());
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), FerryError> {
            self.statements.lock().unwrap().push("ROLLBACK".into());
            Ok(())
        }
    }

    #[async_trait]
    impl TargetConnector for RecordingConnector {
        async fn begin(&self) -> Result<Box<dyn TargetTransaction>, FerryError> {
            self.statements.lock().unwrap().push(SESSION_TIME_ZONE.into());
            self.statements.lock().unwrap().push(SESSION_STRICT_MODE.into());

            let mut fail_next = self.fail_next.lock().unwrap();
            let should_fail = *fail_next > 0;
            if should_fail {
                *fail_next -= 1;
            }

            Ok(Box::new(RecordingTransaction {
                statements: self.statements.clone(),
                should_fail,
            }) as Box<dyn TargetTransaction>)
        }
    }

    fn users_schema() -> Arc<SchemaCache> {
        let mut tables = HashMap::new();
        tables.insert(
            TableIdentity::new("db", "users"),
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
            },
        );
        Arc::new(SchemaCache::from_tables(tables))
    }

    fn insert_event() -> DMLEvent {
        DMLEvent::Insert {
            table: TableIdentity::new("db", "users"),
            row: vec![DfValue::Int(1), DfValue::Text("a".into())],
            position: None,
        }
    }

    #[tokio::test]
    async fn every_transaction_sets_utc_time_zone_and_strict_mode() {
        let connector = RecordingConnector::new(0);
        let write_target = WriteTarget::new(connector.clone(), users_schema(), 3);

        write_target.apply(&[insert_event()]).await.unwrap();

        let statements = connector.statements.lock().unwrap();
        assert_eq!(statements[0], SESSION_TIME_ZONE);
        assert_eq!(statements[1], SESSION_STRICT_MODE);
    }

    #[tokio::test]
    async fn a_failing_batch_is_retried_as_a_whole_until_it_succeeds() {
        // Fails the first two attempts, succeeds on the third.
        let connector = RecordingConnector::new(2);
        let write_target = WriteTarget::new(connector.clone(), users_schema(), 3);

        write_target.apply(&[insert_event()]).await.unwrap();
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_a_target_write_error() {
        let connector = RecordingConnector::new(10);
        let write_target = WriteTarget::new(connector, users_schema(), 2);

        let result = write_target.apply(&[insert_event()]).await;
        assert!(matches!(result, Err(FerryError::TargetWrite(_))));
    }
}
