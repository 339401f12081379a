//! A connector that registers as a MySQL replica and decodes the binary
//! log row-events it receives into [`DMLEvent`] batches.
//!
//! The server must be configured with `binlog_format = ROW` and
//! `binlog_row_image = FULL`.
//!
//! The connecting user needs:
//! * `REPLICATION SLAVE` — to register and read the binlog
//! * `REPLICATION CLIENT` — for `SHOW MASTER STATUS` / `SHOW BINARY LOGS`
//! * `SELECT` on the applicable tables (used by `SchemaCache::discover`,
//!   not by this connector directly)
//!
//! The connector must be assigned a unique `server_id` in the replica
//! topology.

use std::convert::TryFrom;
use std::sync::{Arc, Mutex};

use ferry_common::{DMLEvent, SchemaCache, TableIdentity};
use ferry_errors::FerryError;
use ferry_util::backoff::retry_delays;
use ferry_util::{with_deadline, CancellationToken, DEFAULT_QUERY_TIMEOUT};
use metrics::counter;
use mysql_async::prelude::Queryable;
use mysql_common::binlog;
use mysql_common::binlog::row::BinlogRow;
use mysql_common::binlog::value::BinlogValue;
use replication_offset::ChangePosition;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::recorded;

const CHECKSUM_QUERY: &str = "SET @master_binlog_checksum='CRC32'";
const DEFAULT_SERVER_ID: u32 = u32::MAX - 55;

/// A handle used to request the streamer's only graceful exit:
/// `FlushAndStop` records `target` (the source's change-log position as
/// of the call, freshly queried — not the streamer's own last-read
/// position, which can trail bytes already committed but not yet pulled
/// off the replication socket) and the run loop exits once its cursor
/// reaches or passes it.
///
/// Idempotent: calling it more than once after the first has no further
/// effect, and the caller only learns the streamer actually stopped when
/// its `run` future resolves.
#[derive(Clone)]
pub struct FlushHandle {
    current_position: Arc<Mutex<ChangePosition>>,
    stop_target: Arc<Mutex<Option<ChangePosition>>>,
}

impl FlushHandle {
    /// The streamer's most recently processed position, for status
    /// reporting. Not used to compute the flush target: a target taken
    /// from here would already be caught up by construction and could
    /// let the streamer stop before draining events still sitting
    /// unread in the connection's receive buffer.
    pub fn last_processed_position(&self) -> ChangePosition {
        self.current_position.lock().unwrap().clone()
    }

    pub fn flush_and_stop(&self, target: ChangePosition) {
        let mut stop_target = self.stop_target.lock().unwrap();
        if stop_target.is_none() {
            *stop_target = Some(target);
        }
    }
}

/// Follows a MySQL source's binary log from a captured starting position.
pub struct BinlogStreamer {
    connection: mysql_async::Conn,
    reader: binlog::EventStreamReader,
    mysql_opts: mysql_async::Opts,
    max_retries: u32,
    server_id: Option<u32>,
    next_position: ChangePosition,
    schema: Arc<SchemaCache>,
    current_position: Arc<Mutex<ChangePosition>>,
    stop_target: Arc<Mutex<Option<ChangePosition>>>,
    current_gtid: Option<String>,
}

impl BinlogStreamer {
    fn server_id(&self) -> u32 {
        self.server_id.unwrap_or(DEFAULT_SERVER_ID)
    }

    /// Register with the primary as a replica, announcing the checksum
    /// algorithm we understand.
    async fn register_as_replica(&mut self) -> Result<(), FerryError> {
        let connection = &mut self.connection;
        let server_id = self.server_id();
        with_deadline(DEFAULT_QUERY_TIMEOUT, async {
            connection
                .query_drop(CHECKSUM_QUERY)
                .await
                .map_err(|e| FerryError::Binlog(e.to_string()))?;

            let cmd = mysql_common::packets::ComRegisterSlave::new(server_id);
            connection
                .write_command(&cmd)
                .await
                .map_err(|e| FerryError::Binlog(e.to_string()))?;
            connection
                .read_packet()
                .await
                .map_err(|e| FerryError::Binlog(e.to_string()))?;
            Ok(())
        })
        .await
    }

    /// Request the binlog stream starting at `self.next_position`.
    async fn request_binlog(&mut self) -> Result<(), FerryError> {
        let cmd = mysql_common::packets::ComBinlogDump::new(self.server_id())
            .with_pos(self.next_position.offset as u32)
            .with_filename(self.next_position.binlog_file.as_bytes());

        let connection = &mut self.connection;
        with_deadline(DEFAULT_QUERY_TIMEOUT, async {
            connection
                .write_command(&cmd)
                .await
                .map_err(|e| FerryError::Binlog(e.to_string()))?;
            connection
                .read_packet()
                .await
                .map_err(|e| FerryError::Binlog(e.to_string()))?;
            Ok(())
        })
        .await
    }

    /// Connect to the source and subscribe to the binlog at `start`. On a
    /// transient connection error this retries with backoff up to
    /// `max_retries` times before surfacing `FerryError::Binlog`.
    pub async fn connect<O: Into<mysql_async::Opts>>(
        mysql_opts: O,
        start: ChangePosition,
        schema: Arc<SchemaCache>,
        server_id: Option<u32>,
        max_retries: u32,
    ) -> Result<(Self, FlushHandle), FerryError> {
        let opts = mysql_opts.into();
        let mut last_err = None;

        for delay in retry_delays(max_retries, Duration::from_millis(200), Duration::from_secs(10))
        {
            match Self::connect_once(opts.clone(), start.clone(), schema.clone(), server_id, max_retries)
                .await
            {
                Ok(connector) => return Ok(connector),
                Err(e) => {
                    warn!(error = %e, "binlog connection attempt failed");
                    counter!(recorded::STREAMER_RECONNECTS, 1u64);
                    last_err = Some(e);
                    match delay {
                        Some(d) => tokio::time::sleep(d).await,
                        None => break,
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FerryError::Binlog("no connection attempts made".into())))
    }

    async fn connect_once(
        opts: mysql_async::Opts,
        start: ChangePosition,
        schema: Arc<SchemaCache>,
        server_id: Option<u32>,
        max_retries: u32,
    ) -> Result<(Self, FlushHandle), FerryError> {
        let current_position = Arc::new(Mutex::new(start.clone()));
        let stop_target = Arc::new(Mutex::new(None));

        let mut connector = BinlogStreamer {
            connection: tokio::time::timeout(
                DEFAULT_QUERY_TIMEOUT,
                mysql_async::Conn::new(opts.clone()),
            )
            .await
            .map_err(|_| FerryError::Timeout(DEFAULT_QUERY_TIMEOUT))?
            .map_err(|e| FerryError::Binlog(e.to_string()))?,
            reader: binlog::EventStreamReader::new(binlog::consts::BinlogVersion::Version4),
            mysql_opts: opts,
            max_retries,
            server_id,
            next_position: start,
            schema,
            current_position: current_position.clone(),
            stop_target: stop_target.clone(),
            current_gtid: None,
        };

        connector.register_as_replica().await?;
        connector.request_binlog().await?;

        let handle = FlushHandle {
            current_position,
            stop_target,
        };

        Ok((connector, handle))
    }

    /// Re-open the replication connection at `self.next_position` after a
    /// transient drop, without disturbing `current_position`/`stop_target`
    /// (still shared with the caller's `FlushHandle`).
    async fn try_reconnect_once(&mut self) -> Result<(), FerryError> {
        self.connection = tokio::time::timeout(
            DEFAULT_QUERY_TIMEOUT,
            mysql_async::Conn::new(self.mysql_opts.clone()),
        )
        .await
        .map_err(|_| FerryError::Timeout(DEFAULT_QUERY_TIMEOUT))?
        .map_err(|e| FerryError::Binlog(e.to_string()))?;
        self.reader = binlog::EventStreamReader::new(binlog::consts::BinlogVersion::Version4);

        self.register_as_replica().await?;
        self.request_binlog().await?;
        Ok(())
    }

    /// Reconnect with the same backoff budget `connect` uses
    /// (`max_binlog_connect_retries`), repositioning at `next_position` on
    /// success. Surfaces `FerryError::Binlog` once the retry budget is
    /// exhausted.
    async fn reconnect(&mut self, cancel: &CancellationToken) -> Result<(), FerryError> {
        let mut last_err = None;

        for delay in
            retry_delays(self.max_retries, Duration::from_millis(200), Duration::from_secs(10))
        {
            if cancel.is_cancelled() {
                return Err(FerryError::Cancelled);
            }

            match self.try_reconnect_once().await {
                Ok(()) => {
                    info!(position = %self.next_position, "binlog streamer reconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "binlog reconnect attempt failed");
                    counter!(recorded::STREAMER_RECONNECTS, 1u64);
                    last_err = Some(e);
                    match delay {
                        Some(d) => {
                            tokio::select! {
                                _ = cancel.cancelled() => return Err(FerryError::Cancelled),
                                _ = tokio::time::sleep(d) => {}
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FerryError::Binlog("binlog reconnect exhausted retries".into())))
    }

    async fn next_event(&mut self) -> Result<binlog::events::Event, FerryError> {
        let packet = self
            .connection
            .read_packet()
            .await
            .map_err(|e| FerryError::Binlog(e.to_string()))?;
        if packet.first() != Some(&0) {
            return Err(FerryError::Binlog(
                "malformed binlog packet (missing OK marker)".into(),
            ));
        }
        self.reader
            .read(&packet[1..])
            .map_err(|e| FerryError::Binlog(e.to_string()))
    }

    /// Read the next event, transparently reconnecting (with the same
    /// backoff budget `connect` uses) if the replication socket drops
    /// mid-stream. Only surfaces `FerryError::Binlog` once that retry
    /// budget is exhausted.
    async fn next_event_with_reconnect(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<binlog::events::Event, FerryError> {
        loop {
            match self.next_event().await {
                Ok(event) => return Ok(event),
                Err(e) => {
                    warn!(error = %e, "binlog connection dropped mid-stream, reconnecting");
                    self.reconnect(cancel).await?;
                }
            }
        }
    }

    /// Run until cancelled, or until `FlushAndStop`'s recorded target
    /// position is reached. Delivers batches to `listeners` in strict
    /// change-log order; batching never spans two distinct
    /// `GTID_EVENT`-delimited transactions.
    pub async fn run(
        mut self,
        listeners: Vec<Arc<dyn ferry_common::BatchListener>>,
        cancel: CancellationToken,
    ) -> Result<(), FerryError> {
        use mysql_common::binlog::consts::EventType;
        use mysql_common::binlog::events;

        loop {
            if let Some(target) = self.stop_target.lock().unwrap().clone() {
                if self.next_position >= target {
                    info!("binlog streamer reached flush target, stopping");
                    return Ok(());
                }
            }

            let binlog_event = tokio::select! {
                _ = cancel.cancelled() => return Err(FerryError::Cancelled),
                ev = self.next_event_with_reconnect(&cancel) => ev?,
            };

            self.next_position.offset = binlog_event.header().log_pos() as u64;

            let event_type = binlog_event
                .header()
                .event_type()
                .map_err(|ev| FerryError::Binlog(format!("unknown binlog event type {ev}")))?;

            let batch = match event_type {
                EventType::ROTATE_EVENT => {
                    let ev: events::RotateEvent = binlog_event
                        .read_event()
                        .map_err(|e| FerryError::Binlog(e.to_string()))?;
                    self.next_position = ChangePosition {
                        binlog_file: ev.name().to_string(),
                        offset: ev.position(),
                        gtid: self.current_gtid.clone(),
                    };
                    None
                }

                EventType::GTID_EVENT => {
                    let ev: events::GtidEvent = binlog_event
                        .read_event()
                        .map_err(|e| FerryError::Binlog(e.to_string()))?;
                    self.current_gtid = Some(ev.gno().to_string());
                    None
                }

                // DDL is not replicated (schema migration is a non-goal);
                // QUERY_EVENT carries both DDL and multi-statement DML
                // markers (BEGIN/COMMIT) we don't otherwise act on.
                EventType::QUERY_EVENT => None,

                EventType::TABLE_MAP_EVENT => None,

                EventType::WRITE_ROWS_EVENT => {
                    self.decode_rows_event(&binlog_event, RowsEventKind::Write)?
                }
                EventType::UPDATE_ROWS_EVENT => {
                    self.decode_rows_event(&binlog_event, RowsEventKind::Update)?
                }
                EventType::DELETE_ROWS_EVENT => {
                    self.decode_rows_event(&binlog_event, RowsEventKind::Delete)?
                }

                other => {
                    debug!(?other, "unhandled binlog event");
                    None
                }
            };

            if let Some(batch) = batch {
                if !batch.is_empty() {
                    counter!(recorded::STREAMER_EVENTS_DECODED, batch.len() as u64);
                    for listener in &listeners {
                        listener.on_batch(&batch).await?;
                    }
                }
            }

            *self.current_position.lock().unwrap() = self.next_position.clone();
        }
    }

    fn decode_rows_event(
        &mut self,
        binlog_event: &binlog::events::Event,
        kind: RowsEventKind,
    ) -> Result<Option<Vec<DMLEvent>>, FerryError> {
        use mysql_common::binlog::events;

        let table_id_and_rows: (u64, Vec<DMLEvent>) = match kind {
            RowsEventKind::Write => {
                let ev: events::WriteRowsEvent = binlog_event
                    .read_event()
                    .map_err(|e| FerryError::Binlog(e.to_string()))?;
                let tme = self
                    .reader
                    .get_tme(ev.table_id())
                    .ok_or_else(|| FerryError::Binlog("missing table map for write event".into()))?;
                let table = table_identity(tme);
                if !self.schema.contains(&table) {
                    counter!(recorded::STREAMER_EVENTS_SKIPPED, 1u64);
                    return Ok(None);
                }
                let schema = self.schema.get(&table).unwrap();
                let mut events = Vec::new();
                for row in ev.rows(tme) {
                    let (_, after) = row.map_err(|e| FerryError::Binlog(e.to_string()))?;
                    let after = after.ok_or_else(|| {
                        FerryError::Binlog("missing row data in write event".into())
                    })?;
                    let row = binlog_row_to_row_value(&after, schema, &table)?;
                    events.push(DMLEvent::Insert {
                        table: table.clone(),
                        row,
                        position: Some(self.next_position.clone()),
                    });
                }
                (ev.table_id(), events)
            }
            RowsEventKind::Update => {
                let ev: events::UpdateRowsEvent = binlog_event
                    .read_event()
                    .map_err(|e| FerryError::Binlog(e.to_string()))?;
                let tme = self
                    .reader
                    .get_tme(ev.table_id())
                    .ok_or_else(|| FerryError::Binlog("missing table map for update event".into()))?;
                let table = table_identity(tme);
                if !self.schema.contains(&table) {
                    counter!(recorded::STREAMER_EVENTS_SKIPPED, 1u64);
                    return Ok(None);
                }
                let schema = self.schema.get(&table).unwrap();
                let mut events = Vec::new();
                for row in ev.rows(tme) {
                    let (before, after) = row.map_err(|e| FerryError::Binlog(e.to_string()))?;
                    let before = before.ok_or_else(|| {
                        FerryError::Binlog("missing before-image in update event".into())
                    })?;
                    let after = after.ok_or_else(|| {
                        FerryError::Binlog("missing after-image in update event".into())
                    })?;
                    events.push(DMLEvent::Update {
                        table: table.clone(),
                        before: binlog_row_to_row_value(&before, schema, &table)?,
                        after: binlog_row_to_row_value(&after, schema, &table)?,
                        position: Some(self.next_position.clone()),
                    });
                }
                (ev.table_id(), events)
            }
            RowsEventKind::Delete => {
                let ev: events::DeleteRowsEvent = binlog_event
                    .read_event()
                    .map_err(|e| FerryError::Binlog(e.to_string()))?;
                let tme = self
                    .reader
                    .get_tme(ev.table_id())
                    .ok_or_else(|| FerryError::Binlog("missing table map for delete event".into()))?;
                let table = table_identity(tme);
                if !self.schema.contains(&table) {
                    counter!(recorded::STREAMER_EVENTS_SKIPPED, 1u64);
                    return Ok(None);
                }
                let schema = self.schema.get(&table).unwrap();
                let mut events = Vec::new();
                for row in ev.rows(tme) {
                    let (before, _) = row.map_err(|e| FerryError::Binlog(e.to_string()))?;
                    let before = before.ok_or_else(|| {
                        FerryError::Binlog("missing row data in delete event".into())
                    })?;
                    events.push(DMLEvent::Delete {
                        table: table.clone(),
                        row: binlog_row_to_row_value(&before, schema, &table)?,
                        position: Some(self.next_position.clone()),
                    });
                }
                (ev.table_id(), events)
            }
        };

        Ok(Some(table_id_and_rows.1))
    }
}

enum RowsEventKind {
    Write,
    Update,
    Delete,
}

fn table_identity(tme: &binlog::events::TableMapEvent<'_>) -> TableIdentity {
    TableIdentity::new(tme.database_name().to_string(), tme.table_name().to_string())
}

fn binlog_row_to_row_value(
    row: &BinlogRow,
    schema: &ferry_common::TableSchema,
    table: &TableIdentity,
) -> Result<ferry_common::RowValue, FerryError> {
    if row.len() != schema.columns.len() {
        return Err(FerryError::Schema(format!(
            "row shape for {table} ({} columns) does not match cached schema ({} columns)",
            row.len(),
            schema.columns.len()
        )));
    }

    (0..row.len())
        .map(|idx| {
            let value = row
                .as_ref(idx)
                .ok_or_else(|| FerryError::Binlog(format!("missing column {idx} in row")))?;
            binlog_value_to_df_value(value, schema.columns[idx].sql_type)
        })
        .collect()
}

fn binlog_value_to_df_value(
    value: &BinlogValue,
    sql_type: ferry_common::SqlType,
) -> Result<ferry_common::DfValue, FerryError> {
    use ferry_common::{DfValue, SqlType};

    match value {
        BinlogValue::Value(mysql_common::value::Value::NULL) => Ok(DfValue::Null),
        BinlogValue::Value(v) => match sql_type {
            SqlType::Integer => i64::try_from(v.clone())
                .map(DfValue::Int)
                .map_err(|e| FerryError::Binlog(e.to_string())),
            SqlType::UnsignedInteger => u64::try_from(v.clone())
                .map(DfValue::UInt)
                .map_err(|e| FerryError::Binlog(e.to_string())),
            SqlType::Float => f64::try_from(v.clone())
                .map(DfValue::Float)
                .map_err(|e| FerryError::Binlog(e.to_string())),
            SqlType::Bytes => match v {
                mysql_common::value::Value::Bytes(b) => Ok(DfValue::Bytes(b.clone())),
                _ => Err(FerryError::Binlog("expected bytes value".into())),
            },
            SqlType::Timestamp => match v {
                mysql_common::value::Value::Date(y, m, d, hh, mm, ss, _) => {
                    let dt = chrono::NaiveDate::from_ymd_opt(*y as i32, *m as u32, *d as u32)
                        .and_then(|d| d.and_hms_opt(*hh as u32, *mm as u32, *ss as u32))
                        .ok_or_else(|| FerryError::Binlog("invalid timestamp value".into()))?;
                    Ok(DfValue::Timestamp(dt.and_utc().timestamp()))
                }
                _ => Err(FerryError::Binlog("expected a date/time value".into())),
            },
            SqlType::Decimal | SqlType::Json | SqlType::Text => match v {
                mysql_common::value::Value::Bytes(b) => {
                    Ok(DfValue::Text(String::from_utf8_lossy(b).into_owned()))
                }
                other => Ok(DfValue::Text(format!("{other:?}"))),
            },
        },
        // mysql_common's jsonb value doesn't implement Display; rendering
        // it to the on-disk JSON text format is not yet implemented.
        BinlogValue::Jsonb(_) => Err(FerryError::Binlog(
            "JSON column replication is not yet supported".into(),
        )),
    }
}
