//! The `Ferry` coordinator: owns the source/target connection pools, the
//! `SchemaCache`, both producers, and the lifecycle state machine.
//!
//! Usage mirrors spec.md §4.1's four operations:
//!
//! ```ignore
//! let mut ferry = Ferry::initialize(config).await?;
//! let control = ControlHandle::new(ferry.state_handle(), ferry.throttle(), ferry.cancellation_token());
//! ferry.start(control.clone(), vec![/* consumer listeners */]).await?;
//! let outcome = ferry.run().await?;
//! ```
//!
//! `run` internally performs the cutover handshake
//! (`WaitUntilRowCopyIsComplete` then `FlushBinlogAndStopStreaming`) once
//! the `DataIterator` drains and the operator's automatic-cutover flag is
//! set; both steps are also exposed standalone for tests and for a
//! dashboard that wants finer-grained control than "just run it".

use std::sync::Arc;
use std::time::Duration;

use data_iterator::DataIterator;
use ferry_common::{BatchListener, DoneListener, SchemaCache};
use ferry_errors::FerryError;
use ferry_util::{with_deadline, CancellationToken, DEFAULT_QUERY_TIMEOUT};
use mysql_async::prelude::Queryable;
use mysql_async::Pool;
use replication_offset::ChangePosition;
use replicators::{BinlogStreamer, FlushHandle};
use tracing::{info, warn};

use crate::config::FerryConfig;
use crate::control::ControlHandle;
use crate::error_handler::{ErrorHandle, ErrorHandler};
use crate::state::{OverallState, StateHandle};
use crate::throttler::Throttler;
use crate::write_target::{MySqlTargetConnector, WriteTarget};

/// The terminal outcome of a `Ferry::run` call.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: OverallState,
    pub failed: bool,
    pub errors: Vec<(String, FerryError)>,
}

/// How often `Ferry::run` polls `ControlHandle::automatic_cutover` while
/// in `wait-for-cutover` (spec.md §4.1).
const CUTOVER_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct Ferry {
    config: FerryConfig,
    source_pool: Pool,
    target_pool: Pool,
    state: Arc<StateHandle>,
    cancel: CancellationToken,
    throttle: Arc<ferry_common::Throttle>,
    error_handle: ErrorHandle,
    error_handler: Option<ErrorHandler>,
    schema: Option<Arc<SchemaCache>>,
    start_position: Option<ChangePosition>,
    listeners: Vec<Arc<dyn BatchListener>>,
    done_listeners: Vec<Arc<dyn DoneListener>>,
}

impl Ferry {
    /// Open both connection pools, verify connectivity, and spin up the
    /// `ErrorHandler`. Fails with `FerryError::Config` if either endpoint
    /// is unreachable or its TLS material is invalid.
    pub async fn initialize(config: FerryConfig) -> Result<Ferry, FerryError> {
        let source_pool = config.source.connect().await?;
        let target_pool = config.target.connect().await?;

        let state = StateHandle::new();
        let cancel = CancellationToken::new();
        let (error_handler, error_handle) =
            ErrorHandler::spawn(config.state_dump_path.clone(), state.clone(), cancel.clone());

        Ok(Ferry {
            config,
            source_pool,
            target_pool,
            state,
            cancel,
            throttle: ferry_common::Throttle::new(),
            error_handle,
            error_handler: Some(error_handler),
            schema: None,
            start_position: None,
            listeners: Vec::new(),
            done_listeners: Vec::new(),
        })
    }

    pub fn state_handle(&self) -> Arc<StateHandle> {
        self.state.clone()
    }

    pub fn throttle(&self) -> Arc<ferry_common::Throttle> {
        self.throttle.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn error_handle(&self) -> ErrorHandle {
        self.error_handle.clone()
    }

    /// Capture the starting `ChangePosition` (before any row is read — the
    /// invariant spec.md §3 depends on), load the `SchemaCache`, and
    /// install the built-in `WriteTarget` listener after
    /// `consumer_listeners`, per the listener-ordering rule (spec.md
    /// §4.1).
    pub async fn start(
        &mut self,
        consumer_listeners: Vec<Arc<dyn BatchListener>>,
    ) -> Result<(), FerryError> {
        let start_position = capture_current_position(&self.source_pool).await?;
        let tables = self.config.table_identities()?;
        let schema = Arc::new(SchemaCache::discover(&self.source_pool, &tables).await?);

        let write_target = Arc::new(WriteTarget::new(
            MySqlTargetConnector::new(self.target_pool.clone()),
            schema.clone(),
            self.config.max_write_retries_on_target_db_error,
        ));

        let mut listeners = consumer_listeners;
        listeners.push(write_target as Arc<dyn BatchListener>);

        self.schema = Some(schema);
        self.start_position = Some(start_position);
        self.listeners = listeners;

        Ok(())
    }

    /// Run the pipeline to completion: spawn the `Throttler`,
    /// `DataIterator`, and `BinlogStreamer`; drive the cutover handshake
    /// once the iterator drains; join both producers; then stop the
    /// supporting services. Errors from either producer are reported to
    /// the `ErrorHandler`, not returned directly — `run` always returns
    /// `Ok`, and callers inspect `RunOutcome` for failure.
    pub async fn run(mut self, control: Arc<ControlHandle>) -> Result<RunOutcome, FerryError> {
        let schema = self
            .schema
            .clone()
            .expect("Ferry::start must be called before Ferry::run");
        let start_position = self
            .start_position
            .clone()
            .expect("Ferry::start must be called before Ferry::run");

        self.state.advance(OverallState::Copying);

        let throttler = Throttler::new(
            self.source_pool.clone(),
            self.throttle.clone(),
            self.config.throttler_lag_high_water(),
            self.config.throttler_lag_low_water(),
            self.config.throttler_check_interval(),
        );
        let throttler_handle = tokio::spawn(throttler.run(self.cancel.clone()));

        let tables = self.config.table_identities()?;
        let iterator = DataIterator::new(
            self.source_pool.clone(),
            schema.clone(),
            tables,
            self.config.iterator_batch_size,
            self.config.iterator_workers,
            self.throttle.clone(),
        );

        let streamer_connect = BinlogStreamer::connect(
            self.config.source.opts(),
            start_position,
            schema.clone(),
            self.config.server_id,
            self.config.max_binlog_connect_retries,
        )
        .await;

        let (streamer, flush_handle) = match streamer_connect {
            Ok(pair) => pair,
            Err(e) => {
                self.error_handle.report("binlog_streamer", e, None);
                self.cancel.cancel();
                return self.finish(vec![], throttler_handle).await;
            }
        };

        let iterator_listeners = self.listeners.clone();
        let iterator_done_listeners = self.done_listeners.clone();
        let iterator_cancel = self.cancel.clone();
        let iterator_error_handle = self.error_handle.clone();
        let iterator_handle: tokio::task::JoinHandle<Result<(), FerryError>> = tokio::spawn(async move {
            let result = iterator
                .run(iterator_listeners, iterator_done_listeners, iterator_cancel)
                .await;
            if let Err(e) = &result {
                if !e.is_cancellation() {
                    iterator_error_handle.report("data_iterator", e.clone(), None);
                }
            }
            result
        });

        let streamer_listeners = self.listeners.clone();
        let streamer_cancel = self.cancel.clone();
        let streamer_error_handle = self.error_handle.clone();
        let streamer_handle: tokio::task::JoinHandle<Result<(), FerryError>> = tokio::spawn(async move {
            let result = streamer.run(streamer_listeners, streamer_cancel).await;
            if let Err(e) = &result {
                if !e.is_cancellation() {
                    streamer_error_handle.report("binlog_streamer", e.clone(), None);
                }
            }
            result
        });

        let iterator_result = iterator_handle
            .await
            .map_err(|e| FerryError::SourceRead(format!("data iterator task panicked: {e}")))?;

        if iterator_result.is_ok() {
            self.state.advance(OverallState::WaitForCutover);
            self.wait_until_row_copy_is_complete(&control).await;
            if !self.cancel.is_cancelled() {
                self.state.advance(OverallState::Cutover);
                control.signal_row_copy_complete();
                self.flush_binlog_and_stop_streaming(&flush_handle).await;
            }
        }

        let streamer_result = streamer_handle
            .await
            .map_err(|e| FerryError::SourceRead(format!("binlog streamer task panicked: {e}")))?;

        let clean = iterator_result.is_ok()
            && matches!(streamer_result, Ok(()) | Err(FerryError::Cancelled))
            && !self.state.is_failing();

        if clean {
            self.state.advance(OverallState::Done);
        }

        self.finish(vec![], throttler_handle).await
    }

    /// `WaitUntilRowCopyIsComplete`: block until `cancel` fires or the
    /// operator's automatic-cutover flag is observed true, polling at
    /// `CUTOVER_POLL_INTERVAL`.
    async fn wait_until_row_copy_is_complete(&self, control: &ControlHandle) {
        loop {
            if self.cancel.is_cancelled() || control.automatic_cutover() {
                return;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(CUTOVER_POLL_INTERVAL) => {}
            }
        }
    }

    /// `FlushBinlogAndStopStreaming`: query the source for its current
    /// change-log position (not the streamer's own last-read position,
    /// which may trail bytes already committed but still unread on the
    /// replication socket) and record it as the stop target. Idempotent;
    /// the streamer's `run` loop notices on its next iteration and exits
    /// once it reaches or passes that position. If the source query
    /// itself fails, falls back to the streamer's last-processed
    /// position so the operator's stop request still makes progress.
    async fn flush_binlog_and_stop_streaming(&self, flush_handle: &FlushHandle) {
        let target = match capture_current_position(&self.source_pool).await {
            Ok(position) => position,
            Err(e) => {
                warn!(error = %e, "failed to query source for flush target, falling back to last-processed position");
                flush_handle.last_processed_position()
            }
        };
        info!(%target, "signalling binlog streamer to flush and stop");
        flush_handle.flush_and_stop(target);
    }

    async fn finish(
        mut self,
        extra_errors: Vec<(String, FerryError)>,
        throttler_handle: tokio::task::JoinHandle<()>,
    ) -> Result<RunOutcome, FerryError> {
        self.cancel.cancel();
        let _ = throttler_handle.await;

        drop(self.error_handle);
        let mut errors = self
            .error_handler
            .take()
            .expect("Ferry::run consumes self, so this runs at most once")
            .stop()
            .await;
        errors.extend(extra_errors);

        Ok(RunOutcome {
            state: self.state.get(),
            failed: self.state.is_failing(),
            errors,
        })
    }
}

async fn capture_current_position(pool: &Pool) -> Result<ChangePosition, FerryError> {
    let mut conn = pool
        .get_conn()
        .await
        .map_err(|e| FerryError::SourceRead(e.to_string()))?;

    let row: Option<mysql_async::Row> = with_deadline(DEFAULT_QUERY_TIMEOUT, async {
        conn.query_first("SHOW MASTER STATUS")
            .await
            .map_err(|e| FerryError::SourceRead(e.to_string()))
    })
    .await?;

    let row = row.ok_or_else(|| {
        FerryError::SourceRead("SHOW MASTER STATUS returned no row; is binary logging enabled?".into())
    })?;

    let file: String = row
        .get("File")
        .ok_or_else(|| FerryError::SourceRead("missing File column in SHOW MASTER STATUS".into()))?;
    let position: u64 = row
        .get("Position")
        .ok_or_else(|| FerryError::SourceRead("missing Position column in SHOW MASTER STATUS".into()))?;

    Ok(ChangePosition::new(file, position))
}
