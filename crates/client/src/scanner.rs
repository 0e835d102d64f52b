//! Scanner state machine
//!
//! ```text
//! Idle -> Resolving -> Fetching -> Delivering -> Resolving | Fetching | Exhausted
//!              \           \
//!               +-----------+--> Failed
//! ```
//!
//! A [`ScannerSession`] owns the cursor of one scan. It resolves the region
//! holding the cursor, fetches batches from its server, drops rows the server
//! should not have returned, and crosses to the adjacent region when the
//! current one is exhausted. Failures are handed to the [`RetryCoordinator`].
//!
//! Bounds: a forward scan delivers `start <= key < stop` ascending, a reverse
//! scan delivers `stop < key < start` descending. An empty start or stop key
//! leaves that side unbounded.

use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use region_core::key_encoding::pretty;
use region_core::{RegionInfo, Row, ServerHandle};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, error};

use crate::error::ScanError;
use crate::meta_resolver::{MetaResolver, RegionLocation};
use crate::pending_retries::RequestKey;
use crate::retry::{RetryAction, RetryCoordinator};
use crate::transport::{Direction, RegionTransport, ScanRequest};

/// Scanner states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Configured, nothing requested yet
    Idle,
    /// Looking up the region holding the cursor
    Resolving,
    /// A batch request is outstanding
    Fetching,
    /// A batch was handed to the caller
    Delivering,
    /// Every row in range was delivered
    Exhausted,
    /// Gave up; the error is returned by every further call
    Failed,
}

impl ScanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Exhausted | ScanState::Failed)
    }
}

/// Position of a scan within its range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor {
    pub table: Bytes,
    pub direction: Direction,
    pub start_key: Bytes,
    pub stop_key: Bytes,
    /// Bound of the next batch: the lower bound forward, the upper bound in
    /// reverse. Excludes the last delivered key.
    pub position: Bound<Bytes>,
    /// Region currently being read
    pub region: Option<Arc<RegionInfo>>,
    pub closed: bool,
}

impl ScanCursor {
    pub fn new(table: Bytes, start_key: Bytes, stop_key: Bytes, direction: Direction) -> Self {
        let position = match direction {
            Direction::Forward => Bound::Included(start_key.clone()),
            Direction::Reverse if start_key.is_empty() => Bound::Unbounded,
            Direction::Reverse => Bound::Excluded(start_key.clone()),
        };
        Self {
            table,
            direction,
            start_key,
            stop_key,
            position,
            region: None,
            closed: false,
        }
    }

    /// Bound the scan must not reach
    pub fn stop_bound(&self) -> Bound<Bytes> {
        if self.stop_key.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(self.stop_key.clone())
        }
    }

    /// Check if the configured range holds no key at all
    pub fn is_empty_range(&self) -> bool {
        if self.start_key.is_empty() || self.stop_key.is_empty() {
            return false;
        }
        match self.direction {
            Direction::Forward => self.start_key >= self.stop_key,
            Direction::Reverse => self.start_key <= self.stop_key,
        }
    }

    /// Check if `region` is the last one holding keys of this scan
    fn is_final_region(&self, region: &RegionInfo) -> bool {
        match self.direction {
            Direction::Forward => {
                region.is_last()
                    || (!self.stop_key.is_empty() && region.stop_key() >= &self.stop_key)
            }
            Direction::Reverse => {
                region.is_first()
                    || (!self.stop_key.is_empty() && region.start_key() <= &self.stop_key)
            }
        }
    }

    /// Check if `key` comes after `other` in scan order
    fn is_after(&self, key: &[u8], other: &[u8]) -> bool {
        match self.direction {
            Direction::Forward => key > other,
            Direction::Reverse => key < other,
        }
    }
}

/// Per-scan options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub batch_size: u32,
    pub family: Option<Bytes>,
    pub qualifier: Option<Bytes>,
}

/// Collaborators shared by all sessions of a client
#[derive(Clone)]
pub(crate) struct ScanContext {
    pub resolver: Arc<MetaResolver>,
    pub retry: Arc<RetryCoordinator>,
    pub transport: Arc<dyn RegionTransport>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    state: ScanState,
    cursor: ScanCursor,
}

/// State shared between a session and its handles
struct Shared {
    scan_id: u64,
    closed: AtomicBool,
    close_notify: Notify,
    snapshot: parking_lot::Mutex<Snapshot>,
    retry: Arc<RetryCoordinator>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.retry.discard_scan(self.scan_id);
    }
}

/// State machine driving one scan
pub struct ScannerSession {
    ctx: ScanContext,
    shared: Arc<Shared>,
    options: ScanOptions,
    state: ScanState,
    cursor: ScanCursor,
    server: Option<ServerHandle>,
    /// Region boundary being crossed by a reverse scan
    crossing: Option<Bytes>,
    /// The current region has no more rows for this scan
    region_done: bool,
    /// Sequence of the current logical request
    seq: u64,
    failure: Option<ScanError>,
}

impl ScannerSession {
    fn new(ctx: ScanContext, shared: Arc<Shared>, cursor: ScanCursor, options: ScanOptions) -> Self {
        Self {
            ctx,
            shared,
            options,
            state: ScanState::Idle,
            cursor,
            server: None,
            crossing: None,
            region_done: false,
            seq: 0,
            failure: None,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn cursor(&self) -> &ScanCursor {
        &self.cursor
    }

    fn request_key(&self) -> RequestKey {
        RequestKey::new(self.shared.scan_id, self.seq)
    }

    fn set_state(&mut self, state: ScanState) {
        if self.state != state {
            debug!(
                scan_id = self.shared.scan_id,
                from = ?self.state,
                to = ?state,
                "scanner state change"
            );
        }
        self.state = state;
        let mut cursor = self.cursor.clone();
        cursor.closed |= self.shared.closed.load(Ordering::SeqCst);
        *self.shared.snapshot.lock() = Snapshot { state, cursor };
    }

    /// Drive the state machine until a batch is ready or the scan ends
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Row>>, ScanError> {
        loop {
            match self.state {
                ScanState::Idle => {
                    if self.cursor.is_empty_range() {
                        self.finish();
                    } else {
                        self.set_state(ScanState::Resolving);
                    }
                }
                ScanState::Resolving => self.resolve().await?,
                ScanState::Fetching => {
                    if let Some(rows) = self.fetch().await? {
                        return Ok(Some(rows));
                    }
                }
                ScanState::Delivering => {
                    if self.region_done {
                        self.advance_region();
                    } else {
                        self.set_state(ScanState::Fetching);
                    }
                }
                ScanState::Exhausted => return Ok(None),
                ScanState::Failed => {
                    return Err(self
                        .failure
                        .clone()
                        .unwrap_or_else(|| ScanError::Permanent("scanner failed".to_string())))
                }
            }
        }
    }

    async fn resolve(&mut self) -> Result<(), ScanError> {
        let resolved = self.lookup_region().await;
        match resolved {
            Ok(Some(location)) => {
                debug!(
                    scan_id = self.shared.scan_id,
                    region = %location.region,
                    server = %location.server,
                    "scanning region"
                );
                self.crossing = None;
                self.region_done = false;
                self.cursor.region = Some(location.region);
                self.server = Some(location.server);
                self.set_state(ScanState::Fetching);
                Ok(())
            }
            Ok(None) => {
                self.finish();
                Ok(())
            }
            Err(e) => self.recover(e, None).await,
        }
    }

    async fn lookup_region(&self) -> Result<Option<RegionLocation>, ScanError> {
        let resolver = &self.ctx.resolver;
        let table = &self.cursor.table;
        match self.cursor.direction {
            Direction::Forward => {
                let key = match &self.cursor.position {
                    Bound::Included(k) | Bound::Excluded(k) => k.clone(),
                    Bound::Unbounded => Bytes::new(),
                };
                resolver.resolve(table, &key).await.map(Some)
            }
            Direction::Reverse => {
                if let Some(boundary) = &self.crossing {
                    return resolver.resolve_before(table, boundary).await;
                }
                match &self.cursor.position {
                    Bound::Unbounded => resolver.resolve_last(table).await.map(Some),
                    Bound::Included(k) => resolver.resolve(table, k).await.map(Some),
                    Bound::Excluded(k) if k.is_empty() => Ok(None),
                    Bound::Excluded(k) => resolver.resolve_covering_before(table, k).await.map(Some),
                }
            }
        }
    }

    async fn fetch(&mut self) -> Result<Option<Vec<Row>>, ScanError> {
        let (Some(region), Some(server)) = (self.cursor.region.clone(), self.server.clone()) else {
            self.set_state(ScanState::Resolving);
            return Ok(None);
        };
        let request = ScanRequest {
            region: region.clone(),
            direction: self.cursor.direction,
            from: self.cursor.position.clone(),
            to: self.cursor.stop_bound(),
            batch_size: self.options.batch_size,
            family: self.options.family.clone(),
            qualifier: self.options.qualifier.clone(),
        };

        let batch = match self.ctx.transport.scan(&server, request.clone()).await {
            Ok(batch) => batch,
            Err(e) => {
                let err = ScanError::from_rpc(e, server.as_str(), &region.name());
                self.recover(err, Some(region.as_ref())).await?;
                return Ok(None);
            }
        };

        let received = batch.rows.len();
        let mut rows = Vec::with_capacity(received);
        let mut reached_stop = false;
        for row in batch.rows {
            if !request.follows_cursor(&row.key) {
                continue;
            }
            if !request.precedes_stop(&row.key) {
                reached_stop = true;
                break;
            }
            if !region.contains_key(&row.key) {
                continue;
            }
            if let Some(last) = rows.last().map(|r: &Row| r.key.clone()) {
                if !self.cursor.is_after(&row.key, &last) {
                    continue;
                }
            }
            rows.push(row);
        }
        if rows.len() < received && !reached_stop {
            debug!(
                scan_id = self.shared.scan_id,
                region = %region,
                dropped = received - rows.len(),
                "dropped rows outside the cursor range"
            );
        }

        let region_done = !batch.more || reached_stop;
        if rows.is_empty() && !region_done {
            // Nothing past the cursor yet more to come: the server resumed at
            // the wrong place. Reissuing the request unchanged would spin.
            let err = ScanError::Transient {
                server: server.to_string(),
                reason: format!(
                    "batch of {} rows made no progress past the cursor",
                    received
                ),
            };
            self.recover(err, Some(region.as_ref())).await?;
            return Ok(None);
        }

        self.region_done = region_done;
        if let Some(last) = rows.last() {
            self.cursor.position = Bound::Excluded(last.key.clone());
        }
        self.ctx.retry.on_success(self.request_key());

        if rows.is_empty() {
            self.advance_region();
            return Ok(None);
        }
        self.seq += 1;
        self.set_state(ScanState::Delivering);
        Ok(Some(rows))
    }

    /// Move past the current region, or end the scan if it was the last one
    fn advance_region(&mut self) {
        let Some(region) = self.cursor.region.take() else {
            self.set_state(ScanState::Resolving);
            return;
        };
        self.server = None;
        self.region_done = false;
        if self.cursor.is_final_region(&region) {
            self.finish();
            return;
        }
        match self.cursor.direction {
            Direction::Forward => {
                self.cursor.position = Bound::Included(region.stop_key().clone());
            }
            Direction::Reverse => {
                self.cursor.position = Bound::Excluded(region.start_key().clone());
                self.crossing = Some(region.start_key().clone());
            }
        }
        debug!(
            scan_id = self.shared.scan_id,
            finished = %region,
            "crossing region boundary"
        );
        self.set_state(ScanState::Resolving);
    }

    /// Hand a failure to the retry coordinator and wait out its delay
    async fn recover(&mut self, error: ScanError, region: Option<&RegionInfo>) -> Result<(), ScanError> {
        let key = self.request_key();
        let plan = match self.ctx.retry.on_failure(key, error, region) {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(e)),
        };
        if let Err(e) = self.ctx.retry.wait(&plan).await {
            self.ctx.retry.on_success(key);
            return Err(self.fail(e));
        }
        if plan.action == RetryAction::Reresolve {
            self.cursor.region = None;
            self.server = None;
            self.region_done = false;
            self.set_state(ScanState::Resolving);
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.ctx.retry.on_success(self.request_key());
        self.cursor.region = None;
        self.server = None;
        debug!(scan_id = self.shared.scan_id, "scan exhausted");
        self.set_state(ScanState::Exhausted);
    }

    fn fail(&mut self, error: ScanError) -> ScanError {
        error!(
            scan_id = self.shared.scan_id,
            table = %pretty(&self.cursor.table),
            error = %error,
            "scanner failed"
        );
        self.failure = Some(error.clone());
        self.set_state(ScanState::Failed);
        error
    }
}

/// Caller-facing handle of a scan
///
/// Cloning shares the scan. Calls to `next_batch` are serialized.
#[derive(Clone)]
pub struct ScannerHandle {
    shared: Arc<Shared>,
    session: Arc<AsyncMutex<ScannerSession>>,
}

impl ScannerHandle {
    pub(crate) fn new(
        ctx: ScanContext,
        scan_id: u64,
        cursor: ScanCursor,
        options: ScanOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            scan_id,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            snapshot: parking_lot::Mutex::new(Snapshot {
                state: ScanState::Idle,
                cursor: cursor.clone(),
            }),
            retry: ctx.retry.clone(),
        });
        let session = ScannerSession::new(ctx, shared.clone(), cursor, options);
        Self {
            shared,
            session: Arc::new(AsyncMutex::new(session)),
        }
    }

    pub fn scan_id(&self) -> u64 {
        self.shared.scan_id
    }

    /// Fetch the next batch of rows in scan order
    ///
    /// Returns `Ok(None)` once the scan is exhausted, or if the scanner is
    /// closed while the call is outstanding. Calling it after `close`
    /// returns `ScanClosed`.
    pub async fn next_batch(&self) -> Result<Option<Vec<Row>>, ScanError> {
        if self.is_closed() {
            return Err(ScanError::ScanClosed);
        }

        let closed = self.shared.close_notify.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();
        if self.is_closed() {
            return Ok(None);
        }

        let mut session = tokio::select! {
            biased;
            _ = &mut closed => return Ok(None),
            session = self.session.lock() => session,
        };
        if self.is_closed() {
            return Ok(None);
        }

        let result = tokio::select! {
            biased;
            _ = &mut closed => None,
            result = session.next_batch() => Some(result),
        };
        match result {
            Some(Ok(rows)) if !self.is_closed() => Ok(rows),
            Some(Err(e)) if !self.is_closed() => Err(e),
            _ => {
                // Whatever was in flight is discarded
                self.shared.retry.discard_scan(self.shared.scan_id);
                session.cursor.closed = true;
                let state = session.state;
                session.set_state(state);
                debug!(scan_id = self.shared.scan_id, "discarded result of closed scanner");
                Ok(None)
            }
        }
    }

    /// Close the scanner
    ///
    /// No batch is delivered afterwards, including one already in flight.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.close_notify.notify_waiters();
        let dropped = self.shared.retry.discard_scan(self.shared.scan_id);
        self.shared.snapshot.lock().cursor.closed = true;
        debug!(scan_id = self.shared.scan_id, dropped, "scanner closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Current state of the state machine
    pub fn state(&self) -> ScanState {
        self.shared.snapshot.lock().state
    }

    /// Snapshot of the cursor
    pub fn cursor(&self) -> ScanCursor {
        self.shared.snapshot.lock().cursor.clone()
    }
}
