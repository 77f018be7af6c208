//! Hydration dispatcher: the FETCH_DATA / CANCEL_FETCH_DATA entry points.
//!
//! When an application opens a dehydrated placeholder, the Cloud Files
//! minifilter intercepts the I/O and invokes the callback registered for the
//! connection. The dispatcher copies what it needs out of the callback
//! (identity, range, keys) and hands it to the engine through a bounded
//! channel. The callback thread never waits for the engine: if the queue is
//! full or closed, the transfer is failed on the spot.
//!
//! Per-request lifecycle: `Arrived -> Dispatched -> {Answered | Cancelled | Abandoned}`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::api::CallbackHandler;
use crate::codec::FileIdentity;
use crate::status;
use crate::transfer::TransferResponder;
use crate::types::{CancelFetchInfo, ConnectionKey, FetchDataInfo, TransferKey};

/// One fetch callback, owned and detached from OS memory.
#[derive(Debug, Clone)]
pub struct HydrationRequest {
    pub connection: ConnectionKey,
    pub transfer: TransferKey,
    pub identity: FileIdentity,
    pub offset: u64,
    pub length: u64,
    /// Logical size of the file; content past it is never owed
    pub file_size: u64,
    /// Full path of the file being hydrated, when the facility supplies it
    pub path: Option<PathBuf>,
    pub arrived_at: Instant,
}

impl HydrationRequest {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// End of the bytes that must be delivered: the requested range,
    /// clipped to the file size.
    pub fn owed_end(&self) -> u64 {
        self.end().min(self.file_size).max(self.offset)
    }

    pub fn age(&self) -> Duration {
        self.arrived_at.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Arrived,
    Dispatched,
    Answered,
    Cancelled,
    Abandoned,
}

/// Lock-free counters shared by the dispatcher and the worker pool.
#[derive(Debug, Default)]
pub struct HydrationStats {
    arrived: AtomicU64,
    dispatched: AtomicU64,
    rejected: AtomicU64,
    answered: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HydrationStatsSnapshot {
    pub arrived: u64,
    pub dispatched: u64,
    /// Refused at dispatch because the queue was full or closed
    pub rejected: u64,
    /// Answered with data or with a terminal failure
    pub answered: u64,
    /// Subset of `answered` that ended in a failure status
    pub failed: u64,
    pub abandoned: u64,
    pub cancelled: u64,
}

impl HydrationStats {
    pub fn record(&self, state: RequestState) {
        let counter = match state {
            RequestState::Arrived => &self.arrived,
            RequestState::Dispatched => &self.dispatched,
            RequestState::Answered => &self.answered,
            RequestState::Cancelled => &self.cancelled,
            RequestState::Abandoned => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.answered.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HydrationStatsSnapshot {
        HydrationStatsSnapshot {
            arrived: self.arrived.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            answered: self.answered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Callback table installed on a connection.
pub struct HydrationDispatcher {
    tx: mpsc::Sender<HydrationRequest>,
    responder: TransferResponder,
    stats: Arc<HydrationStats>,
}

/// Receiving side of the dispatcher, drained by the engine.
pub struct HydrationFeed {
    rx: mpsc::Receiver<HydrationRequest>,
    stats: Arc<HydrationStats>,
}

/// Build a dispatcher and its feed around a queue of `capacity` requests.
pub fn channel(capacity: usize, responder: TransferResponder) -> (HydrationDispatcher, HydrationFeed) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stats = Arc::new(HydrationStats::default());
    (
        HydrationDispatcher {
            tx,
            responder,
            stats: stats.clone(),
        },
        HydrationFeed { rx, stats },
    )
}

impl HydrationDispatcher {
    pub fn stats(&self) -> Arc<HydrationStats> {
        self.stats.clone()
    }

    fn reject(&self, request: HydrationRequest, reason: &'static str) {
        self.stats.record_rejected();
        debug!(
            connection = %request.connection,
            transfer = %request.transfer,
            reason,
            "hydration request refused at dispatch"
        );
        let outcome = self.responder.fail(
            request.connection,
            request.transfer,
            request.offset,
            status::ERROR_CLOUD_FILE_PROVIDER_NOT_RUNNING,
        );
        match outcome {
            Ok(()) => self.stats.record_failed(),
            Err(e) => {
                self.stats.record(RequestState::Abandoned);
                debug!(error = %e, "failing refused request");
            }
        }
    }
}

impl CallbackHandler for HydrationDispatcher {
    fn fetch_data(&self, info: FetchDataInfo<'_>) {
        self.stats.record(RequestState::Arrived);
        let request = HydrationRequest {
            connection: info.connection,
            transfer: info.transfer,
            identity: FileIdentity::copy_from_slice(info.identity),
            offset: info.offset.max(0) as u64,
            length: info.length.max(0) as u64,
            file_size: info.file_size.max(0) as u64,
            path: info.path.map(PathBuf::from),
            arrived_at: Instant::now(),
        };
        trace!(
            transfer = %request.transfer,
            offset = request.offset,
            length = request.length,
            identity = %request.identity.display_lossy(),
            "fetch data"
        );

        match self.tx.try_send(request) {
            Ok(()) => self.stats.record(RequestState::Dispatched),
            Err(TrySendError::Full(request)) => self.reject(request, "queue full"),
            Err(TrySendError::Closed(request)) => self.reject(request, "engine stopped"),
        }
    }

    fn cancel_fetch_data(&self, info: CancelFetchInfo<'_>) {
        self.stats.record(RequestState::Cancelled);
        debug!(
            connection = %info.connection,
            transfer = %info.transfer,
            offset = info.offset,
            length = info.length,
            "fetch cancelled by the OS"
        );
    }
}

impl HydrationFeed {
    pub async fn recv(&mut self) -> Option<HydrationRequest> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<HydrationRequest> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting new requests; already queued ones stay receivable.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn stats(&self) -> Arc<HydrationStats> {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManager, LiveConnections, SyncRootConnection};
    use crate::registrar::SyncRootRegistrar;
    use crate::sim::SimulatedCloudFilter;
    use crate::status::PlatformStatus;

    struct Rig {
        _dir: tempfile::TempDir,
        sim: Arc<SimulatedCloudFilter>,
        conn: SyncRootConnection,
        dispatcher: Arc<HydrationDispatcher>,
        feed: HydrationFeed,
    }

    fn rig(capacity: usize) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedCloudFilter::new());
        let live = Arc::new(LiveConnections::default());
        SyncRootRegistrar::new(sim.clone())
            .register(dir.path(), "Stratus", "1.0")
            .unwrap();
        let responder = TransferResponder::new(sim.clone(), live.clone());
        let (dispatcher, feed) = channel(capacity, responder);
        let dispatcher = Arc::new(dispatcher);
        let conn = ConnectionManager::new(sim.clone(), live)
            .connect(dir.path(), dispatcher.clone())
            .unwrap();
        Rig {
            _dir: dir,
            sim,
            conn,
            dispatcher,
            feed,
        }
    }

    fn info<'a>(conn: ConnectionKey, transfer: i64, identity: &'a [u8]) -> FetchDataInfo<'a> {
        FetchDataInfo {
            connection: conn,
            transfer: TransferKey(transfer),
            identity,
            offset: 0,
            length: 4096,
            file_size: 4096,
            path: Some("C:\\Stratus\\a.txt"),
        }
    }

    #[test]
    fn identity_is_copied_out_of_the_callback() {
        let mut rig = rig(4);
        {
            let blob = b"id-1".to_vec();
            rig.dispatcher.fetch_data(info(rig.conn.key(), 1, &blob));
        }
        let request = rig.feed.try_recv().unwrap();
        assert_eq!(request.identity.as_bytes(), b"id-1");
        assert_eq!(request.transfer, TransferKey(1));
        assert_eq!(request.connection, rig.conn.key());
        assert_eq!(request.end(), 4096);
        assert_eq!(request.path.as_deref(), Some(std::path::Path::new("C:\\Stratus\\a.txt")));
    }

    #[test]
    fn full_queue_fails_without_blocking() {
        let mut rig = rig(1);
        let key = rig.conn.key();
        let started = Instant::now();
        rig.dispatcher.fetch_data(info(key, 1, b"a"));
        rig.dispatcher.fetch_data(info(key, 2, b"b"));
        assert!(started.elapsed() < Duration::from_secs(1));

        let failures: Vec<(TransferKey, PlatformStatus)> = rig
            .sim
            .transfer_log()
            .into_iter()
            .map(|t| (t.transfer, t.status))
            .collect();
        assert_eq!(
            failures,
            vec![(TransferKey(2), status::ERROR_CLOUD_FILE_PROVIDER_NOT_RUNNING)]
        );

        let stats = rig.dispatcher.stats().snapshot();
        assert_eq!(stats.arrived, 2);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(rig.feed.try_recv().unwrap().transfer, TransferKey(1));
    }

    #[test]
    fn closed_feed_fails_the_transfer() {
        let mut rig = rig(4);
        rig.feed.close();
        rig.dispatcher.fetch_data(info(rig.conn.key(), 9, b"x"));
        let log = rig.sim.transfer_log();
        assert_eq!(log.len(), 1);
        assert!(!log[0].status.is_success());
        assert!(rig.feed.try_recv().is_none());
    }

    #[test]
    fn cancel_is_counted_only() {
        let rig = rig(4);
        rig.dispatcher.cancel_fetch_data(CancelFetchInfo {
            connection: rig.conn.key(),
            transfer: TransferKey(5),
            identity: b"x",
            offset: 0,
            length: 4096,
        });
        assert_eq!(rig.dispatcher.stats().snapshot().cancelled, 1);
        assert!(rig.sim.transfer_log().is_empty());
    }

    #[test]
    fn negative_ranges_clamp_to_zero() {
        let mut rig = rig(4);
        let mut fetch = info(rig.conn.key(), 3, b"x");
        fetch.offset = -1;
        fetch.length = -1;
        rig.dispatcher.fetch_data(fetch);
        let request = rig.feed.try_recv().unwrap();
        assert_eq!((request.offset, request.length), (0, 0));
    }
}
