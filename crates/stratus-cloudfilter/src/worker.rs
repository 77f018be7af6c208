//! Hydration worker pool: drains the feed and answers every request.
//!
//! Architecture:
//!   - One receive loop over the [`HydrationFeed`]
//!   - Bounded concurrency via a semaphore (default = CPU count)
//!   - Each task: fetch range from the [`ContentSource`] -> stream segments
//!     back through the [`TransferResponder`] -> or fail the transfer
//!   - Graceful shutdown on broadcast: stop intake, fail whatever is still
//!     queued, wait for in-flight tasks

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, warn};

use stratus_core::config::{StratusConfig, TRANSFER_ALIGNMENT};

use crate::codec::FileIdentity;
use crate::error::TransferError;
use crate::hydration::{HydrationFeed, HydrationRequest, HydrationStats, RequestState};
use crate::status::{self, PlatformStatus};
use crate::transfer::TransferResponder;

/// Where hydrated bytes come from.
///
/// `fetch_range` returns at most `length` bytes starting at `offset`; fewer
/// means end of content.
pub trait ContentSource: Send + Sync + 'static {
    fn fetch_range(
        &self,
        identity: &FileIdentity,
        offset: u64,
        length: u64,
    ) -> impl Future<Output = anyhow::Result<Bytes>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Bytes per transfer call; a multiple of 4096
    pub chunk_size: usize,
    pub fetch_timeout: Duration,
}

impl WorkerConfig {
    pub fn from_config(config: &StratusConfig) -> Self {
        WorkerConfig {
            concurrency: config.worker_count(),
            chunk_size: config.hydration.chunk_size,
            fetch_timeout: Duration::from_secs(config.hydration.fetch_timeout_secs),
        }
    }

    fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        let aligned = self.chunk_size / TRANSFER_ALIGNMENT * TRANSFER_ALIGNMENT;
        self.chunk_size = aligned.max(TRANSFER_ALIGNMENT);
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig::from_config(&StratusConfig::default())
    }
}

pub struct HydrationWorkers<S> {
    source: Arc<S>,
    responder: TransferResponder,
    config: WorkerConfig,
}

impl<S: ContentSource> HydrationWorkers<S> {
    pub fn new(source: Arc<S>, responder: TransferResponder, config: WorkerConfig) -> Self {
        HydrationWorkers {
            source,
            responder,
            config: config.normalized(),
        }
    }

    /// Serve `feed` until it closes or `shutdown` fires.
    pub async fn run(self, mut feed: HydrationFeed, mut shutdown: broadcast::Receiver<()>) {
        let concurrency = self.config.concurrency;
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let stats = feed.stats();
        info!(concurrency, chunk_size = self.config.chunk_size, "hydration workers ready");

        // A permit is taken before a request leaves the queue, so a request
        // is always either queued (and failed by the drain) or in flight.
        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.recv() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                info!("hydration workers: shutdown signal received, draining");
                break;
            };

            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("hydration workers: shutdown signal received, draining");
                    break;
                }
                next = feed.recv() => next,
            };
            let Some(request) = next else {
                info!("hydration feed closed");
                break;
            };

            let source = self.source.clone();
            let responder = self.responder.clone();
            let stats = stats.clone();
            let config = self.config;

            tokio::spawn(async move {
                let _permit = permit; // released when the request is answered
                serve_request(source.as_ref(), &responder, &stats, &config, request).await;
            });
        }

        feed.close();
        let mut refused = 0usize;
        while let Some(request) = feed.try_recv() {
            refused += 1;
            answer_failure(&self.responder, &stats, &request, status::ERROR_CLOUD_FILE_PROVIDER_NOT_RUNNING);
        }
        if refused > 0 {
            info!(refused, "failed queued hydration requests at shutdown");
        }

        let _ = semaphore.acquire_many(concurrency as u32).await;
        info!("hydration workers: all in-flight requests answered");
    }
}

async fn serve_request<S: ContentSource>(
    source: &S,
    responder: &TransferResponder,
    stats: &HydrationStats,
    config: &WorkerConfig,
    request: HydrationRequest,
) -> RequestState {
    let fetch = source.fetch_range(&request.identity, request.offset, request.length);
    let status = match tokio::time::timeout(config.fetch_timeout, fetch).await {
        Ok(Ok(data)) if !data.is_empty() => {
            return stream_data(responder, stats, config, &request, data);
        }
        Ok(Ok(_)) => {
            warn!(
                identity = %request.identity.display_lossy(),
                offset = request.offset,
                "content source returned no bytes"
            );
            status::E_FAIL
        }
        Ok(Err(e)) => {
            warn!(
                identity = %request.identity.display_lossy(),
                offset = request.offset,
                length = request.length,
                error = %e,
                "hydration fetch failed"
            );
            status::E_FAIL
        }
        Err(_) => {
            warn!(
                identity = %request.identity.display_lossy(),
                timeout_secs = config.fetch_timeout.as_secs(),
                "hydration fetch timed out"
            );
            status::STATUS_IO_TIMEOUT
        }
    };
    answer_failure(responder, stats, &request, status)
}

fn stream_data(
    responder: &TransferResponder,
    stats: &HydrationStats,
    config: &WorkerConfig,
    request: &HydrationRequest,
    data: Bytes,
) -> RequestState {
    let len = data.len().min(usize::try_from(request.length).unwrap_or(usize::MAX));
    let mut pos = 0usize;
    while pos < len {
        let end = (pos + config.chunk_size).min(len);
        let offset = request.offset + pos as u64;
        if let Err(e) = responder.complete(request.connection, request.transfer, &data[pos..end], offset) {
            return abandon(stats, request, &e);
        }
        pos = end;
    }

    let delivered_end = request.offset + len as u64;
    if delivered_end < request.owed_end() {
        warn!(
            identity = %request.identity.display_lossy(),
            delivered_end,
            file_size = request.file_size,
            "content ended before the file size, failing the rest"
        );
        return fail_at(responder, stats, request, delivered_end, status::E_FAIL);
    }

    stats.record(RequestState::Answered);
    debug!(
        transfer = %request.transfer,
        offset = request.offset,
        bytes = len,
        elapsed_ms = request.age().as_millis() as u64,
        "hydration answered"
    );
    RequestState::Answered
}

fn answer_failure(
    responder: &TransferResponder,
    stats: &HydrationStats,
    request: &HydrationRequest,
    status: PlatformStatus,
) -> RequestState {
    fail_at(responder, stats, request, request.offset, status)
}

fn fail_at(
    responder: &TransferResponder,
    stats: &HydrationStats,
    request: &HydrationRequest,
    offset: u64,
    status: PlatformStatus,
) -> RequestState {
    match responder.fail(request.connection, request.transfer, offset, status) {
        Ok(()) => {
            stats.record_failed();
            RequestState::Answered
        }
        Err(e) => abandon(stats, request, &e),
    }
}

fn abandon(stats: &HydrationStats, request: &HydrationRequest, error: &TransferError) -> RequestState {
    stats.record(RequestState::Abandoned);
    if error.is_stale() {
        debug!(transfer = %request.transfer, "late answer for a stale transfer dropped");
    } else {
        warn!(transfer = %request.transfer, error = %error, "transfer rejected, request abandoned");
    }
    RequestState::Abandoned
}
