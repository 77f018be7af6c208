//! Sync root provider: one handle over a facility and its live connections.
//!
//! Hands out the registrar, connection manager, placeholder manager and
//! transfer responder, all sharing the same facility and the same set of
//! live connection keys (so the responder can tell stale keys apart).

use std::sync::Arc;

use crate::api::CloudFilterApi;
use crate::connection::{ConnectionManager, LiveConnections};
use crate::hydration::{self, HydrationDispatcher, HydrationFeed};
use crate::placeholder::PlaceholderManager;
use crate::registrar::SyncRootRegistrar;
use crate::transfer::TransferResponder;

#[derive(Clone)]
pub struct SyncRootProvider {
    api: Arc<dyn CloudFilterApi>,
    live: Arc<LiveConnections>,
}

impl SyncRootProvider {
    pub fn new(api: Arc<dyn CloudFilterApi>) -> Self {
        SyncRootProvider {
            api,
            live: Arc::new(LiveConnections::default()),
        }
    }

    /// Provider over the OS facility of this machine.
    pub fn native() -> anyhow::Result<Self> {
        Ok(Self::new(native_api()?))
    }

    pub fn api(&self) -> Arc<dyn CloudFilterApi> {
        self.api.clone()
    }

    pub fn live_connections(&self) -> Arc<LiveConnections> {
        self.live.clone()
    }

    pub fn registrar(&self) -> SyncRootRegistrar {
        SyncRootRegistrar::new(self.api.clone())
    }

    pub fn connections(&self) -> ConnectionManager {
        ConnectionManager::new(self.api.clone(), self.live.clone())
    }

    pub fn placeholders(&self) -> PlaceholderManager {
        PlaceholderManager::new(self.api.clone())
    }

    pub fn responder(&self) -> TransferResponder {
        TransferResponder::new(self.api.clone(), self.live.clone())
    }

    /// A dispatcher to install on a connection and the feed it fills.
    pub fn hydration_channel(&self, capacity: usize) -> (HydrationDispatcher, HydrationFeed) {
        hydration::channel(capacity, self.responder())
    }
}

/// The Cloud Files facility of the running OS.
#[cfg(target_os = "windows")]
pub fn native_api() -> anyhow::Result<Arc<dyn CloudFilterApi>> {
    let api = crate::win32::WindowsCloudFilter::new()
        .map_err(|status| anyhow::anyhow!("initializing COM: {status}"))?;
    Ok(Arc::new(api))
}

/// The Cloud Files facility of the running OS.
#[cfg(not(target_os = "windows"))]
pub fn native_api() -> anyhow::Result<Arc<dyn CloudFilterApi>> {
    anyhow::bail!("Cloud Files API is only available on Windows 10 1809+")
}
