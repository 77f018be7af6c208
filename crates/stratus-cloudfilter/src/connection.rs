//! Sync root connections: `CfConnectSyncRoot` / `CfDisconnectSyncRoot`.
//!
//! A connection binds one callback handler to one registered root. Its key
//! correlates every later transfer; once disconnected, the key and every
//! transfer key issued under it are stale.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::api::{CallbackHandler, CloudFilterApi};
use crate::error::ConnectionError;
use crate::types::ConnectionKey;

/// Connection keys this process has opened and closed, shared with the
/// transfer responder for stale-key detection.
///
/// A key the table has never seen is not stale: the facility may raise
/// callbacks on a new connection before `connect` has returned its key.
#[derive(Debug, Default)]
pub struct LiveConnections {
    table: RwLock<ConnectionTable>,
}

#[derive(Debug, Default)]
struct ConnectionTable {
    open: HashMap<ConnectionKey, PathBuf>,
    closed: HashSet<ConnectionKey>,
}

impl LiveConnections {
    pub fn contains(&self, key: ConnectionKey) -> bool {
        self.table
            .read()
            .map(|t| t.open.contains_key(&key))
            .unwrap_or(false)
    }

    /// True once `key` has been disconnected (and not reissued since).
    pub fn is_closed(&self, key: ConnectionKey) -> bool {
        self.table
            .read()
            .map(|t| t.closed.contains(&key))
            .unwrap_or(false)
    }

    pub fn root_of(&self, key: ConnectionKey) -> Option<PathBuf> {
        self.table.read().ok()?.open.get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.read().map(|t| t.open.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: ConnectionKey, root: PathBuf) {
        if let Ok(mut t) = self.table.write() {
            t.closed.remove(&key);
            t.open.insert(key, root);
        }
    }

    fn remove(&self, key: ConnectionKey) -> Option<PathBuf> {
        let mut t = self.table.write().ok()?;
        t.closed.insert(key);
        t.open.remove(&key)
    }
}

#[derive(Clone)]
pub struct ConnectionManager {
    api: Arc<dyn CloudFilterApi>,
    live: Arc<LiveConnections>,
}

impl ConnectionManager {
    pub fn new(api: Arc<dyn CloudFilterApi>, live: Arc<LiveConnections>) -> Self {
        ConnectionManager { api, live }
    }

    /// Connect to a registered root and start receiving callbacks on `handler`.
    ///
    /// # Errors
    /// - [`ConnectionError::NotRegistered`] if `root` has no registration
    /// - [`ConnectionError::AlreadyConnected`] if another connection is open
    /// - [`ConnectionError::Failed`] for anything else (e.g. resource exhaustion)
    pub fn connect(&self, root: &Path, handler: Arc<dyn CallbackHandler>) -> Result<SyncRootConnection, ConnectionError> {
        let key = self
            .api
            .connect_sync_root(root, handler)
            .map_err(|status| ConnectionError::classify(root.to_path_buf(), status))?;

        self.live.insert(key, root.to_path_buf());
        info!(root = %root.display(), connection = %key, "connected Cloud Files sync root");

        Ok(SyncRootConnection {
            key,
            root: root.to_path_buf(),
            api: self.api.clone(),
            live: self.live.clone(),
            open: true,
        })
    }

    /// Best-effort disconnect; never fails from the caller's point of view.
    pub fn disconnect(&self, connection: SyncRootConnection) {
        connection.disconnect();
    }
}

/// Active connection to a registered sync root.
///
/// Dropping this struct disconnects (best-effort) but does not unregister
/// the root; files remain as placeholders.
pub struct SyncRootConnection {
    key: ConnectionKey,
    root: PathBuf,
    api: Arc<dyn CloudFilterApi>,
    live: Arc<LiveConnections>,
    open: bool,
}

impl std::fmt::Debug for SyncRootConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRootConnection")
            .field("key", &self.key)
            .field("root", &self.root)
            .field("open", &self.open)
            .finish()
    }
}

impl SyncRootConnection {
    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop callbacks. Failures are logged, not returned: disconnect runs
    /// during teardown where the caller cannot act on them.
    pub fn disconnect(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.live.remove(self.key);

        match self.api.disconnect_sync_root(self.key) {
            Ok(()) => info!(root = %self.root.display(), connection = %self.key, "disconnected Cloud Files sync root"),
            Err(status) => warn!(
                root = %self.root.display(),
                connection = %self.key,
                %status,
                "disconnect failed (ignored)"
            ),
        }
    }
}

impl Drop for SyncRootConnection {
    fn drop(&mut self) {
        if self.open {
            debug!(connection = %self.key, "connection dropped without explicit disconnect");
            self.close();
        }
    }
}
