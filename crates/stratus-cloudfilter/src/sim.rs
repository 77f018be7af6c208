//! In-memory model of the Cloud Files facility.
//!
//! Runs everywhere and backs the test suites. It keeps registrations,
//! connections, placeholder records and per-transfer state, and reproduces
//! the behaviors the bridge depends on:
//! - application reads of dehydrated files raise FETCH_DATA on a separate
//!   thread and block until the transfer completes, fails, or times out
//!   (a timeout raises CANCEL_FETCH_DATA)
//! - hydration is whole-file: received segments are committed only when the
//!   full range has arrived, so a failed transfer leaves no partial content
//! - disconnect fails every pending transfer on the connection
//! - one-shot fault injection per operation

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::trace;

use crate::api::{CallbackHandler, CloudFilterApi, PlatformResult};
use crate::codec::FileIdentity;
use crate::status::{self, PlatformStatus};
use crate::types::{
    CancelFetchInfo, ConnectionKey, FetchDataInfo, FsMetadata, PlaceholderRecord,
    PlaceholderState, SyncRootRegistration, TransferKey, TransferOperation,
};

/// Operations that accept an injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOperation {
    Register,
    Unregister,
    Connect,
    Disconnect,
    CreatePlaceholder,
    UpdatePlaceholder,
    Dehydrate,
    Transfer,
}

/// One `execute_transfer` call as the facility saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub connection: ConnectionKey,
    pub transfer: TransferKey,
    pub status: PlatformStatus,
    pub offset: i64,
    pub length: i64,
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferPhase {
    Pending,
    Completed,
    Failed(PlatformStatus),
}

struct PendingTransfer {
    connection: ConnectionKey,
    path: PathBuf,
    offset: u64,
    length: u64,
    buffer: Vec<u8>,
    /// Merged, sorted `[start, end)` ranges relative to `offset`
    received: Vec<(u64, u64)>,
    phase: TransferPhase,
}

impl PendingTransfer {
    fn receive(&mut self, start: u64, data: &[u8]) {
        let end = start + data.len() as u64;
        self.buffer[start as usize..end as usize].copy_from_slice(data);

        self.received.push((start, end));
        self.received.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.received.len());
        for &(s, e) in &self.received {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.received = merged;
    }

    fn is_complete(&self) -> bool {
        self.length == 0 || self.received.first() == Some(&(0, self.length))
    }
}

struct SimConnection {
    root: PathBuf,
    handler: Arc<dyn CallbackHandler>,
}

struct SimPlaceholder {
    identity: FileIdentity,
    metadata: FsMetadata,
    in_sync: bool,
    on_demand_population: bool,
    content: Option<Vec<u8>>,
    in_use: bool,
}

#[derive(Default)]
struct SimState {
    registrations: BTreeMap<PathBuf, SyncRootRegistration>,
    connections: HashMap<ConnectionKey, SimConnection>,
    placeholders: BTreeMap<PathBuf, SimPlaceholder>,
    transfers: HashMap<TransferKey, PendingTransfer>,
    faults: HashMap<SimOperation, PlatformStatus>,
    log: Vec<TransferRecord>,
    next_connection: i64,
    next_transfer: i64,
}

impl SimState {
    fn take_fault(&mut self, op: SimOperation) -> PlatformResult<()> {
        match self.faults.remove(&op) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn root_of(&self, path: &Path) -> Option<&PathBuf> {
        self.registrations.keys().find(|root| path.starts_with(root))
    }

    fn connection_for(&self, path: &Path) -> Option<(ConnectionKey, Arc<dyn CallbackHandler>)> {
        self.connections
            .iter()
            .find(|(_, c)| path.starts_with(&c.root))
            .map(|(key, c)| (*key, c.handler.clone()))
    }

    fn start_transfer(&mut self, connection: ConnectionKey, path: &Path, length: u64) -> TransferKey {
        self.next_transfer += 1;
        let key = TransferKey(self.next_transfer);
        self.transfers.insert(
            key,
            PendingTransfer {
                connection,
                path: path.to_path_buf(),
                offset: 0,
                length,
                buffer: vec![0; length as usize],
                received: Vec::new(),
                phase: TransferPhase::Pending,
            },
        );
        key
    }

    fn apply_transfer(&mut self, op: &TransferOperation<'_>) -> PlatformResult<()> {
        if !self.connections.contains_key(&op.connection) {
            return Err(status::ERROR_CLOUD_FILE_PROVIDER_NOT_RUNNING);
        }
        let transfer = match self.transfers.get_mut(&op.transfer) {
            Some(t) if t.connection == op.connection && t.phase == TransferPhase::Pending => t,
            _ => return Err(status::ERROR_CLOUD_FILE_INVALID_REQUEST),
        };

        if !op.status.is_success() {
            transfer.phase = TransferPhase::Failed(op.status);
            transfer.buffer.clear();
            return Ok(());
        }

        let data = op.buffer.ok_or(status::E_INVALIDARG)?;
        if op.offset < 0 || op.length != data.len() as i64 {
            return Err(status::E_INVALIDARG);
        }
        let offset = op.offset as u64;
        let end = offset + data.len() as u64;
        if offset < transfer.offset || end > transfer.offset + transfer.length {
            return Err(status::E_INVALIDARG);
        }
        transfer.receive(offset - transfer.offset, data);

        if transfer.is_complete() {
            transfer.phase = TransferPhase::Completed;
            let content = std::mem::take(&mut transfer.buffer);
            let path = transfer.path.clone();
            if let Some(placeholder) = self.placeholders.get_mut(&path) {
                placeholder.content = Some(content);
            }
        }
        Ok(())
    }
}

/// In-memory stand-in for the OS facility.
pub struct SimulatedCloudFilter {
    state: Mutex<SimState>,
    progress: Condvar,
}

impl SimulatedCloudFilter {
    pub fn new() -> Self {
        SimulatedCloudFilter {
            state: Mutex::new(SimState {
                next_connection: 0x1000,
                ..Default::default()
            }),
            progress: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// Make the next call of `op` fail with `status`.
    pub fn inject_failure(&self, op: SimOperation, status: PlatformStatus) {
        self.lock().faults.insert(op, status);
    }

    pub fn registration(&self, root: &Path) -> Option<SyncRootRegistration> {
        self.lock().registrations.get(root).cloned()
    }

    pub fn registered_roots(&self) -> Vec<PathBuf> {
        self.lock().registrations.keys().cloned().collect()
    }

    pub fn is_connected(&self, root: &Path) -> bool {
        self.lock().connections.values().any(|c| c.root == root)
    }

    pub fn placeholder(&self, path: &Path) -> Option<PlaceholderState> {
        let state = self.lock();
        let p = state.placeholders.get(path)?;
        Some(PlaceholderState {
            path: path.to_path_buf(),
            identity: p.identity.clone(),
            metadata: p.metadata,
            in_sync: p.in_sync,
            on_demand_population: p.on_demand_population,
            hydrated_bytes: p.content.as_ref().map_or(0, |c| c.len() as u64),
        })
    }

    /// Paths of every placeholder, in order.
    pub fn placeholder_paths(&self) -> Vec<PathBuf> {
        self.lock().placeholders.keys().cloned().collect()
    }

    /// Mark a file as open by an application, blocking eviction.
    pub fn set_in_use(&self, path: &Path, in_use: bool) {
        if let Some(p) = self.lock().placeholders.get_mut(path) {
            p.in_use = in_use;
        }
    }

    /// Store content locally as if the file had been hydrated.
    pub fn fill_content(&self, path: &Path, data: &[u8]) -> PlatformResult<()> {
        let mut state = self.lock();
        let p = state
            .placeholders
            .get_mut(path)
            .ok_or(status::ERROR_FILE_NOT_FOUND)?;
        if p.metadata.is_directory() {
            return Err(status::ERROR_DIRECTORY);
        }
        p.content = Some(data.to_vec());
        Ok(())
    }

    pub fn transfer_log(&self) -> Vec<TransferRecord> {
        self.lock().log.clone()
    }

    pub fn pending_transfers(&self) -> usize {
        self.lock()
            .transfers
            .values()
            .filter(|t| t.phase == TransferPhase::Pending)
            .count()
    }

    /// Open a whole-file transfer for `path` without raising a callback.
    /// Returns the keys and the required length.
    pub fn open_transfer(&self, path: &Path) -> PlatformResult<(ConnectionKey, TransferKey, u64)> {
        let mut state = self.lock();
        let size = match state.placeholders.get(path) {
            Some(p) if !p.metadata.is_directory() => p.metadata.file_size.max(0) as u64,
            Some(_) => return Err(status::ERROR_DIRECTORY),
            None => return Err(status::ERROR_FILE_NOT_FOUND),
        };
        let (connection, _) = state
            .connection_for(path)
            .ok_or(status::ERROR_CLOUD_FILE_PROVIDER_NOT_RUNNING)?;
        let transfer = state.start_transfer(connection, path, size);
        Ok((connection, transfer, size))
    }

    /// An application read of `[offset, offset + length)`.
    ///
    /// Dehydrated files are hydrated in full first: the fetch callback runs
    /// on its own thread while this call waits up to `timeout`.
    pub fn read(&self, path: &Path, offset: u64, length: u64, timeout: Duration) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        let (size, identity) = match state.placeholders.get(path) {
            None => return Err(io::Error::new(io::ErrorKind::NotFound, path.display().to_string())),
            Some(p) if p.metadata.is_directory() => {
                return Err(io::Error::other(format!("{} is a directory", path.display())));
            }
            Some(p) => {
                if let Some(content) = &p.content {
                    return Ok(slice(content, offset, length));
                }
                (p.metadata.file_size.max(0) as u64, p.identity.clone())
            }
        };

        let joined = state
            .transfers
            .iter()
            .find(|(_, t)| t.path == path && t.phase == TransferPhase::Pending)
            .map(|(key, t)| (*key, t.connection));
        let (transfer, connection) = match joined {
            Some(existing) => existing,
            None => {
                let (connection, handler) = state.connection_for(path).ok_or_else(|| {
                    io::Error::other(format!(
                        "{}: {}",
                        path.display(),
                        status::ERROR_CLOUD_FILE_PROVIDER_NOT_RUNNING
                    ))
                })?;
                let transfer = state.start_transfer(connection, path, size);
                let full_path = path.display().to_string();
                let identity = identity.clone();
                trace!(%connection, %transfer, path = %full_path, "raising FETCH_DATA");
                std::thread::spawn(move || {
                    handler.fetch_data(FetchDataInfo {
                        connection,
                        transfer,
                        identity: identity.as_bytes(),
                        offset: 0,
                        length: size as i64,
                        file_size: size as i64,
                        path: Some(full_path.as_str()),
                    });
                });
                (transfer, connection)
            }
        };

        loop {
            let phase = state.transfers.get(&transfer).map(|t| t.phase);
            match phase {
                Some(TransferPhase::Completed) => {
                    return match state.placeholders.get(path).and_then(|p| p.content.as_ref()) {
                        Some(content) => Ok(slice(content, offset, length)),
                        None => Err(io::Error::other(format!("{} was evicted", path.display()))),
                    };
                }
                Some(TransferPhase::Failed(status)) => {
                    return Err(io::Error::other(format!(
                        "hydrating {} failed: {status}",
                        path.display()
                    )));
                }
                None => return Err(io::Error::other("transfer cancelled")),
                Some(TransferPhase::Pending) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                state.transfers.remove(&transfer);
                let handler = state.connections.get(&connection).map(|c| c.handler.clone());
                drop(state);
                if let Some(handler) = handler {
                    handler.cancel_fetch_data(CancelFetchInfo {
                        connection,
                        transfer,
                        identity: identity.as_bytes(),
                        offset: 0,
                        length: size as i64,
                    });
                }
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("hydrating {} timed out", path.display()),
                ));
            }
            state = self.progress.wait_timeout(state, deadline - now).unwrap().0;
        }
    }
}

impl Default for SimulatedCloudFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn slice(content: &[u8], offset: u64, length: u64) -> Vec<u8> {
    let start = (offset as usize).min(content.len());
    let end = (offset.saturating_add(length) as usize).min(content.len());
    content[start..end].to_vec()
}

impl CloudFilterApi for SimulatedCloudFilter {
    fn register_sync_root(&self, root: &Path, registration: &SyncRootRegistration) -> PlatformResult<()> {
        let mut state = self.lock();
        state.take_fault(SimOperation::Register)?;
        state
            .registrations
            .insert(root.to_path_buf(), registration.clone());
        Ok(())
    }

    fn unregister_sync_root(&self, root: &Path) -> PlatformResult<()> {
        let mut state = self.lock();
        state.take_fault(SimOperation::Unregister)?;
        if !state.registrations.contains_key(root) {
            return Err(status::ERROR_NOT_FOUND);
        }
        if state.connections.values().any(|c| c.root == root) {
            return Err(status::ERROR_CLOUD_FILE_IN_USE);
        }
        state.registrations.remove(root);
        state.placeholders.retain(|path, _| !path.starts_with(root));
        Ok(())
    }

    fn connect_sync_root(&self, root: &Path, handler: Arc<dyn CallbackHandler>) -> PlatformResult<ConnectionKey> {
        let mut state = self.lock();
        state.take_fault(SimOperation::Connect)?;
        if !state.registrations.contains_key(root) {
            return Err(status::ERROR_NOT_FOUND);
        }
        if state.connections.values().any(|c| c.root == root) {
            return Err(status::ERROR_CLOUD_FILE_ALREADY_CONNECTED);
        }
        state.next_connection += 1;
        let key = ConnectionKey(state.next_connection);
        state.connections.insert(
            key,
            SimConnection {
                root: root.to_path_buf(),
                handler,
            },
        );
        Ok(key)
    }

    fn disconnect_sync_root(&self, connection: ConnectionKey) -> PlatformResult<()> {
        let mut state = self.lock();
        state.take_fault(SimOperation::Disconnect)?;
        if state.connections.remove(&connection).is_none() {
            return Err(status::ERROR_NOT_FOUND);
        }
        for transfer in state.transfers.values_mut() {
            if transfer.connection == connection && transfer.phase == TransferPhase::Pending {
                transfer.phase = TransferPhase::Failed(status::ERROR_CLOUD_FILE_PROVIDER_NOT_RUNNING);
                transfer.buffer.clear();
            }
        }
        drop(state);
        self.progress.notify_all();
        Ok(())
    }

    fn create_placeholder(&self, parent: &Path, record: &PlaceholderRecord) -> PlatformResult<()> {
        let mut state = self.lock();
        state.take_fault(SimOperation::CreatePlaceholder)?;
        let Some(root) = state.root_of(parent) else {
            return Err(status::ERROR_NOT_A_CLOUD_FILE);
        };
        let parent_exists = root == parent
            || state
                .placeholders
                .get(parent)
                .is_some_and(|p| p.metadata.is_directory());
        if !parent_exists {
            return Err(status::ERROR_PATH_NOT_FOUND);
        }
        if !record.identity.fits_platform_limit() {
            return Err(status::E_INVALIDARG);
        }
        let path = parent.join(&record.relative_name);
        if state.placeholders.contains_key(&path) {
            return Err(status::ERROR_ALREADY_EXISTS);
        }
        state.placeholders.insert(
            path,
            SimPlaceholder {
                identity: record.identity.clone(),
                metadata: record.metadata,
                in_sync: record.flags.mark_in_sync,
                on_demand_population: !record.flags.disable_on_demand_population,
                content: None,
                in_use: false,
            },
        );
        Ok(())
    }

    fn update_placeholder(&self, path: &Path, metadata: &FsMetadata, identity: &FileIdentity) -> PlatformResult<()> {
        let mut state = self.lock();
        state.take_fault(SimOperation::UpdatePlaceholder)?;
        let p = state
            .placeholders
            .get_mut(path)
            .ok_or(status::ERROR_FILE_NOT_FOUND)?;

        // Zero fields leave the current value in place.
        let current = &mut p.metadata;
        current.file_size = metadata.file_size;
        for (field, new) in [
            (&mut current.creation_time, metadata.creation_time),
            (&mut current.last_access_time, metadata.last_access_time),
            (&mut current.last_write_time, metadata.last_write_time),
            (&mut current.change_time, metadata.change_time),
        ] {
            if new != 0 {
                *field = new;
            }
        }
        if metadata.attributes != 0 {
            current.attributes = metadata.attributes;
        }
        p.identity = identity.clone();
        p.in_sync = true;
        Ok(())
    }

    fn dehydrate_placeholder(&self, path: &Path) -> PlatformResult<()> {
        let mut state = self.lock();
        state.take_fault(SimOperation::Dehydrate)?;
        let p = state
            .placeholders
            .get_mut(path)
            .ok_or(status::ERROR_FILE_NOT_FOUND)?;
        if p.metadata.is_directory() {
            return Err(status::ERROR_DIRECTORY);
        }
        if p.in_use {
            return Err(status::ERROR_CLOUD_FILE_IN_USE);
        }
        p.content = None;
        Ok(())
    }

    fn execute_transfer(&self, operation: &TransferOperation<'_>) -> PlatformResult<()> {
        let mut state = self.lock();
        let outcome = state
            .take_fault(SimOperation::Transfer)
            .and_then(|()| state.apply_transfer(operation));
        state.log.push(TransferRecord {
            connection: operation.connection,
            transfer: operation.transfer,
            status: operation.status,
            offset: operation.offset,
            length: operation.length,
            accepted: outcome.is_ok(),
        });
        drop(state);
        self.progress.notify_all();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl CallbackHandler for Silent {
        fn fetch_data(&self, _info: FetchDataInfo<'_>) {}
        fn cancel_fetch_data(&self, _info: CancelFetchInfo<'_>) {}
    }

    fn connected_root() -> (tempfile::TempDir, SimulatedCloudFilter, ConnectionKey) {
        let dir = tempfile::tempdir().unwrap();
        let sim = SimulatedCloudFilter::new();
        sim.register_sync_root(dir.path(), &SyncRootRegistration::new("Stratus", "1"))
            .unwrap();
        let key = sim.connect_sync_root(dir.path(), Arc::new(Silent)).unwrap();
        sim.create_placeholder(
            dir.path(),
            &PlaceholderRecord::new("f", FileIdentity::from("f"), 8192, 0, false),
        )
        .unwrap();
        (dir, sim, key)
    }

    #[test]
    fn segments_commit_only_when_complete() {
        let (dir, sim, _key) = connected_root();
        let path = dir.path().join("f");
        let (conn, transfer, len) = sim.open_transfer(&path).unwrap();
        assert_eq!(len, 8192);

        let half = vec![1u8; 4096];
        sim.execute_transfer(&TransferOperation::data(conn, transfer, &half, 4096))
            .unwrap();
        assert_eq!(sim.placeholder(&path).unwrap().hydrated_bytes, 0);
        sim.execute_transfer(&TransferOperation::data(conn, transfer, &half, 0))
            .unwrap();
        assert!(sim.placeholder(&path).unwrap().is_fully_hydrated());

        let late = sim.execute_transfer(&TransferOperation::data(conn, transfer, &half, 0));
        assert_eq!(late, Err(status::ERROR_CLOUD_FILE_INVALID_REQUEST));
    }

    #[test]
    fn out_of_range_segment_is_rejected() {
        let (dir, sim, _key) = connected_root();
        let (conn, transfer, _) = sim.open_transfer(&dir.path().join("f")).unwrap();
        let too_far = vec![0u8; 4096];
        let err = sim
            .execute_transfer(&TransferOperation::data(conn, transfer, &too_far, 8000))
            .unwrap_err();
        assert_eq!(err, status::E_INVALIDARG);
        assert!(!sim.transfer_log()[0].accepted);
    }

    #[test]
    fn disconnect_fails_pending_transfers() {
        let (dir, sim, key) = connected_root();
        let (conn, transfer, _) = sim.open_transfer(&dir.path().join("f")).unwrap();
        sim.disconnect_sync_root(key).unwrap();
        assert_eq!(sim.pending_transfers(), 0);
        let err = sim
            .execute_transfer(&TransferOperation::data(conn, transfer, &[0; 16], 0))
            .unwrap_err();
        assert!(err.is_stale_key());
    }

    #[test]
    fn unregister_refused_while_connected() {
        let (dir, sim, key) = connected_root();
        assert_eq!(
            sim.unregister_sync_root(dir.path()),
            Err(status::ERROR_CLOUD_FILE_IN_USE)
        );
        sim.disconnect_sync_root(key).unwrap();
        sim.unregister_sync_root(dir.path()).unwrap();
        assert!(sim.placeholder_paths().is_empty());
    }

    #[test]
    fn read_times_out_when_nobody_answers() {
        let (dir, sim, _key) = connected_root();
        let err = sim
            .read(&dir.path().join("f"), 0, 10, Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(sim.pending_transfers(), 0);
    }

    #[test]
    fn hydrated_reads_skip_the_provider() {
        let (dir, sim, _key) = connected_root();
        let path = dir.path().join("f");
        sim.fill_content(&path, b"0123456789").unwrap();
        assert_eq!(sim.read(&path, 2, 3, Duration::ZERO).unwrap(), b"234");
        assert!(sim.transfer_log().is_empty());
    }

    #[test]
    fn faults_fire_once() {
        let (dir, sim, _key) = connected_root();
        sim.inject_failure(SimOperation::Dehydrate, status::E_FAIL);
        let path = dir.path().join("f");
        assert_eq!(sim.dehydrate_placeholder(&path), Err(status::E_FAIL));
        sim.dehydrate_placeholder(&path).unwrap();
    }
}
