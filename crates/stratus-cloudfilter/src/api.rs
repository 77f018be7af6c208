//! The seam between the bridge and the OS facility.
//!
//! [`CloudFilterApi`] is implemented by `WindowsCloudFilter` on Windows and
//! by `SimulatedCloudFilter` everywhere. Every method is a single attempt
//! and returns the platform status untouched on failure.

use std::path::Path;
use std::sync::Arc;

use crate::codec::FileIdentity;
use crate::status::PlatformStatus;
use crate::types::{
    CancelFetchInfo, ConnectionKey, FetchDataInfo, FsMetadata, PlaceholderRecord,
    SyncRootRegistration, TransferOperation,
};

pub type PlatformResult<T> = Result<T, PlatformStatus>;

/// Entry points the facility invokes on its own threads.
///
/// Implementations must return promptly and must not retain any borrowed
/// field of the info structs past the call.
pub trait CallbackHandler: Send + Sync {
    fn fetch_data(&self, info: FetchDataInfo<'_>);
    fn cancel_fetch_data(&self, info: CancelFetchInfo<'_>);
}

pub trait CloudFilterApi: Send + Sync {
    /// Upsert the registration for `root`.
    fn register_sync_root(&self, root: &Path, registration: &SyncRootRegistration) -> PlatformResult<()>;

    fn unregister_sync_root(&self, root: &Path) -> PlatformResult<()>;

    /// Install `handler` as the callback table for `root`.
    fn connect_sync_root(&self, root: &Path, handler: Arc<dyn CallbackHandler>) -> PlatformResult<ConnectionKey>;

    fn disconnect_sync_root(&self, connection: ConnectionKey) -> PlatformResult<()>;

    /// Create one placeholder under `parent`.
    fn create_placeholder(&self, parent: &Path, record: &PlaceholderRecord) -> PlatformResult<()>;

    /// Rewrite metadata and identity of an existing placeholder and mark it in sync.
    fn update_placeholder(&self, path: &Path, metadata: &FsMetadata, identity: &FileIdentity) -> PlatformResult<()>;

    /// Evict all local content of `path`.
    fn dehydrate_placeholder(&self, path: &Path) -> PlatformResult<()>;

    fn execute_transfer(&self, operation: &TransferOperation<'_>) -> PlatformResult<()>;
}
