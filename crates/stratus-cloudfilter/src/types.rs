//! Records exchanged with the Cloud Files facility.

use std::fmt;
use std::path::PathBuf;

use crate::codec::{self, FileIdentity};
use crate::status::{self, PlatformStatus};

/// OS-issued handle for a live sync-root connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey(pub i64);

/// OS-issued handle for one outstanding fetch, scoped to its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferKey(pub i64);

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Controls when files are hydrated (downloaded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HydrationPolicy {
    Partial,
    Progressive,
    /// The whole file is hydrated before the opening read completes
    #[default]
    Full,
    AlwaysFull,
}

/// Controls how directory contents are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PopulationPolicy {
    Partial,
    /// The provider populates the namespace eagerly; no fetch-placeholders callbacks
    #[default]
    Full,
    AlwaysFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InSyncPolicy {
    #[default]
    TrackAll,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardLinkPolicy {
    #[default]
    None,
    Allowed,
}

/// Policy set attached to a sync root registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicies {
    pub hydration: HydrationPolicy,
    pub population: PopulationPolicy,
    pub in_sync: InSyncPolicy,
    pub hard_link: HardLinkPolicy,
}

impl SyncPolicies {
    /// The only policy set this provider registers.
    pub const FIXED: SyncPolicies = SyncPolicies {
        hydration: HydrationPolicy::Full,
        population: PopulationPolicy::Full,
        in_sync: InSyncPolicy::TrackAll,
        hard_link: HardLinkPolicy::None,
    };
}

/// Everything `CfRegisterSyncRoot` receives besides the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRootRegistration {
    pub provider_name: String,
    pub provider_version: String,
    pub provider_id: uuid::Uuid,
    pub policies: SyncPolicies,
}

impl SyncRootRegistration {
    pub fn new(display_name: &str, version: &str) -> Self {
        SyncRootRegistration {
            provider_name: display_name.to_string(),
            provider_version: version.to_string(),
            provider_id: codec::PROVIDER_ID,
            policies: SyncPolicies::FIXED,
        }
    }
}

/// Size, timestamps (100-ns since 1601) and attributes of a placeholder.
/// A zero timestamp means "leave unchanged" on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsMetadata {
    pub file_size: i64,
    pub creation_time: i64,
    pub last_access_time: i64,
    pub last_write_time: i64,
    pub change_time: i64,
    pub attributes: u32,
}

impl FsMetadata {
    /// Metadata for a new placeholder: all four times from one mtime.
    pub fn for_create(size: i64, mtime_unix: i64, is_directory: bool) -> Self {
        let t = codec::unix_to_filetime(mtime_unix);
        FsMetadata {
            file_size: if is_directory { 0 } else { size },
            creation_time: t,
            last_access_time: t,
            last_write_time: t,
            change_time: t,
            attributes: if is_directory {
                codec::FILE_ATTRIBUTE_DIRECTORY
            } else {
                codec::FILE_ATTRIBUTE_NORMAL
            },
        }
    }

    /// Metadata pushed on update: write and change time only.
    pub fn for_update(size: i64, mtime_unix: i64) -> Self {
        let t = codec::unix_to_filetime(mtime_unix);
        FsMetadata {
            file_size: size,
            last_write_time: t,
            change_time: t,
            ..Default::default()
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & codec::FILE_ATTRIBUTE_DIRECTORY != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaceholderCreateFlags {
    pub mark_in_sync: bool,
    pub disable_on_demand_population: bool,
}

/// One entry for `CfCreatePlaceholders`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderRecord {
    pub relative_name: String,
    pub identity: FileIdentity,
    pub metadata: FsMetadata,
    pub flags: PlaceholderCreateFlags,
}

impl PlaceholderRecord {
    pub fn new(name: &str, identity: FileIdentity, size: i64, mtime_unix: i64, is_directory: bool) -> Self {
        PlaceholderRecord {
            relative_name: name.to_string(),
            identity,
            metadata: FsMetadata::for_create(size, mtime_unix, is_directory),
            flags: PlaceholderCreateFlags {
                mark_in_sync: true,
                disable_on_demand_population: is_directory,
            },
        }
    }
}

/// A `CF_OPERATION_TYPE_TRANSFER_DATA` request.
#[derive(Debug, Clone, Copy)]
pub struct TransferOperation<'a> {
    pub connection: ConnectionKey,
    pub transfer: TransferKey,
    pub status: PlatformStatus,
    /// `None` on failure
    pub buffer: Option<&'a [u8]>,
    pub offset: i64,
    pub length: i64,
}

impl<'a> TransferOperation<'a> {
    /// A segment never exceeds the chunk size, so its length fits in `i64`.
    pub fn data(connection: ConnectionKey, transfer: TransferKey, buffer: &'a [u8], offset: i64) -> Self {
        TransferOperation {
            connection,
            transfer,
            status: status::SUCCESS,
            buffer: Some(buffer),
            offset,
            length: buffer.len() as i64,
        }
    }

    pub fn failure(connection: ConnectionKey, transfer: TransferKey, offset: i64, status: PlatformStatus) -> Self {
        TransferOperation {
            connection,
            transfer,
            status,
            buffer: None,
            offset,
            length: 0,
        }
    }
}

/// What a fetch-data callback carries. Borrowed fields are valid only for
/// the duration of the callback.
#[derive(Debug, Clone, Copy)]
pub struct FetchDataInfo<'a> {
    pub connection: ConnectionKey,
    pub transfer: TransferKey,
    pub identity: &'a [u8],
    pub offset: i64,
    pub length: i64,
    /// Logical size of the placeholder being hydrated
    pub file_size: i64,
    pub path: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct CancelFetchInfo<'a> {
    pub connection: ConnectionKey,
    pub transfer: TransferKey,
    pub identity: &'a [u8],
    pub offset: i64,
    pub length: i64,
}

/// Snapshot of a placeholder as the facility reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderState {
    pub path: PathBuf,
    pub identity: FileIdentity,
    pub metadata: FsMetadata,
    pub in_sync: bool,
    pub on_demand_population: bool,
    /// Bytes of content present locally
    pub hydrated_bytes: u64,
}

impl PlaceholderState {
    pub fn is_fully_hydrated(&self) -> bool {
        self.hydrated_bytes >= self.metadata.file_size.max(0) as u64
    }
}
