//! The real facility: `cldapi.dll` through the `windows` crate.
//!
//! Requires Windows 10 1809+ (build 17763). Every call is a single attempt
//! and its HRESULT is handed back verbatim as a [`PlatformStatus`].

use std::collections::HashMap;
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use windows::core::{GUID, HRESULT, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, NTSTATUS, RPC_E_CHANGED_MODE};
use windows::Win32::Storage::CloudFilters::*;
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_BASIC_INFO, FILE_FLAG_BACKUP_SEMANTICS, FILE_SHARE_READ, OPEN_EXISTING,
};
use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};

use crate::api::{CallbackHandler, CloudFilterApi, PlatformResult};
use crate::codec::{self, FileIdentity};
use crate::status::PlatformStatus;
use crate::types::{
    CancelFetchInfo, ConnectionKey, FetchDataInfo, FsMetadata, HardLinkPolicy, HydrationPolicy,
    InSyncPolicy, PlaceholderRecord, PopulationPolicy, SyncRootRegistration, TransferKey,
    TransferOperation,
};

/// `WRITE_DAC` access right; opening with it is what placeholder updates need.
const WRITE_DAC: u32 = 0x0004_0000;

type HandlerBox = Box<Arc<dyn CallbackHandler>>;

pub struct WindowsCloudFilter {
    /// Callback contexts by connection key, freed after disconnect
    contexts: Mutex<HashMap<i64, usize>>,
}

impl WindowsCloudFilter {
    /// Initialize COM for the multithreaded apartment. A thread already in
    /// another apartment is accepted.
    pub fn new() -> PlatformResult<Self> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr.is_err() && hr != RPC_E_CHANGED_MODE {
            return Err(PlatformStatus(hr.0));
        }
        Ok(WindowsCloudFilter {
            contexts: Mutex::new(HashMap::new()),
        })
    }
}

fn status_of(e: windows::core::Error) -> PlatformStatus {
    PlatformStatus(e.code().0)
}

fn wide_path(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
}

fn blob<'a>(ptr: *const c_void, len: u32) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        return &[];
    }
    // SAFETY: the facility guarantees `len` readable bytes for the callback's duration.
    unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize) }
}

fn identity_ptr(identity: &FileIdentity) -> *const c_void {
    if identity.is_empty() {
        std::ptr::null()
    } else {
        identity.as_bytes().as_ptr().cast()
    }
}

fn basic_info(metadata: &FsMetadata) -> FILE_BASIC_INFO {
    FILE_BASIC_INFO {
        CreationTime: metadata.creation_time,
        LastAccessTime: metadata.last_access_time,
        LastWriteTime: metadata.last_write_time,
        ChangeTime: metadata.change_time,
        FileAttributes: metadata.attributes,
    }
}

fn sync_policies(registration: &SyncRootRegistration) -> CF_SYNC_POLICIES {
    let p = registration.policies;
    let hydration = match p.hydration {
        HydrationPolicy::Partial => CF_HYDRATION_POLICY_PARTIAL,
        HydrationPolicy::Progressive => CF_HYDRATION_POLICY_PROGRESSIVE,
        HydrationPolicy::Full => CF_HYDRATION_POLICY_FULL,
        HydrationPolicy::AlwaysFull => CF_HYDRATION_POLICY_ALWAYS_FULL,
    };
    let population = match p.population {
        PopulationPolicy::Partial => CF_POPULATION_POLICY_PARTIAL,
        PopulationPolicy::Full => CF_POPULATION_POLICY_FULL,
        PopulationPolicy::AlwaysFull => CF_POPULATION_POLICY_ALWAYS_FULL,
    };
    CF_SYNC_POLICIES {
        StructSize: std::mem::size_of::<CF_SYNC_POLICIES>() as u32,
        Hydration: CF_HYDRATION_POLICY {
            Primary: hydration,
            ..Default::default()
        },
        Population: CF_POPULATION_POLICY {
            Primary: population,
            ..Default::default()
        },
        InSync: match p.in_sync {
            InSyncPolicy::TrackAll => CF_INSYNC_POLICY_TRACK_ALL,
            InSyncPolicy::None => CF_INSYNC_POLICY_NONE,
        },
        HardLink: match p.hard_link {
            HardLinkPolicy::None => CF_HARDLINK_POLICY_NONE,
            HardLinkPolicy::Allowed => CF_HARDLINK_POLICY_ALLOWED,
        },
        ..Default::default()
    }
}

/// Open an existing placeholder the way update and dehydrate require.
fn open_placeholder(path: &Path) -> PlatformResult<HANDLE> {
    let wide = wide_path(path);
    unsafe {
        CreateFileW(
            PCWSTR::from_raw(wide.as_ptr()),
            WRITE_DAC,
            FILE_SHARE_READ,
            None,
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
            None,
        )
    }
    .map_err(status_of)
}

fn close(handle: HANDLE) {
    if let Err(e) = unsafe { CloseHandle(handle) } {
        debug!(status = %status_of(e), "CloseHandle failed");
    }
}

/// Recover the handler installed as the connection's callback context.
///
/// # Safety
/// `info` must be a callback info the facility passed to this connection.
unsafe fn handler_of<'a>(info: &'a CF_CALLBACK_INFO) -> Option<&'a Arc<dyn CallbackHandler>> {
    (info.CallbackContext as *const Arc<dyn CallbackHandler>).as_ref()
}

unsafe fn full_path_of(info: &CF_CALLBACK_INFO) -> Option<String> {
    if info.NormalizedPath.is_null() {
        return None;
    }
    let relative = codec::from_wide(info.NormalizedPath.as_wide());
    if info.VolumeDosName.is_null() {
        return Some(relative);
    }
    Some(codec::from_wide(info.VolumeDosName.as_wide()) + &relative)
}

unsafe extern "system" fn on_fetch_data(
    info: *const CF_CALLBACK_INFO,
    params: *const CF_CALLBACK_PARAMETERS,
) {
    let (Some(info), Some(params)) = (info.as_ref(), params.as_ref()) else {
        return;
    };
    let Some(handler) = handler_of(info) else {
        return;
    };
    let fetch = params.Anonymous.FetchData;
    let path = full_path_of(info);
    handler.fetch_data(FetchDataInfo {
        connection: ConnectionKey(info.ConnectionKey.0),
        transfer: TransferKey(info.TransferKey),
        identity: blob(info.FileIdentity, info.FileIdentityLength),
        offset: fetch.RequiredFileOffset,
        length: fetch.RequiredLength,
        file_size: info.FileSize,
        path: path.as_deref(),
    });
}

unsafe extern "system" fn on_cancel_fetch_data(
    info: *const CF_CALLBACK_INFO,
    params: *const CF_CALLBACK_PARAMETERS,
) {
    let (Some(info), Some(params)) = (info.as_ref(), params.as_ref()) else {
        return;
    };
    let Some(handler) = handler_of(info) else {
        return;
    };
    let cancel = params.Anonymous.Cancel.Anonymous.FetchData;
    handler.cancel_fetch_data(CancelFetchInfo {
        connection: ConnectionKey(info.ConnectionKey.0),
        transfer: TransferKey(info.TransferKey),
        identity: blob(info.FileIdentity, info.FileIdentityLength),
        offset: cancel.FileOffset,
        length: cancel.Length,
    });
}

impl CloudFilterApi for WindowsCloudFilter {
    fn register_sync_root(&self, root: &Path, registration: &SyncRootRegistration) -> PlatformResult<()> {
        let root_w = wide_path(root);
        let name_w = codec::to_wide(&registration.provider_name);
        let version_w = codec::to_wide(&registration.provider_version);

        let reg = CF_SYNC_REGISTRATION {
            StructSize: std::mem::size_of::<CF_SYNC_REGISTRATION>() as u32,
            ProviderName: PCWSTR::from_raw(name_w.as_ptr()),
            ProviderVersion: PCWSTR::from_raw(version_w.as_ptr()),
            ProviderId: GUID::from_u128(registration.provider_id.as_u128()),
            ..Default::default()
        };
        let policies = sync_policies(registration);

        unsafe {
            CfRegisterSyncRoot(
                PCWSTR::from_raw(root_w.as_ptr()),
                &reg,
                &policies,
                CF_REGISTER_FLAG_UPDATE,
            )
        }
        .map_err(status_of)
    }

    fn unregister_sync_root(&self, root: &Path) -> PlatformResult<()> {
        let root_w = wide_path(root);
        unsafe { CfUnregisterSyncRoot(PCWSTR::from_raw(root_w.as_ptr())) }.map_err(status_of)
    }

    fn connect_sync_root(&self, root: &Path, handler: Arc<dyn CallbackHandler>) -> PlatformResult<ConnectionKey> {
        let root_w = wide_path(root);
        let table = [
            CF_CALLBACK_REGISTRATION {
                Type: CF_CALLBACK_TYPE_FETCH_DATA,
                Callback: Some(on_fetch_data),
            },
            CF_CALLBACK_REGISTRATION {
                Type: CF_CALLBACK_TYPE_CANCEL_FETCH_DATA,
                Callback: Some(on_cancel_fetch_data),
            },
            CF_CALLBACK_REGISTRATION {
                Type: CF_CALLBACK_TYPE_NONE,
                Callback: None,
            },
        ];

        let context: *mut Arc<dyn CallbackHandler> = Box::into_raw(HandlerBox::new(handler));
        let connected = unsafe {
            CfConnectSyncRoot(
                PCWSTR::from_raw(root_w.as_ptr()),
                table.as_ptr(),
                Some(context as *const c_void),
                CF_CONNECT_FLAG_REQUIRE_PROCESS_INFO | CF_CONNECT_FLAG_REQUIRE_FULL_FILE_PATH,
            )
        };

        match connected {
            Ok(key) => {
                self.contexts
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key.0, context as usize);
                Ok(ConnectionKey(key.0))
            }
            Err(e) => {
                // SAFETY: the facility rejected the connection and holds no copy.
                drop(unsafe { HandlerBox::from_raw(context) });
                Err(status_of(e))
            }
        }
    }

    fn disconnect_sync_root(&self, connection: ConnectionKey) -> PlatformResult<()> {
        unsafe { CfDisconnectSyncRoot(CF_CONNECTION_KEY(connection.0)) }.map_err(status_of)?;

        let context = self
            .contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&connection.0);
        if let Some(context) = context {
            // SAFETY: produced by `Box::into_raw` in connect; no callbacks run after disconnect.
            drop(unsafe { HandlerBox::from_raw(context as *mut Arc<dyn CallbackHandler>) });
        }
        Ok(())
    }

    fn create_placeholder(&self, parent: &Path, record: &PlaceholderRecord) -> PlatformResult<()> {
        let parent_w = wide_path(parent);
        let name_w = codec::to_wide(&record.relative_name);

        let mut flags = CF_PLACEHOLDER_CREATE_FLAG_NONE;
        if record.flags.mark_in_sync {
            flags |= CF_PLACEHOLDER_CREATE_FLAG_MARK_IN_SYNC;
        }
        if record.flags.disable_on_demand_population {
            flags |= CF_PLACEHOLDER_CREATE_FLAG_DISABLE_ON_DEMAND_POPULATION;
        }

        let mut entries = [CF_PLACEHOLDER_CREATE_INFO {
            RelativeFileName: PCWSTR::from_raw(name_w.as_ptr()),
            FsMetadata: CF_FS_METADATA {
                BasicInfo: basic_info(&record.metadata),
                FileSize: record.metadata.file_size,
            },
            FileIdentity: identity_ptr(&record.identity),
            FileIdentityLength: record.identity.len_u32(),
            Flags: flags,
            Result: HRESULT(0),
            ..Default::default()
        }];

        unsafe {
            CfCreatePlaceholders(
                PCWSTR::from_raw(parent_w.as_ptr()),
                &mut entries,
                CF_CREATE_FLAG_NONE,
                None,
            )
        }
        .map_err(status_of)?;

        // The call can succeed while the single entry failed.
        let entry = entries[0].Result;
        if entry.is_err() {
            return Err(PlatformStatus(entry.0));
        }
        Ok(())
    }

    fn update_placeholder(&self, path: &Path, metadata: &FsMetadata, identity: &FileIdentity) -> PlatformResult<()> {
        let handle = open_placeholder(path)?;
        let fs_metadata = CF_FS_METADATA {
            BasicInfo: basic_info(metadata),
            FileSize: metadata.file_size,
        };
        let updated = unsafe {
            CfUpdatePlaceholder(
                handle,
                Some(&fs_metadata),
                Some(identity_ptr(identity)),
                identity.len_u32(),
                None,
                CF_UPDATE_FLAG_MARK_IN_SYNC,
                None,
                None,
            )
        };
        close(handle);
        updated.map_err(status_of)
    }

    fn dehydrate_placeholder(&self, path: &Path) -> PlatformResult<()> {
        let handle = open_placeholder(path)?;
        let dehydrated = unsafe { CfDehydratePlaceholder(handle, 0, -1, CF_DEHYDRATE_FLAG_NONE, None) };
        close(handle);
        dehydrated.map_err(status_of)
    }

    fn execute_transfer(&self, operation: &TransferOperation<'_>) -> PlatformResult<()> {
        let info = CF_OPERATION_INFO {
            StructSize: std::mem::size_of::<CF_OPERATION_INFO>() as u32,
            Type: CF_OPERATION_TYPE_TRANSFER_DATA,
            ConnectionKey: CF_CONNECTION_KEY(operation.connection.0),
            TransferKey: operation.transfer.0,
            ..Default::default()
        };

        let mut params = CF_OPERATION_PARAMETERS::default();
        unsafe {
            let transfer = &mut params.Anonymous.TransferData;
            transfer.CompletionStatus = NTSTATUS(operation.status.0);
            transfer.Buffer = operation
                .buffer
                .map_or(std::ptr::null(), |b| b.as_ptr().cast());
            transfer.Offset = operation.offset;
            transfer.Length = operation.length;
            params.ParamSize = (std::mem::offset_of!(CF_OPERATION_PARAMETERS, Anonymous)
                + std::mem::size_of_val(&params.Anonymous.TransferData)) as u32;

            CfExecute(&info, &mut params)
        }
        .map_err(|e| {
            let status = status_of(e);
            if !status.is_stale_key() {
                warn!(
                    connection = %operation.connection,
                    transfer = %operation.transfer,
                    %status,
                    "CfExecute(TRANSFER_DATA) failed"
                );
            }
            status
        })
    }
}

impl Drop for WindowsCloudFilter {
    fn drop(&mut self) {
        let contexts = std::mem::take(self.contexts.get_mut().unwrap_or_else(|e| e.into_inner()));
        for (key, context) in contexts {
            if unsafe { CfDisconnectSyncRoot(CF_CONNECTION_KEY(key)) }.is_ok() {
                // SAFETY: as in `disconnect_sync_root`.
                drop(unsafe { HandlerBox::from_raw(context as *mut Arc<dyn CallbackHandler>) });
            }
        }
    }
}
