//! Placeholder management: create, update, and dehydrate CFAPI placeholders.
//!
//! CFAPI placeholders are sparse NTFS files with reparse points that:
//! - Show real file sizes in Explorer (even when dehydrated/cloud-only)
//! - Display cloud status icons
//! - Trigger hydration callbacks when opened
//!
//! Every placeholder is created in sync. Directories are created with
//! on-demand population disabled because the engine enumerates them eagerly.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::CloudFilterApi;
use crate::codec::FileIdentity;
use crate::error::PlaceholderError;
use crate::status;
use crate::types::{FsMetadata, PlaceholderRecord};

#[derive(Clone)]
pub struct PlaceholderManager {
    api: Arc<dyn CloudFilterApi>,
}

impl PlaceholderManager {
    pub fn new(api: Arc<dyn CloudFilterApi>) -> Self {
        PlaceholderManager { api }
    }

    /// Create a placeholder named `name` under `parent`.
    ///
    /// The file appears with its full size but occupies no content space
    /// until it is read, at which point the facility issues a fetch-data
    /// callback carrying `identity`.
    ///
    /// # Errors
    /// - [`PlaceholderError::AlreadyExists`] if `parent/name` exists
    /// - [`PlaceholderError::NotFound`] if `parent` does not exist
    /// - [`PlaceholderError::MetadataRejected`] for an invalid name, an
    ///   oversized identity, or any other OS refusal
    pub fn create(
        &self,
        parent: &Path,
        name: &str,
        identity: &FileIdentity,
        size: u64,
        mtime_unix: i64,
        is_directory: bool,
    ) -> Result<(), PlaceholderError> {
        let full_path = parent.join(name);
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(PlaceholderError::MetadataRejected {
                path: full_path,
                status: status::E_INVALIDARG,
            });
        }
        if !identity.fits_platform_limit() {
            return Err(PlaceholderError::MetadataRejected {
                path: full_path,
                status: status::E_INVALIDARG,
            });
        }
        let size = platform_size(&full_path, size)?;

        debug!(
            path = %full_path.display(),
            size,
            mtime = mtime_unix,
            directory = is_directory,
            identity = %identity.display_lossy(),
            "creating CFAPI placeholder"
        );

        let record = PlaceholderRecord::new(name, identity.clone(), size, mtime_unix, is_directory);
        self.api
            .create_placeholder(parent, &record)
            .map_err(|status| PlaceholderError::classify(full_path, status))
    }

    /// Push new size, timestamps, and identity into an existing placeholder
    /// and mark it in sync. Works whether or not the file is hydrated.
    pub fn update(
        &self,
        path: &Path,
        identity: &FileIdentity,
        size: u64,
        mtime_unix: i64,
    ) -> Result<(), PlaceholderError> {
        if !identity.fits_platform_limit() {
            return Err(PlaceholderError::MetadataRejected {
                path: path.to_path_buf(),
                status: status::E_INVALIDARG,
            });
        }
        let size = platform_size(path, size)?;

        debug!(
            path = %path.display(),
            size,
            mtime = mtime_unix,
            identity = %identity.display_lossy(),
            "updating CFAPI placeholder"
        );

        let metadata = FsMetadata::for_update(size, mtime_unix);
        self.api
            .update_placeholder(path, &metadata, identity)
            .map_err(|status| PlaceholderError::classify(path.to_path_buf(), status))
    }

    /// Dehydrate a file: discard local content, keep the placeholder.
    ///
    /// Opening the file again triggers re-hydration. Dehydrating a file that
    /// holds no content succeeds.
    pub fn dehydrate(&self, path: &Path) -> Result<(), PlaceholderError> {
        info!(path = %path.display(), "dehydrating to placeholder");
        self.api
            .dehydrate_placeholder(path)
            .map_err(|status| PlaceholderError::classify(path.to_path_buf(), status))
    }
}

/// Placeholder sizes are signed 64-bit on the platform.
fn platform_size(path: &Path, size: u64) -> Result<i64, PlaceholderError> {
    i64::try_from(size).map_err(|_| PlaceholderError::MetadataRejected {
        path: path.to_path_buf(),
        status: status::E_INVALIDARG,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::registrar::SyncRootRegistrar;
    use crate::sim::{SimOperation, SimulatedCloudFilter};

    fn setup() -> (tempfile::TempDir, Arc<SimulatedCloudFilter>, PlaceholderManager) {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedCloudFilter::new());
        SyncRootRegistrar::new(sim.clone())
            .register(dir.path(), "Stratus", "1.0")
            .unwrap();
        let manager = PlaceholderManager::new(sim.clone());
        (dir, sim, manager)
    }

    #[test]
    fn create_roundtrips_metadata() {
        let (dir, sim, manager) = setup();
        let id = FileIdentity::from("id-1");
        manager
            .create(dir.path(), "a.txt", &id, 1024, 1_700_000_000, false)
            .unwrap();

        let state = sim.placeholder(&dir.path().join("a.txt")).unwrap();
        assert_eq!(state.identity.as_bytes(), b"id-1");
        assert_eq!(state.metadata.file_size, 1024);
        assert_eq!(codec::filetime_to_unix(state.metadata.last_write_time), 1_700_000_000);
        assert_eq!(state.metadata.creation_time, state.metadata.last_write_time);
        assert_eq!(state.metadata.attributes, codec::FILE_ATTRIBUTE_NORMAL);
        assert!(state.in_sync);
        assert_eq!(state.hydrated_bytes, 0);
    }

    #[test]
    fn directories_disable_on_demand_population() {
        let (dir, sim, manager) = setup();
        manager
            .create(dir.path(), "docs", &FileIdentity::from("d"), 0, 0, true)
            .unwrap();
        let state = sim.placeholder(&dir.path().join("docs")).unwrap();
        assert!(state.metadata.is_directory());
        assert!(!state.on_demand_population);

        manager
            .create(&dir.path().join("docs"), "inner.txt", &FileIdentity::from("i"), 3, 0, false)
            .unwrap();
        assert!(sim.placeholder(&dir.path().join("docs").join("inner.txt")).is_some());
    }

    #[test]
    fn create_distinguishes_failures() {
        let (dir, sim, manager) = setup();
        let id = FileIdentity::from("x");
        manager.create(dir.path(), "a.txt", &id, 1, 0, false).unwrap();

        let exists = manager.create(dir.path(), "a.txt", &id, 1, 0, false).unwrap_err();
        assert!(matches!(exists, PlaceholderError::AlreadyExists { .. }));

        let orphan = manager
            .create(&dir.path().join("missing"), "b.txt", &id, 1, 0, false)
            .unwrap_err();
        assert!(matches!(orphan, PlaceholderError::NotFound { .. }));

        sim.inject_failure(SimOperation::CreatePlaceholder, status::E_OUTOFMEMORY);
        let rejected = manager.create(dir.path(), "c.txt", &id, 1, 0, false).unwrap_err();
        assert!(matches!(rejected, PlaceholderError::MetadataRejected { .. }));
        assert_eq!(rejected.status(), status::E_OUTOFMEMORY);
    }

    #[test]
    fn invalid_names_and_identities_never_reach_the_os() {
        let (dir, sim, manager) = setup();
        let id = FileIdentity::from("x");
        for name in ["", "a/b", "a\\b", ".."] {
            let err = manager.create(dir.path(), name, &id, 1, 0, false).unwrap_err();
            assert!(matches!(err, PlaceholderError::MetadataRejected { .. }), "{name:?}");
        }
        let huge = FileIdentity::from(vec![7u8; codec::MAX_FILE_IDENTITY_LENGTH + 1]);
        let err = manager.create(dir.path(), "big", &huge, 1, 0, false).unwrap_err();
        assert_eq!(err.status(), status::E_INVALIDARG);
        assert!(sim.placeholder(&dir.path().join("big")).is_none());
    }

    #[test]
    fn sizes_beyond_i64_are_rejected_before_the_os() {
        let (dir, sim, manager) = setup();
        let id = FileIdentity::from("x");
        let err = manager
            .create(dir.path(), "huge.bin", &id, u64::MAX, 0, false)
            .unwrap_err();
        assert!(matches!(err, PlaceholderError::MetadataRejected { .. }));
        assert_eq!(err.status(), status::E_INVALIDARG);
        assert!(sim.placeholder(&dir.path().join("huge.bin")).is_none());

        manager.create(dir.path(), "a.txt", &id, 1, 0, false).unwrap();
        let path = dir.path().join("a.txt");
        let err = manager.update(&path, &id, i64::MAX as u64 + 1, 0).unwrap_err();
        assert_eq!(err.status(), status::E_INVALIDARG);
        assert_eq!(sim.placeholder(&path).unwrap().metadata.file_size, 1);
    }

    #[test]
    fn update_rewrites_metadata() {
        let (dir, sim, manager) = setup();
        let path = dir.path().join("a.txt");
        manager
            .create(dir.path(), "a.txt", &FileIdentity::from("v1"), 10, 100, false)
            .unwrap();
        manager.update(&path, &FileIdentity::from("v2"), 20, 200).unwrap();

        let state = sim.placeholder(&path).unwrap();
        assert_eq!(state.identity.as_bytes(), b"v2");
        assert_eq!(state.metadata.file_size, 20);
        assert_eq!(codec::filetime_to_unix(state.metadata.last_write_time), 200);
        assert_eq!(codec::filetime_to_unix(state.metadata.creation_time), 100);
        assert!(state.in_sync);
    }

    #[test]
    fn update_missing_path_is_not_found() {
        let (dir, _sim, manager) = setup();
        let err = manager
            .update(&dir.path().join("gone.txt"), &FileIdentity::from("x"), 1, 1)
            .unwrap_err();
        assert!(matches!(err, PlaceholderError::NotFound { .. }));
    }

    #[test]
    fn update_denied_open() {
        let (dir, sim, manager) = setup();
        let path = dir.path().join("a.txt");
        manager
            .create(dir.path(), "a.txt", &FileIdentity::from("v1"), 10, 100, false)
            .unwrap();
        sim.inject_failure(SimOperation::UpdatePlaceholder, status::ERROR_ACCESS_DENIED);
        let err = manager.update(&path, &FileIdentity::from("v2"), 1, 1).unwrap_err();
        assert!(matches!(err, PlaceholderError::OpenDenied { .. }));
    }

    #[test]
    fn dehydrate_is_idempotent_and_then_update_succeeds() {
        let (dir, sim, manager) = setup();
        let path = dir.path().join("a.txt");
        manager
            .create(dir.path(), "a.txt", &FileIdentity::from("v1"), 4, 100, false)
            .unwrap();
        sim.fill_content(&path, b"abcd").unwrap();
        assert_eq!(sim.placeholder(&path).unwrap().hydrated_bytes, 4);

        manager.dehydrate(&path).unwrap();
        manager.dehydrate(&path).unwrap();
        assert_eq!(sim.placeholder(&path).unwrap().hydrated_bytes, 0);

        manager.update(&path, &FileIdentity::from("v2"), 8, 300).unwrap();
        let state = sim.placeholder(&path).unwrap();
        assert!(state.in_sync);
        assert_eq!(state.metadata.file_size, 8);
        assert_eq!(state.identity.as_bytes(), b"v2");
    }

    #[test]
    fn dehydrate_in_use_file_fails() {
        let (dir, sim, manager) = setup();
        let path = dir.path().join("a.txt");
        manager
            .create(dir.path(), "a.txt", &FileIdentity::from("v1"), 4, 100, false)
            .unwrap();
        sim.set_in_use(&path, true);
        let err = manager.dehydrate(&path).unwrap_err();
        assert!(matches!(err, PlaceholderError::InUse { .. }));
        sim.set_in_use(&path, false);
        manager.dehydrate(&path).unwrap();
    }
}
