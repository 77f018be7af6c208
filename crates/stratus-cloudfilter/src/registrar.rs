//! Sync root registration: `CfRegisterSyncRoot` / `CfUnregisterSyncRoot`.
//!
//! Registration is persistent OS metadata attached to the directory; it
//! survives process restarts. Re-registering the same path updates it in
//! place, so [`SyncRootRegistrar::register`] is safe to call on every start.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::CloudFilterApi;
use crate::error::RegistrationError;
use crate::types::SyncRootRegistration;

#[derive(Clone)]
pub struct SyncRootRegistrar {
    api: Arc<dyn CloudFilterApi>,
}

impl SyncRootRegistrar {
    pub fn new(api: Arc<dyn CloudFilterApi>) -> Self {
        SyncRootRegistrar { api }
    }

    /// Register (or re-register) `root` with the fixed provider identity and
    /// policy set.
    ///
    /// # Errors
    /// - [`RegistrationError::NotADirectory`] if `root` is not an existing
    ///   absolute directory
    /// - [`RegistrationError::Rejected`] if the OS refuses the registration
    pub fn register(&self, root: &Path, display_name: &str, version: &str) -> Result<(), RegistrationError> {
        if !root.is_absolute() || !root.is_dir() {
            return Err(RegistrationError::NotADirectory {
                path: root.to_path_buf(),
            });
        }

        let registration = SyncRootRegistration::new(display_name, version);
        info!(
            root = %root.display(),
            provider = %registration.provider_name,
            version = %registration.provider_version,
            id = %registration.provider_id,
            "registering Cloud Files sync root"
        );

        self.api
            .register_sync_root(root, &registration)
            .map_err(|status| {
                warn!(root = %root.display(), %status, "sync root registration rejected");
                RegistrationError::Rejected {
                    path: root.to_path_buf(),
                    status,
                }
            })
    }

    /// Remove the registration. Existing placeholders lose their cloud status.
    ///
    /// The caller must disconnect first; the OS refuses to unregister a
    /// connected root.
    pub fn unregister(&self, root: &Path) -> Result<(), RegistrationError> {
        info!(root = %root.display(), "unregistering Cloud Files sync root");
        self.api
            .unregister_sync_root(root)
            .map_err(|status| RegistrationError::UnregisterRejected {
                path: root.to_path_buf(),
                status,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimOperation, SimulatedCloudFilter};
    use crate::status;

    fn setup() -> (tempfile::TempDir, Arc<SimulatedCloudFilter>, SyncRootRegistrar) {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedCloudFilter::new());
        let registrar = SyncRootRegistrar::new(sim.clone());
        (dir, sim, registrar)
    }

    #[test]
    fn register_is_idempotent() {
        let (dir, sim, registrar) = setup();
        registrar.register(dir.path(), "Stratus", "1.0").unwrap();
        let once = sim.registration(dir.path()).unwrap();
        registrar.register(dir.path(), "Stratus", "1.0").unwrap();
        let twice = sim.registration(dir.path()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(sim.registered_roots().len(), 1);
    }

    #[test]
    fn reregister_updates_in_place() {
        let (dir, sim, registrar) = setup();
        registrar.register(dir.path(), "Stratus", "1.0").unwrap();
        registrar.register(dir.path(), "Stratus", "1.1").unwrap();
        assert_eq!(sim.registration(dir.path()).unwrap().provider_version, "1.1");
    }

    #[test]
    fn missing_directory_is_rejected_before_the_os() {
        let (dir, sim, registrar) = setup();
        let missing = dir.path().join("nope");
        let err = registrar.register(&missing, "Stratus", "1.0").unwrap_err();
        assert!(matches!(err, RegistrationError::NotADirectory { .. }));
        assert!(sim.registration(&missing).is_none());
    }

    #[test]
    fn relative_path_is_rejected() {
        let (_dir, _sim, registrar) = setup();
        let err = registrar.register(Path::new("relative/root"), "Stratus", "1.0").unwrap_err();
        assert!(matches!(err, RegistrationError::NotADirectory { .. }));
    }

    #[test]
    fn os_rejection_keeps_status() {
        let (dir, sim, registrar) = setup();
        sim.inject_failure(SimOperation::Register, status::E_INVALIDARG);
        let err = registrar.register(dir.path(), "Stratus", "1.0").unwrap_err();
        assert_eq!(err.status(), Some(status::E_INVALIDARG));
    }

    #[test]
    fn unregister_removes_registration() {
        let (dir, sim, registrar) = setup();
        registrar.register(dir.path(), "Stratus", "1.0").unwrap();
        registrar.unregister(dir.path()).unwrap();
        assert!(sim.registration(dir.path()).is_none());
    }

    #[test]
    fn unregister_unknown_root_fails() {
        let (dir, _sim, registrar) = setup();
        let err = registrar.unregister(dir.path()).unwrap_err();
        assert!(matches!(err, RegistrationError::UnregisterRejected { .. }));
    }
}
