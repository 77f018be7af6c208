//! Typed failures for every bridge operation.
//!
//! Each variant keeps the platform status verbatim so the engine can log
//! root causes that originate below the bridge.

use std::path::PathBuf;
use thiserror::Error;

use crate::status::{self, PlatformStatus};
use crate::types::{ConnectionKey, TransferKey};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("sync root {path} is not a local directory")]
    NotADirectory { path: PathBuf },

    #[error("registering sync root {path}: {status}")]
    Rejected { path: PathBuf, status: PlatformStatus },

    #[error("unregistering sync root {path}: {status}")]
    UnregisterRejected { path: PathBuf, status: PlatformStatus },
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("sync root {path} is not registered ({status})")]
    NotRegistered { path: PathBuf, status: PlatformStatus },

    #[error("sync root {path} is already connected ({status})")]
    AlreadyConnected { path: PathBuf, status: PlatformStatus },

    #[error("connecting sync root {path}: {status}")]
    Failed { path: PathBuf, status: PlatformStatus },
}

#[derive(Debug, Error)]
pub enum PlaceholderError {
    #[error("{path} not found ({status})")]
    NotFound { path: PathBuf, status: PlatformStatus },

    #[error("{path} already exists ({status})")]
    AlreadyExists { path: PathBuf, status: PlatformStatus },

    #[error("opening {path} denied ({status})")]
    OpenDenied { path: PathBuf, status: PlatformStatus },

    #[error("{path} is in use and cannot be evicted ({status})")]
    InUse { path: PathBuf, status: PlatformStatus },

    #[error("placeholder metadata for {path} rejected ({status})")]
    MetadataRejected { path: PathBuf, status: PlatformStatus },
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer {transfer} on connection {connection} is stale")]
    StaleKey {
        connection: ConnectionKey,
        transfer: TransferKey,
        status: Option<PlatformStatus>,
    },

    #[error("transfer {transfer} on connection {connection} rejected ({status})")]
    Rejected {
        connection: ConnectionKey,
        transfer: TransferKey,
        status: PlatformStatus,
    },
}

/// Umbrella error for callers that handle every bridge failure alike.
#[derive(Debug, Error)]
pub enum CloudFilterError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Placeholder(#[from] PlaceholderError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl RegistrationError {
    pub fn status(&self) -> Option<PlatformStatus> {
        match self {
            RegistrationError::NotADirectory { .. } => None,
            RegistrationError::Rejected { status, .. }
            | RegistrationError::UnregisterRejected { status, .. } => Some(*status),
        }
    }
}

impl ConnectionError {
    pub(crate) fn classify(path: PathBuf, status: PlatformStatus) -> Self {
        match status {
            status::ERROR_NOT_FOUND
            | status::ERROR_NOT_A_CLOUD_FILE
            | status::ERROR_FILE_NOT_FOUND
            | status::ERROR_PATH_NOT_FOUND => ConnectionError::NotRegistered { path, status },
            status::ERROR_CLOUD_FILE_ALREADY_CONNECTED => {
                ConnectionError::AlreadyConnected { path, status }
            }
            _ => ConnectionError::Failed { path, status },
        }
    }

    pub fn status(&self) -> PlatformStatus {
        match self {
            ConnectionError::NotRegistered { status, .. }
            | ConnectionError::AlreadyConnected { status, .. }
            | ConnectionError::Failed { status, .. } => *status,
        }
    }
}

impl PlaceholderError {
    pub(crate) fn classify(path: PathBuf, status: PlatformStatus) -> Self {
        match status {
            status::ERROR_FILE_NOT_FOUND
            | status::ERROR_PATH_NOT_FOUND
            | status::ERROR_NOT_A_CLOUD_FILE => PlaceholderError::NotFound { path, status },
            status::ERROR_ALREADY_EXISTS => PlaceholderError::AlreadyExists { path, status },
            status::ERROR_ACCESS_DENIED => PlaceholderError::OpenDenied { path, status },
            status::ERROR_CLOUD_FILE_IN_USE | status::ERROR_SHARING_VIOLATION => {
                PlaceholderError::InUse { path, status }
            }
            _ => PlaceholderError::MetadataRejected { path, status },
        }
    }

    pub fn status(&self) -> PlatformStatus {
        match self {
            PlaceholderError::NotFound { status, .. }
            | PlaceholderError::AlreadyExists { status, .. }
            | PlaceholderError::OpenDenied { status, .. }
            | PlaceholderError::InUse { status, .. }
            | PlaceholderError::MetadataRejected { status, .. } => *status,
        }
    }
}

impl TransferError {
    pub fn is_stale(&self) -> bool {
        matches!(self, TransferError::StaleKey { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_statuses_classify() {
        let p = PathBuf::from("x");
        assert!(matches!(
            PlaceholderError::classify(p.clone(), status::ERROR_ALREADY_EXISTS),
            PlaceholderError::AlreadyExists { .. }
        ));
        assert!(matches!(
            PlaceholderError::classify(p.clone(), status::ERROR_PATH_NOT_FOUND),
            PlaceholderError::NotFound { .. }
        ));
        assert!(matches!(
            PlaceholderError::classify(p.clone(), status::ERROR_ACCESS_DENIED),
            PlaceholderError::OpenDenied { .. }
        ));
        let other = PlaceholderError::classify(p, status::E_INVALIDARG);
        assert!(matches!(other, PlaceholderError::MetadataRejected { .. }));
        assert_eq!(other.status(), status::E_INVALIDARG);
    }

    #[test]
    fn connection_statuses_classify() {
        let p = PathBuf::from("root");
        assert!(matches!(
            ConnectionError::classify(p.clone(), status::ERROR_NOT_FOUND),
            ConnectionError::NotRegistered { .. }
        ));
        assert!(matches!(
            ConnectionError::classify(p.clone(), status::ERROR_CLOUD_FILE_ALREADY_CONNECTED),
            ConnectionError::AlreadyConnected { .. }
        ));
        assert!(matches!(
            ConnectionError::classify(p, status::ERROR_NO_SYSTEM_RESOURCES),
            ConnectionError::Failed { .. }
        ));
    }

    #[test]
    fn error_messages_carry_status() {
        let e = PlaceholderError::classify("C:\\r\\a.txt".into(), status::ERROR_ALREADY_EXISTS);
        assert!(e.to_string().contains("0x800700B7"));
    }
}
