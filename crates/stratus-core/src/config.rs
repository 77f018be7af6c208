use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{StratusError, StratusResult};

/// Cloud Files transfers must be 4 KiB aligned unless they end at EOF.
pub const TRANSFER_ALIGNMENT: usize = 4096;

/// Top-level daemon configuration (loaded from stratus.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StratusConfig {
    pub daemon: DaemonConfig,
    pub sync_root: SyncRootConfig,
    pub hydration: HydrationConfig,
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRootConfig {
    /// Local directory registered as the sync root
    pub path: PathBuf,
    /// Name shown in the Explorer navigation pane
    pub display_name: String,
    /// Provider version string recorded with the registration
    pub provider_version: String,
    /// Remove the registration when the daemon exits (placeholders lose cloud status)
    pub unregister_on_exit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    /// Concurrent fetches (0 = cpu_count)
    pub workers: usize,
    /// Bounded queue between OS callbacks and the worker pool
    pub queue_capacity: usize,
    /// Bytes handed to the OS per transfer call
    pub chunk_size: usize,
    /// Requests not answered within this window are failed and abandoned
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind: "s3" or "fs"
    pub backend: String,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Root directory for the "fs" backend
    pub root: PathBuf,
    /// Prefix holding `index/` entries and the objects they name
    pub remote_prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Seconds between remote index refreshes (0 disables refresh)
    pub refresh_secs: u64,
}

impl StratusConfig {
    /// Check values the OS or the worker pool cannot accept.
    pub fn validate(&self) -> StratusResult<()> {
        let chunk = self.hydration.chunk_size;
        if chunk == 0 || chunk % TRANSFER_ALIGNMENT != 0 {
            return Err(StratusError::UnalignedChunkSize {
                got: chunk,
                alignment: TRANSFER_ALIGNMENT,
            });
        }
        if self.hydration.queue_capacity == 0 {
            return Err(StratusError::EmptyQueue);
        }
        if self.sync_root.display_name.trim().is_empty() {
            return Err(StratusError::MissingDisplayName);
        }
        match self.storage.backend.as_str() {
            "s3" | "fs" => Ok(()),
            other => Err(StratusError::UnknownBackend(other.to_string())),
        }
    }

    /// Effective worker count after resolving `0` to the CPU count.
    pub fn worker_count(&self) -> usize {
        match self.hydration.workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            n => n,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for SyncRootConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("C:\\Stratus"),
            display_name: "Stratus".into(),
            provider_version: env!("CARGO_PKG_VERSION").into(),
            unregister_on_exit: false,
        }
    }
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 256,
            chunk_size: 1024 * 1024,
            fetch_timeout_secs: 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "s3".into(),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "stratus".into(),
            root: PathBuf::from("stratus-data"),
            remote_prefix: "default".into(),
            enforce_tls: false,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { refresh_secs: 30 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
log_level = "debug"
log_format = "json"

[sync_root]
path = 'D:\Cloud'
display_name = "Team Drive"
provider_version = "2.1"
unregister_on_exit = true

[hydration]
workers = 8
queue_capacity = 64
chunk_size = 65536
fetch_timeout_secs = 15

[storage]
backend = "fs"
root = "/srv/stratus"
remote_prefix = "team"

[catalog]
refresh_secs = 5
"#;

        let config: StratusConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.sync_root.path, PathBuf::from("D:\\Cloud"));
        assert_eq!(config.sync_root.display_name, "Team Drive");
        assert!(config.sync_root.unregister_on_exit);
        assert_eq!(config.hydration.workers, 8);
        assert_eq!(config.hydration.chunk_size, 65536);
        assert_eq!(config.storage.backend, "fs");
        assert_eq!(config.storage.remote_prefix, "team");
        assert_eq!(config.catalog.refresh_secs, 5);
        assert_eq!(config.worker_count(), 8);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: StratusConfig = toml::from_str("").unwrap();
        assert_eq!(config.hydration.queue_capacity, 256);
        assert_eq!(config.hydration.chunk_size, 1024 * 1024);
        assert_eq!(config.storage.backend, "s3");
        assert_eq!(config.catalog.refresh_secs, 30);
        assert!(config.worker_count() >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: StratusConfig = toml::from_str("[hydration]\nworkers = 2\n").unwrap();
        assert_eq!(config.hydration.workers, 2);
        assert_eq!(config.hydration.fetch_timeout_secs, 60);
    }

    #[test]
    fn test_unaligned_chunk_size_rejected() {
        let mut config = StratusConfig::default();
        config.hydration.chunk_size = 5000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_zero_queue_rejected() {
        let mut config = StratusConfig::default();
        config.hydration.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(StratusError::EmptyQueue)));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = StratusConfig::default();
        config.storage.backend = "gcs".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gcs"));
    }
}
