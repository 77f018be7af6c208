//! Operator construction for the `[storage]` backends.

use anyhow::{Context, Result};
use opendal::layers::{LoggingLayer, RetryLayer};
use opendal::Operator;
use stratus_core::config::StorageConfig;
use tracing::warn;

/// S3 access key pair.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Read the key pair from `AWS_*`, falling back to `STRATUS_*`.
    pub fn from_env() -> Result<Self> {
        Ok(Credentials {
            access_key_id: first_env(&["AWS_ACCESS_KEY_ID", "STRATUS_ACCESS_KEY_ID"])
                .context("AWS_ACCESS_KEY_ID or STRATUS_ACCESS_KEY_ID must be set for the s3 backend")?,
            secret_access_key: first_env(&["AWS_SECRET_ACCESS_KEY", "STRATUS_SECRET_ACCESS_KEY"])
                .context("AWS_SECRET_ACCESS_KEY or STRATUS_SECRET_ACCESS_KEY must be set for the s3 backend")?,
        })
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

/// Whether `storage` needs [`Credentials`] to build an operator.
pub fn needs_credentials(storage: &StorageConfig) -> bool {
    storage.backend == "s3"
}

/// Build the operator `storage` describes.
///
/// The s3 backend uses path-style addressing (the opendal default), which
/// MinIO and other self-hosted gateways require, and refuses a plaintext
/// endpoint when `enforce_tls` is set. The fs backend ignores `credentials`.
pub fn build_operator(storage: &StorageConfig, credentials: Option<&Credentials>) -> Result<Operator> {
    match storage.backend.as_str() {
        "s3" => {
            let credentials = credentials.context("the s3 backend needs credentials")?;
            build_s3(storage, credentials)
        }
        "fs" => build_fs(&storage.root),
        other => anyhow::bail!("unsupported storage backend: {other}"),
    }
}

fn build_s3(storage: &StorageConfig, credentials: &Credentials) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but storage.enforce_tls is set",
                storage.endpoint
            );
        }
        warn!(endpoint = %storage.endpoint, "S3 endpoint uses plaintext HTTP");
    }

    let builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .access_key_id(&credentials.access_key_id)
        .secret_access_key(&credentials.secret_access_key);

    Ok(Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(LoggingLayer::default())
        .layer(RetryLayer::new().with_max_times(3).with_jitter())
        .finish())
}

fn build_fs(root: &std::path::Path) -> Result<Operator> {
    let root = root
        .to_str()
        .with_context(|| format!("fs backend root is not UTF-8: {}", root.display()))?;
    Ok(Operator::new(opendal::services::Fs::default().root(root))
        .context("creating OpenDAL fs operator")?
        .layer(LoggingLayer::default())
        .finish())
}
