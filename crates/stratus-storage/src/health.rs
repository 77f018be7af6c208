//! Storage reachability check

use anyhow::{Context, Result};
use opendal::{ErrorKind, Operator};
use tracing::debug;

/// Verify the backend answers and that the catalog index under
/// `remote_prefix` can be listed. A prefix with no index yet is healthy:
/// the sync root is simply empty.
pub async fn check_health(op: &Operator, remote_prefix: &str) -> Result<()> {
    let prefix = crate::catalog::index_prefix(remote_prefix);
    match op.list(&prefix).await {
        Ok(entries) => {
            debug!(prefix = %prefix, entries = entries.len(), "storage health check passed");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(prefix = %prefix, "remote index does not exist yet");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("storage health check failed listing {prefix}")),
    }
}
