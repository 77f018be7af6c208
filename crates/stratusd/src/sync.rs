//! Catalog → placeholder reconciliation.
//!
//! Entries arrive parent-first, so a directory placeholder always exists
//! before its children are created. "Already exists" on create becomes an
//! update, which makes startup population idempotent across restarts.
//! Remote removals are reported but never delete local placeholders.

use std::path::{Path, PathBuf};
use stratus_cloudfilter::{FileIdentity, PlaceholderError, PlaceholderManager};
use stratus_core::types::{CatalogDiff, CatalogEntry};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub removed_remotely: usize,
}

/// Local directory that holds `entry`'s placeholder.
pub fn local_parent(root: &Path, entry: &CatalogEntry) -> PathBuf {
    let mut parent = root.to_path_buf();
    for component in entry.parent().split('/').filter(|c| !c.is_empty()) {
        parent.push(component);
    }
    parent
}

pub fn local_path(root: &Path, entry: &CatalogEntry) -> PathBuf {
    local_parent(root, entry).join(entry.name())
}

/// [`apply_diff`] on the blocking pool. Placeholder calls are synchronous
/// OS calls and must not stall the runtime's worker threads.
pub async fn apply_diff_blocking(
    placeholders: PlaceholderManager,
    root: PathBuf,
    diff: CatalogDiff,
) -> SyncReport {
    let pending = diff.added.len() + diff.changed.len();
    match tokio::task::spawn_blocking(move || apply_diff(&placeholders, &root, &diff)).await {
        Ok(report) => report,
        Err(e) => {
            error!("placeholder sync task failed: {e}");
            SyncReport {
                failed: pending,
                ..SyncReport::default()
            }
        }
    }
}

pub fn apply_diff(placeholders: &PlaceholderManager, root: &Path, diff: &CatalogDiff) -> SyncReport {
    let mut report = SyncReport::default();

    for entry in &diff.added {
        match create_or_update(placeholders, root, entry) {
            Ok(Upsert::Created) => report.created += 1,
            Ok(Upsert::Updated) => report.updated += 1,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "placeholder create failed");
                report.failed += 1;
            }
        }
    }

    for entry in &diff.changed {
        match update_or_create(placeholders, root, entry) {
            Ok(Upsert::Created) => report.created += 1,
            Ok(Upsert::Updated) => report.updated += 1,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "placeholder update failed");
                report.failed += 1;
            }
        }
    }

    for path in &diff.removed {
        info!(path = %path, "removed remotely; local placeholder left in place");
        report.removed_remotely += 1;
    }

    if report != SyncReport::default() {
        info!(
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            removed_remotely = report.removed_remotely,
            "applied catalog changes"
        );
    }
    report
}

enum Upsert {
    Created,
    Updated,
}

fn create_or_update(
    placeholders: &PlaceholderManager,
    root: &Path,
    entry: &CatalogEntry,
) -> Result<Upsert, PlaceholderError> {
    let parent = local_parent(root, entry);
    let identity = FileIdentity::from(entry.object.as_str());
    match placeholders.create(&parent, entry.name(), &identity, entry.size, entry.mtime, entry.is_directory) {
        Ok(()) => Ok(Upsert::Created),
        Err(PlaceholderError::AlreadyExists { .. }) if entry.is_directory => {
            debug!(path = %entry.path, "directory placeholder already present");
            Ok(Upsert::Updated)
        }
        Err(PlaceholderError::AlreadyExists { .. }) => {
            placeholders.update(&parent.join(entry.name()), &identity, entry.size, entry.mtime)?;
            Ok(Upsert::Updated)
        }
        Err(e) => Err(e),
    }
}

fn update_or_create(
    placeholders: &PlaceholderManager,
    root: &Path,
    entry: &CatalogEntry,
) -> Result<Upsert, PlaceholderError> {
    let identity = FileIdentity::from(entry.object.as_str());
    match placeholders.update(&local_path(root, entry), &identity, entry.size, entry.mtime) {
        Ok(()) => Ok(Upsert::Updated),
        Err(PlaceholderError::NotFound { .. }) => create_or_update(placeholders, root, entry),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stratus_cloudfilter::{SimulatedCloudFilter, SyncRootProvider};
    use stratus_core::types::Catalog;

    fn entry(path: &str, object: &str, size: u64, mtime: i64) -> CatalogEntry {
        CatalogEntry {
            path: path.into(),
            object: object.into(),
            size,
            mtime,
            is_directory: false,
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<SimulatedCloudFilter>, PlaceholderManager) {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedCloudFilter::new());
        let provider = SyncRootProvider::new(sim.clone());
        provider.registrar().register(dir.path(), "Stratus", "1.0").unwrap();
        (dir, sim, provider.placeholders())
    }

    #[test]
    fn local_paths_follow_catalog_components() {
        let e = entry("docs/2024/report.pdf", "o", 1, 0);
        let root = Path::new("/sync");
        assert_eq!(local_parent(root, &e), Path::new("/sync/docs/2024"));
        assert_eq!(local_path(root, &e), Path::new("/sync/docs/2024/report.pdf"));
        assert_eq!(local_parent(root, &entry("top.txt", "o", 1, 0)), root);
    }

    #[test]
    fn populate_creates_parents_first() {
        let (dir, sim, placeholders) = setup();
        let catalog: Catalog = [
            entry("docs/deep/b.txt", "obj/b", 20, 200),
            entry("a.txt", "obj/a", 10, 100),
        ]
        .into_iter()
        .collect();

        let report = apply_diff(&placeholders, dir.path(), &Catalog::new().diff(&catalog));
        assert_eq!(report.created, 4);
        assert_eq!(report.failed, 0);

        let docs = sim.placeholder(&dir.path().join("docs")).unwrap();
        assert!(docs.metadata.is_directory());
        let b = sim.placeholder(&dir.path().join("docs").join("deep").join("b.txt")).unwrap();
        assert_eq!(b.identity.as_bytes(), b"obj/b");
        assert_eq!(b.metadata.file_size, 20);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn blocking_sync_leaves_the_runtime_free() {
        let (dir, sim, placeholders) = setup();
        let catalog: Catalog = [entry("x/a.txt", "obj/a", 10, 100)].into_iter().collect();

        let ticker = tokio::spawn(async { tokio::task::yield_now().await });
        let report = apply_diff_blocking(
            placeholders,
            dir.path().to_path_buf(),
            Catalog::new().diff(&catalog),
        )
        .await;
        ticker.await.unwrap();

        assert_eq!((report.created, report.failed), (2, 0));
        assert!(sim.placeholder(&dir.path().join("x").join("a.txt")).is_some());
    }

    #[test]
    fn repopulating_is_idempotent() {
        let (dir, sim, placeholders) = setup();
        let catalog: Catalog = [entry("x/a.txt", "obj/a", 10, 100)].into_iter().collect();
        let everything = Catalog::new().diff(&catalog);

        apply_diff(&placeholders, dir.path(), &everything);
        let again = apply_diff(&placeholders, dir.path(), &everything);
        assert_eq!((again.created, again.updated, again.failed), (0, 2, 0));
        assert_eq!(sim.placeholder_paths().len(), 2);
    }

    #[test]
    fn changes_update_and_removals_are_kept() {
        let (dir, sim, placeholders) = setup();
        let before: Catalog = [entry("a.txt", "obj/a1", 10, 100), entry("gone.txt", "obj/g", 1, 1)]
            .into_iter()
            .collect();
        apply_diff(&placeholders, dir.path(), &Catalog::new().diff(&before));

        let after: Catalog = [entry("a.txt", "obj/a2", 30, 300), entry("new.txt", "obj/n", 5, 5)]
            .into_iter()
            .collect();
        let report = apply_diff(&placeholders, dir.path(), &before.diff(&after));
        assert_eq!(
            report,
            SyncReport {
                created: 1,
                updated: 1,
                failed: 0,
                removed_remotely: 1
            }
        );

        let a = sim.placeholder(&dir.path().join("a.txt")).unwrap();
        assert_eq!(a.identity.as_bytes(), b"obj/a2");
        assert_eq!(a.metadata.file_size, 30);
        assert!(sim.placeholder(&dir.path().join("gone.txt")).is_some());
    }

    #[test]
    fn change_for_missing_placeholder_recreates_it() {
        let (dir, sim, placeholders) = setup();
        let diff = CatalogDiff {
            changed: vec![entry("lost.txt", "obj/l", 3, 3)],
            ..Default::default()
        };
        let report = apply_diff(&placeholders, dir.path(), &diff);
        assert_eq!(report.created, 1);
        assert!(sim.placeholder(&dir.path().join("lost.txt")).is_some());
    }
}
