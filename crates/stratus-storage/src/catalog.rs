//! Remote catalog index.
//!
//! Every file the engine publishes has an index object at
//! `{prefix}/index/{relative_path}` whose body is `key=value` lines:
//!
//! ```text
//! object=team/objects/3f9c
//! size=1024
//! mtime=1700000000
//! ```
//!
//! Directories are never indexed; they are implied by the paths.

use anyhow::{Context, Result};
use opendal::Operator;
use stratus_core::types::{Catalog, CatalogEntry};
use tracing::{debug, info, warn};

/// Index object prefix for a remote prefix (always ends with `/`).
pub fn index_prefix(remote_prefix: &str) -> String {
    format!("{}/index/", remote_prefix.trim_end_matches('/'))
}

/// Parse one index object body. Returns `None` when `object` is missing
/// or a numeric field does not parse.
pub fn parse_index_entry(rel_path: &str, text: &str) -> Option<CatalogEntry> {
    let mut object = None;
    let mut size = None;
    let mut mtime = 0i64;
    for line in text.lines() {
        if let Some(val) = line.strip_prefix("object=") {
            object = Some(val.trim().to_string());
        } else if let Some(val) = line.strip_prefix("size=") {
            size = Some(val.trim().parse::<u64>().ok()?);
        } else if let Some(val) = line.strip_prefix("mtime=") {
            mtime = val.trim().parse().ok()?;
        }
    }

    let object = object.filter(|o| !o.is_empty())?;
    Some(CatalogEntry {
        path: rel_path.trim_matches('/').to_string(),
        object,
        size: size.unwrap_or(0),
        mtime,
        is_directory: false,
    })
}

/// Read the whole remote index into a [`Catalog`].
///
/// Unreadable or malformed entries are skipped with a warning so one bad
/// object does not hide the rest of the namespace.
pub async fn load_catalog(op: &Operator, remote_prefix: &str) -> Result<Catalog> {
    let prefix = index_prefix(remote_prefix);
    let entries = op
        .list_with(&prefix)
        .recursive(true)
        .await
        .with_context(|| format!("listing remote index {prefix}"))?;

    let mut catalog = Catalog::new();
    for entry in entries {
        let entry_path = entry.path();
        let rel_path = entry_path.strip_prefix(&prefix).unwrap_or(entry_path);
        if rel_path.is_empty() || rel_path.ends_with('/') {
            continue;
        }

        let data = match op.read(entry_path).await {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %entry_path, "skipping unreadable index entry: {e}");
                continue;
            }
        };
        let text = String::from_utf8_lossy(&data.to_bytes()).into_owned();
        match parse_index_entry(rel_path, &text) {
            Some(parsed) => {
                debug!(path = %parsed.path, object = %parsed.object, size = parsed.size, "index entry");
                catalog.insert(parsed);
            }
            None => warn!(path = %entry_path, "skipping malformed index entry"),
        }
    }

    info!(prefix = %prefix, entries = catalog.len(), "loaded remote catalog");
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_operator() -> Operator {
        Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish()
    }

    #[test]
    fn parse_complete_entry() {
        let e = parse_index_entry("docs/a.txt", "object=p/objects/1\nsize=42\nmtime=1700000000\n")
            .unwrap();
        assert_eq!(e.path, "docs/a.txt");
        assert_eq!(e.object, "p/objects/1");
        assert_eq!(e.size, 42);
        assert_eq!(e.mtime, 1_700_000_000);
        assert!(!e.is_directory);
    }

    #[test]
    fn parse_rejects_missing_object_and_bad_numbers() {
        assert!(parse_index_entry("a", "size=1\n").is_none());
        assert!(parse_index_entry("a", "object=x\nsize=lots\n").is_none());
        assert!(parse_index_entry("a", "object=x\nmtime=yesterday\n").is_none());
    }

    #[test]
    fn parse_ignores_unknown_keys() {
        let e = parse_index_entry("a", "object=x\nowner=alice\n").unwrap();
        assert_eq!(e.size, 0);
        assert_eq!(e.mtime, 0);
    }

    #[tokio::test]
    async fn load_catalog_from_memory_backend() {
        let op = memory_operator();
        op.write("team/index/a.txt", b"object=team/objects/a\nsize=3\nmtime=10\n".to_vec())
            .await
            .unwrap();
        op.write("team/index/sub/b.bin", b"object=team/objects/b\nsize=5\nmtime=20\n".to_vec())
            .await
            .unwrap();
        op.write("team/index/broken", b"nothing useful".to_vec()).await.unwrap();

        let catalog = load_catalog(&op, "team/").await.unwrap();
        let paths: Vec<_> = catalog.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub", "sub/b.bin"]);
        assert_eq!(catalog.get("sub/b.bin").unwrap().object, "team/objects/b");
        assert!(catalog.get("sub").unwrap().is_directory);
    }
}
