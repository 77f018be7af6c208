use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One remote file or directory as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Path relative to the sync root, `/`-separated, no leading slash
    pub path: String,
    /// Remote object key; becomes the placeholder's file identity
    pub object: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time, whole Unix seconds
    pub mtime: i64,
    pub is_directory: bool,
}

impl CatalogEntry {
    /// Parent path relative to the root (`""` for top-level entries).
    pub fn parent(&self) -> &str {
        self.path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.path.rsplit_once('/').map(|(_, n)| n).unwrap_or(&self.path)
    }

    fn differs_from(&self, other: &CatalogEntry) -> bool {
        self.object != other.object || self.size != other.size || self.mtime != other.mtime
    }
}

/// Snapshot of the remote namespace, ordered so parents precede children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file entry, adding any implied parent directories.
    pub fn insert(&mut self, entry: CatalogEntry) {
        let mut parent = entry.parent().to_string();
        while !parent.is_empty() {
            self.entries
                .entry(parent.clone())
                .or_insert_with(|| CatalogEntry {
                    path: parent.clone(),
                    object: format!("{parent}/"),
                    size: 0,
                    mtime: entry.mtime,
                    is_directory: true,
                });
            parent = parent
                .rsplit_once('/')
                .map(|(p, _)| p.to_string())
                .unwrap_or_default();
        }
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn get(&self, path: &str) -> Option<&CatalogEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Compute what changed going from `self` to `newer`.
    pub fn diff(&self, newer: &Catalog) -> CatalogDiff {
        let mut diff = CatalogDiff::default();
        for (path, entry) in &newer.entries {
            match self.entries.get(path) {
                None => diff.added.push(entry.clone()),
                Some(old) if !entry.is_directory && old.differs_from(entry) => {
                    diff.changed.push(entry.clone())
                }
                Some(_) => {}
            }
        }
        diff.removed = self
            .entries
            .keys()
            .filter(|p| !newer.entries.contains_key(*p))
            .cloned()
            .collect();
        diff
    }
}

impl FromIterator<CatalogEntry> for Catalog {
    fn from_iter<I: IntoIterator<Item = CatalogEntry>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        for entry in iter {
            catalog.insert(entry);
        }
        catalog
    }
}

/// Added and changed entries are in parent-first order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogDiff {
    pub added: Vec<CatalogEntry>,
    pub changed: Vec<CatalogEntry>,
    pub removed: Vec<String>,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}
