//! Immutable configuration file tree.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Result of resolving a path inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File(Bytes),
    Directory,
}

/// A complete configuration tree plus the hash identifying it.
///
/// Directories are implicit: a path is a directory when some file lives
/// below it. Paths are stored normalized (`/`-separated, no leading slash,
/// no `.` or empty segments).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    hash: String,
    files: BTreeMap<String, Bytes>,
}

impl ConfigSnapshot {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            files: BTreeMap::new(),
        }
    }

    /// Add or replace a file. Paths that normalize to nothing are ignored.
    pub fn insert(&mut self, path: &str, content: impl Into<Bytes>) {
        let path = normalize(path);
        if !path.is_empty() {
            self.files.insert(path, content.into());
        }
    }

    pub fn with_file(mut self, path: &str, content: impl Into<Bytes>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Content of the file at exactly `path`.
    pub fn file(&self, path: &str) -> Option<&Bytes> {
        self.files.get(&normalize(path))
    }

    /// Resolve `path` to a file or an implicit directory.
    pub fn resolve(&self, path: &str) -> Option<Entry> {
        let path = normalize(path);
        if let Some(content) = self.files.get(&path) {
            return Some(Entry::File(content.clone()));
        }
        if path.is_empty() {
            return (!self.files.is_empty()).then_some(Entry::Directory);
        }
        let prefix = format!("{path}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|_| Entry::Directory)
    }

    /// Every file path, depth-first with siblings in name order.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.keys().cloned().collect();
        paths.sort_by(|a, b| a.split('/').cmp(b.split('/')));
        paths
    }
}

/// Normalize a relative path; `..` never climbs above the root.
pub(crate) fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Join a serving root and a name into one normalized path.
///
/// Each side is normalized on its own, so `..` in `name` can never climb
/// out of `root`.
pub(crate) fn join(root: &str, name: &str) -> String {
    let (root, name) = (normalize(root), normalize(name));
    match (root.is_empty(), name.is_empty()) {
        (true, _) => name,
        (false, true) => root,
        (false, false) => format!("{root}/{name}"),
    }
}
