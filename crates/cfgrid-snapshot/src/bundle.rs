//! Canned configuration bundles: tar archives of relative paths.

use std::io::Read;
use std::path::{Component, Path};

use tracing::{debug, warn};

use crate::error::{SourceError, SourceResult};
use crate::snapshot::ConfigSnapshot;

/// Unpack a tar archive into a snapshot identified by `hash`.
///
/// Only regular file entries are kept. Directory entries, links and paths
/// that are absolute or climb out of the archive are skipped. An entry
/// whose header claims more bytes than the whole archive holds is rejected.
pub fn unpack(archive: &[u8], hash: &str) -> SourceResult<ConfigSnapshot> {
    let mut snapshot = ConfigSnapshot::new(hash);
    let mut reader = tar::Archive::new(archive);
    let entries = reader
        .entries()
        .map_err(|e| SourceError::Bundle(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| SourceError::Bundle(e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| SourceError::Bundle(e.to_string()))?
            .into_owned();
        let Some(relative) = relative_path(&path) else {
            warn!(path = ?path, "skipping bundle entry outside the archive root");
            continue;
        };

        let size = entry.size();
        if size > archive.len() as u64 {
            return Err(SourceError::Bundle(format!(
                "entry {relative} claims {size} bytes in a {} byte archive",
                archive.len()
            )));
        }
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| SourceError::Bundle(e.to_string()))?;
        snapshot.insert(&relative, content);
    }

    debug!(%hash, files = snapshot.len(), "bundle unpacked");
    Ok(snapshot)
}

/// `/`-joined relative path, or `None` if `path` is not safely relative.
fn relative_path(path: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!segments.is_empty()).then(|| segments.join("/"))
}
