//! Snapshot persistence for the document table.
//!
//! The snapshot is the full table serialized as a JSON array at the primary
//! path. Writes go through a sibling temp file and an atomic rename, so an
//! external reader never observes a half-written primary file.

use crate::error::Result;
use crate::types::Document;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Derive a sibling path by appending a suffix to the full file name
/// (`store.json` + `.wal` → `store.json.wal`).
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Serialize the table and atomically replace the primary file.
///
/// The data is fully written and fsynced at `<path>.tmp` before the rename,
/// so a crash at any point leaves either the old snapshot or the new one,
/// never a mixture.
pub(crate) fn write(path: &Path, documents: &[Document]) -> Result<()> {
    let tmp = sibling_path(path, ".tmp");
    let data = serde_json::to_vec(documents)?;

    let mut file = File::create(&tmp)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load the table from the primary file.
///
/// A missing file is an empty table. A file that exists but cannot be read
/// or parsed also yields an empty table, but flags the reset so recovery can
/// surface it instead of losing data silently; the unreadable file stays on
/// disk until the next snapshot overwrites it.
pub(crate) fn load(path: &Path) -> (Vec<Document>, bool) {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return (Vec::new(), false),
        Err(err) => {
            warn!("primary file {} unreadable, starting empty: {}", path.display(), err);
            return (Vec::new(), true);
        }
    };

    match serde_json::from_slice::<Vec<Document>>(&contents) {
        Ok(documents) => (documents, false),
        Err(err) => {
            warn!("primary file {} unparsable, starting empty: {}", path.display(), err);
            (Vec::new(), true)
        }
    }
}
