//! Crash-safe file replacement.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Replaces `path` with `content` via a synced temporary file and a rename.
///
/// Readers observe either the previous content or the new content, never a
/// partially written file. Missing parent directories are created.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent_directory) = path.parent()
        && !parent_directory.as_os_str().is_empty()
    {
        fs::create_dir_all(parent_directory)?;
    }

    let temporary_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|extension| extension.to_str()).unwrap_or("tmp")
    ));
    {
        let mut file = File::create(&temporary_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&temporary_path, path)
}
