//! Atomic file replacement.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Replace `path` with `bytes` so readers see either the old or the new
/// content, never a partial write.
///
/// The temp file is created next to the target (same filesystem), flushed
/// to disk, then renamed over it. Blocking; call from `spawn_blocking`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
