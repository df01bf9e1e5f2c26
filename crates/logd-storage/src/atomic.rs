use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result};

/// Writes `contents` to `path` via write-to-temp, fsync, rename (`spec.md`
/// §4.3: "all writes are atomic: a file only ever appears in its final
/// location fully formed"). The temp file lives alongside `path` so the
/// rename stays within one filesystem.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    write_and_sync(&tmp, contents)?;
    fs::rename(&tmp, path).ctx(path)?;
    sync_parent(path)?;
    Ok(())
}

/// Creates a fully-formed `*.pending` file without renaming it to its final
/// name; used for diff bodies awaiting transaction commit (`spec.md` §4.3).
pub fn write_pending(path: &Path, contents: &[u8]) -> Result<()> {
    write_and_sync(path, contents)?;
    sync_parent(path)?;
    Ok(())
}

/// Renames an already-durable file into place and fsyncs the containing
/// directory, completing the atomic handoff described in `spec.md` §4.3
/// (pending diff -> committed diff, or committed diff -> demoted/removed).
pub fn atomic_rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).ctx(to)?;
    sync_parent(to)?;
    Ok(())
}

fn write_and_sync(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ctx(parent)?;
    }
    let mut file = File::create(path).ctx(path)?;
    file.write_all(contents).ctx(path)?;
    file.sync_all().ctx(path)?;
    Ok(())
}

fn sync_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            // Best effort: some platforms reject fsync on directory handles.
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("tmp");
    let unique = std::process::id();
    let name = format!(".{file_name}.{unique}.tmp");
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_file_with_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/file");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        assert!(!dir.path().join("a/b").read_dir().unwrap().any(|e| {
            e.unwrap().file_name().to_string_lossy().ends_with(".tmp")
        }));
    }

    #[test]
    fn atomic_write_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn write_pending_then_rename() {
        let dir = tempfile::tempdir().unwrap();
        let pending = dir.path().join("1.pending");
        let committed = dir.path().join("1-1.diff");
        write_pending(&pending, b"diff body").unwrap();
        assert!(pending.exists());
        atomic_rename(&pending, &committed).unwrap();
        assert!(!pending.exists());
        assert_eq!(fs::read(&committed).unwrap(), b"diff body");
    }
}
