use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Sibling path used while `path` is being written.
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `path` so readers see either the old file or the complete
/// new one: write a staging sibling, fsync, rename over the target.
///
/// An existing target that refuses writes is an error even though `rename`
/// would replace it. A target in a directory that refuses new entries is
/// rewritten in place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let target_exists = check_target_writable(path)?;
    let staging = staging_path(path);
    let file = match File::create(&staging) {
        Ok(file) => file,
        Err(e) if target_exists && e.kind() == io::ErrorKind::PermissionDenied => {
            return overwrite_in_place(path, bytes);
        }
        Err(e) => return Err(e),
    };

    let result = write_synced(file, bytes)
        .and_then(|()| fs::rename(&staging, path))
        .and_then(|()| sync_parent_directory(path));

    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

/// `Ok(true)` when `path` exists and opens for writing, `Ok(false)` when absent.
fn check_target_writable(path: &Path) -> io::Result<bool> {
    match OpenOptions::new().write(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn write_synced(mut file: File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.sync_all()
}

fn overwrite_in_place(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file = OpenOptions::new().write(true).truncate(true).open(path)?;
    write_synced(file, bytes)
}

#[cfg(unix)]
fn sync_parent_directory(path: &Path) -> io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_directory(_path: &Path) -> io::Result<()> {
    Ok(())
}
