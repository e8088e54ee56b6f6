//! Filesystem safety primitives used by endpoint validation and autoload
//! vetting.
//!
//! Writability is judged from ownership bits rather than a trial open:
//! endpoint paths are usually sockets, where opening for write has side
//! effects or fails outright.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn path_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

pub fn is_directory(path: &Path) -> bool {
    path.is_dir()
}

/// Whether the current principal may write to `path`.
#[cfg(unix)]
pub fn is_writable(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match path.metadata() {
        Ok(meta) => meta.mode() & 0o200 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_writable(path: &Path) -> bool {
    match path.metadata() {
        Ok(meta) => !meta.permissions().readonly(),
        Err(_) => false,
    }
}

/// Whether `dir` has owner-controlled permissions: a directory that is
/// group- or world-writable can swap binaries out from under us between
/// vetting and exec.
#[cfg(unix)]
pub fn safe_permissions(dir: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match dir.metadata() {
        Ok(meta) => meta.is_dir() && meta.mode() & 0o022 == 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn safe_permissions(dir: &Path) -> bool {
    dir.is_dir()
}

/// Canonicalize a vetted path before it is handed to a launcher.
pub fn canonicalize(path: &Path) -> io::Result<PathBuf> {
    fs::canonicalize(path)
}

pub fn read_file(path: &Path) -> io::Result<String> {
    fs::read_to_string(path)
}

/// Unlink a stale endpoint file.
pub fn remove_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn missing_paths_are_not_writable() {
        assert!(!is_writable(Path::new("/nonexistent/argus.em")));
        assert!(!path_exists(Path::new("/nonexistent/argus.em")));
    }

    #[cfg(unix)]
    #[test]
    fn world_writable_directories_are_unsafe() {
        let dir = tempfile::tempdir().unwrap();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o777)).unwrap();
        assert!(!safe_permissions(dir.path()));

        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
        assert!(safe_permissions(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn owner_writable_files_are_writable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("probe.ext");
        fs::write(&file, b"").unwrap();
        assert!(is_writable(&file));

        fs::set_permissions(&file, fs::Permissions::from_mode(0o444)).unwrap();
        assert!(!is_writable(&file));
    }
}
