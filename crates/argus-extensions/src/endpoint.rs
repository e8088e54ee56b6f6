//! Endpoint primitives.
//!
//! An endpoint address is an opaque string. On POSIX platforms it names a
//! UNIX-domain socket file; on Windows it names a pipe under the fixed
//! `\\.\pipe\` namespace. The two have different existence and
//! writability semantics, so everything above this module speaks only in
//! terms of "addressable", "writable", and "rebindable".

#[cfg(windows)]
use argus_core::config::PIPE_PREFIX;
use argus_core::error::{ExtensionError, RouteUuid};
#[cfg(not(windows))]
use argus_core::fs;
#[cfg(not(windows))]
use std::path::Path;

/// Endpoint for extension `uuid`, derived from the manager endpoint.
///
/// The suffix is stable so either peer can reconstruct the address from
/// the UUID alone.
pub fn extension_endpoint(manager: &str, uuid: RouteUuid) -> String {
    format!("{manager}.{uuid}")
}

/// Whether a named pipe with this address currently exists. A busy pipe
/// still counts as live.
#[cfg(windows)]
pub fn named_pipe_exists(addr: &str) -> bool {
    std::fs::metadata(addr).is_ok()
}

/// Validate a named-pipe address: it must sit under the fixed pipe
/// namespace.
#[cfg(windows)]
pub fn validate_pipe_name(addr: &str) -> Result<(), ExtensionError> {
    if !addr.starts_with(PIPE_PREFIX) {
        return Err(ExtensionError::Endpoint(format!(
            "Bad named pipe name prefix: {addr}"
        )));
    }
    Ok(())
}

/// Make sure `addr` can be bound: a stale file at the address must be
/// writable and is unlinked; otherwise the parent directory must exist
/// and be writable by the current principal.
pub fn ensure_rebindable(addr: &str) -> Result<(), ExtensionError> {
    if addr.is_empty() {
        return Err(ExtensionError::Endpoint("Empty endpoint address".into()));
    }

    #[cfg(windows)]
    {
        validate_pipe_name(addr)
    }

    #[cfg(not(windows))]
    {
        socket_writable(Path::new(addr))
    }
}

/// The unlink-then-bind discipline for socket files.
#[cfg(not(windows))]
fn socket_writable(path: &Path) -> Result<(), ExtensionError> {
    if fs::path_exists(path) {
        if !fs::is_writable(path) {
            return Err(ExtensionError::Endpoint(format!(
                "Cannot write extension socket: {}",
                path.display()
            )));
        }
        if fs::remove_file(path).is_err() {
            return Err(ExtensionError::Endpoint(format!(
                "Cannot remove extension socket: {}",
                path.display()
            )));
        }
    } else {
        let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
        let Some(parent) = parent else {
            return Err(ExtensionError::Endpoint(format!(
                "Extension socket directory missing: {}",
                path.display()
            )));
        };
        if !fs::path_exists(parent) {
            return Err(ExtensionError::Endpoint(format!(
                "Extension socket directory missing: {}",
                path.display()
            )));
        }
        if !fs::is_writable(parent) {
            return Err(ExtensionError::Endpoint(format!(
                "Cannot create extension socket: {}",
                path.display()
            )));
        }
    }
    Ok(())
}
