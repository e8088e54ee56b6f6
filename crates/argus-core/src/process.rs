//! Process-control seams: the child launcher that executes vetted
//! extension binaries, and the shutdown-request hook watchers use to
//! terminate their own process.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Exit code for a clean parent-loss shutdown.
pub const EXIT_CLEAN: i32 = 0;

/// Exit code when the manager reports a fatal ping status.
pub const EXIT_FATAL: i32 = 1;

/// Supervisor that forks extension binaries whose paths are handed to it.
///
/// Autoload vetting only hands over paths; whoever owns the launcher
/// decides when to actually spawn.
pub trait ExtensionLauncher: Send + Sync {
    fn add_extension_path(&self, path: &Path);
}

/// Launcher that execs each vetted binary with the manager socket on its
/// command line.
pub struct ChildLauncher {
    socket: String,
    pending: Mutex<Vec<PathBuf>>,
}

impl ChildLauncher {
    pub fn new(socket: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Paths collected so far, in hand-over order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.pending.lock().clone()
    }

    /// Spawn every pending binary, detached. Returns how many started.
    pub fn spawn_all(&self) -> usize {
        let paths = std::mem::take(&mut *self.pending.lock());
        let mut started = 0;
        for path in paths {
            match Command::new(&path)
                .arg("--socket")
                .arg(&self.socket)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(child) => {
                    tracing::info!(path = %path.display(), pid = child.id(), "Extension spawned");
                    started += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "Extension failed to spawn");
                }
            }
        }
        started
    }
}

impl ExtensionLauncher for ChildLauncher {
    fn add_extension_path(&self, path: &Path) {
        self.pending.lock().push(path.to_path_buf());
    }
}

/// Hook through which a watcher asks its process to exit.
pub trait ShutdownRequester: Send + Sync {
    fn request_shutdown(&self, code: i32);
}

/// The real thing: terminates the current process.
pub struct ProcessShutdown;

impl ShutdownRequester for ProcessShutdown {
    fn request_shutdown(&self, code: i32) {
        std::process::exit(code);
    }
}
