//! Runtime configuration for extension supervision.
//!
//! Values mirror the daemon's flag surface; extension binaries set the
//! same fields through the short `--socket`/`--timeout`/`--interval`
//! aliases exposed by the SDK.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Named-pipe namespace used on Windows endpoints.
pub const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Endpoint file created under the socket directory.
const SOCKET_FILE: &str = "argus.em";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    /// Disable all extension load/register/RPC paths.
    pub disable_extensions: bool,

    /// Manager endpoint address.
    pub extensions_socket: String,

    /// Loadfile of extension binaries to autoload.
    pub extensions_autoload: PathBuf,

    /// Seconds to wait for autoloaded and required extensions.
    pub extensions_timeout: u64,

    /// Seconds between watcher connectivity checks.
    pub extensions_interval: u64,

    /// Loadfile of in-process registry modules to autoload.
    pub modules_autoload: PathBuf,

    /// Comma-separated extension names that must register before manager
    /// startup completes.
    pub extensions_require: String,

    /// Single extension path autoloaded without the safety check.
    /// Shell-only developer flag; intentionally unsafe.
    pub extension: String,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            disable_extensions: false,
            extensions_socket: default_socket_path(),
            extensions_autoload: default_home().join("extensions.load"),
            extensions_timeout: 3,
            extensions_interval: 3,
            modules_autoload: default_home().join("modules.load"),
            extensions_require: String::new(),
            extension: String::new(),
        }
    }
}

impl ExtensionConfig {
    /// Watcher tick period in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        self.extensions_interval.saturating_mul(1000)
    }

    /// The required-extension names, empty entries dropped.
    pub fn required_extensions(&self) -> Vec<String> {
        self.extensions_require
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".argus")
}

fn default_socket_path() -> String {
    if cfg!(windows) {
        return format!("{}{}", PIPE_PREFIX, SOCKET_FILE);
    }
    let dir = dirs::runtime_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
    dir.join(SOCKET_FILE).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_flag_table() {
        let config = ExtensionConfig::default();
        assert!(!config.disable_extensions);
        assert_eq!(config.extensions_timeout, 3);
        assert_eq!(config.extensions_interval, 3);
        assert!(config.extensions_socket.ends_with("argus.em"));
        assert!(config.required_extensions().is_empty());
    }

    #[test]
    fn required_extensions_splits_and_trims() {
        let config = ExtensionConfig {
            extensions_require: "probe-a, probe-b,,".into(),
            ..Default::default()
        };
        assert_eq!(config.required_extensions(), vec!["probe-a", "probe-b"]);
    }

    #[test]
    fn interval_is_reported_in_milliseconds() {
        let config = ExtensionConfig {
            extensions_interval: 2,
            ..Default::default()
        };
        assert_eq!(config.interval_ms(), 2000);
    }
}
