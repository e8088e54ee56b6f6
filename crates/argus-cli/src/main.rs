//! argus host agent daemon.
//!
//! Starts the extension manager on the configured endpoint, vets and
//! spawns autoloaded extensions, and parks until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argus_core::registry::PluginRegistry;
use argus_core::{ChildLauncher, ExtensionConfig, PluginResponse};
use argus_extensions::autoload;
use argus_extensions::manager::start_extension_manager;
use argus_extensions::wire::ColumnType;
use argus_extensions::QuerySource;
use clap::Parser;

/// argus - host monitoring agent.
#[derive(Parser, Debug)]
#[command(name = "argusd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Disable the extension API.
    #[arg(long)]
    disable_extensions: bool,

    /// Path to the extension manager endpoint.
    #[arg(long)]
    extensions_socket: Option<String>,

    /// Optional path to a list of autoloaded and managed extensions.
    #[arg(long)]
    extensions_autoload: Option<PathBuf>,

    /// Seconds to wait for autoloaded extensions.
    #[arg(long)]
    extensions_timeout: Option<u64>,

    /// Seconds delay between connectivity checks.
    #[arg(long)]
    extensions_interval: Option<u64>,

    /// Optional path to a list of autoloaded registry modules.
    #[arg(long)]
    modules_autoload: Option<PathBuf>,

    /// Comma-separated list of required extensions.
    #[arg(long)]
    extensions_require: Option<String>,

    /// Path to a single extension to autoload, bypassing the safety
    /// check. For development only.
    #[arg(long)]
    extension: Option<String>,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> ExtensionConfig {
        let mut config = ExtensionConfig {
            disable_extensions: self.disable_extensions,
            ..Default::default()
        };
        if let Some(socket) = self.extensions_socket {
            config.extensions_socket = socket;
        }
        if let Some(autoload) = self.extensions_autoload {
            config.extensions_autoload = autoload;
        }
        if let Some(timeout) = self.extensions_timeout {
            config.extensions_timeout = timeout;
        }
        if let Some(interval) = self.extensions_interval {
            config.extensions_interval = interval;
        }
        if let Some(modules) = self.modules_autoload {
            config.modules_autoload = modules;
        }
        if let Some(require) = self.extensions_require {
            config.extensions_require = require;
        }
        if let Some(extension) = self.extension {
            config.extension = extension;
        }
        config
    }
}

/// The agent's SQL engine is attached elsewhere; extension queries
/// against a bare daemon answer with an empty result set.
struct AgentQuerySource;

impl QuerySource for AgentQuerySource {
    fn query(&self, sql: &str) -> std::result::Result<PluginResponse, argus_core::ExtensionError> {
        tracing::debug!(sql, "External query against bare agent");
        Ok(PluginResponse::new())
    }

    fn columns(
        &self,
        _sql: &str,
    ) -> std::result::Result<Vec<(String, ColumnType)>, argus_core::ExtensionError> {
        Ok(Vec::new())
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "argus=debug" } else { "argus=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // JSON logs for production/container environments.
    let json_logging = std::env::var("ARGUS_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let config = args.into_config();

    let registry = Arc::new(PluginRegistry::new());
    // Built-in plugin selections the option bundle hands to extensions.
    registry.set_active("config", "filesystem");
    registry.set_active("logger", "filesystem");
    registry.set_active("distributed", "tls");
    registry.set_up();

    let launcher = ChildLauncher::new(config.extensions_socket.clone());
    autoload::autoload_extensions(&config, &launcher);
    autoload::autoload_modules(&config, &registry);

    // Children probe for the manager endpoint within their own timeout,
    // so they may start before the endpoint is bound; the required gate
    // below needs them already running.
    let spawned = launcher.spawn_all();

    let handle = start_extension_manager(
        &config,
        Arc::clone(&registry),
        Arc::new(AgentQuerySource),
    )
    .context("extension manager failed to start")?;

    tracing::info!(
        socket = %config.extensions_socket,
        spawned,
        "argus extension manager running"
    );

    handle.wait();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_an_empty_command_line() {
        let config = Args::parse_from(["argusd"]).into_config();
        let defaults = ExtensionConfig::default();
        assert!(!config.disable_extensions);
        assert_eq!(config.extensions_socket, defaults.extensions_socket);
        assert_eq!(config.extensions_autoload, defaults.extensions_autoload);
        assert_eq!(config.extensions_timeout, 3);
        assert_eq!(config.extensions_interval, 3);
        assert!(config.extensions_require.is_empty());
        assert!(config.extension.is_empty());
    }

    #[test]
    fn flags_override_only_their_own_fields() {
        let config = Args::parse_from([
            "argusd",
            "--disable-extensions",
            "--extensions-socket",
            "/tmp/argus-test.em",
            "--extensions-timeout",
            "1",
            "--extensions-require",
            "probe-a,probe-b",
        ])
        .into_config();

        assert!(config.disable_extensions);
        assert_eq!(config.extensions_socket, "/tmp/argus-test.em");
        assert_eq!(config.extensions_timeout, 1);
        assert_eq!(config.required_extensions(), vec!["probe-a", "probe-b"]);
        // Unset flags keep their defaults.
        assert_eq!(config.extensions_interval, 3);
        assert_eq!(
            config.modules_autoload,
            ExtensionConfig::default().modules_autoload
        );
    }

    #[test]
    fn shell_extension_flag_is_carried_through() {
        let config = Args::parse_from(["argusd", "--extension", "/anywhere/devel-probe.bin"])
            .into_config();
        assert_eq!(config.extension, "/anywhere/devel-probe.bin");
    }
}
