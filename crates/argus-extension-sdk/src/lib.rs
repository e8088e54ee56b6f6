//! SDK for building argus extensions.
//!
//! An extension is a separately compiled binary. Its `main` parses the
//! short flag aliases ([`ExtensionArgs`]), registers its plugins into a
//! local [`PluginRegistry`], and hands control to [`start_extension`]:
//!
//! ```no_run
//! use argus_core::{ExtensionConfig, PluginRegistry, ProcessShutdown};
//! use argus_extension_sdk::start_extension;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(PluginRegistry::new());
//! let config = ExtensionConfig::default();
//! let handle = start_extension(
//!     &config,
//!     Arc::clone(&registry),
//!     Arc::new(ProcessShutdown),
//!     "probe-a",
//!     "1.0.0",
//! )
//! .expect("manager unavailable");
//! handle.wait();
//! ```
//!
//! The sibling watcher keeps pinging the manager and exits the process
//! when the manager goes away, so an orphaned extension never lingers.

use argus_core::error::{ExtensionError, RouteUuid};
use argus_core::process::ShutdownRequester;
use argus_core::registry::PluginRegistry;
use argus_core::{ExtensionConfig, ARGUS_SDK_VERSION, MIN_SDK_VERSION};
use argus_extensions::client::ManagerClient;
use argus_extensions::dispatcher::{spawn_service, ServiceHandle};
use argus_extensions::endpoint::{ensure_rebindable, extension_endpoint};
use argus_extensions::probe::extension_path_active;
use argus_extensions::server::{start_server, ExtensionRunnerContext, ServerHandle};
use argus_extensions::watcher::ExtensionWatcher;
use argus_extensions::wire::ExtensionInfo;
use clap::Parser;
use std::sync::Arc;

/// Flag surface of an extension binary. These are the short aliases of
/// the daemon's `extensions_*` flags; inside an extension process the
/// prefix is just noise.
#[derive(Debug, Parser)]
#[command(about = "argus extension", long_about = None)]
pub struct ExtensionArgs {
    /// Path to the manager endpoint.
    #[arg(long, alias = "extensions-socket")]
    pub socket: Option<String>,

    /// Seconds to wait for the manager endpoint.
    #[arg(long, alias = "extensions-timeout")]
    pub timeout: Option<u64>,

    /// Seconds between manager connectivity checks.
    #[arg(long, alias = "extensions-interval")]
    pub interval: Option<u64>,

    /// Verbose output.
    #[arg(short, long)]
    pub verbose: bool,
}

impl ExtensionArgs {
    /// Fold the parsed flags over the default configuration.
    pub fn into_config(self) -> ExtensionConfig {
        let mut config = ExtensionConfig::default();
        if let Some(socket) = self.socket {
            config.extensions_socket = socket;
        }
        if let Some(timeout) = self.timeout {
            config.extensions_timeout = timeout;
        }
        if let Some(interval) = self.interval {
            config.extensions_interval = interval;
        }
        config
    }
}

/// A registered, running extension.
pub struct ExtensionHandle {
    uuid: RouteUuid,
    watcher: ServiceHandle,
    server: ServerHandle,
}

impl std::fmt::Debug for ExtensionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHandle")
            .field("uuid", &self.uuid)
            .finish_non_exhaustive()
    }
}

impl ExtensionHandle {
    /// UUID the manager assigned at registration.
    pub fn uuid(&self) -> RouteUuid {
        self.uuid
    }

    /// Park until the watcher exits (manager loss or interrupt), then
    /// tear the RPC server down.
    pub fn wait(self) {
        self.watcher.wait();
        self.server.stop();
    }

    /// Cooperative teardown without waiting on the manager.
    pub fn shutdown(self) {
        self.watcher.join();
        self.server.stop();
    }
}

/// Register with the manager and expose this extension's endpoint.
///
/// Failures abort the bootstrap and come back verbatim; a duplicate
/// extension name or registry item carries the reserved duplicate code.
pub fn start_extension(
    config: &ExtensionConfig,
    registry: Arc<PluginRegistry>,
    shutdown: Arc<dyn ShutdownRequester>,
    name: &str,
    version: &str,
) -> Result<ExtensionHandle, ExtensionError> {
    start_extension_with_sdk(config, registry, shutdown, name, version, MIN_SDK_VERSION)
}

pub fn start_extension_with_sdk(
    config: &ExtensionConfig,
    registry: Arc<PluginRegistry>,
    shutdown: Arc<dyn ShutdownRequester>,
    name: &str,
    version: &str,
    min_sdk_version: &str,
) -> Result<ExtensionHandle, ExtensionError> {
    let manager_path = config.extensions_socket.clone();

    // The broadcast must not include host-built-in plugins.
    registry.set_external();

    // The watcher only starts against a live manager: probe first so an
    // early tick cannot kill the process mid-bootstrap.
    extension_path_active(&manager_path, true, config.extensions_timeout)?;

    // If the manager dies, so should we.
    let watcher = ExtensionWatcher::new(
        manager_path.clone(),
        config.interval_ms(),
        true,
        Arc::clone(&shutdown),
    );
    let watcher = spawn_service("extension watcher", move |interrupt| watcher.run(interrupt));

    let started = register_and_serve(
        config,
        &registry,
        &shutdown,
        name,
        version,
        min_sdk_version,
    );
    match started {
        Ok((uuid, server)) => Ok(ExtensionHandle {
            uuid,
            watcher,
            server,
        }),
        Err(err) => {
            watcher.join();
            Err(err)
        }
    }
}

fn register_and_serve(
    config: &ExtensionConfig,
    registry: &Arc<PluginRegistry>,
    shutdown: &Arc<dyn ShutdownRequester>,
    name: &str,
    version: &str,
    min_sdk_version: &str,
) -> Result<(RouteUuid, ServerHandle), ExtensionError> {
    let manager_path = &config.extensions_socket;

    // Make sure the manager endpoint exists and answers, within the
    // autoload window.
    extension_path_active(manager_path, true, config.extensions_timeout)?;

    let info = ExtensionInfo {
        name: name.into(),
        version: version.into(),
        sdk_version: ARGUS_SDK_VERSION.into(),
        min_sdk_version: min_sdk_version.into(),
    };
    let broadcast = registry.get_broadcast();

    // Register and fetch options on one scoped client; the usual failure
    // here is a duplicate extension name already running.
    let mut client = ManagerClient::connect(manager_path)?;
    let status = client.register_extension(info, broadcast)?.into_result()?;
    let uuid = status.uuid;
    let options = client.options()?;
    drop(client);

    // Adopt the manager's active plugins; the manager arbitrates names
    // this extension does not carry locally.
    for (option, kind) in [
        ("config_plugin", "config"),
        ("logger_plugin", "logger"),
        ("distributed_plugin", "distributed"),
    ] {
        if let Some(value) = options.get(option) {
            registry.set_active(kind, &value.value);
        }
    }
    registry.set_up();

    // Now that the UUID is known, clean up a stale endpoint and serve.
    let own_path = extension_endpoint(manager_path, uuid);
    ensure_rebindable(&own_path)?;
    let runner = Arc::new(ExtensionRunnerContext::new(
        Arc::clone(registry),
        Arc::clone(shutdown),
    ));
    let server = start_server(&own_path, runner)?;

    tracing::info!(name, uuid, version, "Extension registered");
    Ok((uuid, server))
}
