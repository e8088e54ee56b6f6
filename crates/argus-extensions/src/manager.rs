//! Manager bootstrap and the host-side RPC façade.
//!
//! The bootstrap validates the manager endpoint, starts the manager
//! watcher and RPC server, and optionally gates startup on a list of
//! required extension names. The façade is what the rest of the host
//! calls to reach extensions; every operation is prefaced by a single
//! (non-timeout) endpoint-active probe and fails fast when extensions
//! are disabled by flag.

use crate::client::{ExtensionClient, ManagerClient};
use crate::dispatcher::{spawn_service, ServiceHandle};
use crate::endpoint::{ensure_rebindable, extension_endpoint};
use crate::probe::{apply_extension_delay, extension_path_active};
use crate::server::{start_server, ManagerContext, QuerySource, ServerHandle};
use crate::watcher::ExtensionManagerWatcher;
use crate::wire::{ColumnType, ExtensionInfo, ExtensionList, ExtensionResponse};
use argus_core::error::{ExtensionError, ExtensionStatus, RouteUuid};
use argus_core::registry::{PluginRegistry, PluginRequest, PluginResponse};
use argus_core::ExtensionConfig;
use std::sync::Arc;

/// A running extension manager: watcher, RPC server, shared context.
pub struct ExtensionManagerHandle {
    context: Arc<ManagerContext>,
    watcher: ServiceHandle,
    server: ServerHandle,
}

impl std::fmt::Debug for ExtensionManagerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionManagerHandle")
            .finish_non_exhaustive()
    }
}

impl ExtensionManagerHandle {
    pub fn context(&self) -> &Arc<ManagerContext> {
        &self.context
    }

    /// Coordinated shutdown: the watcher drains first so its farewell
    /// `shutdown` broadcast goes out before the RPC server tears down.
    pub fn shutdown(self) {
        self.watcher.join();
        self.server.stop();
    }

    /// Block until the watcher exits on its own; used by the daemon to
    /// park its main thread.
    pub fn wait(self) {
        self.watcher.wait();
        self.server.stop();
    }
}

/// Start the extension manager on the configured endpoint.
///
/// With a non-empty required-extensions list, startup blocks until every
/// named extension has registered and answered a ping; a name that never
/// appears fails startup and tears the manager back down.
pub fn start_extension_manager(
    config: &ExtensionConfig,
    registry: Arc<PluginRegistry>,
    query_source: Arc<dyn QuerySource>,
) -> Result<ExtensionManagerHandle, ExtensionError> {
    if config.disable_extensions {
        return Err(ExtensionError::Disabled);
    }

    ensure_rebindable(&config.extensions_socket)?;

    let context = Arc::new(ManagerContext::new(config.clone(), registry, query_source));
    let watcher = ExtensionManagerWatcher::new(
        Arc::clone(&context),
        config.interval_ms(),
        config.extensions_timeout,
    );
    let watcher = spawn_service("extension manager watcher", move |interrupt| {
        watcher.run(interrupt)
    });
    let server = match start_server(
        &config.extensions_socket,
        Arc::clone(&context) as Arc<dyn crate::server::RpcService>,
    ) {
        Ok(server) => server,
        Err(err) => {
            watcher.join();
            return Err(err);
        }
    };

    let handle = ExtensionManagerHandle {
        context,
        watcher,
        server,
    };

    if let Err(err) = wait_for_required_extensions(config) {
        tracing::warn!("{err}");
        handle.shutdown();
        return Err(err);
    }

    Ok(handle)
}

/// Gate startup on the configured required-extension names.
///
/// Each name may consume at most one autoload-timeout window: once any
/// name has waited out the window, later names get a single probe each.
fn wait_for_required_extensions(config: &ExtensionConfig) -> Result<(), ExtensionError> {
    let required = config.required_extensions();
    let mut waited = false;
    for name in required {
        let result = apply_extension_delay(config.extensions_timeout, |stop| {
            if let Ok(extensions) = get_extensions(config) {
                for (uuid, info) in &extensions {
                    if info.name == name {
                        let path = extension_endpoint(&config.extensions_socket, *uuid);
                        return ping_extension(config, &path)
                            .and_then(ExtensionStatus::into_result)
                            .map(|_| ());
                    }
                }
            }

            if waited {
                // The timeout window has already been spent once.
                *stop = true;
            }
            Err(ExtensionError::Config(format!(
                "Extension not autoloaded: {name}"
            )))
        });
        waited = true;
        result?;
    }
    Ok(())
}

/// Ping the service at `path`, returning the peer's status verbatim.
pub fn ping_extension(
    config: &ExtensionConfig,
    path: &str,
) -> Result<ExtensionStatus, ExtensionError> {
    if config.disable_extensions {
        return Err(ExtensionError::Disabled);
    }
    extension_path_active(path, false, config.extensions_timeout)?;
    ExtensionClient::connect(path)?.ping()
}

/// Run `sql` through the manager at the configured endpoint.
pub fn query_external(
    config: &ExtensionConfig,
    sql: &str,
) -> Result<PluginResponse, ExtensionError> {
    query_external_at(config, &config.extensions_socket, sql)
}

pub fn query_external_at(
    config: &ExtensionConfig,
    manager_path: &str,
    sql: &str,
) -> Result<PluginResponse, ExtensionError> {
    if config.disable_extensions {
        return Err(ExtensionError::Disabled);
    }
    extension_path_active(manager_path, false, config.extensions_timeout)?;
    let response = ManagerClient::connect(manager_path)?.query(sql)?;
    collect_response(response)
}

/// Fetch the ordered column layout `sql` would produce.
pub fn get_query_columns_external(
    config: &ExtensionConfig,
    sql: &str,
) -> Result<Vec<(String, ColumnType)>, ExtensionError> {
    get_query_columns_external_at(config, &config.extensions_socket, sql)
}

pub fn get_query_columns_external_at(
    config: &ExtensionConfig,
    manager_path: &str,
    sql: &str,
) -> Result<Vec<(String, ColumnType)>, ExtensionError> {
    if config.disable_extensions {
        return Err(ExtensionError::Disabled);
    }
    extension_path_active(manager_path, false, config.extensions_timeout)?;
    let response = ManagerClient::connect(manager_path)?.get_query_columns(sql)?;
    let rows = collect_response(response)?;
    Ok(crate::wire::columns_from_rows(&rows))
}

/// List live extensions, with UUID 0 injected as the host itself.
pub fn get_extensions(config: &ExtensionConfig) -> Result<ExtensionList, ExtensionError> {
    get_extensions_at(config, &config.extensions_socket)
}

pub fn get_extensions_at(
    config: &ExtensionConfig,
    manager_path: &str,
) -> Result<ExtensionList, ExtensionError> {
    if config.disable_extensions {
        return Err(ExtensionError::Disabled);
    }
    extension_path_active(manager_path, false, config.extensions_timeout)?;
    let listed = ManagerClient::connect(manager_path)?.extensions()?;

    let mut extensions = ExtensionList::new();
    extensions.insert(0, ExtensionInfo::core());
    extensions.extend(listed);
    Ok(extensions)
}

/// Call a plugin item on the extension registered under `uuid`.
pub fn call_extension(
    config: &ExtensionConfig,
    uuid: RouteUuid,
    registry: &str,
    item: &str,
    request: PluginRequest,
) -> Result<PluginResponse, ExtensionError> {
    let path = extension_endpoint(&config.extensions_socket, uuid);
    call_extension_at(config, &path, registry, item, request)
}

pub fn call_extension_at(
    config: &ExtensionConfig,
    extension_path: &str,
    registry: &str,
    item: &str,
    request: PluginRequest,
) -> Result<PluginResponse, ExtensionError> {
    if config.disable_extensions {
        return Err(ExtensionError::Disabled);
    }
    extension_path_active(extension_path, false, config.extensions_timeout)?;
    let response = ExtensionClient::connect(extension_path)?.call(registry, item, request)?;
    collect_response(response)
}

fn collect_response(response: ExtensionResponse) -> Result<PluginResponse, ExtensionError> {
    response.status.into_result()?;
    Ok(response.response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_extensions_fail_fast_everywhere() {
        let config = ExtensionConfig {
            disable_extensions: true,
            ..Default::default()
        };
        assert!(matches!(
            get_extensions(&config),
            Err(ExtensionError::Disabled)
        ));
        assert!(matches!(
            ping_extension(&config, "/tmp/argus.em"),
            Err(ExtensionError::Disabled)
        ));
        assert!(matches!(
            call_extension(&config, 42, "table", "users", PluginRequest::new()),
            Err(ExtensionError::Disabled)
        ));
        assert!(matches!(
            start_extension_manager(
                &config,
                Arc::new(PluginRegistry::new()),
                Arc::new(NoQueries),
            ),
            Err(ExtensionError::Disabled)
        ));
    }

    struct NoQueries;

    impl QuerySource for NoQueries {
        fn query(&self, _sql: &str) -> Result<PluginResponse, ExtensionError> {
            Ok(Vec::new())
        }

        fn columns(&self, _sql: &str) -> Result<Vec<(String, ColumnType)>, ExtensionError> {
            Ok(Vec::new())
        }
    }
}
