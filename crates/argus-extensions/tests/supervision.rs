//! End-to-end supervision tests against real endpoints.

#![cfg(unix)]

use argus_core::error::{ExtensionCode, ExtensionError};
use argus_core::process::ShutdownRequester;
use argus_core::registry::{Broadcast, PluginRegistry, PluginRequest, PluginResponse};
use argus_core::ExtensionConfig;
use argus_extensions::client::ManagerClient;
use argus_extensions::endpoint::extension_endpoint;
use argus_extensions::manager::{
    call_extension, get_extensions, get_query_columns_external, ping_extension, query_external,
    start_extension_manager,
};
use argus_extensions::server::{start_server, ExtensionRunnerContext, QuerySource};
use argus_extensions::wire::{ColumnType, ExtensionInfo};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct StaticRows;

impl QuerySource for StaticRows {
    fn query(&self, _sql: &str) -> Result<PluginResponse, ExtensionError> {
        let mut row = PluginRequest::new();
        row.insert("uptime".into(), "1234".into());
        Ok(vec![row])
    }

    fn columns(&self, _sql: &str) -> Result<Vec<(String, ColumnType)>, ExtensionError> {
        Ok(vec![
            ("uptime".into(), ColumnType::Bigint),
            ("hostname".into(), ColumnType::Text),
        ])
    }
}

struct IgnoreShutdown;

impl ShutdownRequester for IgnoreShutdown {
    fn request_shutdown(&self, _code: i32) {}
}

fn test_config(dir: &tempfile::TempDir) -> ExtensionConfig {
    ExtensionConfig {
        extensions_socket: dir.path().join("argus.em").to_string_lossy().into_owned(),
        extensions_timeout: 1,
        extensions_interval: 1,
        ..Default::default()
    }
}

fn probe_info(name: &str) -> ExtensionInfo {
    ExtensionInfo {
        name: name.into(),
        version: "1.0.0".into(),
        sdk_version: "0.3.0".into(),
        min_sdk_version: "0.0.0".into(),
    }
}

fn probe_broadcast(item: &str) -> Broadcast {
    let mut broadcast = Broadcast::new();
    broadcast.insert("table".into(), vec![item.into()]);
    broadcast
}

#[test]
fn register_list_and_query_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let registry = Arc::new(PluginRegistry::new());
    registry.set_active("config", "filesystem");
    registry.set_active("logger", "filesystem");

    let handle =
        start_extension_manager(&config, Arc::clone(&registry), Arc::new(StaticRows)).unwrap();

    // Registration over the wire, the way an extension does it.
    let mut client = ManagerClient::connect(&config.extensions_socket).unwrap();
    let status = client
        .register_extension(probe_info("probe-a"), probe_broadcast("probe_stats"))
        .unwrap();
    assert!(status.is_success());
    let uuid = status.uuid;
    assert!(uuid > 0);

    // Options mirror the manager's active plugin names.
    let options = client.options().unwrap();
    assert_eq!(options["config_plugin"].value, "filesystem");
    drop(client);

    // The listing injects UUID 0 as the host itself.
    let extensions = get_extensions(&config).unwrap();
    assert_eq!(extensions[&0].name, "core");
    assert_eq!(extensions[&uuid].name, "probe-a");

    // The façade's read paths ride the same endpoint.
    let rows = query_external(&config, "select * from uptime").unwrap();
    assert_eq!(rows[0]["uptime"], "1234");
    let columns = get_query_columns_external(&config, "select * from uptime").unwrap();
    assert_eq!(
        columns,
        vec![
            ("uptime".to_string(), ColumnType::Bigint),
            ("hostname".to_string(), ColumnType::Text),
        ]
    );

    let status = ping_extension(&config, &config.extensions_socket).unwrap();
    assert!(status.is_success());

    handle.shutdown();
}

#[test]
fn duplicate_name_gets_reserved_code_and_first_stays_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let handle = start_extension_manager(
        &config,
        Arc::new(PluginRegistry::new()),
        Arc::new(StaticRows),
    )
    .unwrap();

    let mut first = ManagerClient::connect(&config.extensions_socket).unwrap();
    let kept = first
        .register_extension(probe_info("probe-a"), probe_broadcast("probe_stats"))
        .unwrap();
    assert!(kept.is_success());

    let mut second = ManagerClient::connect(&config.extensions_socket).unwrap();
    let rejected = second
        .register_extension(probe_info("probe-a"), probe_broadcast("other_stats"))
        .unwrap();
    assert_eq!(rejected.code, ExtensionCode::Duplicate.as_i32());

    let extensions = get_extensions(&config).unwrap();
    assert_eq!(extensions.len(), 2); // core + probe-a
    assert_eq!(extensions[&kept.uuid].name, "probe-a");

    handle.shutdown();
}

#[test]
fn dead_extension_is_evicted_within_two_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let registry = Arc::new(PluginRegistry::new());
    let handle =
        start_extension_manager(&config, Arc::clone(&registry), Arc::new(StaticRows)).unwrap();

    let mut client = ManagerClient::connect(&config.extensions_socket).unwrap();
    let status = client
        .register_extension(probe_info("probe-a"), probe_broadcast("probe_stats"))
        .unwrap();
    let uuid = status.uuid;
    drop(client);

    // Bind the extension endpoint so the watcher sees a healthy peer.
    let own_path = extension_endpoint(&config.extensions_socket, uuid);
    let runner = Arc::new(ExtensionRunnerContext::new(
        Arc::new(PluginRegistry::new()),
        Arc::new(IgnoreShutdown),
    ));
    let server = start_server(&own_path, runner).unwrap();

    // Survives at least one watcher tick while the endpoint answers.
    std::thread::sleep(Duration::from_millis(1500));
    assert!(get_extensions(&config).unwrap().contains_key(&uuid));

    // Kill the endpoint; the watcher deregisters within two ticks.
    server.stop();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let extensions = get_extensions(&config).unwrap();
        if !extensions.contains_key(&uuid) {
            assert!(extensions.contains_key(&0));
            break;
        }
        assert!(
            Instant::now() < deadline,
            "extension was not deregistered within the eviction window"
        );
        std::thread::sleep(Duration::from_millis(100));
    }

    // Scenario: calling the deregistered route fails fast, not by hang.
    let started = Instant::now();
    let err = call_extension(&config, uuid, "table", "probe_stats", PluginRequest::new())
        .unwrap_err();
    assert!(matches!(
        err,
        ExtensionError::Endpoint(_) | ExtensionError::Transport(_)
    ));
    assert!(started.elapsed() < Duration::from_secs(config.extensions_timeout + 1));

    handle.shutdown();
}

#[test]
fn required_extension_that_never_appears_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.extensions_require = "probe-b".into();

    let started = Instant::now();
    let err = start_extension_manager(
        &config,
        Arc::new(PluginRegistry::new()),
        Arc::new(StaticRows),
    )
    .unwrap_err();

    assert_eq!(err.to_string(), "Extension not autoloaded: probe-b");
    assert_eq!(err.code(), 1);
    // Fails within the timeout window, give or take a tick.
    assert!(started.elapsed() < Duration::from_secs(config.extensions_timeout + 2));
}

#[test]
fn manager_call_reaches_local_registry_plugins() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let registry = Arc::new(PluginRegistry::new());
    registry
        .add_plugin(
            "table",
            "agent_info",
            Arc::new(|_request: &PluginRequest| {
                let mut row = PluginRequest::new();
                row.insert("pid".into(), std::process::id().to_string());
                Ok(vec![row])
            }),
        )
        .unwrap();

    let handle =
        start_extension_manager(&config, Arc::clone(&registry), Arc::new(StaticRows)).unwrap();

    let mut client = ManagerClient::connect(&config.extensions_socket).unwrap();
    let response = client
        .call("table", "agent_info", PluginRequest::new())
        .unwrap();
    assert!(response.status.is_success());
    assert!(response.response[0].contains_key("pid"));

    handle.shutdown();
}
