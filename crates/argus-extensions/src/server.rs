//! RPC servers for the manager endpoint and per-extension endpoints.
//!
//! Each server is one listener thread accepting connections on a local
//! socket; connections are short-lived and served on their own threads,
//! one JSON frame per request. The manager context owns registration:
//! UUID assignment, duplicate rejection, the option bundle, and
//! deregistration teardown.

use crate::wire::{
    column_rows, ColumnType, ExtensionInfo, ExtensionList, ExtensionRequest, ExtensionResponse,
    ManagerRequest, OptionList, OptionValue,
};
use argus_core::error::{ExtensionCode, ExtensionError, ExtensionStatus, RouteUuid};
use argus_core::process::{ShutdownRequester, EXIT_CLEAN};
use argus_core::registry::PluginRegistry;
use argus_core::ExtensionConfig;
use interprocess::local_socket::{
    traits::ListenerExt, traits::Stream as _, GenericFilePath, Listener, ListenerOptions, Stream,
    ToFsName,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Where the manager's `query`/`get_query_columns` answers come from.
/// The SQL engine itself lives outside the supervision core.
pub trait QuerySource: Send + Sync {
    fn query(&self, sql: &str) -> Result<argus_core::PluginResponse, ExtensionError>;
    fn columns(&self, sql: &str) -> Result<Vec<(String, ColumnType)>, ExtensionError>;
}

/// A service that answers single-frame requests.
pub trait RpcService: Send + Sync + 'static {
    fn handle_line(&self, line: &str) -> String;
}

/// Shared state behind the manager endpoint.
pub struct ManagerContext {
    config: ExtensionConfig,
    registry: Arc<PluginRegistry>,
    query_source: Arc<dyn QuerySource>,
    extensions: Mutex<BTreeMap<RouteUuid, ExtensionInfo>>,
    // UUID 0 is reserved for the manager itself.
    next_uuid: AtomicU64,
}

impl ManagerContext {
    pub fn new(
        config: ExtensionConfig,
        registry: Arc<PluginRegistry>,
        query_source: Arc<dyn QuerySource>,
    ) -> Self {
        Self {
            config,
            registry,
            query_source,
            extensions: Mutex::new(BTreeMap::new()),
            next_uuid: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn manager_endpoint(&self) -> &str {
        &self.config.extensions_socket
    }

    /// Register an extension: assign a UUID, adopt its broadcast, record
    /// its identity. Duplicate names and duplicate registry items are
    /// rejected with the reserved code.
    pub fn register(&self, info: ExtensionInfo, broadcast: argus_core::Broadcast) -> ExtensionStatus {
        let mut extensions = self.extensions.lock();
        if extensions.values().any(|existing| existing.name == info.name) {
            return ExtensionStatus::new(
                ExtensionCode::Duplicate,
                format!("Duplicate extension registered: {}", info.name),
            );
        }

        let uuid = self.next_uuid.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.registry.add_broadcast(uuid, broadcast) {
            return err.to_status();
        }

        tracing::info!(
            name = %info.name,
            uuid,
            version = %info.version,
            sdk_version = %info.sdk_version,
            "Extension registered"
        );
        extensions.insert(uuid, info);
        ExtensionStatus::success().with_uuid(uuid)
    }

    /// Drop an extension's identity and revoke its routes atomically.
    pub fn deregister(&self, uuid: RouteUuid) {
        self.extensions.lock().remove(&uuid);
        self.registry.remove_broadcast(uuid);
    }

    /// Live extensions, manager excluded; callers inject the core route.
    pub fn extensions(&self) -> ExtensionList {
        self.extensions.lock().clone()
    }

    /// Option bundle a fresh extension adopts its active plugins from.
    pub fn options(&self) -> OptionList {
        let mut options = OptionList::new();
        for (option, registry, fallback) in [
            ("config_plugin", "config", "filesystem"),
            ("logger_plugin", "logger", "filesystem"),
            ("distributed_plugin", "distributed", "tls"),
        ] {
            let value = self
                .registry
                .get_active(registry)
                .unwrap_or_else(|| fallback.to_string());
            options.insert(
                option.to_string(),
                OptionValue {
                    value,
                    default_value: fallback.to_string(),
                },
            );
        }
        options
    }

    fn respond(&self, request: ManagerRequest) -> String {
        match request {
            ManagerRequest::Ping => encode(&ExtensionStatus::success()),
            ManagerRequest::RegisterExtension { info, registry } => {
                encode(&self.register(info, registry))
            }
            ManagerRequest::Options => encode(&self.options()),
            ManagerRequest::Extensions => encode(&self.extensions()),
            ManagerRequest::Query { sql } => match self.query_source.query(&sql) {
                Ok(rows) => encode(&ExtensionResponse::ok(rows)),
                Err(err) => encode(&ExtensionResponse::failed(err.to_status())),
            },
            ManagerRequest::GetQueryColumns { sql } => match self.query_source.columns(&sql) {
                Ok(columns) => encode(&ExtensionResponse::ok(column_rows(&columns))),
                Err(err) => encode(&ExtensionResponse::failed(err.to_status())),
            },
            ManagerRequest::Call {
                registry,
                item,
                request,
            } => match self.registry.call(&registry, &item, &request) {
                Ok(rows) => encode(&ExtensionResponse::ok(rows)),
                Err(err) => encode(&ExtensionResponse::failed(err.to_status())),
            },
        }
    }
}

impl RpcService for ManagerContext {
    fn handle_line(&self, line: &str) -> String {
        match serde_json::from_str::<ManagerRequest>(line) {
            Ok(request) => self.respond(request),
            Err(err) => encode(&ExtensionStatus::failure(format!("bad request frame: {err}"))),
        }
    }
}

/// State behind one extension's own endpoint.
pub struct ExtensionRunnerContext {
    registry: Arc<PluginRegistry>,
    shutdown: Arc<dyn ShutdownRequester>,
}

impl ExtensionRunnerContext {
    pub fn new(registry: Arc<PluginRegistry>, shutdown: Arc<dyn ShutdownRequester>) -> Self {
        Self { registry, shutdown }
    }
}

impl RpcService for ExtensionRunnerContext {
    fn handle_line(&self, line: &str) -> String {
        match serde_json::from_str::<ExtensionRequest>(line) {
            Ok(ExtensionRequest::Ping) => encode(&ExtensionStatus::success()),
            Ok(ExtensionRequest::Call {
                registry,
                item,
                request,
            }) => match self.registry.call(&registry, &item, &request) {
                Ok(rows) => encode(&ExtensionResponse::ok(rows)),
                Err(err) => encode(&ExtensionResponse::failed(err.to_status())),
            },
            Ok(ExtensionRequest::Shutdown) => {
                tracing::info!("Extension shutdown requested by manager");
                self.shutdown.request_shutdown(EXIT_CLEAN);
                encode(&ExtensionStatus::success())
            }
            Err(err) => encode(&ExtensionStatus::failure(format!("bad request frame: {err}"))),
        }
    }
}

fn encode<T: Serialize>(reply: &T) -> String {
    // Reply types are maps and structs of strings; serialization cannot
    // fail for well-formed replies.
    serde_json::to_string(reply).unwrap_or_else(|err| {
        format!(r#"{{"code":1,"message":"bad reply frame: {err}","uuid":0}}"#)
    })
}

/// Handle to a running endpoint server.
pub struct ServerHandle {
    addr: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting, drain the listener thread, and unlink the
    /// endpoint file.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Poke the accept loop awake so it observes the stop bit. If the
        // endpoint is already unreachable (stale file removed) the
        // listener cannot be woken; leave it parked rather than hang.
        let poked = self
            .addr
            .clone()
            .to_fs_name::<GenericFilePath>()
            .ok()
            .and_then(|name| Stream::connect(name).ok())
            .is_some();
        if let Some(thread) = self.thread.take() {
            if poked {
                let _ = thread.join();
            }
        }
        #[cfg(not(windows))]
        {
            let _ = std::fs::remove_file(&self.addr);
        }
    }
}

/// Bind `addr` and serve `service` until stopped.
///
/// The caller is expected to have run the rebind check; a bind failure
/// here is still surfaced as an endpoint error.
pub fn start_server(addr: &str, service: Arc<dyn RpcService>) -> Result<ServerHandle, ExtensionError> {
    let name = addr
        .to_fs_name::<GenericFilePath>()
        .map_err(|err| ExtensionError::Endpoint(format!("Bad endpoint address {addr}: {err}")))?;
    let listener = ListenerOptions::new().name(name).create_sync().map_err(|err| {
        ExtensionError::Endpoint(format!("Cannot bind extension endpoint {addr}: {err}"))
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = Arc::clone(&stop);
    let thread = thread::Builder::new()
        .name(format!("argus rpc {addr}"))
        .spawn(move || listener_loop(listener, service, loop_stop))
        .map_err(|err| ExtensionError::Endpoint(err.to_string()))?;

    tracing::debug!(addr, "Extension endpoint listening");
    Ok(ServerHandle {
        addr: addr.to_string(),
        stop,
        thread: Some(thread),
    })
}

fn listener_loop(listener: Listener, service: Arc<dyn RpcService>, stop: Arc<AtomicBool>) {
    for conn in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match conn {
            Ok(conn) => {
                let service = Arc::clone(&service);
                thread::spawn(move || serve_connection(conn, service));
            }
            Err(err) => {
                tracing::debug!(%err, "Endpoint accept failed");
            }
        }
    }
}

fn serve_connection(conn: Stream, service: Arc<dyn RpcService>) {
    let mut reader = BufReader::new(conn);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let mut reply = service.handle_line(line.trim_end());
                reply.push('\n');
                let stream = reader.get_mut();
                if stream
                    .write_all(reply.as_bytes())
                    .and_then(|_| stream.flush())
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}
