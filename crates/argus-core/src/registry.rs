//! Process-wide plugin registry.
//!
//! The registry is a name → implementation table grouped into registry
//! kinds (`table`, `logger`, `config`, `distributed`, ...). The agent
//! daemon fills it with built-in plugins; an extension process fills it
//! with its own contributions and exports them as a [`Broadcast`] at
//! registration. On the manager side, accepted broadcasts are merged in
//! as external routes and revoked atomically by UUID when the extension
//! is deregistered.
//!
//! The registry is deliberately an injected `Arc<PluginRegistry>` rather
//! than a process global so the supervision layer can be exercised
//! against a scratch instance.

use crate::error::{ExtensionCode, ExtensionError, RouteUuid};
use crate::module::LoadedModule;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A single result row; ordered keys keep wire output deterministic.
pub type Row = BTreeMap<String, String>;

/// Request map handed to a plugin call.
pub type PluginRequest = Row;

/// Rows returned from a plugin call.
pub type PluginResponse = Vec<Row>;

/// Serialized export of a registry: registry kind → item names.
pub type Broadcast = BTreeMap<String, Vec<String>>;

/// Callable behind a registered item.
pub type PluginHandler =
    Arc<dyn Fn(&PluginRequest) -> Result<PluginResponse, ExtensionError> + Send + Sync>;

struct RegistryItem {
    handler: PluginHandler,
    /// Host-built-in plugins are never part of an external registry's
    /// broadcast.
    internal: bool,
}

#[derive(Default)]
struct RegistryInner {
    external: bool,
    set_up: bool,
    tables: BTreeMap<String, BTreeMap<String, RegistryItem>>,
    active: BTreeMap<String, String>,
    routes: BTreeMap<RouteUuid, Broadcast>,
    modules: Vec<LoadedModule>,
}

#[derive(Default)]
pub struct PluginRegistry {
    inner: RwLock<RegistryInner>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark this registry as living inside an extension process: from now
    /// on a broadcast must not include host-built-in plugins.
    pub fn set_external(&self) {
        self.inner.write().external = true;
    }

    pub fn is_external(&self) -> bool {
        self.inner.read().external
    }

    /// Register a plugin implementation under `registry`/`item`.
    pub fn add_plugin(
        &self,
        registry: &str,
        item: &str,
        handler: PluginHandler,
    ) -> Result<(), ExtensionError> {
        self.insert_item(registry, item, handler, false)
    }

    /// Register a host-built-in plugin. Built-ins behave like any other
    /// item locally but are excluded from an external broadcast.
    pub fn add_builtin_plugin(
        &self,
        registry: &str,
        item: &str,
        handler: PluginHandler,
    ) -> Result<(), ExtensionError> {
        self.insert_item(registry, item, handler, true)
    }

    fn insert_item(
        &self,
        registry: &str,
        item: &str,
        handler: PluginHandler,
        internal: bool,
    ) -> Result<(), ExtensionError> {
        let mut inner = self.inner.write();
        let table = inner.tables.entry(registry.to_string()).or_default();
        if table.contains_key(item) {
            return Err(ExtensionError::Protocol {
                code: ExtensionCode::Duplicate.as_i32(),
                message: format!("Duplicate registry item: {registry}/{item}"),
            });
        }
        table.insert(item.to_string(), RegistryItem { handler, internal });
        Ok(())
    }

    /// Export this registry for registration with a manager.
    pub fn get_broadcast(&self) -> Broadcast {
        let inner = self.inner.read();
        let mut broadcast = Broadcast::new();
        for (registry, table) in &inner.tables {
            let items: Vec<String> = table
                .iter()
                .filter(|(_, item)| !(inner.external && item.internal))
                .map(|(name, _)| name.clone())
                .collect();
            if !items.is_empty() {
                broadcast.insert(registry.clone(), items);
            }
        }
        broadcast
    }

    /// Accept an extension's broadcast as live routes.
    ///
    /// Rejects any item that collides with a local plugin or with another
    /// live route; on rejection nothing is merged.
    pub fn add_broadcast(
        &self,
        uuid: RouteUuid,
        broadcast: Broadcast,
    ) -> Result<(), ExtensionError> {
        let mut inner = self.inner.write();
        for (registry, items) in &broadcast {
            for item in items {
                let local = inner
                    .tables
                    .get(registry.as_str())
                    .is_some_and(|table| table.contains_key(item));
                let routed = inner.routes.values().any(|other| {
                    other
                        .get(registry.as_str())
                        .is_some_and(|items| items.contains(item))
                });
                if local || routed {
                    return Err(ExtensionError::Protocol {
                        code: ExtensionCode::Duplicate.as_i32(),
                        message: format!("Duplicate registry item registered: {registry}/{item}"),
                    });
                }
            }
        }
        inner.routes.insert(uuid, broadcast);
        Ok(())
    }

    /// Revoke every route contributed by `uuid`.
    pub fn remove_broadcast(&self, uuid: RouteUuid) {
        if self.inner.write().routes.remove(&uuid).is_some() {
            tracing::info!(uuid, "Removed extension routes");
        }
    }

    /// Snapshot of the UUIDs with live routes.
    pub fn route_uuids(&self) -> Vec<RouteUuid> {
        self.inner.read().routes.keys().copied().collect()
    }

    /// Name the active plugin for a registry kind.
    ///
    /// The name is adopted verbatim even when no local item matches: the
    /// manager arbitrates plugins an extension does not carry itself.
    pub fn set_active(&self, registry: &str, item: &str) {
        self.inner
            .write()
            .active
            .insert(registry.to_string(), item.to_string());
    }

    pub fn get_active(&self, registry: &str) -> Option<String> {
        self.inner.read().active.get(registry).cloned()
    }

    /// Initialize lazy plugins and the active config/logger selections.
    pub fn set_up(&self) {
        let mut inner = self.inner.write();
        inner.set_up = true;
        tracing::debug!(
            active = ?inner.active,
            "Registry setup complete"
        );
    }

    pub fn is_set_up(&self) -> bool {
        self.inner.read().set_up
    }

    /// Invoke a local plugin item.
    pub fn call(
        &self,
        registry: &str,
        item: &str,
        request: &PluginRequest,
    ) -> Result<PluginResponse, ExtensionError> {
        let handler = {
            let inner = self.inner.read();
            inner
                .tables
                .get(registry)
                .and_then(|table| table.get(item))
                .map(|entry| Arc::clone(&entry.handler))
        };
        match handler {
            Some(handler) => handler(request),
            None => Err(ExtensionError::Protocol {
                code: ExtensionCode::Failed.as_i32(),
                message: format!("Unknown registry item: {registry}/{item}"),
            }),
        }
    }

    /// Load a registry module from a vetted shared-object path, keeping
    /// the library resident for the life of the registry.
    pub fn load_module(&self, path: &Path) -> Result<(), ExtensionError> {
        let module = LoadedModule::init(path)?;
        tracing::debug!(path = %path.display(), "Registry module loaded");
        self.inner.write().modules.push(module);
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_handler() -> PluginHandler {
        Arc::new(|request: &PluginRequest| Ok(vec![request.clone()]))
    }

    #[test]
    fn external_broadcast_excludes_host_builtins() {
        let registry = PluginRegistry::new();
        registry
            .add_builtin_plugin("table", "processes", echo_handler())
            .unwrap();
        registry.add_plugin("table", "probe_stats", echo_handler()).unwrap();

        // A host registry broadcasts everything it has.
        assert_eq!(
            registry.get_broadcast()["table"],
            vec!["probe_stats".to_string(), "processes".to_string()]
        );

        // An extension registry must not leak host builtins.
        assert!(!registry.is_external());
        registry.set_external();
        assert!(registry.is_external());
        assert_eq!(
            registry.get_broadcast()["table"],
            vec!["probe_stats".to_string()]
        );
    }

    #[test]
    fn duplicate_broadcast_item_is_rejected_atomically() {
        let registry = PluginRegistry::new();
        registry.add_plugin("table", "processes", echo_handler()).unwrap();

        let mut broadcast = Broadcast::new();
        broadcast.insert("table".into(), vec!["processes".into(), "other".into()]);
        let err = registry.add_broadcast(7, broadcast).unwrap_err();
        assert_eq!(err.code(), ExtensionCode::Duplicate.as_i32());
        assert!(registry.route_uuids().is_empty());
    }

    #[test]
    fn remove_broadcast_revokes_all_routes_for_uuid() {
        let registry = PluginRegistry::new();
        let mut broadcast = Broadcast::new();
        broadcast.insert("table".into(), vec!["probe_stats".into()]);
        registry.add_broadcast(42, broadcast).unwrap();
        assert_eq!(registry.route_uuids(), vec![42]);

        registry.remove_broadcast(42);
        assert!(registry.route_uuids().is_empty());

        // A second revocation is a no-op.
        registry.remove_broadcast(42);
    }

    #[test]
    fn call_routes_to_registered_handler() {
        let registry = PluginRegistry::new();
        registry.add_plugin("table", "probe_stats", echo_handler()).unwrap();

        let mut request = PluginRequest::new();
        request.insert("action".into(), "generate".into());
        let response = registry.call("table", "probe_stats", &request).unwrap();
        assert_eq!(response, vec![request]);

        let err = registry.call("table", "missing", &PluginRequest::new()).unwrap_err();
        assert_eq!(err.code(), ExtensionCode::Failed.as_i32());
    }

    #[test]
    fn active_plugin_names_are_adopted_verbatim() {
        let registry = PluginRegistry::new();
        registry.set_active("config", "filesystem");
        registry.set_active("logger", "tls");
        assert_eq!(registry.get_active("config").as_deref(), Some("filesystem"));
        assert_eq!(registry.get_active("logger").as_deref(), Some("tls"));
        assert_eq!(registry.get_active("distributed"), None);

        registry.set_up();
        assert!(registry.is_set_up());
    }
}
