//! Liveness watchers.
//!
//! Each side of the protocol runs one: the extension-side watcher pings
//! the manager and terminates its own process when the manager is gone;
//! the manager-side watcher pings every registered extension, counts
//! failures against a two-strike ledger, and deregisters peers that stay
//! unresponsive. Neither holds a connection between ticks.

use crate::client::{ExtensionClient, ManagerClient};
use crate::dispatcher::InterruptPoint;
use crate::endpoint::extension_endpoint;
use crate::probe::extension_path_active;
use crate::server::ManagerContext;
use argus_core::error::RouteUuid;
use argus_core::process::{ShutdownRequester, EXIT_CLEAN, EXIT_FATAL};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Two-strike probe ledger entry.
///
/// `NeverProbed` marks a peer the watcher has not reached yet; it gets
/// one slow, timeout-bounded probe instead of an immediate failure.
/// Every probed peer starts its tick at `Healthy`; any failure within
/// the tick moves it to `OneStrike`, and a peer still on a strike when
/// the tick ends is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeHealth {
    NeverProbed,
    Healthy,
    OneStrike,
}

/// Extension-side watcher: ping the manager, die with it.
pub struct ExtensionWatcher {
    manager_endpoint: String,
    interval_ms: u64,
    fatal_on_bad_status: bool,
    shutdown: Arc<dyn ShutdownRequester>,
}

impl ExtensionWatcher {
    pub fn new(
        manager_endpoint: impl Into<String>,
        interval_ms: u64,
        fatal_on_bad_status: bool,
        shutdown: Arc<dyn ShutdownRequester>,
    ) -> Self {
        Self {
            manager_endpoint: manager_endpoint.into(),
            interval_ms,
            fatal_on_bad_status,
            shutdown,
        }
    }

    /// Watch until interrupted or until a shutdown has been requested.
    pub fn run(self, interrupt: &mut InterruptPoint) {
        loop {
            if !self.watch() {
                break;
            }
            if interrupt.pause(self.interval_ms) {
                break;
            }
        }
    }

    /// One tick. Returns false once process shutdown has been requested.
    fn watch(&self) -> bool {
        #[cfg(windows)]
        let status = if crate::endpoint::named_pipe_exists(&self.manager_endpoint) {
            Some(argus_core::error::ExtensionStatus::success())
        } else {
            None
        };

        #[cfg(not(windows))]
        let status = {
            use std::path::Path;
            if argus_core::fs::is_writable(Path::new(&self.manager_endpoint)) {
                ManagerClient::connect(&self.manager_endpoint)
                    .and_then(|mut client| client.ping())
                    .ok()
            } else {
                // The previously writable manager endpoint is unusable.
                None
            }
        };

        let Some(status) = status else {
            tracing::info!("Extension watcher ending: core has gone away");
            self.shutdown.request_shutdown(EXIT_CLEAN);
            return false;
        };

        if !status.is_success() && self.fatal_on_bad_status {
            // The core is reachable but told us to stop trusting it.
            self.shutdown.request_shutdown(EXIT_FATAL);
            return false;
        }
        true
    }
}

/// Manager-side watcher: probe every registered extension each tick and
/// evict peers that keep failing.
pub struct ExtensionManagerWatcher {
    context: Arc<ManagerContext>,
    interval_ms: u64,
    timeout_secs: u64,
    failures: BTreeMap<RouteUuid, ProbeHealth>,
}

impl ExtensionManagerWatcher {
    pub fn new(context: Arc<ManagerContext>, interval_ms: u64, timeout_secs: u64) -> Self {
        Self {
            context,
            interval_ms,
            timeout_secs,
            failures: BTreeMap::new(),
        }
    }

    /// Watch until interrupted, then ask every live extension to shut
    /// down. Transport errors during the farewell are swallowed; the
    /// ledger is not touched on shutdown.
    pub fn run(mut self, interrupt: &mut InterruptPoint) {
        loop {
            self.watch();
            if interrupt.pause(self.interval_ms) {
                break;
            }
        }

        for uuid in self.context.registry().route_uuids() {
            let path = extension_endpoint(self.context.manager_endpoint(), uuid);
            let farewell =
                ExtensionClient::connect(&path).and_then(|mut client| client.shutdown());
            if farewell.is_err() {
                tracing::debug!(uuid, "Extension shutdown request failed");
            }
        }
    }

    /// One tick over the current UUID snapshot.
    pub fn watch(&mut self) {
        let uuids = self.context.registry().route_uuids();
        // Ledger entries live and die with the identity records.
        self.failures.retain(|uuid, _| uuids.contains(uuid));

        for uuid in uuids {
            let path = extension_endpoint(self.context.manager_endpoint(), uuid);
            // A UUID enters the ledger as never-probed.
            let health = self
                .failures
                .entry(uuid)
                .or_insert(ProbeHealth::NeverProbed);

            let mut reachable = endpoint_reachable(&path);
            if !reachable && *health == ProbeHealth::NeverProbed {
                // A just-forked extension may not have bound its endpoint
                // yet; give it the autoload window once.
                tracing::debug!(uuid, "Extension initial check failed");
                reachable = extension_path_active(&path, true, self.timeout_secs).is_ok();
            }

            // Each probed peer starts the tick healthy; failures below
            // add the single strike that evicts it at tick end.
            *health = ProbeHealth::Healthy;

            if !reachable {
                *health = ProbeHealth::OneStrike;
                continue;
            }

            match ExtensionClient::connect(&path).and_then(|mut client| client.ping()) {
                Err(_) => {
                    *health = ProbeHealth::OneStrike;
                }
                Ok(status) if !status.is_success() => {
                    tracing::info!(uuid, "Extension ping failed");
                    *health = ProbeHealth::OneStrike;
                }
                Ok(_) => {}
            }
        }

        for (uuid, health) in self.failures.iter_mut() {
            if *health == ProbeHealth::OneStrike {
                tracing::info!(uuid = *uuid, "Extension has gone away");
                self.context.deregister(*uuid);
                *health = ProbeHealth::Healthy;
            }
        }
    }

}

#[cfg(windows)]
fn endpoint_reachable(path: &str) -> bool {
    crate::endpoint::named_pipe_exists(path)
}

#[cfg(not(windows))]
fn endpoint_reachable(path: &str) -> bool {
    argus_core::fs::is_writable(std::path::Path::new(path))
}
