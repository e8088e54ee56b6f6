//! Extension supervision core for the argus host agent.
//!
//! Third-party extensions are separately compiled binaries that register
//! with the long-running agent (the "extension manager") over a local
//! IPC endpoint, contribute entries to the shared plugin registry, and
//! are invoked transparently by the host as if their capabilities were
//! built in. This crate owns the liveness and lifecycle protocol between
//! the two sides:
//!
//! - endpoint validation, creation and cleanup across UNIX-socket and
//!   named-pipe semantics ([`endpoint`]);
//! - the bounded-wait prober behind every "block until responsive"
//!   caller ([`probe`]);
//! - the autoload pipeline that vets loadfiles of candidate binaries
//!   ([`autoload`]);
//! - periodic watchers on both sides of the protocol ([`watcher`]);
//! - the manager bootstrap, required-extension gate, and the host-side
//!   RPC façade ([`manager`]).
//!
//! The IPC transport is a synchronous request/reply protocol over local
//! sockets; clients are scoped to a single call so transport failures
//! surface exactly where they happen.

pub mod autoload;
pub mod client;
pub mod dispatcher;
pub mod endpoint;
pub mod manager;
pub mod probe;
pub mod server;
pub mod watcher;
pub mod wire;

pub use client::{ExtensionClient, ManagerClient};
pub use dispatcher::{InterruptPoint, ServiceHandle};
pub use manager::{start_extension_manager, ExtensionManagerHandle};
pub use server::{ExtensionRunnerContext, ManagerContext, QuerySource, ServerHandle};
pub use watcher::{ExtensionManagerWatcher, ExtensionWatcher, ProbeHealth};
pub use wire::{ColumnType, ExtensionInfo, ExtensionList, ExtensionResponse, OptionList};
