//! Shared kernel for the argus host agent.
//!
//! This crate carries everything both the agent daemon and extension
//! binaries need to agree on: the status/error model, runtime
//! configuration, the process-wide plugin registry, filesystem safety
//! primitives, and the process-control seams (child launcher, shutdown
//! requests) that the extension supervision layer is built on.

pub mod config;
pub mod error;
pub mod fs;
pub mod module;
pub mod process;
pub mod registry;

pub use config::ExtensionConfig;
pub use error::{ExtensionCode, ExtensionError, ExtensionStatus, RouteUuid};
pub use process::{ChildLauncher, ExtensionLauncher, ProcessShutdown, ShutdownRequester};
pub use registry::{Broadcast, PluginRegistry, PluginRequest, PluginResponse, Row};

/// Host agent version, reported for the reserved core route.
pub const ARGUS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// SDK version stamped into extension registrations.
pub const ARGUS_SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum SDK version the core route advertises.
pub const MIN_SDK_VERSION: &str = "0.0.0";
