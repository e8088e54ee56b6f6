//! Minimal extension binary: contributes one table plugin and runs
//! until the manager goes away.
//!
//! ```sh
//! cargo run --example probe_extension -- --socket /tmp/argus.em
//! ```

use argus_core::registry::PluginRequest;
use argus_core::{ExtensionConfig, PluginRegistry, ProcessShutdown};
use argus_extension_sdk::{start_extension, ExtensionArgs};
use clap::Parser;
use std::sync::Arc;

fn main() {
    let args = ExtensionArgs::parse();
    let config: ExtensionConfig = args.into_config();

    let registry = Arc::new(PluginRegistry::new());
    registry
        .add_plugin(
            "table",
            "probe_stats",
            Arc::new(|_request: &PluginRequest| {
                let mut row = PluginRequest::new();
                row.insert("pid".into(), std::process::id().to_string());
                row.insert("status".into(), "alive".into());
                Ok(vec![row])
            }),
        )
        .expect("fresh registry");

    let handle = start_extension(
        &config,
        registry,
        Arc::new(ProcessShutdown),
        "probe",
        env!("CARGO_PKG_VERSION"),
    )
    .unwrap_or_else(|err| {
        eprintln!("probe extension failed to start: {err}");
        std::process::exit(1);
    });

    eprintln!("probe extension registered with uuid {}", handle.uuid());
    handle.wait();
}
