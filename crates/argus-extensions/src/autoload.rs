//! Autoload vetting.
//!
//! A loadfile is newline-delimited candidate paths. Each surviving line
//! is either an extension binary handed to the child-process launcher or
//! a registry module loaded in-process; everything else is logged and
//! skipped. Reading the loadfile itself is best-effort.

use argus_core::error::ExtensionError;
use argus_core::fs;
use argus_core::process::ExtensionLauncher;
use argus_core::registry::PluginRegistry;
use argus_core::ExtensionConfig;
use std::path::{Path, PathBuf};

/// What a loadfile entry is expected to be, which fixes its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoloadKind {
    /// A separately compiled extension binary.
    Extension,
    /// An in-process loadable registry module.
    Module,
}

impl AutoloadKind {
    fn label(self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::Module => "module",
        }
    }

    /// Required file suffix on the current platform.
    pub fn required_suffix(self) -> &'static str {
        match self {
            Self::Extension => {
                if cfg!(windows) {
                    "exe"
                } else {
                    "ext"
                }
            }
            Self::Module => {
                if cfg!(windows) {
                    "dll"
                } else if cfg!(target_os = "macos") {
                    "dylib"
                } else {
                    "so"
                }
            }
        }
    }
}

/// Strip surrounding whitespace and drop blanks and comments.
/// Idempotent: sanitizing an already sanitized line is a no-op.
pub fn sanitize_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        return None;
    }
    Some(line)
}

/// Run a loadfile line through the full vetting pipeline. Survivors come
/// back canonicalized.
pub fn is_file_safe(line: &str, kind: AutoloadKind) -> Option<PathBuf> {
    let line = sanitize_line(line)?;
    let path = Path::new(line);

    if fs::is_directory(path) {
        tracing::debug!(kind = kind.label(), path = line, "Cannot autoload from directory");
        return None;
    }

    // Only autoload files which were safe at the time of discovery: a
    // binary in a directory others can write to can be swapped before
    // the launcher gets to it.
    let parent_safe = path.parent().is_some_and(fs::safe_permissions);
    if !parent_safe {
        tracing::warn!(
            kind = kind.label(),
            path = line,
            "Will not autoload with unsafe directory permissions"
        );
        return None;
    }

    let Ok(path) = fs::canonicalize(path) else {
        tracing::debug!(kind = kind.label(), path = line, "Cannot resolve autoload path");
        return None;
    };

    let suffix = kind.required_suffix();
    if path.extension().and_then(|ext| ext.to_str()) != Some(suffix) {
        tracing::warn!(
            kind = kind.label(),
            path = %path.display(),
            "Will not autoload without the '.{suffix}' suffix"
        );
        return None;
    }

    tracing::debug!(kind = kind.label(), path = %path.display(), "Found autoloadable candidate");
    Some(path)
}

/// Vet the extension loadfile and hand survivors to the launcher.
///
/// The shell-only single-extension flag is honored first and bypasses
/// the safety check entirely.
pub fn load_extensions(
    config: &ExtensionConfig,
    launcher: &dyn ExtensionLauncher,
) -> Result<(), ExtensionError> {
    if !config.extension.is_empty() {
        // Developer workflow: a single unvetted path. Unsafe on purpose.
        launcher.add_extension_path(Path::new(&config.extension));
    }

    let content = fs::read_file(&config.extensions_autoload).map_err(|_| {
        ExtensionError::Autoload(format!(
            "Failed reading: {}",
            config.extensions_autoload.display()
        ))
    })?;
    for line in content.lines() {
        if let Some(path) = is_file_safe(line, AutoloadKind::Extension) {
            // The launcher becomes responsible for forking and executing
            // the binary once the manager endpoint is up.
            launcher.add_extension_path(&path);
        }
    }
    Ok(())
}

/// Vet the module loadfile and load survivors in-process.
///
/// Blank lines and comments are skipped silently; any rejected or
/// unloadable candidate turns the aggregate into a failure.
pub fn load_modules(
    config: &ExtensionConfig,
    registry: &PluginRegistry,
) -> Result<(), ExtensionError> {
    let content = fs::read_file(&config.modules_autoload).map_err(|_| {
        ExtensionError::Autoload(format!(
            "Failed reading: {}",
            config.modules_autoload.display()
        ))
    })?;

    let mut all_loaded = true;
    for line in content.lines() {
        if sanitize_line(line).is_none() {
            continue;
        }
        match is_file_safe(line, AutoloadKind::Module) {
            Some(path) => {
                if let Err(err) = registry.load_module(&path) {
                    tracing::warn!(%err, "Module failed to load");
                    all_loaded = false;
                }
            }
            None => all_loaded = false,
        }
    }

    if all_loaded {
        Ok(())
    } else {
        Err(ExtensionError::Autoload(
            "One or more modules failed to load".into(),
        ))
    }
}

/// Best-effort extension autoload at daemon startup.
pub fn autoload_extensions(config: &ExtensionConfig, launcher: &dyn ExtensionLauncher) {
    if config.disable_extensions {
        return;
    }
    if let Err(err) = load_extensions(config, launcher) {
        tracing::debug!(%err, "Could not autoload extensions");
    }
}

/// Best-effort module autoload at daemon startup.
pub fn autoload_modules(config: &ExtensionConfig, registry: &PluginRegistry) {
    if cfg!(windows) {
        tracing::debug!("This platform does not support loadable modules");
        return;
    }
    if let Err(err) = load_modules(config, registry) {
        tracing::debug!(%err, "Could not autoload modules");
    }
}
