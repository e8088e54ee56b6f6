//! In-process registry module loader.
//!
//! Modules are native shared objects (`.so`/`.dylib`/`.dll`) that export
//! an `argus_module_init` entry point. The library handle is kept alive
//! for the life of the owning registry; module symbols keep pointing into
//! it after init returns.

use crate::error::ExtensionError;
use libloading::{Library, Symbol};
use std::path::Path;

/// Symbol every registry module must export.
pub const MODULE_INIT_SYMBOL: &[u8] = b"argus_module_init";

type ModuleInitFn = unsafe extern "C" fn() -> i32;

/// A module that initialized successfully.
pub struct LoadedModule {
    _library: Library,
}

impl LoadedModule {
    /// Load the shared object at `path` and run its init entry point.
    pub fn init(path: &Path) -> Result<Self, ExtensionError> {
        // SAFETY: the path has passed autoload vetting; the module contract
        // requires `argus_module_init` to be safe to call exactly once.
        unsafe {
            let library = Library::new(path).map_err(|err| {
                ExtensionError::Autoload(format!(
                    "Failed to load module {}: {err}",
                    path.display()
                ))
            })?;
            let init: Symbol<ModuleInitFn> =
                library.get(MODULE_INIT_SYMBOL).map_err(|err| {
                    ExtensionError::Autoload(format!(
                        "Module {} has no init entry point: {err}",
                        path.display()
                    ))
                })?;
            if init() != 0 {
                return Err(ExtensionError::Autoload(format!(
                    "Module {} failed to initialize",
                    path.display()
                )));
            }
            Ok(Self { _library: library })
        }
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule").finish_non_exhaustive()
    }
}
