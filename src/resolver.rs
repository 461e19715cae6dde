//! Module resolution: find the module that owns an import path
//!
//! The import path itself is the first candidate module path. Each not-found
//! answer strips the last path element and tries again, so
//! `example.com/foo/bar/baz` is looked up as `example.com/foo/bar/baz`,
//! `example.com/foo/bar`, `example.com/foo` and finally `example.com`.
//! Standard library paths skip the walk and go straight to `std`.

use std::sync::Arc;

use tracing::debug;

use crate::error::Error;
use crate::module::path::{self, STD_MODULE};
use crate::source::{ModuleInfo, Source, SourceList};

pub struct Resolver {
    sources: SourceList,
}

impl Resolver {
    pub fn new(sources: SourceList) -> Self {
        Self { sources }
    }

    /// Finds the module owning `import_path` at `version`.
    ///
    /// Only metadata lookups happen here; the module's files are opened by the caller.
    pub async fn resolve(
        &self,
        import_path: &str,
        version: &str,
    ) -> Result<(Arc<dyn Source>, ModuleInfo), Error> {
        if path::is_std_path(import_path) {
            return Ok(self.sources.find_module(STD_MODULE, version).await?);
        }

        let mut candidate = Some(import_path);
        while let Some(module_path) = candidate {
            match self.sources.find_module(module_path, version).await {
                Ok(found) => return Ok(found),
                Err(e) if e.is_not_found() => {
                    debug!("{} is not a module, trying parent", module_path);
                    candidate = path::parent(module_path);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::NotFound)
    }
}

/// Fails with [`Error::Mismatch`] when the module's go.mod declares a path
/// other than the one it was found under.
pub fn check_declared_path(info: &ModuleInfo) -> Result<(), Error> {
    match &info.declared_path {
        Some(declared) if info.module_path != STD_MODULE && *declared != info.module_path => {
            Err(Error::Mismatch {
                requested: info.module_path.clone(),
                actual: declared.clone(),
            })
        }
        _ => Ok(()),
    }
}
