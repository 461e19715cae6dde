//! Module sources: backends that turn a module path and version into file contents
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Resolver   │────▶│ SourceList  │────▶│   Source    │
//! │ (path walk) │     │ (in order)  │     │ (one of ↓)  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                    ┌──────────┬────────────────┼──────────┐
//!                    ▼          ▼                ▼          ▼
//!                  proxy     modcache         stdlib      local
//!                  (zip)     (dir/zip)        (git)       (dir)
//! ```
//!
//! # Modules
//!
//! - [`tree`]: `FileTree` views over zips, directories, git trees and memory
//! - [`gomod`]: go.mod module directive and deprecation parsing
//! - [`proxy`]: module proxy protocol client
//! - [`modcache`]: on-disk module download cache reader
//! - [`stdlib`]: standard library served from a git checkout of the Go repository
//! - [`local`]: a plain directory served as one module

pub mod gomod;
pub mod local;
pub mod modcache;
pub mod proxy;
pub mod stdlib;
pub mod tree;

use std::sync::Arc;

use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;
use crate::module::version;

pub use local::LocalSource;
pub use modcache::ModCacheSource;
pub use proxy::ProxySource;
pub use stdlib::StdlibSource;
pub use tree::{DirTree, FileTree, GitTree, MemoryTree, ZipTree};

/// Metadata a source reports for one module version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// The path this source answered for
    pub module_path: String,
    /// The path declared by the module's go.mod, when known
    pub declared_path: Option<String>,
    /// Resolved version
    pub version: String,
    /// Every version the source knows, newest first
    pub versions: Vec<String>,
    pub commit_time: DateTime<Utc>,
    /// Deprecation message of the latest version
    pub deprecated: Option<String>,
}

/// `.info` document of the module proxy protocol, also stored in the module cache.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,
}

/// Trait for resolving modules and retrieving their files
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Resolves a module version
    ///
    /// # Arguments
    /// * `module_path` - Candidate module path
    /// * `version` - A semantic version, or `latest`
    ///
    /// # Returns
    /// * `Err(SourceError::NotFound)` - The path is not a module in this source
    async fn module(&self, module_path: &str, version: &str) -> Result<ModuleInfo, SourceError>;

    /// Opens the file tree of a resolved module version
    async fn files(&self, info: &ModuleInfo) -> Result<Box<dyn FileTree>, SourceError>;
}

/// Sources tried in order; the first that knows the module wins.
#[derive(Clone, Default)]
pub struct SourceList {
    sources: Vec<Arc<dyn Source>>,
}

impl SourceList {
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        Self { sources }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Tries each source in turn. Not-found falls through to the next source;
    /// any other error aborts the lookup.
    pub async fn find_module(
        &self,
        module_path: &str,
        version: &str,
    ) -> Result<(Arc<dyn Source>, ModuleInfo), SourceError> {
        for source in &self.sources {
            match source.module(module_path, version).await {
                Ok(mut info) => {
                    version::sort_descending(&mut info.versions);
                    debug!(
                        "{} resolved {}@{} to {}",
                        source.name(),
                        module_path,
                        version,
                        info.version
                    );
                    return Ok((Arc::clone(source), info));
                }
                Err(e) if e.is_not_found() => {
                    debug!("{} does not have {}@{}", source.name(), module_path, version);
                }
                Err(e) => return Err(e),
            }
        }

        Err(SourceError::NotFound(module_path.to_string()))
    }
}
