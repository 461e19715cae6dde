//! Persistent store: modules, packages, projects and the blocklist
//!
//! The store is both cache and search index. [`Repository`] is the seam the
//! fetch coordinator, loader and refresh loop talk to; [`sqlite::SqliteStore`]
//! implements it over a single SQLite database.

pub mod sqlite;

use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Serialize;

use crate::doc::{Package, PackageSummary};
use crate::error::StoreError;
use crate::fetch::project::Project;
use crate::module::{Module, Platform};

pub use sqlite::SqliteStore;

/// Packages reachable through imports from a root package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportGraph {
    /// Import paths, root first
    pub nodes: Vec<String>,
    /// (importer, imported) index pairs into `nodes`
    pub edges: Vec<(usize, usize)>,
}

/// Trait for storing and retrieving documentation
#[cfg_attr(test, automock)]
pub trait Repository: Send + Sync + 'static {
    /// Get a package at a version, or at the module's latest version for `latest`
    fn get_package(
        &self,
        platform: &Platform,
        import_path: &str,
        version: &str,
    ) -> Result<Option<Package>, StoreError>;

    /// Replace a module version's packages and update the module row, in one transaction
    fn put_module_packages(
        &self,
        platform: &Platform,
        module: &Module,
        packages: &[Package],
    ) -> Result<(), StoreError>;

    fn get_module(&self, module_path: &str) -> Result<Option<Module>, StoreError>;

    /// Insert or update a module row, marking it refreshed
    fn put_module(&self, module: &Module) -> Result<(), StoreError>;

    /// Check whether packages for a module version are already stored
    fn has_module_version(
        &self,
        platform: &Platform,
        module_path: &str,
        version: &str,
    ) -> Result<bool, StoreError>;

    /// A path is blocked when it or any of its ancestors is
    fn is_blocked(&self, path: &str) -> Result<bool, StoreError>;

    fn block(&self, path: &str) -> Result<(), StoreError>;

    /// Mark the module owning `path` as refreshed now
    fn touch_module(&self, path: &str) -> Result<(), StoreError>;

    /// The least recently refreshed module and when it was refreshed
    fn oldest(&self) -> Result<Option<(String, DateTime<Utc>)>, StoreError>;

    fn get_project(&self, series_path: &str) -> Result<Option<Project>, StoreError>;

    fn put_project(&self, series_path: &str, project: &Project) -> Result<(), StoreError>;

    /// Packages matching `query` by name, path or synopsis, best first
    fn search(
        &self,
        platform: &Platform,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PackageSummary>, StoreError>;

    /// Packages of a module version below `import_path`
    fn subpackages(
        &self,
        platform: &Platform,
        module_path: &str,
        version: &str,
        import_path: &str,
    ) -> Result<Vec<PackageSummary>, StoreError>;

    /// Summaries for the given paths, newest stored version of each; unknown paths are omitted
    fn packages(
        &self,
        platform: &Platform,
        import_paths: &[String],
    ) -> Result<Vec<PackageSummary>, StoreError>;

    /// Breadth-first import graph from `import_path`, `depth` levels deep
    fn import_graph(
        &self,
        platform: &Platform,
        import_path: &str,
        depth: usize,
    ) -> Result<ImportGraph, StoreError>;
}
