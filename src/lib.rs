//! godocs: documentation server for Go packages
//!
//! # Modules
//!
//! - [`module`]: import paths, versions, platforms and the module record
//! - [`source`]: module proxy, module cache, Go repository and local directory backends
//! - [`resolver`]: finds the module that owns an import path
//! - [`doc`]: build constraints and tree-sitter documentation extraction
//! - [`store`]: SQLite persistence and search
//! - [`fetch`]: admission, deduplication and the fetch pipeline
//! - [`loader`]: store-backed or direct package loading
//! - [`server`]: HTTP surface and background refresh

pub mod config;
pub mod doc;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod logging;
pub mod module;
pub mod resolver;
pub mod server;
pub mod source;
pub mod store;
