//! Module identity: paths, versions, platforms and the module record
//!
//! - [`path`]: import path validation, standard-library detection, series paths
//! - [`version`]: semantic-version parsing and ordering for module versions
//! - [`platform`]: goos/goarch pairs used for build-constraint filtering

pub mod path;
pub mod platform;
pub mod version;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::ModuleInfo;

pub use path::STD_MODULE;
pub use platform::Platform;
pub use version::LATEST;

/// A resolved module, built fresh from source metadata on every fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Canonical module path ("std" for the standard library)
    pub path: String,
    /// Module path with any major-version suffix removed
    pub series_path: String,
    /// Resolved version
    pub version: String,
    /// All known versions, newest first
    pub versions: Vec<String>,
    /// First element of `versions`
    pub latest: String,
    pub commit_time: DateTime<Utc>,
    /// Deprecation message from the latest version's go.mod
    pub deprecated: Option<String>,
    /// Last time the store touched this module; `None` until persisted
    #[serde(skip)]
    pub updated: Option<DateTime<Utc>>,
}

impl Module {
    pub fn from_info(info: &ModuleInfo) -> Self {
        let mut versions = info.versions.clone();
        version::sort_descending(&mut versions);
        if versions.is_empty() {
            versions.push(info.version.clone());
        }
        let latest = version::latest(&versions)
            .unwrap_or(info.version.as_str())
            .to_string();

        Self {
            path: info.module_path.clone(),
            series_path: path::series_path(&info.module_path),
            version: info.version.clone(),
            versions,
            latest,
            commit_time: info.commit_time,
            deprecated: info.deprecated.clone(),
            updated: None,
        }
    }

    pub fn is_std(&self) -> bool {
        self.path == STD_MODULE
    }
}
