//! A local directory served as a single module
//!
//! Two flavours:
//! - [`LocalSource::from_dir`]: a module checkout; the module path comes from
//!   its go.mod and the version is always `v0.0.0`.
//! - [`LocalSource::goroot`]: a Go installation; `GOROOT/src` is served as the
//!   `std` module at the version named in `GOROOT/VERSION`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::SourceError;
use crate::module::path::STD_MODULE;
use crate::module::version::LATEST;
use crate::source::gomod::GoMod;
use crate::source::stdlib::tag_to_version;
use crate::source::tree::{DirTree, FileTree};
use crate::source::{ModuleInfo, Source};

/// Version reported for a module checkout that carries no version of its own.
pub const LOCAL_VERSION: &str = "v0.0.0";

pub struct LocalSource {
    root: PathBuf,
    module_path: String,
    version: String,
    commit_time: DateTime<Utc>,
}

fn modified(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

impl LocalSource {
    /// Serves `dir` as the module declared by `dir/go.mod`.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let root = dir.into();
        let go_mod_path = root.join("go.mod");
        let content = std::fs::read_to_string(&go_mod_path)?;
        let module_path = GoMod::parse(&content).module.ok_or_else(|| {
            SourceError::InvalidResponse(format!(
                "{} has no module directive",
                go_mod_path.display()
            ))
        })?;
        info!("Serving {} from {}", module_path, root.display());

        Ok(Self {
            commit_time: modified(&go_mod_path),
            root,
            module_path,
            version: LOCAL_VERSION.to_string(),
        })
    }

    /// Serves `goroot/src` as the standard library.
    pub fn goroot(goroot: impl AsRef<Path>) -> Result<Self, SourceError> {
        let goroot = goroot.as_ref();
        let version_file = goroot.join("VERSION");
        let content = std::fs::read_to_string(&version_file)?;
        let tag = content.lines().next().unwrap_or_default().trim();
        let version =
            tag_to_version(tag).ok_or_else(|| SourceError::InvalidVersion(tag.to_string()))?;
        info!("Serving std@{} from {}", version, goroot.display());

        Ok(Self {
            root: goroot.join("src"),
            module_path: STD_MODULE.to_string(),
            version,
            commit_time: modified(&version_file),
        })
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }
}

#[async_trait::async_trait]
impl Source for LocalSource {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn module(&self, module_path: &str, version: &str) -> Result<ModuleInfo, SourceError> {
        if module_path != self.module_path || (version != LATEST && version != self.version) {
            return Err(SourceError::NotFound(module_path.to_string()));
        }

        Ok(ModuleInfo {
            module_path: self.module_path.clone(),
            declared_path: Some(self.module_path.clone()),
            version: self.version.clone(),
            versions: vec![self.version.clone()],
            commit_time: self.commit_time,
            deprecated: None,
        })
    }

    async fn files(&self, _info: &ModuleInfo) -> Result<Box<dyn FileTree>, SourceError> {
        Ok(Box::new(DirTree::new(self.root.clone())))
    }
}
