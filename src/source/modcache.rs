//! Module download cache source
//!
//! Reads the layout `go mod download` leaves on disk:
//! - `{root}/cache/download/{module}/@v/list`
//! - `{root}/cache/download/{module}/@v/{version}.info` / `.mod` / `.zip`
//! - `{root}/{module}@{version}/` - extracted copy, preferred when present
//!
//! Module paths and versions are escaped the same way the proxy escapes them.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SourceError;
use crate::module::path::escape_path;
use crate::module::version::{self, LATEST};
use crate::source::gomod::GoMod;
use crate::source::tree::{DirTree, FileTree, ZipTree};
use crate::source::{ModuleInfo, Source, VersionInfo};

pub struct ModCacheSource {
    root: PathBuf,
}

impl ModCacheSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The module cache Go itself would use: `$GOMODCACHE`, then
    /// `$GOPATH/pkg/mod`, then `~/go/pkg/mod`.
    pub fn default_root() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os("GOMODCACHE").filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(dir));
        }
        if let Some(gopath) = std::env::var_os("GOPATH").filter(|v| !v.is_empty()) {
            let first = std::env::split_paths(&gopath).next()?;
            return Some(first.join("pkg").join("mod"));
        }
        dirs::home_dir().map(|home| home.join("go").join("pkg").join("mod"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn download_dir(&self, module_path: &str) -> PathBuf {
        self.root
            .join("cache")
            .join("download")
            .join(escape_path(module_path))
            .join("@v")
    }

    async fn read(&self, module_path: &str, file: &str) -> Result<Vec<u8>, SourceError> {
        let path = self.download_dir(module_path).join(file);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Not in module cache: {}", path.display());
                Err(SourceError::NotFound(module_path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn go_mod(&self, module_path: &str, version: &str) -> Result<GoMod, SourceError> {
        match self.read(module_path, &format!("{}.mod", escape_path(version))).await {
            Ok(bytes) => Ok(GoMod::parse(&String::from_utf8_lossy(&bytes))),
            Err(SourceError::NotFound(_)) => Ok(GoMod::default()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl Source for ModCacheSource {
    fn name(&self) -> &'static str {
        "modcache"
    }

    async fn module(&self, module_path: &str, version: &str) -> Result<ModuleInfo, SourceError> {
        let list = self.read(module_path, "list").await?;
        let mut versions: Vec<String> = String::from_utf8_lossy(&list)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        version::sort_descending(&mut versions);

        let query = if version == LATEST {
            versions
                .first()
                .cloned()
                .ok_or_else(|| SourceError::NotFound(module_path.to_string()))?
        } else {
            version.to_string()
        };

        let info = self
            .read(module_path, &format!("{}.info", escape_path(&query)))
            .await?;
        let info: VersionInfo = serde_json::from_slice(&info)
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        let go_mod = self.go_mod(module_path, &info.version).await?;
        let deprecated = match versions.first() {
            Some(latest) if *latest != info.version => {
                self.go_mod(module_path, latest).await?.deprecated
            }
            _ => go_mod.deprecated,
        };

        if versions.is_empty() {
            versions.push(info.version.clone());
        }

        Ok(ModuleInfo {
            module_path: module_path.to_string(),
            declared_path: go_mod.module,
            version: info.version,
            versions,
            commit_time: info.time,
            deprecated,
        })
    }

    async fn files(&self, info: &ModuleInfo) -> Result<Box<dyn FileTree>, SourceError> {
        let extracted = self.root.join(format!(
            "{}@{}",
            escape_path(&info.module_path),
            escape_path(&info.version)
        ));
        if tokio::fs::metadata(&extracted)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            debug!("Using extracted module at {}", extracted.display());
            return Ok(Box::new(DirTree::new(extracted)));
        }

        let zip = self
            .read(&info.module_path, &format!("{}.zip", escape_path(&info.version)))
            .await?;
        let prefix = format!("{}@{}/", info.module_path, info.version);
        Ok(Box::new(ZipTree::from_bytes(zip, prefix)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_version(root: &Path, module: &str, version: &str, go_mod: &str) {
        let dir = root
            .join("cache/download")
            .join(escape_path(module))
            .join("@v");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{version}.info")),
            format!(r#"{{"Version":"{version}","Time":"2024-01-02T03:04:05Z"}}"#),
        )
        .unwrap();
        std::fs::write(dir.join(format!("{version}.mod")), go_mod).unwrap();
    }

    fn write_list(root: &Path, module: &str, versions: &[&str]) {
        let dir = root
            .join("cache/download")
            .join(escape_path(module))
            .join("@v");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("list"), versions.join("\n")).unwrap();
    }

    #[tokio::test]
    async fn module_reads_latest_from_cache_list() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_list(root, "example.com/foo", &["v1.0.0", "v1.2.0"]);
        write_version(root, "example.com/foo", "v1.0.0", "module example.com/foo\n");
        write_version(root, "example.com/foo", "v1.2.0", "module example.com/foo\n");

        let source = ModCacheSource::new(root);
        let info = source.module("example.com/foo", LATEST).await.unwrap();

        assert_eq!(info.version, "v1.2.0");
        assert_eq!(info.versions, vec!["v1.2.0", "v1.0.0"]);
        assert_eq!(info.declared_path.as_deref(), Some("example.com/foo"));
    }

    #[tokio::test]
    async fn module_missing_list_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let source = ModCacheSource::new(temp_dir.path());

        let result = source.module("example.com/missing", LATEST).await;

        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn module_escapes_uppercase_paths() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_list(root, "github.com/BurntSushi/toml", &["v1.3.2"]);
        write_version(
            root,
            "github.com/BurntSushi/toml",
            "v1.3.2",
            "module github.com/BurntSushi/toml\n",
        );
        assert!(root.join("cache/download/github.com/!burnt!sushi/toml/@v/list").exists());

        let source = ModCacheSource::new(root);
        let info = source
            .module("github.com/BurntSushi/toml", "v1.3.2")
            .await
            .unwrap();

        assert_eq!(info.version, "v1.3.2");
    }

    #[tokio::test]
    async fn files_prefers_extracted_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let extracted = root.join("example.com/foo@v1.0.0");
        std::fs::create_dir_all(&extracted).unwrap();
        std::fs::write(extracted.join("foo.go"), "package foo\n").unwrap();

        let source = ModCacheSource::new(root);
        let info = crate::source::test_support::module_info("example.com/foo", "v1.0.0");
        let tree = source.files(&info).await.unwrap();

        assert_eq!(tree.paths(), vec!["foo.go"]);
    }

    #[tokio::test]
    async fn files_without_zip_or_directory_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let source = ModCacheSource::new(temp_dir.path());
        let info = crate::source::test_support::module_info("example.com/foo", "v1.0.0");

        let result = source.files(&info).await;

        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }
}
