//! Standard library source backed by a git checkout of the Go repository
//!
//! Only the `std` sentinel module is answered. Release tags map to module
//! versions:
//! - `go1` -> `v1.0.0`
//! - `go1.21` / `go1.21.0` -> `v1.21.0`
//! - `go1.21.3` -> `v1.21.3`
//! - `go1.22rc1` -> `v1.22.0-rc.1`, `go1.9beta2` -> `v1.9.0-beta.2`
//!
//! Files are the `src/` subtree of the tagged commit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::error::SourceError;
use crate::module::path::STD_MODULE;
use crate::module::version::{self, LATEST};
use crate::source::tree::{FileTree, GitTree};
use crate::source::{ModuleInfo, Source};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^go1(?:\.(\d+))?(?:\.(\d+))?(?:(beta|rc)(\d+))?$").expect("valid tag regex")
});

/// Converts a Go release tag to a module version, or `None` for other tags.
pub fn tag_to_version(tag: &str) -> Option<String> {
    let caps = TAG_RE.captures(tag)?;
    let minor = caps.get(1).map_or("0", |m| m.as_str());
    let patch = caps.get(2).map_or("0", |m| m.as_str());
    match (caps.get(3), caps.get(4)) {
        (Some(kind), Some(n)) => {
            // Pre-releases are only tagged for x.y, never for patch releases.
            if caps.get(2).is_some() {
                return None;
            }
            Some(format!("v1.{}.0-{}.{}", minor, kind.as_str(), n.as_str()))
        }
        _ => Some(format!("v1.{minor}.{patch}")),
    }
}

pub struct StdlibSource {
    repo_path: PathBuf,
}

impl StdlibSource {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    /// Runs `f` against the repository on the blocking pool.
    async fn with_repo<T, F>(&self, f: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(git2::Repository) -> Result<T, SourceError> + Send + 'static,
    {
        let repo_path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || {
            let repo = git2::Repository::open(&repo_path)?;
            f(repo)
        })
        .await
        .map_err(|e| SourceError::Io(std::io::Error::other(e)))?
    }
}

/// Every release version in the repository, mapped to its tag name.
fn release_tags(repo: &git2::Repository) -> Result<HashMap<String, String>, SourceError> {
    let mut tags = HashMap::new();
    for name in repo.tag_names(Some("go1*"))?.iter().flatten() {
        if let Some(version) = tag_to_version(name) {
            // go1.21 and go1.21.0 name the same release; keep the first seen.
            tags.entry(version).or_insert_with(|| name.to_string());
        }
    }
    Ok(tags)
}

fn tag_commit(repo: &git2::Repository, tag: &str) -> Result<git2::Oid, SourceError> {
    let object = repo.revparse_single(&format!("refs/tags/{tag}"))?;
    Ok(object.peel_to_commit()?.id())
}

#[async_trait::async_trait]
impl Source for StdlibSource {
    fn name(&self) -> &'static str {
        "stdlib"
    }

    async fn module(&self, module_path: &str, version: &str) -> Result<ModuleInfo, SourceError> {
        if module_path != STD_MODULE {
            return Err(SourceError::NotFound(module_path.to_string()));
        }

        let requested = version.to_string();
        self.with_repo(move |repo| {
            let tags = release_tags(&repo)?;
            let mut versions: Vec<String> = tags.keys().cloned().collect();
            version::sort_descending(&mut versions);

            let resolved = (if requested == LATEST {
                version::latest(&versions).map(str::to_string)
            } else {
                Some(requested.clone()).filter(|v| tags.contains_key(v))
            })
            .ok_or_else(|| SourceError::NotFound(format!("{STD_MODULE}@{requested}")))?;

            let tag = &tags[&resolved];
            let commit = repo.find_commit(tag_commit(&repo, tag)?)?;
            let commit_time = DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0)
                .ok_or_else(|| SourceError::InvalidResponse(format!("bad commit time for {tag}")))?;
            debug!("std@{} is tag {} ({})", resolved, tag, commit.id());

            Ok(ModuleInfo {
                module_path: STD_MODULE.to_string(),
                declared_path: Some(STD_MODULE.to_string()),
                version: resolved,
                versions,
                commit_time,
                deprecated: None,
            })
        })
        .await
    }

    async fn files(&self, info: &ModuleInfo) -> Result<Box<dyn FileTree>, SourceError> {
        let version = info.version.clone();
        let tree = self
            .with_repo(move |repo| {
                let tags = release_tags(&repo)?;
                let tag = tags
                    .get(&version)
                    .ok_or_else(|| SourceError::NotFound(format!("{STD_MODULE}@{version}")))?;
                let commit = tag_commit(&repo, tag)?;
                Ok(GitTree::new(repo, commit, "src")?)
            })
            .await?;
        Ok(Box::new(tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("go1", Some("v1.0.0"))]
    #[case("go1.20", Some("v1.20.0"))]
    #[case("go1.21.0", Some("v1.21.0"))]
    #[case("go1.21.3", Some("v1.21.3"))]
    #[case("go1.22rc1", Some("v1.22.0-rc.1"))]
    #[case("go1.9beta2", Some("v1.9.0-beta.2"))]
    #[case("go1.2.1rc1", None)]
    #[case("weekly.2011-01-01", None)]
    #[case("release.r60", None)]
    fn tag_to_version_returns_expected(#[case] tag: &str, #[case] expected: Option<&str>) {
        assert_eq!(tag_to_version(tag).as_deref(), expected);
    }

    fn go_repo() -> TempDir {
        go_repo_with(&[
            ("go1.20", "package fmt // 1.20\n"),
            ("go1.21rc2", "package fmt // rc\n"),
            ("go1.21.0", "package fmt // 1.21\n"),
        ])
    }

    /// A Go repository with one tagged commit per entry, in order.
    fn go_repo_with(releases: &[(&str, &str)]) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(temp_dir.path()).unwrap();
        let sig = git2::Signature::now("gopher", "gopher@example.com").unwrap();
        std::fs::create_dir_all(temp_dir.path().join("src/fmt")).unwrap();

        let mut parent: Option<git2::Oid> = None;
        for &(tag, content) in releases {
            std::fs::write(temp_dir.path().join("src/fmt/print.go"), content).unwrap();
            let mut index = repo.index().unwrap();
            index
                .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
                .unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let parents: Vec<git2::Commit> = parent
                .iter()
                .map(|oid| repo.find_commit(*oid).unwrap())
                .collect();
            let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
            let oid = repo
                .commit(Some("HEAD"), &sig, &sig, tag, &tree, &parent_refs)
                .unwrap();
            let object = repo.find_object(oid, None).unwrap();
            repo.tag_lightweight(tag, &object, false).unwrap();
            parent = Some(oid);
        }
        temp_dir
    }

    #[tokio::test]
    async fn module_resolves_latest_to_newest_release() {
        let repo = go_repo();
        let source = StdlibSource::new(repo.path());

        let info = source.module(STD_MODULE, LATEST).await.unwrap();

        assert_eq!(info.version, "v1.21.0");
        assert_eq!(info.versions, vec!["v1.21.0", "v1.21.0-rc.2", "v1.20.0"]);
        assert_eq!(info.declared_path.as_deref(), Some(STD_MODULE));
    }

    #[tokio::test]
    async fn latest_includes_newer_prerelease() {
        let repo = go_repo_with(&[
            ("go1.22.5", "package fmt // 1.22.5\n"),
            ("go1.23rc1", "package fmt // rc\n"),
        ]);
        let source = StdlibSource::new(repo.path());

        let info = source.module(STD_MODULE, LATEST).await.unwrap();

        assert_eq!(info.version, "v1.23.0-rc.1");
        assert_eq!(info.versions, vec!["v1.23.0-rc.1", "v1.22.5"]);
        assert_eq!(crate::module::Module::from_info(&info).latest, info.version);
    }

    #[tokio::test]
    async fn module_ignores_non_std_paths() {
        let repo = go_repo();
        let source = StdlibSource::new(repo.path());

        let result = source.module("github.com/foo/bar", LATEST).await;

        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn module_unknown_version_is_not_found() {
        let repo = go_repo();
        let source = StdlibSource::new(repo.path());

        let result = source.module(STD_MODULE, "v1.99.0").await;

        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn files_reads_src_subtree_at_tag() {
        let repo = go_repo();
        let source = StdlibSource::new(repo.path());

        let info = source.module(STD_MODULE, "v1.20.0").await.unwrap();
        let tree = source.files(&info).await.unwrap();

        assert_eq!(tree.paths(), vec!["fmt/print.go"]);
        assert_eq!(tree.read("fmt/print.go").unwrap(), b"package fmt // 1.20\n");
    }
}
