//! Package loading for requests
//!
//! A [`Loader`] answers "documentation for this import path at this version
//! on this platform" in one of two modes:
//!
//! - **Store**: read from the [`Repository`]; on a miss, fetch with a
//!   deadline and read again. Blocked paths are refused even when stored.
//! - **Direct**: resolve and parse the owning module on every request,
//!   without persistence.
//!
//! Both modes produce the same [`LoadedPackage`] for the same module.

use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::doc::{Package, PackageSummary, parse_module};
use crate::error::Error;
use crate::fetch::Fetcher;
use crate::fetch::project::{Project, ProjectProber};
use crate::module::path::{has_path_prefix, validate_import_path};
use crate::module::version::validate_version;
use crate::module::{Module, Platform};
use crate::resolver::{Resolver, check_declared_path};
use crate::store::Repository;

/// Extra data a request wants alongside the package itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Needs(u8);

impl Needs {
    pub const NONE: Needs = Needs(0);
    pub const SUBPACKAGES: Needs = Needs(1);
    pub const IMPORTS: Needs = Needs(1 << 1);
    pub const PROJECT: Needs = Needs(1 << 2);
    pub const ALL: Needs = Needs(Self::SUBPACKAGES.0 | Self::IMPORTS.0 | Self::PROJECT.0);

    pub fn contains(self, other: Needs) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Needs {
    type Output = Needs;

    fn bitor(self, rhs: Needs) -> Needs {
        Needs(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub import_path: String,
    pub version: String,
    pub platform: Platform,
    pub needs: Needs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedPackage {
    pub package: Package,
    pub module: Module,
    pub subpackages: Vec<PackageSummary>,
    pub imports: Vec<PackageSummary>,
    pub project: Option<Project>,
}

pub enum Loader {
    Store {
        repo: Arc<dyn Repository>,
        fetcher: Arc<Fetcher>,
        /// How long a request waits on a fetch
        deadline: Duration,
    },
    Direct {
        resolver: Arc<Resolver>,
        prober: Arc<dyn ProjectProber>,
    },
}

impl Loader {
    pub async fn load(&self, request: &LoadRequest) -> Result<LoadedPackage, Error> {
        validate_import_path(&request.import_path)?;
        validate_version(&request.version)?;

        match self {
            Loader::Store {
                repo,
                fetcher,
                deadline,
            } => load_from_store(repo.as_ref(), fetcher, *deadline, request).await,
            Loader::Direct { resolver, prober } => {
                load_direct(resolver, prober.as_ref(), request).await
            }
        }
    }
}

async fn load_from_store(
    repo: &dyn Repository,
    fetcher: &Arc<Fetcher>,
    deadline: Duration,
    request: &LoadRequest,
) -> Result<LoadedPackage, Error> {
    let LoadRequest {
        import_path,
        version,
        platform,
        needs,
    } = request;

    if repo.is_blocked(import_path)? {
        debug!("{} is blocked", import_path);
        return Err(Error::Blocked);
    }

    let package = match repo.get_package(platform, import_path, version)? {
        Some(package) => package,
        None => {
            debug!("{}@{} not stored, fetching", import_path, version);
            fetcher
                .fetch_with_deadline(platform, import_path, version, deadline)
                .await?;
            repo.get_package(platform, import_path, version)?
                .ok_or(Error::NotFound)?
        }
    };

    let mut module = repo
        .get_module(&package.module_path)?
        .ok_or(Error::NotFound)?;
    module.version = package.version.clone();

    let subpackages = if needs.contains(Needs::SUBPACKAGES) {
        repo.subpackages(platform, &module.path, &package.version, import_path)?
    } else {
        Vec::new()
    };

    let imports = if needs.contains(Needs::IMPORTS) {
        let known = repo.packages(platform, &package.imports)?;
        import_summaries(&package.imports, |path| {
            known
                .iter()
                .find(|summary| summary.import_path == path)
                .map(|summary| summary.synopsis.clone())
        })
    } else {
        Vec::new()
    };

    let project = if needs.contains(Needs::PROJECT) {
        repo.get_project(&module.series_path)?
    } else {
        None
    };

    Ok(LoadedPackage {
        package,
        module,
        subpackages,
        imports,
        project,
    })
}

async fn load_direct(
    resolver: &Resolver,
    prober: &dyn ProjectProber,
    request: &LoadRequest,
) -> Result<LoadedPackage, Error> {
    let LoadRequest {
        import_path,
        version,
        platform,
        needs,
    } = request;

    let (source, info) = resolver.resolve(import_path, version).await?;
    check_declared_path(&info)?;
    let module = Module::from_info(&info);

    let tree = source.files(&info).await?;
    let packages = {
        let module = module.clone();
        let platform = platform.clone();
        tokio::task::spawn_blocking(move || parse_module(tree.as_ref(), &module, &platform))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    };
    if packages.is_empty() {
        return Err(Error::NoPackages);
    }

    let package = packages
        .iter()
        .find(|p| p.import_path == *import_path)
        .cloned()
        .ok_or(Error::NotFound)?;

    let subpackages = if needs.contains(Needs::SUBPACKAGES) {
        packages
            .iter()
            .filter(|p| p.import_path != *import_path && has_path_prefix(&p.import_path, import_path))
            .map(Package::summary)
            .collect()
    } else {
        Vec::new()
    };

    let imports = if needs.contains(Needs::IMPORTS) {
        import_summaries(&package.imports, |path| {
            packages
                .iter()
                .find(|p| p.import_path == path)
                .map(|p| p.synopsis.clone())
        })
    } else {
        Vec::new()
    };

    let project = if !needs.contains(Needs::PROJECT) {
        None
    } else if module.is_std() {
        Some(Project::std())
    } else {
        prober
            .probe(&module.series_path)
            .await
            .inspect_err(|e| warn!("Failed to probe project for {}: {}", module.series_path, e))
            .ok()
            .flatten()
    };

    Ok(LoadedPackage {
        package,
        module,
        subpackages,
        imports,
        project,
    })
}

/// One summary per import, in import order; unknown packages get an empty synopsis.
fn import_summaries(
    imports: &[String],
    synopsis_of: impl Fn(&str) -> Option<String>,
) -> Vec<PackageSummary> {
    imports
        .iter()
        .map(|path| PackageSummary {
            import_path: path.clone(),
            synopsis: synopsis_of(path).unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::project::MockProjectProber;
    use crate::module::{LATEST, STD_MODULE};
    use crate::source::test_support::module_info;
    use crate::source::{FileTree, MemoryTree, MockSource, Source, SourceList};
    use crate::store::{MockRepository, SqliteStore};
    use tempfile::TempDir;

    fn module_tree() -> Box<dyn FileTree> {
        Box::new(
            MemoryTree::new()
                .with_file("go.mod", "module example.com/mod\n")
                .with_file(
                    "mod.go",
                    "// Package mod is the root.\npackage mod\n\nimport \"example.com/mod/util\"\n\n// Run runs.\nfunc Run() { util.Help() }\n",
                )
                .with_file(
                    "util/util.go",
                    "// Package util helps.\npackage util\n\nimport \"strings\"\n\nfunc Help() string { return strings.ToUpper(\"x\") }\n",
                )
                .with_file("util/deep/deep.go", "// Package deep is deep.\npackage deep\n"),
        )
    }

    fn mod_source() -> MockSource {
        let mut source = MockSource::new();
        source.expect_name().return_const("mock");
        source.expect_module().returning(|path, version| {
            if path == "example.com/mod" {
                Ok(module_info(path, if version == "latest" { "v1.0.0" } else { version }))
            } else {
                Err(crate::error::SourceError::NotFound(path.to_string()))
            }
        });
        source.expect_files().returning(|_| Ok(module_tree()));
        source
    }

    fn no_project() -> MockProjectProber {
        let mut prober = MockProjectProber::new();
        prober.expect_probe().returning(|_| Ok(None));
        prober
    }

    fn request(import_path: &str, needs: Needs) -> LoadRequest {
        LoadRequest {
            import_path: import_path.to_string(),
            version: "latest".to_string(),
            platform: Platform::default(),
            needs,
        }
    }

    fn direct_loader() -> Loader {
        Loader::Direct {
            resolver: Arc::new(Resolver::new(SourceList::new(vec![Arc::new(mod_source())]))),
            prober: Arc::new(no_project()),
        }
    }

    fn store_loader(dir: &TempDir) -> Loader {
        store_loader_with(dir, mod_source()).1
    }

    fn store_loader_with(
        dir: &TempDir,
        source: impl Source + 'static,
    ) -> (Arc<dyn Repository>, Loader) {
        let repo: Arc<dyn Repository> =
            Arc::new(SqliteStore::new(&dir.path().join("godocs.db")).unwrap());
        let resolver = Arc::new(Resolver::new(SourceList::new(vec![Arc::new(source)])));
        let fetcher = Arc::new(Fetcher::new(
            Arc::clone(&repo),
            resolver,
            Arc::new(no_project()),
            Duration::from_secs(5),
        ));
        let loader = Loader::Store {
            repo: Arc::clone(&repo),
            fetcher,
            deadline: Duration::from_secs(5),
        };
        (repo, loader)
    }

    #[test]
    fn needs_combine_with_bitor() {
        let needs = Needs::SUBPACKAGES | Needs::PROJECT;

        assert!(needs.contains(Needs::SUBPACKAGES));
        assert!(needs.contains(Needs::PROJECT));
        assert!(!needs.contains(Needs::IMPORTS));
        assert!(Needs::ALL.contains(needs));
        assert!(needs.contains(Needs::NONE));
    }

    #[tokio::test]
    async fn direct_load_slices_requested_package() {
        let loaded = direct_loader()
            .load(&request("example.com/mod/util", Needs::ALL))
            .await
            .unwrap();

        assert_eq!(loaded.package.name, "util");
        assert_eq!(loaded.module.path, "example.com/mod");
        assert_eq!(
            loaded.subpackages,
            vec![PackageSummary {
                import_path: "example.com/mod/util/deep".to_string(),
                synopsis: "Package deep is deep.".to_string(),
            }]
        );
        assert_eq!(
            loaded.imports,
            vec![PackageSummary {
                import_path: "strings".to_string(),
                synopsis: String::new(),
            }]
        );
        assert_eq!(loaded.project, None);
    }

    #[tokio::test]
    async fn direct_load_of_non_package_directory_is_not_found() {
        let result = direct_loader()
            .load(&request("example.com/mod/missing", Needs::NONE))
            .await;

        assert!(matches!(result, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn store_load_matches_direct_load() {
        let dir = TempDir::new().unwrap();
        let store = store_loader(&dir);
        let direct = direct_loader();

        for path in ["example.com/mod", "example.com/mod/util"] {
            let from_store = store.load(&request(path, Needs::ALL)).await.unwrap();
            let from_source = direct.load(&request(path, Needs::ALL)).await.unwrap();

            assert_eq!(from_store.package, from_source.package);
            assert_eq!(from_store.subpackages, from_source.subpackages);
            assert_eq!(from_store.imports, from_source.imports);
            assert_eq!(from_store.project, from_source.project);
            assert_eq!(
                Module {
                    updated: None,
                    ..from_store.module
                },
                from_source.module
            );
        }
    }

    #[tokio::test]
    async fn load_rejects_invalid_input_before_any_lookup() {
        let loader = Loader::Direct {
            resolver: Arc::new(Resolver::new(SourceList::default())),
            prober: Arc::new(MockProjectProber::new()),
        };

        let bad_version = LoadRequest {
            version: "1.0".to_string(),
            ..request("example.com/mod", Needs::NONE)
        };

        assert!(matches!(
            loader.load(&request("example.com/../etc", Needs::NONE)).await,
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            loader.load(&bad_version).await,
            Err(Error::InvalidVersion(_))
        ));
    }

    #[tokio::test]
    async fn store_load_serves_stored_package_without_fetching() {
        let stored = {
            let dir = TempDir::new().unwrap();
            let loader = store_loader(&dir);
            loader
                .load(&request("example.com/mod", Needs::NONE))
                .await
                .unwrap()
        };

        let mut repo = MockRepository::new();
        let package = stored.package.clone();
        repo.expect_get_package()
            .times(1)
            .returning(move |_, _, _| Ok(Some(package.clone())));
        let module = stored.module.clone();
        repo.expect_get_module()
            .returning(move |_| Ok(Some(module.clone())));
        repo.expect_is_blocked()
            .times(1)
            .returning(|_| Ok(false));
        let repo: Arc<dyn Repository> = Arc::new(repo);

        let mut source = MockSource::new();
        source.expect_module().never();
        let fetcher = Arc::new(Fetcher::new(
            Arc::clone(&repo),
            Arc::new(Resolver::new(SourceList::new(vec![Arc::new(source)]))),
            Arc::new(MockProjectProber::new()),
            Duration::from_secs(5),
        ));
        let loader = Loader::Store {
            repo,
            fetcher,
            deadline: Duration::from_secs(1),
        };

        let loaded = loader
            .load(&request("example.com/mod", Needs::NONE))
            .await
            .unwrap();

        assert_eq!(loaded.package, stored.package);
        assert!(loaded.subpackages.is_empty());
    }

    #[tokio::test]
    async fn stored_package_is_refused_once_blocked() {
        let dir = TempDir::new().unwrap();
        let (repo, loader) = store_loader_with(&dir, mod_source());
        loader
            .load(&request("example.com/mod/util", Needs::NONE))
            .await
            .unwrap();

        repo.block("example.com/mod").unwrap();

        for path in ["example.com/mod", "example.com/mod/util"] {
            let result = loader.load(&request(path, Needs::ALL)).await;
            assert!(matches!(result, Err(Error::Blocked)), "{path}");
        }
    }

    #[tokio::test]
    async fn blocked_path_is_checked_before_the_store_is_read() {
        let mut repo = MockRepository::new();
        repo.expect_is_blocked()
            .withf(|path| path == "example.com/mod/util")
            .returning(|_| Ok(true));
        repo.expect_get_package().never();
        let repo: Arc<dyn Repository> = Arc::new(repo);

        let mut source = MockSource::new();
        source.expect_module().never();
        let fetcher = Arc::new(Fetcher::new(
            Arc::clone(&repo),
            Arc::new(Resolver::new(SourceList::new(vec![Arc::new(source)]))),
            Arc::new(MockProjectProber::new()),
            Duration::from_secs(5),
        ));
        let loader = Loader::Store {
            repo,
            fetcher,
            deadline: Duration::from_secs(1),
        };

        let result = loader
            .load(&request("example.com/mod/util", Needs::NONE))
            .await;

        assert!(matches!(result, Err(Error::Blocked)));
    }

    #[tokio::test]
    async fn std_latest_with_newer_prerelease_is_served_from_store() {
        let mut source = MockSource::new();
        source.expect_name().return_const("mock");
        source.expect_module().returning(|path, version| {
            if path != STD_MODULE {
                return Err(crate::error::SourceError::NotFound(path.to_string()));
            }
            let mut info = module_info(
                path,
                if version == LATEST { "v1.23.0-rc.1" } else { version },
            );
            info.versions = vec!["v1.22.5".to_string(), "v1.23.0-rc.1".to_string()];
            Ok(info)
        });
        source.expect_files().times(1).returning(|_| {
            Ok(Box::new(MemoryTree::new().with_file(
                "fmt/print.go",
                "// Package fmt formats.\npackage fmt\n",
            )))
        });
        let dir = TempDir::new().unwrap();
        let (_repo, loader) = store_loader_with(&dir, source);

        for _ in 0..2 {
            let loaded = loader.load(&request("fmt", Needs::NONE)).await.unwrap();

            assert_eq!(loaded.package.synopsis, "Package fmt formats.");
            assert_eq!(loaded.module.version, "v1.23.0-rc.1");
            assert_eq!(loaded.module.latest, "v1.23.0-rc.1");
        }
    }
}
