//! Fetch coordination: getting a module from a source into the store
//!
//! # Pipeline
//!
//! ```text
//! admission ─▶ dedup ─▶ blocklist ─▶ touch ─▶ resolve ─▶ dedup ─▶ project ─▶ parse ─▶ persist
//! (semaphore)  (request)                       (+ go.mod)  (module)
//! ```
//!
//! Dedup happens twice: on the requested path before resolution, then on
//! the resolved module path and version, so two packages of one module are
//! never retrieved side by side.
//!
//! - [`inflight`]: registry of fetch keys currently running
//! - [`project`]: forge link discovery for a module's series path

pub mod inflight;
pub mod project;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_CONCURRENT_FETCHES;
use crate::doc::parse_module;
use crate::error::Error;
use crate::module::{Module, Platform};
use crate::resolver::{Resolver, check_declared_path};
use crate::store::Repository;

use inflight::{FetchGuard, FetchKey, InFlight};
use project::{Project, ProjectProber};

pub struct Fetcher {
    repo: Arc<dyn Repository>,
    resolver: Arc<Resolver>,
    prober: Arc<dyn ProjectProber>,
    semaphore: Arc<Semaphore>,
    inflight: Arc<InFlight>,
    fetch_timeout: Duration,
}

impl Fetcher {
    pub fn new(
        repo: Arc<dyn Repository>,
        resolver: Arc<Resolver>,
        prober: Arc<dyn ProjectProber>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            resolver,
            prober,
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_FETCHES)),
            inflight: Arc::new(InFlight::new()),
            fetch_timeout,
        }
    }

    /// Sets the number of fetches allowed to run at once.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(max));
        self
    }

    pub fn inflight(&self) -> &Arc<InFlight> {
        &self.inflight
    }

    /// Fetches the module owning `path` at `version` and stores its packages.
    ///
    /// The permit and the in-flight keys are held until this returns, on
    /// every path out.
    pub async fn fetch(
        &self,
        platform: &Platform,
        path: &str,
        version: &str,
    ) -> Result<Module, Error> {
        let _permit = Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| Error::TooManyFetches)?;

        let requested = FetchKey::new(platform, path, version);
        let _guard = self.claim(requested.clone())?;

        if self.repo.is_blocked(path)? {
            info!("Refusing to fetch blocked path {}", path);
            return Err(Error::Blocked);
        }

        self.repo.touch_module(path)?;

        let (source, info) = self.resolver.resolve(path, version).await?;
        check_declared_path(&info)?;

        let resolved = FetchKey::new(platform, &info.module_path, &info.version);
        let _module_guard = if resolved == requested {
            None
        } else {
            Some(self.claim(resolved)?)
        };

        let module = Module::from_info(&info);

        self.update_project(&module).await;

        if self
            .repo
            .has_module_version(platform, &module.path, &module.version)?
        {
            debug!(
                "{}@{} already stored for {}",
                module.path, module.version, platform
            );
            self.repo.put_module(&module)?;
            return Ok(module);
        }

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

        self.repo
            .put_module_packages(platform, &module, &packages)?;
        info!(
            "Fetched {}@{} from {}: {} packages for {}",
            module.path,
            module.version,
            source.name(),
            packages.len(),
            platform
        );

        Ok(module)
    }

    /// Runs [`Fetcher::fetch`] as a detached task bounded by the fetch
    /// timeout, waiting for it at most `deadline`.
    ///
    /// On deadline expiry the caller gets [`Error::Timeout`] while the task
    /// keeps running and holding its in-flight key.
    pub async fn fetch_with_deadline(
        self: &Arc<Self>,
        platform: &Platform,
        path: &str,
        version: &str,
        deadline: Duration,
    ) -> Result<Module, Error> {
        let fetcher = Arc::clone(self);
        let (platform, path, version) = (platform.clone(), path.to_string(), version.to_string());
        let handle = tokio::spawn(async move {
            let fetch = fetcher.fetch(&platform, &path, &version);
            match tokio::time::timeout(fetcher.fetch_timeout, fetch).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "Fetch of {}@{} exceeded {:?}",
                        path, version, fetcher.fetch_timeout
                    );
                    Err(Error::Timeout)
                }
            }
        });

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::Task(e.to_string())),
            Err(_) => Err(Error::Timeout),
        }
    }

    fn claim(&self, key: FetchKey) -> Result<FetchGuard, Error> {
        self.inflight.try_insert(key.clone()).ok_or_else(|| {
            debug!("{} is already being fetched", key);
            Error::AlreadyFetching
        })
    }

    /// Records forge links for the module's series path. Failures are only logged.
    async fn update_project(&self, module: &Module) {
        match self.repo.get_project(&module.series_path) {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to read project for {}: {}", module.series_path, e);
                return;
            }
        }

        let project = if module.is_std() {
            Some(Project::std())
        } else {
            self.prober
                .probe(&module.series_path)
                .await
                .inspect_err(|e| warn!("Failed to probe project for {}: {}", module.series_path, e))
                .ok()
                .flatten()
        };

        if let Some(project) = project {
            let _ = self
                .repo
                .put_project(&module.series_path, &project)
                .inspect_err(|e| warn!("Failed to save project for {}: {}", module.series_path, e));
        }
    }
}
