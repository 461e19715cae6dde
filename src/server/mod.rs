//! HTTP server
//!
//! # Modules
//!
//! - [`handler`]: package and search handlers, error-to-status mapping
//! - [`routes`]: router construction
//! - [`refresh`]: background refresh of stale modules
//!
//! With a database configured, requests are served from the store and
//! missing packages are fetched on demand. Without one, every request
//! resolves and parses the module directly.

pub mod handler;
pub mod refresh;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{self, Config, ConfigError};
use crate::error::{SourceError, StoreError};
use crate::fetch::Fetcher;
use crate::fetch::project::{self, HttpProjectProber, ProjectProber};
use crate::loader::Loader;
use crate::module::Platform;
use crate::resolver::Resolver;
use crate::source::{
    LocalSource, ModCacheSource, ProxySource, Source, SourceList, StdlibSource,
};
use crate::store::{Repository, SqliteStore};

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct AppState {
    pub loader: Loader,
    /// Present when serving from a store
    pub repo: Option<Arc<dyn Repository>>,
    pub default_platform: Platform,
}

/// Builds the source list for the configured mode.
///
/// With a proxy: the standard library from a Go repository checkout, then
/// the proxy. Without: configured local directories, the module cache, then
/// GOROOT for the standard library.
pub fn build_sources(config: &Config) -> Result<SourceList, ServeError> {
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();

    if let Some(proxy_url) = &config.proxy_url {
        let go_repo = config
            .sources
            .go_repo
            .clone()
            .unwrap_or_else(config::go_repo_path);
        info!("Using module proxy {} and Go repository {}", proxy_url, go_repo.display());
        sources.push(Arc::new(StdlibSource::new(go_repo)));
        sources.push(Arc::new(ProxySource::new(proxy_url)?));
        return Ok(SourceList::new(sources));
    }

    for dir in &config.sources.local_dirs {
        sources.push(Arc::new(LocalSource::from_dir(dir)?));
    }

    match config
        .sources
        .mod_cache
        .clone()
        .or_else(ModCacheSource::default_root)
    {
        Some(root) => {
            info!("Using module cache {}", root.display());
            sources.push(Arc::new(ModCacheSource::new(root)));
        }
        None => warn!("No module cache found"),
    }

    let goroot = config
        .sources
        .goroot
        .clone()
        .or_else(|| std::env::var_os("GOROOT").map(Into::into));
    match goroot {
        Some(goroot) => match LocalSource::goroot(&goroot) {
            Ok(source) => sources.push(Arc::new(source)),
            Err(e) => warn!("Not serving the standard library from {}: {}", goroot.display(), e),
        },
        None => warn!("GOROOT not set; the standard library is unavailable"),
    }

    Ok(SourceList::new(sources))
}

/// Builds the application state from the configuration and starts the
/// refresh loop when a store is used.
pub fn build_state(config: &Config) -> Result<AppState, ServeError> {
    let default_platform = config.platform()?;
    let resolver = Arc::new(Resolver::new(build_sources(config)?));
    let prober: Arc<dyn ProjectProber> =
        Arc::new(HttpProjectProber::new(project::DEFAULT_BASE_URL)?);

    let Some(db_path) = &config.database else {
        info!("No database configured; serving directly from sources");
        return Ok(AppState {
            loader: Loader::Direct { resolver, prober },
            repo: None,
            default_platform,
        });
    };

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let repo: Arc<dyn Repository> = Arc::new(SqliteStore::new(db_path)?);
    let fetcher = Arc::new(
        Fetcher::new(
            Arc::clone(&repo),
            resolver,
            prober,
            Duration::from_millis(config.fetch_timeout),
        )
        .with_max_concurrent(config.max_concurrent_fetches),
    );

    refresh::spawn_refresh_loop(
        Arc::clone(&repo),
        Arc::clone(&fetcher),
        default_platform.clone(),
        Duration::from_millis(config.refresh_interval),
        Duration::from_millis(config.max_age),
    );

    Ok(AppState {
        loader: Loader::Store {
            repo: Arc::clone(&repo),
            fetcher,
            deadline: Duration::from_millis(config.request_deadline),
        },
        repo: Some(repo),
        default_platform,
    })
}

pub async fn run(config: Config) -> Result<(), ServeError> {
    let state = Arc::new(build_state(&config)?);

    let listener = TcpListener::bind(&config.listen).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, routes::router(state)).await?;
    Ok(())
}
