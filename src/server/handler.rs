//! HTTP handlers
//!
//! Errors become fixed status codes and messages here; internal details go
//! to the log only.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use futures::FutureExt;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::config::{DEFAULT_GRAPH_DEPTH, DEFAULT_SEARCH_LIMIT};
use crate::error::Error;
use crate::loader::{LoadRequest, Needs};
use crate::module::{LATEST, Platform};
use crate::server::AppState;

pub const FETCHING_MESSAGE: &str = "Fetching in background; refresh soon.";
pub const NOT_FOUND_MESSAGE: &str = "Package not found.";
pub const NO_PACKAGES_MESSAGE: &str = "No packages found in module.";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error.";

#[derive(Debug, Default, Deserialize)]
pub struct PackageQuery {
    pub platform: Option<String>,
    pub view: Option<String>,
    pub depth: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub platform: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Doc,
    Imports,
    Subpackages,
    Graph,
}

impl View {
    fn parse(view: Option<&str>) -> Option<Self> {
        match view.unwrap_or("doc") {
            "doc" => Some(View::Doc),
            "imports" => Some(View::Imports),
            "subpackages" => Some(View::Subpackages),
            "graph" => Some(View::Graph),
            _ => None,
        }
    }

    fn needs(self) -> Needs {
        match self {
            View::Doc => Needs::PROJECT,
            View::Imports => Needs::IMPORTS,
            View::Subpackages => Needs::SUBPACKAGES,
            View::Graph => Needs::NONE,
        }
    }
}

/// Splits `path@version/rest` or `path@version` into an import path and version.
fn split_version(path: &str) -> (String, Option<String>) {
    let path = path.trim_end_matches('/');
    match path.split_once('@') {
        None => (path.to_string(), None),
        Some((prefix, rest)) => match rest.split_once('/') {
            Some((version, suffix)) => (format!("{prefix}/{suffix}"), Some(version.to_string())),
            None => (prefix.to_string(), Some(rest.to_string())),
        },
    }
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, text.into()).into_response()
}

/// Maps a request error to its response.
///
/// `import_path` and `version` are what the request asked for; a module path
/// mismatch redirects to the same package under the declared module path.
pub fn error_response(
    err: Error,
    import_path: &str,
    version: Option<&str>,
    query: Option<&str>,
) -> Response {
    match err {
        Error::NotFound => {
            debug!("Not found: {}", import_path);
            message(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE)
        }
        Error::Mismatch { requested, actual } => {
            let suffix = import_path.strip_prefix(requested.as_str()).unwrap_or_default();
            let mut target = format!("/{actual}{suffix}");
            if let Some(version) = version {
                target.push('@');
                target.push_str(version);
            }
            if let Some(query) = query {
                target.push('?');
                target.push_str(query);
            }
            info!("Redirecting {} to {}", import_path, target);
            Redirect::permanent(&target).into_response()
        }
        Error::NoPackages => message(StatusCode::NOT_FOUND, NO_PACKAGES_MESSAGE),
        Error::InvalidPath(path) => {
            message(StatusCode::BAD_REQUEST, format!("Invalid import path: {path}"))
        }
        Error::InvalidVersion(version) => {
            message(StatusCode::BAD_REQUEST, format!("Invalid version: {version}"))
        }
        Error::InvalidPlatform(platform) => {
            message(StatusCode::BAD_REQUEST, format!("Invalid platform: {platform}"))
        }
        Error::Blocked => StatusCode::NOT_FOUND.into_response(),
        err if err.is_retryable() => {
            debug!("{} for {}", err, import_path);
            message(StatusCode::ACCEPTED, FETCHING_MESSAGE)
        }
        err => {
            error!("Error serving {}: {}", import_path, err);
            message(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
        }
    }
}

/// Turns a panic inside `handler` into a logged 500.
async fn catch_panics(uri: &Uri, handler: impl Future<Output = Response>) -> Response {
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(response) => response,
        Err(_) => {
            error!("Panic while serving {}", uri);
            message(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
        }
    }
}

fn platform_or_default(state: &AppState, platform: Option<&str>) -> Result<Platform, Error> {
    match platform {
        Some(platform) => platform.parse(),
        None => Ok(state.default_platform.clone()),
    }
}

/// `GET /{import_path}[@version]`
pub async fn package(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<PackageQuery>,
    uri: Uri,
) -> Response {
    catch_panics(&uri, serve_package(state, path, query, uri.query())).await
}

async fn serve_package(
    state: Arc<AppState>,
    path: String,
    query: PackageQuery,
    raw_query: Option<&str>,
) -> Response {
    let (import_path, version) = split_version(&path);
    let fail = |err| error_response(err, &import_path, version.as_deref(), raw_query);

    let Some(view) = View::parse(query.view.as_deref()) else {
        return message(StatusCode::BAD_REQUEST, "Unknown view.");
    };
    let platform = match platform_or_default(&state, query.platform.as_deref()) {
        Ok(platform) => platform,
        Err(err) => return fail(err),
    };

    let request = LoadRequest {
        import_path: import_path.clone(),
        version: version.clone().unwrap_or_else(|| LATEST.to_string()),
        platform: platform.clone(),
        needs: view.needs(),
    };
    let loaded = match state.loader.load(&request).await {
        Ok(loaded) => loaded,
        Err(err) => return fail(err),
    };

    if view != View::Graph {
        return Json(loaded).into_response();
    }

    let Some(repo) = &state.repo else {
        return fail(Error::NotFound);
    };
    let depth = query.depth.unwrap_or(DEFAULT_GRAPH_DEPTH);
    match repo.import_graph(&platform, &import_path, depth) {
        Ok(graph) => Json(graph).into_response(),
        Err(err) => fail(err.into()),
    }
}

/// `GET /-/search?q=...`
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
    uri: Uri,
) -> Response {
    catch_panics(&uri, serve_search(state, query)).await
}

async fn serve_search(state: Arc<AppState>, query: SearchQuery) -> Response {
    let q = query.q.trim();
    if q.is_empty() {
        return message(StatusCode::BAD_REQUEST, "Empty search query.");
    }
    let platform = match platform_or_default(&state, query.platform.as_deref()) {
        Ok(platform) => platform,
        Err(err) => return error_response(err, q, None, None),
    };
    let Some(repo) = &state.repo else {
        return error_response(Error::NotFound, q, None, None);
    };

    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    match repo.search(&platform, q, limit) {
        Ok(results) => Json(results).into_response(),
        Err(err) => error_response(err.into(), q, None, None),
    }
}
