//! Test utilities shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use chrono::DateTime;
use tempfile::TempDir;
use tower::ServiceExt;

use godocs::error::SourceError;
use godocs::fetch::Fetcher;
use godocs::fetch::project::{Project, ProjectProber};
use godocs::loader::Loader;
use godocs::module::version::{self, LATEST};
use godocs::module::Platform;
use godocs::resolver::Resolver;
use godocs::server::AppState;
use godocs::server::routes::router;
use godocs::source::{FileTree, MemoryTree, ModuleInfo, Source, SourceList};
use godocs::store::{Repository, SqliteStore};

struct MemoryModule {
    declared_path: String,
    versions: BTreeMap<String, MemoryTree>,
}

/// In-memory module source
#[derive(Default)]
pub struct MemorySource {
    modules: HashMap<String, MemoryModule>,
    module_calls: AtomicUsize,
    files_calls: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module version. `files` are (path, content) pairs relative to the module root.
    pub fn with_module(mut self, path: &str, version: &str, files: &[(&str, &str)]) -> Self {
        let tree = files
            .iter()
            .fold(MemoryTree::new(), |tree, (name, content)| {
                tree.with_file(*name, *content)
            });
        self.modules
            .entry(path.to_string())
            .or_insert_with(|| MemoryModule {
                declared_path: path.to_string(),
                versions: BTreeMap::new(),
            })
            .versions
            .insert(version.to_string(), tree);
        self
    }

    /// Makes the module's go.mod declare another path.
    pub fn with_declared_path(mut self, path: &str, declared: &str) -> Self {
        if let Some(module) = self.modules.get_mut(path) {
            module.declared_path = declared.to_string();
        }
        self
    }

    /// Number of metadata lookups served
    pub fn module_calls(&self) -> usize {
        self.module_calls.load(Ordering::SeqCst)
    }

    /// Number of file trees opened
    pub fn files_calls(&self) -> usize {
        self.files_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn module(&self, module_path: &str, version: &str) -> Result<ModuleInfo, SourceError> {
        self.module_calls.fetch_add(1, Ordering::SeqCst);
        let not_found = || SourceError::NotFound(module_path.to_string());
        let module = self.modules.get(module_path).ok_or_else(not_found)?;

        let mut versions: Vec<String> = module.versions.keys().cloned().collect();
        version::sort_descending(&mut versions);
        let resolved = if version == LATEST {
            version::latest(&versions).ok_or_else(not_found)?.to_string()
        } else if module.versions.contains_key(version) {
            version.to_string()
        } else {
            return Err(not_found());
        };

        Ok(ModuleInfo {
            module_path: module_path.to_string(),
            declared_path: Some(module.declared_path.clone()),
            version: resolved,
            versions,
            commit_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            deprecated: None,
        })
    }

    async fn files(&self, info: &ModuleInfo) -> Result<Box<dyn FileTree>, SourceError> {
        self.files_calls.fetch_add(1, Ordering::SeqCst);
        self.modules
            .get(&info.module_path)
            .and_then(|module| module.versions.get(&info.version))
            .map(|tree| Box::new(tree.clone()) as Box<dyn FileTree>)
            .ok_or_else(|| SourceError::NotFound(info.module_path.clone()))
    }
}

/// A prober that never finds a project
pub struct NoProject;

#[async_trait]
impl ProjectProber for NoProject {
    async fn probe(&self, _series_path: &str) -> Result<Option<Project>, SourceError> {
        Ok(None)
    }
}

/// Create a temporary store
pub fn create_test_store() -> (TempDir, Arc<SqliteStore>) {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteStore::new(&temp_dir.path().join("godocs.db")).unwrap();
    (temp_dir, Arc::new(store))
}

pub struct StoreApp {
    pub _temp_dir: TempDir,
    pub repo: Arc<SqliteStore>,
    pub fetcher: Arc<Fetcher>,
    pub router: Router,
}

/// Build a store-backed app over `source`
pub fn store_app(source: Arc<MemorySource>) -> StoreApp {
    let (temp_dir, repo) = create_test_store();
    let dyn_repo: Arc<dyn Repository> = repo.clone();
    let resolver = Arc::new(Resolver::new(SourceList::new(vec![source as Arc<dyn Source>])));
    let fetcher = Arc::new(Fetcher::new(
        Arc::clone(&dyn_repo),
        resolver,
        Arc::new(NoProject),
        Duration::from_secs(10),
    ));
    let state = Arc::new(AppState {
        loader: Loader::Store {
            repo: Arc::clone(&dyn_repo),
            fetcher: Arc::clone(&fetcher),
            deadline: Duration::from_secs(10),
        },
        repo: Some(dyn_repo),
        default_platform: Platform::default(),
    });

    StoreApp {
        _temp_dir: temp_dir,
        repo,
        fetcher,
        router: router(state),
    }
}

/// Build a direct-mode app over `source`
pub fn direct_app(source: Arc<MemorySource>) -> Router {
    let resolver = Arc::new(Resolver::new(SourceList::new(vec![source as Arc<dyn Source>])));
    router(Arc::new(AppState {
        loader: Loader::Direct {
            resolver,
            prober: Arc::new(NoProject),
        },
        repo: None,
        default_platform: Platform::default(),
    }))
}

/// Send a GET request and collect the response
pub async fn get(router: &Router, uri: &str) -> (StatusCode, HeaderMap, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

/// Send a GET request and parse the JSON body
pub async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = get(router, uri).await;
    let json = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub const GO_MOD: &str = "module example.com/lib\n";

pub const LIB_GO: &str = r#"// Package lib provides helpers for tests.
package lib

import (
	"fmt"

	"example.com/lib/internal/fmtx"
)

// Greeting is the default greeting.
const Greeting = "hello"

// Greeter greets people.
type Greeter struct {
	Name string
}

// NewGreeter returns a Greeter for name.
func NewGreeter(name string) *Greeter {
	return &Greeter{Name: name}
}

// Greet returns the greeting.
func (g *Greeter) Greet() string {
	return fmtx.Join(Greeting, g.Name)
}

// Print prints a greeting.
func Print(name string) {
	fmt.Println(NewGreeter(name).Greet())
}
"#;

pub const FMTX_GO: &str = r#"// Package fmtx joins strings.
package fmtx

import "strings"

// Join joins words with a space.
func Join(words ...string) string {
	return strings.Join(words, " ")
}
"#;

pub const LIB_WINDOWS_GO: &str = r#"package lib

import "syscall"

// Handle is a Windows handle.
type Handle = syscall.Handle
"#;

/// The `example.com/lib` module used across tests
pub fn lib_files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("go.mod", GO_MOD),
        ("lib.go", LIB_GO),
        ("lib_windows.go", LIB_WINDOWS_GO),
        ("internal/fmtx/fmtx.go", FMTX_GO),
    ]
}
