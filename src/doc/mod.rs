//! Go package documentation
//!
//! - [`build`]: build constraint evaluation for a target platform
//! - [`parse`]: tree-sitter extraction of a package's exported API
//! - [`synopsis`]: one-line summaries from doc comments
//!
//! [`parse_module`] turns a module's file tree into one [`Package`] per
//! directory that builds on the requested platform.

pub mod build;
pub mod parse;
pub mod synopsis;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::module::{Module, Platform};
use crate::source::tree::{FileTree, read_to_string};

/// A const or var declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    /// Exported names declared
    pub names: Vec<String>,
    pub doc: String,
    /// Declaration source text
    pub decl: String,
}

/// A function or method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Func {
    pub name: String,
    pub doc: String,
    /// Signature source text, without the body
    pub decl: String,
    /// Receiver type as written (`*T`), for methods
    pub recv: Option<String>,
    pub examples: Vec<Example>,
}

/// A type with everything grouped under it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Type {
    pub name: String,
    pub doc: String,
    pub decl: String,
    /// Consts whose first spec is declared with this type
    pub consts: Vec<Value>,
    pub vars: Vec<Value>,
    /// Constructors: funcs whose first result is `T` or `*T`
    pub funcs: Vec<Func>,
    pub methods: Vec<Func>,
    pub examples: Vec<Example>,
}

/// A runnable example from a `_test.go` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    /// What the example documents: "" for the package, `F`, `T` or `T_M`
    pub name: String,
    pub suffix: String,
    pub doc: String,
    pub code: String,
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
}

/// Documentation for one package at one module version on one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub import_path: String,
    pub module_path: String,
    pub version: String,
    pub platform: Platform,
    pub name: String,
    pub synopsis: String,
    pub doc: String,
    /// `package main`
    pub is_command: bool,
    pub consts: Vec<Value>,
    pub vars: Vec<Value>,
    pub funcs: Vec<Func>,
    pub types: Vec<Type>,
    pub examples: Vec<Example>,
    /// Sorted, deduplicated
    pub imports: Vec<String>,
    /// Platform-filtered non-test sources
    pub source: Vec<SourceFile>,
}

impl Package {
    pub fn summary(&self) -> PackageSummary {
        PackageSummary {
            import_path: self.import_path.clone(),
            synopsis: self.synopsis.clone(),
        }
    }
}

/// Import path and synopsis, for listings and search results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageSummary {
    pub import_path: String,
    pub synopsis: String,
}

/// Directories never treated as packages, at any depth.
fn is_ignored_dir(name: &str) -> bool {
    name == "vendor" || name == "testdata" || name.starts_with('_') || name.starts_with('.')
}

fn split_dir(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

/// Reports whether `dir` is `ancestor` or lies beneath it.
fn within(dir: &str, ancestor: &str) -> bool {
    dir == ancestor
        || (dir.len() > ancestor.len()
            && dir.starts_with(ancestor)
            && dir.as_bytes()[ancestor.len()] == b'/')
}

/// Go files of the module grouped by directory, nested modules and ignored
/// directories left out.
fn package_dirs(tree: &dyn FileTree) -> BTreeMap<String, Vec<String>> {
    let paths = tree.paths();

    let nested_modules: HashSet<&str> = paths
        .iter()
        .filter_map(|p| p.strip_suffix("/go.mod"))
        .collect();

    let mut dirs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in &paths {
        if !path.ends_with(".go") {
            continue;
        }
        let (dir, _) = split_dir(path);
        if !dir.is_empty() && dir.split('/').any(is_ignored_dir) {
            continue;
        }
        if nested_modules.iter().any(|m| within(dir, m)) {
            continue;
        }
        dirs.entry(dir.to_string()).or_default().push(path.clone());
    }

    for files in dirs.values_mut() {
        files.sort();
    }
    dirs
}

fn import_path(module: &Module, dir: &str) -> String {
    if module.is_std() {
        dir.to_string()
    } else if dir.is_empty() {
        module.path.clone()
    } else {
        format!("{}/{}", module.path, dir)
    }
}

/// Parses every package of a module that builds on `platform`.
///
/// Directories without buildable files are skipped silently; directories
/// that fail to parse are logged and skipped. The result is sorted by
/// import path.
pub fn parse_module(tree: &dyn FileTree, module: &Module, platform: &Platform) -> Vec<Package> {
    let mut packages = Vec::new();

    for (dir, paths) in package_dirs(tree) {
        let import_path = import_path(module, &dir);
        if import_path.is_empty() {
            continue;
        }

        let mut files = Vec::new();
        let mut test_files = Vec::new();
        for path in &paths {
            let (_, name) = split_dir(path);
            let content = match read_to_string(tree, path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", path, e);
                    continue;
                }
            };
            if !build::matches_platform(name, &content, platform) {
                continue;
            }
            let file = SourceFile {
                name: name.to_string(),
                content,
            };
            if name.ends_with("_test.go") {
                test_files.push(file);
            } else {
                files.push(file);
            }
        }

        if files.is_empty() {
            debug!("No buildable files for {} on {}", import_path, platform);
            continue;
        }

        let docs = match parse::parse_package(&import_path, &files, &test_files) {
            Ok(docs) => docs,
            Err(e) => {
                warn!("Skipping package {}: {}", import_path, e);
                continue;
            }
        };

        packages.push(Package {
            import_path,
            module_path: module.path.clone(),
            version: module.version.clone(),
            platform: platform.clone(),
            synopsis: synopsis::synopsis(&docs.doc),
            is_command: docs.name == "main",
            name: docs.name,
            doc: docs.doc,
            consts: docs.consts,
            vars: docs.vars,
            funcs: docs.funcs,
            types: docs.types,
            examples: docs.examples,
            imports: docs.imports,
            source: files,
        });
    }

    packages.sort_by(|a, b| a.import_path.cmp(&b.import_path));
    packages
}
