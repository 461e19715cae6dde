//! Import path and module path utilities

use crate::error::Error;

/// Sentinel module path under which the standard library is served.
pub const STD_MODULE: &str = "std";

/// Reports whether an import path belongs to the standard library.
/// Standard library paths have no dot in their first element (`fmt`, `net/http`).
pub fn is_std_path(import_path: &str) -> bool {
    if import_path == STD_MODULE {
        return true;
    }
    let first = import_path.split('/').next().unwrap_or_default();
    !first.is_empty() && !first.contains('.')
}

/// Checks that `path` is a syntactically valid import path.
pub fn validate_import_path(path: &str) -> Result<(), Error> {
    let invalid = || Error::InvalidPath(path.to_string());

    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return Err(invalid());
    }

    for elem in path.split('/') {
        if elem.is_empty() || elem.starts_with('.') || elem.ends_with('.') {
            return Err(invalid());
        }
        if !elem.chars().all(is_path_char) {
            return Err(invalid());
        }
    }

    Ok(())
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '+')
}

/// Returns the path with its last element removed, or `None` at the root.
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Reports whether `path` is `prefix` or lies beneath it.
pub fn has_path_prefix(path: &str, prefix: &str) -> bool {
    if prefix == STD_MODULE {
        return is_std_path(path);
    }
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

/// Strips the major-version suffix from a module path.
///
/// Examples:
/// - "github.com/foo/bar/v2" -> "github.com/foo/bar"
/// - "gopkg.in/yaml.v3" -> "gopkg.in/yaml"
/// - "github.com/foo/bar" -> "github.com/foo/bar"
pub fn series_path(module_path: &str) -> String {
    if module_path.starts_with("gopkg.in/")
        && let Some((base, major)) = module_path.rsplit_once(".v")
        && is_major(major)
    {
        return base.to_string();
    }

    if let Some((base, last)) = module_path.rsplit_once('/')
        && let Some(major) = last.strip_prefix('v')
        && is_major(major)
        && major != "0"
        && major != "1"
    {
        return base.to_string();
    }

    module_path.to_string()
}

fn is_major(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) && (s == "0" || !s.starts_with('0'))
}

/// Escapes a module path or version for use in proxy URLs and module cache paths.
/// Uppercase letters are escaped as !{lowercase}.
pub fn escape_path(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            result.push('!');
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
