//! Registry of fetches currently running
//!
//! A key is claimed with an atomic test-and-set and released by dropping the
//! returned [`FetchGuard`], so every exit path (error, panic unwind, task
//! abort) frees it.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::module::Platform;

/// Identifies one fetch: a platform, a module or import path, and a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub platform: Platform,
    pub path: String,
    pub version: String,
}

impl FetchKey {
    pub fn new(platform: &Platform, path: &str, version: &str) -> Self {
        Self {
            platform: platform.clone(),
            path: path.to_string(),
            version: version.to_string(),
        }
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.path, self.version, self.platform)
    }
}

#[derive(Debug, Default)]
pub struct InFlight {
    keys: Mutex<HashSet<FetchKey>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key`, or returns `None` if another fetch holds it.
    pub fn try_insert(self: &Arc<Self>, key: FetchKey) -> Option<FetchGuard> {
        let mut keys = match self.keys.lock() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(FetchGuard {
            registry: Arc::clone(self),
            key,
        })
    }

    pub fn contains(&self, key: &FetchKey) -> bool {
        self.keys
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or_else(|poisoned| poisoned.into_inner().contains(key))
    }

    pub fn len(&self) -> usize {
        self.keys
            .lock()
            .map(|keys| keys.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RAII guard releasing a claimed fetch key
#[derive(Debug)]
pub struct FetchGuard {
    registry: Arc<InFlight>,
    key: FetchKey,
}

impl FetchGuard {
    pub fn key(&self) -> &FetchKey {
        &self.key
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        match self.registry.keys.lock() {
            Ok(mut keys) => {
                keys.remove(&self.key);
            }
            Err(poisoned) => {
                warn!("In-flight registry lock poisoned while releasing {}", self.key);
                poisoned.into_inner().remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> FetchKey {
        FetchKey::new(&Platform::default(), path, "latest")
    }

    #[test]
    fn try_insert_rejects_duplicate_until_guard_drops() {
        let inflight = Arc::new(InFlight::new());

        let guard = inflight.try_insert(key("example.com/foo")).unwrap();
        assert!(inflight.try_insert(key("example.com/foo")).is_none());
        assert!(inflight.contains(guard.key()));

        drop(guard);
        assert!(inflight.is_empty());
        assert!(inflight.try_insert(key("example.com/foo")).is_some());
    }

    #[test]
    fn keys_differ_by_platform_and_version() {
        let inflight = Arc::new(InFlight::new());
        let _a = inflight.try_insert(key("example.com/foo")).unwrap();

        let windows = FetchKey::new(&Platform::new("windows", "amd64"), "example.com/foo", "latest");
        let pinned = FetchKey::new(&Platform::default(), "example.com/foo", "v1.0.0");

        let _b = inflight.try_insert(windows).unwrap();
        let _c = inflight.try_insert(pinned).unwrap();
        assert_eq!(inflight.len(), 3);
    }

    #[test]
    fn guard_released_on_panic_unwind() {
        let inflight = Arc::new(InFlight::new());
        let registry = Arc::clone(&inflight);

        let result = std::panic::catch_unwind(move || {
            let _guard = registry.try_insert(key("example.com/panics")).unwrap();
            panic!("fetch blew up");
        });

        assert!(result.is_err());
        assert!(inflight.is_empty());
    }
}
