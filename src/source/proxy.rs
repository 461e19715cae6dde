//! Go module proxy source
//!
//! Speaks the module proxy protocol:
//! - `GET {base}/{module}/@v/list` - known versions, one per line
//! - `GET {base}/{module}/@latest` - fallback when the list is empty
//! - `GET {base}/{module}/@v/{version}.info` - version and commit time
//! - `GET {base}/{module}/@v/{version}.mod` - go.mod of that version
//! - `GET {base}/{module}/@v/{version}.zip` - module contents

use tracing::{debug, warn};

use crate::error::SourceError;
use crate::module::path::escape_path;
use crate::module::version::{self, LATEST};
use crate::source::gomod::GoMod;
use crate::source::tree::{FileTree, MAX_MODULE_ZIP_SIZE, ZipTree};
use crate::source::{ModuleInfo, Source, VersionInfo};

/// Default base URL for Go proxy
pub const DEFAULT_BASE_URL: &str = "https://proxy.golang.org";

/// Source implementation for the Go module proxy protocol
pub struct ProxySource {
    client: reqwest::Client,
    base_url: String,
    max_zip_size: u64,
}

impl ProxySource {
    /// Creates a new ProxySource with a custom base URL
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client: reqwest::Client::builder().user_agent("godocs").build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_zip_size: MAX_MODULE_ZIP_SIZE,
        })
    }

    /// Sets the largest module zip `files` will download.
    pub fn with_max_zip_size(mut self, max: u64) -> Self {
        self.max_zip_size = max;
        self
    }

    async fn get(&self, module_path: &str, endpoint: &str) -> Result<reqwest::Response, SourceError> {
        // Go proxy expects module path to be URL-encoded, with uppercase letters
        // escaped as !{lowercase}. For example: github.com/Azure -> github.com/!azure
        let url = format!("{}/{}/{}", self.base_url, escape_path(module_path), endpoint);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        // Go proxy returns 404 or 410 for modules that don't exist
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(SourceError::NotFound(module_path.to_string()));
        }

        if !status.is_success() {
            warn!("Go proxy returned status {}: {}", status, url);
            return Err(SourceError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        Ok(response)
    }

    async fn get_text(&self, module_path: &str, endpoint: &str) -> Result<String, SourceError> {
        self.get(module_path, endpoint).await?.text().await.map_err(|e| {
            warn!("Failed to read Go proxy response: {}", e);
            SourceError::InvalidResponse(e.to_string())
        })
    }

    async fn list(&self, module_path: &str) -> Result<Vec<String>, SourceError> {
        let body = self.get_text(module_path, "@v/list").await?;

        // Go proxy returns versions one per line
        let mut versions: Vec<String> = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        version::sort_descending(&mut versions);
        Ok(versions)
    }

    async fn info(&self, module_path: &str, version: &str) -> Result<VersionInfo, SourceError> {
        let endpoint = if version == LATEST {
            "@latest".to_string()
        } else {
            format!("@v/{}.info", escape_path(version))
        };
        let body = self.get_text(module_path, &endpoint).await?;
        serde_json::from_str(&body).map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }

    async fn go_mod(&self, module_path: &str, version: &str) -> Result<GoMod, SourceError> {
        let endpoint = format!("@v/{}.mod", escape_path(version));
        let body = self.get_text(module_path, &endpoint).await?;
        Ok(GoMod::parse(&body))
    }
}

impl Default for ProxySource {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_zip_size: MAX_MODULE_ZIP_SIZE,
        }
    }
}

#[async_trait::async_trait]
impl Source for ProxySource {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn module(&self, module_path: &str, version: &str) -> Result<ModuleInfo, SourceError> {
        let versions = self.list(module_path).await?;

        let query = match (version, versions.first()) {
            (LATEST, Some(latest)) => latest.clone(),
            _ => version.to_string(),
        };
        let info = self.info(module_path, &query).await?;

        let go_mod = self.go_mod(module_path, &info.version).await?;
        let deprecated = match versions.first() {
            Some(latest) if *latest != info.version => {
                self.go_mod(module_path, latest).await?.deprecated
            }
            _ => go_mod.deprecated,
        };

        let versions = if versions.is_empty() {
            vec![info.version.clone()]
        } else {
            versions
        };

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
        let endpoint = format!("@v/{}.zip", escape_path(&info.version));
        let mut response = self.get(&info.module_path, &endpoint).await?;
        let too_large = || {
            warn!("{}@{} zip exceeds {} bytes", info.module_path, info.version, self.max_zip_size);
            SourceError::TooLarge(format!("{}@{}", info.module_path, info.version))
        };
        if response
            .content_length()
            .is_some_and(|len| len > self.max_zip_size)
        {
            return Err(too_large());
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (bytes.len() + chunk.len()) as u64 > self.max_zip_size {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        let prefix = format!("{}@{}/", info.module_path, info.version);
        let tree = ZipTree::from_bytes(bytes, prefix)?;
        Ok(Box::new(tree))
    }
}
