//! Project (forge link) metadata
//!
//! Link templates use `{commit}`, `{dir}`, `{/dir}`, `{file}` and `{line}`
//! placeholders. They come from the `go-source` meta tag served at
//! `https://{series_path}?go-get=1`, or are derived from the `go-import`
//! repository URL when it points at a known forge.

use std::sync::LazyLock;

#[cfg(test)]
use mockall::automock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SourceError;
use crate::module::path::has_path_prefix;

/// Default scheme prefix for probe URLs
pub const DEFAULT_BASE_URL: &str = "https://";

static META_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<meta\s[^>]*>"#).expect("valid meta regex"));
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bname\s*=\s*["']([^"']*)["']"#).expect("valid name regex")
});
static CONTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bcontent\s*=\s*["']([^"']*)["']"#).expect("valid content regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub home: String,
    pub directory: String,
    pub file: String,
    pub line: String,
}

impl Project {
    /// Links for a repository URL on a known forge.
    pub fn from_repo_url(repo_url: &str) -> Option<Self> {
        let url = repo_url.trim_end_matches('/').trim_end_matches(".git");
        let host = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))?
            .split('/')
            .next()?;

        let (directory, file, anchor) = match host {
            "github.com" => (
                format!("{url}/tree/{{commit}}{{/dir}}"),
                format!("{url}/blob/{{commit}}{{/dir}}/{{file}}"),
                "#L{line}",
            ),
            "gitlab.com" => (
                format!("{url}/-/tree/{{commit}}{{/dir}}"),
                format!("{url}/-/blob/{{commit}}{{/dir}}/{{file}}"),
                "#L{line}",
            ),
            "codeberg.org" | "gitea.com" => (
                format!("{url}/src/commit/{{commit}}{{/dir}}"),
                format!("{url}/src/commit/{{commit}}{{/dir}}/{{file}}"),
                "#L{line}",
            ),
            "bitbucket.org" => (
                format!("{url}/src/{{commit}}{{/dir}}"),
                format!("{url}/src/{{commit}}{{/dir}}/{{file}}"),
                "#lines-{line}",
            ),
            "git.sr.ht" => (
                format!("{url}/tree/{{commit}}{{/dir}}"),
                format!("{url}/tree/{{commit}}/item{{/dir}}/{{file}}"),
                "#L{line}",
            ),
            _ => return None,
        };

        Some(Self {
            home: url.to_string(),
            line: format!("{file}{anchor}"),
            directory,
            file,
        })
    }

    /// The standard library's links on the Go source mirror.
    pub fn std() -> Self {
        let url = "https://cs.opensource.google/go/go";
        Self {
            home: url.to_string(),
            directory: format!("{url}/+/{{commit}}:src{{/dir}}"),
            file: format!("{url}/+/{{commit}}:src{{/dir}}/{{file}}"),
            line: format!("{url}/+/{{commit}}:src{{/dir}}/{{file}};l={{line}}"),
        }
    }
}

/// Meta tags `name` -> `content` in document order.
fn meta_tags(html: &str) -> Vec<(String, String)> {
    META_RE
        .find_iter(html)
        .filter_map(|tag| {
            let tag = tag.as_str();
            let name = NAME_RE.captures(tag)?.get(1)?.as_str().to_string();
            let content = CONTENT_RE.captures(tag)?.get(1)?.as_str().to_string();
            Some((name, content))
        })
        .collect()
}

/// Extracts project links for `series_path` from a go-get HTML page.
pub fn parse_project(series_path: &str, html: &str) -> Option<Project> {
    let tags = meta_tags(html);

    let applies = |prefix: &str| has_path_prefix(series_path, prefix);

    for (name, content) in &tags {
        if name != "go-source" {
            continue;
        }
        let fields: Vec<&str> = content.split_whitespace().collect();
        if fields.len() != 4 || !applies(fields[0]) {
            continue;
        }
        let (home, directory, line) = (fields[1], fields[2], fields[3]);
        let file = line.split('#').next().unwrap_or(line);
        if home == "_" && directory == "_" && line == "_" {
            continue;
        }
        return Some(Project {
            home: home.to_string(),
            directory: directory.to_string(),
            file: file.to_string(),
            line: line.to_string(),
        });
    }

    tags.iter()
        .filter(|(name, _)| name == "go-import")
        .filter_map(|(_, content)| {
            let fields: Vec<&str> = content.split_whitespace().collect();
            (fields.len() == 3 && applies(fields[0]) && fields[1] == "git")
                .then(|| Project::from_repo_url(fields[2]))
                .flatten()
        })
        .next()
}

/// Trait for discovering a module's project links
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ProjectProber: Send + Sync {
    /// Returns `Ok(None)` when the path has no recognisable project
    async fn probe(&self, series_path: &str) -> Result<Option<Project>, SourceError>;
}

/// Probes `{base}{series_path}?go-get=1` over HTTP
pub struct HttpProjectProber {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProjectProber {
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client: reqwest::Client::builder().user_agent("godocs").build()?,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ProjectProber for HttpProjectProber {
    async fn probe(&self, series_path: &str) -> Result<Option<Project>, SourceError> {
        // Well-known forges need no round trip.
        let mut parts = series_path.split('/');
        if let (Some(host), Some(owner), Some(repo)) = (parts.next(), parts.next(), parts.next())
            && matches!(host, "github.com" | "gitlab.com" | "codeberg.org" | "bitbucket.org")
        {
            return Ok(Project::from_repo_url(&format!("https://{host}/{owner}/{repo}")));
        }

        let url = format!("{}{}?go-get=1", self.base_url, series_path);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            debug!("No project page for {}: {}", series_path, response.status());
            return Ok(None);
        }

        let html = response.text().await?;
        Ok(parse_project(series_path, &html))
    }
}
