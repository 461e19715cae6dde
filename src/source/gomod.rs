//! go.mod parser
//!
//! Only the parts the documentation server needs: the declared module path and
//! a deprecation notice.
//!
//! Format examples:
//! - `module github.com/foo/bar`
//! - `module "github.com/foo/bar" // Deprecated: use github.com/foo/baz`
//! - A `// Deprecated:` paragraph in the comment block directly above `module`.

use std::sync::LazyLock;

use regex::Regex;

/// Match: module path [// comment]
static MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^module\s+"?([^"\s]+)"?\s*(?://\s?(.*))?$"#).expect("valid module regex")
});

/// Parsed go.mod contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoMod {
    pub module: Option<String>,
    pub deprecated: Option<String>,
}

impl GoMod {
    pub fn parse(content: &str) -> Self {
        let mut leading_comments: Vec<&str> = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();

            if let Some(comment) = trimmed.strip_prefix("//") {
                leading_comments.push(comment.strip_prefix(' ').unwrap_or(comment));
                continue;
            }

            if let Some(caps) = MODULE_RE.captures(trimmed) {
                let module = caps.get(1).map(|m| m.as_str().to_string());
                let mut comments = leading_comments;
                if let Some(trailing) = caps.get(2) {
                    comments.push(trailing.as_str());
                }
                return Self {
                    module,
                    deprecated: deprecation(&comments),
                };
            }

            leading_comments = Vec::new();
        }

        Self::default()
    }
}

/// Extracts the text of a `Deprecated:` paragraph from comment lines.
fn deprecation(comments: &[&str]) -> Option<String> {
    let mut message: Option<Vec<&str>> = None;

    for line in comments {
        let line = line.trim();
        match message.as_mut() {
            None => {
                if let Some(rest) = line.strip_prefix("Deprecated:") {
                    message = Some(vec![rest.trim()]);
                }
            }
            Some(_) if line.is_empty() => break,
            Some(lines) => lines.push(line),
        }
    }

    message
        .map(|lines| lines.join(" ").trim().to_string())
        .filter(|m| !m.is_empty())
}
