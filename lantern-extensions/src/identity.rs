//! Extension identities
//!
//! An identity is derived once from where the extension came from and never
//! changes afterwards. It keys every registry in the runtime and is the token
//! an extension process presents when it registers on the socket.
//!
//! Remote sources map to their reversed host labels followed by the path
//! segments (`https://github.com/foo/bar` becomes `com.github.foo.bar`).
//! Local directories map to the directory name.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::path::Path;
use url::Url;

use crate::error::IdentityError;

/// Hosts whose URLs are trimmed to `user/repo`
const KNOWN_FORGES: [&str; 3] = ["github.com", "gitlab.com", "codeberg.org"];

/// Stable identifier of an extension
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionId(String);

impl ExtensionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity of an extension installed from a remote URL
    pub fn from_url(source: &str) -> Result<Self, IdentityError> {
        let invalid = |reason: &str| IdentityError::InvalidUrl {
            url: source.to_string(),
            reason: reason.to_string(),
        };

        let mut normalized = source.trim().to_lowercase();
        if let Some(rest) = normalized.strip_prefix("git@") {
            normalized = format!("git://{}", rest.replacen(':', "/", 1));
        }

        let url = Url::parse(&normalized).map_err(|e| invalid(&e.to_string()))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        if url.scheme() == "file" {
            return segments
                .last()
                .map(|name| Self::new(*name))
                .ok_or_else(|| invalid("missing directory name"));
        }

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host"))?;
        if segments.is_empty() {
            return Err(invalid("missing repository path"));
        }

        let path: Vec<&str> = if KNOWN_FORGES.contains(&host) {
            match segments.as_slice() {
                [user, repo, ..] => vec![*user, repo.strip_suffix(".git").unwrap_or(*repo)],
                _ => return Err(invalid("expected <user>/<repository>")),
            }
        } else {
            segments
        };

        let labels: Vec<&str> = host.split('.').rev().chain(path).collect();
        Ok(Self::new(labels.join(".")))
    }

    /// Identity of an extension living in a local directory
    pub fn from_dir(dir: &Path) -> Result<Self, IdentityError> {
        dir.file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .map(Self::new)
            .ok_or_else(|| IdentityError::InvalidPath(dir.display().to_string()))
    }

    /// URL or local path, whichever `source` looks like
    pub fn parse_source(source: &str) -> Result<Self, IdentityError> {
        let trimmed = source.trim();
        if trimmed.contains("://") || trimmed.starts_with("git@") {
            Self::from_url(trimmed)
        } else {
            Self::from_dir(Path::new(trimmed))
        }
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ExtensionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ExtensionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExtensionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ExtensionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_urls() {
        assert_eq!(
            ExtensionId::from_url("https://github.com/foo/bar").unwrap().as_str(),
            "com.github.foo.bar"
        );
        assert_eq!(
            ExtensionId::from_url("https://example.com/team/ext/repo").unwrap().as_str(),
            "com.example.team.ext.repo"
        );
    }

    #[test]
    fn test_forge_urls_are_trimmed() {
        for url in [
            "https://github.com/Foo/Bar.git",
            "https://github.com/foo/bar/blob/master/README.md",
            "https://github.com/foo/bar/",
            "git@github.com:foo/bar.git",
        ] {
            assert_eq!(
                ExtensionId::from_url(url).unwrap().as_str(),
                "com.github.foo.bar",
                "{}",
                url
            );
        }
        assert_eq!(
            ExtensionId::from_url("https://codeberg.org/me/tool/issues")
                .unwrap()
                .as_str(),
            "org.codeberg.me.tool"
        );
    }

    #[test]
    fn test_invalid_urls() {
        assert!(ExtensionId::from_url("https://github.com").is_err());
        assert!(ExtensionId::from_url("https://github.com/onlyuser").is_err());
        assert!(ExtensionId::from_url("not a url").is_err());
    }

    #[test]
    fn test_local_directories() {
        assert_eq!(
            ExtensionId::from_dir(Path::new("/home/me/extensions/demo"))
                .unwrap()
                .as_str(),
            "demo"
        );
        assert_eq!(
            ExtensionId::from_url("file:///home/me/extensions/demo/")
                .unwrap()
                .as_str(),
            "demo"
        );
        assert!(ExtensionId::from_dir(Path::new("/")).is_err());
    }

    #[test]
    fn test_parse_source_dispatch() {
        assert_eq!(
            ExtensionId::parse_source("https://gitlab.com/a/b").unwrap().as_str(),
            "com.gitlab.a.b"
        );
        assert_eq!(ExtensionId::parse_source("./local/thing").unwrap().as_str(), "thing");
    }
}
