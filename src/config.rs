//! CMS configuration (`cms.config.json`).
//!
//! The configuration names the target repository and branch, the content
//! directories with their article file and cache path, and optional webhook
//! endpoints. It is read once when the daemon starts and shared by `Arc`
//! afterwards; nothing in the process mutates it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::types::{ParseError, RepoKey, validate_directory};

/// File name looked up when no config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "cms.config.json";

/// Schema file looked up next to the config file when `schemaPath` is unset.
pub const DEFAULT_SCHEMA_FILE: &str = "frontmatter.scheme.json";

const DEFAULT_ARTICLE_FILE: &str = "index.md";
const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Errors produced while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid content directory '{directory}': {source}")]
    InvalidDirectory {
        directory: String,
        #[source]
        source: ParseError,
    },

    #[error("content directory '{0}' is listed more than once")]
    DuplicateDirectory(String),

    #[error("unsupported metaCache type '{kind}' for '{directory}' (only 'json')")]
    UnsupportedCacheType { directory: String, kind: String },
}

/// Top-level CMS configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmsConfig {
    /// Repository holding the content, `owner/repo`.
    pub target_repository: RepoKey,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Directory for drafts; treated as an extra content type.
    #[serde(default)]
    pub draft_directory: Option<String>,

    #[serde(default)]
    pub content: Vec<ContentType>,

    #[serde(default)]
    pub webhooks: Option<WebhookConfig>,

    /// Token used for GitHub API calls. `GITHUB_TOKEN` takes precedence.
    #[serde(default, skip_serializing)]
    pub github_token: Option<String>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default)]
    pub schema_path: Option<PathBuf>,

    /// Transport timeout for every HTTP call.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_article_file() -> String {
    DEFAULT_ARTICLE_FILE.to_string()
}

/// One content type: a directory of article folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentType {
    pub directory: String,

    #[serde(default = "default_article_file")]
    pub article_file: String,

    #[serde(default)]
    pub meta_cache: Option<MetaCache>,
}

/// Location of the per-directory read cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaCache {
    #[serde(rename = "type", default = "default_cache_kind")]
    pub kind: String,
    pub path: String,
}

fn default_cache_kind() -> String {
    "json".to_string()
}

impl ContentType {
    /// Content type with default article file and cache path.
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            article_file: default_article_file(),
            meta_cache: None,
        }
    }

    /// Repository path of this directory's `index.json`.
    pub fn cache_path(&self) -> String {
        match &self.meta_cache {
            Some(cache) => cache.path.clone(),
            None => format!("{}/index.json", self.directory),
        }
    }
}

/// Outbound webhook settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    /// HMAC key for signing payloads. `WEBHOOK_SECRET` takes precedence.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,

    #[serde(default)]
    pub endpoints: Vec<WebhookEndpoint>,
}

/// A single webhook receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub url: String,

    /// Event types this endpoint wants; empty means all.
    #[serde(default)]
    pub events: Vec<String>,
}

impl FromStr for CmsConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let config: CmsConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }
}

impl CmsConfig {
    /// Read, validate and apply environment overrides.
    ///
    /// A relative `schemaPath` (or the default schema file) is resolved
    /// against the config file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: CmsConfig = data.parse()?;
        config.apply_env(|key| std::env::var(key).ok());

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let schema = config
            .schema_path
            .take()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCHEMA_FILE));
        config.schema_path = Some(if schema.is_absolute() {
            schema
        } else {
            base.join(schema)
        });

        log::debug!(
            "Loaded config for {} ({} content types)",
            config.target_repository,
            config.content_types().len()
        );
        Ok(config)
    }

    /// Apply `GITHUB_TOKEN` and `WEBHOOK_SECRET` from the given lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("GITHUB_TOKEN").filter(|t| !t.is_empty()) {
            self.github_token = Some(token);
        }
        if let Some(secret) = lookup("WEBHOOK_SECRET").filter(|s| !s.is_empty()) {
            if let Some(webhooks) = self.webhooks.as_mut() {
                webhooks.secret = Some(secret);
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for content in &self.content {
            validate_directory(&content.directory).map_err(|source| {
                ConfigError::InvalidDirectory {
                    directory: content.directory.clone(),
                    source,
                }
            })?;
            if !seen.insert(content.directory.as_str()) {
                return Err(ConfigError::DuplicateDirectory(content.directory.clone()));
            }
            if let Some(cache) = &content.meta_cache {
                if cache.kind != "json" {
                    return Err(ConfigError::UnsupportedCacheType {
                        directory: content.directory.clone(),
                        kind: cache.kind.clone(),
                    });
                }
            }
        }

        if let Some(draft) = &self.draft_directory {
            validate_directory(draft).map_err(|source| ConfigError::InvalidDirectory {
                directory: draft.clone(),
                source,
            })?;
        }

        Ok(())
    }

    /// Configured content types plus the draft directory when it is not
    /// already one of them.
    pub fn content_types(&self) -> Vec<ContentType> {
        let mut types = self.content.clone();
        if let Some(draft) = &self.draft_directory {
            if !types.iter().any(|c| &c.directory == draft) {
                types.push(ContentType::new(draft.clone()));
            }
        }
        types
    }

    /// Look up the content type responsible for `directory`.
    pub fn content_type(&self, directory: &str) -> Option<ContentType> {
        self.content_types()
            .into_iter()
            .find(|c| c.directory == directory)
    }
}

/// Resolve the config path: explicit flag, then `INKRAFT_CONFIG`, then the
/// working directory.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os("INKRAFT_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "targetRepository": "octocat/blog",
        "branch": "content",
        "draftDirectory": "drafts",
        "content": [
            { "directory": "posts", "articleFile": "index.md",
              "metaCache": { "type": "json", "path": "posts/index.json" } },
            { "directory": "scraps" }
        ],
        "webhooks": {
            "enabled": true,
            "secret": "from-file",
            "endpoints": [{ "name": "vercel", "url": "https://hooks.example/deploy", "events": ["create"] }]
        }
    }"#;

    #[test]
    fn parses_sample_config() {
        let config: CmsConfig = SAMPLE.parse().unwrap();

        assert_eq!(config.target_repository.to_string(), "octocat/blog");
        assert_eq!(config.branch, "content");
        assert_eq!(config.content.len(), 2);
        assert_eq!(config.content[1].article_file, "index.md");
        assert_eq!(config.content[1].cache_path(), "scraps/index.json");
        assert_eq!(config.api_base_url, "https://api.github.com");
        assert_eq!(config.http_timeout_secs, 30);

        let webhooks = config.webhooks.unwrap();
        assert!(webhooks.enabled);
        assert_eq!(webhooks.endpoints[0].events, vec!["create".to_string()]);
    }

    #[test]
    fn branch_defaults_to_main() {
        let config: CmsConfig = r#"{ "targetRepository": "a/b" }"#.parse().unwrap();
        assert_eq!(config.branch, "main");
        assert!(config.content_types().is_empty());
    }

    #[test]
    fn draft_directory_is_appended_once() {
        let config: CmsConfig = SAMPLE.parse().unwrap();
        let dirs: Vec<String> = config
            .content_types()
            .into_iter()
            .map(|c| c.directory)
            .collect();
        assert_eq!(dirs, vec!["posts", "scraps", "drafts"]);

        let listed: CmsConfig = r#"{
            "targetRepository": "a/b",
            "draftDirectory": "posts",
            "content": [{ "directory": "posts" }]
        }"#
        .parse()
        .unwrap();
        assert_eq!(listed.content_types().len(), 1);
    }

    #[test]
    fn draft_content_type_uses_defaults() {
        let config: CmsConfig = SAMPLE.parse().unwrap();
        let drafts = config.content_type("drafts").unwrap();
        assert_eq!(drafts.article_file, "index.md");
        assert_eq!(drafts.cache_path(), "drafts/index.json");
        assert!(config.content_type("missing").is_none());
    }

    #[test]
    fn rejects_invalid_repository() {
        let result = r#"{ "targetRepository": "no-slash" }"#.parse::<CmsConfig>();
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_duplicate_directory() {
        let result = r#"{
            "targetRepository": "a/b",
            "content": [{ "directory": "posts" }, { "directory": "posts" }]
        }"#
        .parse::<CmsConfig>();
        assert!(matches!(result, Err(ConfigError::DuplicateDirectory(d)) if d == "posts"));
    }

    #[test]
    fn rejects_parent_directory() {
        let result = r#"{
            "targetRepository": "a/b",
            "content": [{ "directory": "../etc" }]
        }"#
        .parse::<CmsConfig>();
        assert!(matches!(result, Err(ConfigError::InvalidDirectory { .. })));
    }

    #[test]
    fn rejects_non_json_cache() {
        let result = r#"{
            "targetRepository": "a/b",
            "content": [{ "directory": "posts", "metaCache": { "type": "yaml", "path": "posts/index.yaml" } }]
        }"#
        .parse::<CmsConfig>();
        assert!(matches!(result, Err(ConfigError::UnsupportedCacheType { .. })));
    }

    #[test]
    fn env_overrides_token_and_secret() {
        let mut config: CmsConfig = SAMPLE.parse().unwrap();
        config.apply_env(|key| match key {
            "GITHUB_TOKEN" => Some("ghp_env".to_string()),
            "WEBHOOK_SECRET" => Some("from-env".to_string()),
            _ => None,
        });

        assert_eq!(config.github_token.as_deref(), Some("ghp_env"));
        assert_eq!(
            config.webhooks.unwrap().secret.as_deref(),
            Some("from-env")
        );
    }

    #[test]
    fn load_resolves_schema_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, SAMPLE).unwrap();

        let config = CmsConfig::load(&path).unwrap();
        assert_eq!(
            config.schema_path.unwrap(),
            dir.path().join(DEFAULT_SCHEMA_FILE)
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = CmsConfig::load(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
