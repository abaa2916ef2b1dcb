//! Articles and their per-directory `index.json` cache.
//!
//! Article files under `{directory}/{slug}/` are the system of record. The
//! cache file of each directory is a projection of their front matter that
//! may lag behind a write; [`reader`] falls back to a directory scan when it
//! is missing, [`cache`] keeps it in step after mutations, and [`writer`]
//! performs the mutations themselves.

pub mod cache;
pub mod images;
pub mod markdown;
pub mod reader;
pub mod record;
pub mod writer;

pub use cache::{CacheOp, CacheSync, MAX_CACHE_WRITE_RETRIES};
pub use reader::{Article, ContentCount, ContentReader};
pub use record::ContentRecord;
pub use writer::{ArticleInput, ArticleUpdate, ArticleWriter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::github::GithubError;
use markdown::MarkdownError;

/// Front matter of one article: an open map of schema-defined fields.
pub type Frontmatter = serde_json::Map<String, serde_json::Value>;

pub const ALREADY_EXISTS: &str = "an article with the same slug already exists";
pub const NOT_FOUND: &str = "article not found";
pub const MODIFIED_CONCURRENTLY: &str = "the article was modified concurrently";
pub const INVALID_SLUG: &str = "slug must contain at least one letter or digit";

/// Unexpected failures. Expected rejections are [`MutationResult`]s instead.
#[derive(Error, Debug)]
pub enum CmsError {
    #[error(transparent)]
    Github(#[from] GithubError),

    #[error("cannot process {path}: {source}")]
    Markdown {
        path: String,
        #[source]
        source: MarkdownError,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown content directory: {0}")]
    UnknownDirectory(String),
}

/// Outcome of a create, update or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    pub success: bool,
    /// Stored slug after sanitizing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MutationResult {
    pub fn applied(slug: impl Into<String>) -> Self {
        Self {
            success: true,
            slug: Some(slug.into()),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            slug: None,
            error: Some(error.into()),
        }
    }
}
