use serde::{Deserialize, Serialize};

use super::Frontmatter;
use crate::types::ContentKey;

/// Longest excerpt kept in the cache, in characters.
pub const EXCERPT_LENGTH: usize = 75;

const FIXED_FIELDS: [&str; 3] = ["slug", "directory", "excerpt"];

/// One entry of a directory's `index.json`.
///
/// Serialized flat: front-matter fields sit next to `slug`, `directory` and
/// `excerpt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub slug: String,
    pub directory: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(flatten)]
    pub frontmatter: Frontmatter,
}

impl ContentRecord {
    /// Build the record for an article from its stored front matter and body.
    pub fn new(key: &ContentKey, frontmatter: &Frontmatter, body: &str) -> Self {
        let mut frontmatter = frontmatter.clone();
        for field in FIXED_FIELDS {
            frontmatter.remove(field);
        }

        Self {
            slug: key.slug.clone(),
            directory: key.directory.clone(),
            excerpt: excerpt(body),
            frontmatter,
        }
    }

    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.directory.clone(), self.slug.clone())
    }
}

/// First non-blank line of `body`, trimmed and cut to [`EXCERPT_LENGTH`]
/// characters with `...` appended when longer.
pub fn excerpt(body: &str) -> String {
    let Some(line) = body.lines().map(str::trim).find(|line| !line.is_empty()) else {
        return String::new();
    };

    if line.chars().count() > EXCERPT_LENGTH {
        let cut: String = line.chars().take(EXCERPT_LENGTH).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}
