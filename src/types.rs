//! Shared identifiers for repositories and articles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for identifier parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0}")]
    InvalidCharacter(char),
    #[error("value cannot start with '{0}'")]
    InvalidStart(char),
    #[error("value cannot end with '{0}'")]
    InvalidEnd(char),
    #[error("missing separator '/' in repository")]
    MissingSeparator,
    #[error("invalid owner: {0}")]
    InvalidOwner(#[source] Box<ParseError>),
    #[error("invalid repo: {0}")]
    InvalidRepo(#[source] Box<ParseError>),
    #[error("path segment '..' is not allowed")]
    ParentSegment,
}

/// Identifies the GitHub repository that stores the content (`owner/repo`).
///
/// Owners are alphanumeric plus inner hyphens. Repository names also allow
/// underscores and dots but cannot start with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoKey {
    owner: String,
    repo: String,
}

impl RepoKey {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }
}

fn validate_owner(s: &str) -> Result<(), ParseError> {
    if s.is_empty() {
        return Err(ParseError::Empty);
    }
    if s.starts_with('-') {
        return Err(ParseError::InvalidStart('-'));
    }
    if s.ends_with('-') {
        return Err(ParseError::InvalidEnd('-'));
    }
    match s.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
        Some(c) => Err(ParseError::InvalidCharacter(c)),
        None => Ok(()),
    }
}

fn validate_repo(s: &str) -> Result<(), ParseError> {
    if s.is_empty() {
        return Err(ParseError::Empty);
    }
    if s.starts_with('.') {
        return Err(ParseError::InvalidStart('.'));
    }
    match s
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.'))
    {
        Some(c) => Err(ParseError::InvalidCharacter(c)),
        None => Ok(()),
    }
}

impl FromStr for RepoKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, repo) = s.split_once('/').ok_or(ParseError::MissingSeparator)?;

        validate_owner(owner).map_err(|e| ParseError::InvalidOwner(Box::new(e)))?;
        validate_repo(repo).map_err(|e| ParseError::InvalidRepo(Box::new(e)))?;

        Ok(RepoKey {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

impl TryFrom<String> for RepoKey {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RepoKey> for String {
    fn from(key: RepoKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Check that a content directory is a relative repository path.
pub fn validate_directory(dir: &str) -> Result<(), ParseError> {
    if dir.is_empty() {
        return Err(ParseError::Empty);
    }
    if dir.starts_with('/') {
        return Err(ParseError::InvalidStart('/'));
    }
    if dir.ends_with('/') {
        return Err(ParseError::InvalidEnd('/'));
    }
    if dir.split('/').any(|segment| segment == "..") {
        return Err(ParseError::ParentSegment);
    }
    Ok(())
}

/// URL-safe folder name of an article.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slug(String);

impl Slug {
    /// Sanitize free text into a slug.
    ///
    /// Lowercases, maps everything outside `[a-z0-9_-]` to `-`, collapses
    /// runs of `-` and trims them from both ends. Returns `None` when
    /// nothing usable is left.
    pub fn sanitize(raw: &str) -> Option<Slug> {
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars().flat_map(char::to_lowercase) {
            let c = if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '-'
            };
            if c == '-' && out.ends_with('-') {
                continue;
            }
            out.push(c);
        }

        let trimmed = out.trim_matches('-');
        if trimmed.is_empty() {
            None
        } else {
            Some(Slug(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an article: slugs are only unique within a directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub directory: String,
    pub slug: String,
}

impl ContentKey {
    pub fn new(directory: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            slug: slug.into(),
        }
    }

    /// Repository path of the article folder.
    pub fn folder(&self) -> String {
        format!("{}/{}", self.directory, self.slug)
    }

    /// Repository path of the article's Markdown file.
    pub fn article_path(&self, article_file: &str) -> String {
        format!("{}/{}/{}", self.directory, self.slug, article_file)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.directory, self.slug)
    }
}
