//! Access to the content repository on GitHub.
//!
//! Everything the CMS does to the repository goes through [`RepoApi`]: the
//! single-file contents endpoints for ordinary reads and writes, and the git
//! data endpoints (blob, tree, commit, ref) for multi-file moves that must
//! land in one commit. [`GithubClient`] talks to the REST API; tests use the
//! in-memory implementation in `memory`.

mod client;
#[cfg(test)]
pub mod memory;

pub use client::GithubClient;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RepoKey;

/// File mode of a regular blob in a git tree.
pub const REGULAR_FILE_MODE: &str = "100644";

/// Errors returned by repository operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GithubError {
    /// The path, ref or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The revision tag was stale or the ref moved underneath us.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Any other non-success HTTP status.
    #[error("GitHub API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// Network or TLS failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
    /// A recursive tree listing was cut short and cannot be trusted whole.
    #[error("tree listing truncated: {0}")]
    Truncated(String),
}

/// A file read through the contents API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    /// Revision tag required to overwrite or delete this file.
    pub sha: String,
    pub content: Vec<u8>,
}

impl RemoteFile {
    /// Content as UTF-8 text.
    pub fn text(&self) -> Result<String, GithubError> {
        String::from_utf8(self.content.clone())
            .map_err(|_| GithubError::Decode(format!("{} is not valid UTF-8", self.path)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub sha: String,
    pub kind: EntryKind,
}

/// One blob of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// A change layered onto a base tree. `sha: None` removes the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeChange {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sha: Option<String>,
}

impl TreeChange {
    pub fn upsert(path: impl Into<String>, mode: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: mode.into(),
            kind: "blob",
            sha: Some(sha.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: REGULAR_FILE_MODE.to_string(),
            kind: "blob",
            sha: None,
        }
    }
}

/// Result of a contents-API write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCommit {
    /// New revision tag of the file.
    pub content_sha: String,
    pub commit_sha: String,
}

/// Operations on the branch of the content repository.
///
/// Implementations are bound to one repository and branch.
pub trait RepoApi: Send + Sync {
    fn repository(&self) -> &RepoKey;

    fn branch(&self) -> &str;

    /// Read a file. `Ok(None)` when nothing exists at `path`.
    fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, GithubError>;

    /// List a directory. `Ok(None)` when the directory does not exist.
    fn list_dir(&self, path: &str) -> Result<Option<Vec<DirEntry>>, GithubError>;

    /// Create (`sha: None`) or overwrite (`sha: Some`) a file in one commit.
    fn put_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<FileCommit, GithubError>;

    fn delete_file(&self, path: &str, message: &str, sha: &str) -> Result<(), GithubError>;

    /// Commit id at the tip of the branch.
    fn branch_head(&self) -> Result<String, GithubError>;

    /// Root tree id of a commit.
    fn commit_tree(&self, commit_sha: &str) -> Result<String, GithubError>;

    /// Every entry below a tree, recursively. An incomplete listing is a
    /// [`GithubError::Truncated`] error, never a partial result.
    fn list_tree(&self, tree_sha: &str) -> Result<Vec<TreeEntry>, GithubError>;

    fn create_blob(&self, content: &[u8]) -> Result<String, GithubError>;

    fn create_tree(&self, base_tree: &str, changes: &[TreeChange]) -> Result<String, GithubError>;

    fn create_commit(&self, message: &str, tree_sha: &str, parent: &str) -> Result<String, GithubError>;

    /// Fast-forward the branch to `commit_sha`. A moved branch is a conflict.
    fn update_branch(&self, commit_sha: &str) -> Result<(), GithubError>;
}
