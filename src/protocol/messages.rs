use serde::{Deserialize, Serialize};

use crate::content::images::{ImageUpload, UploadResult};
use crate::content::{Article, ArticleInput, ArticleUpdate, ContentCount, ContentRecord, MutationResult};

/// All RPC methods supported by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Get daemon status
    Status,

    /// List content records, optionally of one directory
    List { directory: Option<String> },

    /// Read one article for editing
    Get { directory: String, slug: String },

    /// Create an article
    Create(ArticleInput),

    /// Edit (and possibly move) an article
    Update(ArticleUpdate),

    /// Delete an article folder
    Delete { directory: String, slug: String },

    /// Rescan a directory and rewrite its cache file
    Rebuild { directory: String },

    /// Article count per content type
    Counts,

    /// Store an image next to an article
    UploadImage(ImageUpload),

    /// Stop the daemon
    Stop,
}

/// Status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub running: bool,
    pub repository: String,
    pub branch: String,
    #[serde(default)]
    pub directories: Vec<String>,
    pub uptime_secs: u64,
    pub version: String,
    pub pid: u32,
}

/// List response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResult {
    pub records: Vec<ContentRecord>,
}

/// Rebuild response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildResult {
    pub directory: String,
    pub count: usize,
}

/// Counts response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountsResult {
    pub counts: Vec<ContentCount>,
}

/// All possible success responses
///
/// Untagged, so variants are tried in order: each one must be told apart by
/// the fields it requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Status(StatusResult),
    List(ListResult),
    Article(Article),
    Upload(UploadResult),
    Mutation(MutationResult),
    Rebuild(RebuildResult),
    Counts(CountsResult),
    Ok(()), // For stop - unit type serializes as null
}

/// RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(-1, msg)
    }
}
