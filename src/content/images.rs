//! Article images: raw URLs, Markdown link rewriting and uploads.
//!
//! Images live next to the article file. In the stored Markdown they are
//! referenced by bare file name; editors see absolute
//! `raw.githubusercontent.com` URLs so previews work.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::CmsError;
use crate::github::RepoApi;
use crate::types::{RepoKey, validate_directory};

pub const RAW_HOST: &str = "https://raw.githubusercontent.com";

/// Largest accepted upload.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

pub const ALLOWED_MIME_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];

static RAW_IMAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"!\[([^\]]*)\]\(https://raw\.githubusercontent\.com/[^)\s]*/([^/)\s]+\.(?i:png|jpe?g|gif|webp|svg))\)",
    )
    .unwrap()
});
static BARE_IMAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[([^\]]*)\]\(([^/:)\s]+\.(?i:png|jpe?g|gif|webp|svg))\)").unwrap()
});
static IMAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^/]+\.(?i:png|jpe?g|gif|webp|svg))$").unwrap());

/// `https://raw.githubusercontent.com/{owner}/{repo}/{branch}/{path}`
pub fn raw_url(repo: &RepoKey, branch: &str, path: &str) -> String {
    format!("{}/{}/{}/{}/{}", RAW_HOST, repo.owner(), repo.repo(), branch, path)
}

/// Repository path of a raw URL, i.e. everything after owner, repo and branch.
pub fn local_path_from_raw_url(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix(RAW_HOST)
        .or_else(|| url.strip_prefix("http://raw.githubusercontent.com"))?
        .strip_prefix('/')?;
    let mut parts = rest.splitn(4, '/');
    let (_owner, _repo, _branch) = (parts.next()?, parts.next()?, parts.next()?);
    parts.next().filter(|p| !p.is_empty()).map(str::to_string)
}

/// Trailing image file name of a URL or path.
pub fn image_file_name(url: &str) -> Option<String> {
    IMAGE_NAME
        .captures(url)
        .map(|caps| caps[1].to_string())
}

/// Rewrite `![alt](https://raw.githubusercontent.com/.../name.png)` to
/// `![alt](name.png)`.
pub fn replace_raw_urls_with_file_names(markdown: &str) -> String {
    RAW_IMAGE_LINK
        .replace_all(markdown, "![${1}](${2})")
        .into_owned()
}

/// Rewrite bare image names to raw URLs inside the article folder.
pub fn replace_file_names_with_raw_urls(
    markdown: &str,
    repo: &RepoKey,
    branch: &str,
    directory: &str,
    slug: &str,
) -> String {
    BARE_IMAGE_LINK
        .replace_all(markdown, |caps: &Captures| {
            let path = format!("{}/{}/{}", directory, slug, &caps[2]);
            format!("![{}]({})", &caps[1], raw_url(repo, branch, &path))
        })
        .into_owned()
}

/// An image to store in an article folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUpload {
    pub directory: String,
    pub slug: String,
    pub file_name: String,
    pub mime_type: String,
    /// Base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub uploaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResult {
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            uploaded: false,
            image_url: None,
            commit_sha: None,
            error: Some(error.into()),
        }
    }
}

/// `{stem}-{timestamp}.{ext}` with `:` and `.` of the RFC 3339 timestamp
/// replaced by `-`.
pub fn stored_file_name(file_name: &str, mime_type: &str, now: DateTime<Utc>) -> String {
    let timestamp = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");

    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, ext.to_string()),
        _ => (file_name, extension_for(mime_type).to_string()),
    };
    format!("{}-{}.{}", stem, timestamp, ext)
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "svg",
    }
}

/// Store an image in `{directory}/{slug}/`, overwriting a file of the same
/// name.
pub fn upload_image(
    repo: &dyn RepoApi,
    upload: &ImageUpload,
    now: DateTime<Utc>,
) -> Result<UploadResult, CmsError> {
    if upload.directory.is_empty() || upload.slug.is_empty() {
        return Ok(UploadResult::rejected("directory and slug are required"));
    }
    let folder = format!("{}/{}", upload.directory, upload.slug);
    if validate_directory(&folder).is_err() || upload.file_name.contains('/') {
        return Ok(UploadResult::rejected("invalid image location"));
    }
    if upload.data.len() > MAX_IMAGE_BYTES {
        return Ok(UploadResult::rejected("file size exceeds the 10MB limit"));
    }
    if !ALLOWED_MIME_TYPES.contains(&upload.mime_type.as_str()) {
        return Ok(UploadResult::rejected(
            "unsupported image type (JPEG, PNG, GIF, WebP and SVG only)",
        ));
    }

    let file_name = stored_file_name(&upload.file_name, &upload.mime_type, now);
    let path = format!("{}/{}", folder, file_name);
    let existing = repo.get_file(&path)?;

    let commit = repo.put_file(
        &path,
        &upload.data,
        &format!("Upload image: {}", file_name),
        existing.as_ref().map(|f| f.sha.as_str()),
    )?;
    log::info!("Uploaded image {} ({} bytes)", path, upload.data.len());

    Ok(UploadResult {
        uploaded: true,
        image_url: Some(raw_url(repo.repository(), repo.branch(), &path)),
        commit_sha: Some(commit.commit_sha),
        error: None,
    })
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
