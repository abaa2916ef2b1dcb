//! Keeping `index.json` in step with the article files.

use std::sync::Arc;

use super::record::ContentRecord;
use super::{CmsError, Frontmatter};
use crate::config::{CmsConfig, ContentType};
use crate::github::{GithubError, RepoApi};
use crate::types::ContentKey;

/// Extra attempts after a conflicting cache write before giving up.
pub const MAX_CACHE_WRITE_RETRIES: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Create,
    Update,
    Delete,
}

/// A cache file as read from the branch.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedIndex {
    pub records: Vec<ContentRecord>,
    /// Revision tag of the file.
    pub sha: String,
    /// The file exists but is not a JSON array of records.
    pub corrupt: bool,
}

/// Reads and writes cache files through the repository.
#[derive(Clone)]
pub struct CacheSync {
    repo: Arc<dyn RepoApi>,
    config: Arc<CmsConfig>,
}

impl CacheSync {
    pub fn new(repo: Arc<dyn RepoApi>, config: Arc<CmsConfig>) -> Self {
        Self { repo, config }
    }

    /// Read the cache file of `content`. `None` when it does not exist.
    pub fn read(&self, content: &ContentType) -> Result<Option<CachedIndex>, CmsError> {
        let path = content.cache_path();
        let Some(file) = self.repo.get_file(&path)? else {
            return Ok(None);
        };

        let parsed = std::str::from_utf8(&file.content)
            .ok()
            .and_then(|text| serde_json::from_str::<Vec<ContentRecord>>(text).ok());
        Ok(Some(match parsed {
            Some(records) => CachedIndex {
                records,
                sha: file.sha,
                corrupt: false,
            },
            None => CachedIndex {
                records: Vec::new(),
                sha: file.sha,
                corrupt: true,
            },
        }))
    }

    /// Apply one article change to its directory's cache file.
    ///
    /// A conflicting write is retried with a fresh read up to
    /// [`MAX_CACHE_WRITE_RETRIES`] times, then logged and dropped; the article
    /// file stays authoritative and a later scan repairs the cache.
    pub fn update_for_content(
        &self,
        key: &ContentKey,
        frontmatter: &Frontmatter,
        body: &str,
        op: CacheOp,
    ) -> Result<(), CmsError> {
        let Some(content) = self.config.content_type(&key.directory) else {
            log::debug!("No content type for {}, skipping cache update", key.directory);
            return Ok(());
        };

        let record = ContentRecord::new(key, frontmatter, body);
        let mut retries = 0;
        loop {
            match self.apply_once(&content, &record, op) {
                Err(CmsError::Github(GithubError::Conflict(reason))) => {
                    if retries >= MAX_CACHE_WRITE_RETRIES {
                        log::warn!(
                            "Giving up on cache update for {} after {} retries: {}",
                            key,
                            retries,
                            reason
                        );
                        return Ok(());
                    }
                    retries += 1;
                    log::debug!("Cache write for {} conflicted, retrying: {}", key, reason);
                }
                other => return other,
            }
        }
    }

    fn apply_once(
        &self,
        content: &ContentType,
        record: &ContentRecord,
        op: CacheOp,
    ) -> Result<(), CmsError> {
        let (mut records, sha) = match self.read(content)? {
            None => (Vec::new(), None),
            Some(index) if index.corrupt => {
                // Dropping the file makes the next read rebuild it from the articles.
                log::warn!(
                    "Cache file {} is not a record array, removing it",
                    content.cache_path()
                );
                return self.store(content, &[], Some(&index.sha));
            }
            Some(index) => (index.records, Some(index.sha)),
        };

        apply(&mut records, record, op);
        self.store(content, &records, sha.as_deref())
    }

    /// Write `records` as the cache file, or delete the file when `records`
    /// is empty. `sha` is the revision tag of the current file, if any.
    pub fn store(
        &self,
        content: &ContentType,
        records: &[ContentRecord],
        sha: Option<&str>,
    ) -> Result<(), CmsError> {
        let path = content.cache_path();

        if records.is_empty() {
            if let Some(sha) = sha {
                let message = format!("Delete empty index.json for {}", content.directory);
                match self.repo.delete_file(&path, &message, sha) {
                    // Someone else already removed it.
                    Err(GithubError::NotFound(_)) => {}
                    other => other?,
                }
                log::debug!("Removed empty cache {}", path);
            }
            return Ok(());
        }

        let mut json = serde_json::to_string_pretty(records)?;
        json.push('\n');
        let message = format!("Update index.json for {}", content.directory);
        self.repo.put_file(&path, json.as_bytes(), &message, sha)?;
        log::debug!("Wrote {} records to {}", records.len(), path);
        Ok(())
    }
}

/// Apply `op` for `record` to the in-memory record list.
///
/// Create and Update both upsert: the article file is authoritative, so an
/// existing entry for the slug is replaced in place and a missing one is
/// appended.
pub fn apply(records: &mut Vec<ContentRecord>, record: &ContentRecord, op: CacheOp) {
    let position = records.iter().position(|r| r.slug == record.slug);
    match (op, position) {
        (CacheOp::Create | CacheOp::Update, Some(i)) => records[i] = record.clone(),
        (CacheOp::Create | CacheOp::Update, None) => records.push(record.clone()),
        (CacheOp::Delete, _) => records.retain(|r| r.slug != record.slug),
    }
}
