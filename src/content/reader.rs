//! Read path: records from the cache file, or from a directory scan.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::cache::CacheSync;
use super::markdown;
use super::record::ContentRecord;
use super::{CmsError, Frontmatter, images};
use crate::config::{CmsConfig, ContentType};
use crate::github::{EntryKind, RepoApi};
use crate::schema::FrontmatterSchema;
use crate::types::ContentKey;

/// One article as shown to an editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub slug: String,
    pub directory: String,
    /// Dates in `yyyy-MM-dd`.
    pub frontmatter: Frontmatter,
    /// Image names rewritten to raw URLs.
    pub body: String,
    /// Revision tag of the article file.
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCount {
    pub directory: String,
    pub count: usize,
}

pub struct ContentReader {
    repo: Arc<dyn RepoApi>,
    config: Arc<CmsConfig>,
    schema: Arc<FrontmatterSchema>,
    cache: CacheSync,
}

impl ContentReader {
    pub fn new(
        repo: Arc<dyn RepoApi>,
        config: Arc<CmsConfig>,
        schema: Arc<FrontmatterSchema>,
    ) -> Self {
        let cache = CacheSync::new(repo.clone(), config.clone());
        Self {
            repo,
            config,
            schema,
            cache,
        }
    }

    /// Records of every content type, the draft directory included.
    pub fn fetch_all(&self) -> Result<Vec<ContentRecord>, CmsError> {
        let mut records = Vec::new();
        for content in self.config.content_types() {
            records.extend(self.fetch_directory(&content)?);
        }
        Ok(records)
    }

    /// Records of one content type.
    ///
    /// A readable cache file is returned as is. Otherwise the directory is
    /// scanned and, when articles were found, a fresh cache file is written.
    pub fn fetch_directory(&self, content: &ContentType) -> Result<Vec<ContentRecord>, CmsError> {
        let stale_sha = match self.cache.read(content)? {
            Some(index) if !index.corrupt => return Ok(index.records),
            Some(index) => {
                log::warn!(
                    "Cache file {} is unreadable, scanning {}",
                    content.cache_path(),
                    content.directory
                );
                Some(index.sha)
            }
            None => None,
        };

        let records = self.scan_directory(content)?;
        if !records.is_empty() {
            if let Err(e) = self.cache.store(content, &records, stale_sha.as_deref()) {
                log::warn!(
                    "Failed to write cache for {} after scan: {}",
                    content.directory,
                    e
                );
            }
        }
        Ok(records)
    }

    /// Build records from the article files of a directory.
    ///
    /// Subfolders without an article file are skipped, as are articles that
    /// are not UTF-8 or whose front matter cannot be decoded.
    pub fn scan_directory(&self, content: &ContentType) -> Result<Vec<ContentRecord>, CmsError> {
        let Some(entries) = self.repo.list_dir(&content.directory)? else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for entry in entries.iter().filter(|e| e.kind == EntryKind::Dir) {
            let key = ContentKey::new(content.directory.clone(), entry.name.clone());
            let path = key.article_path(&content.article_file);
            let Some(file) = self.repo.get_file(&path)? else {
                continue;
            };

            let text = match file.text() {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("Skipping {}: {}", path, e);
                    continue;
                }
            };
            match markdown::decode(&text) {
                Ok(doc) => records.push(ContentRecord::new(&key, &doc.frontmatter, &doc.body)),
                Err(e) => log::warn!("Skipping {}: {}", path, e),
            }
        }

        log::debug!(
            "Scanned {}: {} articles",
            content.directory,
            records.len()
        );
        Ok(records)
    }

    /// Rescan a directory and rewrite its cache file, deleting it when the
    /// directory has no articles. Returns the number of records.
    pub fn rebuild(&self, directory: &str) -> Result<usize, CmsError> {
        let content = self
            .config
            .content_type(directory)
            .ok_or_else(|| CmsError::UnknownDirectory(directory.to_string()))?;

        let records = self.scan_directory(&content)?;
        let sha = self.cache.read(&content)?.map(|index| index.sha);
        self.cache.store(&content, &records, sha.as_deref())?;
        log::info!("Rebuilt cache for {}: {} records", directory, records.len());
        Ok(records.len())
    }

    /// Load one article for editing. `Ok(None)` when it does not exist.
    pub fn read_article(&self, key: &ContentKey) -> Result<Option<Article>, CmsError> {
        let content = self
            .config
            .content_type(&key.directory)
            .ok_or_else(|| CmsError::UnknownDirectory(key.directory.clone()))?;

        let path = key.article_path(&content.article_file);
        let Some(file) = self.repo.get_file(&path)? else {
            return Ok(None);
        };
        let doc = markdown::decode(&file.text()?)
            .map_err(|source| CmsError::Markdown { path, source })?;

        Ok(Some(Article {
            slug: key.slug.clone(),
            directory: key.directory.clone(),
            frontmatter: self.schema.from_schema_format(&doc.frontmatter),
            body: images::replace_file_names_with_raw_urls(
                &doc.body,
                self.repo.repository(),
                self.repo.branch(),
                &key.directory,
                &key.slug,
            ),
            sha: file.sha,
        }))
    }

    /// Article count per configured content type, from the cache files.
    ///
    /// The implicit draft type is not counted. A missing or unreadable cache
    /// counts as zero.
    pub fn counts(&self) -> Vec<ContentCount> {
        self.config
            .content
            .iter()
            .map(|content| {
                let count = match self.cache.read(content) {
                    Ok(Some(index)) => index.records.len(),
                    Ok(None) => 0,
                    Err(e) => {
                        log::warn!("Cannot read cache for {}: {}", content.directory, e);
                        0
                    }
                };
                ContentCount {
                    directory: content.directory.clone(),
                    count,
                }
            })
            .collect()
    }
}
