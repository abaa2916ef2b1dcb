//! Article mutations.
//!
//! Same-path writes go through the single-file contents API, guarded by the
//! file's revision tag. A rename (new slug and/or directory) has to move the
//! whole article folder at once, so it builds one commit from git data
//! primitives instead: the branch either shows the old folder or the new
//! one, never a mix. Cache and webhook work is queued on the effects worker
//! once the article commit has landed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::cache::CacheOp;
use super::{
    ALREADY_EXISTS, CmsError, Frontmatter, INVALID_SLUG, MODIFIED_CONCURRENTLY, MutationResult,
    NOT_FOUND, images, markdown,
};
use crate::config::{CmsConfig, ContentType};
use crate::daemon::worker::{Effect, EffectQueue};
use crate::github::{EntryKind, GithubError, REGULAR_FILE_MODE, RepoApi, TreeChange};
use crate::schema::FrontmatterSchema;
use crate::types::{ContentKey, Slug};
use crate::webhook::CmsEvent;

/// An article as submitted by an editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleInput {
    pub directory: String,
    /// Free text; sanitized before use.
    pub slug: String,
    #[serde(default)]
    pub frontmatter: Frontmatter,
    #[serde(default)]
    pub body: String,
}

/// An edit, possibly moving the article to a new slug or directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleUpdate {
    #[serde(flatten)]
    pub article: ArticleInput,
    /// Current directory when it differs from `article.directory`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_directory: Option<String>,
    /// Current slug when it differs from `article.slug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_slug: Option<String>,
    /// Revision tag the editor started from. When set, the update is
    /// rejected if the article file has changed since.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

fn unknown_directory(directory: &str) -> MutationResult {
    MutationResult::rejected(format!("unknown content directory: {}", directory))
}

/// A slug taken from an existing path must be one plain path segment.
fn is_plain_segment(slug: &str) -> bool {
    !slug.is_empty() && slug != "." && slug != ".." && !slug.contains('/')
}

pub struct ArticleWriter {
    repo: Arc<dyn RepoApi>,
    config: Arc<CmsConfig>,
    schema: Arc<FrontmatterSchema>,
    effects: EffectQueue,
}

impl ArticleWriter {
    pub fn new(
        repo: Arc<dyn RepoApi>,
        config: Arc<CmsConfig>,
        schema: Arc<FrontmatterSchema>,
        effects: EffectQueue,
    ) -> Self {
        Self {
            repo,
            config,
            schema,
            effects,
        }
    }

    /// Store front matter and body the way they live in the repository:
    /// schema-formatted dates and bare image names.
    fn prepare(&self, input: &ArticleInput) -> (Frontmatter, String) {
        (
            self.schema.to_schema_format(&input.frontmatter),
            images::replace_raw_urls_with_file_names(&input.body),
        )
    }

    fn encode(path: &str, frontmatter: &Frontmatter, body: &str) -> Result<String, CmsError> {
        markdown::encode(frontmatter, body).map_err(|source| CmsError::Markdown {
            path: path.to_string(),
            source,
        })
    }

    fn after_write(
        &self,
        key: ContentKey,
        frontmatter: Frontmatter,
        body: String,
        op: CacheOp,
        event: CmsEvent,
    ) {
        self.effects.submit(Effect::SyncCache {
            key: key.clone(),
            frontmatter,
            body,
            op,
        });
        self.effects.submit(Effect::Notify { event, key });
    }

    /// Create a new article. The stored slug is returned on success.
    pub fn create(&self, input: &ArticleInput) -> Result<MutationResult, CmsError> {
        let Some(content) = self.config.content_type(&input.directory) else {
            return Ok(unknown_directory(&input.directory));
        };
        let Some(slug) = Slug::sanitize(&input.slug) else {
            return Ok(MutationResult::rejected(INVALID_SLUG));
        };

        let key = ContentKey::new(content.directory.clone(), slug.as_str());
        let path = key.article_path(&content.article_file);
        if self.repo.get_file(&path)?.is_some() {
            return Ok(MutationResult::rejected(ALREADY_EXISTS));
        }

        let (frontmatter, body) = self.prepare(input);
        let text = Self::encode(&path, &frontmatter, &body)?;
        let message = format!("Create new article: {}", slug);
        match self.repo.put_file(&path, text.as_bytes(), &message, None) {
            Ok(_) => {}
            // Created by someone else since the existence check.
            Err(GithubError::Conflict(_)) => return Ok(MutationResult::rejected(ALREADY_EXISTS)),
            Err(e) => return Err(e.into()),
        }
        log::info!("Created {}", path);

        self.after_write(key, frontmatter, body, CacheOp::Create, CmsEvent::Create);
        Ok(MutationResult::applied(slug.as_str()))
    }

    /// Edit an article, moving it when the slug or directory changes.
    pub fn update(&self, update: &ArticleUpdate) -> Result<MutationResult, CmsError> {
        let input = &update.article;
        let Some(target) = self.config.content_type(&input.directory) else {
            return Ok(unknown_directory(&input.directory));
        };
        let Some(slug) = Slug::sanitize(&input.slug) else {
            return Ok(MutationResult::rejected(INVALID_SLUG));
        };

        let source_directory = update
            .original_directory
            .as_deref()
            .unwrap_or(&input.directory);
        let Some(source) = self.config.content_type(source_directory) else {
            return Ok(unknown_directory(source_directory));
        };
        let source_slug = update.original_slug.as_deref().unwrap_or(slug.as_str());
        if !is_plain_segment(source_slug) {
            return Ok(MutationResult::rejected(NOT_FOUND));
        }

        let from = ContentKey::new(source.directory.clone(), source_slug);
        let to = ContentKey::new(target.directory.clone(), slug.as_str());
        let expected_sha = update.sha.as_deref();
        if from == to {
            self.update_in_place(&target, to, input, expected_sha)
        } else {
            self.move_article(&source, from, &target, to, input, expected_sha)
        }
    }

    fn update_in_place(
        &self,
        content: &ContentType,
        key: ContentKey,
        input: &ArticleInput,
        expected_sha: Option<&str>,
    ) -> Result<MutationResult, CmsError> {
        let path = key.article_path(&content.article_file);
        let Some(existing) = self.repo.get_file(&path)? else {
            return Ok(MutationResult::rejected(NOT_FOUND));
        };
        if expected_sha.is_some_and(|sha| sha != existing.sha) {
            log::warn!("Update of {} started from a stale revision", path);
            return Ok(MutationResult::rejected(MODIFIED_CONCURRENTLY));
        }

        let (frontmatter, body) = self.prepare(input);
        let text = Self::encode(&path, &frontmatter, &body)?;
        let message = format!("Update article: {}", key.slug);
        match self
            .repo
            .put_file(&path, text.as_bytes(), &message, Some(&existing.sha))
        {
            Ok(_) => {}
            Err(GithubError::Conflict(reason)) => {
                log::warn!("Update of {} conflicted: {}", path, reason);
                return Ok(MutationResult::rejected(MODIFIED_CONCURRENTLY));
            }
            Err(e) => return Err(e.into()),
        }
        log::info!("Updated {}", path);

        let slug = key.slug.clone();
        self.after_write(key, frontmatter, body, CacheOp::Update, CmsEvent::Update);
        Ok(MutationResult::applied(slug))
    }

    /// Move the article folder `from` to `to` in a single commit, writing the
    /// edited article file on the way.
    ///
    /// The folder is read from a full recursive tree listing; a truncated
    /// listing fails the move before anything is committed.
    fn move_article(
        &self,
        source: &ContentType,
        from: ContentKey,
        target: &ContentType,
        to: ContentKey,
        input: &ArticleInput,
        expected_sha: Option<&str>,
    ) -> Result<MutationResult, CmsError> {
        let source_path = from.article_path(&source.article_file);
        let target_path = to.article_path(&target.article_file);

        let Some(existing) = self.repo.get_file(&source_path)? else {
            return Ok(MutationResult::rejected(NOT_FOUND));
        };
        if expected_sha.is_some_and(|sha| sha != existing.sha) {
            log::warn!("Move of {} started from a stale revision", from);
            return Ok(MutationResult::rejected(MODIFIED_CONCURRENTLY));
        }
        if self.repo.get_file(&target_path)?.is_some() {
            return Ok(MutationResult::rejected(ALREADY_EXISTS));
        }

        let (frontmatter, body) = self.prepare(input);
        let text = Self::encode(&target_path, &frontmatter, &body)?;

        let head = self.repo.branch_head()?;
        let base_tree = self.repo.commit_tree(&head)?;
        let source_prefix = format!("{}/", from.folder());
        let files: Vec<_> = self
            .repo
            .list_tree(&base_tree)?
            .into_iter()
            .filter(|entry| entry.is_blob() && entry.path.starts_with(&source_prefix))
            .collect();

        let article_blob = self.repo.create_blob(text.as_bytes())?;

        let mut changes = Vec::with_capacity(files.len() * 2 + 1);
        for file in files.iter().filter(|f| f.path != source_path) {
            let moved = format!("{}/{}", to.folder(), &file.path[source_prefix.len()..]);
            if moved != target_path {
                changes.push(TreeChange::upsert(moved, file.mode.clone(), file.sha.clone()));
            }
        }
        changes.push(TreeChange::upsert(
            target_path.clone(),
            REGULAR_FILE_MODE,
            article_blob,
        ));
        changes.extend(files.iter().map(|f| TreeChange::remove(f.path.clone())));

        let tree = self.repo.create_tree(&base_tree, &changes)?;
        let message = format!("Move article: {} -> {}", from, to);
        let commit = self.repo.create_commit(&message, &tree, &head)?;
        match self.repo.update_branch(&commit) {
            Ok(()) => {}
            Err(GithubError::Conflict(reason)) => {
                log::warn!("Move of {} to {} conflicted: {}", from, to, reason);
                return Ok(MutationResult::rejected(MODIFIED_CONCURRENTLY));
            }
            Err(e) => return Err(e.into()),
        }
        log::info!("Moved {} to {} ({} files)", from, to, files.len());

        self.effects.submit(Effect::SyncCache {
            key: from,
            frontmatter: Frontmatter::new(),
            body: String::new(),
            op: CacheOp::Delete,
        });
        let slug = to.slug.clone();
        self.after_write(to, frontmatter, body, CacheOp::Create, CmsEvent::Update);
        Ok(MutationResult::applied(slug))
    }

    /// Delete every file of an article folder.
    ///
    /// The contents API deletes one file per commit, so a failure part way
    /// leaves the remaining files in place. The article file goes last: until
    /// it is removed the article stays readable and its cache record valid.
    pub fn delete(&self, key: &ContentKey) -> Result<MutationResult, CmsError> {
        let Some(content) = self.config.content_type(&key.directory) else {
            return Ok(unknown_directory(&key.directory));
        };
        if !is_plain_segment(&key.slug) {
            return Ok(MutationResult::rejected(NOT_FOUND));
        }

        let mut files = Vec::new();
        self.collect_files(&key.folder(), &mut files)?;
        if files.is_empty() {
            return Ok(MutationResult::rejected(NOT_FOUND));
        }
        let article_path = key.article_path(&content.article_file);
        files.sort_by_key(|(path, _)| *path == article_path);

        for (path, sha) in &files {
            let message = format!("Delete article: {}", path);
            match self.repo.delete_file(path, &message, sha) {
                Ok(()) | Err(GithubError::NotFound(_)) => {}
                Err(GithubError::Conflict(reason)) => {
                    log::warn!("Delete of {} conflicted: {}", path, reason);
                    return Ok(MutationResult::rejected(MODIFIED_CONCURRENTLY));
                }
                Err(e) => return Err(e.into()),
            }
        }
        log::info!("Deleted {} ({} files)", key, files.len());

        self.after_write(
            key.clone(),
            Frontmatter::new(),
            String::new(),
            CacheOp::Delete,
            CmsEvent::Delete,
        );
        Ok(MutationResult::applied(key.slug.clone()))
    }

    /// `(path, sha)` of every file below `folder`.
    fn collect_files(&self, folder: &str, out: &mut Vec<(String, String)>) -> Result<(), CmsError> {
        let Some(entries) = self.repo.list_dir(folder)? else {
            return Ok(());
        };
        let prefix = format!("{}/", folder);
        for entry in entries.into_iter().filter(|e| e.path.starts_with(&prefix)) {
            match entry.kind {
                EntryKind::File => out.push((entry.path, entry.sha)),
                EntryKind::Dir => self.collect_files(&entry.path, out)?,
                EntryKind::Other => log::debug!("Skipping {} while deleting", entry.path),
            }
        }
        Ok(())
    }
}
