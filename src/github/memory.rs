//! In-memory repository used by tests.
//!
//! Models one branch with real commit history: every contents-API write
//! creates a commit, tree writes are layered on a base tree, and the branch
//! only fast-forwards. Revision tags are content hashes, so a stale tag is
//! detected exactly like on GitHub.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use super::{
    DirEntry, EntryKind, FileCommit, GithubError, REGULAR_FILE_MODE, RemoteFile, RepoApi,
    TreeChange, TreeEntry,
};
use crate::types::RepoKey;

/// path -> (mode, blob sha)
type Tree = BTreeMap<String, (String, String)>;

struct Commit {
    tree: String,
    parent: Option<String>,
    message: String,
}

#[derive(Default)]
struct Inner {
    blobs: HashMap<String, Vec<u8>>,
    trees: HashMap<String, Tree>,
    commits: HashMap<String, Commit>,
    head: String,
    next_id: u64,
    /// Remaining forced conflicts per path for contents-API writes.
    conflicts: HashMap<String, usize>,
    reject_ref_update: bool,
    truncate_tree_listing: bool,
}

impl Inner {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn store_blob(&mut self, content: &[u8]) -> String {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        let sha = format!("{:016x}", hasher.finish());
        self.blobs.insert(sha.clone(), content.to_vec());
        sha
    }

    fn head_tree(&self) -> &Tree {
        &self.trees[&self.commits[&self.head].tree]
    }

    fn take_conflict(&mut self, path: &str) -> bool {
        match self.conflicts.get_mut(path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Commit `tree` on top of head and advance the branch.
    fn commit_on_head(&mut self, tree: Tree, message: &str) -> String {
        let tree_id = self.id("tree");
        self.trees.insert(tree_id.clone(), tree);
        let commit_id = self.id("commit");
        self.commits.insert(
            commit_id.clone(),
            Commit {
                tree: tree_id,
                parent: Some(self.head.clone()),
                message: message.to_string(),
            },
        );
        self.head = commit_id.clone();
        commit_id
    }
}

pub struct MemoryRepo {
    repo: RepoKey,
    branch: String,
    inner: Mutex<Inner>,
}

impl MemoryRepo {
    pub fn new(repo: &str, branch: &str) -> Self {
        let mut inner = Inner::default();
        inner.trees.insert("tree-0".to_string(), Tree::new());
        inner.commits.insert(
            "commit-0".to_string(),
            Commit {
                tree: "tree-0".to_string(),
                parent: None,
                message: "Initial commit".to_string(),
            },
        );
        inner.head = "commit-0".to_string();

        Self {
            repo: repo.parse().unwrap(),
            branch: branch.to_string(),
            inner: Mutex::new(inner),
        }
    }

    /// Place a file on the branch without recording a commit.
    pub fn seed(&self, path: &str, content: &str) {
        self.seed_bytes(path, content.as_bytes());
    }

    pub fn seed_bytes(&self, path: &str, content: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let sha = inner.store_blob(content);
        let tree_id = inner.commits[&inner.head].tree.clone();
        inner
            .trees
            .get_mut(&tree_id)
            .unwrap()
            .insert(path.to_string(), (REGULAR_FILE_MODE.to_string(), sha));
    }

    pub fn file_text(&self, path: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        let (_, sha) = inner.head_tree().get(path)?;
        Some(String::from_utf8(inner.blobs[sha].clone()).unwrap())
    }

    pub fn file_sha(&self, path: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.head_tree().get(path).map(|(_, sha)| sha.clone())
    }

    /// Every file path on the branch, sorted.
    pub fn paths(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.head_tree().keys().cloned().collect()
    }

    /// Messages of the commits on the branch since creation, oldest first.
    pub fn commit_messages(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut messages = Vec::new();
        let mut cursor = Some(inner.head.clone());
        while let Some(id) = cursor {
            let commit = &inner.commits[&id];
            if commit.parent.is_some() {
                messages.push(commit.message.clone());
            }
            cursor = commit.parent.clone();
        }
        messages.reverse();
        messages
    }

    pub fn commit_count(&self) -> usize {
        self.commit_messages().len()
    }

    /// Make the next `n` contents-API writes to `path` fail with a conflict.
    pub fn conflict_next_writes(&self, path: &str, n: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.conflicts.insert(path.to_string(), n);
    }

    /// Make the next recursive tree listing report truncation.
    pub fn truncate_next_tree_listing(&self) {
        self.inner.lock().unwrap().truncate_tree_listing = true;
    }

    /// Make the next branch update fail as if another commit landed first.
    pub fn reject_next_ref_update(&self) {
        self.inner.lock().unwrap().reject_ref_update = true;
    }
}

impl RepoApi for MemoryRepo {
    fn repository(&self) -> &RepoKey {
        &self.repo
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, GithubError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.head_tree().get(path).map(|(_, sha)| RemoteFile {
            path: path.to_string(),
            sha: sha.clone(),
            content: inner.blobs[sha].clone(),
        }))
    }

    fn list_dir(&self, path: &str) -> Result<Option<Vec<DirEntry>>, GithubError> {
        let inner = self.inner.lock().unwrap();
        let tree = inner.head_tree();

        if let Some((_, sha)) = tree.get(path) {
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            return Ok(Some(vec![DirEntry {
                name,
                path: path.to_string(),
                sha: sha.clone(),
                kind: EntryKind::File,
            }]));
        }

        let prefix = format!("{}/", path);
        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();
        for (file, (_, sha)) in tree.range(prefix.clone()..) {
            let Some(rest) = file.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => files.push(DirEntry {
                    name: rest.to_string(),
                    path: file.clone(),
                    sha: sha.clone(),
                    kind: EntryKind::File,
                }),
            }
        }

        if files.is_empty() && dirs.is_empty() {
            return Ok(None);
        }

        let mut entries: Vec<DirEntry> = dirs
            .into_iter()
            .map(|name| DirEntry {
                path: format!("{}{}", prefix, name),
                name,
                sha: "tree".to_string(),
                kind: EntryKind::Dir,
            })
            .collect();
        entries.extend(files);
        Ok(Some(entries))
    }

    fn put_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<FileCommit, GithubError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.take_conflict(path) {
            return Err(GithubError::Conflict(format!("{} does not match", path)));
        }

        let existing = inner.head_tree().get(path).map(|(_, s)| s.clone());
        match (existing.as_deref(), sha) {
            (Some(_), None) => {
                return Err(GithubError::Conflict(format!(
                    "\"sha\" wasn't supplied for {}",
                    path
                )));
            }
            (Some(current), Some(given)) if current != given => {
                return Err(GithubError::Conflict(format!("{} does not match {}", path, given)));
            }
            (None, Some(given)) => {
                return Err(GithubError::Conflict(format!("{} does not match {}", path, given)));
            }
            _ => {}
        }

        let content_sha = inner.store_blob(content);
        let mut tree = inner.head_tree().clone();
        tree.insert(
            path.to_string(),
            (REGULAR_FILE_MODE.to_string(), content_sha.clone()),
        );
        let commit_sha = inner.commit_on_head(tree, message);
        Ok(FileCommit {
            content_sha,
            commit_sha,
        })
    }

    fn delete_file(&self, path: &str, message: &str, sha: &str) -> Result<(), GithubError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.take_conflict(path) {
            return Err(GithubError::Conflict(format!("{} does not match", path)));
        }

        let mut tree = inner.head_tree().clone();
        match tree.remove(path) {
            None => Err(GithubError::NotFound(format!("contents/{}", path))),
            Some((_, current)) if current != sha => {
                Err(GithubError::Conflict(format!("{} does not match {}", path, sha)))
            }
            Some(_) => {
                inner.commit_on_head(tree, message);
                Ok(())
            }
        }
    }

    fn branch_head(&self) -> Result<String, GithubError> {
        Ok(self.inner.lock().unwrap().head.clone())
    }

    fn commit_tree(&self, commit_sha: &str) -> Result<String, GithubError> {
        let inner = self.inner.lock().unwrap();
        inner
            .commits
            .get(commit_sha)
            .map(|c| c.tree.clone())
            .ok_or_else(|| GithubError::NotFound(format!("git/commits/{}", commit_sha)))
    }

    fn list_tree(&self, tree_sha: &str) -> Result<Vec<TreeEntry>, GithubError> {
        let mut inner = self.inner.lock().unwrap();
        if std::mem::take(&mut inner.truncate_tree_listing) {
            return Err(GithubError::Truncated(format!("git/trees/{}", tree_sha)));
        }
        let tree = inner
            .trees
            .get(tree_sha)
            .ok_or_else(|| GithubError::NotFound(format!("git/trees/{}", tree_sha)))?;

        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for (path, (mode, sha)) in tree {
            let mut parent = path.as_str();
            while let Some((dir, _)) = parent.rsplit_once('/') {
                dirs.insert(dir.to_string());
                parent = dir;
            }
            entries.push(TreeEntry {
                path: path.clone(),
                mode: mode.clone(),
                kind: "blob".to_string(),
                sha: sha.clone(),
            });
        }
        entries.extend(dirs.into_iter().map(|path| TreeEntry {
            path,
            mode: "040000".to_string(),
            kind: "tree".to_string(),
            sha: "tree".to_string(),
        }));
        Ok(entries)
    }

    fn create_blob(&self, content: &[u8]) -> Result<String, GithubError> {
        Ok(self.inner.lock().unwrap().store_blob(content))
    }

    fn create_tree(&self, base_tree: &str, changes: &[TreeChange]) -> Result<String, GithubError> {
        let mut inner = self.inner.lock().unwrap();
        let mut tree = inner
            .trees
            .get(base_tree)
            .cloned()
            .ok_or_else(|| GithubError::NotFound(format!("git/trees/{}", base_tree)))?;

        for change in changes {
            match &change.sha {
                Some(sha) => {
                    if !inner.blobs.contains_key(sha) {
                        return Err(GithubError::Status {
                            status: 422,
                            message: format!("unknown blob {}", sha),
                        });
                    }
                    tree.insert(change.path.clone(), (change.mode.clone(), sha.clone()));
                }
                None => {
                    if tree.remove(&change.path).is_none() {
                        return Err(GithubError::Status {
                            status: 422,
                            message: format!("path {} not in base tree", change.path),
                        });
                    }
                }
            }
        }

        let id = inner.id("tree");
        inner.trees.insert(id.clone(), tree);
        Ok(id)
    }

    fn create_commit(&self, message: &str, tree_sha: &str, parent: &str) -> Result<String, GithubError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.trees.contains_key(tree_sha) || !inner.commits.contains_key(parent) {
            return Err(GithubError::Status {
                status: 422,
                message: "tree or parent does not exist".to_string(),
            });
        }
        let id = inner.id("commit");
        inner.commits.insert(
            id.clone(),
            Commit {
                tree: tree_sha.to_string(),
                parent: Some(parent.to_string()),
                message: message.to_string(),
            },
        );
        Ok(id)
    }

    fn update_branch(&self, commit_sha: &str) -> Result<(), GithubError> {
        let mut inner = self.inner.lock().unwrap();
        if std::mem::take(&mut inner.reject_ref_update) {
            return Err(GithubError::Conflict("Update is not a fast forward".to_string()));
        }
        let parent = inner
            .commits
            .get(commit_sha)
            .ok_or_else(|| GithubError::NotFound(format!("git/commits/{}", commit_sha)))?
            .parent
            .clone();
        if parent.as_deref() != Some(inner.head.as_str()) {
            return Err(GithubError::Conflict("Update is not a fast forward".to_string()));
        }
        inner.head = commit_sha.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_writes_require_current_sha() {
        let repo = MemoryRepo::new("o/r", "main");
        let first = repo.put_file("a.md", b"one", "add", None).unwrap();

        assert!(matches!(
            repo.put_file("a.md", b"two", "again", None),
            Err(GithubError::Conflict(_))
        ));
        assert!(matches!(
            repo.put_file("a.md", b"two", "stale", Some("nope")),
            Err(GithubError::Conflict(_))
        ));

        repo.put_file("a.md", b"two", "edit", Some(&first.content_sha))
            .unwrap();
        assert_eq!(repo.file_text("a.md").as_deref(), Some("two"));
        assert_eq!(repo.commit_messages(), vec!["add", "edit"]);
    }

    #[test]
    fn list_dir_groups_subfolders() {
        let repo = MemoryRepo::new("o/r", "main");
        repo.seed("posts/a/index.md", "a");
        repo.seed("posts/a/pic.png", "png");
        repo.seed("posts/index.json", "[]");

        let entries = repo.list_dir("posts").unwrap().unwrap();
        let names: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            names,
            vec![("a", EntryKind::Dir), ("index.json", EntryKind::File)]
        );
        assert!(repo.list_dir("pages").unwrap().is_none());
    }

    #[test]
    fn branch_only_fast_forwards() {
        let repo = MemoryRepo::new("o/r", "main");
        repo.seed("x", "x");
        let head = repo.branch_head().unwrap();
        let tree = repo.commit_tree(&head).unwrap();

        let new_tree = repo
            .create_tree(&tree, &[TreeChange::remove("x")])
            .unwrap();
        let commit = repo.create_commit("rm", &new_tree, &head).unwrap();

        repo.put_file("y", b"y", "race", None).unwrap();
        assert!(matches!(
            repo.update_branch(&commit),
            Err(GithubError::Conflict(_))
        ));
    }
}
