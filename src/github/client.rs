//! GitHub REST client for the contents and git data endpoints.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

use super::{
    DirEntry, EntryKind, FileCommit, GithubError, RemoteFile, RepoApi, TreeChange, TreeEntry,
};
use crate::config::CmsConfig;
use crate::types::RepoKey;

const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// Blocking client bound to one repository and branch.
pub struct GithubClient {
    agent: ureq::Agent,
    base_url: String,
    repo: RepoKey,
    branch: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Deserialize)]
struct RefResponse {
    object: ShaOnly,
}

#[derive(Deserialize)]
struct CommitResponse {
    tree: ShaOnly,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct BlobResponse {
    content: String,
}

#[derive(Deserialize)]
struct PutResponse {
    content: Option<ShaOnly>,
    commit: ShaOnly,
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, GithubError> {
    // GitHub wraps base64 payloads at 60 columns.
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| GithubError::Decode(format!("invalid base64 content: {}", e)))
}

/// Translate a ureq failure into a [`GithubError`].
fn map_error(what: &str, err: ureq::Error) -> GithubError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);

            match status {
                404 => GithubError::NotFound(what.to_string()),
                409 | 412 => GithubError::Conflict(format!("{}: {}", what, message)),
                422 if message.contains("sha") => {
                    GithubError::Conflict(format!("{}: {}", what, message))
                }
                _ => GithubError::Status { status, message },
            }
        }
        ureq::Error::Transport(transport) => GithubError::Transport(transport.to_string()),
    }
}

fn read_json<T: DeserializeOwned>(what: &str, response: ureq::Response) -> Result<T, GithubError> {
    response
        .into_json::<T>()
        .map_err(|e| GithubError::Decode(format!("{}: {}", what, e)))
}

impl GithubClient {
    pub fn new(config: &CmsConfig) -> Self {
        if config.github_token.is_none() {
            log::warn!("No GitHub token configured; only public reads will work");
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent("inkraft")
            .build();

        Self {
            agent,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            repo: config.target_repository.clone(),
            branch: config.branch.clone(),
            token: config.github_token.clone(),
        }
    }

    fn url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.base_url,
            self.repo.owner(),
            self.repo.repo(),
            tail
        )
    }

    fn request(&self, method: &str, tail: &str) -> ureq::Request {
        let request = self
            .agent
            .request(method, &self.url(tail))
            .set("Accept", ACCEPT)
            .set("X-GitHub-Api-Version", API_VERSION);
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }

    fn get<T: DeserializeOwned>(&self, tail: &str) -> Result<T, GithubError> {
        let response = self.request("GET", tail).call().map_err(|e| map_error(tail, e))?;
        read_json(tail, response)
    }

    fn send<T: DeserializeOwned>(&self, method: &str, tail: &str, body: Value) -> Result<T, GithubError> {
        let response = self
            .request(method, tail)
            .send_json(body)
            .map_err(|e| map_error(tail, e))?;
        read_json(tail, response)
    }

    /// GET on the contents endpoint; `None` on 404.
    fn get_contents(&self, path: &str) -> Result<Option<Value>, GithubError> {
        let tail = format!("contents/{}", path);
        let result = self
            .request("GET", &tail)
            .query("ref", &self.branch)
            .call();
        match result {
            Ok(response) => read_json(&tail, response).map(Some),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(map_error(&tail, e)),
        }
    }

    fn get_blob(&self, sha: &str) -> Result<Vec<u8>, GithubError> {
        let blob: BlobResponse = self.get(&format!("git/blobs/{}", sha))?;
        decode_base64(&blob.content)
    }
}

impl RepoApi for GithubClient {
    fn repository(&self) -> &RepoKey {
        &self.repo
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, GithubError> {
        let Some(value) = self.get_contents(path)? else {
            return Ok(None);
        };
        if value.is_array() {
            // A directory lives at this path.
            return Ok(None);
        }

        let item: ContentItem = serde_json::from_value(value)
            .map_err(|e| GithubError::Decode(format!("contents/{}: {}", path, e)))?;
        if item.kind != "file" {
            return Ok(None);
        }

        // Files above 1 MB come back without inline content.
        let content = match (item.encoding.as_deref(), item.content.as_deref()) {
            (Some("base64"), Some(encoded)) => decode_base64(encoded)?,
            _ => self.get_blob(&item.sha)?,
        };

        Ok(Some(RemoteFile {
            path: item.path,
            sha: item.sha,
            content,
        }))
    }

    fn list_dir(&self, path: &str) -> Result<Option<Vec<DirEntry>>, GithubError> {
        let Some(value) = self.get_contents(path)? else {
            return Ok(None);
        };

        let items: Vec<ContentItem> = if value.is_array() {
            serde_json::from_value(value)
        } else {
            serde_json::from_value(value).map(|item| vec![item])
        }
        .map_err(|e| GithubError::Decode(format!("contents/{}: {}", path, e)))?;

        Ok(Some(
            items
                .into_iter()
                .map(|item| DirEntry {
                    kind: match item.kind.as_str() {
                        "file" => EntryKind::File,
                        "dir" => EntryKind::Dir,
                        _ => EntryKind::Other,
                    },
                    name: item.name,
                    path: item.path,
                    sha: item.sha,
                })
                .collect(),
        ))
    }

    fn put_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<FileCommit, GithubError> {
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content),
            "branch": self.branch,
        });
        if let Some(sha) = sha {
            body["sha"] = Value::from(sha);
        }

        let response: PutResponse = self.send("PUT", &format!("contents/{}", path), body)?;
        Ok(FileCommit {
            content_sha: response.content.map(|c| c.sha).unwrap_or_default(),
            commit_sha: response.commit.sha,
        })
    }

    fn delete_file(&self, path: &str, message: &str, sha: &str) -> Result<(), GithubError> {
        let body = json!({
            "message": message,
            "sha": sha,
            "branch": self.branch,
        });
        let _: Value = self.send("DELETE", &format!("contents/{}", path), body)?;
        Ok(())
    }

    fn branch_head(&self) -> Result<String, GithubError> {
        let reference: RefResponse = self.get(&format!("git/ref/heads/{}", self.branch))?;
        Ok(reference.object.sha)
    }

    fn commit_tree(&self, commit_sha: &str) -> Result<String, GithubError> {
        let commit: CommitResponse = self.get(&format!("git/commits/{}", commit_sha))?;
        Ok(commit.tree.sha)
    }

    fn list_tree(&self, tree_sha: &str) -> Result<Vec<TreeEntry>, GithubError> {
        let tail = format!("git/trees/{}", tree_sha);
        let response = self
            .request("GET", &tail)
            .query("recursive", "1")
            .call()
            .map_err(|e| map_error(&tail, e))?;
        let tree: TreeResponse = read_json(&tail, response)?;
        if tree.truncated {
            return Err(GithubError::Truncated(tail));
        }
        Ok(tree.tree)
    }

    fn create_blob(&self, content: &[u8]) -> Result<String, GithubError> {
        let body = json!({
            "content": STANDARD.encode(content),
            "encoding": "base64",
        });
        let blob: ShaOnly = self.send("POST", "git/blobs", body)?;
        Ok(blob.sha)
    }

    fn create_tree(&self, base_tree: &str, changes: &[TreeChange]) -> Result<String, GithubError> {
        let body = json!({
            "base_tree": base_tree,
            "tree": changes,
        });
        let tree: ShaOnly = self.send("POST", "git/trees", body)?;
        Ok(tree.sha)
    }

    fn create_commit(&self, message: &str, tree_sha: &str, parent: &str) -> Result<String, GithubError> {
        let body = json!({
            "message": message,
            "tree": tree_sha,
            "parents": [parent],
        });
        let commit: ShaOnly = self.send("POST", "git/commits", body)?;
        Ok(commit.sha)
    }

    fn update_branch(&self, commit_sha: &str) -> Result<(), GithubError> {
        let body = json!({ "sha": commit_sha, "force": false });
        let tail = format!("git/refs/heads/{}", self.branch);
        match self.send::<Value>("PATCH", &tail, body) {
            Ok(_) => Ok(()),
            // "Update is not a fast forward"
            Err(GithubError::Status { status: 422, message }) => Err(GithubError::Conflict(message)),
            Err(e) => Err(e),
        }
    }
}
