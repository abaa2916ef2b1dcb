//! Unix socket server for handling JSON-RPC requests from the CLI.
//!
//! This is the request boundary: unexpected errors from the content layer
//! are logged here with full detail and reach the client only as a generic
//! message.

use chrono::Utc;
use crossbeam_channel::Sender;
use std::io::BufReader;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::config::CmsConfig;
use crate::content::images::{self, UploadResult};
use crate::content::{ArticleWriter, CmsError, ContentReader, MutationResult, NOT_FOUND};
use crate::github::RepoApi;
use crate::protocol::{
    CountsResult, ListResult, RebuildResult, Request, Response, RpcError, RpcErrorResponse,
    RpcResponse, StatusResult, read_request, socket_path, write_message,
};
use crate::types::ContentKey;

/// Context shared by request handlers.
pub struct Context {
    pub config: Arc<CmsConfig>,
    pub repo: Arc<dyn RepoApi>,
    pub reader: ContentReader,
    pub writer: ArticleWriter,
    pub start_time: Instant,
    /// Signals the daemon's main thread to shut down.
    pub stop: Sender<()>,
}

/// Turn an unexpected mutation error into a generic failure.
fn mutation_failure(what: &str, error: CmsError) -> MutationResult {
    log::error!("Failed to {}: {}", what, error);
    MutationResult::rejected(format!("failed to {}", what))
}

/// Turn an unexpected read error into an RPC error.
fn read_failure(what: &str, error: CmsError) -> RpcError {
    match error {
        CmsError::UnknownDirectory(directory) => {
            RpcError::invalid_params(format!("unknown content directory: {}", directory))
        }
        other => {
            log::error!("Failed to {}: {}", what, other);
            RpcError::internal(format!("failed to {}", what))
        }
    }
}

/// Handle a single JSON-RPC request.
pub fn handle_request(ctx: &Context, request: Request) -> Result<Response, RpcError> {
    match request {
        Request::Status => Ok(Response::Status(StatusResult {
            running: true,
            repository: ctx.config.target_repository.to_string(),
            branch: ctx.config.branch.clone(),
            directories: ctx
                .config
                .content_types()
                .into_iter()
                .map(|c| c.directory)
                .collect(),
            uptime_secs: ctx.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
        })),

        Request::List { directory } => {
            let records = match directory {
                Some(directory) => {
                    let content = ctx.config.content_type(&directory).ok_or_else(|| {
                        RpcError::invalid_params(format!("unknown content directory: {}", directory))
                    })?;
                    ctx.reader.fetch_directory(&content)
                }
                None => ctx.reader.fetch_all(),
            }
            .map_err(|e| read_failure("list articles", e))?;

            Ok(Response::List(ListResult { records }))
        }

        Request::Get { directory, slug } => {
            let key = ContentKey::new(directory, slug);
            match ctx.reader.read_article(&key) {
                Ok(Some(article)) => Ok(Response::Article(article)),
                Ok(None) => Err(RpcError::not_found(format!("{}: {}", NOT_FOUND, key))),
                Err(e) => Err(read_failure("read article", e)),
            }
        }

        Request::Create(input) => Ok(Response::Mutation(
            ctx.writer
                .create(&input)
                .unwrap_or_else(|e| mutation_failure("create article", e)),
        )),

        Request::Update(update) => Ok(Response::Mutation(
            ctx.writer
                .update(&update)
                .unwrap_or_else(|e| mutation_failure("update article", e)),
        )),

        Request::Delete { directory, slug } => Ok(Response::Mutation(
            ctx.writer
                .delete(&ContentKey::new(directory, slug))
                .unwrap_or_else(|e| mutation_failure("delete article", e)),
        )),

        Request::Rebuild { directory } => {
            let count = ctx
                .reader
                .rebuild(&directory)
                .map_err(|e| read_failure("rebuild cache", e))?;
            Ok(Response::Rebuild(RebuildResult { directory, count }))
        }

        Request::Counts => Ok(Response::Counts(CountsResult {
            counts: ctx.reader.counts(),
        })),

        Request::UploadImage(upload) => Ok(Response::Upload(
            images::upload_image(ctx.repo.as_ref(), &upload, Utc::now()).unwrap_or_else(|e| {
                log::error!("Failed to upload image: {}", e);
                UploadResult::rejected("failed to upload image")
            }),
        )),

        Request::Stop => {
            let _ = ctx.stop.try_send(());
            Ok(Response::Ok(()))
        }
    }
}

/// Handle a connected client, reading requests and writing responses.
fn handle_client(ctx: &Context, stream: UnixStream) {
    let mut reader = BufReader::new(&stream);
    let mut writer = &stream;

    loop {
        let rpc_req = match read_request(&mut reader) {
            Ok(Some(req)) => req,
            Ok(None) => break, // Client disconnected
            Err(e) => {
                log::warn!("Failed to read request: {}", e);
                break;
            }
        };

        let id = rpc_req.id.clone();

        let written = match handle_request(ctx, rpc_req.request) {
            Ok(result) => write_message(&mut writer, &RpcResponse::new(result, id)),
            Err(error) => write_message(&mut writer, &RpcErrorResponse::new(error, id)),
        };
        if let Err(e) = written {
            log::warn!("Failed to write response: {}", e);
            break;
        }
    }
}

/// Handle for managing the socket server thread.
pub struct SocketServerHandle {
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl SocketServerHandle {
    /// Spawn the socket server thread.
    pub fn spawn(ctx: Context) -> std::io::Result<Self> {
        let path = socket_path();

        // Remove stale socket file
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        log::info!("Socket server listening on {}", path.display());

        let ctx = Arc::new(ctx);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let thread = thread::Builder::new()
            .name("inkraft-socket".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    if shutdown_clone.load(Ordering::SeqCst) {
                        break;
                    }

                    match stream {
                        Ok(stream) => {
                            let ctx = Arc::clone(&ctx);
                            thread::spawn(move || handle_client(&ctx, stream));
                        }
                        Err(e) => {
                            if shutdown_clone.load(Ordering::SeqCst) {
                                break;
                            }
                            log::warn!("Failed to accept connection: {}", e);
                        }
                    }
                }

                // Cleanup socket file
                let _ = std::fs::remove_file(socket_path());
                log::info!("Socket server stopped");
            })
            .expect("failed to spawn socket thread");

        Ok(Self {
            thread: Some(thread),
            shutdown,
        })
    }

    /// Signal shutdown and wait for thread to exit.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        // Connect to the socket to unblock accept()
        let _ = UnixStream::connect(socket_path());

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SocketServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::CacheSync;
    use crate::daemon::worker::WorkerHandle;
    use crate::github::memory::MemoryRepo;
    use crate::schema::FrontmatterSchema;
    use crate::webhook::Notifier;
    use crossbeam_channel::{Receiver, unbounded};
    use serde_json::json;

    struct Fixture {
        repo: Arc<MemoryRepo>,
        ctx: Context,
        stop: Receiver<()>,
        worker: WorkerHandle,
    }

    fn fixture() -> Fixture {
        let config: Arc<CmsConfig> = Arc::new(
            r#"{
                "targetRepository": "octocat/blog",
                "draftDirectory": "drafts",
                "content": [{ "directory": "posts" }]
            }"#
            .parse()
            .unwrap(),
        );
        let schema = Arc::new(FrontmatterSchema::default());
        let repo = Arc::new(MemoryRepo::new("octocat/blog", "main"));
        let worker = WorkerHandle::spawn(
            CacheSync::new(repo.clone(), config.clone()),
            Notifier::new(&config),
        );
        let (stop_tx, stop_rx) = unbounded();
        let ctx = Context {
            config: config.clone(),
            repo: repo.clone(),
            reader: ContentReader::new(repo.clone(), config.clone(), schema.clone()),
            writer: ArticleWriter::new(repo.clone(), config, schema, worker.queue()),
            start_time: Instant::now(),
            stop: stop_tx,
        };
        Fixture {
            repo,
            ctx,
            stop: stop_rx,
            worker,
        }
    }

    fn request(value: serde_json::Value) -> Request {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn status_reports_repository() {
        let f = fixture();
        match handle_request(&f.ctx, Request::Status).unwrap() {
            Response::Status(status) => {
                assert_eq!(status.repository, "octocat/blog");
                assert_eq!(status.branch, "main");
                assert_eq!(status.directories, vec!["posts", "drafts"]);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn create_list_and_get() {
        let f = fixture();
        let created = handle_request(
            &f.ctx,
            request(json!({
                "method": "create",
                "params": { "directory": "posts", "slug": "Hello World!", "frontmatter": { "title": "Hi" }, "body": "# Hi" }
            })),
        )
        .unwrap();
        assert!(matches!(created, Response::Mutation(r) if r.slug.as_deref() == Some("hello-world")));
        f.worker.queue().flush();

        match handle_request(&f.ctx, Request::List { directory: None }).unwrap() {
            Response::List(list) => assert_eq!(list.records[0].slug, "hello-world"),
            other => panic!("unexpected response: {:?}", other),
        }

        let get = Request::Get {
            directory: "posts".to_string(),
            slug: "hello-world".to_string(),
        };
        assert!(matches!(handle_request(&f.ctx, get), Ok(Response::Article(_))));
    }

    #[test]
    fn missing_article_is_not_found() {
        let f = fixture();
        let get = Request::Get {
            directory: "posts".to_string(),
            slug: "nope".to_string(),
        };
        assert_eq!(handle_request(&f.ctx, get).unwrap_err().code, -1);

        let unknown = Request::Rebuild {
            directory: "pages".to_string(),
        };
        assert_eq!(handle_request(&f.ctx, unknown).unwrap_err().code, -32602);
    }

    #[test]
    fn validation_failures_are_results_not_errors() {
        let f = fixture();
        let delete = Request::Delete {
            directory: "posts".to_string(),
            slug: "ghost".to_string(),
        };
        match handle_request(&f.ctx, delete).unwrap() {
            Response::Mutation(result) => {
                assert!(!result.success);
                assert_eq!(result.error.as_deref(), Some(NOT_FOUND));
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert!(f.repo.paths().is_empty());
    }

    #[test]
    fn stop_signals_main_thread() {
        let f = fixture();
        assert!(matches!(handle_request(&f.ctx, Request::Stop), Ok(Response::Ok(()))));
        assert!(f.stop.try_recv().is_ok());
    }
}
