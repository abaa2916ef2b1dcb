//! Background worker for the secondary effects of an article write.
//!
//! Cache updates and webhook notifications are handed to this thread after
//! the article commit succeeds, so the request can answer without waiting
//! for them. Effects run in submission order; their failures are logged
//! here and never reach the client.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::Mutex;
use std::sync::mpsc as oneshot;
use std::thread::{self, JoinHandle};

use crate::content::{CacheOp, CacheSync, Frontmatter};
use crate::types::ContentKey;
use crate::webhook::{CmsEvent, Notifier};

/// A secondary effect of an article write.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Apply a change to the directory's `index.json`.
    SyncCache {
        key: ContentKey,
        frontmatter: Frontmatter,
        body: String,
        op: CacheOp,
    },

    /// Tell webhook endpoints about an article event.
    Notify { event: CmsEvent, key: ContentKey },
}

/// Requests the worker can handle.
pub enum WorkerRequest {
    /// Run an effect (fire and forget).
    Apply(Effect),

    /// Reply once every effect queued before this one has run.
    Flush { reply: oneshot::Sender<()> },

    /// Shutdown the worker.
    Shutdown,
}

/// Background worker that applies effects.
pub struct Worker {
    receiver: Receiver<WorkerRequest>,
    cache: CacheSync,
    notifier: Notifier,
}

impl Worker {
    pub fn new(receiver: Receiver<WorkerRequest>, cache: CacheSync, notifier: Notifier) -> Self {
        Self {
            receiver,
            cache,
            notifier,
        }
    }

    /// Run the worker loop (blocks until Shutdown).
    pub fn run(self) {
        log::info!("Effects worker started");

        loop {
            match self.receiver.recv() {
                Ok(WorkerRequest::Apply(effect)) => self.apply(effect),
                Ok(WorkerRequest::Flush { reply }) => {
                    let _ = reply.send(());
                }
                Ok(WorkerRequest::Shutdown) => {
                    log::info!("Effects worker shutting down");
                    break;
                }
                Err(_) => {
                    log::info!("Effects channel closed, exiting");
                    break;
                }
            }
        }
    }

    fn apply(&self, effect: Effect) {
        match effect {
            Effect::SyncCache {
                key,
                frontmatter,
                body,
                op,
            } => {
                log::debug!("Cache {:?} for {}", op, key);
                if let Err(e) = self.cache.update_for_content(&key, &frontmatter, &body, op) {
                    log::warn!("Cache update failed for {}: {}", key, e);
                }
            }
            Effect::Notify { event, key } => {
                log::debug!("Webhook {} for {}", event, key);
                self.notifier.notify(event, &key);
            }
        }
    }
}

/// Effects waiting beyond this are dropped instead of blocking the writer.
pub const EFFECT_QUEUE_CAPACITY: usize = 100;

/// Cloneable submit side of the worker queue.
#[derive(Clone)]
pub struct EffectQueue {
    sender: Sender<WorkerRequest>,
}

impl EffectQueue {
    /// Queue an effect without blocking. When the worker has fallen behind
    /// and the queue is full the effect is dropped; the cache may lag until
    /// the next write or rebuild.
    pub fn submit(&self, effect: Effect) {
        match self.sender.try_send(WorkerRequest::Apply(effect)) {
            Ok(()) => {}
            Err(TrySendError::Full(WorkerRequest::Apply(effect))) => {
                log::warn!("Effects queue full, dropping {:?}", effect);
            }
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("Effects worker is gone, dropping effect");
            }
        }
    }

    /// Wait until everything submitted so far has been applied.
    pub fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(WorkerRequest::Flush { reply: tx }).is_ok() {
            let _ = rx.recv();
        }
    }
}

/// Handle for managing the worker thread from the main daemon.
pub struct WorkerHandle {
    queue: EffectQueue,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Spawn the worker thread.
    pub fn spawn(cache: CacheSync, notifier: Notifier) -> Self {
        let (sender, receiver) = bounded(EFFECT_QUEUE_CAPACITY);

        let worker = Worker::new(receiver, cache, notifier);
        let thread = thread::Builder::new()
            .name("inkraft-effects".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn effects thread");

        Self {
            queue: EffectQueue { sender },
            thread: Mutex::new(Some(thread)),
        }
    }

    pub fn queue(&self) -> EffectQueue {
        self.queue.clone()
    }

    /// Apply everything still queued, then stop the worker.
    pub fn shutdown(&self) {
        let thread = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(thread) = thread {
            let _ = self.queue.sender.send(WorkerRequest::Shutdown);
            let _ = thread.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CmsConfig;
    use crate::github::memory::MemoryRepo;
    use serde_json::json;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn spawn() -> (Arc<MemoryRepo>, WorkerHandle) {
        spawn_with(
            r#"{ "targetRepository": "octocat/blog", "content": [{ "directory": "posts" }] }"#,
        )
    }

    fn spawn_with(config: &str) -> (Arc<MemoryRepo>, WorkerHandle) {
        let config: Arc<CmsConfig> = Arc::new(config.parse().unwrap());
        let repo = Arc::new(MemoryRepo::new("octocat/blog", "main"));
        let handle = WorkerHandle::spawn(
            CacheSync::new(repo.clone(), config.clone()),
            Notifier::new(&config),
        );
        (repo, handle)
    }

    fn sync_cache(slug: &str, op: CacheOp) -> Effect {
        Effect::SyncCache {
            key: ContentKey::new("posts", slug),
            frontmatter: json!({ "title": slug }).as_object().unwrap().clone(),
            body: String::new(),
            op,
        }
    }

    #[test]
    fn test_worker_spawn_and_shutdown() {
        let (_repo, handle) = spawn();
        let _queue = handle.queue();

        handle.shutdown();

        // Double shutdown should be safe (no-op)
        handle.shutdown();
    }

    #[test]
    fn effects_apply_in_order() {
        let (repo, handle) = spawn();
        let queue = handle.queue();

        queue.submit(sync_cache("a", CacheOp::Create));
        queue.submit(sync_cache("b", CacheOp::Create));
        queue.submit(sync_cache("a", CacheOp::Delete));
        queue.flush();

        let records: Vec<serde_json::Value> =
            serde_json::from_str(&repo.file_text("posts/index.json").unwrap()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["slug"], "b");
    }

    #[test]
    fn shutdown_drains_queue() {
        let (repo, handle) = spawn();
        let queue = handle.queue();

        queue.submit(sync_cache("a", CacheOp::Create));
        handle.shutdown();

        assert!(repo.file_text("posts/index.json").is_some());

        // Submitting after shutdown is dropped quietly
        queue.submit(sync_cache("b", CacheOp::Create));
        queue.flush();
    }

    #[test]
    fn submit_does_not_wait_for_stalled_webhook() {
        // Accepts connections but never answers.
        let endpoint = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = format!(
            r#"{{
                "targetRepository": "octocat/blog",
                "httpTimeoutSecs": 30,
                "webhooks": {{
                    "enabled": true,
                    "endpoints": [{{ "name": "slow", "url": "http://{}/hook" }}]
                }}
            }}"#,
            endpoint.local_addr().unwrap()
        );
        let (_repo, handle) = spawn_with(&config);
        let queue = handle.queue();

        let started = Instant::now();
        for i in 0..EFFECT_QUEUE_CAPACITY + 20 {
            queue.submit(Effect::Notify {
                event: CmsEvent::Create,
                key: ContentKey::new("posts", format!("a-{}", i)),
            });
        }
        assert!(started.elapsed() < Duration::from_secs(5));

        // Refuse further connections so the backlog drains quickly.
        drop(endpoint);
        handle.shutdown();
    }
}
