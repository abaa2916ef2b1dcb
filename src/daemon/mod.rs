//! Daemon: serves CMS requests over the socket and applies write effects in
//! the background.

pub mod socket;
pub mod worker;

pub use socket::{Context, SocketServerHandle};
pub use worker::{Effect, EffectQueue, WorkerHandle};

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::config::{CmsConfig, ConfigError};
use crate::content::{ArticleWriter, CacheSync, ContentReader};
use crate::github::{GithubClient, RepoApi};
use crate::protocol::socket_path;
use crate::schema::FrontmatterSchema;
use crate::webhook::{Notifier, validate_webhook_config};

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start socket server: {0}")]
    Socket(#[source] std::io::Error),

    #[error("daemon is already running on {0}")]
    AlreadyRunning(String),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Run the daemon until a stop request or Ctrl-C.
pub fn start(config_path: &Path) -> Result<(), DaemonError> {
    let socket = socket_path();
    if is_listening(&socket) {
        return Err(DaemonError::AlreadyRunning(socket.display().to_string()));
    }

    let config = Arc::new(CmsConfig::load(config_path)?);
    log::info!(
        "Starting daemon for {} ({})",
        config.target_repository,
        config.branch
    );

    if let Some(webhooks) = &config.webhooks {
        for problem in validate_webhook_config(webhooks) {
            log::error!("Webhook config: {}", problem);
        }
    }

    let schema = Arc::new(
        config
            .schema_path
            .as_deref()
            .map(FrontmatterSchema::load)
            .unwrap_or_default(),
    );
    let repo: Arc<dyn RepoApi> = Arc::new(GithubClient::new(&config));

    let worker = WorkerHandle::spawn(
        CacheSync::new(repo.clone(), config.clone()),
        Notifier::new(&config),
    );

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    let ctx = Context {
        config: config.clone(),
        repo: repo.clone(),
        reader: ContentReader::new(repo.clone(), config.clone(), schema.clone()),
        writer: ArticleWriter::new(repo, config, schema, worker.queue()),
        start_time: Instant::now(),
        stop: stop_tx.clone(),
    };

    let mut server = SocketServerHandle::spawn(ctx).map_err(DaemonError::Socket)?;

    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    log::info!("Daemon ready");
    let _ = stop_rx.recv();
    log::info!("Shutting down");

    server.shutdown();
    worker.shutdown();
    Ok(())
}

/// Whether something accepts connections on `path`. A leftover socket file
/// with no listener behind it does not count.
fn is_listening(path: &Path) -> bool {
    UnixStream::connect(path).is_ok()
}
