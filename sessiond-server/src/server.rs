//! Unix socket listener
//!
//! Accepts connections until shutdown, hands each one to its own task, and
//! closes every session on the way out.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sessiond_utils::{Result, SessiondError};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionOptions;
use crate::handlers::HandlerContext;
use crate::registry::SessionRegistry;

/// Delay before the single bind retry
const BIND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The session daemon
pub struct Server {
    ctx: Arc<HandlerContext>,
    socket_path: PathBuf,
}

impl Server {
    pub fn new(options: SessionOptions) -> Self {
        let socket_path = options.socket_path.clone();
        let registry = SessionRegistry::new(options);
        Self {
            ctx: Arc::new(HandlerContext::new(registry, CancellationToken::new())),
            socket_path,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Token cancelled when the daemon begins shutting down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.shutdown.clone()
    }

    /// Stop accepting connections; [`Server::serve`] closes the sessions
    pub fn shutdown(&self) {
        self.ctx.shutdown.cancel();
    }

    /// Bind the socket, replacing a stale file left by a previous daemon
    pub async fn bind(&self) -> Result<UnixListener> {
        let path = &self.socket_path;
        if let Some(parent) = path.parent() {
            sessiond_utils::paths::ensure_dir(parent).map_err(|e| SessiondError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        remove_socket(path);

        debug!(socket = %path.display(), "binding");
        let listener = match UnixListener::bind(path) {
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!(socket = %path.display(), error = %e, "socket in use, retrying");
                remove_socket(path);
                tokio::time::sleep(BIND_RETRY_DELAY).await;
                UnixListener::bind(path)
            }
            other => other,
        }
        .map_err(|e| SessiondError::connection(format!("Failed to bind {}: {}", path.display(), e)))?;

        info!(socket = %path.display(), "listening");
        Ok(listener)
    }

    /// Run the accept loop until shutdown
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            debug!("connection accepted");
                            tokio::spawn(self.ctx.clone().handle_connection(stream));
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed");
                        }
                    }
                }
                _ = self.ctx.shutdown.cancelled() => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        drop(listener);
        remove_socket(&self.socket_path);
        self.ctx.registry.close_all().await;
        info!("daemon stopped");
        Ok(())
    }

    /// Bind and serve
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(socket = %path.display(), error = %e, "failed to remove socket");
        }
    }
}
