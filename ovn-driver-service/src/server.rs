//! Plugin socket server
//!
//! Serves the plugin router over HTTP/1.1 on a unix socket in the engine's
//! plugin directory.

use anyhow::{Context, Result};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

/// Unix socket server for the plugin API
pub struct PluginServer {
    path: PathBuf,
    listener: UnixListener,
}

impl PluginServer {
    /// Bind the socket, replacing a stale one left by a previous run
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        prepare_socket_path(&path)?;
        let listener = UnixListener::bind(&path)
            .with_context(|| format!("failed to bind plugin socket {}", path.display()))?;
        info!("Plugin API listening on unix:{}", path.display());
        Ok(Self { path, listener })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the listener fails
    pub async fn serve(self, router: Router) -> Result<()> {
        loop {
            let (stream, _) = self
                .listener
                .accept()
                .await
                .context("failed to accept plugin connection")?;
            let router = router.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = TowerToHyperService::new(router);
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Plugin connection error: {}", e);
                }
            });
        }
    }
}

impl Drop for PluginServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove plugin socket {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Create the parent directory and remove a leftover socket file
fn prepare_socket_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale plugin socket {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("failed to remove stale socket {}", path.display()))
        }
    }
}
