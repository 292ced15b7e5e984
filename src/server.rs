//! TCP accept loop, grounded on the teacher's `socket/server.rs`
//! `SocketServer::start` pattern: spawn the accept loop, spawn one task
//! per connection, log and keep going on a transient accept error.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::LockConfig;
use crate::registry::LockRegistry;
use crate::session::Session;

/// Owns the listening socket and the shared lock registry.
pub struct LockServer {
    config: Arc<LockConfig>,
    registry: Arc<LockRegistry>,
    /// Every spawned session task, tracked so `shutdown` can wait for them
    /// to retire on their own deadlines instead of aborting them.
    sessions: Arc<AsyncMutex<JoinSet<()>>>,
}

impl LockServer {
    pub fn new(config: Arc<LockConfig>) -> Self {
        let registry = LockRegistry::with_hold_timeout(config.hold_timeout);
        Self { config, registry, sessions: Arc::new(AsyncMutex::new(JoinSet::new())) }
    }

    /// Bind the listening socket and return its local address alongside a
    /// handle to the spawned accept loop. Awaiting the handle blocks until
    /// the listener itself fails unrecoverably; use [`LockServer::shutdown`]
    /// to stop accepting and drain in-flight sessions.
    pub async fn start(&self) -> std::io::Result<(std::net::SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("listening on {local_addr}");

        let registry = self.registry.clone();
        let config = self.config.clone();
        let sessions = self.sessions.clone();

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        log::debug!("accepted connection from {peer}");
                        let registry = registry.clone();
                        let config = config.clone();
                        sessions.lock().await.spawn(async move {
                            Session::run(stream, registry, config).await;
                        });
                    }
                    Err(e) => {
                        log::warn!("accept error: {e}");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        });

        Ok((local_addr, handle))
    }

    /// Stop accepting new connections and wait for every in-flight session
    /// to finish. Each session's own acquisition/hold/read deadline still
    /// governs when it actually returns; this only stops feeding the accept
    /// loop new work and blocks until the sessions already in flight have
    /// all retired naturally.
    pub async fn shutdown(&self, accept_handle: JoinHandle<()>) {
        accept_handle.abort();
        let mut sessions = self.sessions.lock().await;
        while sessions.join_next().await.is_some() {}
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }
}
