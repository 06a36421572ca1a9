//! Mock TCP server for unit testing.
//!
//! A local echo server that counts the connections it accepts. Use it to
//! exercise [`netpool::TcpConnection`] against real sockets without any
//! external service.
//!
//! ## Example
//!
//! ```rust,ignore
//! use netpool_testing::MockServer;
//!
//! #[tokio::test(flavor = "multi_thread")]
//! async fn test_connect() {
//!     let server = MockServer::start().await.unwrap();
//!     let address = server.address();
//!     // Connect a pool to `address`...
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// A mock echo server for testing.
pub struct MockServer {
    /// Server address.
    addr: SocketAddr,
    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,
    /// Connections accepted so far.
    accepted: Arc<AtomicUsize>,
    /// Connections currently open.
    active: Arc<AtomicUsize>,
}

impl MockServer {
    /// Start the mock server on an available port.
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let accepted = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            accepted: accepted.clone(),
            active: active.clone(),
        };

        // Spawn the accept loop
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _peer_addr)) => {
                                accepted.fetch_add(1, Ordering::SeqCst);
                                active.fetch_add(1, Ordering::SeqCst);
                                let active = active.clone();
                                let shutdown_rx = shutdown_tx.subscribe();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, shutdown_rx).await {
                                        tracing::debug!("Connection error: {}", e);
                                    }
                                    active.fetch_sub(1, Ordering::SeqCst);
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Ok(server)
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the address as a `host:port` string.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Number of connections accepted so far.
    pub fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Number of connections currently open.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop the server.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Echo everything back until the client disconnects or the server stops.
async fn handle_connection(
    mut stream: TcpStream,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.split();
    tokio::select! {
        result = tokio::io::copy(&mut reader, &mut writer) => {
            result?;
        }
        _ = shutdown_rx.recv() => {}
    }
    Ok(())
}

/// An address on the loopback interface that refuses connections.
///
/// Binds an ephemeral port and releases it again. Another process could
/// grab the port in between, which is acceptable for tests.
pub fn refused_address() -> Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr.to_string())
}
