//! Blocking TCP connections.
//!
//! [`TcpConnector`] is a [`ConnectionFactory`] for plain TCP endpoints. The
//! connection resolves its own address when opened; pools never resolve
//! names.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::connection::{Connection, ConnectionFactory};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default read and write timeout.
pub const DEFAULT_RW_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for TCP connections, and the factory that creates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConnector {
    connect_timeout: Duration,
    rw_timeout: Option<Duration>,
    nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            rw_timeout: Some(DEFAULT_RW_TIMEOUT),
            nodelay: true,
        }
    }
}

impl TcpConnector {
    /// Create a connector with default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout. Zero waits for the OS timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read and write timeout. Zero disables it.
    #[must_use]
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.rw_timeout = Some(timeout).filter(|d| !d.is_zero());
        self
    }

    /// Enable or disable `TCP_NODELAY`.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    fn connect(&self, addr: &SocketAddr) -> io::Result<TcpStream> {
        let stream = if self.connect_timeout.is_zero() {
            TcpStream::connect(addr)?
        } else {
            TcpStream::connect_timeout(addr, self.connect_timeout)?
        };
        stream.set_read_timeout(self.rw_timeout)?;
        stream.set_write_timeout(self.rw_timeout)?;
        stream.set_nodelay(self.nodelay)?;
        Ok(stream)
    }
}

impl ConnectionFactory<TcpConnection> for TcpConnector {
    fn create(&self, address: &str) -> TcpConnection {
        TcpConnection {
            address: address.to_string(),
            settings: self.clone(),
            stream: None,
        }
    }
}

/// A TCP connection to one endpoint.
#[derive(Debug)]
pub struct TcpConnection {
    address: String,
    settings: TcpConnector,
    stream: Option<TcpStream>,
}

impl TcpConnection {
    /// The endpoint address this connection was created for.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the connection has been opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Borrow the underlying stream.
    #[must_use]
    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    /// Mutably borrow the underlying stream.
    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.connected()?.peer_addr()
    }

    /// Shut down both halves of the stream.
    pub fn shutdown(&self) -> io::Result<()> {
        self.connected()?.shutdown(Shutdown::Both)
    }

    fn connected(&self) -> io::Result<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection not open"))
    }

    fn connected_mut(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection not open"))
    }
}

impl Connection for TcpConnection {
    type Error = io::Error;

    fn open(&mut self) -> io::Result<()> {
        let mut last_err = None;
        for addr in self.address.to_socket_addrs()? {
            tracing::trace!(address = %self.address, %addr, "connecting");
            match self.settings.connect(&addr) {
                Ok(stream) => {
                    tracing::debug!(address = %self.address, %addr, "TCP connection established");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses resolved for {}", self.address),
            )
        }))
    }
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.connected_mut()?.read(buf)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.connected_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.connected_mut()?.flush()
    }
}
