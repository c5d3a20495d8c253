//! Control-channel listener and per-session request loop.
//!
//! # Framing
//!
//! Messages carry no length prefix: one `read` of up to [`BUFFER_SIZE`]
//! bytes is one message.  This holds on a quiet LAN because the client never
//! has more than one request in flight.  The one place where two messages
//! do share a read in practice is right after a `DOWN` negotiation, where
//! the client's success marker can arrive glued to its next request.
//! [`ControlChannel`] keeps whatever follows the marker and hands it out as
//! the next message.
//!
//! # Sessions
//!
//! One client is served at a time.  Further connections wait in the listen
//! backlog until the current session ends, after which the gateway is reset
//! to the sandbox root.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rover_core::protocol::messages::{BUFFER_SIZE, REPLY_TIMEOUT};
use rover_core::protocol::split_marker;
use rover_core::{FileGateway, GatewayError, TransferEngine};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::handle_request::{ControlLink, Flow, RequestHandler};
use crate::infrastructure::network::discovery::DiscoveryError;
use crate::infrastructure::network::transfer::ListenChannel;
use crate::infrastructure::storage::config::ConfigError;

/// How often blocked reads and accepts wake up to check the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Error type for the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The control port could not be bound.
    #[error("failed to bind control listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Accepting or configuring a control connection failed.
    #[error("control socket error: {0}")]
    Io(#[from] io::Error),

    /// The sandbox root could not be opened.
    #[error("sandbox error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ── ControlChannel ────────────────────────────────────────────────────────────

/// One accepted control connection.
pub struct ControlChannel {
    stream: TcpStream,
    peer: SocketAddr,
    /// Bytes read past the end of a negotiation marker.
    pending: Vec<u8>,
    marker_timeout: Duration,
}

impl ControlChannel {
    /// Wraps an accepted stream.  Reads wake up every [`POLL_INTERVAL`] so
    /// the session loop can notice a shutdown.
    pub fn new(stream: TcpStream, marker_timeout: Duration) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            pending: Vec::new(),
            marker_timeout,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Reads the next message.
    ///
    /// Returns `Ok(None)` when the client closed the connection.  A read
    /// timeout is returned as an error for the caller to retry.
    pub fn recv_message(&mut self) -> io::Result<Option<String>> {
        let bytes = if self.pending.is_empty() {
            let bytes = self.read_once()?;
            if bytes.is_empty() {
                return Ok(None);
            }
            bytes
        } else {
            std::mem::take(&mut self.pending)
        };
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn read_once(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; BUFFER_SIZE];
        let n = self.stream.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Reads until data arrives or `marker_timeout` passes.
    fn read_patiently(&mut self) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.marker_timeout;
        loop {
            match self.read_once() {
                Err(e) if is_timeout_error(&e) && Instant::now() < deadline => continue,
                other => return other,
            }
        }
    }
}

impl ControlLink for ControlChannel {
    fn send(&mut self, message: &[u8]) -> io::Result<()> {
        self.stream.write_all(message)?;
        self.stream.flush()
    }

    fn recv_marker(&mut self) -> io::Result<Option<&'static str>> {
        let bytes = if self.pending.is_empty() {
            self.read_patiently()?
        } else {
            std::mem::take(&mut self.pending)
        };
        if bytes.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "client closed the connection during negotiation",
            ));
        }
        match split_marker(&bytes) {
            Some((marker, rest)) => {
                if !rest.is_empty() {
                    debug!("keeping {} byte(s) received after {marker}", rest.len());
                    self.pending = rest.to_vec();
                }
                Ok(Some(marker))
            }
            None => {
                self.pending = bytes;
                Ok(None)
            }
        }
    }

    fn peer_ip(&self) -> Option<IpAddr> {
        Some(self.peer.ip())
    }
}

// ── ControlServer ─────────────────────────────────────────────────────────────

/// Accepts control connections and serves them one after another.
pub struct ControlServer<G> {
    listener: TcpListener,
    handler: RequestHandler<G, ListenChannel>,
    marker_timeout: Duration,
}

impl<G: FileGateway> ControlServer<G> {
    /// Binds the control port.  Port `0` picks a free port; see
    /// [`ControlServer::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address is unavailable.
    pub fn bind(
        addr: SocketAddr,
        gateway: G,
        engine: TransferEngine<ListenChannel>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        info!("control listener bound on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            handler: RequestHandler::new(gateway, engine),
            marker_timeout: REPLY_TIMEOUT,
        })
    }

    /// Overrides how long a negotiation waits for the client's marker.
    pub fn with_marker_timeout(mut self, timeout: Duration) -> Self {
        self.marker_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn engine(&self) -> &TransferEngine<ListenChannel> {
        self.handler.engine()
    }

    /// Serves clients until `running` is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the listener cannot be switched to
    /// non-blocking mode.  Per-session failures are logged and end only
    /// that session.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), ServerError> {
        self.listener.set_nonblocking(true)?;
        info!("waiting for clients");

        while running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    info!("session started with {addr}");
                    match ControlChannel::new(stream, self.marker_timeout) {
                        Ok(channel) => self.serve_session(channel, running),
                        Err(e) => warn!("could not set up session with {addr}: {e}"),
                    }
                    self.handler.end_session();
                    info!("session with {addr} ended");
                }
                Err(e) if is_timeout_error(&e) => thread::sleep(POLL_INTERVAL / 4),
                Err(e) => {
                    warn!("accept failed: {e}");
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }

        info!("control listener stopped");
        Ok(())
    }

    fn serve_session(&mut self, mut channel: ControlChannel, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            let message = match channel.recv_message() {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!("client closed the control connection");
                    break;
                }
                Err(e) if is_timeout_error(&e) => continue,
                Err(e) => {
                    warn!("control read failed: {e}");
                    break;
                }
            };
            match self.handler.handle(&message, &mut channel) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Disconnect) => break,
                Err(e) => {
                    warn!("control write failed: {e}");
                    break;
                }
            }
        }
        let _ = channel.stream.shutdown(Shutdown::Both);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns (server-side channel, client-side raw stream) over loopback.
    fn pair() -> (ControlChannel, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (
            ControlChannel::new(server, Duration::from_secs(2)).unwrap(),
            client,
        )
    }

    fn recv_blocking(channel: &mut ControlChannel) -> Option<String> {
        loop {
            match channel.recv_message() {
                Err(e) if is_timeout_error(&e) => continue,
                other => return other.unwrap(),
            }
        }
    }

    #[test]
    fn test_marker_glued_to_next_request_is_split() {
        // Arrange
        let (mut channel, mut client) = pair();
        client.write_all(b"WINLS").unwrap();

        // Act
        let marker = channel.recv_marker().unwrap();
        let next = recv_blocking(&mut channel);

        // Assert
        assert_eq!(marker, Some("WIN"));
        assert_eq!(next.as_deref(), Some("LS"));
    }

    #[test]
    fn test_non_marker_is_kept_as_next_request() {
        let (mut channel, mut client) = pair();
        client.write_all(b"GETCWD").unwrap();

        assert_eq!(channel.recv_marker().unwrap(), None);
        assert_eq!(recv_blocking(&mut channel).as_deref(), Some("GETCWD"));
    }

    #[test]
    fn test_closed_client_reads_as_none() {
        let (mut channel, client) = pair();
        drop(client);

        assert_eq!(recv_blocking(&mut channel), None);
    }

    #[test]
    fn test_closed_client_during_negotiation_is_error() {
        let (mut channel, client) = pair();
        drop(client);

        let err = channel.recv_marker().unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_peer_ip_is_loopback() {
        let (channel, _client) = pair();
        assert!(channel.peer_ip().unwrap().is_loopback());
    }
}
