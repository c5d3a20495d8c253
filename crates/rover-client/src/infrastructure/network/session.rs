//! The control connection to one server.
//!
//! A [`Session`] is either disconnected or owns exactly one TCP stream.  It
//! is the only place the client touches the control socket, and it closes
//! itself on the first I/O failure so a dead connection is reported once
//! and then fails fast with [`ConnectionError::NotConnected`].

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use rover_core::protocol::messages::{BUFFER_SIZE, CONTROL_PORT, REPLY_TIMEOUT};
use rover_core::{encode_command, Command, Verb};
use tracing::{debug, info, warn};

use crate::application::remote::{ConnectFailure, ConnectionError, ControlTransport};

/// Connection parameters for a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Port used when the target does not name one.
    pub control_port: u16,
    pub connect_timeout: Duration,
    /// Longest wait for any single reply.
    pub reply_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            control_port: CONTROL_PORT,
            connect_timeout: Duration::from_secs(5),
            reply_timeout: REPLY_TIMEOUT,
        }
    }
}

/// The client's control connection.
#[derive(Debug)]
pub struct Session {
    settings: SessionSettings,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
}

impl Session {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            stream: None,
            peer: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Connects to `target`, a host name or IP address with an optional
    /// `:port`.  An existing connection is closed first.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Connect`] with [`ConnectFailure::InvalidAddress`]
    /// if `target` cannot be a host, [`ConnectFailure::Lookup`] if it does not
    /// resolve, and [`ConnectFailure::Unreachable`] if no resolved address
    /// accepted the connection.
    pub fn connect(&mut self, target: &str) -> Result<SocketAddr, ConnectionError> {
        if self.is_connected() {
            self.disconnect(true);
        }

        let mut last_error = None;
        for addr in self.resolve(target)? {
            match TcpStream::connect_timeout(&addr, self.settings.connect_timeout) {
                Ok(stream) => {
                    self.configure(&stream).map_err(|e| {
                        connect_error(target, ConnectFailure::Unreachable, Some(e))
                    })?;
                    info!("connected to {addr}");
                    self.stream = Some(stream);
                    self.peer = Some(addr);
                    return Ok(addr);
                }
                Err(e) => {
                    debug!("connect to {addr} failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(connect_error(target, ConnectFailure::Unreachable, last_error))
    }

    /// Closes the connection.  With `notify`, first tries to tell the server;
    /// a failure to do so is ignored since the server also sees the close.
    /// Does nothing when already disconnected.
    pub fn disconnect(&mut self, notify: bool) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let peer = self.peer.take();

        if notify {
            let notice = encode_command(&Command::bare(Verb::Disconnect));
            if let Err(e) = stream.write_all(notice.as_bytes()) {
                debug!("disconnect notice not delivered: {e}");
            }
        }
        let _ = stream.shutdown(Shutdown::Both);
        match peer {
            Some(addr) => info!("disconnected from {addr}"),
            None => info!("disconnected"),
        }
    }

    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_read_timeout(Some(self.settings.reply_timeout))?;
        stream.set_write_timeout(Some(self.settings.reply_timeout))?;
        stream.set_nodelay(true)
    }

    fn resolve(&self, target: &str) -> Result<Vec<SocketAddr>, ConnectionError> {
        let target = target.trim();
        if let Ok(addr) = target.parse::<SocketAddr>() {
            return Ok(vec![addr]);
        }
        if let Ok(ip) = target.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, self.settings.control_port)]);
        }

        let (host, port) = match target.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host, port),
                Err(_) => return Err(connect_error(target, ConnectFailure::InvalidAddress, None)),
            },
            None => (target, self.settings.control_port),
        };
        if !is_host_name(host) {
            return Err(connect_error(target, ConnectFailure::InvalidAddress, None));
        }

        match (host, port).to_socket_addrs() {
            Ok(addrs) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                if addrs.is_empty() {
                    Err(connect_error(target, ConnectFailure::Lookup, None))
                } else {
                    Ok(addrs)
                }
            }
            Err(e) => Err(connect_error(target, ConnectFailure::Lookup, Some(e))),
        }
    }

    /// Drops the connection after an I/O failure.
    fn fail(&mut self, e: io::Error) -> ConnectionError {
        warn!("control connection failed: {e}");
        self.disconnect(false);
        ConnectionError::Io(e)
    }

    fn closed(&mut self) -> ConnectionError {
        warn!("control connection closed by server");
        self.disconnect(false);
        ConnectionError::Closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect(true);
    }
}

impl ControlTransport for Session {
    fn send(&mut self, message: &[u8]) -> Result<(), ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;
        match stream.write_all(message) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn receive(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;
        let mut buf = vec![0u8; BUFFER_SIZE];
        match read_once(stream, &mut buf) {
            Ok(0) => Err(self.closed()),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn receive_exact(&mut self, len: usize) -> Result<Vec<u8>, ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;
        let mut buf = vec![0u8; len];
        match stream.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(self.closed()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn peer_ip(&self) -> Option<IpAddr> {
        self.peer.map(|addr| addr.ip())
    }
}

fn read_once(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn connect_error(target: &str, kind: ConnectFailure, source: Option<io::Error>) -> ConnectionError {
    ConnectionError::Connect {
        target: target.to_string(),
        kind,
        source,
    }
}

/// Whether `host` could be a DNS name.  All-numeric dotted strings are
/// rejected: they failed to parse as an IPv4 address, so no lookup helps.
fn is_host_name(host: &str) -> bool {
    !host.is_empty()
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b'_')
        && !host.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn settings(port: u16) -> SessionSettings {
        SessionSettings {
            control_port: port,
            connect_timeout: Duration::from_secs(2),
            reply_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_connect_send_receive_over_loopback() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut buf = [0u8; 16];
            let n = s.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"GETCWD");
            s.write_all(b"filespace:/").unwrap();
        });
        let mut session = Session::new(settings(port));

        // Act
        let addr = session.connect("127.0.0.1").unwrap();
        session.send(b"GETCWD").unwrap();
        let reply = session.receive().unwrap();
        server.join().unwrap();

        // Assert
        assert_eq!(addr.port(), port);
        assert_eq!(reply, b"filespace:/");
        assert_eq!(session.peer_ip(), Some(IpAddr::from([127, 0, 0, 1])));
    }

    #[test]
    fn test_connect_rejects_malformed_address() {
        let mut session = Session::new(SessionSettings::default());

        for target in ["not a host!", "999.1.1.1", "", "host:notaport"] {
            let err = session.connect(target).unwrap_err();
            assert_eq!(
                err.connect_failure(),
                Some(ConnectFailure::InvalidAddress),
                "target {target:?}"
            );
        }
    }

    #[test]
    fn test_connect_to_closed_port_is_unreachable() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut session = Session::new(settings(port));

        let err = session.connect("127.0.0.1").unwrap_err();

        assert_eq!(err.connect_failure(), Some(ConnectFailure::Unreachable));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_disconnect_notifies_and_is_idempotent() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            s.read_to_end(&mut received).unwrap();
            received
        });
        let mut session = Session::new(SessionSettings::default());
        session.connect(&addr.to_string()).unwrap();

        // Act
        session.disconnect(true);
        session.disconnect(true);

        // Assert
        assert_eq!(server.join().unwrap(), b"DISCONNECT");
        assert!(!session.is_connected());
        assert!(matches!(session.send(b"LS"), Err(ConnectionError::NotConnected)));
    }

    #[test]
    fn test_server_close_disconnects_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || drop(listener.accept().unwrap()));
        let mut session = Session::new(SessionSettings::default());
        session.connect(&addr.to_string()).unwrap();
        server.join().unwrap();

        let err = session.receive().unwrap_err();

        assert!(matches!(err, ConnectionError::Closed | ConnectionError::Io(_)));
        assert!(!session.is_connected());
        assert_eq!(session.peer_addr(), None);
    }

    #[test]
    fn test_is_host_name() {
        assert!(is_host_name("fileserver.local"));
        assert!(is_host_name("nas-01"));
        assert!(!is_host_name("10.0.0.256"));
        assert!(!is_host_name("a b"));
    }
}
