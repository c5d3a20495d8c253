//! Listening end of the bulk data connection.
//!
//! The transfer port is bound only while a job is being set up: the worker
//! binds it, accepts the client, and closes the listener straight away, so
//! the port is free again by the time the next queued job starts.  A
//! connection from any address other than the job's control-channel peer is
//! dropped.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use rover_core::{DataChannel, Peer, TransferTicket};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::infrastructure::network::control::is_timeout_error;

/// Delay between accept attempts while waiting for the client.
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Server-side [`DataChannel`]: binds the transfer port and accepts.
#[derive(Debug, Clone)]
pub struct ListenChannel {
    addr: SocketAddr,
    accept_timeout: Duration,
}

impl ListenChannel {
    /// `accept_timeout` bounds both the wait for the client to connect and
    /// every read or write once it has.
    pub fn new(bind_ip: IpAddr, port: u16, accept_timeout: Duration) -> Self {
        Self {
            addr: SocketAddr::new(bind_ip, port),
            accept_timeout,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn bind(&self) -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(self.addr), Type::STREAM, Some(Protocol::TCP))?;
        // The previous job's connection may still be in TIME_WAIT.
        socket.set_reuse_address(true)?;
        socket.bind(&self.addr.into())?;
        socket.listen(1)?;
        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;
        Ok(listener)
    }
}

impl DataChannel for ListenChannel {
    type Stream = TcpStream;

    fn peer(&self) -> Peer {
        Peer::Server
    }

    fn open(&self, ticket: &TransferTicket) -> io::Result<TcpStream> {
        let listener = self.bind()?;
        debug!("transfer listener bound on {} for {}", self.addr, ticket.filename);

        let deadline = Instant::now() + self.accept_timeout;
        loop {
            match listener.accept() {
                Ok((stream, from)) => {
                    if ticket.peer.is_some_and(|expected| expected != from.ip()) {
                        warn!("ignoring data connection from unexpected peer {from}");
                        continue;
                    }
                    info!("data connection from {from} for {}", ticket.filename);
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(self.accept_timeout))?;
                    stream.set_write_timeout(Some(self.accept_timeout))?;
                    return Ok(stream);
                }
                Err(e) if is_timeout_error(&e) => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("no data connection within {:?}", self.accept_timeout),
                        ));
                    }
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_core::Direction;
    use std::io::{Read, Write};
    use std::net::Ipv4Addr;

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn ticket(peer: Option<IpAddr>) -> TransferTicket {
        TransferTicket {
            direction: Direction::Download,
            filename: "a.bin".to_string(),
            size: 3,
            peer,
        }
    }

    #[test]
    fn test_open_accepts_expected_peer() {
        // Arrange
        let port = free_port();
        let channel = ListenChannel::new(Ipv4Addr::LOCALHOST.into(), port, Duration::from_secs(5));
        let connector = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            let mut s = TcpStream::connect(("127.0.0.1", port)).unwrap();
            s.write_all(b"abc").unwrap();
        });

        // Act
        let mut stream = channel.open(&ticket(Some(Ipv4Addr::LOCALHOST.into()))).unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).unwrap();
        connector.join().unwrap();

        // Assert
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_open_times_out_without_client() {
        let channel = ListenChannel::new(
            Ipv4Addr::LOCALHOST.into(),
            free_port(),
            Duration::from_millis(100),
        );

        let err = channel.open(&ticket(None)).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_listener_is_released_after_open() {
        let port = free_port();
        let channel = ListenChannel::new(Ipv4Addr::LOCALHOST.into(), port, Duration::from_millis(50));
        let _ = channel.open(&ticket(None));

        // The port can be bound again straight away.
        assert!(channel.bind().is_ok());
    }

    #[test]
    fn test_server_side_sends_downloads() {
        let channel = ListenChannel::new(Ipv4Addr::LOCALHOST.into(), 0, Duration::from_secs(1));
        assert!(channel.peer().sends(Direction::Download));
    }
}
