//! Finds servers by listening for their multicast heartbeats.
//!
//! A discovery pass joins the heartbeat group, polls a non-blocking socket
//! until the collection window closes, and returns every distinct server
//! address it heard.  Nothing is kept between passes.
//!
//! # Which address is reported? (for beginners)
//!
//! Each heartbeat carries the server's own IPv4 address as text.  That is
//! what gets reported, because the datagram's source address can be a
//! different interface (or a NAT) than the one clients should connect to.
//! A heartbeat whose payload does not parse falls back to its source
//! address.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use rover_core::protocol::messages::HEARTBEAT_MAX_LEN;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pause between empty polls.
const POLL_PAUSE: Duration = Duration::from_millis(1);

/// Error type for discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The listening socket could not be created, bound, or joined to the
    /// group.
    #[error("failed to listen on {group}: {source}")]
    Socket {
        group: SocketAddrV4,
        #[source]
        source: io::Error,
    },
}

/// Anything heartbeats can be read from.
pub trait HeartbeatSource {
    /// Non-blocking receive.  Returns `WouldBlock` when nothing is waiting.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

/// A non-blocking UDP socket joined to the heartbeat group.  Leaves the
/// group when dropped.
#[derive(Debug)]
pub struct MulticastListener {
    socket: UdpSocket,
    group: SocketAddrV4,
}

impl MulticastListener {
    /// Binds the group port on all interfaces and joins `group`.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::Socket`] if any socket step fails.
    pub fn join(group: SocketAddrV4) -> Result<Self, DiscoveryError> {
        let socket =
            open_listener(group).map_err(|source| DiscoveryError::Socket { group, source })?;
        debug!("joined {group}");
        Ok(Self { socket, group })
    }
}

impl HeartbeatSource for MulticastListener {
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }
}

impl Drop for MulticastListener {
    fn drop(&mut self) {
        if let Err(e) = self
            .socket
            .leave_multicast_v4(self.group.ip(), &Ipv4Addr::UNSPECIFIED)
        {
            debug!("leaving {} failed: {e}", self.group);
        }
    }
}

fn open_listener(group: SocketAddrV4) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    // Several clients on one host may listen at once.
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    if let Err(e) = socket.set_reuse_port(true) {
        warn!("SO_REUSEPORT unavailable: {e}");
    }
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port())).into())?;
    socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Reads heartbeats from `source` until `window` elapses and returns the
/// distinct server addresses in the order first heard.
///
/// Receive errors other than `WouldBlock` are logged and skipped.
pub fn collect_heartbeats<S: HeartbeatSource>(source: &mut S, window: Duration) -> Vec<IpAddr> {
    let deadline = Instant::now() + window;
    let mut seen = HashSet::new();
    let mut servers = Vec::new();
    // Room for one byte more than a valid payload, to spot oversized ones.
    let mut buf = [0u8; HEARTBEAT_MAX_LEN + 1];

    while Instant::now() < deadline {
        match source.try_recv(&mut buf) {
            Ok((n, from)) => {
                let server = heartbeat_address(&buf[..n]).unwrap_or_else(|| from.ip());
                if seen.insert(server) {
                    debug!("heard server {server} (from {from})");
                    servers.push(server);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_PAUSE),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!("heartbeat receive failed: {e}");
                thread::sleep(POLL_PAUSE);
            }
        }
    }
    servers
}

/// One discovery pass on the real network.
///
/// # Errors
///
/// [`DiscoveryError::Socket`] if the group cannot be joined.
pub fn discover_servers(group: SocketAddrV4, window: Duration) -> Result<Vec<IpAddr>, DiscoveryError> {
    let mut listener = MulticastListener::join(group)?;
    let servers = collect_heartbeats(&mut listener, window);
    info!("discovery found {} server(s) in {window:?}", servers.len());
    Ok(servers)
}

fn heartbeat_address(payload: &[u8]) -> Option<IpAddr> {
    if payload.len() > HEARTBEAT_MAX_LEN {
        return None;
    }
    let text = std::str::from_utf8(payload).ok()?;
    text.trim().parse::<Ipv4Addr>().ok().map(IpAddr::V4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Plays back scripted datagrams, then reports `WouldBlock` forever.
    struct FakeSource {
        datagrams: VecDeque<(Vec<u8>, SocketAddr)>,
    }

    impl FakeSource {
        fn new(datagrams: &[(&[u8], &str)]) -> Self {
            Self {
                datagrams: datagrams
                    .iter()
                    .map(|(payload, from)| (payload.to_vec(), from.parse().unwrap()))
                    .collect(),
            }
        }
    }

    impl HeartbeatSource for FakeSource {
        fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            let (payload, from) = self
                .datagrams
                .pop_front()
                .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
            let n = payload.len().min(buf.len());
            buf[..n].copy_from_slice(&payload[..n]);
            Ok((n, from))
        }
    }

    #[test]
    fn test_repeated_heartbeats_are_reported_once() {
        // Arrange
        let mut source = FakeSource::new(&[
            (b"192.168.1.20", "192.168.1.20:5000"),
            (b"192.168.1.20", "192.168.1.20:5000"),
            (b"192.168.1.31", "192.168.1.31:5000"),
            (b"192.168.1.20", "192.168.1.20:5000"),
        ]);

        // Act
        let servers = collect_heartbeats(&mut source, Duration::from_millis(30));

        // Assert
        assert_eq!(
            servers,
            vec![
                IpAddr::from([192, 168, 1, 20]),
                IpAddr::from([192, 168, 1, 31])
            ]
        );
    }

    #[test]
    fn test_payload_address_preferred_over_source() {
        let mut source = FakeSource::new(&[(b"10.0.0.5", "172.17.0.1:40042")]);

        let servers = collect_heartbeats(&mut source, Duration::from_millis(10));

        assert_eq!(servers, vec![IpAddr::from([10, 0, 0, 5])]);
    }

    #[test]
    fn test_garbage_payload_falls_back_to_source() {
        let mut source = FakeSource::new(&[
            (b"hello", "10.0.0.9:1"),
            (b"255.255.255.255.255", "10.0.0.10:1"),
        ]);

        let servers = collect_heartbeats(&mut source, Duration::from_millis(10));

        assert_eq!(
            servers,
            vec![IpAddr::from([10, 0, 0, 9]), IpAddr::from([10, 0, 0, 10])]
        );
    }

    #[test]
    fn test_silent_window_returns_empty() {
        let start = Instant::now();
        let servers = collect_heartbeats(&mut FakeSource::new(&[]), Duration::from_millis(20));

        assert!(servers.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
