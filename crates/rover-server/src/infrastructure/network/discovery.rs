//! Multicast presence heartbeat.
//!
//! While the server runs, a background thread sends one small datagram to
//! the discovery group every heartbeat interval.  The payload is the
//! server's own IPv4 address as dotted-quad text, so a client that hears it
//! knows where to open the control connection.
//!
//! # How multicast discovery works (for beginners)
//!
//! A multicast group is an IP address in `224.0.0.0/4` that any host can
//! *join*.  Datagrams sent to the group address are delivered to every host
//! on the LAN that joined it, and to nobody else.  The server never joins;
//! it only sends.  Clients join the group for a short window, collect the
//! addresses they hear, and leave.
//!
//! The multicast TTL limits how many routers a heartbeat may cross.  The
//! default of 2 keeps it on the local network.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for the heartbeat announcer.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be created or configured.
    #[error("failed to set up heartbeat socket: {0}")]
    Socket(#[source] std::io::Error),

    /// The heartbeat thread could not be started.
    #[error("failed to spawn heartbeat thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Where and how often to announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    pub group: SocketAddrV4,
    pub interval: Duration,
    pub ttl: u32,
    /// Address written into every heartbeat.
    pub advertise: Ipv4Addr,
}

/// A running heartbeat.  Stops when [`HeartbeatAnnouncer::stop`] is called
/// or the value is dropped.
pub struct HeartbeatAnnouncer {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HeartbeatAnnouncer {
    /// Opens the sending socket and starts the heartbeat thread.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Socket`] if the socket cannot be set up and
    /// [`DiscoveryError::Spawn`] if the thread cannot be started.
    pub fn start(settings: HeartbeatSettings) -> Result<Self, DiscoveryError> {
        let socket = open_sender(settings.ttl).map_err(DiscoveryError::Socket)?;
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("rover-heartbeat".to_string())
            .spawn(move || heartbeat_loop(socket, settings, flag))
            .map_err(DiscoveryError::Spawn)?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Whether the heartbeat thread is still sending.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the heartbeat and waits for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("heartbeat thread panicked");
            }
        }
    }
}

impl Drop for HeartbeatAnnouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_sender(ttl: u32) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_ttl_v4(ttl)?;
    // Clients on this host must hear it too.
    socket.set_multicast_loop_v4(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
    Ok(socket.into())
}

fn heartbeat_loop(socket: UdpSocket, settings: HeartbeatSettings, running: Arc<AtomicBool>) {
    let payload = settings.advertise.to_string();
    info!(
        "heartbeat started: announcing {payload} to {} every {:?}",
        settings.group, settings.interval
    );

    let mut warned = false;
    while running.load(Ordering::Relaxed) {
        match socket.send_to(payload.as_bytes(), settings.group) {
            Ok(_) => warned = false,
            // Reported once per outage rather than twenty times a second.
            Err(e) if !warned => {
                warn!("heartbeat send failed: {e}");
                warned = true;
            }
            Err(e) => debug!("heartbeat send failed: {e}"),
        }
        thread::sleep(settings.interval);
    }

    info!("heartbeat stopped");
}

/// Finds the local IPv4 address the OS would use to reach `target`.
///
/// Connecting a UDP socket sends nothing; it only selects a route and a
/// source address.  Returns `None` when no route exists or the result is
/// unspecified.
pub fn detect_outward_ipv4(target: SocketAddrV4) -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(target).ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(local) if !local.ip().is_unspecified() => Some(*local.ip()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_core::protocol::messages::{HEARTBEAT_INTERVAL, MULTICAST_GROUP};

    #[test]
    fn test_start_then_stop_joins_thread() {
        // Arrange
        let settings = HeartbeatSettings {
            group: SocketAddrV4::new(Ipv4Addr::from(MULTICAST_GROUP), 0),
            interval: HEARTBEAT_INTERVAL,
            ttl: 1,
            advertise: Ipv4Addr::LOCALHOST,
        };

        // Act
        let announcer = HeartbeatAnnouncer::start(settings).expect("socket must open");
        thread::sleep(Duration::from_millis(120));
        let was_running = announcer.is_running();
        announcer.stop();

        // Assert
        assert!(was_running);
    }

    #[test]
    fn test_detect_outward_ipv4_for_loopback_target_is_loopback() {
        let ip = detect_outward_ipv4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9));
        assert_eq!(ip, Some(Ipv4Addr::LOCALHOST));
    }
}
