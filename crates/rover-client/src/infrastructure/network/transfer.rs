//! Connecting end of the bulk data connection.
//!
//! The server binds the transfer port only once the job reaches the front of
//! its own queue, which may be a while after this side is ready: the
//! server's previous job can still be draining.  So the client waits a short
//! setup delay and then keeps retrying until the setup window closes.  The
//! window matches the server's accept timeout, so neither side abandons a
//! job the other is still waiting on.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use rover_core::protocol::messages::{
    REPLY_TIMEOUT, TRANSFER_PORT, TRANSFER_SETUP_DELAY, TRANSFER_SETUP_WINDOW,
};
use rover_core::{DataChannel, Peer, TransferTicket};
use tracing::{debug, info};

/// Shortest pause between refused connection attempts.
const MIN_RETRY_PAUSE: Duration = Duration::from_millis(20);

/// Client-side [`DataChannel`]: connects to the server's transfer port.
#[derive(Debug, Clone)]
pub struct ConnectChannel {
    port: u16,
    setup_delay: Duration,
    setup_window: Duration,
    io_timeout: Duration,
}

impl ConnectChannel {
    /// `setup_window` bounds how long connection attempts go on for;
    /// `io_timeout` bounds every read or write on the established connection.
    pub fn new(port: u16, setup_delay: Duration, setup_window: Duration, io_timeout: Duration) -> Self {
        Self {
            port,
            setup_delay,
            setup_window,
            io_timeout,
        }
    }

    fn retry_pause(&self) -> Duration {
        self.setup_delay.max(MIN_RETRY_PAUSE)
    }
}

impl Default for ConnectChannel {
    fn default() -> Self {
        Self::new(
            TRANSFER_PORT,
            TRANSFER_SETUP_DELAY,
            TRANSFER_SETUP_WINDOW,
            REPLY_TIMEOUT,
        )
    }
}

impl DataChannel for ConnectChannel {
    type Stream = TcpStream;

    fn peer(&self) -> Peer {
        Peer::Client
    }

    fn open(&self, ticket: &TransferTicket) -> io::Result<TcpStream> {
        let ip = ticket.peer.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "transfer has no server address")
        })?;
        let addr = SocketAddr::new(ip, self.port);

        thread::sleep(self.setup_delay);
        let deadline = Instant::now() + self.setup_window;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let limit = remaining.min(self.io_timeout).max(Duration::from_millis(1));
            match TcpStream::connect_timeout(&addr, limit) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.io_timeout))?;
                    stream.set_write_timeout(Some(self.io_timeout))?;
                    info!(
                        "data connection to {addr} for {} (attempt {attempt})",
                        ticket.filename
                    );
                    return Ok(stream);
                }
                Err(e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!("giving up on {addr} after {attempt} attempt(s): {e}");
                        return Err(e);
                    }
                    debug!("data connection attempt {attempt} failed: {e}");
                    thread::sleep(self.retry_pause().min(deadline - now));
                }
            }
        }
    }
}
