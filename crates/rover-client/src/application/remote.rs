//! Typed client operations over the control connection.
//!
//! Each public method on [`RemoteClient`] sends exactly one request and
//! reads its reply.  Replies are sorted into four outcomes:
//!
//! | Outcome | Meaning | Error variant |
//! |---|---|---|
//! | success | payload decoded into the return type | – |
//! | failure marker | the server refused; carries its message | [`RemoteError::Application`] |
//! | malformed payload | the server broke the wire format | [`RemoteError::Protocol`] |
//! | socket failure | the session is gone | [`RemoteError::Connection`] |
//!
//! Downloads and uploads also negotiate on the control connection before
//! the job is handed to the [`TransferEngine`].  Once queued, a transfer
//! reports only through its [`TransferHandle`]; nothing it does later can
//! fail a call made here.

use std::io;
use std::net::IpAddr;

use rover_core::protocol::messages::{CANCEL_MARKER, CONTINUE_MARKER, DELIMITER_STR, SUCCESS_MARKER};
use rover_core::protocol::{decode_listing, decode_properties, parse_size};
use rover_core::{
    decode_response, encode_command, Command, DataChannel, DirEntry, Direction, FileProperties,
    LocalFile, ProtocolError, TransferEngine, TransferHandle, TransferTicket, Verb,
};
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Messages used when the server gives no reason ─────────────────────────────

pub const LIST_FAILED: &str = "Could not return directory data.";
pub const CD_FAILED: &str = "Could not change directory.";
pub const MKDIR_FAILED: &str = "Could not create directory.";
pub const CWD_FAILED: &str = "Could not return directory path.";
pub const INFO_FAILED: &str = "Could not get file data.";
pub const TEXT_FAILED: &str = "Could not get file.";
pub const DOWN_FAILED: &str = "Could not send file.";
pub const UP_REFUSED: &str = "Server would not accept file.";

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectFailure {
    /// The host name did not resolve.
    #[error("address lookup failed")]
    Lookup,
    /// The address is not a usable host or socket address.
    #[error("invalid address")]
    InvalidAddress,
    /// Resolved, but nothing accepted the connection in time.
    #[error("server refused the connection or is unreachable")]
    Unreachable,
}

/// A control-connection failure.  After any of these the session is closed
/// and must be reconnected.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot connect to {target}: {kind}")]
    Connect {
        target: String,
        kind: ConnectFailure,
        #[source]
        source: Option<io::Error>,
    },

    #[error("not connected to a server")]
    NotConnected,

    #[error("connection closed by server")]
    Closed,

    #[error("connection lost: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// The sub-kind of a failed `connect`, if that is what this is.
    pub fn connect_failure(&self) -> Option<ConnectFailure> {
        match self {
            ConnectionError::Connect { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Error type for every [`RemoteClient`] operation.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The control connection failed; reconnect before retrying.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The reply did not follow the wire format.
    #[error("malformed reply from server: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server refused the request.
    #[error("Server: {0}")]
    Application(String),

    /// The server sent a value the client will not act on.  The negotiation
    /// was cancelled, so the session is still usable.
    #[error("Bad data from server: {0}")]
    Validation(String),
}

// ── Control transport seam ────────────────────────────────────────────────────

/// The control connection as seen by [`RemoteClient`].
///
/// Implementations close themselves on any I/O failure so that later calls
/// fail fast with [`ConnectionError::NotConnected`].
pub trait ControlTransport {
    /// Writes one message.
    fn send(&mut self, message: &[u8]) -> Result<(), ConnectionError>;

    /// Reads one message: a single read of up to the protocol buffer size.
    fn receive(&mut self) -> Result<Vec<u8>, ConnectionError>;

    /// Reads exactly `len` bytes, across as many reads as it takes.
    fn receive_exact(&mut self, len: usize) -> Result<Vec<u8>, ConnectionError>;

    /// Address of the server, which is also where the data connection goes.
    fn peer_ip(&self) -> Option<IpAddr>;
}

// ── RemoteClient ──────────────────────────────────────────────────────────────

/// Client-side protocol operations plus the transfers they queued.
pub struct RemoteClient<T, C: DataChannel> {
    transport: T,
    engine: TransferEngine<C>,
    transfers: Vec<TransferHandle>,
}

impl<T: ControlTransport, C: DataChannel> RemoteClient<T, C> {
    pub fn new(transport: T, engine: TransferEngine<C>) -> Self {
        Self {
            transport,
            engine,
            transfers: Vec::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn engine(&self) -> &TransferEngine<C> {
        &self.engine
    }

    /// Every transfer queued through this client, oldest first.
    pub fn transfers(&self) -> &[TransferHandle] {
        &self.transfers
    }

    /// `LS`: the server's current directory, sorted by name.  Directories
    /// have size `-1` and a trailing `/`.
    pub fn list_dir(&mut self) -> Result<Vec<DirEntry>, RemoteError> {
        let fields = self.request(&Command::bare(Verb::Ls), LIST_FAILED)?;
        Ok(decode_listing(&fields)?)
    }

    /// `CD`: relative navigation, `..` included.
    pub fn change_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        self.request(&Command::new(Verb::Cd, [path]), CD_FAILED).map(drop)
    }

    /// `MKDIR`: creates the directory and any missing parents.
    pub fn make_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        self.request(&Command::new(Verb::Mkdir, [path]), MKDIR_FAILED).map(drop)
    }

    /// `GETCWD`: the server's label for the current directory.
    pub fn current_dir(&mut self) -> Result<String, RemoteError> {
        let fields = self.request(&Command::bare(Verb::GetCwd), CWD_FAILED)?;
        Ok(fields.join(DELIMITER_STR))
    }

    /// `INFO`: path, size, and timestamps of one file.
    pub fn file_properties(&mut self, name: &str) -> Result<FileProperties, RemoteError> {
        let fields = self.request(&Command::new(Verb::Info, [name]), INFO_FAILED)?;
        Ok(decode_properties(&fields)?)
    }

    /// `GETTEXT`: the whole file, carried on the control connection.
    ///
    /// An unusable size is answered with a cancel so the server does not
    /// start streaming.
    pub fn file_text(&mut self, name: &str) -> Result<Vec<u8>, RemoteError> {
        let fields = self.request(&Command::new(Verb::GetText, [name]), TEXT_FAILED)?;
        let size = match parse_size(&fields[0]) {
            Ok(size) => size,
            Err(e) => return Err(self.cancel(e)),
        };
        let Ok(len) = usize::try_from(size) else {
            let cause = ProtocolError::MalformedPayload(format!("{size} bytes of text"));
            return Err(self.cancel(cause));
        };

        self.transport.send(CONTINUE_MARKER.as_bytes())?;
        let text = self.transport.receive_exact(len)?;
        debug!("received {len} bytes of {name} as text");
        Ok(text)
    }

    /// `DOWN`: negotiates the download of `name` and queues it, writing into
    /// `file`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Application`] if the server cannot send the
    /// file and [`RemoteError::Validation`] if it reports an unusable size.
    /// Nothing is queued in either case.
    pub fn download<F>(&mut self, name: &str, file: F) -> Result<TransferHandle, RemoteError>
    where
        F: LocalFile + 'static,
    {
        let fields = self.request(&Command::new(Verb::Down, [name]), DOWN_FAILED)?;
        let size = match parse_size(&fields[0]) {
            Ok(size) => size,
            Err(e) => return Err(self.cancel(e)),
        };
        self.transport.send(SUCCESS_MARKER.as_bytes())?;

        info!("download of {name} ({size} bytes) accepted");
        Ok(self.queue(Direction::Download, name, size, file))
    }

    /// `UP`: asks the server to accept `size` bytes as `name` and, if it
    /// agrees, queues the upload reading from `file`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Application`] if the server refuses, for
    /// example because the file already exists.  No data connection is
    /// attempted in that case.
    pub fn upload<F>(&mut self, name: &str, file: F, size: u64) -> Result<TransferHandle, RemoteError>
    where
        F: LocalFile + 'static,
    {
        let cmd = Command::new(Verb::Up, [name.to_string(), size.to_string()]);
        self.request(&cmd, UP_REFUSED)?;

        info!("upload of {name} ({size} bytes) accepted");
        Ok(self.queue(Direction::Upload, name, size, file))
    }

    /// Sends one request and splits the reply into its payload fields.
    fn request(&mut self, cmd: &Command, generic: &str) -> Result<Vec<String>, RemoteError> {
        self.transport.send(encode_command(cmd).as_bytes())?;
        let raw = self.transport.receive()?;
        let reply = String::from_utf8_lossy(&raw);

        decode_response(&reply).into_result(generic).map_err(|message| {
            debug!("{} refused: {message}", cmd.verb);
            RemoteError::Application(message)
        })
    }

    /// Aborts a negotiation after a bad size.
    fn cancel(&mut self, cause: ProtocolError) -> RemoteError {
        warn!("cancelling negotiation: {cause}");
        match self.transport.send(CANCEL_MARKER.as_bytes()) {
            Ok(()) => RemoteError::Validation(cause.to_string()),
            Err(e) => RemoteError::Connection(e),
        }
    }

    fn queue<F>(&mut self, direction: Direction, name: &str, size: u64, file: F) -> TransferHandle
    where
        F: LocalFile + 'static,
    {
        let ticket = TransferTicket {
            direction,
            filename: name.to_string(),
            size,
            peer: self.transport.peer_ip(),
        };
        let handle = self.engine.submit(ticket, file);
        self.transfers.push(handle.clone());
        handle
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rover_core::Peer;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records what was sent and plays back canned replies.
    #[derive(Default)]
    struct ScriptedTransport {
        sent: Vec<String>,
        replies: VecDeque<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn replying(replies: &[&[u8]]) -> Self {
            Self {
                sent: Vec::new(),
                replies: replies.iter().map(|r| r.to_vec()).collect(),
            }
        }
    }

    impl ControlTransport for ScriptedTransport {
        fn send(&mut self, message: &[u8]) -> Result<(), ConnectionError> {
            self.sent.push(String::from_utf8_lossy(message).into_owned());
            Ok(())
        }

        fn receive(&mut self) -> Result<Vec<u8>, ConnectionError> {
            self.replies.pop_front().ok_or(ConnectionError::Closed)
        }

        fn receive_exact(&mut self, len: usize) -> Result<Vec<u8>, ConnectionError> {
            let mut out = Vec::new();
            while out.len() < len {
                out.extend(self.receive()?);
            }
            Ok(out)
        }

        fn peer_ip(&self) -> Option<IpAddr> {
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
        }
    }

    /// Data channel that records tickets and refuses to connect.
    #[derive(Default)]
    struct RecordingChannel {
        tickets: Mutex<Vec<TransferTicket>>,
    }

    impl DataChannel for RecordingChannel {
        type Stream = Cursor<Vec<u8>>;

        fn peer(&self) -> Peer {
            Peer::Client
        }

        fn open(&self, ticket: &TransferTicket) -> io::Result<Cursor<Vec<u8>>> {
            self.tickets.lock().unwrap().push(ticket.clone());
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        }
    }

    fn client(replies: &[&[u8]]) -> RemoteClient<ScriptedTransport, RecordingChannel> {
        RemoteClient::new(
            ScriptedTransport::replying(replies),
            TransferEngine::new(RecordingChannel::default()),
        )
    }

    #[test]
    fn test_list_dir_decodes_records() {
        // Arrange
        let mut c = client(&[b"|a|10\nb/|-1\n"]);

        // Act
        let entries = c.list_dir().unwrap();

        // Assert
        assert_eq!(c.transport().sent, vec!["LS"]);
        assert_eq!(entries, vec![DirEntry::file("a", 10), DirEntry::directory("b")]);
    }

    #[test]
    fn test_bare_failure_gets_synthesized_message() {
        let mut c = client(&[b"FAIL"]);

        let err = c.change_dir("nowhere").unwrap_err();

        assert!(matches!(err, RemoteError::Application(ref m) if m == CD_FAILED));
    }

    #[test]
    fn test_failure_message_from_server_wins() {
        let mut c = client(&[b"FAIL|Directory already exists"]);

        let err = c.make_dir("docs").unwrap_err();

        assert_eq!(err.to_string(), "Server: Directory already exists");
    }

    #[test]
    fn test_malformed_properties_is_protocol_error() {
        let mut c = client(&[b"filespace:/a.txt|12"]);

        let err = c.file_properties("a.txt").unwrap_err();

        assert!(matches!(err, RemoteError::Protocol(ProtocolError::FieldCount { .. })));
    }

    #[test]
    fn test_current_dir_returns_label() {
        let mut c = client(&[b"filespace:/music"]);
        assert_eq!(c.current_dir().unwrap(), "filespace:/music");
    }

    #[test]
    fn test_file_text_continues_then_reads_exact_size() {
        // Arrange
        let mut c = client(&[b"11", b"hello ", b"world"]);

        // Act
        let text = c.file_text("greeting.txt").unwrap();

        // Assert
        assert_eq!(text, b"hello world");
        assert_eq!(c.transport().sent, vec!["GETTEXT|greeting.txt", "CONTINUE"]);
    }

    #[test]
    fn test_file_text_bad_size_cancels() {
        let mut c = client(&[b"eleven"]);

        let err = c.file_text("a.txt").unwrap_err();

        assert!(matches!(err, RemoteError::Validation(_)));
        assert_eq!(c.transport().sent, vec!["GETTEXT|a.txt", "CANCEL"]);
    }

    #[test]
    fn test_download_bad_size_cancels_and_queues_nothing() {
        // Arrange
        let mut c = client(&[b"-5"]);

        // Act
        let err = c.download("a.bin", Cursor::new(Vec::new())).unwrap_err();

        // Assert
        assert!(matches!(err, RemoteError::Validation(_)));
        assert_eq!(c.transport().sent, vec!["DOWN|a.bin", "CANCEL"]);
        assert!(c.transfers().is_empty());
        assert!(!c.engine().is_busy());
    }

    #[test]
    fn test_download_accepts_size_and_queues_towards_server() {
        // Arrange
        let mut c = client(&[b"4096"]);

        // Act
        let handle = c.download("a.bin", Cursor::new(Vec::new())).unwrap();
        assert!(c.engine().wait_idle(Duration::from_secs(5)));

        // Assert
        assert_eq!(c.transport().sent, vec!["DOWN|a.bin", "WIN"]);
        assert_eq!(handle.direction(), Direction::Download);
        assert_eq!(handle.status().total_size, 4096);
        // The refusing channel fails the job; the call itself succeeded.
        assert!(handle.status().failed);
        let tickets = c.engine().channel().tickets.lock().unwrap();
        assert_eq!(tickets[0].peer, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))));
    }

    #[test]
    fn test_download_failure_uses_server_message() {
        let mut c = client(&[b"FAIL"]);

        let err = c.download("ghost.bin", Cursor::new(Vec::new())).unwrap_err();

        assert!(matches!(err, RemoteError::Application(ref m) if m == DOWN_FAILED));
        assert_eq!(c.transport().sent, vec!["DOWN|ghost.bin"]);
    }

    #[test]
    fn test_upload_refused_never_touches_data_channel() {
        // Arrange
        let mut c = client(&[b"FAIL|File already exists"]);

        // Act
        let err = c
            .upload("report.pdf", Cursor::new(b"pdf".to_vec()), 3)
            .unwrap_err();

        // Assert
        assert!(matches!(err, RemoteError::Application(ref m) if m == "File already exists"));
        assert_eq!(c.transport().sent, vec!["UP|report.pdf|3"]);
        assert!(c.engine().channel().tickets.lock().unwrap().is_empty());
        assert!(c.transfers().is_empty());
    }

    #[test]
    fn test_upload_accepted_is_recorded() {
        let mut c = client(&[b"WIN"]);

        let handle = c.upload("new.txt", Cursor::new(b"abc".to_vec()), 3).unwrap();
        assert!(c.engine().wait_idle(Duration::from_secs(5)));

        assert_eq!(handle.direction(), Direction::Upload);
        assert_eq!(c.transfers().len(), 1);
        assert_eq!(c.transfers()[0].id(), handle.id());
    }

    #[test]
    fn test_closed_transport_is_connection_error() {
        let mut c = client(&[]);

        let err = c.list_dir().unwrap_err();

        assert!(matches!(err, RemoteError::Connection(ConnectionError::Closed)));
    }

    #[test]
    fn test_connect_failure_exposes_sub_kind() {
        let err = ConnectionError::Connect {
            target: "nowhere.invalid".to_string(),
            kind: ConnectFailure::Lookup,
            source: None,
        };
        assert_eq!(err.connect_failure(), Some(ConnectFailure::Lookup));
        assert_eq!(ConnectionError::Closed.connect_failure(), None);
    }
}
