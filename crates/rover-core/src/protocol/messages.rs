//! All FileRover control-channel message types and wire constants.
//!
//! Every message on the control channel is a single text string whose
//! fields are joined by [`DELIMITER`].  Requests start with a verb; replies
//! start with either a payload field or one of the reserved markers.

use std::fmt;
use std::time::Duration;

// ── Protocol constants ────────────────────────────────────────────────────────

/// TCP port of the control channel.
pub const CONTROL_PORT: u16 = 56740;

/// TCP port of the bulk transfer socket.
pub const TRANSFER_PORT: u16 = 56744;

/// Size of every control-channel read and of every bulk transfer chunk.
///
/// Large enough for a directory listing of a few hundred entries in one read.
pub const BUFFER_SIZE: usize = 8192;

/// Field separator.  Never allowed inside a parameter value.
pub const DELIMITER: char = '|';

/// [`DELIMITER`] as a string slice, for joining.
pub const DELIMITER_STR: &str = "|";

/// Separator between records inside a directory listing field.
pub const RECORD_SEPARATOR: char = '\n';

/// Reply marker for a failed request.
pub const FAILURE_MARKER: &str = "FAIL";

/// Reply marker for a successful request with no payload.
pub const SUCCESS_MARKER: &str = "WIN";

/// Sent by the client to let a text fetch proceed after the size is known.
pub const CONTINUE_MARKER: &str = "CONTINUE";

/// Sent by the client to abort a negotiation before any bytes move.
pub const CANCEL_MARKER: &str = "CANCEL";

/// Size reported for directories in listings.
pub const DIRECTORY_SIZE: i64 = -1;

/// Multicast group the server heartbeat is sent to.
pub const MULTICAST_GROUP: [u8; 4] = [224, 1, 1, 1];

/// UDP port of the multicast heartbeat.
pub const MULTICAST_PORT: u16 = 40042;

/// Time between two heartbeat datagrams.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);

/// How long a discovery pass listens for heartbeats.
pub const DISCOVERY_WINDOW: Duration = Duration::from_millis(100);

/// Largest heartbeat payload: a dotted-quad IPv4 address.
pub const HEARTBEAT_MAX_LEN: usize = 15;

/// Default bound on how long the client waits for a control reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace delay before the client opens the transfer socket, so the server
/// can finish binding its listener.
pub const TRANSFER_SETUP_DELAY: Duration = Duration::from_millis(200);

/// How long the server keeps the transfer port open for a job, and how long
/// the client keeps trying to reach it.  Both sides must use the same value,
/// or one queue runs ahead of the other.
pub const TRANSFER_SETUP_WINDOW: Duration = Duration::from_secs(30);

// ── Verbs ─────────────────────────────────────────────────────────────────────

/// The fixed set of control-channel requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// List the current directory.
    Ls,
    /// Change the current directory.
    Cd,
    /// Report the current path label.
    GetCwd,
    /// Report the properties of one file.
    Info,
    /// Create a directory.
    Mkdir,
    /// Stream a file's contents back over the control channel.
    GetText,
    /// Download a file over the transfer socket.
    Down,
    /// Upload a file over the transfer socket.
    Up,
    /// End the session.  No reply is sent.
    Disconnect,
}

impl Verb {
    /// Every verb, in wire-table order.
    pub const ALL: [Verb; 9] = [
        Verb::Ls,
        Verb::Cd,
        Verb::GetCwd,
        Verb::Info,
        Verb::Mkdir,
        Verb::GetText,
        Verb::Down,
        Verb::Up,
        Verb::Disconnect,
    ];

    /// The literal token sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Ls => "LS",
            Verb::Cd => "CD",
            Verb::GetCwd => "GETCWD",
            Verb::Info => "INFO",
            Verb::Mkdir => "MKDIR",
            Verb::GetText => "GETTEXT",
            Verb::Down => "DOWN",
            Verb::Up => "UP",
            Verb::Disconnect => "DISCONNECT",
        }
    }

    /// Minimum number of parameters the verb needs to be served.
    pub fn required_params(self) -> usize {
        match self {
            Verb::Ls | Verb::GetCwd | Verb::Disconnect => 0,
            Verb::Cd | Verb::Info | Verb::Mkdir | Verb::GetText | Verb::Down => 1,
            Verb::Up => 2,
        }
    }

    /// Whether the peer answers this verb on the control channel.
    pub fn expects_reply(self) -> bool {
        !matches!(self, Verb::Disconnect)
    }
}

impl TryFrom<&str> for Verb {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, ()> {
        Verb::ALL
            .into_iter()
            .find(|verb| verb.as_str() == value)
            .ok_or(())
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Requests and replies ──────────────────────────────────────────────────────

/// A request: a verb plus its ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub params: Vec<String>,
}

impl Command {
    /// Builds a command, stripping the delimiter from every parameter so it
    /// cannot split into extra fields on the wire.
    pub fn new<I, S>(verb: Verb, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let params = params
            .into_iter()
            .map(|p| p.as_ref().replace(DELIMITER, ""))
            .collect();
        Self { verb, params }
    }

    /// A command with no parameters.
    pub fn bare(verb: Verb) -> Self {
        Self {
            verb,
            params: Vec::new(),
        }
    }

    /// Returns parameter `index`, if present.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

/// A decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Ordered payload fields.
    Success(Vec<String>),
    /// The peer refused the request, optionally saying why.
    Failure(Option<String>),
}

impl Response {
    /// A success reply carrying only the success marker.
    pub fn ok() -> Self {
        Response::Success(vec![SUCCESS_MARKER.to_string()])
    }

    /// A failure reply with a human-readable reason.
    pub fn fail(message: impl Into<String>) -> Self {
        Response::Failure(Some(message.into()))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Response::Failure(_))
    }

    /// Converts the reply into its payload, or the failure message (falling
    /// back to `generic` when the peer sent a bare marker).
    pub fn into_result(self, generic: &str) -> Result<Vec<String>, String> {
        match self {
            Response::Success(fields) => Ok(fields),
            Response::Failure(message) => Err(message.unwrap_or_else(|| generic.to_string())),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
