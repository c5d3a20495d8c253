//! Server-side dispatch of one control-channel request.
//!
//! Every request gets exactly one reply except:
//!
//! - `DISCONNECT`, which gets none and ends the session;
//! - `GETTEXT`, which after the size reply waits for the client's continue
//!   marker and then streams the file contents;
//! - `DOWN`, which after the size reply waits for the client's success
//!   marker before queueing the transfer.
//!
//! A request the server cannot parse is answered with a failure and the
//! session carries on.

use std::io;
use std::net::IpAddr;

use rover_core::protocol::messages::{BUFFER_SIZE, CONTINUE_MARKER, SUCCESS_MARKER};
use rover_core::protocol::{encode_listing, encode_properties, encode_response, parse_size};
use rover_core::{
    decode_command, Command, DataChannel, Direction, FileGateway, LocalFile, Response,
    TransferEngine, TransferTicket, Verb,
};
use tracing::{debug, info, warn};

/// Reply sent for a request that does not parse.
pub const UNRECOGNISED_COMMAND: &str = "Did not recognise command.";
/// Reply sent when the current directory cannot be listed.
pub const LIST_FAILED: &str = "Failed to retrieve data.";
/// Reply sent when `INFO` cannot read the file.
pub const INFO_FAILED: &str = "Could not access file.";
/// Reply sent when the current path label cannot be built.
pub const CWD_FAILED: &str = "Failed to retrieve path.";

/// The control connection as seen by the request handler.
pub trait ControlLink {
    /// Writes one message.
    fn send(&mut self, message: &[u8]) -> io::Result<()>;

    /// Waits for a negotiation marker from the client.
    ///
    /// Returns `None` when the client sent something that is not a marker;
    /// the link keeps those bytes as the next request.
    fn recv_marker(&mut self) -> io::Result<Option<&'static str>>;

    /// Address of the client, used to pin the data connection to it.
    fn peer_ip(&self) -> Option<IpAddr>;
}

/// What the session loop should do after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
}

/// Runs requests against a gateway and queues negotiated transfers.
pub struct RequestHandler<G, C: DataChannel> {
    gateway: G,
    engine: TransferEngine<C>,
}

impl<G: FileGateway, C: DataChannel> RequestHandler<G, C> {
    pub fn new(gateway: G, engine: TransferEngine<C>) -> Self {
        Self { gateway, engine }
    }

    pub fn engine(&self) -> &TransferEngine<C> {
        &self.engine
    }

    /// Returns the gateway to the sandbox root between sessions.
    pub fn end_session(&mut self) {
        self.gateway.reset();
    }

    /// Handles one request read from `link`.
    ///
    /// # Errors
    ///
    /// Only I/O errors on the link.  Every filesystem or parsing problem is
    /// turned into a failure reply.
    pub fn handle<L: ControlLink>(&mut self, message: &str, link: &mut L) -> io::Result<Flow> {
        let cmd = match decode_command(message) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("rejecting request {message:?}: {e}");
                reply(link, &Response::fail(UNRECOGNISED_COMMAND))?;
                return Ok(Flow::Continue);
            }
        };
        debug!("request {}", cmd.verb);

        match cmd.verb {
            Verb::Ls => {
                let wire = match self.gateway.list() {
                    Ok(entries) => encode_listing(&entries),
                    Err(e) => {
                        warn!("listing failed: {e}");
                        encode_response(&Response::fail(LIST_FAILED))
                    }
                };
                link.send(wire.as_bytes())?;
            }
            Verb::Cd => {
                let resp = match self.gateway.change_directory(param(&cmd, 0)) {
                    Ok(label) => {
                        info!("changed directory to {label}");
                        Response::ok()
                    }
                    Err(e) => Response::fail(e.to_string()),
                };
                reply(link, &resp)?;
            }
            Verb::GetCwd => {
                let resp = match self.gateway.current_path_label() {
                    Ok(label) => Response::Success(vec![label]),
                    Err(e) => {
                        warn!("path label failed: {e}");
                        Response::fail(CWD_FAILED)
                    }
                };
                reply(link, &resp)?;
            }
            Verb::Info => {
                let wire = match self.gateway.stat(param(&cmd, 0)) {
                    Ok(props) => encode_properties(&props),
                    Err(e) => {
                        debug!("stat {:?} failed: {e}", param(&cmd, 0));
                        encode_response(&Response::fail(INFO_FAILED))
                    }
                };
                link.send(wire.as_bytes())?;
            }
            Verb::Mkdir => {
                let resp = match self.gateway.create_directory(param(&cmd, 0)) {
                    Ok(()) => Response::ok(),
                    Err(e) => Response::fail(e.to_string()),
                };
                reply(link, &resp)?;
            }
            Verb::GetText => self.send_text(param(&cmd, 0), link)?,
            Verb::Down => self.negotiate_download(param(&cmd, 0), link)?,
            Verb::Up => self.negotiate_upload(param(&cmd, 0), param(&cmd, 1), link)?,
            Verb::Disconnect => {
                info!("client requested disconnect");
                return Ok(Flow::Disconnect);
            }
        }
        Ok(Flow::Continue)
    }

    fn send_text<L: ControlLink>(&mut self, name: &str, link: &mut L) -> io::Result<()> {
        let contents = match self.gateway.read_text(name) {
            Ok(contents) => contents,
            Err(e) => return reply(link, &Response::fail(e.to_string())),
        };
        link.send(contents.len().to_string().as_bytes())?;

        if link.recv_marker()? != Some(CONTINUE_MARKER) {
            info!("text fetch of {name} cancelled by client");
            return Ok(());
        }
        for chunk in contents.chunks(BUFFER_SIZE) {
            link.send(chunk)?;
        }
        debug!("sent {} bytes of {name} as text", contents.len());
        Ok(())
    }

    fn queue<F: LocalFile + 'static>(&self, ticket: TransferTicket, file: F) {
        let direction = ticket.direction;
        let handle = self.engine.submit(ticket, file);
        info!("{direction} of {} queued as job {}", handle.filename(), handle.id());
    }

    /// Server half of `DOWN`: size out, success marker in, then queue.
    fn negotiate_download<L: ControlLink>(
        &mut self,
        name: &str,
        link: &mut L,
    ) -> io::Result<()> {
        let (file, size) = match self.gateway.open_for_read(name) {
            Ok(opened) => opened,
            Err(e) => {
                reply(link, &Response::fail(e.to_string()))?;
                return Ok(());
            }
        };
        link.send(size.to_string().as_bytes())?;

        // The file is closed on every path that does not queue it.
        if link.recv_marker()? != Some(SUCCESS_MARKER) {
            info!("download of {name} cancelled by client");
            return Ok(());
        }
        let ticket = TransferTicket {
            direction: Direction::Download,
            filename: name.to_string(),
            size,
            peer: link.peer_ip(),
        };
        self.queue(ticket, file);
        Ok(())
    }

    /// Server half of `UP`: validate the size, create the file, then
    /// acknowledge and queue.
    fn negotiate_upload<L: ControlLink>(
        &mut self,
        name: &str,
        size_field: &str,
        link: &mut L,
    ) -> io::Result<()> {
        let size = match parse_size(size_field) {
            Ok(size) => size,
            Err(e) => {
                reply(link, &Response::fail(format!("Invalid file size: {e}")))?;
                return Ok(());
            }
        };
        let file = match self.gateway.open_for_write(name) {
            Ok(file) => file,
            Err(e) => {
                info!("refusing upload of {name}: {e}");
                reply(link, &Response::fail(e.to_string()))?;
                return Ok(());
            }
        };
        reply(link, &Response::ok())?;

        let ticket = TransferTicket {
            direction: Direction::Upload,
            filename: name.to_string(),
            size,
            peer: link.peer_ip(),
        };
        self.queue(ticket, file);
        Ok(())
    }
}

fn reply<L: ControlLink>(link: &mut L, resp: &Response) -> io::Result<()> {
    link.send(encode_response(resp).as_bytes())
}

// `decode_command` already checked the count.
fn param(cmd: &Command, index: usize) -> &str {
    cmd.param(index).unwrap_or_default()
}
