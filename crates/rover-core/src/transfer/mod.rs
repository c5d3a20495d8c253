//! Bulk transfer execution.
//!
//! A transfer is queued only after its negotiation succeeded on the control
//! channel.  From then on it is handled here: the [`TransferEngine`] keeps a
//! FIFO of jobs and runs at most one at a time on a worker thread, opening
//! the data connection through a [`DataChannel`] supplied by the client or
//! server crate.
//!
//! # Why a trait for the data connection? (for beginners)
//!
//! The server *listens* on the transfer port and the client *connects* to
//! it, but once a stream exists both sides do exactly the same thing: copy
//! bytes between a file and the stream.  Putting "how do I get a stream"
//! behind a trait lets one engine serve both roles, and lets tests hand the
//! engine an in-memory stream instead of a socket.

use std::io::{self, Read, Write};
use std::net::IpAddr;

use crate::domain::transfer::{Direction, Peer};

pub mod engine;
mod pump;

pub use engine::TransferEngine;

/// Everything a data channel needs to know to open the connection for one
/// job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTicket {
    pub direction: Direction,
    pub filename: String,
    /// Exact number of bytes that will cross the data connection.
    pub size: u64,
    /// The control-channel peer.  The client connects to this address; the
    /// server uses it to ignore connections from anyone else.
    pub peer: Option<IpAddr>,
}

/// Opens the data connection for one transfer.
///
/// Called on the engine's worker thread, once per job, right before the
/// bytes move.  The returned stream is dropped (closing the connection) as
/// soon as the job finishes.
pub trait DataChannel: Send + Sync + 'static {
    type Stream: Read + Write + Send + 'static;

    /// Which end of the protocol this process is.
    fn peer(&self) -> Peer;

    /// Establishes the data connection for `ticket`.
    fn open(&self, ticket: &TransferTicket) -> io::Result<Self::Stream>;
}

/// The local end of a transfer: the file being read or written.
pub trait LocalFile: Read + Write + Send {}

impl<T: Read + Write + Send> LocalFile for T {}
