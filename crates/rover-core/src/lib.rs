//! # rover-core
//!
//! Shared library for FileRover containing the control-channel protocol
//! codec, the filesystem gateway contract and its sandboxed implementation,
//! and the FIFO transfer engine used by both the client and the server.
//!
//! This crate never opens a socket.  Everything that touches the network is
//! injected by the client and server crates through the
//! [`transfer::DataChannel`] trait and plain `Read`/`Write` streams.
//!
//! # Architecture overview
//!
//! FileRover lets a client browse a directory tree exposed by a remote server
//! and copy files in either direction.  Two connections are involved:
//!
//! - The **control channel** carries one text command and one text reply at a
//!   time (`LS`, `CD|docs`, `INFO|notes.txt`, ...).
//! - The **transfer socket** is opened on a second port only after a
//!   `DOWN`/`UP` negotiation succeeds, and carries nothing but raw file bytes.
//!
//! The modules are:
//!
//! - **`protocol`** – Wire constants, the verb set, and the single
//!   encode/decode pair used by both peers.
//!
//! - **`domain`** – Data types shared by every layer: directory entries, file
//!   properties, the [`FileGateway`] trait, and the pollable transfer status.
//!
//! - **`sandbox`** – The `std::fs` implementation of [`FileGateway`] that
//!   confines every path to a root directory.
//!
//! - **`transfer`** – The process-wide FIFO queue that runs at most one bulk
//!   transfer at a time.

pub mod domain;
pub mod protocol;
pub mod sandbox;
pub mod transfer;

pub use domain::gateway::{DirEntry, FileGateway, FileProperties, GatewayError};
pub use domain::transfer::{Direction, Peer, TransferHandle, TransferStatus};
pub use protocol::codec::{decode_command, decode_response, encode_command, ProtocolError};
pub use protocol::messages::{Command, Response, Verb};
pub use sandbox::SandboxGateway;
pub use transfer::{DataChannel, LocalFile, TransferEngine, TransferTicket};
