//! Domain types for FileRover.
//!
//! Nothing in here touches a socket.  The gateway module describes the
//! filesystem operations the server exposes and the client mirrors locally;
//! the transfer module describes a queued bulk transfer and the status
//! snapshot callers poll while it runs.

/// Directory entries, file properties, and the [`gateway::FileGateway`] trait.
pub mod gateway;

/// Transfer direction, job handle, and pollable status.
pub mod transfer;
