//! Network infrastructure for the server.
//!
//! # Sub-modules
//!
//! - **`control`** – Accepts control connections one at a time and runs the
//!   request loop for each session.  Owns the read buffer that keeps a
//!   request which arrived glued to a negotiation marker.
//!
//! - **`transfer`** – The listening end of the data connection.  Binds the
//!   transfer port for one job, accepts the client, and releases the port.
//!
//! - **`discovery`** – Sends the multicast heartbeat that lets clients find
//!   this server without knowing its address.

pub mod control;
pub mod discovery;
pub mod transfer;
