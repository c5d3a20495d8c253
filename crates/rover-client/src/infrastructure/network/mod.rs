//! Network infrastructure for the client.
//!
//! # Sub-modules
//!
//! - **`session`** – The control connection: connect, disconnect, and the
//!   one-message-per-read exchange used by every request.
//!
//! - **`transfer`** – The connecting end of the data connection, opened by
//!   the transfer engine once a job reaches the front of the queue.
//!
//! - **`discovery`** – Listens for server heartbeats on the multicast group
//!   for a fixed window.

pub mod discovery;
pub mod session;
pub mod transfer;
