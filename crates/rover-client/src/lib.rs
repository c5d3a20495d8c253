//! rover-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does rover-client do? (for beginners)
//!
//! The *client* browses a directory tree that a FileRover server shares and
//! moves files in and out of it.  It:
//!
//! 1. Optionally listens for multicast heartbeats to find servers on the LAN.
//! 2. Opens one TCP control connection to the chosen server.
//! 3. Sends one request at a time (`LS`, `CD`, `INFO`, ...) and waits for
//!    the reply.
//! 4. For downloads and uploads, negotiates the size over the control
//!    connection and then hands the job to a transfer engine that streams
//!    the bytes over a second connection in the background, one job at a
//!    time.

/// Application layer: typed remote operations and their error model.
pub mod application;

/// Infrastructure layer: sockets, discovery, config, and the shell parser.
pub mod infrastructure;
