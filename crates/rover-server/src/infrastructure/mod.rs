//! Infrastructure layer for the server.
//!
//! Contains the OS-facing adapters: TCP listeners for the control and
//! transfer ports, the multicast heartbeat, and the configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `rover_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
