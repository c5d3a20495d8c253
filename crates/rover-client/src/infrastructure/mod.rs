//! Infrastructure layer for the client.
//!
//! Contains the OS-facing adapters: the control and data sockets, the
//! multicast listener, the configuration file, and the parser for the
//! interactive shell.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `rover_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod shell;
pub mod storage;
