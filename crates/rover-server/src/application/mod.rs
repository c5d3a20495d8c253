//! Application layer for the server.
//!
//! # Sub-modules
//!
//! - **`handle_request`** – Decodes one control-channel request, runs it
//!   against the filesystem gateway, and writes the reply.  For `DOWN`, `UP`
//!   and `GETTEXT` it also plays the server half of the negotiation and
//!   queues the bulk transfer.
//!
//! This layer talks to the socket only through the [`handle_request::ControlLink`]
//! trait, so every request path can be exercised with a scripted link and a
//! mock gateway.

pub mod handle_request;
