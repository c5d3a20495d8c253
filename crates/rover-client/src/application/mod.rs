//! Application layer for the client.
//!
//! # Sub-modules
//!
//! - **`remote`** – [`remote::RemoteClient`] turns each protocol verb into a
//!   typed call: it frames the request, classifies the reply, and plays the
//!   client half of every transfer negotiation.  It reaches the control
//!   connection only through the [`remote::ControlTransport`] trait, so
//!   every reply path can be tested with a scripted transport.

pub mod remote;
