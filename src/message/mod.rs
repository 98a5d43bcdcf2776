//! This module exports the byte-moving layer beneath the communicator,
//! encapsulated by a `Transport` trait. Implementors only need to write
//! `send` and `recv` operations for a given medium; an in-process channel
//! transport and a pure-Rust TCP transport are included. Messages travel as
//! MessagePack-encoded envelopes.
//!

mod backoff;
pub mod envelope;
pub mod local;
pub mod tcp;
pub mod transport;
pub mod util;
