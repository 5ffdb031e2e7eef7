//! Line protocol between the host and its backend worker.
//!
//! Worker output is newline-delimited JSON; worker input is newline-terminated text
//! commands. This module stays transport-free so it can be exercised with synthetic
//! chunk boundaries.

mod command;
mod envelope;
mod line_buffer;

pub use command::{BuildEntry, Request, EXIT};
pub use envelope::{Envelope, HostEnvelope, ReadyHandshake};
pub use line_buffer::LineBuffer;
