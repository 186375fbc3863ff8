//! The connection core: staged requests, backpressure, handshakes, and
//! the pipelining state machine itself.

mod backpressure;
mod core;
mod handshake;
mod multi;
mod request;

pub use backpressure::BackpressureStrategy;
pub use core::{ConnectionCore, CoreOptions};
pub use handshake::{AuthHandshake, Handshake, HandshakeStatus, PingHandshake};
pub use multi::MultiBuilder;
pub use request::{ReplyCallback, ReplyFuture, StagedRequest, reply_channel};

use crate::resp::EncodedRequest;

/// Capability to put a request on a connection and await its reply.
///
/// Held by `Weak` reference from components that outlive or cyclically
/// reference their connection (shared hashes, subscribers): when the
/// connection is gone, the capability silently stops issuing.
pub trait CommandIssuer: Send + Sync {
    /// Stage `encoded` and return the handle its reply will resolve.
    /// `multi_size` is zero for ordinary requests, or the number of
    /// commands inside a fused `MULTI`/`EXEC` block.
    fn issue(&self, encoded: EncodedRequest, multi_size: usize) -> ReplyFuture;
}

/// Sink for request round-trip measurements, invoked at acknowledgement
/// time with the marker name `rtt_us`.
pub trait PerfCallback: Send + Sync {
    fn send_perf_marker(&self, name: &str, value_us: u64);
}
