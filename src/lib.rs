//! quarklink: the pipelined request/response core of a client for RESP
//! key-value servers speaking the QuarkDB dialect (versioned hashes and
//! out-of-band push notifications).
//!
//! The crate is sans-I/O: it owns no sockets.  The host process supplies
//! a writer thread that drains [`connection::ConnectionCore::next_to_write`],
//! and a reader thread that feeds raw bytes through
//! [`resp::ResponseDecoder`] and hands each decoded reply to
//! [`connection::ConnectionCore::consume_response`].  Everything else
//! lives here: request encoding, reply matching, transaction
//! acknowledgement, pub/sub demultiplexing, and the replicated
//! versioned hashes.
//!
//! # Layout
//! - [`resp`]: wire codec, request encoding and streaming reply decoding.
//! - [`queueing`]: the waitable request FIFO and small bounded containers.
//! - [`pubsub`]: message classification and the subscriber registry.
//! - [`connection`]: the pipelining state machine and its collaborator
//!   traits (handshakes, backpressure, perf markers).
//! - [`shared`]: replicated versioned hashes with local, transient and
//!   durable layers.
//! - [`intercept`]: process-wide endpoint rewriting.

pub mod connection;
pub mod intercept;
pub mod pubsub;
pub mod queueing;
pub mod resp;
pub mod shared;

pub use connection::{
    AuthHandshake, BackpressureStrategy, CommandIssuer, ConnectionCore, CoreOptions, Handshake,
    HandshakeStatus, MultiBuilder, PerfCallback, PingHandshake, ReplyCallback, ReplyFuture,
};
pub use pubsub::{Message, MessageListener, MessageQueue, MessageType, Subscriber, Subscription};
pub use resp::{DecodeStatus, EncodedRequest, Reply, ReplyPtr, ResponseDecoder};
pub use shared::{SharedHash, UpdateBatch};
