//! RESP frame codec: request encoding and streaming reply decoding.

mod decoder;
mod reply;
mod request;

pub use decoder::{DecodeStatus, ResponseDecoder};
pub use reply::{Reply, ReplyPtr};
pub use request::EncodedRequest;
