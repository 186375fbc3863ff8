//! Shared hashes: eventually-consistent replicas of server-side state,
//! layered as local overlay + transient broadcast + durable revisions.

mod batch;
mod hash;
mod subscription;
mod transient;
mod versioned;

pub use batch::UpdateBatch;
pub use hash::SharedHash;
pub use subscription::{HashSubscription, HashUpdate};
pub use transient::TransientHash;
pub use versioned::{FeedOutcome, HashPayloadError, VersionedHash, parse_hash_payload};
