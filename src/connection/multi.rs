//! Builder for transaction blocks.

use std::collections::VecDeque;

use crate::resp::EncodedRequest;

/// Collects encoded commands destined for one `MULTI`/`EXEC` block.
///
/// The command count feeds the staged request's `multi_size`, which is
/// how the acknowledgement path knows how many `QUEUED` confirmations to
/// absorb.
#[derive(Default)]
pub struct MultiBuilder {
    contents: VecDeque<EncodedRequest>,
}

impl MultiBuilder {
    pub fn new() -> MultiBuilder {
        MultiBuilder::default()
    }

    pub fn push<A: AsRef<[u8]>>(&mut self, args: &[A]) {
        self.contents.push_back(EncodedRequest::new(args));
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Fuse into a single transaction write unit.
    pub fn into_encoded(self) -> EncodedRequest {
        EncodedRequest::fuse_into_block_and_surround(self.contents)
    }
}
