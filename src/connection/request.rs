//! Staged requests and reply delivery plumbing.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::resp::{EncodedRequest, ReplyPtr};

/// Invoked exactly once with the reply, or `None` when the connection
/// was torn down before one arrived.
pub type ReplyCallback = Box<dyn FnOnce(Option<ReplyPtr>) + Send>;

/// Awaitable reply handle returned by future-style staging.  Also usable
/// from synchronous code through [`oneshot::Receiver::blocking_recv`].
pub type ReplyFuture = oneshot::Receiver<Option<ReplyPtr>>;

/// One queued request: its wire bytes, the pending callback, and the
/// transaction accounting the acknowledgement path needs.
///
/// Stored as `Arc<StagedRequest>` so the writer can keep a handle across
/// partial socket writes without holding any queue lock.
pub struct StagedRequest {
    encoded: EncodedRequest,
    callback: Mutex<Option<ReplyCallback>>,
    /// Zero for an ordinary request; `k > 0` means the bytes carry a
    /// fused transaction of `k` commands surrounded by `MULTI`/`EXEC`.
    multi_size: usize,
    staged_at: Instant,
}

impl StagedRequest {
    pub fn new(
        callback: Option<ReplyCallback>,
        encoded: EncodedRequest,
        multi_size: usize,
    ) -> StagedRequest {
        StagedRequest {
            encoded,
            callback: Mutex::new(callback),
            multi_size,
            staged_at: Instant::now(),
        }
    }

    /// The bytes the writer puts on the wire.
    pub fn bytes(&self) -> &[u8] {
        self.encoded.as_bytes()
    }

    pub fn multi_size(&self) -> usize {
        self.multi_size
    }

    pub fn staged_at(&self) -> Instant {
        self.staged_at
    }

    /// Take the pending callback; subsequent calls return `None`.
    pub fn take_callback(&self) -> Option<ReplyCallback> {
        self.callback.lock().unwrap().take()
    }
}

/// Build a callback/future pair: the returned callback resolves the
/// returned future when invoked.
pub fn reply_channel() -> (ReplyCallback, ReplyFuture) {
    let (tx, rx) = oneshot::channel();
    let callback: ReplyCallback = Box::new(move |reply| {
        // The receiver may have been dropped; resolving is best-effort.
        let _ = tx.send(reply);
    });
    (callback, rx)
}
