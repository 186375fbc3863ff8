//! The pipelining state machine around a single connection.
//!
//! User threads stage requests; an external writer thread drains
//! [`ConnectionCore::next_to_write`] to the socket; an external reader
//! thread decodes frames and feeds them through
//! [`ConnectionCore::consume_response`].  The core matches each reply to
//! the oldest unacknowledged request, absorbs transaction bookkeeping
//! replies, routes push frames to the message listener, and rewinds its
//! cursors when the I/O layer reports a reconnection.
//!
//! # Thread contract
//!
//! On connection loss the host must stop its writer and reader (calling
//! [`ConnectionCore::set_blocking_mode`] with `false` to unpark the
//! writer), then call [`ConnectionCore::reconnection`], re-enable
//! blocking mode, and start fresh threads against the new socket.

use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use crate::pubsub::{Message, MessageListener, parse_message};
use crate::queueing::{QueueIterator, WaitableQueue};
use crate::resp::{EncodedRequest, ReplyPtr};

use super::backpressure::{BackpressureApplier, BackpressureStrategy};
use super::handshake::{Handshake, HandshakeStatus};
use super::multi::MultiBuilder;
use super::request::{ReplyCallback, ReplyFuture, StagedRequest, reply_channel};
use super::{CommandIssuer, PerfCallback};

const REQUEST_BLOCK: usize = 64;

type RequestQueue = WaitableQueue<Arc<StagedRequest>, REQUEST_BLOCK>;
type RequestCursor = QueueIterator<Arc<StagedRequest>, REQUEST_BLOCK>;

/// Construction-time configuration of a [`ConnectionCore`].
pub struct CoreOptions {
    /// Handshake to run before user traffic on every new connection.
    pub handshake: Option<Box<dyn Handshake>>,
    pub backpressure: BackpressureStrategy,
    /// Treat `ERR unavailable` / `UNAVAILABLE` error replies as a signal
    /// to drop the connection and retry, instead of surfacing them.
    pub transparent_unavailable: bool,
    /// Every reply on this connection is a pub/sub notification.
    pub exclusive_pubsub: bool,
    pub listener: Option<Arc<dyn MessageListener>>,
    pub perf_callback: Option<Arc<dyn PerfCallback>>,
}

impl Default for CoreOptions {
    fn default() -> Self {
        CoreOptions {
            handshake: None,
            backpressure: BackpressureStrategy::default(),
            transparent_unavailable: false,
            exclusive_pubsub: false,
            listener: None,
            perf_callback: None,
        }
    }
}

struct CoreState {
    handshake: Option<Box<dyn Handshake>>,
    in_handshake: bool,
    /// Transaction bookkeeping replies absorbed so far for the entry at
    /// the acknowledgement cursor.
    ignored_responses: usize,
    next_to_write: RequestCursor,
    next_to_ack: RequestCursor,
    handshake_cursor: RequestCursor,
}

/// What `consume_response` decided under the state lock; callbacks and
/// listener delivery run after the lock is released, since both may call
/// back into staging.
enum Outcome {
    KeepReading,
    Fatal,
    Deliver(Message),
    Satisfy(Option<ReplyCallback>, Option<ReplyPtr>),
}

/// The pipelining state machine guarding one logical connection.
pub struct ConnectionCore {
    transparent_unavailable: bool,
    exclusive_pubsub: bool,
    listener: Option<Arc<dyn MessageListener>>,
    perf_callback: Option<Arc<dyn PerfCallback>>,
    backpressure: BackpressureApplier,
    request_queue: RequestQueue,
    handshake_queue: RequestQueue,
    state: Mutex<CoreState>,
}

impl ConnectionCore {
    pub fn new(options: CoreOptions) -> ConnectionCore {
        let request_queue = RequestQueue::new();
        let handshake_queue = RequestQueue::new();
        let state = CoreState {
            handshake: options.handshake,
            in_handshake: false,
            ignored_responses: 0,
            next_to_write: request_queue.begin(),
            next_to_ack: request_queue.begin(),
            handshake_cursor: handshake_queue.begin(),
        };
        let core = ConnectionCore {
            transparent_unavailable: options.transparent_unavailable,
            exclusive_pubsub: options.exclusive_pubsub,
            listener: options.listener,
            perf_callback: options.perf_callback,
            backpressure: BackpressureApplier::new(options.backpressure),
            request_queue,
            handshake_queue,
            state: Mutex::new(state),
        };
        core.reconnection();
        core
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    /// Stage a request with an explicit callback.  Blocks if the
    /// backpressure limit is exhausted.
    pub fn stage(&self, callback: ReplyCallback, encoded: EncodedRequest, multi_size: usize) {
        self.backpressure.reserve();
        self.request_queue
            .push_back(Arc::new(StagedRequest::new(Some(callback), encoded, multi_size)));
    }

    /// Stage a request and get an awaitable reply handle.
    pub fn stage_future(&self, encoded: EncodedRequest, multi_size: usize) -> ReplyFuture {
        let (callback, future) = reply_channel();
        self.stage(callback, encoded, multi_size);
        future
    }

    /// Encode and stage one command.
    pub fn execute<A: AsRef<[u8]>>(&self, args: &[A]) -> ReplyFuture {
        self.stage_future(EncodedRequest::new(args), 0)
    }

    /// Stage a transaction block; the returned future resolves with the
    /// `EXEC` result.
    pub fn execute_multi(&self, multi: MultiBuilder) -> ReplyFuture {
        let multi_size = multi.len();
        self.stage_future(multi.into_encoded(), multi_size)
    }

    // -----------------------------------------------------------------------
    // Writer path
    // -----------------------------------------------------------------------

    /// Next request for the writer thread, in sequence order.
    ///
    /// Blocks until a request is staged, and returns `None` once blocking
    /// mode is off.  The returned handle stays valid across partial
    /// writes; the cursor has already advanced, so the writer must finish
    /// this request before asking for the next.
    pub fn next_to_write(&self) -> Option<Arc<StagedRequest>> {
        loop {
            let (was_handshake, seq, dropped) = {
                let mut state = self.state.lock().unwrap();
                let dropped = if state.in_handshake {
                    Vec::new()
                } else {
                    self.trim_exclusive_pubsub(&mut state)
                };
                if state.in_handshake {
                    (true, state.handshake_cursor.seq(), dropped)
                } else {
                    (false, state.next_to_write.seq(), dropped)
                }
            };
            // Discarded entries resolve to null outside the lock.
            for callback in dropped {
                callback(None);
            }

            let queue = if was_handshake {
                &self.handshake_queue
            } else {
                &self.request_queue
            };
            let item = queue.iterator_at(seq).get_item_block_or_null();

            let mut state = self.state.lock().unwrap();
            if state.in_handshake != was_handshake {
                // Handshake finished (or restarted) while we waited.
                continue;
            }
            let cursor = if was_handshake {
                &mut state.handshake_cursor
            } else {
                &mut state.next_to_write
            };
            if cursor.seq() != seq {
                // A reconnection rewound the cursor while we waited.
                continue;
            }
            return match item {
                Some(item) => {
                    cursor.next();
                    Some(item)
                }
                None => None,
            };
        }
    }

    /// In exclusive pub/sub mode no staged entry below the write cursor
    /// will ever be acknowledged; drop them all and hand back their
    /// callbacks for null resolution.
    fn trim_exclusive_pubsub(&self, state: &mut CoreState) -> Vec<ReplyCallback> {
        let mut dropped = Vec::new();
        if self.listener.is_none() || !self.exclusive_pubsub {
            return dropped;
        }
        while state.next_to_write.seq() > state.next_to_ack.seq() {
            if let Some(item) = state.next_to_ack.item() {
                if let Some(callback) = item.take_callback() {
                    dropped.push(callback);
                }
            }
            state.next_to_ack.next();
            self.request_queue.pop_front();
            self.backpressure.release();
        }
        dropped
    }

    // -----------------------------------------------------------------------
    // Reader path
    // -----------------------------------------------------------------------

    /// Feed one decoded reply through the state machine.
    ///
    /// Returns `true` to keep reading, `false` when the I/O layer must
    /// tear the connection down (the staged requests stay queued and are
    /// retried after [`ConnectionCore::reconnection`]).
    pub fn consume_response(&self, reply: ReplyPtr) -> bool {
        if self.transparent_unavailable && reply.is_unavailable() {
            warn!(reply = %reply, "cluster is temporarily unavailable, reconnecting");
            return false;
        }

        let outcome = {
            let mut state = self.state.lock().unwrap();
            self.classify(&mut state, reply)
        };

        match outcome {
            Outcome::KeepReading => true,
            Outcome::Fatal => false,
            Outcome::Deliver(msg) => {
                if let Some(listener) = &self.listener {
                    listener.handle_incoming_message(msg);
                }
                true
            }
            Outcome::Satisfy(callback, reply) => {
                if let Some(callback) = callback {
                    callback(reply);
                }
                true
            }
        }
    }

    fn classify(&self, state: &mut CoreState, reply: ReplyPtr) -> Outcome {
        if state.in_handshake {
            let handshake = state
                .handshake
                .as_mut()
                .expect("in_handshake implies a provider");
            return match handshake.validate_response(&reply) {
                HandshakeStatus::Invalid => {
                    error!(reply = %reply, "handshake rejected the server's response");
                    Outcome::Fatal
                }
                HandshakeStatus::ValidComplete => {
                    state.in_handshake = false;
                    self.handshake_queue.set_blocking_mode(false);
                    Outcome::KeepReading
                }
                HandshakeStatus::ValidIncomplete => {
                    let next = handshake.provide_handshake();
                    self.handshake_queue
                        .push_back(Arc::new(StagedRequest::new(None, next, 0)));
                    Outcome::KeepReading
                }
            };
        }

        if reply.is_push() {
            if self.listener.is_some() {
                return match parse_message(&reply) {
                    Some(msg) => Outcome::Deliver(msg),
                    None if self.exclusive_pubsub => {
                        error!(reply = %reply, "unparseable push frame in exclusive pub/sub mode");
                        Outcome::Fatal
                    }
                    None => {
                        warn!(reply = %reply, "dropping unparseable push frame");
                        Outcome::KeepReading
                    }
                };
            }
            // No listener to route to; nothing more to do with it.
            return Outcome::KeepReading;
        }

        if self.exclusive_pubsub && self.listener.is_some() {
            return match parse_message(&reply) {
                Some(msg) => Outcome::Deliver(msg),
                None => {
                    error!(reply = %reply, "unparseable frame while in exclusive pub/sub mode");
                    Outcome::Fatal
                }
            };
        }

        if !state.next_to_ack.item_has_arrived() {
            error!("server is sending more responses than there were requests");
            return Outcome::Fatal;
        }
        let item = state
            .next_to_ack
            .item()
            .expect("arrival was just checked under the same lock");

        if item.multi_size() != 0 {
            state.ignored_responses += 1;

            if state.ignored_responses == 1 {
                if !reply.is_ok() {
                    error!(
                        multi_size = item.multi_size(),
                        reply = %reply,
                        "expected OK response at start of MULTI block"
                    );
                    return Outcome::Fatal;
                }
                return Outcome::KeepReading;
            }

            if state.ignored_responses <= item.multi_size() + 1 {
                if !reply.is_queued() {
                    error!(
                        multi_size = item.multi_size(),
                        response_number = state.ignored_responses,
                        reply = %reply,
                        "expected QUEUED response within MULTI block"
                    );
                    return Outcome::Fatal;
                }
                return Outcome::KeepReading;
            }

            // This is the EXEC result, the only reply the caller sees.
            state.ignored_responses = 0;
        }

        let callback = self.acknowledge_pending(state, &item);
        Outcome::Satisfy(callback, Some(reply))
    }

    fn acknowledge_pending(
        &self,
        state: &mut CoreState,
        item: &Arc<StagedRequest>,
    ) -> Option<ReplyCallback> {
        if let Some(perf) = &self.perf_callback {
            #[allow(clippy::cast_possible_truncation)]
            let rtt_us = item.staged_at().elapsed().as_micros() as u64;
            perf.send_perf_marker("rtt_us", rtt_us);
        }
        let callback = item.take_callback();
        state.next_to_ack.next();
        self.request_queue.pop_front();
        self.backpressure.release();
        callback
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Rewind to a fresh-connection state after a connection loss.
    ///
    /// Re-enters handshake mode when a provider is configured, rewinds
    /// both cursors to the oldest unacknowledged request, and clears the
    /// transaction bookkeeping.  Staged user requests are preserved and
    /// will be rewritten on the new connection; a transaction the old
    /// server partially executed is not deduplicated, so commands inside
    /// transactions should be idempotent.
    pub fn reconnection(&self) {
        let mut state = self.state.lock().unwrap();
        self.reconnection_locked(&mut state);
    }

    fn reconnection_locked(&self, state: &mut CoreState) {
        if let Some(handshake) = state.handshake.as_mut() {
            state.in_handshake = true;
            handshake.restart();
            self.handshake_queue.reset();
            self.handshake_queue.set_blocking_mode(true);
            let first = handshake.provide_handshake();
            self.handshake_queue
                .push_back(Arc::new(StagedRequest::new(None, first, 0)));
            state.handshake_cursor = self.handshake_queue.begin();
        } else {
            state.in_handshake = false;
        }

        state.ignored_responses = 0;
        state.next_to_write = self.request_queue.begin();
        state.next_to_ack = self.request_queue.begin();
    }

    /// The host is abandoning the connection: satisfy every pending
    /// callback with a null reply, empty the queue, and end up in a
    /// fresh reset state.  Returns how many callbacks were drained.
    pub fn clear_all_pending(&self) -> usize {
        let drained = {
            let mut state = self.state.lock().unwrap();
            state.in_handshake = false;

            let mut drained = Vec::new();
            while state.next_to_ack.item_has_arrived() {
                if let Some(item) = state.next_to_ack.item() {
                    if let Some(callback) = item.take_callback() {
                        drained.push(callback);
                    }
                }
                state.next_to_ack.next();
                self.request_queue.pop_front();
                self.backpressure.release();
            }

            self.request_queue.reset();
            self.reconnection_locked(&mut state);
            drained
        };

        let count = drained.len();
        for callback in drained {
            callback(None);
        }
        count
    }

    /// Toggle blocking mode on both queues; turning it off unparks a
    /// writer stuck in [`ConnectionCore::next_to_write`].
    pub fn set_blocking_mode(&self, value: bool) {
        self.handshake_queue.set_blocking_mode(value);
        self.request_queue.set_blocking_mode(value);
    }
}

impl CommandIssuer for ConnectionCore {
    fn issue(&self, encoded: EncodedRequest, multi_size: usize) -> ReplyFuture {
        self.stage_future(encoded, multi_size)
    }
}
