//! Durable revision-tracked replica of a server-side versioned hash.
//!
//! The server assigns every committed change a monotonically increasing
//! revision (starting at 1) and publishes `(revision, field→value)`
//! updates on `__vhash@<key>`.  The replica applies exactly the next
//! revision; anything older is a duplicate and anything two or more
//! ahead means missed updates, which triggers a resilver: a full
//! `VHGETALL` re-fetch that replaces the contents wholesale.
//!
//! Reads are eventually consistent: another client may have written and
//! been acknowledged while our replica is still catching up.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use thiserror::Error;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::warn;

use crate::connection::{CommandIssuer, MultiBuilder, ReplyFuture, reply_channel};
use crate::pubsub::{Message, MessageType, Subscriber, Subscription};
use crate::resp::{EncodedRequest, Reply, ReplyPtr, ResponseDecoder};

use super::subscription::{HashSubscriberHub, HashUpdate};

/// Why a published revision could not be applied, or that it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Revision was `current + 1` and has been applied.
    Applied,
    /// Revision was not newer than the replica; discarded.
    Stale,
    /// Revision skipped ahead; the replica needs a resilver.
    GapDetected,
}

/// Malformed `(revision, contents)` payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashPayloadError {
    #[error("payload is not a two-element array")]
    BadShape,
    #[error("revision is not a non-negative integer")]
    BadRevision,
    #[error("contents must be a flat array of field/value bulk string pairs")]
    BadFieldList,
    #[error("field or value is not valid UTF-8")]
    InvalidUtf8,
}

struct Replica {
    revision: u64,
    contents: BTreeMap<String, String>,
}

/// The durable layer of a shared hash.
pub struct VersionedHash {
    key: String,
    issuer: Option<Weak<dyn CommandIssuer>>,
    state: RwLock<Replica>,
    /// In-flight `VHGETALL` reply, polled opportunistically from the
    /// read and update paths.
    pending_resilver: Mutex<Option<ReplyFuture>>,
    hub: Arc<HashSubscriberHub>,
    /// Keeps the `__vhash@<key>` channel registration alive; dropped
    /// with the hash, which detaches it from the subscriber.
    subscription: Mutex<Option<Subscription>>,
}

impl VersionedHash {
    /// Replica wired to a connection: subscribes to the hash's update
    /// channel and issues the initial resilver fetch.
    pub fn new(
        issuer: Weak<dyn CommandIssuer>,
        subscriber: &Subscriber,
        key: &str,
    ) -> Arc<VersionedHash> {
        VersionedHash::build(
            Some(issuer),
            Some(subscriber),
            key,
            Arc::new(HashSubscriberHub::new()),
        )
    }

    /// Replica with no connection behind it; revisions are fed by the
    /// caller.  Useful offline and in tests.
    pub fn detached(key: &str) -> Arc<VersionedHash> {
        VersionedHash::build(None, None, key, Arc::new(HashSubscriberHub::new()))
    }

    pub(crate) fn build(
        issuer: Option<Weak<dyn CommandIssuer>>,
        subscriber: Option<&Subscriber>,
        key: &str,
        hub: Arc<HashSubscriberHub>,
    ) -> Arc<VersionedHash> {
        let hash = Arc::new(VersionedHash {
            key: key.to_owned(),
            issuer,
            state: RwLock::new(Replica {
                revision: 0,
                contents: BTreeMap::new(),
            }),
            pending_resilver: Mutex::new(None),
            hub,
            subscription: Mutex::new(None),
        });

        if let Some(subscriber) = subscriber {
            let subscription = subscriber.subscribe(&format!("__vhash@{key}"));
            let weak = Arc::downgrade(&hash);
            subscription.attach_callback(move |msg| {
                if let Some(hash) = weak.upgrade() {
                    hash.process_incoming(&msg);
                }
            });
            *hash.subscription.lock().unwrap() = Some(subscription);
            hash.trigger_resilvering();
        }

        hash
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Eventually-consistent read of one field.
    pub fn get(&self, field: &str) -> Option<String> {
        self.check_pending();
        let replica = self.state.read().unwrap();
        replica.contents.get(field).cloned()
    }

    pub fn current_version(&self) -> u64 {
        self.check_pending();
        self.state.read().unwrap().revision
    }

    pub(crate) fn contents_snapshot(&self) -> BTreeMap<String, String> {
        self.check_pending();
        self.state.read().unwrap().contents.clone()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Package the batch as one `VHSET`/`VHDEL` transaction; an empty
    /// value selects deletion.  The returned future resolves with the
    /// `EXEC` reply, or `None` when no connection is behind the hash.
    pub fn set(&self, batch: &BTreeMap<String, String>) -> ReplyFuture {
        let mut multi = MultiBuilder::new();
        for (field, value) in batch {
            if value.is_empty() {
                multi.push(&["VHDEL", &self.key, field]);
            } else {
                multi.push(&["VHSET", &self.key, field, value]);
            }
        }

        if multi.is_empty() {
            // Nothing to send; resolve as an empty transaction result.
            return resolved(Some(Arc::new(Reply::Array(Vec::new()))));
        }
        match self.issuer.as_ref().and_then(Weak::upgrade) {
            Some(issuer) => {
                let multi_size = multi.len();
                issuer.issue(multi.into_encoded(), multi_size)
            }
            None => resolved(None),
        }
    }

    // -----------------------------------------------------------------------
    // Update pipeline
    // -----------------------------------------------------------------------

    /// Offer a published revision to the replica.
    ///
    /// Applies it only when it is exactly the next one; subscribers are
    /// notified once per changed field, after the write lock is
    /// released.
    pub fn feed_revision(&self, revision: u64, updates: &BTreeMap<String, String>) -> FeedOutcome {
        let changes = {
            let mut replica = self.state.write().unwrap();
            if revision <= replica.revision {
                return FeedOutcome::Stale;
            }
            if revision >= replica.revision + 2 {
                warn!(
                    key = %self.key,
                    received = revision,
                    current = replica.revision,
                    "versioned hash went out of date, asking for resilvering"
                );
                return FeedOutcome::GapDetected;
            }

            let mut changes = Vec::with_capacity(updates.len());
            for (field, value) in updates {
                let (old_value, new_value) = if value.is_empty() {
                    (replica.contents.remove(field), None)
                } else {
                    (
                        replica.contents.insert(field.clone(), value.clone()),
                        Some(value.clone()),
                    )
                };
                changes.push(HashUpdate {
                    key: field.clone(),
                    old_value,
                    new_value,
                });
            }
            replica.revision = revision;
            changes
        };

        for change in &changes {
            self.hub.notify(change);
        }
        FeedOutcome::Applied
    }

    /// Convenience for a single-field revision.
    pub fn feed_revision_single(&self, revision: u64, field: &str, value: &str) -> FeedOutcome {
        let mut batch = BTreeMap::new();
        batch.insert(field.to_owned(), value.to_owned());
        self.feed_revision(revision, &batch)
    }

    /// Replace the contents wholesale with a freshly fetched state.
    pub fn resilver(&self, revision: u64, contents: BTreeMap<String, String>) {
        let mut replica = self.state.write().unwrap();
        warn!(
            key = %self.key,
            from = replica.revision,
            to = revision,
            "resilvering versioned hash"
        );
        replica.revision = revision;
        replica.contents = contents;
    }

    /// Issue an asynchronous `VHGETALL`; the reply is picked up by the
    /// next read or update.  Call on connection re-establishment.
    pub fn trigger_resilvering(&self) {
        let future = self
            .issuer
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|issuer| issuer.issue(EncodedRequest::new(&["VHGETALL", &self.key]), 0));
        *self.pending_resilver.lock().unwrap() = future;
    }

    /// Poll the in-flight resilver fetch, applying it if it finished.
    fn check_pending(&self) {
        let reply = {
            let mut pending = self.pending_resilver.lock().unwrap();
            let Some(future) = pending.as_mut() else {
                return;
            };
            match future.try_recv() {
                Ok(Some(reply)) => {
                    pending.take();
                    Some(reply)
                }
                Ok(None) | Err(TryRecvError::Closed) => {
                    // Connection was torn down before the fetch resolved;
                    // a reconnection will trigger a fresh one.
                    pending.take();
                    None
                }
                Err(TryRecvError::Empty) => None,
            }
        };

        if let Some(reply) = reply {
            self.handle_resilver_reply(&reply);
        }
    }

    fn handle_resilver_reply(&self, reply: &ReplyPtr) {
        match parse_hash_payload(reply) {
            Ok((revision, contents)) => self.resilver(revision, contents),
            Err(error) => {
                warn!(key = %self.key, %error, reply = %reply, "could not parse resilvering response");
            }
        }
    }

    /// Handle one `__vhash@<key>` notification.
    fn process_incoming(&self, msg: &Message) {
        self.check_pending();

        if msg.message_type() != MessageType::Message {
            return;
        }
        let Some(payload) = ResponseDecoder::parse_encoded(msg.payload()) else {
            warn!(key = %self.key, "revision update payload is not valid RESP");
            return;
        };
        match parse_hash_payload(&payload) {
            Ok((revision, update)) => {
                if self.feed_revision(revision, &update) == FeedOutcome::GapDetected {
                    self.trigger_resilvering();
                }
            }
            Err(error) => {
                warn!(key = %self.key, %error, "could not parse incoming revision update");
            }
        }
    }
}

/// A reply future that is already resolved.
fn resolved(reply: Option<ReplyPtr>) -> ReplyFuture {
    let (callback, future) = reply_channel();
    callback(reply);
    future
}

/// Parse a `[revision, [field, value, …]]` reply, as returned by
/// `VHGETALL` and carried inside published revision updates.
pub fn parse_hash_payload(
    reply: &Reply,
) -> Result<(u64, BTreeMap<String, String>), HashPayloadError> {
    let Reply::Array(elements) = reply else {
        return Err(HashPayloadError::BadShape);
    };
    if elements.len() != 2 {
        return Err(HashPayloadError::BadShape);
    }

    let revision = elements[0]
        .as_integer()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or(HashPayloadError::BadRevision)?;

    let Reply::Array(fields) = &elements[1] else {
        return Err(HashPayloadError::BadFieldList);
    };
    if fields.len() % 2 != 0 {
        return Err(HashPayloadError::BadFieldList);
    }

    let mut contents = BTreeMap::new();
    for pair in fields.chunks_exact(2) {
        let (Reply::Bulk(field), Reply::Bulk(value)) = (&pair[0], &pair[1]) else {
            return Err(HashPayloadError::BadFieldList);
        };
        let field =
            std::str::from_utf8(field).map_err(|_| HashPayloadError::InvalidUtf8)?;
        let value =
            std::str::from_utf8(value).map_err(|_| HashPayloadError::InvalidUtf8)?;
        contents.insert(field.to_owned(), value.to_owned());
    }
    Ok((revision, contents))
}
