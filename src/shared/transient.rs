//! Transient (broadcast-only) layer of a shared hash.
//!
//! Transient values never touch server storage and carry no revisions.
//! A `set` publishes the batch on `__vhash-transient@<key>`; every
//! process holding the hash, the writer itself included, folds the
//! broadcast into its local copy when it arrives.  Delivery is
//! best-effort: a listener that was offline simply missed the value.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use crate::connection::{CommandIssuer, ReplyFuture, reply_channel};
use crate::pubsub::{Message, MessageType, Subscriber, Subscription};
use crate::resp::{EncodedRequest, Reply, ResponseDecoder};

use super::subscription::{HashSubscriberHub, HashUpdate};

/// The transient layer: a local map kept loosely in sync via pub/sub.
pub struct TransientHash {
    key: String,
    channel: String,
    issuer: Option<Weak<dyn CommandIssuer>>,
    contents: Mutex<BTreeMap<String, String>>,
    hub: Arc<HashSubscriberHub>,
    subscription: Mutex<Option<Subscription>>,
}

impl TransientHash {
    pub(crate) fn build(
        issuer: Option<Weak<dyn CommandIssuer>>,
        subscriber: Option<&Subscriber>,
        key: &str,
        hub: Arc<HashSubscriberHub>,
    ) -> Arc<TransientHash> {
        let channel = format!("__vhash-transient@{key}");
        let hash = Arc::new(TransientHash {
            key: key.to_owned(),
            channel: channel.clone(),
            issuer,
            contents: Mutex::new(BTreeMap::new()),
            hub,
            subscription: Mutex::new(None),
        });

        if let Some(subscriber) = subscriber {
            let subscription = subscriber.subscribe(&channel);
            let weak = Arc::downgrade(&hash);
            subscription.attach_callback(move |msg| {
                if let Some(hash) = weak.upgrade() {
                    hash.process_incoming(&msg);
                }
            });
            *hash.subscription.lock().unwrap() = Some(subscription);
        }

        hash
    }

    pub fn get(&self, field: &str) -> Option<String> {
        self.contents.lock().unwrap().get(field).cloned()
    }

    /// Broadcast a batch of transient values.  Returns the future of the
    /// `PUBLISH` reply, independent of any durable write.
    pub fn set(&self, batch: &BTreeMap<String, String>) -> ReplyFuture {
        if batch.is_empty() {
            return resolved_nil();
        }
        let Some(issuer) = self.issuer.as_ref().and_then(Weak::upgrade) else {
            return resolved_none();
        };

        // The payload is itself RESP: a flat array of field/value pairs.
        let mut flat: Vec<&[u8]> = Vec::with_capacity(batch.len() * 2);
        for (field, value) in batch {
            flat.push(field.as_bytes());
            flat.push(value.as_bytes());
        }
        let payload = EncodedRequest::new(&flat);

        let command = EncodedRequest::new(&[
            b"PUBLISH".as_slice(),
            self.channel.as_bytes(),
            payload.as_bytes(),
        ]);
        issuer.issue(command, 0)
    }

    fn process_incoming(&self, msg: &Message) {
        if msg.message_type() != MessageType::Message {
            return;
        }
        let Some(Reply::Array(fields)) = ResponseDecoder::parse_encoded(msg.payload()) else {
            warn!(key = %self.key, "transient broadcast payload is not a RESP array");
            return;
        };
        if fields.len() % 2 != 0 {
            warn!(key = %self.key, "transient broadcast carries an odd field list");
            return;
        }

        let mut changes = Vec::with_capacity(fields.len() / 2);
        {
            let mut contents = self.contents.lock().unwrap();
            for pair in fields.chunks_exact(2) {
                let (Some(field), Some(value)) = (pair[0].as_bulk_str(), pair[1].as_bulk_str())
                else {
                    warn!(key = %self.key, "skipping non-UTF-8 transient field");
                    continue;
                };
                let (old_value, new_value) = if value.is_empty() {
                    (contents.remove(field), None)
                } else {
                    (
                        contents.insert(field.to_owned(), value.to_owned()),
                        Some(value.to_owned()),
                    )
                };
                changes.push(HashUpdate {
                    key: field.to_owned(),
                    old_value,
                    new_value,
                });
            }
        }

        for change in &changes {
            self.hub.notify(change);
        }
    }
}

fn resolved_none() -> ReplyFuture {
    let (callback, future) = reply_channel();
    callback(None);
    future
}

fn resolved_nil() -> ReplyFuture {
    let (callback, future) = reply_channel();
    callback(Some(Arc::new(Reply::Nil)));
    future
}
