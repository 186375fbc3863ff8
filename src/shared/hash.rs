//! The combined shared hash: local, transient, and durable layers
//! behind one read/write surface.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, Weak};

use crate::connection::{CommandIssuer, ReplyFuture};
use crate::pubsub::Subscriber;

use super::batch::UpdateBatch;
use super::subscription::{HashSubscriberHub, HashSubscription, HashUpdate};
use super::transient::TransientHash;
use super::versioned::VersionedHash;

/// One named hash, replicated with the server.
///
/// Reads consult the purely-local overlay first, then the transient
/// broadcast layer, then the durable revision-tracked replica.  Writes
/// are split by the [`UpdateBatch`] layers.  Both replicated layers feed
/// the same change-notification hub, so one subscription observes them
/// all.
pub struct SharedHash {
    key: String,
    local: Mutex<BTreeMap<String, String>>,
    versioned: Arc<VersionedHash>,
    transient: Arc<TransientHash>,
    hub: Arc<HashSubscriberHub>,
}

impl SharedHash {
    /// A hash wired to a connection through its command capability and a
    /// pub/sub subscriber.
    pub fn new(issuer: Weak<dyn CommandIssuer>, subscriber: &Subscriber, key: &str) -> SharedHash {
        SharedHash::build(Some(issuer), Some(subscriber), key)
    }

    /// A hash with no connection behind it; all layers are local.
    pub fn detached(key: &str) -> SharedHash {
        SharedHash::build(None, None, key)
    }

    fn build(
        issuer: Option<Weak<dyn CommandIssuer>>,
        subscriber: Option<&Subscriber>,
        key: &str,
    ) -> SharedHash {
        let hub = Arc::new(HashSubscriberHub::new());
        SharedHash {
            key: key.to_owned(),
            local: Mutex::new(BTreeMap::new()),
            versioned: VersionedHash::build(issuer.clone(), subscriber, key, Arc::clone(&hub)),
            transient: TransientHash::build(issuer, subscriber, key, Arc::clone(&hub)),
            hub,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Read one field: local overlay first, then transient, then durable.
    pub fn get(&self, field: &str) -> Option<String> {
        if let Some(value) = self.local.lock().unwrap().get(field).cloned() {
            return Some(value);
        }
        if let Some(value) = self.transient.get(field) {
            return Some(value);
        }
        self.versioned.get(field)
    }

    /// Read several fields; `None` unless every one was found.
    pub fn get_many(&self, fields: &[&str]) -> Option<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for field in fields {
            out.insert((*field).to_owned(), self.get(field)?);
        }
        Some(out)
    }

    /// Read from the local overlay only.
    pub fn get_local(&self, field: &str) -> Option<String> {
        self.local.lock().unwrap().get(field).cloned()
    }

    /// All keys currently visible through any layer.
    pub fn keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> =
            self.versioned.contents_snapshot().into_keys().collect();
        keys.extend(self.local.lock().unwrap().keys().cloned());
        keys
    }

    /// Revision of the durable layer.
    pub fn current_revision(&self) -> u64 {
        self.versioned.current_version()
    }

    /// The durable layer, for revision-level access.
    pub fn versioned(&self) -> &Arc<VersionedHash> {
        &self.versioned
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Apply a batch across its layers.
    ///
    /// Local entries mutate the overlay in place; transient entries are
    /// broadcast on their own independent future; the returned future is
    /// the `EXEC` reply of the durable transaction.
    pub fn set(&self, batch: &UpdateBatch) -> ReplyFuture {
        {
            let mut local = self.local.lock().unwrap();
            for (field, value) in batch.local() {
                if value.is_empty() {
                    local.remove(field);
                } else {
                    local.insert(field.clone(), value.clone());
                }
            }
        }

        let _transient_ack = self.transient.set(batch.transient());
        self.versioned.set(batch.durable())
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Observe `(key, old, new)` changes from the replicated layers.
    /// With `with_current_contents`, the durable contents are emitted
    /// synchronously into the subscription before it is returned.
    pub fn subscribe(&self, with_current_contents: bool) -> HashSubscription {
        let subscription = self.hub.subscribe();
        if with_current_contents {
            for (key, value) in self.versioned.contents_snapshot() {
                subscription.feed(HashUpdate {
                    key,
                    old_value: None,
                    new_value: Some(value),
                });
            }
        }
        subscription
    }

    /// Forward a connection re-establishment to the durable layer.
    pub fn notify_connection_established(&self) {
        self.versioned.trigger_resilvering();
    }
}
