//! Change-notification fanout for shared hashes.

use std::sync::{Arc, Mutex, Weak};

use crate::queueing::AttachableQueue;

/// One applied field change: `new_value` is `None` for deletions,
/// `old_value` is `None` for insertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashUpdate {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

struct HashSubscriptionState {
    queue: AttachableQueue<HashUpdate>,
}

/// Holds the weakly-referenced subscriptions of one shared hash and
/// fans each update out to the live ones.
#[derive(Default)]
pub(crate) struct HashSubscriberHub {
    listeners: Mutex<Vec<Weak<HashSubscriptionState>>>,
}

impl HashSubscriberHub {
    pub(crate) fn new() -> HashSubscriberHub {
        HashSubscriberHub::default()
    }

    pub(crate) fn subscribe(&self) -> HashSubscription {
        let state = Arc::new(HashSubscriptionState {
            queue: AttachableQueue::new(),
        });
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|weak| weak.strong_count() > 0);
        listeners.push(Arc::downgrade(&state));
        HashSubscription { state }
    }

    /// Deliver one update to every live subscription.  The listener list
    /// lock is released before delivery.
    pub(crate) fn notify(&self, update: &HashUpdate) {
        let strong: Vec<Arc<HashSubscriptionState>> = {
            let mut listeners = self.listeners.lock().unwrap();
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in strong {
            listener.queue.push_back(update.clone());
        }
    }
}

/// A consumer's handle on a shared hash's change stream.
///
/// Updates buffer until a callback is attached; dropping the handle
/// unregisters it.
pub struct HashSubscription {
    state: Arc<HashSubscriptionState>,
}

impl HashSubscription {
    pub fn is_empty(&self) -> bool {
        self.state.queue.is_empty()
    }

    pub fn size(&self) -> usize {
        self.state.queue.size()
    }

    pub fn front(&self) -> Option<HashUpdate> {
        self.state.queue.front()
    }

    pub fn pop_front(&self) -> Option<HashUpdate> {
        self.state.queue.pop_front()
    }

    pub fn attach_callback(&self, callback: impl Fn(HashUpdate) + Send + Sync + 'static) {
        self.state.queue.attach(callback);
    }

    pub fn detach_callback(&self) {
        self.state.queue.detach();
    }

    /// Inject an update directly, bypassing the hub.  Used to emit the
    /// current contents on attach.
    pub(crate) fn feed(&self, update: HashUpdate) {
        self.state.queue.push_back(update);
    }
}
