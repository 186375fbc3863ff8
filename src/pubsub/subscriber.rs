//! Per-channel and per-pattern subscription registry.
//!
//! The [`Subscriber`] receives every classified pub/sub message from the
//! connection and fans data frames out to the [`Subscription`] handles
//! registered for their channel or pattern.  Handles are held weakly: a
//! dropped subscription is skipped (and pruned) at the next delivery, so
//! consumers never have to deregister explicitly.
//!
//! When constructed over a live connection the subscriber also issues the
//! `SUBSCRIBE`/`PSUBSCRIBE` commands for first-time targets, and the
//! matching unsubscribe once the last handle for a target is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::connection::CommandIssuer;
use crate::queueing::AttachableQueue;
use crate::resp::EncodedRequest;

use super::MessageListener;
use super::message::{Message, MessageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubKind {
    Channel,
    Pattern,
}

struct SubscriptionState {
    queue: AttachableQueue<Message>,
}

struct RegistryShared {
    channels: Mutex<HashMap<String, Vec<Weak<SubscriptionState>>>>,
    patterns: Mutex<HashMap<String, Vec<Weak<SubscriptionState>>>>,
    issuer: Option<Weak<dyn CommandIssuer>>,
    /// Server-side count, as reported by the latest control frame.
    active_subscriptions: AtomicI64,
    deliver_control_frames: AtomicBool,
}

impl RegistryShared {
    fn map(&self, kind: SubKind) -> &Mutex<HashMap<String, Vec<Weak<SubscriptionState>>>> {
        match kind {
            SubKind::Channel => &self.channels,
            SubKind::Pattern => &self.patterns,
        }
    }

    fn issue(&self, command: &str, target: &str) {
        if let Some(issuer) = self.issuer.as_ref().and_then(Weak::upgrade) {
            // The confirmation comes back as a control frame; the reply
            // future itself is of no interest.
            let _ = issuer.issue(EncodedRequest::new(&[command, target]), 0);
        }
    }

    /// Strong handles currently listening on `target`, pruning dead ones.
    fn listeners(&self, kind: SubKind, target: &str) -> Vec<Arc<SubscriptionState>> {
        let mut map = self.map(kind).lock().unwrap();
        let Some(entries) = map.get_mut(target) else {
            return Vec::new();
        };
        entries.retain(|weak| weak.strong_count() > 0);
        entries.iter().filter_map(Weak::upgrade).collect()
    }

    /// Called by a dropping [`Subscription`].
    fn release(&self, kind: SubKind, target: &str, state: &Arc<SubscriptionState>) {
        let now_empty = {
            let mut map = self.map(kind).lock().unwrap();
            let Some(entries) = map.get_mut(target) else {
                return;
            };
            entries.retain(|weak| {
                weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), Arc::as_ptr(state))
            });
            if entries.is_empty() {
                map.remove(target);
                true
            } else {
                false
            }
        };

        if now_empty {
            let command = match kind {
                SubKind::Channel => "UNSUBSCRIBE",
                SubKind::Pattern => "PUNSUBSCRIBE",
            };
            self.issue(command, target);
        }
    }
}

/// Registry and dispatcher for pub/sub consumers.
pub struct Subscriber {
    shared: Arc<RegistryShared>,
}

impl Subscriber {
    /// A subscriber wired to a connection: `subscribe` calls go out on
    /// the wire as well as into the registry.
    pub fn new(issuer: Weak<dyn CommandIssuer>) -> Subscriber {
        Subscriber::build(Some(issuer))
    }

    /// A registry-only subscriber; useful when the host feeds messages
    /// itself, and in tests.
    pub fn standalone() -> Subscriber {
        Subscriber::build(None)
    }

    fn build(issuer: Option<Weak<dyn CommandIssuer>>) -> Subscriber {
        Subscriber {
            shared: Arc::new(RegistryShared {
                channels: Mutex::new(HashMap::new()),
                patterns: Mutex::new(HashMap::new()),
                issuer,
                active_subscriptions: AtomicI64::new(0),
                deliver_control_frames: AtomicBool::new(false),
            }),
        }
    }

    /// Listen on a channel.
    pub fn subscribe(&self, channel: &str) -> Subscription {
        self.register(SubKind::Channel, channel)
    }

    /// Listen on a glob pattern.
    pub fn psubscribe(&self, pattern: &str) -> Subscription {
        self.register(SubKind::Pattern, pattern)
    }

    fn register(&self, kind: SubKind, target: &str) -> Subscription {
        let state = Arc::new(SubscriptionState {
            queue: AttachableQueue::new(),
        });

        let first_for_target = {
            let mut map = self.shared.map(kind).lock().unwrap();
            let entries = map.entry(target.to_owned()).or_default();
            entries.retain(|weak| weak.strong_count() > 0);
            let was_empty = entries.is_empty();
            entries.push(Arc::downgrade(&state));
            was_empty
        };

        if first_for_target {
            let command = match kind {
                SubKind::Channel => "SUBSCRIBE",
                SubKind::Pattern => "PSUBSCRIBE",
            };
            self.shared.issue(command, target);
        }

        Subscription {
            state,
            registry: Arc::downgrade(&self.shared),
            kind,
            target: target.to_owned(),
        }
    }

    /// Deliver a message as if it had arrived from the server.
    pub fn feed_fake_message(&self, msg: Message) {
        self.dispatch(msg);
    }

    /// Server-side subscription count from the latest control frame.
    pub fn active_subscription_count(&self) -> i64 {
        self.shared.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Also forward `(p)(un)subscribe` confirmations to the listeners of
    /// their target.  Off by default.
    pub fn set_deliver_control_frames(&self, value: bool) {
        self.shared
            .deliver_control_frames
            .store(value, Ordering::SeqCst);
    }

    fn dispatch(&self, msg: Message) {
        let (kind, target) = match msg.message_type() {
            MessageType::Message => (SubKind::Channel, msg.channel().to_owned()),
            MessageType::PatternMessage => (SubKind::Pattern, msg.pattern().to_owned()),
            control_type => {
                self.shared
                    .active_subscriptions
                    .store(msg.active_subscriptions(), Ordering::SeqCst);
                if !self.shared.deliver_control_frames.load(Ordering::SeqCst) {
                    return;
                }
                let on_pattern = matches!(
                    control_type,
                    MessageType::PatternSubscribe | MessageType::PatternUnsubscribe
                );
                if on_pattern {
                    (SubKind::Pattern, msg.pattern().to_owned())
                } else {
                    (SubKind::Channel, msg.channel().to_owned())
                }
            }
        };

        // Deliver outside the registry lock.
        for listener in self.shared.listeners(kind, &target) {
            listener.queue.push_back(msg.clone());
        }
    }
}

impl MessageListener for Subscriber {
    fn handle_incoming_message(&self, msg: Message) {
        self.dispatch(msg);
    }
}

/// One consumer's handle on a channel or pattern.
///
/// Messages accumulate in an internal queue until a callback is attached,
/// after which they are delivered directly.  Dropping the handle removes
/// it from the registry.
pub struct Subscription {
    state: Arc<SubscriptionState>,
    registry: Weak<RegistryShared>,
    kind: SubKind,
    target: String,
}

impl Subscription {
    pub fn is_empty(&self) -> bool {
        self.state.queue.is_empty()
    }

    pub fn size(&self) -> usize {
        self.state.queue.size()
    }

    /// Oldest undelivered message, without removing it.
    pub fn front(&self) -> Option<Message> {
        self.state.queue.front()
    }

    pub fn pop_front(&self) -> Option<Message> {
        self.state.queue.pop_front()
    }

    /// Go callback-driven: drains the backlog through `callback`, then
    /// delivers every later message directly.
    pub fn attach_callback(&self, callback: impl Fn(Message) + Send + Sync + 'static) {
        self.state.queue.attach(callback);
    }

    pub fn detach_callback(&self) {
        self.state.queue.detach();
    }

    /// The channel or pattern this handle listens on.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.registry.upgrade() {
            shared.release(self.kind, &self.target, &self.state);
        }
    }
}
