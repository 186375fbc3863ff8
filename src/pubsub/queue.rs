//! A [`MessageListener`] that simply queues what it receives.

use crate::queueing::{QueueIterator, WaitableQueue};

use super::MessageListener;
use super::message::Message;

const MESSAGE_BLOCK: usize = 100;

/// Buffers incoming pub/sub messages in arrival order for a consumer
/// thread to drain, with the waitable queue's blocking semantics.
#[derive(Default)]
pub struct MessageQueue {
    queue: WaitableQueue<Message, MESSAGE_BLOCK>,
}

impl MessageQueue {
    pub fn new() -> MessageQueue {
        MessageQueue::default()
    }

    pub fn set_blocking_mode(&self, value: bool) {
        self.queue.set_blocking_mode(value);
    }

    pub fn pop_front(&self) -> Option<u64> {
        self.queue.pop_front()
    }

    pub fn begin(&self) -> QueueIterator<Message, MESSAGE_BLOCK> {
        self.queue.begin()
    }

    pub fn size(&self) -> usize {
        self.queue.size()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&self) {
        self.queue.reset();
    }
}

impl MessageListener for MessageQueue {
    fn handle_incoming_message(&self, msg: Message) {
        self.queue.push_back(msg);
    }
}
