//! Pub/sub demultiplexing: message model, frame classification, and the
//! subscriber registry that fans messages out to consumers.

mod message;
mod parser;
mod queue;
mod subscriber;

pub use message::{Message, MessageType};
pub use parser::parse_message;
pub use queue::MessageQueue;
pub use subscriber::{Subscriber, Subscription};

/// Receiver of classified pub/sub messages.
///
/// Invoked on the connection's reader thread; implementations must not
/// call back into the connection core synchronously.
pub trait MessageListener: Send + Sync {
    fn handle_incoming_message(&self, msg: Message);
}
