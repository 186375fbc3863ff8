//! Queueing primitives: the waitable request FIFO plus a few small
//! bounded containers used around connection bookkeeping.

mod attachable;
mod last_n_map;
mod last_n_set;
mod ring_buffer;
mod waitable;

pub use attachable::AttachableQueue;
pub use last_n_map::LastNMap;
pub use last_n_set::LastNSet;
pub use ring_buffer::RingBuffer;
pub use waitable::{QueueIterator, WaitableQueue};
