//! Queue that can hand its contents to an attached callback.
//!
//! Detached, it buffers like a plain FIFO.  Attaching a callback first
//! drains the backlog through it in order, then delivers every later
//! push directly, bypassing the buffer.  Detaching resumes buffering.
//! Used for subscription delivery, where a consumer may start pulling
//! before deciding to go callback-driven.

use std::collections::VecDeque;
use std::sync::Mutex;

type Sink<T> = Box<dyn Fn(T) + Send + Sync>;

pub struct AttachableQueue<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    backlog: VecDeque<T>,
    sink: Option<Sink<T>>,
}

impl<T> Default for AttachableQueue<T> {
    fn default() -> Self {
        AttachableQueue::new()
    }
}

impl<T> AttachableQueue<T> {
    pub fn new() -> AttachableQueue<T> {
        AttachableQueue {
            inner: Mutex::new(Inner {
                backlog: VecDeque::new(),
                sink: None,
            }),
        }
    }

    /// Deliver or buffer one item.
    ///
    /// The sink runs under the queue's own lock; it must not call back
    /// into the same queue.
    pub fn push_back(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        match &inner.sink {
            Some(sink) => sink(item),
            None => inner.backlog.push_back(item),
        }
    }

    /// Attach a callback, draining any backlog through it first.
    pub fn attach(&self, sink: impl Fn(T) + Send + Sync + 'static) {
        let mut inner = self.inner.lock().unwrap();
        for item in inner.backlog.drain(..).collect::<Vec<_>>() {
            sink(item);
        }
        inner.sink = Some(Box::new(sink));
    }

    /// Detach the callback; later pushes buffer again.
    pub fn detach(&self) {
        self.inner.lock().unwrap().sink = None;
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn pop_front(&self) -> Option<T> {
        self.inner.lock().unwrap().backlog.pop_front()
    }
}

impl<T: Clone> AttachableQueue<T> {
    /// Oldest buffered item, without removing it.
    pub fn front(&self) -> Option<T> {
        self.inner.lock().unwrap().backlog.front().cloned()
    }
}
