//! Blocking handoff queues between pipeline stages.
//!
//! Two instances wire the pipeline: the utterance queue (capacity one,
//! newest wins; the producer calls [`HandoffQueue::replace`]) and the
//! command queue (plain FIFO). Consumers block in [`HandoffQueue::recv`];
//! closing the queue wakes them once the backlog is drained.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A mutex + condvar handoff queue shared between one producer stage and
/// one consumer stage.
pub struct HandoffQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item (FIFO). Ignored after `close`.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
    }

    /// Drop everything queued, then append. The newest-wins operation.
    pub fn replace(&self, item: T) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.items.clear();
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
    }

    /// Drop everything queued.
    pub fn clear(&self) {
        self.inner.lock().items.clear();
    }

    /// Block until an item is available or the queue is closed.
    ///
    /// Items still queued at close time are delivered before `None`.
    pub fn recv(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Close the queue and wake all blocked consumers.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
