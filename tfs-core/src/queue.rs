//! Bounded, thread-safe queue used for the inner-packet work queues and the
//! buffer free pool alike.
//!
//! Modeled as an explicit monitor (one lock, two condition variables) rather than
//! an mpsc channel, since producers must block on a full queue as well as consumers
//! blocking on an empty one (see crate-level concurrency model).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Default and maximum bounded-queue capacity used throughout the pipeline.
pub const MAXQSZ: usize = 32;

/// A bounded FIFO queue with blocking and non-blocking pop, and blocking push.
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Block until an item is available, then pop it.
    pub fn pop(&self) -> T {
        let mut items = self.state.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                self.not_full.notify_one();
                return item;
            }
            items = self.not_empty.wait(items).unwrap();
        }
    }

    /// Pop an item without blocking; returns `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut items = self.state.lock().unwrap();
        let item = items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Block until there is room, then push an item.
    pub fn push(&self, value: T) {
        let mut items = self.state.lock().unwrap();
        while items.len() >= self.capacity {
            items = self.not_full.wait(items).unwrap();
        }
        items.push_back(value);
        self.not_empty.notify_one();
    }

    /// Push an item without blocking; returns the item back if the queue is full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut items = self.state.lock().unwrap();
        if items.len() >= self.capacity {
            return Err(value);
        }
        items.push_back(value);
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
