// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The ready queue (component B): a fixed-capacity circular FIFO of
//! thread identifiers.
//!
//! Unlike a growable `VecDeque`, capacity is fixed at construction time
//! to the maximum thread count, matching the original's statically-sized
//! `ready_queue` array. Overflow and underflow are programming errors,
//! not user-facing failures, and are reported through [`SystemError`]
//! rather than threaded through `Result`.

use crate::thread::ThreadId;
use std::collections::VecDeque;

/// A fixed-capacity circular FIFO of runnable thread identifiers.
///
pub struct ReadyQueue {
    capacity: usize,
    entries: VecDeque<ThreadId>,
}

impl ReadyQueue {
    /// Creates an empty queue able to hold up to `capacity` identifiers.
    ///
    pub fn new(capacity: usize) -> ReadyQueue {
        ReadyQueue {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Enqueues `id` at the back of the queue.
    ///
    /// Called only when a thread enters *Ready* (§4.2). Overflowing the
    /// queue indicates a scheduler bug — every slot can appear at most
    /// once, so the queue can never hold more than `capacity` entries —
    /// and is reported as a logic error rather than silently dropped.
    ///
    pub fn enqueue(&mut self, id: ThreadId) {
        assert!(
            self.entries.len() < self.capacity,
            "ready queue overflow: more than {} runnable threads",
            self.capacity
        );
        self.entries.push_back(id);
    }

    /// Dequeues and returns the identifier at the front of the queue, or
    /// `None` if the queue is empty.
    ///
    /// Called only by the scheduler (§4.2).
    ///
    pub fn dequeue(&mut self) -> Option<ThreadId> {
        self.entries.pop_front()
    }

    /// Returns whether the queue holds no entries.
    ///
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = ReadyQueue::new(4);
        assert!(q.is_empty());
        q.enqueue(ThreadId::new(1));
        q.enqueue(ThreadId::new(2));
        q.enqueue(ThreadId::new(3));
        assert_eq!(q.dequeue(), Some(ThreadId::new(1)));
        assert_eq!(q.dequeue(), Some(ThreadId::new(2)));
        q.enqueue(ThreadId::new(4));
        assert_eq!(q.dequeue(), Some(ThreadId::new(3)));
        assert_eq!(q.dequeue(), Some(ThreadId::new(4)));
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty());
    }

    #[test]
    #[should_panic(expected = "ready queue overflow")]
    fn overflow_panics() {
        let mut q = ReadyQueue::new(1);
        q.enqueue(ThreadId::new(1));
        q.enqueue(ThreadId::new(2));
    }
}
