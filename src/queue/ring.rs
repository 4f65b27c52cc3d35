//! Per-sender bounded FIFO ring.
//!
//! Each sender with pending work owns exactly one ring. Capacity is a power
//! of two fixed at creation, so wrap-around indexing is a bitmask. Rings are
//! chained into the queue's bucket table through the `next` link; the chain
//! owns its nodes, and unlinking a drained ring transfers that ownership back
//! to the caller for disposal.

use std::time::Instant;

use crate::types::{ChatId, SenderId};

/// A message queued for a worker, stamped at ingress.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// The sender the message is keyed by.
    pub sender: SenderId,

    /// The chat the reply must go to.
    pub chat: ChatId,

    /// Message text, truncated to the slot limit at push time.
    pub text: String,

    /// Monotonic instant the message entered the queue. Workers pace replies
    /// against this.
    pub ingress: Instant,
}

/// A FIFO ring for one sender, chained into a queue bucket.
pub(super) struct UserRing {
    pub(super) sender: SenderId,
    slots: Box<[Option<QueuedMessage>]>,
    head: usize,
    tail: usize,
    count: usize,
    mask: usize,
    pub(super) next: Option<Box<UserRing>>,
}

impl UserRing {
    /// Creates an empty ring with the given power-of-two capacity, prepended
    /// onto `next`.
    pub(super) fn new(sender: SenderId, cap: usize, next: Option<Box<UserRing>>) -> Self {
        debug_assert!(cap.is_power_of_two());
        UserRing {
            sender,
            slots: (0..cap).map(|_| None).collect(),
            head: 0,
            tail: 0,
            count: 0,
            mask: cap - 1,
            next,
        }
    }

    pub(super) fn count(&self) -> usize {
        self.count
    }

    pub(super) fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub(super) fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Appends a message at the tail. Callers check `is_full` first.
    pub(super) fn push_back(&mut self, msg: QueuedMessage) {
        debug_assert!(!self.is_full());
        self.slots[self.tail] = Some(msg);
        self.tail = (self.tail + 1) & self.mask;
        self.count += 1;
    }

    /// Removes and returns the oldest message, if any.
    pub(super) fn pop_front(&mut self) -> Option<QueuedMessage> {
        let msg = self.slots[self.head].take()?;
        self.head = (self.head + 1) & self.mask;
        self.count -= 1;
        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: i64) -> QueuedMessage {
        QueuedMessage {
            sender: SenderId(1),
            chat: ChatId(1),
            text: format!("msg {n}"),
            ingress: Instant::now(),
        }
    }

    #[test]
    fn fifo_order_across_wraparound() {
        let mut ring = UserRing::new(SenderId(1), 4, None);
        for n in 0..3 {
            ring.push_back(msg(n));
        }
        assert_eq!(ring.pop_front().unwrap().text, "msg 0");
        assert_eq!(ring.pop_front().unwrap().text, "msg 1");
        // head and tail have advanced past the midpoint; the next pushes wrap
        for n in 3..6 {
            ring.push_back(msg(n));
        }
        for n in 2..6 {
            assert_eq!(ring.pop_front().unwrap().text, format!("msg {n}"));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn fills_to_exact_capacity() {
        let mut ring = UserRing::new(SenderId(1), 4, None);
        for n in 0..4 {
            assert!(!ring.is_full());
            ring.push_back(msg(n));
        }
        assert!(ring.is_full());
        assert_eq!(ring.count(), 4);
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let mut ring = UserRing::new(SenderId(1), 8, None);
        assert!(ring.pop_front().is_none());
        ring.push_back(msg(0));
        assert!(ring.pop_front().is_some());
        assert!(ring.pop_front().is_none());
    }
}
