//! Fair, bounded, sender-keyed message queue.
//!
//! Producers (the update handler and command handlers) push messages keyed by
//! sender; consumers (the worker pool) pop them. One ring per sender bounds
//! how much backlog a single sender can build up, and the pop path rotates
//! across the bucket table so one chatty sender cannot starve the rest.
//!
//! # Fairness
//!
//! Rings live in a 64-bucket hash table with chained collision handling.
//! `pop` scans buckets starting at a round-robin cursor and serves the first
//! non-empty ring it meets, then advances the cursor past the served bucket.
//! A sender is never served twice in a row while another bucket has pending
//! work; senders that collide into the same bucket are served in chain order,
//! which is acceptable because the 64-bit finalizer makes collisions rare.
//!
//! # Lifecycle
//!
//! Rings are created lazily on the first push for a sender and freed the
//! moment a pop drains them, so memory tracks the number of concurrently
//! pending senders rather than the number of senders ever seen.
//!
//! # Shutdown
//!
//! `shutdown` wakes every blocked popper. Poppers keep draining whatever is
//! queued and only see [`PopError::Closed`] once the queue is empty. Pushes
//! are still accepted after shutdown; the flag gates popper wakeups only.

mod ring;

pub use ring::QueuedMessage;

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Instant;

use thiserror::Error;

use crate::types::{ChatId, SenderId};

use ring::UserRing;

/// Number of buckets in the ring table. Power of two for mask indexing.
const BUCKET_COUNT: usize = 64;
const BUCKET_MASK: usize = BUCKET_COUNT - 1;

/// Maximum payload bytes kept per message; longer texts are truncated.
pub const TEXT_MAX: usize = 1023;

/// Smallest and largest permissible per-sender ring capacity.
const RING_CAP_MIN: usize = 4;
const RING_CAP_MAX: usize = 256;

/// Error returned by [`MessageQueue::push`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    /// The sender's ring is at capacity; the new message is dropped.
    #[error("ring full for sender {0}, message dropped")]
    QueueFull(SenderId),
}

/// Error returned by [`MessageQueue::pop`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PopError {
    /// The queue has shut down and every ring is drained.
    #[error("queue closed")]
    Closed,
}

struct QueueInner {
    buckets: Vec<Option<Box<UserRing>>>,
    total_pending: usize,
    rr_bucket: usize,
    ring_cap: usize,
    shutdown: bool,
}

/// Multi-producer/multi-consumer queue of per-sender rings.
pub struct MessageQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl MessageQueue {
    /// Creates a queue whose per-sender rings hold `ring_size` messages,
    /// rounded up to the next power of two and clamped to [4, 256].
    pub fn new(ring_size: usize) -> Self {
        let ring_cap = ring_size.clamp(RING_CAP_MIN, RING_CAP_MAX).next_power_of_two();
        MessageQueue {
            inner: Mutex::new(QueueInner {
                buckets: (0..BUCKET_COUNT).map(|_| None).collect(),
                total_pending: 0,
                rr_bucket: 0,
                ring_cap,
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueues a message for `sender`, stamping it with the current
    /// monotonic instant. Text beyond [`TEXT_MAX`] bytes is truncated on a
    /// character boundary.
    ///
    /// Drop-newest policy: a full ring rejects the message rather than
    /// displacing one already queued.
    pub fn push(&self, sender: SenderId, chat: ChatId, text: &str) -> Result<(), PushError> {
        let msg = QueuedMessage {
            sender,
            chat,
            text: truncate_on_char_boundary(text, TEXT_MAX).to_string(),
            ingress: Instant::now(),
        };

        let mut inner = self.lock();
        let idx = bucket_index(sender);
        let cap = inner.ring_cap;

        let chain = &mut inner.buckets[idx];
        if find_ring(chain, sender).is_none() {
            let rest = chain.take();
            *chain = Some(Box::new(UserRing::new(sender, cap, rest)));
        }
        // Either found above or just prepended at the chain head.
        let ring = find_ring(chain, sender).expect("ring exists after ensure");

        if ring.is_full() {
            return Err(PushError::QueueFull(sender));
        }
        ring.push_back(msg);
        inner.total_pending += 1;

        self.available.notify_one();
        Ok(())
    }

    /// Blocks until a message is available or the queue shuts down empty.
    ///
    /// During shutdown the queue keeps handing out whatever is still queued;
    /// [`PopError::Closed`] is only returned once `depth() == 0`.
    pub fn pop(&self) -> Result<QueuedMessage, PopError> {
        let mut inner = self.lock();
        loop {
            if inner.total_pending > 0 {
                if let Some(msg) = inner.pop_any() {
                    return Ok(msg);
                }
            }
            if inner.shutdown {
                return Err(PopError::Closed);
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Signals shutdown and wakes every blocked popper. Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.shutdown = true;
        self.available.notify_all();
    }

    /// Total messages pending across all rings.
    pub fn depth(&self) -> usize {
        self.lock().total_pending
    }

    /// Number of live rings (senders with pending work).
    pub fn ring_count(&self) -> usize {
        let inner = self.lock();
        inner
            .buckets
            .iter()
            .map(|chain| {
                let mut n = 0;
                let mut cur = chain;
                while let Some(r) = cur {
                    n += 1;
                    cur = &r.next;
                }
                n
            })
            .sum()
    }

    /// Effective per-sender capacity after rounding.
    pub fn ring_capacity(&self) -> usize {
        self.lock().ring_cap
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        // A panic in another producer must not wedge the dispatch core; the
        // inner state stays consistent because every mutation is completed
        // before the guard drops.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueueInner {
    /// Pops the head of the first non-empty ring, scanning buckets from the
    /// round-robin cursor. Advances the cursor to the bucket after the one
    /// served and frees the ring if it drained.
    fn pop_any(&mut self) -> Option<QueuedMessage> {
        let start = self.rr_bucket;
        for step in 0..BUCKET_COUNT {
            let idx = (start + step) & BUCKET_MASK;
            if let Some(msg) = pop_chain(&mut self.buckets[idx]) {
                self.total_pending -= 1;
                self.rr_bucket = (idx + 1) & BUCKET_MASK;
                return Some(msg);
            }
        }
        None
    }
}

/// Pops from the first ring in the chain with pending messages, unlinking
/// and dropping it when the pop drains it.
fn pop_chain(chain: &mut Option<Box<UserRing>>) -> Option<QueuedMessage> {
    match chain {
        None => None,
        Some(ring) if ring.count() > 0 => {
            let msg = ring.pop_front();
            if ring.is_empty() {
                if let Some(drained) = chain.take() {
                    *chain = drained.next;
                }
            }
            msg
        }
        Some(ring) => pop_chain(&mut ring.next),
    }
}

/// Walks the chain for the sender's ring.
fn find_ring(chain: &mut Option<Box<UserRing>>, sender: SenderId) -> Option<&mut UserRing> {
    let mut cur = chain;
    while let Some(ring) = cur {
        if ring.sender == sender {
            return Some(ring.as_mut());
        }
        cur = &mut ring.next;
    }
    None
}

/// Maps a sender id onto a bucket with the MurmurHash3 fmix64 finalizer.
/// Two xor-shift-multiply rounds give a good mix of the low bits even for
/// sequential ids.
pub(crate) fn bucket_index(sender: SenderId) -> usize {
    let mut h = sender.0 as u64;
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    (h as usize) & BUCKET_MASK
}

/// Truncates `text` to at most `max` bytes without splitting a UTF-8
/// character.
fn truncate_on_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn push_ok(q: &MessageQueue, sender: i64, text: &str) {
        q.push(SenderId(sender), ChatId(sender), text).unwrap();
    }

    /// Picks `n` sender ids that land in pairwise distinct buckets so
    /// fairness assertions are not confused by chain collisions.
    fn distinct_bucket_senders(n: usize) -> Vec<SenderId> {
        let mut picked = Vec::new();
        let mut used = std::collections::HashSet::new();
        for candidate in 1..10_000 {
            let sender = SenderId(candidate);
            if used.insert(bucket_index(sender)) {
                picked.push(sender);
                if picked.len() == n {
                    break;
                }
            }
        }
        assert_eq!(picked.len(), n);
        picked
    }

    // ─── Capacity and rounding ───

    #[test]
    fn ring_size_rounds_up_to_power_of_two() {
        assert_eq!(MessageQueue::new(30).ring_capacity(), 32);
        assert_eq!(MessageQueue::new(4).ring_capacity(), 4);
        assert_eq!(MessageQueue::new(5).ring_capacity(), 8);
        assert_eq!(MessageQueue::new(0).ring_capacity(), 4);
        assert_eq!(MessageQueue::new(1000).ring_capacity(), 256);
    }

    #[test]
    fn fifth_push_on_ring_of_four_is_rejected() {
        let q = MessageQueue::new(4);
        for n in 0..4 {
            push_ok(&q, 42, &format!("msg {n}"));
        }
        assert_eq!(
            q.push(SenderId(42), ChatId(42), "msg 4"),
            Err(PushError::QueueFull(SenderId(42)))
        );
        for n in 0..4 {
            assert_eq!(q.pop().unwrap().text, format!("msg {n}"));
        }
        // Ring drained and freed; a new push starts a fresh ring.
        push_ok(&q, 42, "msg 5");
        assert_eq!(q.pop().unwrap().text, "msg 5");
    }

    // ─── FIFO and fairness ───

    #[test]
    fn per_sender_fifo_is_strict() {
        let q = MessageQueue::new(8);
        for n in 0..5 {
            push_ok(&q, 7, &format!("m{n}"));
        }
        for n in 0..5 {
            assert_eq!(q.pop().unwrap().text, format!("m{n}"));
        }
    }

    #[test]
    fn three_senders_rotate_fairly() {
        let senders = distinct_bucket_senders(3);
        let q = MessageQueue::new(8);
        for round in 0..3 {
            for s in &senders {
                q.push(*s, ChatId(s.0), &format!("r{round}")).unwrap();
            }
        }

        // Every block of three pops serves all three senders exactly once,
        // and each sender's own messages come out in push order.
        let mut seen: HashMap<i64, Vec<String>> = HashMap::new();
        for block in 0..3 {
            let mut block_senders = std::collections::HashSet::new();
            for _ in 0..3 {
                let msg = q.pop().unwrap();
                block_senders.insert(msg.sender.0);
                seen.entry(msg.sender.0).or_default().push(msg.text);
            }
            assert_eq!(block_senders.len(), 3, "block {block} repeated a sender");
        }
        for s in &senders {
            assert_eq!(seen[&s.0], vec!["r0", "r1", "r2"]);
        }
    }

    #[test]
    fn lone_sender_is_served_consecutively() {
        let q = MessageQueue::new(8);
        push_ok(&q, 5, "a");
        push_ok(&q, 5, "b");
        assert_eq!(q.pop().unwrap().text, "a");
        assert_eq!(q.pop().unwrap().text, "b");
    }

    // ─── Accounting invariants ───

    #[test]
    fn depth_tracks_sum_of_ring_counts() {
        let senders = distinct_bucket_senders(2);
        let q = MessageQueue::new(4);
        assert_eq!(q.depth(), 0);
        q.push(senders[0], ChatId(1), "x").unwrap();
        q.push(senders[0], ChatId(1), "y").unwrap();
        q.push(senders[1], ChatId(2), "z").unwrap();
        assert_eq!(q.depth(), 3);
        assert_eq!(q.ring_count(), 2);
        q.pop().unwrap();
        assert_eq!(q.depth(), 2);
        q.pop().unwrap();
        q.pop().unwrap();
        assert_eq!(q.depth(), 0);
        assert_eq!(q.ring_count(), 0, "drained rings must be freed");
    }

    #[test]
    fn drained_ring_is_unlinked_even_with_chain_collision() {
        // Force two senders into the same bucket by scanning for a collision.
        let mut by_bucket: HashMap<usize, Vec<i64>> = HashMap::new();
        let (a, b) = 'found: {
            for candidate in 1..100_000i64 {
                let ids = by_bucket.entry(bucket_index(SenderId(candidate))).or_default();
                ids.push(candidate);
                if ids.len() == 2 {
                    break 'found (ids[0], ids[1]);
                }
            }
            unreachable!("64 buckets must collide within 100k ids");
        };

        let q = MessageQueue::new(4);
        push_ok(&q, a, "from a");
        push_ok(&q, b, "from b");
        assert_eq!(q.ring_count(), 2);
        q.pop().unwrap();
        assert_eq!(q.ring_count(), 1);
        q.pop().unwrap();
        assert_eq!(q.ring_count(), 0);
    }

    // ─── Truncation ───

    #[test]
    fn oversized_text_is_truncated_to_limit() {
        let q = MessageQueue::new(4);
        let long = "x".repeat(2000);
        push_ok(&q, 1, &long);
        assert_eq!(q.pop().unwrap().text.len(), TEXT_MAX);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; position the boundary mid-character.
        let text = format!("{}é", "a".repeat(TEXT_MAX - 1));
        assert_eq!(text.len(), TEXT_MAX + 1);
        let q = MessageQueue::new(4);
        push_ok(&q, 1, &text);
        let popped = q.pop().unwrap().text;
        assert_eq!(popped.len(), TEXT_MAX - 1);
        assert!(popped.chars().all(|c| c == 'a'));
    }

    // ─── Shutdown semantics ───

    #[test]
    fn pop_drains_pending_before_reporting_closed() {
        let q = MessageQueue::new(4);
        push_ok(&q, 1, "last words");
        q.shutdown();
        assert_eq!(q.pop().unwrap().text, "last words");
        assert_eq!(q.pop(), Err(PopError::Closed));
    }

    #[test]
    fn push_after_shutdown_is_accepted() {
        let q = MessageQueue::new(4);
        q.shutdown();
        push_ok(&q, 1, "late");
        assert_eq!(q.pop().unwrap().text, "late");
        assert_eq!(q.pop(), Err(PopError::Closed));
    }

    #[test]
    fn double_shutdown_is_a_no_op() {
        let q = MessageQueue::new(4);
        q.shutdown();
        q.shutdown();
        assert_eq!(q.pop(), Err(PopError::Closed));
    }

    #[test]
    fn shutdown_wakes_blocked_poppers() {
        let q = Arc::new(MessageQueue::new(4));
        let popper = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.pop())
        };
        // Give the popper time to block on the condvar.
        std::thread::sleep(Duration::from_millis(50));
        q.shutdown();
        assert_eq!(popper.join().unwrap(), Err(PopError::Closed));
    }

    #[test]
    fn concurrent_producers_and_consumers_deliver_everything() {
        let q = Arc::new(MessageQueue::new(64));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for n in 0..50 {
                        q.push(SenderId(p + 1), ChatId(p + 1), &format!("{n}")).unwrap();
                    }
                })
            })
            .collect();
        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                let mut got: HashMap<i64, Vec<u32>> = HashMap::new();
                while let Ok(msg) = q.pop() {
                    got.entry(msg.sender.0).or_default().push(msg.text.parse().unwrap());
                }
                got
            })
        };
        for p in producers {
            p.join().unwrap();
        }
        q.shutdown();
        let got = consumer.join().unwrap();
        for p in 1..=4i64 {
            assert_eq!(got[&p], (0..50).collect::<Vec<_>>(), "sender {p} out of order");
        }
    }

    // ─── Property tests ───

    proptest! {
        /// Pop order per sender is always a prefix of push order.
        #[test]
        fn prop_pop_sequence_is_push_prefix(
            ops in proptest::collection::vec((0i64..5, 0u32..100), 1..200)
        ) {
            let q = MessageQueue::new(256);
            let mut pushed: HashMap<i64, Vec<u32>> = HashMap::new();
            for (s, n) in &ops {
                let sender = *s + 1;
                if q.push(SenderId(sender), ChatId(sender), &n.to_string()).is_ok() {
                    pushed.entry(sender).or_default().push(*n);
                }
            }

            let mut popped: HashMap<i64, Vec<u32>> = HashMap::new();
            q.shutdown();
            while let Ok(msg) = q.pop() {
                popped.entry(msg.sender.0).or_default().push(msg.text.parse().unwrap());
            }

            for (sender, seq) in &popped {
                prop_assert_eq!(&pushed[sender], seq);
            }
        }

        /// depth() equals the sum of ring counts after any push/pop mix.
        #[test]
        fn prop_depth_equals_pushes_minus_pops(
            pushes in 0usize..40,
            pops in 0usize..40,
        ) {
            let q = MessageQueue::new(256);
            for n in 0..pushes {
                q.push(SenderId((n % 3 + 1) as i64), ChatId(1), "m").unwrap();
            }
            q.shutdown();
            let mut popped = 0;
            for _ in 0..pops {
                if q.pop().is_ok() {
                    popped += 1;
                }
            }
            prop_assert_eq!(q.depth(), pushes - popped);
        }
    }
}
