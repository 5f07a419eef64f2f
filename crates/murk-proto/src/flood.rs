//! Output flood control accounting.
//!
//! The model: one unit of credit accrues per millisecond, up to
//! [`MAX_CREDIT`] (also the initial balance). Sending a message costs
//! `1000 + 10 * bytes`, plus a per-command surcharge for the commands
//! servers penalise. A message may only go on the wire while the full cost
//! is covered; otherwise it waits in the queue until enough credit has
//! accrued.
//!
//! [`SendQueue`] keeps the serialised bytes in a [`RingBuffer`] and a
//! parallel queue of per-message accounting, so a partially written message
//! can be charged its per-byte cost while the per-command cost stays owed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::message::{Message, MAX_MESSAGE_LEN};
use crate::ring::RingBuffer;

/// Credit ceiling, and the balance a fresh connection starts with.
pub const MAX_CREDIT: i64 = 10_000;

/// Per-message cost independent of length and command.
pub const BASE_COST: i64 = 1000;

/// Cost per byte on the wire.
pub const COST_PER_BYTE: i64 = 10;

/// Returns the extra surcharge some commands carry.
pub fn command_surcharge(command: &str) -> i64 {
    if command.eq_ignore_ascii_case("JOIN")
        || command.eq_ignore_ascii_case("NICK")
        || command.eq_ignore_ascii_case("PART")
        || command.eq_ignore_ascii_case("PING")
        || command.eq_ignore_ascii_case("USERHOST")
    {
        1000
    } else if command.eq_ignore_ascii_case("KICK")
        || command.eq_ignore_ascii_case("MODE")
        || command.eq_ignore_ascii_case("TOPIC")
    {
        2000
    } else if command.eq_ignore_ascii_case("WHO") {
        3000
    } else {
        0
    }
}

/// Millisecond-granularity token bucket.
#[derive(Debug)]
pub struct CreditBucket {
    credit: i64,
    updated: Instant,
}

impl CreditBucket {
    /// Creates a full bucket as of `now`.
    pub fn new(now: Instant) -> CreditBucket {
        CreditBucket {
            credit: MAX_CREDIT,
            updated: now,
        }
    }

    /// Accrues credit for the time elapsed since the last update.
    pub fn refill(&mut self, now: Instant) {
        if self.credit < MAX_CREDIT {
            let elapsed = now.saturating_duration_since(self.updated).as_millis();
            let gained = i64::try_from(elapsed).unwrap_or(MAX_CREDIT).min(MAX_CREDIT);
            self.credit = (self.credit + gained).min(MAX_CREDIT);
        }
        self.updated = now;
    }

    /// Current balance. May be negative while a partially charged message
    /// is in flight.
    pub fn credit(&self) -> i64 {
        self.credit
    }

    /// Deducts `cost` from the balance.
    pub fn debit(&mut self, cost: i64) {
        self.credit -= cost;
    }
}

#[derive(Debug)]
struct Pending {
    /// Bytes of this message still in the buffer.
    remaining: usize,
    /// Per-message cost component, owed until the last byte is written.
    message_cost: i64,
}

/// Flood-controlled write staging: serialised bytes plus cost accounting.
#[derive(Debug)]
pub struct SendQueue {
    buffer: RingBuffer,
    pending: VecDeque<Pending>,
}

impl Default for SendQueue {
    fn default() -> SendQueue {
        SendQueue::new()
    }
}

impl SendQueue {
    /// Creates an empty queue.
    pub fn new() -> SendQueue {
        SendQueue {
            buffer: RingBuffer::with_capacity(4096),
            pending: VecDeque::new(),
        }
    }

    /// Serialises `message` with its CR-LF delimiter into the queue and
    /// records its cost. Returns the number of wire bytes queued.
    ///
    /// Messages longer than the protocol maximum are truncated to fit.
    pub fn push(&mut self, message: &Message) -> usize {
        const MAX_CONTENT: usize = MAX_MESSAGE_LEN - 2;

        let mut line = Vec::with_capacity(64);
        message.write_to(&mut line);
        line.truncate(MAX_CONTENT);
        line.extend_from_slice(b"\r\n");

        self.buffer.write(&line);
        self.pending.push_back(Pending {
            remaining: line.len(),
            message_cost: BASE_COST + command_surcharge(&message.command),
        });
        line.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total bytes waiting in the buffer.
    pub fn queued_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Computes how many whole messages fit in `credit`, in bytes.
    pub fn affordable(&self, credit: i64) -> usize {
        let mut left = credit;
        let mut bytes = 0;
        for msg in &self.pending {
            let cost = COST_PER_BYTE * msg.remaining as i64 + msg.message_cost;
            if cost > left {
                break;
            }
            bytes += msg.remaining;
            left -= cost;
        }
        bytes
    }

    /// Views the first `n` queued bytes for writing.
    pub fn front(&self, n: usize) -> (&[u8], Option<&[u8]>) {
        self.buffer.front(n)
    }

    /// Accounts for `wrote` bytes having reached the socket: pops the
    /// bytes, debits complete messages in full, and debits only the
    /// per-byte cost of a trailing partial message.
    pub fn charge(&mut self, wrote: usize, bucket: &mut CreditBucket) {
        if wrote == 0 {
            return;
        }
        self.buffer.pop(wrote);

        let mut left = wrote;
        while left > 0 {
            let msg = self
                .pending
                .front_mut()
                .expect("charged more bytes than were queued");
            if msg.remaining <= left {
                left -= msg.remaining;
                bucket.debit(COST_PER_BYTE * msg.remaining as i64 + msg.message_cost);
                self.pending.pop_front();
            } else {
                msg.remaining -= left;
                bucket.debit(COST_PER_BYTE * left as i64);
                break;
            }
        }
    }

    /// Number of messages waiting in the queue.
    pub fn queued_messages(&self) -> usize {
        self.pending.len()
    }

    /// Returns how long until the head message becomes affordable, or
    /// `None` when the queue is empty. A zero duration means it is
    /// affordable now.
    pub fn debt(&self, bucket: &CreditBucket) -> Option<Duration> {
        let msg = self.pending.front()?;
        let cost = COST_PER_BYTE * msg.remaining as i64 + msg.message_cost;
        let debt = (cost - bucket.credit()).max(0);
        Some(Duration::from_millis(debt as u64))
    }

    /// Drops all queued bytes and accounting.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending.clear();
    }
}
