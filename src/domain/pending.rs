use crate::domain::Message;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_PENDING_CAPACITY: usize = 5_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PushOutcome {
    Queued,
    /// The queue is no longer trustworthy; the caller must re-pull instead of replaying.
    Overflowed,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Drained {
    pub events: Vec<Message>,
    pub overflowed: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlushBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for FlushBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(25),
            max: Duration::from_millis(800),
        }
    }
}

/// Stream events held back while a snapshot refresh is in flight, in receipt order.
#[derive(Clone, Debug)]
pub struct PendingBuffer {
    events: VecDeque<Message>,
    capacity: usize,
    overflowed: bool,
    backoff: FlushBackoff,
    delay: Duration,
    next_flush_at: Option<Instant>,
}

impl Default for PendingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY, FlushBackoff::default())
    }
}

impl PendingBuffer {
    pub fn new(capacity: usize, backoff: FlushBackoff) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            overflowed: false,
            backoff,
            delay: backoff.initial,
            next_flush_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn has_work(&self) -> bool {
        self.overflowed || !self.events.is_empty()
    }

    /// Once overflowed, everything is discarded until the next drain.
    pub fn push(&mut self, event: Message) -> PushOutcome {
        if self.overflowed {
            return PushOutcome::Overflowed;
        }
        if self.events.len() >= self.capacity {
            self.events.clear();
            self.overflowed = true;
            return PushOutcome::Overflowed;
        }
        self.events.push_back(event);
        PushOutcome::Queued
    }

    pub fn flush_due(&self, now: Instant) -> bool {
        self.has_work() && self.next_flush_at.is_none_or(|at| now >= at)
    }

    /// The refresh is still running: poll again later, backing off.
    pub fn defer(&mut self, now: Instant) {
        self.next_flush_at = Some(now + self.delay);
        self.delay = (self.delay * 2).min(self.backoff.max);
    }

    pub fn drain(&mut self) -> Drained {
        let drained = Drained {
            events: self.events.drain(..).collect(),
            overflowed: self.overflowed,
        };
        self.overflowed = false;
        self.delay = self.backoff.initial;
        self.next_flush_at = None;
        drained
    }
}
