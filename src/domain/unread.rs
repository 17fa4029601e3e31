use crate::domain::{MessageKind, SessionKey, ThreadIndex};
use std::collections::{BTreeMap, HashSet, VecDeque};

pub const DEFAULT_UNREAD_CAPACITY: usize = 200;

/// Consumed ids are remembered this many times the queue capacity, so replays cannot re-add them.
const RETIRED_FACTOR: usize = 4;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnreadItem {
    pub id: String,
    pub kind: MessageKind,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MarkOutcome {
    pub added: bool,
    /// Oldest entries pushed out by the capacity bound.
    pub dropped: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnreadSummary {
    pub key: SessionKey,
    pub label: String,
    pub count: usize,
}

#[derive(Clone, Debug, Default)]
struct SessionUnread {
    count: usize,
    queue: VecDeque<UnreadItem>,
    ids: HashSet<String>,
    retired: VecDeque<String>,
    retired_ids: HashSet<String>,
}

impl SessionUnread {
    fn knows(&self, id: &str) -> bool {
        self.ids.contains(id) || self.retired_ids.contains(id)
    }

    fn pop_front(&mut self, retired_capacity: usize) -> Option<UnreadItem> {
        let item = self.queue.pop_front()?;
        self.ids.remove(&item.id);
        self.count = self.count.saturating_sub(1);
        self.retire(item.id.clone(), retired_capacity);
        Some(item)
    }

    fn retire(&mut self, id: String, retired_capacity: usize) {
        if !self.retired_ids.insert(id.clone()) {
            return;
        }
        self.retired.push_back(id);
        while self.retired.len() > retired_capacity {
            if let Some(oldest) = self.retired.pop_front() {
                self.retired_ids.remove(&oldest);
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct UnreadLedger {
    sessions: BTreeMap<SessionKey, SessionUnread>,
    capacity: usize,
}

impl Default for UnreadLedger {
    fn default() -> Self {
        Self::new(DEFAULT_UNREAD_CAPACITY)
    }
}

impl UnreadLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn retired_capacity(&self) -> usize {
        self.capacity.saturating_mul(RETIRED_FACTOR)
    }

    /// Queues a jumpable notification. Ids already queued or already consumed are ignored.
    pub fn mark_unread(&mut self, key: &SessionKey, id: &str, kind: MessageKind) -> MarkOutcome {
        if id.is_empty() {
            return MarkOutcome::default();
        }
        let retired_capacity = self.retired_capacity();
        let capacity = self.capacity;
        let session = self.sessions.entry(key.clone()).or_default();
        if session.knows(id) {
            return MarkOutcome::default();
        }

        session.ids.insert(id.to_string());
        session.queue.push_back(UnreadItem {
            id: id.to_string(),
            kind,
        });
        session.count += 1;

        let mut dropped = 0usize;
        while session.queue.len() > capacity {
            if session.pop_front(retired_capacity).is_none() {
                break;
            }
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(
                event = "unread_overflow",
                session = %key,
                dropped
            );
        }
        debug_assert_eq!(session.count, session.queue.len());

        MarkOutcome {
            added: true,
            dropped,
        }
    }

    /// Pops oldest-first until an entry resolves; unresolvable entries are stale and discarded.
    pub fn consume(
        &mut self,
        key: &SessionKey,
        is_resolvable: impl Fn(&str) -> bool,
    ) -> Option<UnreadItem> {
        let retired_capacity = self.retired_capacity();
        let session = self.sessions.get_mut(key)?;
        while let Some(item) = session.pop_front(retired_capacity) {
            if is_resolvable(&item.id) {
                return Some(item);
            }
            tracing::debug!(event = "unread_stale", session = %key, id = %item.id);
        }
        None
    }

    pub fn peek(&self, key: &SessionKey) -> Option<&UnreadItem> {
        self.sessions.get(key).and_then(|s| s.queue.front())
    }

    pub fn contains(&self, key: &SessionKey, id: &str) -> bool {
        self.sessions.get(key).is_some_and(|s| s.ids.contains(id))
    }

    /// "Mark session read": every queued id is retired. Returns how many were cleared.
    pub fn clear_session(&mut self, key: &SessionKey) -> usize {
        let retired_capacity = self.retired_capacity();
        let Some(session) = self.sessions.get_mut(key) else {
            return 0;
        };
        let mut cleared = 0usize;
        while session.pop_front(retired_capacity).is_some() {
            cleared += 1;
        }
        cleared
    }

    pub fn count(&self, key: &SessionKey) -> usize {
        self.sessions.get(key).map_or(0, |s| s.count)
    }

    pub fn total(&self) -> usize {
        self.sessions.values().map(|s| s.count).sum()
    }

    /// Sessions with outstanding items, most recently active thread first.
    pub fn summaries(&self, threads: &ThreadIndex) -> Vec<UnreadSummary> {
        let mut summaries = Vec::new();
        for thread in threads.threads_by_recency() {
            let count = self.count(&thread.key);
            if count > 0 {
                summaries.push(UnreadSummary {
                    key: thread.key.clone(),
                    label: thread.display_label().to_string(),
                    count,
                });
            }
        }
        for (key, session) in &self.sessions {
            if session.count > 0 && threads.get(key).is_none() {
                summaries.push(UnreadSummary {
                    key: key.clone(),
                    label: key.to_string(),
                    count: session.count,
                });
            }
        }
        summaries
    }
}
