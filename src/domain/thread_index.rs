use crate::domain::{Message, MessageKind, SessionKey};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Per-thread memory of message ids already counted, so replayed pushes count once.
const SEEN_ID_CAPACITY: usize = 512;

/// Greatest `(timestamp, sequence)` seen for a thread. Absent fields compare lowest.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SeenPoint {
    pub timestamp_ms: Option<i64>,
    pub sequence: Option<u64>,
}

impl SeenPoint {
    pub fn of(message: &Message) -> Option<Self> {
        if message.timestamp_ms.is_none() && message.sequence.is_none() {
            return None;
        }
        Some(Self {
            timestamp_ms: message.timestamp_ms,
            sequence: message.sequence,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadSummary {
    pub key: SessionKey,
    pub count: usize,
    pub last_seen: Option<SeenPoint>,
    pub kind_histogram: BTreeMap<String, usize>,
    pub label: Option<String>,
    pub closed: bool,
    dialog_at_close: usize,
    seen: VecDeque<String>,
    seen_ids: HashSet<String>,
}

impl ThreadSummary {
    fn new(key: SessionKey) -> Self {
        Self {
            key,
            count: 0,
            last_seen: None,
            kind_histogram: BTreeMap::new(),
            label: None,
            closed: false,
            dialog_at_close: 0,
            seen: VecDeque::new(),
            seen_ids: HashSet::new(),
        }
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    /// Returns false when the id was already remembered.
    fn remember(&mut self, id: &str) -> bool {
        if id.is_empty() {
            return true;
        }
        if !self.seen_ids.insert(id.to_string()) {
            return false;
        }
        self.seen.push_back(id.to_string());
        while self.seen.len() > SEEN_ID_CAPACITY {
            if let Some(oldest) = self.seen.pop_front() {
                self.seen_ids.remove(&oldest);
            }
        }
        true
    }

    pub fn kind_count(&self, kind: &MessageKind) -> usize {
        self.kind_histogram.get(kind.tag()).copied().unwrap_or(0)
    }

    pub fn dialog_count(&self) -> usize {
        self.kind_count(&MessageKind::UserMessage) + self.kind_count(&MessageKind::AssistantMessage)
    }

    pub fn has_new_dialog_since_close(&self) -> bool {
        self.closed && self.dialog_count() > self.dialog_at_close
    }

    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or(self.key.as_str())
    }

    fn advance_last_seen(&mut self, point: Option<SeenPoint>) {
        if let Some(point) = point {
            if self.last_seen.is_none_or(|current| point > current) {
                self.last_seen = Some(point);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ThreadChange {
    pub created: bool,
    pub reopened: bool,
}

impl ThreadChange {
    pub fn is_visible(self) -> bool {
        self.created || self.reopened
    }
}

/// Thread metadata as reported by the server's thread listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadSnapshot {
    pub key: SessionKey,
    pub count: usize,
    pub last_seen: Option<SeenPoint>,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ThreadIndex {
    threads: BTreeMap<SessionKey, ThreadSummary>,
    synced_at: Option<Instant>,
}

impl ThreadIndex {
    pub fn get(&self, key: &SessionKey) -> Option<&ThreadSummary> {
        self.threads.get(key)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Ensures a thread exists without counting anything against it.
    pub fn touch(&mut self, key: &SessionKey) -> bool {
        if self.threads.contains_key(key) {
            return false;
        }
        self.threads
            .insert(key.clone(), ThreadSummary::new(key.clone()));
        true
    }

    /// Counts a newly seen message. Updates and ephemeral kinds only ensure the thread exists.
    pub fn record(&mut self, message: &Message) -> ThreadChange {
        let created = self.touch(&message.session_key);
        let mut change = ThreadChange {
            created,
            reopened: false,
        };
        if message.is_update() || message.kind.is_ephemeral() {
            return change;
        }

        let Some(thread) = self.threads.get_mut(&message.session_key) else {
            return change;
        };
        if !thread.remember(&message.id) {
            thread.advance_last_seen(SeenPoint::of(message));
            return change;
        }
        thread.count += 1;
        *thread
            .kind_histogram
            .entry(message.kind.tag().to_string())
            .or_insert(0) += 1;
        thread.advance_last_seen(SeenPoint::of(message));

        if thread.has_new_dialog_since_close() {
            thread.closed = false;
            change.reopened = true;
        }
        change
    }

    /// Advances recency from pulled messages without touching counts. The id is remembered so a
    /// later push of the same message is not counted either.
    pub fn observe(&mut self, message: &Message) -> bool {
        let created = self.touch(&message.session_key);
        if !message.is_update() && !message.kind.is_ephemeral() {
            if let Some(thread) = self.threads.get_mut(&message.session_key) {
                thread.remember(&message.id);
                thread.advance_last_seen(SeenPoint::of(message));
            }
        }
        created
    }

    pub fn close(&mut self, key: &SessionKey) -> bool {
        let Some(thread) = self.threads.get_mut(key) else {
            return false;
        };
        thread.closed = true;
        thread.dialog_at_close = thread.dialog_count();
        true
    }

    pub fn reopen(&mut self, key: &SessionKey) -> bool {
        let Some(thread) = self.threads.get_mut(key) else {
            return false;
        };
        let was_closed = thread.closed;
        thread.closed = false;
        was_closed
    }

    pub fn set_label(&mut self, key: &SessionKey, label: Option<String>) {
        self.touch(key);
        if let Some(thread) = self.threads.get_mut(key) {
            thread.label = label.filter(|label| !label.trim().is_empty());
        }
    }

    /// Most recent first; threads without any ordering data come last, by key.
    pub fn threads_by_recency(&self) -> Vec<&ThreadSummary> {
        let mut threads = self.threads.values().collect::<Vec<_>>();
        threads.sort_by(|a, b| compare_recency(a, b));
        threads
    }

    pub fn visible_threads(&self) -> Vec<&ThreadSummary> {
        self.threads_by_recency()
            .into_iter()
            .filter(|thread| !thread.closed)
            .collect()
    }

    /// Server counts replace local ones; closed flags and local-only threads survive.
    pub fn apply_snapshot(&mut self, snapshots: Vec<ThreadSnapshot>, now: Instant) -> usize {
        let mut created = 0usize;
        for snapshot in snapshots {
            if self.touch(&snapshot.key) {
                created += 1;
            }
            let Some(thread) = self.threads.get_mut(&snapshot.key) else {
                continue;
            };
            thread.count = snapshot.count.max(thread.count);
            thread.advance_last_seen(snapshot.last_seen);
            if snapshot.label.is_some() {
                thread.label = snapshot.label;
            }
        }
        self.synced_at = Some(now);
        created
    }

    pub fn needs_sync(&self, now: Instant, ttl: Duration) -> bool {
        match self.synced_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= ttl,
        }
    }

    pub fn invalidate_sync(&mut self) {
        self.synced_at = None;
    }

    pub fn mark_synced(&mut self, now: Instant) {
        self.synced_at = Some(now);
    }
}

fn compare_recency(a: &ThreadSummary, b: &ThreadSummary) -> Ordering {
    match (a.last_seen, b.last_seen) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.key.cmp(&b.key)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.key.cmp(&b.key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, session: &str, kind: MessageKind, ts: Option<i64>) -> Message {
        let mut message = Message::new(id, SessionKey::from(session), kind);
        message.timestamp_ms = ts;
        message
    }

    #[test]
    fn records_counts_histogram_and_last_seen() {
        let mut index = ThreadIndex::default();
        let change = index.record(&msg("a", "s1", MessageKind::UserMessage, Some(10)));
        assert!(change.created);
        index.record(&msg("b", "s1", MessageKind::AssistantMessage, Some(30)));
        index.record(&msg("c", "s1", MessageKind::ToolCall, Some(20)));

        let thread = index.get(&SessionKey::from("s1")).expect("thread");
        assert_eq!(thread.count, 3);
        assert_eq!(thread.kind_count(&MessageKind::ToolCall), 1);
        assert_eq!(thread.last_seen.and_then(|p| p.timestamp_ms), Some(30));
    }

    #[test]
    fn repeated_ids_count_once() {
        let mut index = ThreadIndex::default();
        let key = SessionKey::from("s9");
        index.record(&msg("m1", "s9", MessageKind::AssistantMessage, Some(10)));
        index.record(&msg("m1", "s9", MessageKind::AssistantMessage, Some(10)));
        assert_eq!(index.get(&key).map(|t| t.count), Some(1));
        assert_eq!(
            index.get(&key).map(|t| t.kind_count(&MessageKind::AssistantMessage)),
            Some(1)
        );

        index.observe(&msg("p1", "s9", MessageKind::UserMessage, Some(20)));
        index.record(&msg("p1", "s9", MessageKind::UserMessage, Some(20)));
        let thread = index.get(&key).expect("thread");
        assert_eq!(thread.count, 1);
        assert!(thread.has_seen("p1"));
        assert_eq!(thread.last_seen.and_then(|p| p.timestamp_ms), Some(20));
    }

    #[test]
    fn updates_and_gates_do_not_move_count_or_recency() {
        let mut index = ThreadIndex::default();
        index.record(&msg("a", "s1", MessageKind::AssistantMessage, Some(10)));
        let before = index.get(&SessionKey::from("s1")).cloned().expect("thread");

        index.record(&msg("a", "s1", MessageKind::AssistantMessage, Some(99)).as_update());
        index.record(&msg("g", "s1", MessageKind::ToolGate, Some(100)));

        let after = index.get(&SessionKey::from("s1")).expect("thread");
        assert_eq!(after.count, before.count);
        assert_eq!(after.last_seen, before.last_seen);
    }

    #[test]
    fn closed_thread_reopens_only_on_new_dialog() {
        let mut index = ThreadIndex::default();
        let key = SessionKey::from("s1");
        index.record(&msg("a", "s1", MessageKind::UserMessage, Some(1)));
        assert!(index.close(&key));

        let change = index.record(&msg("t", "s1", MessageKind::ToolOutput, Some(2)));
        assert!(!change.reopened);
        assert!(index.get(&key).expect("thread").closed);
        assert!(index.visible_threads().is_empty());

        let change = index.record(&msg("b", "s1", MessageKind::AssistantMessage, Some(3)));
        assert!(change.reopened);
        assert!(!index.get(&key).expect("thread").closed);
    }

    #[test]
    fn snapshot_merge_keeps_local_flags_and_tracks_sync() {
        let mut index = ThreadIndex::default();
        let now = Instant::now();
        let ttl = Duration::from_secs(60);
        assert!(index.needs_sync(now, ttl));

        index.record(&msg("a", "s1", MessageKind::UserMessage, Some(5)));
        index.close(&SessionKey::from("s1"));
        let created = index.apply_snapshot(
            vec![
                ThreadSnapshot {
                    key: SessionKey::from("s1"),
                    count: 12,
                    last_seen: Some(SeenPoint {
                        timestamp_ms: Some(50),
                        sequence: None,
                    }),
                    label: Some("Refactor".to_string()),
                },
                ThreadSnapshot {
                    key: SessionKey::from("s2"),
                    count: 1,
                    last_seen: None,
                    label: None,
                },
            ],
            now,
        );
        assert_eq!(created, 1);
        let s1 = index.get(&SessionKey::from("s1")).expect("thread");
        assert_eq!(s1.count, 12);
        assert!(s1.closed);
        assert_eq!(s1.display_label(), "Refactor");
        assert!(!index.needs_sync(now, ttl));

        index.invalidate_sync();
        assert!(index.needs_sync(now, ttl));
    }

    #[test]
    fn recency_puts_threads_without_data_last() {
        let mut index = ThreadIndex::default();
        index.touch(&SessionKey::from("idle"));
        index.record(&msg("a", "old", MessageKind::UserMessage, Some(1)));
        index.record(&msg("b", "new", MessageKind::UserMessage, Some(9)));
        let keys = index
            .threads_by_recency()
            .into_iter()
            .map(|thread| thread.key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["new", "old", "idle"]);
    }
}
