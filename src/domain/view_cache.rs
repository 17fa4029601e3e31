use crate::domain::{Message, SessionKey, ViewKey, insertion_index};
use std::collections::{HashMap, VecDeque};

pub const DEFAULT_VIEW_MAX: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScrollPosition {
    pub offset: usize,
    pub pinned_to_bottom: bool,
}

impl Default for ScrollPosition {
    fn default() -> Self {
        Self {
            offset: 0,
            pinned_to_bottom: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    Inserted { position: usize },
    /// Same id already held; content replaced, row identity kept.
    Replaced { position: usize },
}

#[derive(Clone, Debug)]
pub struct ViewEntry {
    key: ViewKey,
    messages: Vec<Message>,
    by_id: HashMap<String, usize>,
    rendered_len: usize,
    scroll: ScrollPosition,
    stale: bool,
    loaded: bool,
}

impl ViewEntry {
    pub fn new(key: ViewKey) -> Self {
        Self {
            key,
            messages: Vec::new(),
            by_id: HashMap::new(),
            rendered_len: 0,
            scroll: ScrollPosition::default(),
            stale: false,
            loaded: false,
        }
    }

    pub fn key(&self) -> &ViewKey {
        &self.key
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.by_id.get(id).and_then(|&index| self.messages.get(index))
    }

    pub fn contains(&self, id: &str) -> bool {
        !id.is_empty() && self.by_id.contains_key(id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Whether the view has ever been filled by a snapshot.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn needs_refresh(&self) -> bool {
        self.stale || !self.loaded
    }

    pub fn scroll(&self) -> ScrollPosition {
        self.scroll
    }

    pub fn save_scroll(&mut self, scroll: ScrollPosition) {
        self.scroll = scroll;
    }

    /// Rows the renderer has not drawn yet, when only appends happened since.
    pub fn rendered_len(&self) -> usize {
        self.rendered_len
    }

    pub fn mark_rendered(&mut self) {
        self.rendered_len = self.messages.len();
    }

    /// Full replace from an already-ordered batch. Later duplicates of an id are dropped.
    pub fn replace_all(&mut self, ordered: Vec<Message>) {
        self.messages.clear();
        self.by_id.clear();
        for message in ordered {
            if message.has_id() && self.by_id.contains_key(&message.id) {
                continue;
            }
            if message.has_id() {
                self.by_id.insert(message.id.clone(), self.messages.len());
            }
            self.messages.push(message);
        }
        self.rendered_len = 0;
        self.stale = false;
        self.loaded = true;
    }

    pub fn merge_insert(&mut self, mut message: Message) -> InsertOutcome {
        if let Some(position) = self.position(&message.id) {
            message.arrival = self.messages[position].arrival;
            let unchanged_position = self.messages[position].timestamp_ms == message.timestamp_ms
                && self.messages[position].sequence == message.sequence;
            if unchanged_position {
                self.messages[position] = message;
                return InsertOutcome::Replaced { position };
            }
            self.messages.remove(position);
            self.by_id.remove(&message.id);
            self.reindex_from(position);
            let position = self.insert_sorted(message);
            return InsertOutcome::Replaced { position };
        }

        let position = self.insert_sorted(message);
        InsertOutcome::Inserted { position }
    }

    /// Applies an update event to the row with the same id. Returns false if no row matched.
    pub fn patch(&mut self, update: &Message) -> bool {
        let Some(position) = self.position(&update.id) else {
            return false;
        };
        self.messages[position].apply_patch(update);
        true
    }

    fn insert_sorted(&mut self, message: Message) -> usize {
        let position = insertion_index(&self.messages, &message);
        self.messages.insert(position, message);
        if position < self.rendered_len {
            self.rendered_len = 0;
        }
        self.reindex_from(position);
        position
    }

    fn reindex_from(&mut self, start: usize) {
        for (index, message) in self.messages.iter().enumerate().skip(start) {
            if message.has_id() {
                self.by_id.insert(message.id.clone(), index);
            }
        }
        if self.rendered_len > self.messages.len() {
            self.rendered_len = self.messages.len();
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Activation {
    pub needs_refresh: bool,
    pub scroll: ScrollPosition,
    pub evicted: Vec<ViewKey>,
}

/// LRU over materialized views. The active view is never evicted.
#[derive(Clone, Debug)]
pub struct ViewCache {
    entries: HashMap<ViewKey, ViewEntry>,
    /// Front is least recently activated.
    recency: VecDeque<ViewKey>,
    active: Option<ViewKey>,
    view_max: usize,
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new(DEFAULT_VIEW_MAX)
    }
}

impl ViewCache {
    pub fn new(view_max: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: VecDeque::new(),
            active: None,
            view_max: view_max.max(1),
        }
    }

    pub fn view_max(&self) -> usize {
        self.view_max
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn activate(&mut self, key: ViewKey) -> Activation {
        self.recency.retain(|existing| existing != &key);
        self.recency.push_back(key.clone());

        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| ViewEntry::new(key.clone()));
        let needs_refresh = entry.needs_refresh();
        let scroll = entry.scroll();
        self.active = Some(key);

        let evicted = self.evict_over_capacity();
        Activation {
            needs_refresh,
            scroll,
            evicted,
        }
    }

    fn evict_over_capacity(&mut self) -> Vec<ViewKey> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.view_max {
            let Some(index) = self
                .recency
                .iter()
                .position(|key| Some(key) != self.active.as_ref())
            else {
                break;
            };
            let Some(key) = self.recency.remove(index) else {
                break;
            };
            self.entries.remove(&key);
            evicted.push(key);
        }
        evicted
    }

    pub fn active_key(&self) -> Option<&ViewKey> {
        self.active.as_ref()
    }

    pub fn active(&self) -> Option<&ViewEntry> {
        self.active.as_ref().and_then(|key| self.entries.get(key))
    }

    pub fn active_mut(&mut self) -> Option<&mut ViewEntry> {
        let key = self.active.as_ref()?;
        self.entries.get_mut(key)
    }

    pub fn is_active(&self, key: &ViewKey) -> bool {
        self.active.as_ref() == Some(key)
    }

    pub fn get(&self, key: &ViewKey) -> Option<&ViewEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &ViewKey) -> Option<&mut ViewEntry> {
        self.entries.get_mut(key)
    }

    pub fn is_cached(&self, key: &ViewKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Least recently activated first.
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &ViewKey> {
        self.recency.iter()
    }

    /// Cached views whose timeline would contain a message from `session`.
    pub fn keys_holding(&self, session: &SessionKey) -> Vec<ViewKey> {
        let mut keys = Vec::new();
        let own = ViewKey::Session(session.clone());
        if self.entries.contains_key(&own) {
            keys.push(own);
        }
        if self.entries.contains_key(&ViewKey::All) {
            keys.push(ViewKey::All);
        }
        keys
    }

    pub fn all_keys(&self) -> Vec<ViewKey> {
        self.recency.iter().cloned().collect()
    }

    /// Arrival already assigned to this id in any cached view, so a re-pull keeps undated rows
    /// where they were.
    pub fn known_arrival(&self, id: &str) -> Option<u64> {
        if id.is_empty() {
            return None;
        }
        self.entries
            .values()
            .find_map(|entry| entry.get(id).map(|message| message.arrival))
    }

    pub fn mark_inactive_stale(&mut self) -> usize {
        let mut marked = 0usize;
        for (key, entry) in &mut self.entries {
            if Some(key) != self.active.as_ref() {
                entry.mark_stale();
                marked += 1;
            }
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageKind, order_messages};

    fn view(raw: &str) -> ViewKey {
        ViewKey::parse(raw)
    }

    fn msg(id: &str, ts: Option<i64>, arrival: u64) -> Message {
        let mut message = Message::new(id, SessionKey::from("s1"), MessageKind::AssistantMessage);
        message.timestamp_ms = ts;
        message.arrival = arrival;
        message
    }

    #[test]
    fn evicts_least_recently_activated() {
        let mut cache = ViewCache::new(4);
        for key in ["s1", "s2", "s3", "s4"] {
            assert!(cache.activate(view(key)).evicted.is_empty());
        }
        let activation = cache.activate(view("s5"));
        assert_eq!(activation.evicted, vec![view("s1")]);
        assert_eq!(cache.len(), 4);
        for key in ["s2", "s3", "s4", "s5"] {
            assert!(cache.is_cached(&view(key)));
        }
        assert_eq!(cache.active_key(), Some(&view("s5")));
    }

    #[test]
    fn reactivation_refreshes_recency_and_never_evicts_active() {
        let mut cache = ViewCache::new(2);
        cache.activate(view("s1"));
        cache.activate(view("s2"));
        cache.activate(view("s1"));
        let activation = cache.activate(view("s3"));
        assert_eq!(activation.evicted, vec![view("s2")]);
        assert!(cache.is_cached(&view("s1")));
        assert!(cache.is_cached(&view("s3")));

        let mut single = ViewCache::new(1);
        single.activate(view("a"));
        single.activate(view("b"));
        assert_eq!(single.len(), 1);
        assert!(single.is_cached(&view("b")));
    }

    #[test]
    fn cached_loaded_view_does_not_need_refresh_and_restores_scroll() {
        let mut cache = ViewCache::new(3);
        assert!(cache.activate(view("s1")).needs_refresh);
        let entry = cache.active_mut().expect("active");
        entry.replace_all(vec![msg("a", Some(1), 0)]);
        entry.save_scroll(ScrollPosition {
            offset: 12,
            pinned_to_bottom: false,
        });

        cache.activate(view("s2"));
        let back = cache.activate(view("s1"));
        assert!(!back.needs_refresh);
        assert_eq!(back.scroll.offset, 12);

        cache.activate(view("s2"));
        assert_eq!(cache.mark_inactive_stale(), 1);
        assert!(cache.activate(view("s1")).needs_refresh);
    }

    #[test]
    fn merge_insert_keeps_order_and_index() {
        let mut entry = ViewEntry::new(view("s1"));
        entry.replace_all(order_messages(vec![msg("b", Some(20), 1), msg("a", Some(10), 0)]));
        let outcome = entry.merge_insert(msg("c", Some(15), 2));
        assert_eq!(outcome, InsertOutcome::Inserted { position: 1 });
        assert_eq!(entry.position("b"), Some(2));

        let outcome = entry.merge_insert(msg("c", Some(15), 9).with_text("again"));
        assert_eq!(outcome, InsertOutcome::Replaced { position: 1 });
        assert_eq!(entry.len(), 3);
        assert_eq!(entry.get("c").map(|m| m.arrival), Some(2));

        let outcome = entry.merge_insert(msg("a", Some(30), 10));
        assert_eq!(outcome, InsertOutcome::Replaced { position: 2 });
        let ids = entry.messages().iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(entry.position("c"), Some(0));
    }

    #[test]
    fn messages_without_ids_are_kept_but_not_indexed() {
        let mut entry = ViewEntry::new(view("s1"));
        entry.merge_insert(msg("", None, 0));
        entry.merge_insert(msg("", None, 1));
        assert_eq!(entry.len(), 2);
        assert!(!entry.contains(""));
        assert!(!entry.patch(&msg("", None, 2).as_update()));
    }
}
