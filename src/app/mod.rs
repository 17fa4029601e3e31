//! Timeline synchronization core.
//!
//! `SyncCore` owns the thread index, view cache, pending buffer and unread ledger, and is the
//! only writer to any of them. It never performs I/O: side effects are queued as
//! [`SyncAction`]s and redraw work is exposed as batched [`ViewChange`]s.

mod ingest;
mod refresh;

pub use ingest::*;
pub use refresh::*;

use crate::domain::{
    Activation, ConnectionStatus, DEFAULT_PENDING_CAPACITY, DEFAULT_UNREAD_CAPACITY,
    DEFAULT_VIEW_MAX, FlushBackoff, MarkOutcome, MessageKind, PendingBuffer, ScrollPosition,
    SessionKey, ThreadIndex, ThreadSnapshot, UnreadItem, UnreadLedger, UnreadSummary, ViewCache,
    ViewEntry, ViewKey,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncConfig {
    pub view_max: usize,
    pub pending_capacity: usize,
    pub unread_capacity: usize,
    /// Kinds that raise an unread notification when pushed.
    pub notify_kinds: Vec<MessageKind>,
    pub redraw_interval: Duration,
    pub flush_backoff: FlushBackoff,
    pub thread_sync_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            view_max: DEFAULT_VIEW_MAX,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            unread_capacity: DEFAULT_UNREAD_CAPACITY,
            notify_kinds: vec![MessageKind::AssistantMessage],
            redraw_interval: Duration::from_millis(50),
            flush_backoff: FlushBackoff::default(),
            thread_sync_ttl: Duration::from_secs(60),
        }
    }
}

/// Work the core needs the I/O layer to perform.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncAction {
    Refresh(ViewKey),
    /// Courtesy signal telling the backend which session is being watched.
    Follow(Option<SessionKey>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ViewChange {
    Rebuilt { view: ViewKey },
    Inserted { view: ViewKey, ids: Vec<String> },
    Patched { view: ViewKey, ids: Vec<String> },
    EmptyState { view: ViewKey, status: String },
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChangeBatch {
    pub views: Vec<ViewChange>,
    pub unread_changed: bool,
    pub threads_changed: bool,
    pub status: Option<ConnectionStatus>,
}

#[derive(Clone, Debug, Default)]
struct PendingViewChange {
    rebuilt: bool,
    inserted: Vec<String>,
    patched: Vec<String>,
    empty: Option<String>,
}

#[derive(Clone, Debug, Default)]
struct ChangeLog {
    views: BTreeMap<ViewKey, PendingViewChange>,
    unread: bool,
    threads: bool,
    status: Option<ConnectionStatus>,
    last_emit: Option<Instant>,
}

impl ChangeLog {
    fn rebuilt(&mut self, view: &ViewKey) {
        let change = self.views.entry(view.clone()).or_default();
        change.rebuilt = true;
        change.inserted.clear();
        change.patched.clear();
        change.empty = None;
    }

    fn inserted(&mut self, view: &ViewKey, id: &str) {
        if id.is_empty() {
            self.rebuilt(view);
            return;
        }
        let change = self.views.entry(view.clone()).or_default();
        if !change.rebuilt {
            change.inserted.push(id.to_string());
        }
    }

    fn patched(&mut self, view: &ViewKey, id: &str) {
        let change = self.views.entry(view.clone()).or_default();
        if change.rebuilt
            || change.inserted.iter().any(|known| known == id)
            || change.patched.iter().any(|known| known == id)
        {
            return;
        }
        change.patched.push(id.to_string());
    }

    fn empty_state(&mut self, view: &ViewKey, status: &str) {
        let change = self.views.entry(view.clone()).or_default();
        change.empty = Some(status.to_string());
    }

    fn is_empty(&self) -> bool {
        self.views.is_empty() && !self.unread && !self.threads && self.status.is_none()
    }

    fn take(&mut self) -> ChangeBatch {
        let mut views = Vec::new();
        for (view, change) in std::mem::take(&mut self.views) {
            if change.rebuilt {
                views.push(ViewChange::Rebuilt { view: view.clone() });
            } else {
                if !change.inserted.is_empty() {
                    views.push(ViewChange::Inserted {
                        view: view.clone(),
                        ids: change.inserted,
                    });
                }
                if !change.patched.is_empty() {
                    views.push(ViewChange::Patched {
                        view: view.clone(),
                        ids: change.patched,
                    });
                }
            }
            if let Some(status) = change.empty {
                views.push(ViewChange::EmptyState { view, status });
            }
        }
        ChangeBatch {
            views,
            unread_changed: std::mem::take(&mut self.unread),
            threads_changed: std::mem::take(&mut self.threads),
            status: self.status.take(),
        }
    }
}

#[derive(Debug)]
pub struct SyncCore {
    config: SyncConfig,
    threads: ThreadIndex,
    views: ViewCache,
    pending: PendingBuffer,
    unread: UnreadLedger,
    refresh: RefreshState,
    connection: ConnectionTracker,
    next_arrival: u64,
    changes: ChangeLog,
    actions: Vec<SyncAction>,
    pin_on_select: bool,
}

impl SyncCore {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            threads: ThreadIndex::default(),
            views: ViewCache::new(config.view_max),
            pending: PendingBuffer::new(config.pending_capacity, config.flush_backoff),
            unread: UnreadLedger::new(config.unread_capacity),
            refresh: RefreshState::default(),
            connection: ConnectionTracker::default(),
            next_arrival: 1,
            changes: ChangeLog::default(),
            actions: Vec::new(),
            pin_on_select: false,
            config,
        }
    }

    pub fn with_pin_on_select(mut self, pin_on_select: bool) -> Self {
        self.pin_on_select = pin_on_select;
        self
    }

    pub fn set_pin_on_select(&mut self, pin_on_select: bool) {
        self.pin_on_select = pin_on_select;
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn threads(&self) -> &ThreadIndex {
        &self.threads
    }

    pub fn views(&self) -> &ViewCache {
        &self.views
    }

    pub fn active_key(&self) -> Option<&ViewKey> {
        self.views.active_key()
    }

    pub fn active_view(&self) -> Option<&ViewEntry> {
        self.views.active()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn assign_arrival(&mut self) -> u64 {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        arrival
    }

    /// Switches the active view. `needs_refresh` tells the caller to start a snapshot pull.
    pub fn activate(&mut self, key: ViewKey) -> Activation {
        let activation = self.views.activate(key.clone());
        for evicted in &activation.evicted {
            tracing::debug!(event = "view_evicted", view = %evicted);
        }
        self.changes.rebuilt(&key);
        if self.pin_on_select {
            self.actions
                .push(SyncAction::Follow(key.session().cloned()));
        }
        activation
    }

    pub fn save_scroll(&mut self, scroll: ScrollPosition) {
        if let Some(entry) = self.views.active_mut() {
            entry.save_scroll(scroll);
        }
    }

    pub fn mark_rendered(&mut self) {
        if let Some(entry) = self.views.active_mut() {
            entry.mark_rendered();
        }
    }

    pub fn mark_unread(&mut self, key: &SessionKey, id: &str, kind: MessageKind) -> MarkOutcome {
        let outcome = self.unread.mark_unread(key, id, kind);
        if outcome.added {
            self.changes.unread = true;
        }
        outcome
    }

    /// Consumes the oldest unread item of `session` that the active view can show.
    ///
    /// Returns `None` without touching the queue when the active view does not cover
    /// `session` or has not loaded yet, since staleness cannot be judged then.
    pub fn jump_to_next_unread(&mut self, session: &SessionKey) -> Option<UnreadItem> {
        let entry = self.views.active()?;
        if !entry.key().includes(session) || !entry.is_loaded() {
            return None;
        }
        let before = self.unread.count(session);
        let item = self.unread.consume(session, |id| entry.contains(id));
        if self.unread.count(session) != before {
            self.changes.unread = true;
        }
        item
    }

    pub fn mark_session_read(&mut self, session: &SessionKey) -> usize {
        let cleared = self.unread.clear_session(session);
        if cleared > 0 {
            self.changes.unread = true;
        }
        cleared
    }

    pub fn unread_total(&self) -> usize {
        self.unread.total()
    }

    pub fn unread_count(&self, session: &SessionKey) -> usize {
        self.unread.count(session)
    }

    pub fn unread_summaries(&self) -> Vec<UnreadSummary> {
        self.unread.summaries(&self.threads)
    }

    pub fn close_thread(&mut self, key: &SessionKey) -> bool {
        let closed = self.threads.close(key);
        if closed {
            self.changes.threads = true;
        }
        closed
    }

    pub fn set_thread_label(&mut self, key: &SessionKey, label: Option<String>) {
        self.threads.set_label(key, label);
        self.changes.threads = true;
    }

    pub fn apply_thread_snapshot(&mut self, snapshots: Vec<ThreadSnapshot>, now: Instant) {
        let created = self.threads.apply_snapshot(snapshots, now);
        tracing::debug!(event = "threads_synced", created, total = self.threads.len());
        self.changes.threads = true;
    }

    /// A failed thread pull still counts as an attempt, so it is retried after the TTL.
    pub fn thread_sync_failed(&mut self, now: Instant) {
        self.threads.mark_synced(now);
    }

    pub fn needs_thread_sync(&self, now: Instant) -> bool {
        self.threads.needs_sync(now, self.config.thread_sync_ttl)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn take_actions(&mut self) -> Vec<SyncAction> {
        std::mem::take(&mut self.actions)
    }

    /// Coalesced redraw work, released at most once per `redraw_interval`.
    pub fn take_changes(&mut self, now: Instant) -> Option<ChangeBatch> {
        if self.changes.is_empty() {
            return None;
        }
        if let Some(last) = self.changes.last_emit {
            if now.saturating_duration_since(last) < self.config.redraw_interval {
                return None;
            }
        }
        self.changes.last_emit = Some(now);
        Some(self.changes.take())
    }
}
