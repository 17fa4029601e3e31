use super::{SyncAction, SyncCore};
use crate::domain::{ConnectionStatus, InsertOutcome, Message, PushOutcome};
use std::time::Instant;

#[derive(Clone, Copy, Debug)]
pub(crate) struct ConnectionTracker {
    ever_opened: bool,
    error_since_open: bool,
    status: ConnectionStatus,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self {
            ever_opened: false,
            error_since_open: false,
            status: ConnectionStatus::Connecting,
        }
    }
}

impl ConnectionTracker {
    pub(crate) fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// True when this open follows a real drop, i.e. events may have been missed.
    fn opened(&mut self) -> bool {
        let resync = self.ever_opened && self.error_since_open;
        self.ever_opened = true;
        self.error_since_open = false;
        self.status = ConnectionStatus::Live;
        resync
    }

    fn errored(&mut self) {
        self.error_since_open = true;
        self.status = if self.ever_opened {
            ConnectionStatus::Reconnecting
        } else {
            ConnectionStatus::Connecting
        };
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngestOutcome {
    /// Held until the in-flight refresh completes.
    Buffered,
    /// The pending buffer gave up; a full re-pull follows.
    Overflowed,
    Applied,
    Patched,
    /// An update whose target row is not materialized anywhere.
    PatchMissed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushReport {
    Replayed(usize),
    Resync,
}

impl SyncCore {
    /// The live channel (re)opened. Returns true when a resync was started.
    pub fn on_stream_open(&mut self) -> bool {
        let resync = self.connection.opened();
        self.changes.status = Some(self.connection.status());
        if resync {
            tracing::info!(event = "stream_resync", reason = "reconnect");
            self.resync();
        }
        resync
    }

    pub fn on_stream_error(&mut self, reason: &str) {
        tracing::warn!(event = "stream_error", reason);
        self.connection.errored();
        self.changes.status = Some(self.connection.status());
    }

    /// Entry point for every streamed event.
    ///
    /// Held-back events always go first: while a refresh runs the event joins the buffer, and
    /// once it has finished any leftovers are replayed before this one is applied.
    pub fn on_event(&mut self, mut message: Message) -> IngestOutcome {
        if self.is_refreshing() {
            return match self.pending.push(message) {
                PushOutcome::Queued => IngestOutcome::Buffered,
                PushOutcome::Overflowed => IngestOutcome::Overflowed,
            };
        }
        if self.pending.has_work() {
            self.flush_pending();
        }
        message.arrival = self.assign_arrival();
        self.apply_incoming(message)
    }

    pub fn apply_incoming(&mut self, mut message: Message) -> IngestOutcome {
        if message.arrival == 0 {
            message.arrival = self.assign_arrival();
        }
        if message.is_update() {
            self.apply_update(&message)
        } else {
            self.apply_new(message)
        }
    }

    pub fn apply_incoming_batch(&mut self, messages: Vec<Message>) -> usize {
        messages
            .into_iter()
            .map(|message| self.apply_incoming(message))
            .filter(|outcome| matches!(outcome, IngestOutcome::Applied | IngestOutcome::Patched))
            .count()
    }

    fn apply_new(&mut self, message: Message) -> IngestOutcome {
        let holders = self.views.keys_holding(&message.session_key);
        let duplicate = message.has_id()
            && holders.iter().any(|key| {
                self.views
                    .get(key)
                    .is_some_and(|entry| entry.contains(&message.id))
            });

        if duplicate {
            self.threads.observe(&message);
        } else if self.threads.record(&message).is_visible() {
            self.changes.threads = true;
        }

        for key in &holders {
            let active = self.views.is_active(key);
            let Some(entry) = self.views.get_mut(key) else {
                continue;
            };
            let outcome = entry.merge_insert(message.clone());
            if !active {
                continue;
            }
            match outcome {
                InsertOutcome::Inserted { .. } => self.changes.inserted(key, &message.id),
                InsertOutcome::Replaced { .. } => self.changes.patched(key, &message.id),
            }
        }

        if self.config.notify_kinds.contains(&message.kind) {
            let kind = message.kind.clone();
            self.mark_unread(&message.session_key, &message.id, kind);
        }
        IngestOutcome::Applied
    }

    fn apply_update(&mut self, update: &Message) -> IngestOutcome {
        let holders = if update.session_key.is_unknown() {
            self.views.all_keys()
        } else {
            self.views.keys_holding(&update.session_key)
        };

        let mut patched = false;
        for key in &holders {
            let active = self.views.is_active(key);
            let Some(entry) = self.views.get_mut(key) else {
                continue;
            };
            if entry.patch(update) {
                patched = true;
                if active {
                    self.changes.patched(key, &update.id);
                }
            }
        }

        if patched {
            IngestOutcome::Patched
        } else {
            tracing::debug!(event = "patch_missed", id = %update.id, session = %update.session_key);
            IngestOutcome::PatchMissed
        }
    }

    /// Periodic driver: replays buffered events once no refresh is running.
    pub fn tick(&mut self, now: Instant) -> Option<FlushReport> {
        if !self.pending.flush_due(now) {
            return None;
        }
        if self.is_refreshing() {
            self.pending.defer(now);
            return None;
        }

        Some(self.flush_pending())
    }

    /// Replays the buffer in receipt order. Arrivals are issued here, after the snapshot rows
    /// got theirs, so undated events land behind the snapshot exactly as if applied live.
    fn flush_pending(&mut self) -> FlushReport {
        let drained = self.pending.drain();
        if drained.overflowed {
            tracing::warn!(event = "pending_overflow", capacity = self.config.pending_capacity);
            self.resync();
            return FlushReport::Resync;
        }
        let replayed = drained.events.len();
        for mut event in drained.events {
            event.arrival = self.assign_arrival();
            self.apply_incoming(event);
        }
        tracing::debug!(event = "pending_flushed", replayed);
        FlushReport::Replayed(replayed)
    }

    /// Distrust everything not on screen and re-pull what is.
    fn resync(&mut self) {
        let marked = self.views.mark_inactive_stale();
        self.threads.invalidate_sync();
        tracing::debug!(event = "views_marked_stale", marked);
        if let Some(active) = self.views.active_key().cloned() {
            self.actions.push(SyncAction::Refresh(active));
        }
    }
}
