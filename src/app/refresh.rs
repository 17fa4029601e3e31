use super::SyncCore;
use crate::domain::{AbortHandle, Message, ViewKey, order_messages};

#[derive(Clone, Debug)]
pub struct RefreshTicket {
    pub token: u64,
    pub target: ViewKey,
    pub abort: AbortHandle,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SnapshotResult {
    Loaded(Vec<Message>),
    Cancelled,
    Failed(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RefreshOutcome {
    Applied { view: ViewKey, messages: usize },
    /// A newer refresh superseded this one; nothing was touched.
    Stale,
    Cancelled,
    Failed { view: ViewKey, status: String },
    /// The target view was evicted while the pull ran.
    Discarded,
}

#[derive(Debug)]
struct InFlight {
    token: u64,
    target: ViewKey,
    abort: AbortHandle,
}

#[derive(Debug, Default)]
pub(crate) struct RefreshState {
    latest_token: u64,
    in_flight: Option<InFlight>,
}

impl SyncCore {
    pub fn is_refreshing(&self) -> bool {
        self.refresh.in_flight.is_some()
    }

    pub fn refresh_target(&self) -> Option<&ViewKey> {
        self.refresh.in_flight.as_ref().map(|flight| &flight.target)
    }

    /// Issues a new token and aborts whatever pull was running.
    pub fn begin_refresh(&mut self, target: ViewKey) -> RefreshTicket {
        if let Some(previous) = self.refresh.in_flight.take() {
            previous.abort.abort();
            tracing::debug!(
                event = "refresh_superseded",
                token = previous.token,
                view = %previous.target
            );
        }
        self.refresh.latest_token += 1;
        let token = self.refresh.latest_token;
        let abort = AbortHandle::new();
        self.refresh.in_flight = Some(InFlight {
            token,
            target: target.clone(),
            abort: abort.clone(),
        });
        tracing::debug!(event = "refresh_started", token, view = %target);
        RefreshTicket {
            token,
            target,
            abort,
        }
    }

    pub fn cancel_refresh(&mut self) {
        if let Some(flight) = self.refresh.in_flight.take() {
            flight.abort.abort();
        }
    }

    /// Applies a finished pull. Only the latest token may change state.
    pub fn complete_refresh(&mut self, token: u64, result: SnapshotResult) -> RefreshOutcome {
        let current = self
            .refresh
            .in_flight
            .as_ref()
            .is_some_and(|flight| flight.token == token);
        if token != self.refresh.latest_token || !current {
            tracing::debug!(event = "refresh_stale", token, latest = self.refresh.latest_token);
            return RefreshOutcome::Stale;
        }
        let Some(flight) = self.refresh.in_flight.take() else {
            return RefreshOutcome::Stale;
        };
        let target = flight.target;

        match result {
            SnapshotResult::Cancelled => RefreshOutcome::Cancelled,
            SnapshotResult::Failed(status) => {
                tracing::warn!(event = "refresh_failed", view = %target, status = %status);
                if let Some(entry) = self.views.get_mut(&target) {
                    entry.mark_stale();
                }
                if self.views.is_active(&target) {
                    self.changes.empty_state(&target, &status);
                }
                RefreshOutcome::Failed {
                    view: target,
                    status,
                }
            }
            SnapshotResult::Loaded(batch) => self.apply_snapshot(target, batch),
        }
    }

    fn apply_snapshot(&mut self, target: ViewKey, batch: Vec<Message>) -> RefreshOutcome {
        let mut rows = Vec::with_capacity(batch.len());
        for mut message in batch {
            if message.is_update() || !target.includes(&message.session_key) {
                continue;
            }
            message.arrival = match self.views.known_arrival(&message.id) {
                Some(arrival) => arrival,
                None => self.assign_arrival(),
            };
            if self.threads.observe(&message) {
                self.changes.threads = true;
            }
            rows.push(message);
        }
        let ordered = order_messages(rows);

        let active = self.views.is_active(&target);
        let Some(entry) = self.views.get_mut(&target) else {
            tracing::debug!(event = "refresh_discarded", view = %target);
            return RefreshOutcome::Discarded;
        };
        entry.replace_all(ordered);
        let messages = entry.len();
        if active {
            self.changes.rebuilt(&target);
        }
        tracing::info!(event = "refresh_applied", view = %target, messages);
        RefreshOutcome::Applied {
            view: target,
            messages,
        }
    }
}
