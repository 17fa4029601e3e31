use std::io::{self, BufRead, Write};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;
use std::time::{Duration, Instant};
use tailboard::app::{
    ChangeBatch, RefreshTicket, SnapshotResult, SyncAction, SyncConfig, SyncCore, ViewChange,
};
use tailboard::cli::{
    CliInvocation, ClientConfig, TailCommand, help_text, parse_invocation, parse_tail_command,
};
use tailboard::domain::{SessionKey, ThreadIndex, ThreadSnapshot, ViewKey, ViewMode};
use tailboard::infra::{
    ApiClient, FetchError, FilePreferences, LoadPreferencesError, PreferenceStore,
    ResolveStateDirError, StreamSignal, init_tracing, label_key, load_pin_on_select,
    load_view_mode, resolve_state_dir, save_pin_on_select, save_view_mode, spawn_stream_reader,
    stored_labels,
};
use tailboard::ui::{DEFAULT_WIDTH, format_row, format_status, format_thread_line};
use thiserror::Error;

const LOOP_TICK: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    StateDir(#[from] ResolveStateDirError),

    #[error(transparent)]
    Preferences(#[from] LoadPreferencesError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[derive(Debug)]
enum WorkerSignal {
    Snapshot { token: u64, result: SnapshotResult },
    Threads(Result<Vec<ThreadSnapshot>, String>),
}

fn main() {
    if let Err(error) = run_main() {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{error}");
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            print_help();
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Tail(config) => {
            init_tracing();
            run_tail(config)
        }
        CliInvocation::Threads(config) => {
            init_tracing();
            run_threads(config)
        }
    }
}

fn print_help() {
    let mut out = io::stdout().lock();
    let _ = write!(out, "{}", help_text());
}

fn run_threads(config: ClientConfig) -> Result<(), MainError> {
    let state_dir = resolve_state_dir()?;
    let prefs = FilePreferences::load(&state_dir)?;
    let client = ApiClient::new(&config.server_url);

    let mut index = ThreadIndex::default();
    for (key, label) in stored_labels(&prefs) {
        index.set_label(&key, Some(label));
    }
    index.apply_snapshot(client.fetch_threads()?, Instant::now());

    let mut out = io::stdout().lock();
    for thread in index.threads_by_recency() {
        writeln!(out, "{}", format_thread_line(thread, 0))?;
    }
    Ok(())
}

fn run_tail(config: ClientConfig) -> Result<(), MainError> {
    let state_dir = resolve_state_dir()?;
    let prefs = FilePreferences::load(&state_dir)?;
    let sync_config = SyncConfig {
        view_max: config.view_max,
        ..SyncConfig::default()
    };
    let mut core = SyncCore::new(sync_config).with_pin_on_select(load_pin_on_select(&prefs));
    for (key, label) in stored_labels(&prefs) {
        core.set_thread_label(&key, Some(label));
    }

    let client = ApiClient::new(&config.server_url);
    tracing::info!(
        event = "tail_started",
        server = client.base_url(),
        view = %config.initial_view
    );
    let stream = spawn_stream_reader(client.clone());
    let (worker_tx, worker_rx) = channel::<WorkerSignal>();
    let stdin_rx = spawn_stdin_reader();

    let mut tail = TailSession {
        mode: load_view_mode(&prefs),
        core,
        client,
        worker_tx,
        prefs,
        threads_in_flight: false,
    };
    tail.open(config.initial_view);

    let mut out = io::stdout();
    loop {
        let now = Instant::now();

        while let Some(signal) = stream.try_recv() {
            match signal {
                StreamSignal::Opened => {
                    tail.core.on_stream_open();
                }
                StreamSignal::Event(message) => {
                    tail.core.on_event(message);
                }
                StreamSignal::Error(reason) => tail.core.on_stream_error(&reason),
            }
        }

        while let Ok(signal) = worker_rx.try_recv() {
            tail.apply_worker_signal(signal, now);
        }

        while let Ok(line) = stdin_rx.try_recv() {
            match parse_tail_command(&line) {
                Ok(Some(TailCommand::Quit)) => {
                    tail.core.cancel_refresh();
                    stream.shutdown();
                    return Ok(());
                }
                Ok(Some(command)) => tail.run_command(command, &mut out)?,
                Ok(None) => {}
                Err(error) => writeln!(out, "! {error}")?,
            }
        }

        tail.core.tick(now);
        tail.sync_threads_if_due(now);
        tail.run_actions();
        if let Some(batch) = tail.core.take_changes(now) {
            tail.render(batch, &mut out)?;
        }

        thread::sleep(LOOP_TICK);
    }
}

struct TailSession {
    core: SyncCore,
    client: ApiClient,
    worker_tx: Sender<WorkerSignal>,
    prefs: FilePreferences,
    mode: ViewMode,
    threads_in_flight: bool,
}

impl TailSession {
    fn open(&mut self, view: ViewKey) {
        let activation = self.core.activate(view.clone());
        if activation.needs_refresh {
            self.start_refresh(view);
        }
    }

    fn start_refresh(&mut self, view: ViewKey) {
        let ticket = self.core.begin_refresh(view);
        spawn_refresh(self.client.clone(), ticket, self.worker_tx.clone());
    }

    fn run_actions(&mut self) {
        for action in self.core.take_actions() {
            match action {
                SyncAction::Refresh(view) => self.start_refresh(view),
                SyncAction::Follow(session) => spawn_follow(self.client.clone(), session),
            }
        }
    }

    fn sync_threads_if_due(&mut self, now: Instant) {
        if self.threads_in_flight || !self.core.needs_thread_sync(now) {
            return;
        }
        self.threads_in_flight = true;
        spawn_thread_sync(self.client.clone(), self.worker_tx.clone());
    }

    fn apply_worker_signal(&mut self, signal: WorkerSignal, now: Instant) {
        match signal {
            WorkerSignal::Snapshot { token, result } => {
                self.core.complete_refresh(token, result);
            }
            WorkerSignal::Threads(result) => {
                self.threads_in_flight = false;
                match result {
                    Ok(snapshots) => self.core.apply_thread_snapshot(snapshots, now),
                    Err(error) => {
                        tracing::warn!(event = "thread_sync_failed", error = %error);
                        self.core.thread_sync_failed(now);
                    }
                }
            }
        }
    }

    fn run_command(&mut self, command: TailCommand, out: &mut impl Write) -> io::Result<()> {
        match command {
            TailCommand::Open(view) => self.open(view),
            TailCommand::Next => self.jump_to_next_unread(out)?,
            TailCommand::Read => {
                let cleared = self
                    .unread_scope()
                    .iter()
                    .map(|session| self.core.mark_session_read(session))
                    .sum::<usize>();
                writeln!(out, "(marked {cleared} read)")?;
            }
            TailCommand::Threads => {
                for thread in self.core.threads().visible_threads() {
                    let unread = self.core.unread_count(&thread.key);
                    writeln!(out, "{}", format_thread_line(thread, unread))?;
                }
            }
            TailCommand::Close(session) => {
                if !self.core.close_thread(&session) {
                    writeln!(out, "! unknown thread: {session}")?;
                }
            }
            TailCommand::Label { session, text } => {
                let label = (!text.is_empty()).then(|| text.clone());
                self.core.set_thread_label(&session, label);
                if let Err(error) = self.prefs.set(&label_key(&session), &text) {
                    tracing::warn!(event = "preferences_save_failed", error = %error);
                }
            }
            TailCommand::Pin => {
                let pin = !load_pin_on_select(&self.prefs);
                self.core.set_pin_on_select(pin);
                if let Err(error) = save_pin_on_select(&mut self.prefs, pin) {
                    tracing::warn!(event = "preferences_save_failed", error = %error);
                }
                if pin {
                    let session = self.core.active_key().and_then(ViewKey::session).cloned();
                    spawn_follow(self.client.clone(), session);
                }
                writeln!(out, "(pin on select: {})", if pin { "on" } else { "off" })?;
            }
            TailCommand::Mode => {
                self.mode = self.mode.toggle();
                if let Err(error) = save_view_mode(&mut self.prefs, self.mode) {
                    tracing::warn!(event = "preferences_save_failed", error = %error);
                }
                self.print_active(out)?;
            }
            TailCommand::Quit => {}
        }
        Ok(())
    }

    /// Sessions the active view covers that have unread items, most recent first.
    fn unread_scope(&self) -> Vec<SessionKey> {
        match self.core.active_key() {
            Some(ViewKey::Session(session)) => vec![session.clone()],
            Some(ViewKey::All) => self
                .core
                .unread_summaries()
                .into_iter()
                .map(|summary| summary.key)
                .collect(),
            None => Vec::new(),
        }
    }

    fn jump_to_next_unread(&mut self, out: &mut impl Write) -> io::Result<()> {
        for session in self.unread_scope() {
            let Some(item) = self.core.jump_to_next_unread(&session) else {
                continue;
            };
            let row = self
                .core
                .active_view()
                .and_then(|entry| entry.get(&item.id))
                .map(|message| format_row(message, self.mode, DEFAULT_WIDTH, true));
            if let Some(row) = row {
                writeln!(out, "» {row}")?;
            }
            return Ok(());
        }
        writeln!(out, "(no unread)")
    }

    fn show_session(&self) -> bool {
        matches!(self.core.active_key(), Some(ViewKey::All))
    }

    fn print_active(&mut self, out: &mut impl Write) -> io::Result<()> {
        let show_session = self.show_session();
        if let Some(entry) = self.core.active_view() {
            writeln!(out, "== {} ==", entry.key())?;
            for message in entry.messages() {
                let row = format_row(message, self.mode, DEFAULT_WIDTH, show_session);
                writeln!(out, "{row}")?;
            }
        }
        self.core.mark_rendered();
        Ok(())
    }

    fn render(&mut self, batch: ChangeBatch, out: &mut impl Write) -> io::Result<()> {
        let show_session = self.show_session();
        for change in batch.views {
            match change {
                ViewChange::Rebuilt { view } => {
                    if self.core.views().is_active(&view) {
                        self.print_active(out)?;
                    }
                }
                ViewChange::Inserted { ids, .. } => {
                    if let Some(entry) = self.core.active_view() {
                        for message in ids.iter().filter_map(|id| entry.get(id)) {
                            let row = format_row(message, self.mode, DEFAULT_WIDTH, show_session);
                            writeln!(out, "{row}")?;
                        }
                    }
                    self.core.mark_rendered();
                }
                ViewChange::Patched { ids, .. } => {
                    if let Some(entry) = self.core.active_view() {
                        for message in ids.iter().filter_map(|id| entry.get(id)) {
                            let row = format_row(message, self.mode, DEFAULT_WIDTH, show_session);
                            writeln!(out, "~ {row}")?;
                        }
                    }
                }
                ViewChange::EmptyState { view, status } => {
                    let empty = self
                        .core
                        .views()
                        .get(&view)
                        .is_none_or(|entry| entry.is_empty());
                    if empty {
                        writeln!(out, "(no messages in {view}: {status})")?;
                    } else {
                        writeln!(out, "(refresh of {view} failed: {status})")?;
                    }
                }
            }
        }
        if batch.status.is_some() || batch.unread_changed {
            let line = format_status(
                self.core.connection_status(),
                self.core.active_key(),
                self.core.unread_total(),
            );
            writeln!(out, "{line}")?;
        }
        out.flush()
    }
}

fn spawn_refresh(client: ApiClient, ticket: RefreshTicket, tx: Sender<WorkerSignal>) {
    thread::spawn(move || {
        let result = match client.fetch_messages(&ticket.target, &ticket.abort) {
            Ok(messages) => SnapshotResult::Loaded(messages),
            Err(FetchError::Cancelled) => SnapshotResult::Cancelled,
            Err(error) => {
                tracing::warn!(
                    event = "snapshot_fetch_failed",
                    view = %ticket.target,
                    error = %error
                );
                SnapshotResult::Failed(error.status_text())
            }
        };
        let _ = tx.send(WorkerSignal::Snapshot {
            token: ticket.token,
            result,
        });
    });
}

fn spawn_thread_sync(client: ApiClient, tx: Sender<WorkerSignal>) {
    thread::spawn(move || {
        let result = client.fetch_threads().map_err(|error| error.to_string());
        let _ = tx.send(WorkerSignal::Threads(result));
    });
}

fn spawn_follow(client: ApiClient, session: Option<SessionKey>) {
    thread::spawn(move || {
        if let Err(error) = client.follow(session.as_ref()) {
            tracing::debug!(event = "follow_failed", error = %error);
        }
    });
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
