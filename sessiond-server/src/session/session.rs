//! One PTY-backed terminal session

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, SecondsFormat};
use parking_lot::Mutex;
use sessiond_protocol::{
    new_stream_id, BacklogResponse, BootstrapResponse, GraphicsEvent, ModeSnapshot, SessionInfo,
    SnapshotResponse,
};
use sessiond_utils::{log_event, Direction, LogEntry, ProtocolLogger, Result, SessiondError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::buffer::RingBuffer;
use super::modes::ModeTracker;
use super::normalize::C1Normalizer;
use super::persist::{self, PersistedState, StatePaths};
use super::scrub::ResponseScrubber;
use super::subscriber::{Enqueue, StreamEvent, Subscriber};
use super::transcript::{read_tail, transcript_path, RawRecorder, Transcript};
use crate::config::SessionOptions;
use crate::graphics::{GraphicsDecoder, GraphicsState};
use crate::pty::{self, PtyConfig, PtyHandle, ReadResult};
use crate::term::{Terminal, MIN_COLS, MIN_ROWS};

/// How long close waits for the child to exit after killing it
pub const CLOSE_WAIT: Duration = Duration::from_secs(2);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

type OnClose = Box<dyn FnOnce(&Session) + Send>;

/// Process and lifecycle state
struct SessionState {
    pty: Option<PtyHandle>,
    started: bool,
    started_at: DateTime<Local>,
    last_active: DateTime<Local>,
    closed: bool,
    close_reason: Option<String>,
    /// Write-lease holder; empty when unclaimed
    owner: String,
    idle_deadline: Option<Instant>,
    last_snapshot: Option<Instant>,
}

/// Everything the output pipeline touches
struct OutputState {
    terminal: Terminal,
    graphics: GraphicsState,
    decoder: GraphicsDecoder,
    normalizer: C1Normalizer,
    scrubber: ResponseScrubber,
    modes: ModeTracker,
    buffer: RingBuffer,
    transcript: Option<Transcript>,
}

/// Emulator and stream state handed to a newly attached client
pub struct Attachment {
    pub bootstrap: BootstrapResponse,
    pub subscriber: Arc<Subscriber>,
    pub events: mpsc::Receiver<StreamEvent>,
}

/// A terminal session: one PTY, its emulator and its attached streams.
///
/// Locks are taken in the order output, subscribers, state. The output lock
/// is held for the whole pipeline pass over a chunk, so a client attaching
/// in between sees either all of a chunk in its bootstrap or all of it live.
pub struct Session {
    id: String,
    cwd: PathBuf,
    options: SessionOptions,
    state: Mutex<SessionState>,
    output: Mutex<OutputState>,
    subscribers: Mutex<HashMap<String, Arc<Subscriber>>>,
    recorder: Mutex<Option<RawRecorder>>,
    transcript_path: Option<PathBuf>,
    state_paths: Option<StatePaths>,
    persist_in_flight: Arc<AtomicBool>,
    on_close: Mutex<Option<OnClose>>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(id: impl Into<String>, cwd: impl Into<PathBuf>, options: SessionOptions) -> Arc<Self> {
        let id = id.into();
        let mut terminal = Terminal::new(options.cols as usize, options.rows as usize);
        terminal.set_history_limit(options.history_lines);
        let now = Local::now();
        Arc::new(Self {
            transcript_path: options
                .transcript_dir
                .as_deref()
                .map(|dir| transcript_path(dir, &id)),
            state_paths: options
                .state_dir
                .as_deref()
                .map(|dir| StatePaths::new(dir, &id)),
            output: Mutex::new(OutputState {
                terminal,
                graphics: GraphicsState::new(),
                decoder: GraphicsDecoder::new(),
                normalizer: C1Normalizer::new(),
                scrubber: ResponseScrubber::new(),
                modes: ModeTracker::new(),
                buffer: RingBuffer::new(options.buffer_bytes),
                transcript: None,
            }),
            state: Mutex::new(SessionState {
                pty: None,
                started: false,
                started_at: now,
                last_active: now,
                closed: false,
                close_reason: None,
                owner: String::new(),
                idle_deadline: None,
                last_snapshot: None,
            }),
            subscribers: Mutex::new(HashMap::new()),
            recorder: Mutex::new(None),
            persist_in_flight: Arc::new(AtomicBool::new(false)),
            on_close: Mutex::new(None),
            cancel: CancellationToken::new(),
            id,
            cwd: cwd.into(),
            options,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn protocol_log(&self) -> Option<&ProtocolLogger> {
        self.options.protocol_log.as_deref()
    }

    /// Called once, after the session has closed
    pub(crate) fn set_on_close(&self, f: impl FnOnce(&Session) + Send + 'static) {
        *self.on_close.lock() = Some(Box::new(f));
    }

    // ==================== Lifecycle ====================

    /// Spawn the login shell and start the output and idle tasks.
    ///
    /// On error nothing keeps running and the session should be discarded.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let config = PtyConfig::login_shell(&self.id, &self.cwd)
            .with_size(self.options.cols, self.options.rows);
        let pty = pty::spawn(&config)?;

        let started = self.open_files().and_then(|()| {
            let reader = pty
                .take_reader()
                .ok_or_else(|| SessiondError::pty("PTY reader already taken"))?;
            pty::spawn_reader(reader, self.cancel.clone(), &self.id)
        });
        let rx = match started {
            Ok(rx) => rx,
            Err(e) => {
                let _ = pty.kill();
                return Err(e);
            }
        };
        self.restore_state();

        {
            let mut state = self.state.lock();
            let now = Local::now();
            state.pty = Some(pty);
            state.started = true;
            state.started_at = now;
            state.last_active = now;
            state.idle_deadline = self.options.idle_timeout.map(|t| Instant::now() + t);
        }
        info!(session_id = %self.id, cwd = %self.cwd.display(), "session started");

        tokio::spawn(self.clone().read_loop(rx));
        if self.options.idle_timeout.is_some() {
            tokio::spawn(self.clone().idle_watch());
        }
        Ok(())
    }

    fn open_files(&self) -> Result<()> {
        if let Some(dir) = &self.options.transcript_dir {
            let transcript = Transcript::open(
                dir,
                &self.id,
                self.options.transcript_max_bytes,
                self.options.transcript_trim_threshold,
            )?;
            self.output.lock().transcript = Some(transcript);
        }
        if let Some(dir) = &self.options.record_dir {
            let recorder = RawRecorder::open(dir, &self.id)?;
            debug!(session_id = %self.id, path = %recorder.path().display(), "raw capture enabled");
            *self.recorder.lock() = Some(recorder);
        }
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut rx: mpsc::Receiver<ReadResult>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = rx.recv() => match result {
                    Some(ReadResult::Data(data)) => self.process_output(&data),
                    Some(ReadResult::Eof) | None => break,
                    Some(ReadResult::Error(e)) => {
                        debug!(session_id = %self.id, error = %e, "PTY read ended");
                        break;
                    }
                },
            }
        }
        self.close("closed").await;
    }

    async fn idle_watch(self: Arc<Self>) {
        loop {
            let Some(deadline) = self.state.lock().idle_deadline else {
                return;
            };
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            let expired = self
                .state
                .lock()
                .idle_deadline
                .is_some_and(|d| d <= Instant::now());
            if expired {
                info!(session_id = %self.id, "session idle");
                self.close("idle").await;
                return;
            }
        }
    }

    fn bump_activity(state: &mut SessionState, idle_timeout: Option<Duration>) {
        state.last_active = Local::now();
        if let (Some(timeout), Some(_)) = (idle_timeout, state.idle_deadline) {
            state.idle_deadline = Some(Instant::now() + timeout);
        }
    }

    /// Close the session; later calls are no-ops.
    ///
    /// Persists state, kills the child and waits up to [`CLOSE_WAIT`] for it,
    /// runs the close callback, then ends every attached stream.
    pub async fn close(self: &Arc<Self>, reason: &str) {
        let pty = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.close_reason = Some(reason.to_string());
            state.idle_deadline = None;
            state.pty.take()
        };
        info!(session_id = %self.id, reason, "session closing");
        self.cancel.cancel();
        self.recorder.lock().take();

        let persisted = {
            let mut out = self.output.lock();
            out.transcript = None;
            self.state_paths.as_ref().map(|_| Self::persisted_state(&out))
        };
        if let (Some(paths), Some(state)) = (self.state_paths.clone(), persisted) {
            let session_id = self.id.clone();
            let saved = tokio::task::spawn_blocking(move || match state {
                Ok(state) => persist::save(&paths, &state),
                Err(e) => Err(e),
            })
            .await;
            match saved {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(session_id = %session_id, error = %e, "failed to persist session state"),
                Err(e) => warn!(session_id = %session_id, error = %e, "persist task failed"),
            }
        }

        if let Some(pty) = pty {
            let _ = pty.kill();
            if !wait_for_exit(&pty, CLOSE_WAIT).await {
                warn!(session_id = %self.id, "child did not exit after kill");
            }
        }

        let on_close = self.on_close.lock().take();
        if let Some(on_close) = on_close {
            on_close(self.as_ref());
        }
        self.close_subscribers();
        debug!(session_id = %self.id, reason, "session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_running(&self) -> bool {
        let state = self.state.lock();
        state.started && !state.closed
    }

    pub fn close_reason(&self) -> Option<String> {
        self.state.lock().close_reason.clone()
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.state.lock();
        SessionInfo {
            session_id: self.id.clone(),
            cwd: self.cwd.display().to_string(),
            started_at: state.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            last_active: state.last_active.to_rfc3339_opts(SecondsFormat::Secs, true),
            running: state.started && !state.closed,
        }
    }

    // ==================== Input ====================

    /// Write client input to the PTY
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        self.write_locked(&mut state, data)
    }

    /// Write on behalf of `owner`; rejected while someone else holds the lease
    pub fn write_for_owner(&self, data: &[u8], owner: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.owner.is_empty() && state.owner != owner {
            return Err(SessiondError::LeaseHeld {
                owner: state.owner.clone(),
            });
        }
        self.write_locked(&mut state, data)
    }

    fn write_locked(&self, state: &mut SessionState, data: &[u8]) -> Result<()> {
        let pty = state.pty.as_ref().ok_or(SessiondError::TerminalNotStarted)?;
        log_event(self.protocol_log(), || {
            LogEntry::new("terminal.input", Direction::In, "write")
                .with_session(&self.id)
                .with_detail("data", data)
        });
        pty.write_all(data)?;
        Self::bump_activity(state, self.options.idle_timeout);
        Ok(())
    }

    /// Set (or with an empty name, release) the write lease; returns the holder
    pub fn set_owner(&self, owner: &str) -> String {
        let mut state = self.state.lock();
        if state.owner != owner {
            debug!(session_id = %self.id, from = %state.owner, to = %owner, "write lease changed");
        }
        state.owner = owner.to_string();
        state.owner.clone()
    }

    pub fn owner(&self) -> String {
        self.state.lock().owner.clone()
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let cols = cols.max(MIN_COLS as u16);
        let rows = rows.max(MIN_ROWS as u16);
        let mut out = self.output.lock();
        let state = self.state.lock();
        let pty = state.pty.as_ref().ok_or(SessiondError::TerminalNotStarted)?;
        out.terminal.resize(cols as usize, rows as usize);
        pty.resize(cols, rows)?;
        debug!(session_id = %self.id, cols, rows, "session resized");
        Ok(())
    }

    // ==================== Output Pipeline ====================

    /// Run one PTY read through the pipeline and fan it out
    pub(crate) fn process_output(&self, raw: &[u8]) {
        if let Some(recorder) = self.recorder.lock().as_mut() {
            recorder.write(raw);
        }

        let (responses, persist_due) = {
            let mut guard = self.output.lock();
            let out = &mut *guard;

            let normalized = out.normalizer.normalize(raw);
            if normalized.is_empty() {
                return;
            }

            let cursor = out.terminal.cursor();
            let processed = out.decoder.process(&normalized, cursor, &mut out.graphics);
            if !processed.events.is_empty() {
                self.broadcast_kitty(&mut out.modes, processed.events);
            }
            let cleaned = processed.passthrough;
            if cleaned.is_empty() {
                return;
            }

            let responses = out.terminal.write(&cleaned);
            let change = out.modes.observe(&cleaned);
            let persist_due = self.persist_due();
            log_event(self.protocol_log(), || {
                LogEntry::new("terminal.output", Direction::Out, "read")
                    .with_session(&self.id)
                    .with_detail("data", &cleaned)
            });

            let scrubbed = out.scrubber.scrub(&cleaned);
            for dropped in &scrubbed.dropped {
                log_event(self.protocol_log(), || {
                    LogEntry::new("terminal.protocol", Direction::Out, "drop")
                        .with_session(&self.id)
                        .with_detail(dropped.rule, &dropped.seq)
                });
            }

            Self::bump_activity(&mut self.state.lock(), self.options.idle_timeout);

            if change.alt_screen {
                debug!(session_id = %self.id, active = out.modes.alt_screen(), "alternate screen changed");
            }
            if change.mouse {
                let modes = out.modes.snapshot();
                debug!(
                    session_id = %self.id,
                    active = modes.mouse(),
                    sgr = modes.mouse_sgr,
                    encoding = ?modes.mouse_encoding(),
                    "mouse mode changed"
                );
            }
            if change.alt_screen || change.clear_screen {
                let events = out.graphics.clear_all();
                self.broadcast_kitty(&mut out.modes, events);
            }
            if change.any() {
                let modes = out.modes.snapshot();
                self.broadcast(&mut out.modes, &[StreamEvent::Modes(modes)]);
            }

            if !scrubbed.data.is_empty() {
                out.buffer.append(&scrubbed.data);
                if let Some(transcript) = out.transcript.as_mut() {
                    if let Err(e) = transcript.append(&scrubbed.data) {
                        warn!(session_id = %self.id, error = %e, "transcript write failed");
                    }
                }
                let data: Arc<[u8]> = scrubbed.data.into();
                self.broadcast(&mut out.modes, &[StreamEvent::Data(data)]);
            }

            let persist_due = persist_due.then(|| Self::persisted_state(out));
            (responses, persist_due)
        };

        if let Some(state) = persist_due {
            self.persist_in_background(state);
        }
        self.respond(responses);
    }

    /// Answer emulator queries when no client terminal is attached to do it
    fn respond(&self, responses: Vec<Vec<u8>>) {
        if responses.is_empty() || self.has_subscribers() {
            return;
        }
        for response in responses {
            if let Err(e) = self.write(&response) {
                debug!(session_id = %self.id, error = %e, "emulator response not written");
                return;
            }
        }
    }

    // ==================== Streams ====================

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.lock().is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Register a stream and compute its bootstrap in one step.
    ///
    /// No output is processed between the two, so the bootstrap plus the
    /// live events cover the output exactly once.
    pub fn attach(&self, stream_id: &str, since: i64) -> Result<Attachment> {
        let stream_id = if stream_id.is_empty() {
            new_stream_id()
        } else {
            stream_id.to_string()
        };
        let out = self.output.lock();
        let bootstrap = self.bootstrap_locked(&out, since)?;
        let (subscriber, events) = Subscriber::new(
            stream_id.clone(),
            self.options.initial_credit,
            self.options.queue_depth,
        );
        let replaced = self
            .subscribers
            .lock()
            .insert(stream_id.clone(), subscriber.clone());
        if let Some(previous) = replaced {
            previous.close();
        }
        drop(out);

        log_event(self.protocol_log(), || {
            LogEntry::new("stream", Direction::Internal, "attach")
                .with_session(&self.id)
                .with_stream(&stream_id)
        });
        debug!(session_id = %self.id, stream_id = %stream_id, "stream attached");
        Ok(Attachment {
            bootstrap,
            subscriber,
            events,
        })
    }

    /// Remove a stream; the last one leaving clears mouse reporting.
    ///
    /// A stream id re-attached since `subscriber` registered is left alone.
    pub fn unsubscribe(&self, subscriber: &Arc<Subscriber>) {
        subscriber.close();
        let stream_id = subscriber.stream_id();
        let mut out = self.output.lock();
        let mut subscribers = self.subscribers.lock();
        let registered = subscribers
            .get(stream_id)
            .is_some_and(|current| Arc::ptr_eq(current, subscriber));
        if !registered {
            return;
        }
        subscribers.remove(stream_id);
        if subscribers.is_empty() {
            out.modes.clear_mouse();
        }
        drop(subscribers);
        drop(out);
        log_event(self.protocol_log(), || {
            LogEntry::new("stream", Direction::Internal, "detach")
                .with_session(&self.id)
                .with_stream(stream_id)
        });
        debug!(session_id = %self.id, stream_id = %stream_id, "stream detached");
    }

    fn close_subscribers(&self) {
        let subscribers: Vec<_> = self.subscribers.lock().drain().map(|(_, s)| s).collect();
        for subscriber in subscribers {
            subscriber.close();
        }
    }

    /// Grant `bytes` of credit to a stream
    pub fn ack(&self, stream_id: &str, bytes: i64) -> Result<()> {
        if bytes <= 0 {
            return Ok(());
        }
        let subscriber = self.subscribers.lock().get(stream_id).cloned();
        let subscriber = subscriber.ok_or_else(|| SessiondError::StreamNotFound {
            stream_id: stream_id.to_string(),
        })?;
        subscriber.add_credit(bytes);
        Self::bump_activity(&mut self.state.lock(), self.options.idle_timeout);
        Ok(())
    }

    fn broadcast_kitty(&self, modes: &mut ModeTracker, events: Vec<GraphicsEvent>) {
        let events: Vec<_> = events.into_iter().map(StreamEvent::Kitty).collect();
        self.broadcast(modes, &events);
    }

    /// Queue `events` on every stream; a stream whose queue is full is dropped
    fn broadcast(&self, modes: &mut ModeTracker, events: &[StreamEvent]) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        let mut dropped = Vec::new();
        for (stream_id, subscriber) in subscribers.iter() {
            for event in events {
                match subscriber.try_send(event.clone()) {
                    Enqueue::Sent => {}
                    Enqueue::Full | Enqueue::Closed => {
                        dropped.push(stream_id.clone());
                        break;
                    }
                }
            }
        }
        for stream_id in &dropped {
            if let Some(subscriber) = subscribers.remove(stream_id) {
                debug!(session_id = %self.id, stream_id = %stream_id, "stream dropped: queue overflow");
                subscriber.close();
            }
        }
        if !dropped.is_empty() && subscribers.is_empty() {
            modes.clear_mouse();
        }
    }

    // ==================== Snapshot / Backlog / Bootstrap ====================

    pub fn modes(&self) -> ModeSnapshot {
        self.output.lock().modes.snapshot()
    }

    pub fn snapshot(&self) -> SnapshotResponse {
        let out = self.output.lock();
        self.snapshot_locked(&out)
    }

    fn snapshot_locked(&self, out: &OutputState) -> SnapshotResponse {
        let modes = out.modes.snapshot();
        let data = if !modes.alt_screen && !modes.tui_mode && out.terminal.history_len() > 0 {
            out.terminal.snapshot_ansi_with_history()
        } else {
            out.terminal.snapshot_ansi()
        };
        let alt_screen = modes.alt_screen || out.terminal.is_alt_screen();
        let graphics = out.graphics.snapshot();
        SnapshotResponse {
            session_id: self.id.clone(),
            data,
            source: "snapshot".into(),
            kitty: (!graphics.is_empty()).then_some(graphics),
            alt_screen,
            mouse_mask: modes.mouse_mask,
            mouse: modes.mouse(),
            mouse_sgr: modes.mouse_sgr,
            mouse_encoding: modes.mouse_encoding(),
            safe_to_replay: !alt_screen && !modes.tui_mode,
        }
    }

    /// Output since offset `since`, or the best stand-in for it
    pub fn backlog(&self, since: i64) -> Result<BacklogResponse> {
        let out = self.output.lock();
        self.backlog_locked(&out, since)
    }

    fn backlog_locked(&self, out: &OutputState, since: i64) -> Result<BacklogResponse> {
        let response = |data: String, next_offset: u64, truncated: bool, source: &str| {
            BacklogResponse {
                session_id: self.id.clone(),
                data,
                next_offset,
                truncated,
                source: source.into(),
            }
        };

        if out.modes.tui_mode() {
            let snapshot = out.terminal.snapshot_ansi();
            if !snapshot.is_empty() {
                return Ok(response(snapshot, 0, false, "snapshot"));
            }
            return Ok(response(String::new(), 0, true, "tui"));
        }
        if out.terminal.is_alt_screen() {
            return Ok(response(out.terminal.snapshot_ansi(), 0, false, "snapshot"));
        }
        if since == 0 && out.terminal.history_len() > 0 {
            return Ok(response(
                out.terminal.snapshot_ansi_with_history(),
                0,
                false,
                "history",
            ));
        }

        // A partial replay may have lost the sequences that set the current
        // modes, so those are re-sent ahead of it
        let read = out.buffer.read_since(since.max(0) as u64);
        if !read.data.is_empty() || read.next > 0 {
            let data = if read.truncated {
                with_prefix(out.modes.replay_prefix(), &read.data)
            } else {
                read.data
            };
            return Ok(response(
                String::from_utf8_lossy(&data).into_owned(),
                read.next,
                read.truncated,
                "buffer",
            ));
        }

        let (data, truncated) = match &self.transcript_path {
            Some(path) => read_tail(path, self.options.transcript_tail_bytes)?,
            None => (Vec::new(), false),
        };
        let data = if data.is_empty() {
            data
        } else {
            with_prefix(out.modes.replay_prefix(), &data)
        };
        Ok(response(
            String::from_utf8_lossy(&data).into_owned(),
            0,
            truncated,
            "transcript",
        ))
    }

    pub fn bootstrap(&self) -> Result<BootstrapResponse> {
        let out = self.output.lock();
        self.bootstrap_locked(&out, 0)
    }

    fn bootstrap_locked(&self, out: &OutputState, since: i64) -> Result<BootstrapResponse> {
        let snapshot = self.snapshot_locked(out);
        let mut response = BootstrapResponse {
            session_id: self.id.clone(),
            snapshot: snapshot.data,
            snapshot_source: snapshot.source,
            kitty: snapshot.kitty,
            alt_screen: snapshot.alt_screen,
            mouse_mask: snapshot.mouse_mask,
            mouse: snapshot.mouse,
            mouse_sgr: snapshot.mouse_sgr,
            mouse_encoding: snapshot.mouse_encoding,
            safe_to_replay: snapshot.safe_to_replay,
            initial_credit: self.options.initial_credit,
            ..Default::default()
        };
        if !response.snapshot.is_empty() {
            return Ok(response);
        }
        let backlog = self.backlog_locked(out, since)?;
        response.backlog = backlog.data;
        response.next_offset = backlog.next_offset;
        response.backlog_truncated = backlog.truncated;
        response.backlog_source = backlog.source;
        Ok(response)
    }

    // ==================== Persistence ====================

    fn persisted_state(out: &OutputState) -> Result<PersistedState> {
        Ok(PersistedState {
            terminal: out.terminal.to_bytes()?,
            graphics: out.graphics.snapshot(),
            modes: out.modes.snapshot(),
        })
    }

    /// True when a throttled snapshot should be written now
    fn persist_due(&self) -> bool {
        if self.state_paths.is_none() || self.options.snapshot_interval.is_zero() {
            return false;
        }
        let mut state = self.state.lock();
        let now = Instant::now();
        if state
            .last_snapshot
            .is_some_and(|last| now.duration_since(last) < self.options.snapshot_interval)
        {
            return false;
        }
        if self.persist_in_flight.swap(true, Ordering::AcqRel) {
            return false;
        }
        state.last_snapshot = Some(now);
        true
    }

    fn persist_in_background(&self, state: Result<PersistedState>) {
        let Some(paths) = self.state_paths.clone() else {
            self.persist_in_flight.store(false, Ordering::Release);
            return;
        };
        let in_flight = self.persist_in_flight.clone();
        let session_id = self.id.clone();
        tokio::task::spawn_blocking(move || {
            let saved = state.and_then(|state| persist::save(&paths, &state));
            if let Err(e) = saved {
                warn!(session_id = %session_id, error = %e, "failed to persist session state");
            }
            in_flight.store(false, Ordering::Release);
        });
    }

    /// Load state persisted by an earlier daemon run
    pub(crate) fn restore_state(&self) {
        let Some(paths) = &self.state_paths else {
            return;
        };
        let restored = persist::load(paths);
        let Some(terminal) = restored.terminal else {
            return;
        };

        let mut out = self.output.lock();
        if let Err(e) = out.terminal.restore_bytes(&terminal) {
            debug!(session_id = %self.id, error = %e, "ignoring unreadable terminal state");
            return;
        }
        let emulator_alt = out.terminal.is_alt_screen();
        out.modes.set_alt_screen(emulator_alt);
        if let Some(graphics) = restored.graphics {
            out.graphics.restore(graphics);
        }
        if let Some(saved) = restored.modes {
            let mut modes = out.modes.snapshot();
            modes.mouse_mask = saved.mouse_mask;
            modes.mouse_sgr = saved.mouse_sgr;
            modes.mouse_utf8 = saved.mouse_utf8;
            modes.mouse_urxvt = saved.mouse_urxvt;
            if !emulator_alt {
                modes.alt_screen = saved.alt_screen;
                modes.tui_mode = saved.tui_mode;
            }
            out.modes.restore(modes);
        }
        debug!(session_id = %self.id, alt_screen = emulator_alt, "session state restored");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("cwd", &self.cwd)
            .finish_non_exhaustive()
    }
}

fn with_prefix(mut prefix: Vec<u8>, data: &[u8]) -> Vec<u8> {
    prefix.extend_from_slice(data);
    prefix
}

/// Poll until the child exits or `timeout` passes; true if it exited
async fn wait_for_exit(pty: &PtyHandle, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match pty.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "wait on child failed");
                return false;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use sessiond_protocol::MouseEncoding;
    use tempfile::TempDir;

    fn test_session(dir: &TempDir) -> Arc<Session> {
        let options = SessionOptions {
            history_lines: 100,
            queue_depth: 4,
            initial_credit: 1024,
            ..SessionOptions::for_dir(dir.path())
        };
        Session::new("ws", dir.path(), options)
    }

    fn drain(events: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn data_of(events: &[StreamEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Data(d) => Some(d.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    // ==================== Lifecycle Tests ====================

    #[tokio::test]
    async fn test_new_session_not_running() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        assert!(!session.is_running());
        assert!(!session.is_closed());
        let info = session.info();
        assert_eq!(info.session_id, "ws");
        assert!(!info.running);
        assert!(DateTime::parse_from_rfc3339(&info.started_at).is_ok());
    }

    #[tokio::test]
    async fn test_write_without_pty() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let err = session.write(b"ls\n").unwrap_err();
        assert_eq!(err.to_string(), "terminal not started");
        assert!(session.resize(100, 30).is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        session.set_on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let attachment = session.attach("s1", 0).unwrap();

        session.close("stop").await;
        session.close("again").await;

        assert!(session.is_closed());
        assert!(!session.is_running());
        assert_eq!(session.close_reason().as_deref(), Some("stop"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(attachment.subscriber.is_closed());
        assert_eq!(session.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_start_and_close_shell() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        session.start().await.unwrap();
        assert!(session.is_running());
        assert!(dir.path().join("terminal_logs").join("ws.log").exists());

        session.write(b"echo hi\n").unwrap();
        session.resize(1, 0).unwrap();
        session.close("closed").await;
        assert!(!session.is_running());
        assert!(dir.path().join("state").join("ws.state").exists());
    }

    // ==================== Pipeline Tests ====================

    #[tokio::test]
    async fn test_output_reaches_buffer_and_stream() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let mut attachment = session.attach("s1", 0).unwrap();

        session.process_output(b"hello\r\n");

        let events = drain(&mut attachment.events);
        assert_eq!(data_of(&events), b"hello\r\n");
        let backlog = session.backlog(1).unwrap();
        assert_eq!(backlog.source, "buffer");
        assert_eq!(backlog.data, "ello\r\n");
        assert_eq!(backlog.next_offset, 7);
    }

    #[tokio::test]
    async fn test_color_reports_are_scrubbed() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let mut attachment = session.attach("s1", 0).unwrap();

        session.process_output(b"a\x1b]11;rgb:0000/0000/0000\x07b\x1b[12;5R");

        let events = drain(&mut attachment.events);
        assert_eq!(data_of(&events), b"ab");
    }

    #[tokio::test]
    async fn test_c1_normalized_before_emulator() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let mut attachment = session.attach("s1", 0).unwrap();

        session.process_output(b"\x9b31mred");

        let events = drain(&mut attachment.events);
        assert_eq!(data_of(&events), b"\x1b[31mred");
    }

    #[tokio::test]
    async fn test_graphics_events_broadcast() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let mut attachment = session.attach("s1", 0).unwrap();

        session.process_output(b"\x1b_Ga=T,f=24,s=1,v=1,c=2,r=3;AAAAAA==\x1b\\");

        let events = drain(&mut attachment.events);
        let kitty: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Kitty(k) => Some(k),
                _ => None,
            })
            .collect();
        assert_eq!(kitty.len(), 2);
        assert!(kitty[0].image.is_some());
        assert!(kitty[1].placement.is_some());
        assert!(session.snapshot().kitty.is_some());
    }

    #[tokio::test]
    async fn test_clear_screen_clears_graphics() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        session.process_output(b"\x1b_Ga=T,f=24,s=1,v=1;AAAA\x1b\\");
        assert!(session.snapshot().kitty.is_some());

        let mut attachment = session.attach("s1", 0).unwrap();
        session.process_output(b"\x1b[2J");

        let events = drain(&mut attachment.events);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::Kitty(k) if k.delete.as_ref().is_some_and(|d| d.all)
        )));
        assert!(session.snapshot().kitty.is_none());
    }

    #[tokio::test]
    async fn test_split_clear_screen_clears_graphics() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        session.process_output(b"\x1b_Ga=T,f=24,s=1,v=1;AAAA\x1b\\");
        assert!(session.snapshot().kitty.is_some());

        session.process_output(b"done\x1b[2");
        assert!(session.snapshot().kitty.is_some());
        session.process_output(b"J");
        assert!(session.snapshot().kitty.is_none());
    }

    #[tokio::test]
    async fn test_mode_changes_broadcast() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let mut attachment = session.attach("s1", 0).unwrap();

        session.process_output(b"\x1b[?10");
        session.process_output(b"06h\x1b[?1000h");

        let events = drain(&mut attachment.events);
        let modes = events
            .iter()
            .rev()
            .find_map(|e| match e {
                StreamEvent::Modes(m) => Some(*m),
                _ => None,
            })
            .unwrap();
        assert!(modes.mouse());
        assert!(modes.mouse_sgr);
        assert_eq!(session.snapshot().mouse_encoding, MouseEncoding::Sgr);
    }

    #[tokio::test]
    async fn test_overflowing_stream_is_dropped() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let slow = session.attach("slow", 0).unwrap();
        let mut fast = session.attach("fast", 0).unwrap();

        for i in 0..8 {
            session.process_output(format!("line {}\r\n", i).as_bytes());
            drain(&mut fast.events);
        }

        assert!(slow.subscriber.is_closed());
        assert!(!fast.subscriber.is_closed());
        assert_eq!(session.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_last_unsubscribe_clears_mouse() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let first = session.attach("a", 0).unwrap();
        let second = session.attach("b", 0).unwrap();
        session.process_output(b"\x1b[?1002h");
        assert!(session.modes().mouse());

        session.unsubscribe(&first.subscriber);
        assert!(session.modes().mouse());
        session.unsubscribe(&second.subscriber);
        assert!(!session.modes().mouse());
        assert!(second.subscriber.is_closed());
    }

    #[tokio::test]
    async fn test_unsubscribe_replaced_stream_keeps_successor() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let old = session.attach("same", 0).unwrap();
        let new = session.attach("same", 0).unwrap();
        assert!(old.subscriber.is_closed());

        session.unsubscribe(&old.subscriber);
        assert_eq!(session.subscriber_count(), 1);
        assert!(!new.subscriber.is_closed());
    }

    // ==================== Backlog Tests ====================

    #[tokio::test]
    async fn test_backlog_history_when_since_zero() {
        let dir = TempDir::new().unwrap();
        let options = SessionOptions {
            rows: 2,
            cols: 10,
            history_lines: 4,
            ..SessionOptions::for_dir(dir.path())
        };
        let session = Session::new("ws", dir.path(), options);
        session.process_output(b"one\r\ntwo\r\nthree\r\n");

        let backlog = session.backlog(0).unwrap();
        assert_eq!(backlog.source, "history");
        assert!(backlog.data.contains("one"));

        let backlog = session.backlog(5).unwrap();
        assert_eq!(backlog.source, "buffer");
        assert!(backlog.data.starts_with("two"));
    }

    #[tokio::test]
    async fn test_backlog_alt_screen_and_tui() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        session.process_output(b"\x1b[?1049hvim");

        let backlog = session.backlog(0).unwrap();
        assert_eq!(backlog.source, "snapshot");
        assert!(backlog.data.contains("vim"));
        assert!(!backlog.truncated);

        let snapshot = session.snapshot();
        assert!(snapshot.alt_screen);
        assert!(!snapshot.safe_to_replay);
    }

    #[tokio::test]
    async fn test_backlog_falls_back_to_transcript() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("terminal_logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("ws.log"), b"previous run").unwrap();

        let session = test_session(&dir);
        let backlog = session.backlog(0).unwrap();
        assert_eq!(backlog.source, "transcript");
        assert_eq!(backlog.data, "previous run");
        assert_eq!(backlog.next_offset, 0);
    }

    #[tokio::test]
    async fn test_backlog_negative_since() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        session.process_output(b"abc");
        let backlog = session.backlog(-5).unwrap();
        assert_eq!(backlog.source, "buffer");
        assert_eq!(backlog.data, "abc");
    }

    #[tokio::test]
    async fn test_truncated_backlog_restores_modes() {
        let dir = TempDir::new().unwrap();
        let options = SessionOptions {
            buffer_bytes: 16,
            ..SessionOptions::for_dir(dir.path())
        };
        let session = Session::new("ws", dir.path(), options);
        session.process_output(b"\x1b[?1002h");
        session.process_output(b"xxxxxxxxxxxx");
        session.process_output(b"yyyyyyyyyyyy");

        let backlog = session.backlog(0).unwrap();
        assert_eq!(backlog.source, "buffer");
        assert!(backlog.truncated);
        assert!(backlog.data.starts_with("\x1b[?1002h"));
        assert!(backlog.data.ends_with("yyyyyyyyyyyy"));
        assert_eq!(backlog.data.matches("\x1b[?1002h").count(), 1);

        // Complete replays already carry their own mode sequences
        let full = test_session(&dir);
        full.process_output(b"\x1b[?1002hz");
        assert_eq!(full.backlog(0).unwrap().data, "\x1b[?1002hz");
    }

    #[tokio::test]
    async fn test_transcript_backlog_restores_modes() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("terminal_logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("ws.log"), b"previous run").unwrap();

        let session = test_session(&dir);
        session.output.lock().modes.observe(b"\x1b[?1000;1006h");
        let backlog = session.backlog(0).unwrap();
        assert_eq!(backlog.source, "transcript");
        assert_eq!(backlog.data, "\x1b[?1000h\x1b[?1006hprevious run");
    }

    // ==================== Bootstrap Tests ====================

    #[tokio::test]
    async fn test_bootstrap_fields() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        session.process_output(b"prompt$ ");

        let bootstrap = session.bootstrap().unwrap();
        assert_eq!(bootstrap.session_id, "ws");
        assert_eq!(bootstrap.snapshot_source, "snapshot");
        assert!(bootstrap.snapshot.contains("prompt$"));
        assert_eq!(bootstrap.initial_credit, 1024);
        assert!(bootstrap.safe_to_replay);
        assert!(!bootstrap.replay_text().is_empty());
    }

    #[tokio::test]
    async fn test_attach_bootstrap_then_live() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        session.process_output(b"before");

        let mut attachment = session.attach("", 0).unwrap();
        assert!(attachment.subscriber.stream_id().starts_with("stream-"));
        assert!(attachment.bootstrap.snapshot.contains("before"));
        assert!(drain(&mut attachment.events).is_empty());

        session.process_output(b"after");
        assert_eq!(data_of(&drain(&mut attachment.events)), b"after");
    }

    // ==================== Credit / Lease Tests ====================

    #[tokio::test]
    async fn test_ack() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        let attachment = session.attach("s1", 0).unwrap();

        assert!(session.ack("missing", 0).is_ok());
        assert_eq!(
            session.ack("missing", 10).unwrap_err().to_string(),
            "stream not found"
        );
        session.ack("s1", 10).unwrap();
        assert_eq!(attachment.subscriber.credit(), 1034);
    }

    #[tokio::test]
    async fn test_write_lease() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        assert_eq!(session.owner(), "");
        assert_eq!(session.set_owner("ui-1"), "ui-1");

        let err = session.write_for_owner(b"x", "ui-2").unwrap_err();
        assert_eq!(err.to_string(), "session lease held by ui-1");
        let err = session.write_for_owner(b"x", "").unwrap_err();
        assert!(matches!(err, SessiondError::LeaseHeld { .. }));

        // Owner passes the lease check and reaches the missing PTY
        let err = session.write_for_owner(b"x", "ui-1").unwrap_err();
        assert!(matches!(err, SessiondError::TerminalNotStarted));

        session.set_owner("");
        let err = session.write_for_owner(b"x", "ui-2").unwrap_err();
        assert!(matches!(err, SessiondError::TerminalNotStarted));
    }

    // ==================== Persistence Tests ====================

    #[tokio::test]
    async fn test_state_restored_by_new_session() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        session.process_output(b"\x1b[?1049h\x1b[?1000hfull screen app");
        session.close("closed").await;

        let restored = test_session(&dir);
        restored.restore_state();
        let snapshot = restored.snapshot();
        assert!(snapshot.alt_screen);
        assert!(snapshot.data.contains("full screen app"));
        assert_eq!(snapshot.mouse_mask, 1);
        assert_eq!(restored.backlog(0).unwrap().source, "snapshot");
    }

    #[tokio::test]
    async fn test_restore_without_state_is_noop() {
        let dir = TempDir::new().unwrap();
        let session = test_session(&dir);
        session.restore_state();
        assert!(!session.snapshot().alt_screen);
    }
}
