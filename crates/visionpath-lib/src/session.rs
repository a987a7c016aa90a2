//! Session actor — owns all relay state for one UI session.
//!
//! ```text
//! SessionHandle ──[cmd_tx]──┐
//! connectivity ──[watch]────┤
//! advance timer (5s) ───────┼──▶ session task: SessionState ──▶ SpeechOutput
//! prompt timer (10s) ───────┤                     │
//! welcome timer (1s) ───────┘                     └──[status watch]──▶ status()
//! ```
//!
//! Every handler runs on the one task, so `cursor`, `last_utterance`, the
//! responses, and the observed connectivity are never touched concurrently.
//! Work that needs the network (assistant chat) leaves as a [`SessionEvent`].
//!
//! Shutdown stops the timers and flushes pending speech. Dropping a
//! [`Session`] without calling [`Session::shutdown`] aborts the task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant as StdInstant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use visionpath_core::command::{parse_command, VoiceCommand};
use visionpath_core::onboarding::{Onboarding, OnboardingStep};
use visionpath_core::pacer::PlaybackPacer;
use visionpath_core::relay;
use visionpath_core::text_prep::char_len;
use visionpath_core::types::{Mode, RelayConfig, Responses, SessionStatus, SpeechRequest};
use visionpath_core::voice::{VoiceEvent, VoiceMachine};

use crate::error::GenerationError;
use crate::speech::SpeechOutput;

/// Things the session wants done outside the actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    BlindModeStarted,
    ModeChanged(Mode),
    /// A spoken question for the assistant.
    Ask(String),
}

/// Identifies one streamed response. A newer `begin_response` for the same
/// mode supersedes it, and its remaining chunks are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseId {
    mode: Mode,
    seq: u64,
}

impl ResponseId {
    pub fn mode(&self) -> Mode {
        self.mode
    }
}

#[derive(Debug)]
enum Cmd {
    SetMode(Mode),
    SetResponse { mode: Mode, text: String },
    BeginResponse(ResponseId),
    AppendChunk {
        mode: Mode,
        chunk: String,
        /// `None` appends to whatever response is current.
        response: Option<u64>,
    },
    SetWatermark(usize),
    Narrate,
    Voice(VoiceEvent),
    StartBlindMode,
    ReportError(String),
    Shutdown,
}

/// Cloneable handle to a running session. All methods are non-blocking.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    status_rx: watch::Receiver<SessionStatus>,
    next_seq: Arc<AtomicU64>,
}

impl SessionHandle {
    pub fn set_mode(&self, mode: Mode) {
        let _ = self.cmd_tx.send(Cmd::SetMode(mode));
    }

    /// Replace the text of one mode.
    pub fn set_response(&self, mode: Mode, text: impl Into<String>) {
        let _ = self.cmd_tx.send(Cmd::SetResponse {
            mode,
            text: text.into(),
        });
    }

    /// Clear a mode's text ahead of a new streamed response.
    pub fn begin_response(&self, mode: Mode) -> ResponseId {
        let id = ResponseId {
            mode,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed) + 1,
        };
        let _ = self.cmd_tx.send(Cmd::BeginResponse(id));
        id
    }

    /// Append a streamed chunk to a mode's current text.
    pub fn append_chunk(&self, mode: Mode, chunk: impl Into<String>) {
        self.send_chunk(mode, chunk.into(), None);
    }

    /// Append a chunk of `response`. Dropped if a newer response has begun.
    pub fn append_response_chunk(&self, response: ResponseId, chunk: impl Into<String>) {
        self.send_chunk(response.mode, chunk.into(), Some(response.seq));
    }

    fn send_chunk(&self, mode: Mode, chunk: String, response: Option<u64>) {
        if !chunk.is_empty() {
            let _ = self.cmd_tx.send(Cmd::AppendChunk {
                mode,
                chunk,
                response,
            });
        }
    }

    /// Override how much of the navigation text counts as already spoken.
    pub fn set_watermark(&self, index: usize) {
        let _ = self.cmd_tx.send(Cmd::SetWatermark(index));
    }

    /// Speak the active mode's text now.
    pub fn narrate(&self) {
        let _ = self.cmd_tx.send(Cmd::Narrate);
    }

    pub fn voice_event(&self, event: VoiceEvent) {
        let _ = self.cmd_tx.send(Cmd::Voice(event));
    }

    /// Leave onboarding without the wake phrase (double tap).
    pub fn start_blind_mode(&self) {
        let _ = self.cmd_tx.send(Cmd::StartBlindMode);
    }

    pub fn report_error(&self, error: &GenerationError) {
        let _ = self.cmd_tx.send(Cmd::ReportError(error.to_string()));
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

pub struct Session {
    handle: SessionHandle,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Spawn the session task. Must be called from within a tokio runtime.
    pub fn start(
        config: RelayConfig,
        speech: Arc<dyn SpeechOutput>,
        online_rx: watch::Receiver<bool>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let online = *online_rx.borrow();
        let state = SessionState::new(config, speech, events_tx, online);
        let (status_tx, status_rx) = watch::channel(state.snapshot());

        let task = tokio::spawn(run(state, cmd_rx, online_rx, status_tx));

        Self {
            handle: SessionHandle {
                cmd_tx,
                status_rx,
                next_seq: Arc::new(AtomicU64::new(0)),
            },
            events_rx: Some(events_rx),
            task: Some(task),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Outbound events. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Stop timers, drop pending speech, and wait for the task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.handle.cmd_tx.send(Cmd::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ─── Actor ─────────────────────────────────────────────────────────────────

struct SessionState {
    mode: Mode,
    responses: Responses,
    /// Sequence number of the latest streamed response per mode.
    current_response: HashMap<Mode, u64>,
    pacer: PlaybackPacer,
    /// Characters of the navigation text already handed to speech.
    watermark: usize,
    online: bool,
    voice: VoiceMachine,
    onboarding: Onboarding,
    last_error: Option<String>,
    config: RelayConfig,
    speech: Arc<dyn SpeechOutput>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

fn every(start: Instant, period: std::time::Duration) -> Interval {
    let mut ticker = interval_at(start + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn now() -> StdInstant {
    Instant::now().into_std()
}

async fn run(
    mut state: SessionState,
    mut cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    mut online_rx: watch::Receiver<bool>,
    status_tx: watch::Sender<SessionStatus>,
) {
    let start = Instant::now();
    let mut advance = every(start, state.config.advance_interval());
    let mut prompt = every(start, state.config.prompt_interval());
    let mut welcome = every(start, state.config.welcome_interval());
    let mut online_open = true;

    info!("session started (mode {})", state.mode);
    state.on_start();
    status_tx.send_replace(state.snapshot());

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None | Some(Cmd::Shutdown) => break,
                Some(cmd) => state.apply(cmd),
            },
            _ = advance.tick() => state.on_advance(),
            _ = prompt.tick() => state.on_prompt_check(),
            _ = welcome.tick() => state.on_welcome_check(),
            changed = online_rx.changed(), if online_open => match changed {
                Ok(()) => {
                    let online = *online_rx.borrow_and_update();
                    state.on_connectivity(online);
                }
                Err(_) => {
                    debug!("session: connectivity source closed");
                    online_open = false;
                }
            },
        }
        status_tx.send_replace(state.snapshot());
    }

    state.speech.stop();
    info!("session ended");
}

impl SessionState {
    fn new(
        config: RelayConfig,
        speech: Arc<dyn SpeechOutput>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        online: bool,
    ) -> Self {
        let mut onboarding = Onboarding::new(&config, now());
        if !config.onboarding {
            let _ = onboarding.start_blind_mode();
        }
        Self {
            mode: Mode::Navigation,
            responses: Responses::default(),
            current_response: HashMap::new(),
            pacer: PlaybackPacer::new(config.offline_message.clone()),
            watermark: 0,
            online,
            voice: VoiceMachine::default(),
            onboarding,
            last_error: None,
            config,
            speech,
            events_tx,
        }
    }

    fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            mode: self.mode,
            online: self.online,
            cursor: self.pacer.cursor(),
            sentences: self.pacer.sentences().to_vec(),
            last_utterance: self.pacer.last_utterance().to_string(),
            watermark: self.watermark,
            voice_state: self.voice.state(),
            listening: self.voice.is_listening(),
            blind_mode: !self.onboarding.is_listening(),
            responses: self.responses.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn speak(&self, request: SpeechRequest) {
        debug!(
            "speak [{} {:?}] {:?}",
            request.utterance_id, request.mode, request.text
        );
        self.speech.speak(request);
    }

    fn speak_opt(&self, request: Option<SpeechRequest>) {
        if let Some(request) = request {
            self.speak(request);
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn on_start(&mut self) {
        if self.onboarding.is_listening() {
            let greeting = self.onboarding.greeting();
            self.speak(greeting);
        }
        if !self.online {
            let warning = self.pacer.on_connectivity(false);
            self.speak_opt(warning);
        }
    }

    fn apply(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::SetMode(mode) => self.set_mode(mode),
            Cmd::SetResponse { mode, text } => {
                let current = self.responses.get(mode);
                if current == text {
                    return;
                }
                if mode == Mode::Navigation && !text.starts_with(current) {
                    self.watermark = 0;
                }
                *self.responses.get_mut(mode) = text;
                self.on_text_changed(mode);
            }
            Cmd::BeginResponse(ResponseId { mode, seq }) => {
                if seq < self.current_seq(mode) {
                    debug!("session: {mode} response {seq} already superseded");
                    return;
                }
                self.current_response.insert(mode, seq);
                self.last_error = None;
                if mode == Mode::Navigation {
                    self.watermark = 0;
                }
                if !self.responses.get(mode).is_empty() {
                    self.responses.get_mut(mode).clear();
                    self.on_text_changed(mode);
                }
            }
            Cmd::AppendChunk {
                mode,
                chunk,
                response,
            } => {
                if response.is_some_and(|seq| seq != self.current_seq(mode)) {
                    debug!("session: dropping chunk of superseded {mode} response");
                    return;
                }
                self.responses.get_mut(mode).push_str(&chunk);
                self.on_text_changed(mode);
            }
            Cmd::SetWatermark(index) => self.watermark = index,
            Cmd::Narrate => self.narrate(),
            Cmd::Voice(event) => self.on_voice_event(event),
            Cmd::StartBlindMode => {
                if self.onboarding.is_listening() {
                    let step = self.onboarding.start_blind_mode();
                    self.apply_step(step);
                }
            }
            Cmd::ReportError(message) => {
                info!("session: generation failed: {message}");
                self.last_error = Some(message);
            }
            Cmd::Shutdown => {}
        }
    }

    fn current_seq(&self, mode: Mode) -> u64 {
        self.current_response.get(&mode).copied().unwrap_or(0)
    }

    fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        info!("session: mode {} -> {}", self.mode, mode);
        self.mode = mode;
        self.pacer.reset_cursor();
        self.emit(SessionEvent::ModeChanged(mode));
        self.on_text_changed(mode);
    }

    /// Re-run the pacer's new-response trigger and the mode relay.
    fn on_text_changed(&mut self, changed: Mode) {
        if changed == Mode::Navigation && self.mode == Mode::Navigation {
            if self.online {
                let req = self.pacer.on_response_changed(&self.responses.navigation);
                self.speak_opt(req);
            } else {
                self.pacer.set_text(&self.responses.navigation);
            }
        }

        if !self.online {
            return;
        }
        if let Some(req) = relay::route(self.mode, &self.responses, self.watermark) {
            self.speak(req);
            self.watermark = char_len(&self.responses.navigation);
        }
    }

    fn narrate(&self) {
        let req = relay::narrate(self.mode, &self.responses);
        self.speak_opt(req);
    }

    fn on_advance(&mut self) {
        let req = if self.mode == Mode::Navigation {
            self.pacer.on_tick(self.online)
        } else {
            self.pacer.on_connectivity(self.online)
        };
        self.speak_opt(req);
    }

    fn on_connectivity(&mut self, online: bool) {
        if online == self.online {
            return;
        }
        info!("session: {}", if online { "back online" } else { "offline" });
        self.online = online;
        let req = self.pacer.on_connectivity(online);
        self.speak_opt(req);
    }

    fn on_prompt_check(&mut self) {
        let req = self.onboarding.check_prompt(now());
        self.speak_opt(req);
    }

    fn on_welcome_check(&mut self) {
        let req = self.onboarding.check_welcome(now(), self.voice.is_speaking());
        self.speak_opt(req);
    }

    fn on_voice_event(&mut self, event: VoiceEvent) {
        match &event {
            VoiceEvent::ListenStarted => self.onboarding.record_ready(now()),
            VoiceEvent::ResultsReceived { .. } => self.onboarding.record_interaction(now()),
            _ => {}
        }
        if let Some(transcript) = self.voice.handle(event) {
            self.on_transcript(&transcript);
        }
    }

    fn on_transcript(&mut self, transcript: &str) {
        let Some(command) = parse_command(transcript) else {
            return;
        };
        debug!("session: command {command:?}");

        if self.onboarding.is_listening() {
            let step = self.onboarding.handle(&command, now());
            self.apply_step(step);
            return;
        }

        match command {
            VoiceCommand::SwitchMode(mode) => self.set_mode(mode),
            VoiceCommand::Narrate => self.narrate(),
            VoiceCommand::Utterance(text) if self.mode == Mode::Assistant => {
                self.emit(SessionEvent::Ask(text));
            }
            VoiceCommand::HeyMetro | VoiceCommand::StartMetro | VoiceCommand::Utterance(_) => {}
        }
    }

    fn apply_step(&mut self, step: OnboardingStep) {
        self.speak_opt(step.speech);
        if step.blind_mode_started {
            info!("session: blind mode started");
            self.emit(SessionEvent::BlindModeStarted);
        }
    }
}
