//! Turn controller: the one place that decides when to listen and when to speak.
//!
//! The controller owns the turn phase and is the only caller of
//! [`SpeechInput::start`]/[`SpeechInput::stop`] and [`SpeechOutput::speak`].
//! Everything else (port callbacks, user commands, query results, timers)
//! arrives as a [`TurnEvent`] and is handled one at a time on the controller's
//! task, so no state is shared and nothing needs locking.
//!
//! Suspension points are never awaited inline. Queries run as spawned tasks
//! and report back with their turn number; playback reports back with its
//! request id. Each handler checks the current phase before acting, so a late
//! result from a cancelled query or an interrupted utterance is ignored.

use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use crate::filter::{QueryKind, UtteranceFilter, Verdict};
use crate::pipeline::messages::{
    ControlCommand, InputErrorKind, InputEvent, PlaybackEvent, QueryOutcome, TurnEvent, Utterance,
};
use crate::pipeline::queue::{EnqueueAction, SpeechOutputQueue};
use crate::pipeline::state::{Arming, ListeningMode, TurnState};
use crate::ports::{FrameSource, SceneService, SpeechInput, SpeechOutput, SpeechRequest};
use crate::runtime::RuntimeEvent;
use crate::watchdog::{ListeningWatchdog, WatchdogAction, WatchdogEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Sender halves handed to port implementations.
#[derive(Debug, Clone)]
pub struct PortEvents {
    /// For the speech-input port.
    pub input: mpsc::UnboundedSender<InputEvent>,
    /// For the speech-output port.
    pub playback: mpsc::UnboundedSender<PlaybackEvent>,
}

/// Receiver halves consumed by the controller.
#[derive(Debug)]
pub struct ControllerInbox {
    input_rx: mpsc::UnboundedReceiver<InputEvent>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
}

/// Create the port event channels.
///
/// Build the ports with [`PortEvents`], then pass the [`ControllerInbox`] to
/// [`TurnController::new`].
pub fn event_channels() -> (PortEvents, ControllerInbox) {
    let (input, input_rx) = mpsc::unbounded_channel();
    let (playback, playback_rx) = mpsc::unbounded_channel();
    (
        PortEvents { input, playback },
        ControllerInbox {
            input_rx,
            playback_rx,
        },
    )
}

/// The capabilities the controller drives.
pub struct Ports {
    /// Speech-to-text.
    pub input: Box<dyn SpeechInput>,
    /// Text-to-speech playback.
    pub output: Box<dyn SpeechOutput>,
    /// Vision + language service.
    pub scene: Arc<dyn SceneService>,
    /// Camera.
    pub frames: Arc<dyn FrameSource>,
}

/// Cloneable handle for sending commands and observing state.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    state: watch::Receiver<TurnState>,
    cancel: CancellationToken,
}

impl ControllerHandle {
    /// Send a command to the controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller has shut down.
    pub fn send(&self, command: ControlCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| AssistantError::Channel("turn controller has shut down".into()))
    }

    /// Latest published turn state.
    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    /// A receiver that wakes on every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<TurnState> {
        self.state.clone()
    }

    /// Stop the controller loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Where the controller is inside a turn. [`TurnState`] and [`Arming`] are
/// both derived from this, so the two capabilities cannot be held at once.
#[derive(Debug)]
enum Phase {
    Idle,
    Listening,
    Processing {
        turn: u64,
        cancel: CancellationToken,
    },
    Speaking(Playback),
}

#[derive(Debug)]
enum Playback {
    /// Speech request `id` is playing. `barge_in` is set when an interrupt
    /// could not stop it; the turn is handed back as soon as it ends.
    Active { id: u64, barge_in: bool },
    /// Playback ended; waiting out the settle delay before reopening the mic.
    Settling {
        generation: u64,
        cancel: CancellationToken,
    },
}

impl Phase {
    fn turn_state(&self) -> TurnState {
        match self {
            Self::Idle => TurnState::Idle,
            Self::Listening => TurnState::Listening,
            Self::Processing { .. } => TurnState::Processing,
            Self::Speaking(_) => TurnState::Speaking,
        }
    }

    fn arming(&self) -> Arming {
        Arming {
            mic: matches!(self, Self::Listening),
            playback: matches!(self, Self::Speaking(Playback::Active { .. })),
        }
    }
}

/// Turn-taking state machine arbitrating one microphone and one speaker.
pub struct TurnController {
    config: AssistantConfig,
    input: Box<dyn SpeechInput>,
    output: Box<dyn SpeechOutput>,
    scene: Arc<dyn SceneService>,
    frames: Arc<dyn FrameSource>,
    filter: UtteranceFilter,
    queue: SpeechOutputQueue,
    watchdog: ListeningWatchdog,
    phase: Phase,
    mode: ListeningMode,
    /// Consecutive no-input errors since the last final transcript.
    no_input_streak: u32,
    next_turn: u64,
    next_speech_id: u64,
    next_settle: u64,
    inbox: ControllerInbox,
    internal_tx: mpsc::UnboundedSender<TurnEvent>,
    internal_rx: mpsc::UnboundedReceiver<TurnEvent>,
    command_tx: mpsc::UnboundedSender<ControlCommand>,
    command_rx: mpsc::UnboundedReceiver<ControlCommand>,
    state_tx: watch::Sender<TurnState>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    cancel: CancellationToken,
}

impl TurnController {
    /// Create a controller. Nothing happens until [`run`](Self::run).
    pub fn new(config: AssistantConfig, ports: Ports, inbox: ControllerInbox) -> Self {
        let cancel = CancellationToken::new();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(TurnState::Idle);
        let watchdog = ListeningWatchdog::new(&config.watchdog, internal_tx.clone(), cancel.clone());
        let mode = if config.turn.continuous {
            ListeningMode::Continuous
        } else {
            ListeningMode::Manual
        };
        Self {
            filter: UtteranceFilter::new(&config.filter),
            queue: SpeechOutputQueue::new(&config.queue),
            watchdog,
            input: ports.input,
            output: ports.output,
            scene: ports.scene,
            frames: ports.frames,
            phase: Phase::Idle,
            mode,
            no_input_streak: 0,
            next_turn: 0,
            next_speech_id: 0,
            next_settle: 0,
            inbox,
            internal_tx,
            internal_rx,
            command_tx,
            command_rx,
            state_tx,
            runtime_tx: None,
            cancel,
            config,
        }
    }

    /// Attach a runtime event broadcaster for UI/observability.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// A handle for commands and state observation. Take it before `run`.
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            commands: self.command_tx.clone(),
            state: self.state_tx.subscribe(),
            cancel: self.cancel.clone(),
        }
    }

    /// Get a clone of the cancellation token for external use.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current turn state.
    pub fn state(&self) -> TurnState {
        self.phase.turn_state()
    }

    /// Which capability is currently held.
    pub fn arming(&self) -> Arming {
        self.phase.arming()
    }

    /// Current listening mode.
    pub fn mode(&self) -> &ListeningMode {
        &self.mode
    }

    /// Responses waiting to be spoken.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Run the controller until shut down.
    ///
    /// In continuous mode listening starts immediately.
    ///
    /// # Errors
    ///
    /// Currently infallible; port failures are recovered in place.
    pub async fn run(mut self) -> Result<()> {
        info!(mode = ?self.mode, "turn controller starting");

        if self.mode.is_continuous() {
            self.watchdog.arm();
            self.begin_listening().await;
        }

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(command) = self.command_rx.recv() => TurnEvent::Command(command),
                Some(ev) = self.inbox.input_rx.recv() => TurnEvent::Input(ev),
                Some(ev) = self.inbox.playback_rx.recv() => TurnEvent::Playback(ev),
                Some(ev) = self.internal_rx.recv() => ev,
                else => break,
            };
            if matches!(event, TurnEvent::Command(ControlCommand::Shutdown)) {
                info!("shutdown requested");
                break;
            }
            self.dispatch(event).await;
        }

        self.release().await;
        info!("turn controller stopped");
        Ok(())
    }

    async fn dispatch(&mut self, event: TurnEvent) {
        trace!(?event, state = %self.state(), "turn event");
        match event {
            TurnEvent::Command(command) => self.on_command(command).await,
            TurnEvent::Input(ev) => self.on_input(ev).await,
            TurnEvent::Playback(ev) => self.on_playback(ev).await,
            TurnEvent::QueryFinished { turn, outcome } => {
                self.on_query_finished(turn, outcome).await;
            }
            TurnEvent::SettleElapsed { generation } => self.on_settle_elapsed(generation).await,
            TurnEvent::Watchdog(ev) => self.on_watchdog(ev).await,
        }
        debug_assert!(self.arming().is_exclusive());
    }

    // -- Commands --

    async fn on_command(&mut self, command: ControlCommand) {
        debug!(?command, state = %self.state(), "command");
        match command {
            ControlCommand::StartListening => {
                self.mode = ListeningMode::Continuous;
                self.watchdog.arm();
                self.listen_if_idle().await;
            }
            ControlCommand::ListenOnce => {
                if !self.mode.is_continuous() {
                    self.mode = ListeningMode::Manual;
                }
                self.listen_if_idle().await;
            }
            ControlCommand::StopListening => {
                if self.mode.is_continuous() {
                    self.mode = ListeningMode::Manual;
                }
                self.watchdog.disarm();
                if matches!(self.phase, Phase::Listening) {
                    self.end_listening().await;
                    self.set_phase(Phase::Idle);
                }
            }
            ControlCommand::Interrupt => self.interrupt().await,
            ControlCommand::DescribeScene => match self.phase {
                Phase::Idle | Phase::Listening => {
                    if matches!(self.phase, Phase::Listening) {
                        self.end_listening().await;
                    }
                    self.start_query(QueryKind::DescribeScene, String::new());
                }
                Phase::Processing { .. } | Phase::Speaking(_) => {
                    debug!("describe request ignored while {}", self.state());
                }
            },
            ControlCommand::Shutdown => self.cancel.cancel(),
        }
    }

    async fn listen_if_idle(&mut self) {
        match self.phase {
            Phase::Idle => self.begin_listening().await,
            Phase::Listening if !self.input.is_active() => self.begin_listening().await,
            // The turn in progress resumes listening when it ends.
            Phase::Listening | Phase::Processing { .. } | Phase::Speaking(_) => {}
        }
    }

    /// Barge-in: drop everything in flight and hand the turn back to the user.
    async fn interrupt(&mut self) {
        let busy = !matches!(self.phase, Phase::Idle | Phase::Listening);
        if !busy && self.queue.is_empty() {
            debug!("interrupt: nothing to interrupt");
            return;
        }

        match &self.phase {
            Phase::Processing { cancel, .. }
            | Phase::Speaking(Playback::Settling { cancel, .. }) => cancel.cancel(),
            Phase::Idle | Phase::Listening | Phase::Speaking(Playback::Active { .. }) => {}
        }
        if let Phase::Speaking(Playback::Active { id, .. }) = self.phase {
            if let Err(e) = self.output.cancel().await {
                // The speaker may still be playing; the mic stays closed
                // until the port reports the end of request `id`.
                warn!(id, "failed to cancel playback: {e}");
                let dropped = self.queue.clear();
                info!(dropped, "interrupted; waiting for playback to end");
                self.emit(RuntimeEvent::Interrupted);
                self.phase = Phase::Speaking(Playback::Active { id, barge_in: true });
                return;
            }
        }
        let dropped = self.queue.clear();
        info!(dropped, from = %self.state(), "interrupted");
        self.emit(RuntimeEvent::Interrupted);

        if self.mode.is_continuous() {
            self.begin_listening().await;
        } else {
            if matches!(self.phase, Phase::Listening) {
                self.end_listening().await;
            }
            self.set_phase(Phase::Idle);
        }
    }

    // -- Speech input --

    async fn on_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::Started => debug!("speech input started"),
            InputEvent::Result(utterance) => self.on_utterance(utterance).await,
            InputEvent::Error(kind) => self.on_input_error(kind).await,
            InputEvent::Ended => {
                if !matches!(self.phase, Phase::Listening) {
                    debug!("speech input ended while {}", self.state());
                } else if self.input.is_active() {
                    // End of a session we already replaced.
                    debug!("stale speech input end ignored");
                } else {
                    info!("speech input ended while listening");
                    self.recover_listening().await;
                }
            }
        }
    }

    async fn on_utterance(&mut self, utterance: Utterance) {
        if !utterance.is_final {
            trace!(transcript = %utterance.transcript, "partial transcript");
            return;
        }
        if !matches!(self.phase, Phase::Listening) {
            debug!(
                transcript = %utterance.transcript,
                "dropping transcript while {}",
                self.state()
            );
            return;
        }

        self.no_input_streak = 0;
        let verdict = self.filter.classify(&utterance.transcript);
        info!(transcript = %utterance.transcript, ?verdict, "final transcript");
        self.emit(RuntimeEvent::Transcript {
            text: utterance.transcript.clone(),
            verdict,
        });

        match verdict {
            Verdict::Accept(kind) => {
                self.end_listening().await;
                self.start_query(kind, utterance.transcript);
            }
            Verdict::Noise | Verdict::Echo => {}
        }
    }

    async fn on_input_error(&mut self, kind: InputErrorKind) {
        if kind.is_fatal() {
            self.enter_unavailable(kind).await;
            return;
        }

        if !matches!(self.phase, Phase::Listening) {
            // Includes no-input raised while we were speaking.
            debug!(%kind, "speech input error while {}", self.state());
            return;
        }

        if kind == InputErrorKind::NoInput {
            self.no_input_streak += 1;
            let threshold = self.config.turn.no_input_prompt_after;
            if threshold > 0 && self.no_input_streak >= threshold {
                info!(streak = self.no_input_streak, "repeated no-input; prompting");
                self.no_input_streak = 0;
                let prompt = self.config.messages.no_input_prompt.clone();
                self.announce(prompt).await;
            } else if threshold > 0 && !self.watchdog.is_armed() {
                // A one-shot turn has not heard its question yet; the streak
                // bounds how often it listens again before prompting.
                debug!(streak = self.no_input_streak, "no-input; listening again");
                if let Err(e) = self.restart_input().await {
                    warn!("speech input failed to restart: {e}");
                    self.recover_listening().await;
                }
            } else {
                debug!(streak = self.no_input_streak, "no-input");
                self.recover_listening().await;
            }
        } else if self.input.is_active() {
            debug!(%kind, "speech input error from a replaced session ignored");
        } else {
            warn!(%kind, "speech input error");
            self.recover_listening().await;
        }
    }

    /// Permission denied or unsupported: stop trying, say so once.
    async fn enter_unavailable(&mut self, kind: InputErrorKind) {
        let already = matches!(self.mode, ListeningMode::Unavailable(_));
        self.mode = ListeningMode::Unavailable(kind.clone());
        self.watchdog.disarm();
        if matches!(self.phase, Phase::Listening) {
            self.end_listening().await;
            self.set_phase(Phase::Idle);
        }
        if already {
            debug!(%kind, "speech input still unavailable");
            return;
        }

        error!(%kind, "speech input unavailable; continuous listening disabled");
        self.emit(RuntimeEvent::ListeningUnavailable {
            reason: kind.to_string(),
        });
        let message = match kind {
            InputErrorKind::PermissionDenied => self.config.messages.input_permission_denied.clone(),
            _ => self.config.messages.input_unsupported.clone(),
        };
        self.announce(message).await;
    }

    /// Open the microphone. Playback must not be active.
    async fn begin_listening(&mut self) {
        self.cancel_settle();
        self.set_phase(Phase::Listening);
        if let Err(e) = self.restart_input().await {
            warn!("speech input failed to start: {e}");
            self.recover_listening().await;
        }
    }

    /// Close the microphone.
    async fn end_listening(&mut self) {
        if let Err(e) = self.input.stop().await {
            warn!("speech input failed to stop: {e}");
        }
    }

    /// Clean stop, then start. Starting a handle that was not stopped is
    /// undefined on most platforms.
    async fn restart_input(&mut self) -> Result<()> {
        if let Err(e) = self.input.stop().await {
            debug!("stop before restart failed: {e}");
        }
        self.input.start().await
    }

    /// Listening stalled. Continuous mode retries after the watchdog backoff;
    /// a one-shot turn just ends.
    async fn recover_listening(&mut self) {
        if self.watchdog.is_armed() {
            let _ = self.watchdog.schedule_retry();
            return;
        }
        if matches!(self.phase, Phase::Listening) {
            self.end_listening().await;
            self.set_phase(Phase::Idle);
        }
    }

    // -- Watchdog --

    async fn on_watchdog(&mut self, event: WatchdogEvent) {
        match event {
            WatchdogEvent::Retry => self.watchdog.retry_fired(),
            // Queued before the watchdog was disarmed.
            WatchdogEvent::Tick if !self.watchdog.is_armed() => {
                trace!("tick from a disarmed watchdog ignored");
                return;
            }
            WatchdogEvent::Tick => {}
        }
        match ListeningWatchdog::assess(self.state(), self.input.is_active()) {
            WatchdogAction::Noop => trace!(?event, state = %self.state(), "watchdog: nothing to do"),
            WatchdogAction::Restart => {
                info!(?event, "speech input inactive while listening; restarting");
                match self.restart_input().await {
                    Ok(()) => self.emit(RuntimeEvent::ListeningRestarted),
                    Err(e) => {
                        warn!("listening restart failed: {e}");
                        let _ = self.watchdog.schedule_retry();
                    }
                }
            }
        }
    }

    // -- Scene queries --

    fn start_query(&mut self, kind: QueryKind, question: String) {
        self.next_turn += 1;
        let turn = self.next_turn;
        let token = self.cancel.child_token();

        let frames = Arc::clone(&self.frames);
        let scene = Arc::clone(&self.scene);
        let timeout = self.config.query.timeout();
        let tx = self.internal_tx.clone();
        let task_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => debug!(turn, "scene query cancelled"),
                outcome = run_query(frames, scene, kind, question, timeout) => {
                    let _ = tx.send(TurnEvent::QueryFinished { turn, outcome });
                }
            }
        });

        self.set_phase(Phase::Processing {
            turn,
            cancel: token,
        });
        info!(turn, ?kind, "scene query started");
        self.emit(RuntimeEvent::QueryStarted { turn });
    }

    async fn on_query_finished(&mut self, turn: u64, outcome: QueryOutcome) {
        let current = match self.phase {
            Phase::Processing { turn: current, .. } => current,
            _ => {
                debug!(turn, "late query result ignored while {}", self.state());
                return;
            }
        };
        if current != turn {
            debug!(turn, current, "stale query result ignored");
            return;
        }

        let text = match outcome {
            QueryOutcome::Answer(text) => text,
            QueryOutcome::CameraNotReady => {
                warn!(turn, "no camera frame available");
                self.config.messages.camera_not_ready.clone()
            }
            QueryOutcome::Failed(reason) => {
                warn!(turn, "scene query failed: {reason}");
                self.config.messages.query_failed.clone()
            }
        };
        self.enqueue_response(text);
        self.speak_next().await;
    }

    // -- Speech output --

    /// Queue `text` and start speaking if the speaker is free.
    async fn announce(&mut self, text: String) {
        if !self.enqueue_response(text) {
            return;
        }
        match self.phase {
            Phase::Idle | Phase::Listening | Phase::Speaking(Playback::Settling { .. }) => {
                self.speak_next().await;
            }
            // Drained when the current playback or query completes.
            Phase::Processing { .. } | Phase::Speaking(Playback::Active { .. }) => {}
        }
    }

    fn enqueue_response(&mut self, text: String) -> bool {
        match self.queue.enqueue(text) {
            EnqueueAction::Enqueued => true,
            EnqueueAction::ClearedBacklog(dropped) => {
                warn!(dropped, "speech queue full; discarded stale responses");
                self.emit(RuntimeEvent::QueueOverflow { dropped });
                true
            }
            EnqueueAction::DroppedEmpty => {
                debug!("empty response not queued");
                false
            }
        }
    }

    /// Speak the next queued entry. Playback must not be active.
    async fn speak_next(&mut self) {
        if matches!(self.phase, Phase::Listening) {
            self.end_listening().await;
        }
        self.cancel_settle();

        while let Some(entry) = self.queue.dequeue_next() {
            self.next_speech_id += 1;
            let id = self.next_speech_id;
            self.filter.remember_output(&entry.text);
            self.set_phase(Phase::Speaking(Playback::Active {
                id,
                barge_in: false,
            }));
            debug!(
                id,
                waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                "speaking"
            );
            self.emit(RuntimeEvent::Speaking {
                id,
                text: entry.text.clone(),
            });

            let request = SpeechRequest {
                id,
                text: entry.text,
            };
            match self.output.speak(request).await {
                Ok(()) => return,
                Err(e) => warn!(id, "playback failed to start: {e}"),
            }
        }

        self.settle_or_finish();
    }

    async fn on_playback(&mut self, event: PlaybackEvent) {
        let (active, barge_in) = match self.phase {
            Phase::Speaking(Playback::Active { id, barge_in }) => (id, barge_in),
            _ => {
                debug!(id = event.id(), "playback event ignored while {}", self.state());
                return;
            }
        };
        if active != event.id() {
            debug!(id = event.id(), active, "stale playback event ignored");
            return;
        }

        if let PlaybackEvent::Failed { id, reason } = &event {
            warn!(id, "playback failed: {reason}");
        }
        if !self.queue.is_empty() {
            self.speak_next().await;
        } else if barge_in {
            // The user already asked for the turn back; skip the settle delay.
            self.end_turn().await;
        } else {
            self.settle_or_finish();
        }
    }

    /// Playback is over and nothing is queued.
    fn settle_or_finish(&mut self) {
        if !self.mode.is_continuous() {
            self.set_phase(Phase::Idle);
            return;
        }

        self.next_settle += 1;
        let generation = self.next_settle;
        let token = self.cancel.child_token();
        let delay = self.config.turn.settle_delay();
        spawn_settle_timer(delay, generation, self.internal_tx.clone(), token.clone());
        self.set_phase(Phase::Speaking(Playback::Settling {
            generation,
            cancel: token,
        }));
    }

    async fn on_settle_elapsed(&mut self, generation: u64) {
        let current = match self.phase {
            Phase::Speaking(Playback::Settling {
                generation: current,
                ..
            }) => current,
            _ => return,
        };
        if current != generation {
            return;
        }
        self.end_turn().await;
    }

    /// Playback is over: listen again in continuous mode, otherwise go idle.
    async fn end_turn(&mut self) {
        if self.mode.is_continuous() {
            self.begin_listening().await;
        } else {
            self.set_phase(Phase::Idle);
        }
    }

    fn cancel_settle(&mut self) {
        if let Phase::Speaking(Playback::Settling { cancel, .. }) = &self.phase {
            cancel.cancel();
        }
    }

    // -- Bookkeeping --

    fn set_phase(&mut self, next: Phase) {
        let from = self.phase.turn_state();
        let to = next.turn_state();
        self.phase = next;
        if from != to {
            info!(%from, %to, "turn state");
            self.state_tx.send_replace(to);
            self.emit(RuntimeEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            let _ = tx.send(event);
        }
    }

    /// Release both capabilities on shutdown.
    async fn release(&mut self) {
        self.watchdog.disarm();
        match &self.phase {
            Phase::Processing { cancel, .. }
            | Phase::Speaking(Playback::Settling { cancel, .. }) => cancel.cancel(),
            Phase::Idle | Phase::Listening | Phase::Speaking(Playback::Active { .. }) => {}
        }
        match self.phase {
            Phase::Listening => self.end_listening().await,
            Phase::Speaking(Playback::Active { .. }) => {
                if let Err(e) = self.output.cancel().await {
                    warn!("failed to cancel playback on shutdown: {e}");
                }
            }
            _ => {}
        }
        let _ = self.queue.clear();
        self.set_phase(Phase::Idle);
    }
}

fn spawn_settle_timer(
    delay: Duration,
    generation: u64,
    tx: mpsc::UnboundedSender<TurnEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(delay) => {
                let _ = tx.send(TurnEvent::SettleElapsed { generation });
            }
        }
    });
}

/// Capture a frame and ask the scene service about it.
async fn run_query(
    frames: Arc<dyn FrameSource>,
    scene: Arc<dyn SceneService>,
    kind: QueryKind,
    question: String,
    timeout: Option<Duration>,
) -> QueryOutcome {
    let Some(frame) = frames.capture_frame().await else {
        return QueryOutcome::CameraNotReady;
    };

    let request = async {
        match kind {
            QueryKind::DescribeScene => scene.describe_scene(&frame).await,
            QueryKind::Question => scene.answer_question(&frame, &question).await,
        }
    };
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, request).await {
            Ok(result) => result,
            Err(_) => {
                return QueryOutcome::Failed(format!(
                    "timed out after {}ms",
                    limit.as_millis()
                ));
            }
        },
        None => request.await,
    };

    match result {
        Ok(text) if !text.trim().is_empty() => QueryOutcome::Answer(text.trim().to_owned()),
        Ok(_) => QueryOutcome::Failed("empty answer".into()),
        Err(e) => QueryOutcome::Failed(e.to_string()),
    }
}
