//! Scripted ports and a harness for driving a live turn controller.
//!
//! Every port records into a shared [`Recorder`], which also tracks whether the
//! microphone and the speaker are held at the same moment.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use lookout::pipeline::messages::{InputErrorKind, InputEvent, PlaybackEvent, Utterance};
use lookout::ports::{Frame, FrameSource, SceneService, SpeechInput, SpeechOutput, SpeechRequest};
use lookout::{
    AssistantConfig, AssistantError, ControllerHandle, Ports, RuntimeEvent, TurnController,
    TurnState, event_channels,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    MicStart,
    MicStop,
    Speak(String),
    CancelSpeech,
    Describe,
    Question(String),
}

#[derive(Default)]
struct RecorderState {
    mic: bool,
    playback: bool,
    overlaps: usize,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct Recorder(Mutex<RecorderState>);

impl Recorder {
    fn record(&self, call: Call) {
        self.0.lock().unwrap().calls.push(call);
    }

    fn set_mic(&self, on: bool) {
        let mut s = self.0.lock().unwrap();
        s.mic = on;
        if s.mic && s.playback {
            s.overlaps += 1;
        }
    }

    fn set_playback(&self, on: bool) {
        let mut s = self.0.lock().unwrap();
        s.playback = on;
        if s.mic && s.playback {
            s.overlaps += 1;
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.0.lock().unwrap().calls.iter().filter(|c| *c == call).count()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Speak(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Times mic and speaker were armed together. Must stay zero.
    pub fn overlaps(&self) -> usize {
        self.0.lock().unwrap().overlaps
    }
}

// ── Speech input ────────────────────────────────────────────

struct MockInput {
    recorder: Arc<Recorder>,
    events: mpsc::UnboundedSender<InputEvent>,
    active: Arc<AtomicBool>,
    start_failures: Arc<AtomicU32>,
}

#[async_trait]
impl SpeechInput for MockInput {
    async fn start(&mut self) -> lookout::Result<()> {
        self.recorder.record(Call::MicStart);
        let pending = self.start_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.start_failures.store(pending - 1, Ordering::SeqCst);
            return Err(AssistantError::Input("recognizer busy".into()));
        }
        self.active.store(true, Ordering::SeqCst);
        self.recorder.set_mic(true);
        let _ = self.events.send(InputEvent::Started);
        Ok(())
    }

    async fn stop(&mut self) -> lookout::Result<()> {
        self.recorder.record(Call::MicStop);
        self.recorder.set_mic(false);
        if self.active.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(InputEvent::Ended);
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// The user's side of the microphone.
#[derive(Clone)]
pub struct Mic {
    events: mpsc::UnboundedSender<InputEvent>,
    active: Arc<AtomicBool>,
    start_failures: Arc<AtomicU32>,
}

impl Mic {
    /// Speak a phrase. Only heard while recognition is running.
    pub fn say(&self, text: &str) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        self.events
            .send(InputEvent::Result(Utterance::final_result(text)))
            .is_ok()
    }

    /// Deliver an event regardless of recognizer state.
    pub fn inject(&self, event: InputEvent) {
        let _ = self.events.send(event);
    }

    pub fn error(&self, kind: InputErrorKind) {
        self.inject(InputEvent::Error(kind));
    }

    /// The platform stops recognizing without telling anyone.
    pub fn die_silently(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn fail_next_starts(&self, n: u32) {
        self.start_failures.store(n, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// ── Speech output ───────────────────────────────────────────

struct MockOutput {
    recorder: Arc<Recorder>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    playback_time: Duration,
    fail: Arc<AtomicBool>,
    current: Option<CancellationToken>,
}

#[async_trait]
impl SpeechOutput for MockOutput {
    async fn speak(&mut self, request: SpeechRequest) -> lookout::Result<()> {
        self.recorder.record(Call::Speak(request.text.clone()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(AssistantError::Output("audio device lost".into()));
        }
        self.recorder.set_playback(true);

        let token = CancellationToken::new();
        let cancel = token.clone();
        let recorder = Arc::clone(&self.recorder);
        let events = self.events.clone();
        let duration = self.playback_time;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(duration) => {
                    recorder.set_playback(false);
                    let _ = events.send(PlaybackEvent::Finished { id: request.id });
                }
            }
        });
        self.current = Some(token);
        Ok(())
    }

    async fn cancel(&mut self) -> lookout::Result<()> {
        self.recorder.record(Call::CancelSpeech);
        if let Some(token) = self.current.take() {
            token.cancel();
        }
        self.recorder.set_playback(false);
        Ok(())
    }
}

// ── Scene + camera ──────────────────────────────────────────

pub struct MockScene {
    recorder: Arc<Recorder>,
    reply: Mutex<Result<String, String>>,
    latency: Duration,
}

impl MockScene {
    pub fn answer(&self, text: &str) {
        *self.reply.lock().unwrap() = Ok(text.to_owned());
    }

    pub fn fail(&self, reason: &str) {
        *self.reply.lock().unwrap() = Err(reason.to_owned());
    }

    async fn respond(&self) -> lookout::Result<String> {
        tokio::time::sleep(self.latency).await;
        self.reply
            .lock()
            .unwrap()
            .clone()
            .map_err(AssistantError::Query)
    }
}

#[async_trait]
impl SceneService for MockScene {
    async fn describe_scene(&self, _frame: &Frame) -> lookout::Result<String> {
        self.recorder.record(Call::Describe);
        self.respond().await
    }

    async fn answer_question(&self, _frame: &Frame, question: &str) -> lookout::Result<String> {
        self.recorder.record(Call::Question(question.to_owned()));
        self.respond().await
    }
}

#[derive(Default)]
pub struct MockCamera {
    pub offline: AtomicBool,
}

#[async_trait]
impl FrameSource for MockCamera {
    async fn capture_frame(&self) -> Option<Frame> {
        if self.offline.load(Ordering::SeqCst) {
            None
        } else {
            Some(Frame::jpeg(vec![0xff, 0xd8, 0xff]))
        }
    }
}

// ── Harness ─────────────────────────────────────────────────

pub struct Timing {
    pub playback: Duration,
    pub scene_latency: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            playback: Duration::from_secs(2),
            scene_latency: Duration::from_millis(500),
        }
    }
}

pub struct Harness {
    pub handle: ControllerHandle,
    pub recorder: Arc<Recorder>,
    pub mic: Mic,
    pub scene: Arc<MockScene>,
    pub camera: Arc<MockCamera>,
    pub output_fails: Arc<AtomicBool>,
    events: broadcast::Receiver<RuntimeEvent>,
    task: JoinHandle<lookout::Result<()>>,
}

pub fn spawn(config: AssistantConfig) -> Harness {
    spawn_with(config, Timing::default())
}

pub fn spawn_with(config: AssistantConfig, timing: Timing) -> Harness {
    let recorder = Arc::new(Recorder::default());
    let (port_events, inbox) = event_channels();

    let active = Arc::new(AtomicBool::new(false));
    let start_failures = Arc::new(AtomicU32::new(0));
    let input = MockInput {
        recorder: Arc::clone(&recorder),
        events: port_events.input.clone(),
        active: Arc::clone(&active),
        start_failures: Arc::clone(&start_failures),
    };
    let mic = Mic {
        events: port_events.input.clone(),
        active,
        start_failures,
    };

    let output_fails = Arc::new(AtomicBool::new(false));
    let output = MockOutput {
        recorder: Arc::clone(&recorder),
        events: port_events.playback.clone(),
        playback_time: timing.playback,
        fail: Arc::clone(&output_fails),
        current: None,
    };

    let scene = Arc::new(MockScene {
        recorder: Arc::clone(&recorder),
        reply: Mutex::new(Ok("a chair ahead".to_owned())),
        latency: timing.scene_latency,
    });
    let camera = Arc::new(MockCamera::default());

    let ports = Ports {
        input: Box::new(input),
        output: Box::new(output),
        scene: Arc::clone(&scene) as Arc<dyn SceneService>,
        frames: Arc::clone(&camera) as Arc<dyn FrameSource>,
    };

    let (runtime_tx, events) = broadcast::channel(256);
    let controller = TurnController::new(config, ports, inbox).with_runtime_events(runtime_tx);
    let handle = controller.handle();
    let task = tokio::spawn(controller.run());

    Harness {
        handle,
        recorder,
        mic,
        scene,
        camera,
        output_fails,
        events,
        task,
    }
}

impl Harness {
    /// Wait (in paused time) until the controller publishes `state`.
    pub async fn wait_for(&self, state: TurnState) {
        let mut rx = self.handle.subscribe_state();
        let reached = tokio::time::timeout(Duration::from_secs(120), async move {
            rx.wait_for(|s| *s == state).await.map(|_| ())
        })
        .await;
        assert!(
            matches!(reached, Ok(Ok(()))),
            "never reached {state}, stuck in {}",
            self.handle.state()
        );
    }

    /// Let spawned tasks run without advancing the clock.
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// State transitions observed since the last call.
    pub fn transitions(&mut self) -> Vec<TurnState> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let RuntimeEvent::StateChanged { to, .. } = event {
                out.push(to);
            }
        }
        out
    }

    /// Runtime events observed since the last call.
    pub fn runtime_events(&mut self) -> Vec<RuntimeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn shutdown(self) {
        self.handle.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("controller exits")
            .expect("controller task joins");
        assert!(result.is_ok());
        assert_eq!(self.recorder.overlaps(), 0, "mic and speaker armed together");
    }
}

pub fn continuous_config() -> AssistantConfig {
    AssistantConfig::default()
}

pub fn manual_config() -> AssistantConfig {
    let mut config = AssistantConfig::default();
    config.turn.continuous = false;
    config
}
