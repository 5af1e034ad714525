//! Terminal stand-ins for the speech ports.
//!
//! [`ConsoleSpeechInput`] is driven by a [`ConsoleMic`]: typed lines become
//! final transcripts, but only while the controller has the microphone open.
//! [`ConsoleSpeechOutput`] prints each utterance and reports completion after
//! a reading-speed delay, so turn timing behaves like real playback.

use crate::config::ConsoleConfig;
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::{InputEvent, PlaybackEvent, Utterance};
use crate::ports::{SpeechInput, SpeechOutput, SpeechRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
struct MicState {
    active: AtomicBool,
    session: AtomicU64,
}

/// Speech input fed from the terminal.
pub struct ConsoleSpeechInput {
    state: Arc<MicState>,
    events: mpsc::UnboundedSender<InputEvent>,
    session_limit: Option<Duration>,
    session_cancel: Option<CancellationToken>,
}

/// Typing end of [`ConsoleSpeechInput`].
#[derive(Debug, Clone)]
pub struct ConsoleMic {
    state: Arc<MicState>,
    events: mpsc::UnboundedSender<InputEvent>,
}

impl ConsoleSpeechInput {
    /// Create the port and its typing handle.
    pub fn new(
        config: &ConsoleConfig,
        events: mpsc::UnboundedSender<InputEvent>,
    ) -> (Self, ConsoleMic) {
        let state = Arc::new(MicState::default());
        let session_limit =
            (config.input_session_secs > 0).then(|| Duration::from_secs(config.input_session_secs));
        let mic = ConsoleMic {
            state: Arc::clone(&state),
            events: events.clone(),
        };
        (
            Self {
                state,
                events,
                session_limit,
                session_cancel: None,
            },
            mic,
        )
    }
}

#[async_trait]
impl SpeechInput for ConsoleSpeechInput {
    async fn start(&mut self) -> Result<()> {
        if self.state.active.load(Ordering::SeqCst) {
            return Err(AssistantError::Input("recognition already started".into()));
        }
        let session = self.state.session.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.active.store(true, Ordering::SeqCst);
        let _ = self.events.send(InputEvent::Started);
        debug!(session, "console input session started");

        if let Some(limit) = self.session_limit {
            let token = CancellationToken::new();
            let state = Arc::clone(&self.state);
            let events = self.events.clone();
            let cancel = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(limit) => {
                        // Ends quietly, like a browser recognizer timing out.
                        if state.session.load(Ordering::SeqCst) == session
                            && state.active.swap(false, Ordering::SeqCst)
                        {
                            debug!(session, "console input session expired");
                            let _ = events.send(InputEvent::Ended);
                        }
                    }
                }
            });
            self.session_cancel = Some(token);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.session_cancel.take() {
            token.cancel();
        }
        if self.state.active.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(InputEvent::Ended);
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }
}

impl ConsoleMic {
    /// Deliver a typed line as a final transcript.
    ///
    /// Returns `false` (and drops the line) when the microphone is closed.
    pub fn hear(&self, line: &str) -> bool {
        if !self.state.active.load(Ordering::SeqCst) {
            return false;
        }
        self.events
            .send(InputEvent::Result(Utterance::final_result(line.trim())))
            .is_ok()
    }

    /// Whether the controller currently has the microphone open.
    pub fn is_open(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }
}

/// Speech output that prints to stdout.
pub struct ConsoleSpeechOutput {
    events: mpsc::UnboundedSender<PlaybackEvent>,
    ms_per_word: u64,
    current: Option<CancellationToken>,
}

impl ConsoleSpeechOutput {
    /// Create the port.
    pub fn new(config: &ConsoleConfig, events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        Self {
            events,
            ms_per_word: config.ms_per_word,
            current: None,
        }
    }

    fn duration_of(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count().max(1) as u64;
        Duration::from_millis(words * self.ms_per_word)
    }
}

#[async_trait]
impl SpeechOutput for ConsoleSpeechOutput {
    async fn speak(&mut self, request: SpeechRequest) -> Result<()> {
        if self.current.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return Err(AssistantError::Output("playback already in progress".into()));
        }
        println!("assistant: {}", request.text);

        let token = CancellationToken::new();
        let cancel = token.clone();
        let events = self.events.clone();
        let duration = self.duration_of(&request.text);
        let id = request.id;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(duration) => {
                    cancel.cancel();
                    let _ = events.send(PlaybackEvent::Finished { id });
                }
            }
        });
        self.current = Some(token);
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn config(session_secs: u64) -> ConsoleConfig {
        ConsoleConfig {
            ms_per_word: 100,
            input_session_secs: session_secs,
        }
    }

    #[tokio::test]
    async fn lines_are_dropped_while_mic_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut input, mic) = ConsoleSpeechInput::new(&config(0), tx);
        assert!(!mic.hear("hello there"));

        input.start().await.unwrap();
        assert!(matches!(rx.recv().await, Some(InputEvent::Started)));
        assert!(mic.hear("  what is ahead  "));
        match rx.recv().await {
            Some(InputEvent::Result(u)) => {
                assert!(u.is_final);
                assert_eq!(u.transcript, "what is ahead");
            }
            other => panic!("unexpected {other:?}"),
        }

        input.stop().await.unwrap();
        assert!(matches!(rx.recv().await, Some(InputEvent::Ended)));
        assert!(!mic.is_open());
    }

    #[tokio::test]
    async fn double_start_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut input, _mic) = ConsoleSpeechInput::new(&config(0), tx);
        input.start().await.unwrap();
        assert!(matches!(input.start().await, Err(AssistantError::Input(_))));
        input.stop().await.unwrap();
        input.start().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn session_expires_silently() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut input, _mic) = ConsoleSpeechInput::new(&config(5), tx);
        input.start().await.unwrap();
        let _started = rx.recv().await;

        let ev = tokio::time::timeout(Duration::from_secs(6), rx.recv())
            .await
            .expect("session end");
        assert!(matches!(ev, Some(InputEvent::Ended)));
        assert!(!input.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn playback_finishes_after_reading_time() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut output = ConsoleSpeechOutput::new(&config(0), tx);
        output
            .speak(SpeechRequest {
                id: 7,
                text: "one two three".into(),
            })
            .await
            .unwrap();

        let early = tokio::time::timeout(Duration::from_millis(250), rx.recv()).await;
        assert!(early.is_err());
        let ev = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("finished");
        assert_eq!(ev, Some(PlaybackEvent::Finished { id: 7 }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_playback_never_completes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut output = ConsoleSpeechOutput::new(&config(0), tx);
        output
            .speak(SpeechRequest {
                id: 1,
                text: "a long answer".into(),
            })
            .await
            .unwrap();
        output.cancel().await.unwrap();
        let res = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(res.is_err());
    }
}
