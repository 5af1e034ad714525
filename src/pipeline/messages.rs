//! Event and command types consumed by the turn controller.
//!
//! Ports never call into the controller. Each port gets a typed sender
//! ([`InputEvent`] or [`PlaybackEvent`]); the controller folds those, user
//! commands and its own timers into a single [`TurnEvent`] stream.

use crate::watchdog::WatchdogEvent;
use std::fmt;
use std::time::Instant;

/// A transcribed span of speech from the speech-input port.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// The transcribed text.
    pub transcript: String,
    /// Whether recognition has finalized this span.
    pub is_final: bool,
    /// When the result was produced.
    pub captured_at: Instant,
}

impl Utterance {
    /// A finalized transcript captured now.
    pub fn final_result(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
            captured_at: Instant::now(),
        }
    }

    /// An interim transcript captured now.
    pub fn partial(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
            captured_at: Instant::now(),
        }
    }
}

/// Error categories reported by the speech-input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputErrorKind {
    /// Recognition heard nothing before timing out.
    NoInput,
    /// Recognition was aborted (often by our own `stop()`).
    Aborted,
    /// The microphone stream failed.
    AudioCapture,
    /// Network-backed recognition lost its connection.
    Network,
    /// The user or OS refused microphone access.
    PermissionDenied,
    /// The platform has no speech recognition.
    Unsupported,
    /// Anything else, with the platform's description.
    Other(String),
}

impl InputErrorKind {
    /// Errors that end listening for good; retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::Unsupported)
    }
}

impl fmt::Display for InputErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoInput => f.write_str("no-input"),
            Self::Aborted => f.write_str("aborted"),
            Self::AudioCapture => f.write_str("audio-capture"),
            Self::Network => f.write_str("network"),
            Self::PermissionDenied => f.write_str("permission-denied"),
            Self::Unsupported => f.write_str("unsupported"),
            Self::Other(detail) => write!(f, "other: {detail}"),
        }
    }
}

/// Events emitted by the speech-input port.
#[derive(Debug, Clone)]
pub enum InputEvent {
    /// Recognition is running.
    Started,
    /// A partial or final transcript.
    Result(Utterance),
    /// Recognition reported an error.
    Error(InputErrorKind),
    /// Recognition stopped, whether we asked or the platform decided.
    Ended,
}

/// Events emitted by the speech-output port, tagged with the request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The utterance played to the end.
    Finished { id: u64 },
    /// Playback could not complete.
    Failed { id: u64, reason: String },
}

impl PlaybackEvent {
    /// The speech request this event refers to.
    pub fn id(&self) -> u64 {
        match self {
            Self::Finished { id } | Self::Failed { id, .. } => *id,
        }
    }
}

/// Commands from the user or the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Enable continuous mode and start listening.
    StartListening,
    /// Listen for a single turn without enabling continuous mode.
    ListenOnce,
    /// Disable continuous mode; stop listening once the current turn ends.
    StopListening,
    /// Barge-in: silence the assistant, drop pending work, hand the turn back.
    Interrupt,
    /// Describe the scene now, without waiting for a spoken request.
    DescribeScene,
    /// Release the ports and end the controller loop.
    Shutdown,
}

/// Result of a scene query task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The service answered.
    Answer(String),
    /// No frame was available, so the service was never called.
    CameraNotReady,
    /// The service failed, timed out or returned nothing.
    Failed(String),
}

/// Everything the turn controller reacts to, in one stream.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// From the speech-input port.
    Input(InputEvent),
    /// From the speech-output port.
    Playback(PlaybackEvent),
    /// From the user or host.
    Command(ControlCommand),
    /// A scene query task finished.
    QueryFinished { turn: u64, outcome: QueryOutcome },
    /// The post-playback settle delay elapsed.
    SettleElapsed { generation: u64 },
    /// The listening watchdog fired.
    Watchdog(WatchdogEvent),
}
