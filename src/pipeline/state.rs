//! Turn state as observed from outside the controller.

use crate::pipeline::messages::InputErrorKind;
use std::fmt;

/// Which phase of a turn the assistant is in. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// Neither microphone nor speaker in use.
    #[default]
    Idle,
    /// Microphone open, waiting for a final transcript.
    Listening,
    /// Microphone closed, scene query in flight.
    Processing,
    /// Microphone closed, answer playing (or settling after playback).
    Speaking,
}

impl TurnState {
    /// Lowercase name for logs and UI.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which shared audio capability the controller currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Arming {
    /// Speech input has been started and not stopped.
    pub mic: bool,
    /// A speech request is playing.
    pub playback: bool,
}

impl Arming {
    /// Mic and speaker are never armed together.
    pub fn is_exclusive(self) -> bool {
        !(self.mic && self.playback)
    }
}

/// Whether the controller reopens the microphone after a turn.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListeningMode {
    /// Resume listening after every answer; watchdog armed.
    #[default]
    Continuous,
    /// Listen only when asked; go idle after a turn.
    Manual,
    /// Speech input failed fatally; listening stays off until explicitly restarted.
    Unavailable(InputErrorKind),
}

impl ListeningMode {
    /// Whether turns auto-resume.
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Continuous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_exclusivity() {
        assert!(Arming::default().is_exclusive());
        assert!(Arming { mic: true, playback: false }.is_exclusive());
        assert!(Arming { mic: false, playback: true }.is_exclusive());
        assert!(!Arming { mic: true, playback: true }.is_exclusive());
    }

    #[test]
    fn only_continuous_mode_resumes() {
        assert!(ListeningMode::Continuous.is_continuous());
        assert!(!ListeningMode::Manual.is_continuous());
        assert!(!ListeningMode::Unavailable(InputErrorKind::Unsupported).is_continuous());
    }

    #[test]
    fn state_names() {
        assert_eq!(TurnState::Processing.to_string(), "processing");
        assert_eq!(TurnState::default(), TurnState::Idle);
    }
}
