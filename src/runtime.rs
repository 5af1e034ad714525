//! Runtime events emitted by the controller for UI and observability.
//!
//! Emission is fire-and-forget on a broadcast channel; a slow or absent
//! subscriber never holds up a turn.

use crate::filter::Verdict;
use crate::pipeline::state::TurnState;

/// Events that describe what the assistant is doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The turn state changed.
    StateChanged { from: TurnState, to: TurnState },
    /// A final transcript was classified.
    Transcript { text: String, verdict: Verdict },
    /// A scene query was issued.
    QueryStarted { turn: u64 },
    /// Text handed to the speech-output port.
    Speaking { id: u64, text: String },
    /// Stale queued responses were discarded to make room.
    QueueOverflow { dropped: usize },
    /// The watchdog restarted speech input.
    ListeningRestarted,
    /// Speech input failed for good; continuous listening is off.
    ListeningUnavailable { reason: String },
    /// The user interrupted the assistant.
    Interrupted,
}
