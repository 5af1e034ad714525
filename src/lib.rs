//! Lookout: hands-free scene assistant for blind and visually impaired users.
//!
//! The user asks a question out loud; the assistant grabs a camera frame,
//! asks a vision model about it and speaks the answer, then listens again.
//!
//! # Architecture
//!
//! One microphone and one speaker are shared by a single
//! [`TurnController`](pipeline::controller::TurnController), which owns the
//! turn state and is the only component allowed to open or close either:
//!
//! - **Speech input**: platform recognition behind [`ports::SpeechInput`]
//! - **Utterance filter**: drops noise and echoes of our own speech
//! - **Scene query**: [`ports::FrameSource`] + [`ports::SceneService`]
//! - **Output queue**: bounded backlog of responses to speak
//! - **Speech output**: platform playback behind [`ports::SpeechOutput`]
//! - **Watchdog**: restarts recognition the platform silently ended
//!
//! Ports report back over channels; the controller handles one event at a
//! time, so the microphone and speaker are never armed together.

pub mod camera;
pub mod config;
pub mod console;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod ports;
pub mod runtime;
pub mod scene;
pub mod watchdog;

pub use config::AssistantConfig;
pub use error::{AssistantError, Result};
pub use pipeline::controller::{
    ControllerHandle, ControllerInbox, PortEvents, Ports, TurnController, event_channels,
};
pub use pipeline::messages::ControlCommand;
pub use pipeline::state::TurnState;
pub use runtime::RuntimeEvent;
