//! Turn-taking pipeline: the controller, its event types, and the output queue.

pub mod controller;
pub mod messages;
pub mod queue;
pub mod state;
