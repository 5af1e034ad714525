//! Capability ports the turn controller drives.
//!
//! Implementations are constructed with the sender half of their event channel
//! (see [`event_channels`](crate::pipeline::controller::event_channels)) and
//! report asynchronously: `start()` and `speak()` only *begin* an operation.
//! Completion arrives later as an [`InputEvent`](crate::pipeline::messages::InputEvent)
//! or [`PlaybackEvent`](crate::pipeline::messages::PlaybackEvent).

use crate::error::Result;
use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;

/// An encoded still image from the camera.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image bytes.
    pub bytes: Bytes,
    /// MIME type of `bytes`, e.g. `image/jpeg`.
    pub mime: String,
}

impl Frame {
    /// A JPEG-encoded frame.
    pub fn jpeg(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: "image/jpeg".to_owned(),
        }
    }

    /// The frame as a `data:` URL, the form vision APIs accept inline.
    pub fn to_data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{encoded}", self.mime)
    }
}

/// Text to speak, tagged so completion events can be matched to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    /// Monotonic id assigned by the controller.
    pub id: u64,
    /// What to say.
    pub text: String,
}

/// Platform speech-to-text.
///
/// Calling `start()` on a handle that was not cleanly stopped is undefined on
/// most platforms; the controller always stops first.
#[async_trait]
pub trait SpeechInput: Send {
    /// Begin recognition.
    async fn start(&mut self) -> Result<()>;
    /// End recognition. `InputEvent::Ended` follows eventually.
    async fn stop(&mut self) -> Result<()>;
    /// Whether recognition is actually running right now.
    fn is_active(&self) -> bool;
}

/// Platform text-to-speech / audio playback. At most one request outstanding.
#[async_trait]
pub trait SpeechOutput: Send {
    /// Begin speaking `request`.
    async fn speak(&mut self, request: SpeechRequest) -> Result<()>;
    /// Stop the current request immediately. No completion event follows.
    async fn cancel(&mut self) -> Result<()>;
}

/// Scene-understanding service (vision + language model).
#[async_trait]
pub trait SceneService: Send + Sync {
    /// General description of the frame.
    async fn describe_scene(&self, frame: &Frame) -> Result<String>;
    /// Answer `question` about the frame.
    async fn answer_question(&self, frame: &Frame, question: &str) -> Result<String>;
}

/// Camera access. `None` means the camera is not ready yet.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Grab the current frame.
    async fn capture_frame(&self) -> Option<Frame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_encodes_mime_and_payload() {
        let frame = Frame::jpeg(vec![0xff, 0xd8, 0xff]);
        assert_eq!(frame.to_data_url(), "data:image/jpeg;base64,/9j/");
    }
}
