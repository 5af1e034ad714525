//! Frame source backed by an image file.
//!
//! A capture process (or a test) keeps overwriting one file with the latest
//! camera frame; each capture reads it, downscales it and re-encodes JPEG so
//! uploads stay small.

use crate::config::CameraConfig;
use crate::error::{AssistantError, Result};
use crate::ports::{Frame, FrameSource};
use async_trait::async_trait;
use image::ImageEncoder;
use image::codecs::jpeg::JpegEncoder;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Reads the latest frame from a file on every capture.
#[derive(Debug, Clone)]
pub struct FileFrameSource {
    path: Option<PathBuf>,
    max_dimension: u32,
    jpeg_quality: u8,
}

impl FileFrameSource {
    /// Create a source. With no path configured every capture is `None`.
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            path: config.frame_path.clone(),
            max_dimension: config.max_dimension.max(1),
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }
}

#[async_trait]
impl FrameSource for FileFrameSource {
    async fn capture_frame(&self) -> Option<Frame> {
        let path = self.path.as_ref()?;
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %path.display(), "camera frame unavailable: {e}");
                return None;
            }
        };

        let max_dimension = self.max_dimension;
        let quality = self.jpeg_quality;
        let encoded =
            tokio::task::spawn_blocking(move || reencode(&raw, max_dimension, quality)).await;
        match encoded {
            Ok(Ok(bytes)) => Some(Frame::jpeg(bytes)),
            Ok(Err(e)) => {
                warn!(path = %path.display(), "camera frame unusable: {e}");
                None
            }
            Err(e) => {
                warn!("frame encoding task failed: {e}");
                None
            }
        }
    }
}

/// Decode any supported image, fit it within `max_dimension`, encode JPEG.
pub fn reencode(raw: &[u8], max_dimension: u32, quality: u8) -> Result<Vec<u8>> {
    let image = image::load_from_memory(raw)
        .map_err(|e| AssistantError::Camera(format!("decode failed: {e}")))?;
    let image = if image.width() > max_dimension || image.height() > max_dimension {
        image.thumbnail(max_dimension, max_dimension)
    } else {
        image
    };

    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| AssistantError::Camera(format!("encode failed: {e}")))?;
    Ok(out)
}
