//! Video stream handling using OpenCV backend
//!
//! This module provides a wrapper around OpenCV's VideoCapture that decodes
//! a video file into RGB frames for the sampler. It is compiled only with the
//! `opencv` feature.

use image::RgbImage;
use opencv::{core::Mat, imgproc, prelude::*, videoio};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::common::{FrameSelectError, Result};
use crate::frame_source::{DecodedFrame, FrameSource, VideoMetadata};

/// Wrapper around OpenCV VideoCapture for consistent video reading
///
/// The capture handle is released when the stream is dropped, whichever way
/// the pipeline run ends.
pub struct VideoStream {
    cap: videoio::VideoCapture,
    metadata: VideoMetadata,
    current_frame: u32,
}

impl VideoStream {
    /// Open a video file for reading
    ///
    /// # Errors
    /// * `VideoNotFound` - If the file doesn't exist
    /// * `Decode` - If OpenCV can't open the file or reports unusable properties
    /// * `EmptyVideo` - If the video has no frames
    #[instrument]
    pub fn open(path: &str) -> Result<Self> {
        info!("Opening video stream: {}", path);

        if !Path::new(path).exists() {
            return Err(FrameSelectError::VideoNotFound {
                path: path.to_string(),
            });
        }

        let cap = videoio::VideoCapture::from_file(path, videoio::CAP_ANY).map_err(|e| {
            warn!("Failed to create VideoCapture: {}", e);
            FrameSelectError::decode_error(path, format!("VideoCapture failed: {e}"))
        })?;

        if !cap.is_opened()? {
            return Err(FrameSelectError::decode_error(path, "container or codec not supported"));
        }

        let fps = cap.get(videoio::CAP_PROP_FPS)?;
        let frame_count = cap.get(videoio::CAP_PROP_FRAME_COUNT)? as i64;
        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i64;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i64;

        if fps <= 0.0 {
            return Err(FrameSelectError::decode_error(path, format!("invalid frame rate {fps}")));
        }

        if frame_count <= 0 {
            return Err(FrameSelectError::EmptyVideo);
        }

        if width <= 0 || height <= 0 {
            return Err(FrameSelectError::decode_error(
                path,
                format!("invalid frame size {width}x{height}"),
            ));
        }

        let metadata = VideoMetadata {
            source_name: path.to_string(),
            fps,
            frame_count: frame_count as u32,
            width: width as u32,
            height: height as u32,
            duration_seconds: frame_count as f64 / fps,
        };

        info!("Video opened successfully - {}", metadata.description());

        Ok(Self {
            cap,
            metadata,
            current_frame: 0,
        })
    }

    fn mat_to_rgb(&self, bgr: &Mat) -> Result<RgbImage> {
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(bgr, &mut rgb, imgproc::COLOR_BGR2RGB)?;
        if !rgb.is_continuous() {
            rgb = rgb.try_clone()?;
        }

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let bytes = rgb.data_bytes()?.to_vec();

        RgbImage::from_raw(width, height, bytes).ok_or_else(|| {
            FrameSelectError::decode_error(
                &self.metadata.source_name,
                format!("frame {} has an unexpected pixel layout", self.current_frame),
            )
        })
    }
}

impl FrameSource for VideoStream {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn read_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let mut frame = Mat::default();
        let success = self.cap.read(&mut frame)?;

        if !success || frame.empty() {
            debug!("Reached end of video at frame {}", self.current_frame);
            return Ok(None);
        }

        let image = self.mat_to_rgb(&frame)?;
        let decoded = DecodedFrame {
            frame_number: self.current_frame as u64,
            timestamp: self.current_frame as f64 / self.metadata.fps,
            image,
        };
        self.current_frame += 1;
        Ok(Some(decoded))
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        if let Err(e) = self.cap.release() {
            warn!("Failed to release VideoCapture for {}: {}", self.metadata.source_name, e);
        }
        debug!("Released video stream {}", self.metadata.source_name);
    }
}

// Implement Debug manually to avoid showing internal OpenCV state
impl std::fmt::Debug for VideoStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoStream")
            .field("metadata", &self.metadata)
            .field("current_frame", &self.current_frame)
            .finish()
    }
}

// VideoCapture is only ever touched by the thread that owns the stream
unsafe impl Send for VideoStream {}
