//! Decoder seam for the frame sampler
//!
//! Decoding containers and codecs is not this crate's job. A [`FrameSource`]
//! hands decoded RGB frames to the sampler in presentation order, together
//! with the basic metadata needed to enforce the duration cap before any
//! decode work starts.
//!
//! Backends shipped with the crate:
//! * [`MemorySource`] - frames already decoded into memory
//! * [`ImageSequenceSource`] - a directory of frame images (e.g. dumped by ffmpeg)
//! * [`crate::VideoStream`] - video files through OpenCV (feature `opencv`)

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::common::{FrameSelectError, Result};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Video metadata information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub source_name: String,
    pub fps: f64,
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

impl VideoMetadata {
    /// Get a human-readable description of the video
    pub fn description(&self) -> String {
        format!(
            "{}x{} at {:.2}fps, {} frames ({:.1}s duration)",
            self.width, self.height, self.fps, self.frame_count, self.duration_seconds
        )
    }

    /// Check if this appears to be a valid video configuration
    pub fn is_valid(&self) -> bool {
        self.fps > 0.0
            && self.frame_count > 0
            && self.width > 0
            && self.height > 0
            && self.duration_seconds > 0.0
    }
}

/// A frame as delivered by the decoder, before sampling
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// 0-based position in the decoded stream
    pub frame_number: u64,
    /// Presentation time in seconds
    pub timestamp: f64,
    pub image: RgbImage,
}

/// A decoder producing frames in presentation order
///
/// Implementations release their decoder handle on drop.
pub trait FrameSource: Send {
    fn metadata(&self) -> &VideoMetadata;

    /// Decode the next frame; `Ok(None)` marks the end of the stream
    fn read_frame(&mut self) -> Result<Option<DecodedFrame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn metadata(&self) -> &VideoMetadata {
        (**self).metadata()
    }

    fn read_frame(&mut self) -> Result<Option<DecodedFrame>> {
        (**self).read_frame()
    }
}

/// Frames that are already decoded into memory, played back at a fixed rate
#[derive(Debug)]
pub struct MemorySource {
    metadata: VideoMetadata,
    frames: VecDeque<RgbImage>,
    next_frame: u64,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, frames: Vec<RgbImage>, fps: f64) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(FrameSelectError::config_error(format!(
                "source fps must be positive, got {fps}"
            )));
        }

        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        let metadata = VideoMetadata {
            source_name: name.into(),
            fps,
            frame_count: frames.len() as u32,
            width,
            height,
            duration_seconds: frames.len() as f64 / fps,
        };

        Ok(Self {
            metadata,
            frames: frames.into(),
            next_frame: 0,
        })
    }
}

impl FrameSource for MemorySource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn read_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let Some(image) = self.frames.pop_front() else {
            return Ok(None);
        };

        let frame = DecodedFrame {
            frame_number: self.next_frame,
            timestamp: self.next_frame as f64 / self.metadata.fps,
            image,
        };
        self.next_frame += 1;
        Ok(Some(frame))
    }
}

/// A directory of frame images, ordered by file name and played back at a
/// declared native frame rate
#[derive(Debug)]
pub struct ImageSequenceSource {
    metadata: VideoMetadata,
    paths: VecDeque<PathBuf>,
    next_frame: u64,
}

impl ImageSequenceSource {
    /// Open a frame directory
    ///
    /// # Errors
    /// * `VideoNotFound` - If the directory doesn't exist
    /// * `Decode` - If the first image header can't be read
    #[instrument]
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        if !dir.is_dir() {
            return Err(FrameSelectError::VideoNotFound {
                path: dir.display().to_string(),
            });
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(FrameSelectError::config_error(format!(
                "source fps must be positive, got {fps}"
            )));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        paths.sort();

        let (width, height) = match paths.first() {
            Some(first) => image::image_dimensions(first).map_err(|e| {
                FrameSelectError::decode_error(first.display().to_string(), e.to_string())
            })?,
            None => (0, 0),
        };

        let metadata = VideoMetadata {
            source_name: dir.display().to_string(),
            fps,
            frame_count: paths.len() as u32,
            width,
            height,
            duration_seconds: paths.len() as f64 / fps,
        };

        info!("Opened frame sequence: {}", metadata.description());

        Ok(Self {
            metadata,
            paths: paths.into(),
            next_frame: 0,
        })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn read_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };

        debug!("Decoding frame image {}", path.display());
        let image = image::open(&path)?.to_rgb8();

        let frame = DecodedFrame {
            frame_number: self.next_frame,
            timestamp: self.next_frame as f64 / self.metadata.fps,
            image,
        };
        self.next_frame += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(16, 8, Rgb(color))
    }

    #[test]
    fn test_metadata_validation() {
        let valid = VideoMetadata {
            source_name: "test.mp4".to_string(),
            fps: 30.0,
            frame_count: 100,
            width: 640,
            height: 480,
            duration_seconds: 3.33,
        };
        assert!(valid.is_valid());
        assert!(valid.description().contains("640x480"));
        assert!(valid.description().contains("30.00fps"));

        let invalid_fps = VideoMetadata { fps: 0.0, ..valid.clone() };
        assert!(!invalid_fps.is_valid());

        let invalid_frames = VideoMetadata { frame_count: 0, ..valid };
        assert!(!invalid_frames.is_valid());
    }

    #[test]
    fn test_memory_source_timestamps() {
        let frames = vec![solid([0, 0, 0]), solid([255, 0, 0]), solid([0, 255, 0])];
        let mut source = MemorySource::new("memory", frames, 4.0).unwrap();

        assert_eq!(source.metadata().frame_count, 3);
        assert_eq!(source.metadata().width, 16);
        assert_eq!(source.metadata().height, 8);
        assert!((source.metadata().duration_seconds - 0.75).abs() < 1e-12);

        let mut timestamps = Vec::new();
        while let Some(frame) = source.read_frame().unwrap() {
            timestamps.push(frame.timestamp);
        }
        assert_eq!(timestamps, vec![0.0, 0.25, 0.5]);
        assert!(source.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_memory_source_rejects_bad_fps() {
        assert!(MemorySource::new("memory", vec![], 0.0).is_err());
    }

    #[test]
    fn test_image_sequence_missing_dir() {
        let result = ImageSequenceSource::open(Path::new("does/not/exist"), 30.0);
        assert!(matches!(result, Err(FrameSelectError::VideoNotFound { .. })));
    }

    #[test]
    fn test_image_sequence_reads_sorted_frames() {
        let dir = tempfile::tempdir().unwrap();
        solid([10, 10, 10]).save(dir.path().join("frame_0002.png")).unwrap();
        solid([200, 200, 200]).save(dir.path().join("frame_0001.png")).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 2.0).unwrap();
        assert_eq!(source.metadata().frame_count, 2);
        assert_eq!(source.metadata().width, 16);

        let first = source.read_frame().unwrap().unwrap();
        assert_eq!(first.frame_number, 0);
        assert_eq!(first.image.get_pixel(0, 0), &Rgb([200, 200, 200]));

        let second = source.read_frame().unwrap().unwrap();
        assert_eq!(second.timestamp, 0.5);
        assert_eq!(second.image.get_pixel(0, 0), &Rgb([10, 10, 10]));

        assert!(source.read_frame().unwrap().is_none());
    }
}
