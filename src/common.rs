//! Common types, utilities, and error handling for the frame selection library.
//!
//! This module provides the foundational types used throughout the codebase,
//! including candidate frames, scenes, output records, pipeline stages and
//! the error taxonomy.

use std::fmt;

use image::RgbImage;
use serde::Serialize;

/// A frame sampled from the source video at the configured rate
///
/// Candidates are produced in timestamp order by the sampler and are never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct CandidateFrame {
    pub index: usize,
    /// Seconds since the start of the video
    pub timestamp: f64,
    pub image: RgbImage,
}

impl CandidateFrame {
    pub fn new(index: usize, timestamp: f64, image: RgbImage) -> Self {
        Self { index, timestamp, image }
    }
}

/// Similarity between an ordered pair of frames
///
/// All values lie in `[0, 1]`, where `1.0` means identical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub phash_similarity: f64,
    pub histogram_similarity: f64,
    pub combined_similarity: f64,
    /// Brightness-only similarity, independent of structural layout
    pub delta_intensity: f64,
}

impl SimilarityResult {
    /// Result for a frame compared with itself
    pub fn identical() -> Self {
        Self {
            phash_similarity: 1.0,
            histogram_similarity: 1.0,
            combined_similarity: 1.0,
            delta_intensity: 1.0,
        }
    }
}

/// A maximal run of contiguous candidate frames with no boundary between them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scene {
    /// 1-based scene number in temporal order
    pub id: usize,
    pub start_time: f64,
    /// Timestamp of the last candidate in the scene
    pub end_time: f64,
    pub frame_indices: Vec<usize>,
    /// Combined similarity of the opening frame to its predecessor.
    /// The first scene has no predecessor and reports `0.0`.
    pub boundary_similarity: f64,
}

impl Scene {
    /// Index of the candidate that opens this scene
    pub fn boundary_index(&self) -> usize {
        self.frame_indices[0]
    }

    pub fn len(&self) -> usize {
        self.frame_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_indices.is_empty()
    }

    /// Time between the first and last candidate of the scene
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Why a frame was selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameRole {
    /// First frame of a scene
    Boundary,
    /// Interior frame sampled for temporal coverage
    Fill,
}

impl fmt::Display for FrameRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameRole::Boundary => write!(f, "boundary"),
            FrameRole::Fill => write!(f, "fill"),
        }
    }
}

/// One selected output frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub timestamp: f64,
    pub role: FrameRole,
    pub scene_id: usize,
    /// Index of the candidate frame this record points at
    pub frame_index: usize,
    /// Time this frame stands for: until the next record, or the end of the
    /// sampled stream for the last record
    pub duration: f64,
}

/// Stages of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Sampling,
    Segmenting,
    Allocating,
    Done,
    Error,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Sampling => "sampling",
            PipelineStage::Segmenting => "segmenting",
            PipelineStage::Allocating => "allocating",
            PipelineStage::Done => "done",
            PipelineStage::Error => "error",
        };
        f.write_str(name)
    }
}

/// All possible errors from the frame selection system
///
/// This error type covers all failure modes in the selection pipeline,
/// from video I/O issues to configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum FrameSelectError {
    #[error("Failed to decode video {source_name}: {reason}")]
    Decode { source_name: String, reason: String },

    #[error("Video file not found: {path}")]
    VideoNotFound { path: String },

    #[error("No frames found in video")]
    EmptyVideo,

    #[error("Cancelled after {frames_processed} decoded frames")]
    Cancelled { frames_processed: usize },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Video duration {duration:.1}s exceeds maximum allowed duration {max_duration:.1}s")]
    DurationExceeded { duration: f64, max_duration: f64 },

    #[error("Pipeline cannot move from {from} to {to}")]
    InvalidTransition { from: PipelineStage, to: PipelineStage },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

impl FrameSelectError {
    /// Create a configuration error with a descriptive message
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Create a decode error for the named source
    pub fn decode_error(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// Convenient Result type for frame selection operations
pub type Result<T> = std::result::Result<T, FrameSelectError>;

/// A failed pipeline run, with enough context to decide whether to retry
/// the whole run or adjust the configuration
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed after {frames_processed} frames (last timestamp: {}): {source}",
        .last_timestamp.map(|t| format!("{t:.3}s")).unwrap_or_else(|| "none".to_string()))]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub frames_processed: usize,
    pub last_timestamp: Option<f64>,
    #[source]
    pub source: FrameSelectError,
}

impl PipelineError {
    /// The underlying failure
    pub fn kind(&self) -> &FrameSelectError {
        &self.source
    }
}
