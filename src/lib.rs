//! Scene segmentation and representative-frame selection for short videos
//!
//! This crate turns a decoded video into a small, budgeted set of
//! timestamped frames that preserve the edit structure of the clip: one
//! frame for every scene boundary, plus interior "fill" frames for longer
//! scenes when the budget allows.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use rust_keyframes::{select_frames, Config, ImageSequenceSource};
//!
//! // Frames previously dumped by a decoder, at their native 30fps
//! let source = ImageSequenceSource::open(Path::new("frames/"), 30.0)?;
//! let selection = select_frames(source, &Config::default())?;
//!
//! for frame in &selection.frames {
//!     println!(
//!         "{:.2}s scene {} ({})",
//!         frame.record.timestamp, frame.record.scene_id, frame.record.role
//!     );
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod allocator;
mod classifier;
mod common;
mod config;
mod frame_source;
mod pipeline;
mod sampler;
mod segmenter;
mod similarity;
mod sink;
#[cfg(feature = "opencv")]
mod video_stream;

// Re-export main types for public API
pub use allocator::{Allocation, FrameBudgetAllocator, SceneSummary};
pub use classifier::{CutDecision, JumpCutClassifier};
pub use common::{
    CandidateFrame, FrameRecord, FrameRole, FrameSelectError, PipelineError, PipelineStage,
    Result, Scene, SimilarityResult,
};
pub use config::{Config, ConfigBuilder, ConfigFile};
pub use frame_source::{DecodedFrame, FrameSource, ImageSequenceSource, MemorySource, VideoMetadata};
pub use pipeline::{
    Pipeline, PipelineState, SelectedFrame, Selection, SelectionStats, DEFAULT_JPEG_MAX_SIZE,
    DEFAULT_JPEG_QUALITY,
};
pub use sampler::{Cancellation, FrameSampler, SampledFrames};
pub use segmenter::{SceneSegmenter, Segmentation};
pub use similarity::{CompositeScorer, FrameSignature, HsvHistogram, PerceptualHash, SimilarityScorer};
pub use sink::{DebugSink, DirectorySink, NullSink};
#[cfg(feature = "opencv")]
pub use video_stream::VideoStream;

pub use tokio_util::sync::CancellationToken;

use tracing::{info, instrument};

/// Select representative frames from a source with the default scorer
///
/// # Arguments
/// * `source` - Decoded frame stream; dropped before this returns
/// * `config` - Thresholds, weights and budget for this run
///
/// # Errors
/// Returns a [`PipelineError`] naming the failed stage; see [`Pipeline::run`]
#[instrument(skip(source, config))]
pub fn select_frames<F: FrameSource>(
    source: F,
    config: &Config,
) -> std::result::Result<Selection, PipelineError> {
    Pipeline::new(config.clone()).run(source)
}

/// Select representative frames from a video file
///
/// # Errors
/// * `VideoNotFound` / `Decode` / `EmptyVideo` - If the file can't be opened,
///   reported as a failure of the sampling stage
#[cfg(feature = "opencv")]
#[instrument(skip(config))]
pub fn select_frames_from_path(
    video_path: &str,
    config: &Config,
) -> std::result::Result<Selection, PipelineError> {
    let stream = VideoStream::open(video_path).map_err(|e| PipelineError {
        stage: PipelineStage::Sampling,
        frames_processed: 0,
        last_timestamp: None,
        source: e,
    })?;
    select_frames(stream, config)
}

/// Get video information without decoding any frames
///
/// Useful for checking the duration cap before queueing a video.
#[cfg(feature = "opencv")]
#[instrument]
pub fn probe_video(video_path: &str) -> Result<VideoMetadata> {
    let stream = VideoStream::open(video_path)?;
    Ok(stream.metadata().clone())
}

/// Initialize tracing for the library
///
/// Call this once at the start of your application to enable log output.
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Arguments
/// * `level` - Tracing level filter (e.g., "debug", "info", "warn", "error")
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Frame selection library initialized with tracing level: {}", level);
}
