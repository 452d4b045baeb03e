//! End-to-end frame selection
//!
//! A [`Pipeline`] wires sampler, segmenter and allocator together for one
//! video at a time and tracks where a run is with [`PipelineState`]. Any
//! failure is reported as a [`PipelineError`] carrying the stage, the number
//! of frames decoded and the last sampled timestamp.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::time::Instant;

use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, RgbImage};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::allocator::{FrameBudgetAllocator, SceneSummary};
use crate::classifier::JumpCutClassifier;
use crate::common::{FrameRecord, FrameSelectError, PipelineError, PipelineStage, Result};
use crate::config::Config;
use crate::frame_source::{FrameSource, VideoMetadata};
use crate::sampler::{Cancellation, FrameSampler};
use crate::segmenter::SceneSegmenter;
use crate::similarity::{CompositeScorer, SimilarityScorer};
use crate::sink::{DebugSink, NullSink};

/// Longest side of an encoded output frame
pub const DEFAULT_JPEG_MAX_SIZE: u32 = 512;
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// Stage tracking for a pipeline run
///
/// Stages only move forward: `Idle -> Sampling -> Segmenting -> Allocating
/// -> Done`. `Error` can be entered from any stage that isn't terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineState {
    stage: PipelineStage,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            stage: PipelineStage::Idle,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.stage, PipelineStage::Done | PipelineStage::Error)
    }

    /// Move to `next`
    ///
    /// # Errors
    /// * `InvalidTransition` - If `next` doesn't follow the current stage
    pub fn advance(&mut self, next: PipelineStage) -> Result<()> {
        use PipelineStage::*;

        let allowed = match (self.stage, next) {
            (Idle, Sampling)
            | (Sampling, Segmenting)
            | (Segmenting, Allocating)
            | (Allocating, Done) => true,
            (Done, _) | (Error, _) => false,
            (_, Error) => true,
            _ => false,
        };

        if !allowed {
            return Err(FrameSelectError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }

        self.stage = next;
        Ok(())
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// An output frame and its pixels
#[derive(Debug, Clone)]
pub struct SelectedFrame {
    pub record: FrameRecord,
    pub image: RgbImage,
}

impl SelectedFrame {
    /// Encode as JPEG, downscaled so the longest side is at most `max_size`
    pub fn to_jpeg(&self, max_size: u32, quality: u8) -> Result<Vec<u8>> {
        encode_jpeg(&self.image, max_size, quality)
    }
}

/// Run statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionStats {
    pub video_duration: f64,
    pub frames_decoded: usize,
    pub candidate_count: usize,
    pub scene_count: usize,
    pub vetoed_cuts: usize,
    pub dropped_scenes: usize,
    pub deduplicated_frames: usize,
    pub boundary_frames: usize,
    pub fill_frames: usize,
    pub processing_seconds: f64,
}

/// The frames chosen for one video
#[derive(Debug, Clone)]
pub struct Selection {
    pub source: VideoMetadata,
    /// Ascending by timestamp
    pub frames: Vec<SelectedFrame>,
    pub scenes: Vec<SceneSummary>,
    pub stats: SelectionStats,
    /// The decoder failed before the end of the video
    pub truncated: bool,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn records(&self) -> Vec<FrameRecord> {
        self.frames.iter().map(|f| f.record.clone()).collect()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.record.timestamp).collect()
    }

    /// Selected frames keyed by scene id, each group in timestamp order
    pub fn frames_by_scene(&self) -> BTreeMap<usize, Vec<&SelectedFrame>> {
        let mut groups: BTreeMap<usize, Vec<&SelectedFrame>> = BTreeMap::new();
        for frame in &self.frames {
            groups.entry(frame.record.scene_id).or_default().push(frame);
        }
        groups
    }
}

/// Frame selection for one video at a time
pub struct Pipeline<S = CompositeScorer> {
    config: Config,
    segmenter: SceneSegmenter<S>,
    allocator: FrameBudgetAllocator,
    cancellation: Cancellation,
    sink: Box<dyn DebugSink + Send>,
    state: PipelineState,
}

impl Pipeline<CompositeScorer> {
    /// Create a pipeline with the default composite scorer
    pub fn new(config: Config) -> Self {
        let scorer = CompositeScorer::from_config(&config);
        Self::with_scorer(config, scorer)
    }
}

impl<S: SimilarityScorer> Pipeline<S> {
    /// Create a pipeline around a custom similarity strategy
    pub fn with_scorer(config: Config, scorer: S) -> Self {
        let classifier = JumpCutClassifier::from_config(scorer, &config);
        Self {
            segmenter: SceneSegmenter::new(classifier),
            allocator: FrameBudgetAllocator::from_config(&config),
            cancellation: Cancellation::none(),
            sink: Box::new(NullSink),
            state: PipelineState::new(),
            config,
        }
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = self.cancellation.with_token(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.cancellation = self.cancellation.with_deadline(deadline);
        self
    }

    pub fn with_sink(mut self, sink: impl DebugSink + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stage(&self) -> PipelineStage {
        self.state.stage()
    }

    /// Return to `Idle` so the pipeline can process another video
    pub fn reset(&mut self) {
        self.state = PipelineState::new();
    }

    /// Select representative frames from a source
    ///
    /// The source is dropped, releasing its decoder, before this returns.
    ///
    /// # Errors
    /// * `DurationExceeded` - If the source is longer than `max_video_duration`
    /// * `EmptyVideo` - If no frame could be sampled
    /// * `Decode` - If the source fails before producing a single frame
    /// * `Cancelled` - If the cancellation token or deadline tripped
    /// * `InvalidTransition` - If the pipeline was not reset after a run
    #[instrument(skip(self, source), fields(video = %source.metadata().source_name))]
    pub fn run<F: FrameSource>(&mut self, source: F) -> std::result::Result<Selection, PipelineError> {
        let started = Instant::now();
        let metadata = source.metadata().clone();

        self.advance(PipelineStage::Sampling, 0, None)?;
        info!("Selecting frames from {}", metadata.description());

        let max_duration = self.config.max_video_duration();
        if metadata.duration_seconds > max_duration {
            return Err(self.fail(
                0,
                None,
                FrameSelectError::DurationExceeded {
                    duration: metadata.duration_seconds,
                    max_duration,
                },
            ));
        }
        if metadata.frame_count == 0 {
            return Err(self.fail(0, None, FrameSelectError::EmptyVideo));
        }

        let mut sampler =
            FrameSampler::new(source, self.config.sampling_fps(), self.cancellation.clone());

        self.advance(PipelineStage::Segmenting, 0, None)?;
        let segmentation = match self.segmenter.segment(&mut sampler) {
            Ok(segmentation) => segmentation,
            Err(e) => {
                return Err(self.fail(sampler.frames_decoded(), sampler.last_timestamp(), e));
            }
        };
        let frames_decoded = sampler.frames_decoded();
        let last_timestamp = sampler.last_timestamp();
        drop(sampler);

        for (frame, decision) in segmentation.frames.iter().zip(&segmentation.decisions) {
            if let Err(e) = self.sink.on_decision(frame, decision) {
                warn!("Debug sink failed on frame {}: {}", frame.index, e);
            }
        }

        if segmentation.is_empty() {
            return Err(self.fail(frames_decoded, last_timestamp, FrameSelectError::EmptyVideo));
        }

        self.advance(PipelineStage::Allocating, frames_decoded, last_timestamp)?;
        let scorer = self.segmenter.scorer();
        let signatures = &segmentation.signatures;
        let allocation = self.allocator.allocate(
            &segmentation.scenes,
            &segmentation.timestamps(),
            segmentation.frame_interval,
            |a, b| {
                scorer
                    .compare(&signatures[a], &signatures[b])
                    .combined_similarity
            },
        );
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => return Err(self.fail(frames_decoded, last_timestamp, e)),
        };

        let stats = SelectionStats {
            video_duration: metadata.duration_seconds,
            frames_decoded,
            candidate_count: segmentation.frames.len(),
            scene_count: segmentation.scenes.len(),
            vetoed_cuts: segmentation.vetoed_count(),
            dropped_scenes: allocation.dropped_scenes,
            deduplicated_frames: allocation.deduplicated,
            boundary_frames: allocation.boundary_count(),
            fill_frames: allocation.fill_count(),
            processing_seconds: started.elapsed().as_secs_f64(),
        };

        let truncated = segmentation.truncated;
        let mut images: Vec<RgbImage> =
            segmentation.frames.into_iter().map(|f| f.image).collect();
        let frames = allocation
            .records
            .into_iter()
            .map(|record| SelectedFrame {
                image: std::mem::take(&mut images[record.frame_index]),
                record,
            })
            .collect();

        let selection = Selection {
            source: metadata,
            frames,
            scenes: allocation.scenes,
            stats,
            truncated,
        };

        self.advance(PipelineStage::Done, frames_decoded, last_timestamp)?;

        if let Err(e) = self.sink.on_selection(&selection) {
            warn!("Debug sink failed on selection: {}", e);
        }

        info!(
            "Selected {} frames ({} boundary, {} fill) across {} scenes in {:.2}s{}",
            selection.len(),
            selection.stats.boundary_frames,
            selection.stats.fill_frames,
            selection.stats.scene_count,
            selection.stats.processing_seconds,
            if selection.truncated { " (truncated)" } else { "" }
        );

        Ok(selection)
    }

    fn advance(
        &mut self,
        next: PipelineStage,
        frames_processed: usize,
        last_timestamp: Option<f64>,
    ) -> std::result::Result<(), PipelineError> {
        let stage = self.state.stage();
        self.state.advance(next).map_err(|e| PipelineError {
            stage,
            frames_processed,
            last_timestamp,
            source: e,
        })
    }

    fn fail(
        &mut self,
        frames_processed: usize,
        last_timestamp: Option<f64>,
        source: FrameSelectError,
    ) -> PipelineError {
        let stage = self.state.stage();
        // Error is reachable from every non-terminal stage
        let _ = self.state.advance(PipelineStage::Error);

        let error = PipelineError {
            stage,
            frames_processed,
            last_timestamp,
            source,
        };
        error!("{}", error);
        error
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("segmenter", &self.segmenter)
            .field("allocator", &self.allocator)
            .field("state", &self.state)
            .finish()
    }
}

pub(crate) fn encode_jpeg(image: &RgbImage, max_size: u32, quality: u8) -> Result<Vec<u8>> {
    let resized;
    let image = if image.width() > max_size || image.height() > max_size {
        resized = DynamicImage::ImageRgb8(image.clone())
            .resize(max_size, max_size, FilterType::Triangle)
            .to_rgb8();
        &resized
    } else {
        image
    };

    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(image)?;
    Ok(buffer.into_inner())
}
