//! Scene segmentation
//!
//! A single linear pass over the candidate stream. Every frame is
//! fingerprinted once as it arrives and classified against its predecessor;
//! a boundary closes the current scene at the previous frame and opens a new
//! one. The first frame always opens scene 1.

use tracing::{debug, info, instrument};

use crate::classifier::{CutDecision, JumpCutClassifier};
use crate::common::{CandidateFrame, Result, Scene};
use crate::frame_source::FrameSource;
use crate::sampler::FrameSampler;
use crate::similarity::SimilarityScorer;

/// Result of segmenting one candidate stream
///
/// `frames`, `signatures` and `decisions` are parallel: entry `i` belongs to
/// candidate `i`. Every candidate belongs to exactly one scene.
#[derive(Debug, Clone)]
pub struct Segmentation<Sig> {
    pub frames: Vec<CandidateFrame>,
    pub signatures: Vec<Sig>,
    pub decisions: Vec<CutDecision>,
    pub scenes: Vec<Scene>,
    /// Seconds between adjacent candidates
    pub frame_interval: f64,
    /// The decoder failed before the end of the video
    pub truncated: bool,
}

impl<Sig> Segmentation<Sig> {
    fn new(frame_interval: f64) -> Self {
        Self {
            frames: Vec::new(),
            signatures: Vec::new(),
            decisions: Vec::new(),
            scenes: Vec::new(),
            frame_interval,
            truncated: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn boundary_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_boundary).count()
    }

    /// Initial cuts that the brightness veto suppressed
    pub fn vetoed_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.vetoed).count()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.timestamp).collect()
    }

    /// End of the sampled stream: the last candidate plus one interval
    pub fn stream_end(&self) -> f64 {
        self.frames
            .last()
            .map(|f| f.timestamp + self.frame_interval)
            .unwrap_or(0.0)
    }
}

/// Partitions a candidate stream into contiguous scenes
pub struct SceneSegmenter<S> {
    classifier: JumpCutClassifier<S>,
}

impl<S: SimilarityScorer> SceneSegmenter<S> {
    pub fn new(classifier: JumpCutClassifier<S>) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &JumpCutClassifier<S> {
        &self.classifier
    }

    pub fn scorer(&self) -> &S {
        self.classifier.scorer()
    }

    /// Pull every candidate from the sampler and segment the stream
    ///
    /// # Errors
    /// * `Cancelled` - Propagated from the sampler
    #[instrument(skip(self, sampler))]
    pub fn segment<F: FrameSource>(
        &self,
        sampler: &mut FrameSampler<F>,
    ) -> Result<Segmentation<S::Signature>> {
        let mut segmentation = Segmentation::new(sampler.sampling_interval());

        while let Some(frame) = sampler.next_frame()? {
            self.push(&mut segmentation, frame);
        }
        segmentation.truncated = sampler.truncated();

        self.log_summary(&segmentation);
        Ok(segmentation)
    }

    /// Segment candidates that are already in memory
    ///
    /// Frames must be in timestamp order and indexed by stream position.
    pub fn segment_frames(
        &self,
        frames: Vec<CandidateFrame>,
        frame_interval: f64,
    ) -> Segmentation<S::Signature> {
        let mut segmentation = Segmentation::new(frame_interval);
        for frame in frames {
            self.push(&mut segmentation, frame);
        }
        self.log_summary(&segmentation);
        segmentation
    }

    fn push(&self, segmentation: &mut Segmentation<S::Signature>, frame: CandidateFrame) {
        let position = segmentation.frames.len();
        debug_assert_eq!(frame.index, position, "candidates must be indexed by position");

        let signature = self.scorer().signature(&frame);
        let decision = match segmentation.signatures.last() {
            None => CutDecision::opening(),
            Some(previous) => self
                .classifier
                .decide(&self.scorer().compare(previous, &signature)),
        };

        if decision.is_boundary {
            debug!(
                "Scene {} opens at frame {} ({:.3}s), similarity {:.3}",
                segmentation.scenes.len() + 1,
                position,
                frame.timestamp,
                decision.similarity.combined_similarity
            );
            segmentation.scenes.push(Scene {
                id: segmentation.scenes.len() + 1,
                start_time: frame.timestamp,
                end_time: frame.timestamp,
                frame_indices: vec![position],
                boundary_similarity: decision.similarity.combined_similarity,
            });
        } else if let Some(scene) = segmentation.scenes.last_mut() {
            scene.frame_indices.push(position);
            scene.end_time = frame.timestamp;
        }

        segmentation.frames.push(frame);
        segmentation.signatures.push(signature);
        segmentation.decisions.push(decision);
    }

    fn log_summary(&self, segmentation: &Segmentation<S::Signature>) {
        info!(
            "Segmented {} candidates into {} scenes ({} cuts vetoed{})",
            segmentation.frames.len(),
            segmentation.scenes.len(),
            segmentation.vetoed_count(),
            if segmentation.truncated { ", stream truncated" } else { "" }
        );
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for SceneSegmenter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneSegmenter")
            .field("classifier", &self.classifier)
            .finish()
    }
}
