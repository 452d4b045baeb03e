//! Jump-cut classification
//!
//! Turns a [`SimilarityResult`] into a boundary decision. A pair whose
//! combined similarity falls below the jump-cut threshold is an initial cut;
//! the cut is vetoed when overall brightness barely moved, since a real
//! edit almost always shifts exposure while camera motion and flashes of
//! texture often don't.

use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::common::{CandidateFrame, SimilarityResult};
use crate::config::Config;
use crate::similarity::SimilarityScorer;

/// Outcome of classifying one adjacent frame pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CutDecision {
    pub similarity: SimilarityResult,
    /// Combined similarity fell below the threshold
    pub initial_cut: bool,
    /// An initial cut suppressed by the brightness veto
    pub vetoed: bool,
    pub is_boundary: bool,
}

impl CutDecision {
    /// Decision for the first frame of a stream, which always opens a scene
    pub fn opening() -> Self {
        Self {
            similarity: SimilarityResult {
                phash_similarity: 0.0,
                histogram_similarity: 0.0,
                combined_similarity: 0.0,
                delta_intensity: 0.0,
            },
            initial_cut: true,
            vetoed: false,
            is_boundary: true,
        }
    }
}

/// Boundary detector over an injectable similarity strategy
pub struct JumpCutClassifier<S> {
    scorer: S,
    threshold: f64,
    veto_threshold: f64,
    veto_enabled: bool,
}

impl<S: SimilarityScorer> JumpCutClassifier<S> {
    /// Create a classifier with the brightness veto enabled
    ///
    /// # Arguments
    /// * `scorer` - Similarity strategy used for frame pairs
    /// * `threshold` - Combined similarity below which a pair is an initial cut
    /// * `veto_threshold` - `delta_intensity` above which an initial cut is vetoed
    ///
    /// # Panics
    /// Panics if either threshold is outside `[0, 1]`
    pub fn new(scorer: S, threshold: f64, veto_threshold: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&threshold),
            "Threshold must be within [0, 1], got: {}",
            threshold
        );
        assert!(
            (0.0..=1.0).contains(&veto_threshold),
            "Veto threshold must be within [0, 1], got: {}",
            veto_threshold
        );

        debug!(
            "Created JumpCutClassifier with threshold: {}, veto: {}",
            threshold, veto_threshold
        );

        Self {
            scorer,
            threshold,
            veto_threshold,
            veto_enabled: true,
        }
    }

    #[instrument(skip(scorer, config))]
    pub fn from_config(scorer: S, config: &Config) -> Self {
        Self::new(scorer, config.jump_cut_threshold(), config.delta_intensity_veto())
            .with_veto_enabled(config.delta_intensity_veto_enabled())
    }

    pub fn with_veto_enabled(mut self, enabled: bool) -> Self {
        self.veto_enabled = enabled;
        self
    }

    /// Apply the thresholds to a precomputed similarity
    pub fn decide(&self, similarity: &SimilarityResult) -> CutDecision {
        let initial_cut = similarity.combined_similarity < self.threshold;
        let vetoed =
            initial_cut && self.veto_enabled && similarity.delta_intensity > self.veto_threshold;
        let is_boundary = initial_cut && !vetoed;

        if vetoed {
            trace!(
                "Cut vetoed: combined={:.3} < {}, but delta_intensity={:.3} > {}",
                similarity.combined_similarity,
                self.threshold,
                similarity.delta_intensity,
                self.veto_threshold
            );
        }

        CutDecision {
            similarity: *similarity,
            initial_cut,
            vetoed,
            is_boundary,
        }
    }

    /// Score and classify an adjacent pair
    pub fn classify(&self, prev: &CandidateFrame, curr: &CandidateFrame) -> CutDecision {
        self.decide(&self.scorer.score(prev, curr))
    }

    /// Whether `curr` opens a new scene after `prev`
    pub fn is_boundary(&self, prev: &CandidateFrame, curr: &CandidateFrame) -> bool {
        self.classify(prev, curr).is_boundary
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn veto_threshold(&self) -> f64 {
        self.veto_threshold
    }

    pub fn veto_enabled(&self) -> bool {
        self.veto_enabled
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for JumpCutClassifier<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JumpCutClassifier")
            .field("scorer", &self.scorer)
            .field("threshold", &self.threshold)
            .field("veto_threshold", &self.veto_threshold)
            .field("veto_enabled", &self.veto_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::CompositeScorer;
    use image::{Rgb, RgbImage};

    fn similarity(combined: f64, delta: f64) -> SimilarityResult {
        SimilarityResult {
            phash_similarity: combined,
            histogram_similarity: combined,
            combined_similarity: combined,
            delta_intensity: delta,
        }
    }

    fn classifier() -> JumpCutClassifier<CompositeScorer> {
        JumpCutClassifier::from_config(CompositeScorer::default(), &Config::default())
    }

    #[test]
    fn test_classifier_creation() {
        let classifier = classifier();
        assert_eq!(classifier.threshold(), 0.73);
        assert_eq!(classifier.veto_threshold(), 0.9);
        assert!(classifier.veto_enabled());
    }

    #[test]
    #[should_panic(expected = "Threshold must be within [0, 1]")]
    fn test_threshold_out_of_range() {
        JumpCutClassifier::new(CompositeScorer::default(), 1.2, 0.9);
    }

    #[test]
    fn test_similar_pair_is_not_a_cut() {
        let decision = classifier().decide(&similarity(0.95, 0.99));
        assert!(!decision.initial_cut);
        assert!(!decision.vetoed);
        assert!(!decision.is_boundary);
    }

    #[test]
    fn test_dissimilar_pair_with_brightness_change_is_a_cut() {
        let decision = classifier().decide(&similarity(0.40, 0.60));
        assert!(decision.initial_cut);
        assert!(!decision.vetoed);
        assert!(decision.is_boundary);
    }

    #[test]
    fn test_veto_suppresses_cut_when_brightness_is_stable() {
        let decision = classifier().decide(&similarity(0.50, 0.99));
        assert!(decision.initial_cut);
        assert!(decision.vetoed);
        assert!(!decision.is_boundary);
    }

    #[test]
    fn test_veto_boundary_is_strict() {
        // delta_intensity equal to the veto threshold does not veto
        let decision = classifier().decide(&similarity(0.50, 0.9));
        assert!(decision.is_boundary);

        // combined equal to the threshold is not a cut
        let decision = classifier().decide(&similarity(0.73, 0.1));
        assert!(!decision.initial_cut);
    }

    #[test]
    fn test_veto_can_be_disabled() {
        let classifier = classifier().with_veto_enabled(false);
        let decision = classifier.decide(&similarity(0.50, 0.99));
        assert!(decision.is_boundary);
        assert!(!decision.vetoed);
    }

    #[test]
    fn test_monotonic_in_threshold() {
        let samples: Vec<SimilarityResult> = (0..=20)
            .flat_map(|c| (0..=4).map(move |d| similarity(c as f64 / 20.0, d as f64 / 4.0)))
            .collect();

        let thresholds = [0.2, 0.5, 0.73, 0.9];
        for pair in thresholds.windows(2) {
            let low = JumpCutClassifier::new(CompositeScorer::default(), pair[0], 0.9);
            let high = JumpCutClassifier::new(CompositeScorer::default(), pair[1], 0.9);

            for sample in &samples {
                if low.decide(sample).is_boundary {
                    assert!(high.decide(sample).is_boundary, "lost boundary at {sample:?}");
                }
            }
        }
    }

    #[test]
    fn test_classify_real_frames() {
        let classifier = classifier();
        let dark = CandidateFrame::new(0, 0.0, RgbImage::from_pixel(32, 32, Rgb([10, 10, 10])));
        let same = CandidateFrame::new(1, 1.0 / 6.0, dark.image.clone());

        assert!(!classifier.is_boundary(&dark, &same));
        assert_eq!(classifier.classify(&dark, &same).similarity.combined_similarity, 1.0);
    }

    #[test]
    fn test_opening_decision() {
        let decision = CutDecision::opening();
        assert!(decision.is_boundary);
        assert_eq!(decision.similarity.combined_similarity, 0.0);
    }
}
