//! End-to-end selection behaviour with a scripted similarity strategy
//!
//! Frames carry their scene number in the red channel and a
//! "brightness change only" marker in the blue channel, so each test can
//! state exactly which cuts exist and how strong they are.

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use image::{Rgb, RgbImage};
use rust_keyframes::{
    CancellationToken, CandidateFrame, Config, DecodedFrame, FrameRole, FrameSelectError,
    FrameSource, MemorySource, Pipeline, PipelineStage, Selection, SimilarityResult,
    SimilarityScorer, VideoMetadata,
};

const FPS: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Marker {
    scene: u8,
    brightness_only: bool,
}

/// Same scene: 0.95. Different scene: 0.1 into even scenes, 0.6 into odd
/// ones, with a brightness-only marker lifting delta_intensity above the veto
#[derive(Debug)]
struct ScriptedScorer;

impl SimilarityScorer for ScriptedScorer {
    type Signature = Marker;

    fn signature(&self, frame: &CandidateFrame) -> Marker {
        let pixel = frame.image.get_pixel(0, 0);
        Marker {
            scene: pixel[0],
            brightness_only: pixel[2] == 1,
        }
    }

    fn compare(&self, a: &Marker, b: &Marker) -> SimilarityResult {
        if a.scene == b.scene {
            return SimilarityResult {
                phash_similarity: 0.95,
                histogram_similarity: 0.95,
                combined_similarity: 0.95,
                delta_intensity: 1.0,
            };
        }

        let combined = if b.brightness_only {
            0.5
        } else if b.scene % 2 == 0 {
            0.1
        } else {
            0.6
        };
        SimilarityResult {
            phash_similarity: combined,
            histogram_similarity: combined,
            combined_similarity: combined,
            delta_intensity: if b.brightness_only { 0.99 } else { 0.5 },
        }
    }
}

fn frame(scene: u8, brightness_only: bool) -> RgbImage {
    RgbImage::from_pixel(8, 8, Rgb([scene, 0, brightness_only as u8]))
}

/// `seconds` of footage per scene, one entry per scene
fn clip(scene_seconds: &[usize]) -> MemorySource {
    let frames = scene_seconds
        .iter()
        .enumerate()
        .flat_map(|(scene, seconds)| {
            std::iter::repeat(frame(scene as u8, false)).take(seconds * FPS as usize)
        })
        .collect();
    MemorySource::new("scripted", frames, FPS).unwrap()
}

/// Decodes `good` frames, then fails on every read
struct CorruptAfter {
    inner: MemorySource,
    good: u64,
}

impl FrameSource for CorruptAfter {
    fn metadata(&self) -> &VideoMetadata {
        self.inner.metadata()
    }

    fn read_frame(&mut self) -> rust_keyframes::Result<Option<DecodedFrame>> {
        match self.inner.read_frame()? {
            Some(frame) if frame.frame_number < self.good => Ok(Some(frame)),
            _ => Err(FrameSelectError::decode_error(
                "broken.mp4",
                "codec not supported",
            )),
        }
    }
}

fn run(config: Config, source: impl FrameSource) -> Selection {
    Pipeline::with_scorer(config, ScriptedScorer).run(source).unwrap()
}

fn assert_well_formed(selection: &Selection, target: usize) {
    assert!(!selection.is_empty());
    assert!(selection.len() <= target);
    assert_eq!(selection.frames[0].record.timestamp, 0.0);
    assert_eq!(selection.frames[0].record.role, FrameRole::Boundary);

    let timestamps = selection.timestamps();
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));

    let covered: f64 = selection.frames.iter().map(|f| f.record.duration).sum();
    assert!((covered - selection.source.duration_seconds).abs() < 1e-6);
}

#[test]
fn uniform_clip_is_one_scene_with_fills() {
    let selection = run(Config::default(), clip(&[10]));

    assert_well_formed(&selection, 24);
    assert_eq!(selection.stats.scene_count, 1);
    assert_eq!(selection.stats.boundary_frames, 1);
    // Fills are capped per scene
    assert_eq!(selection.len(), Config::default().max_frames_per_scene());
    assert!(selection.frames.iter().all(|f| f.record.scene_id == 1));
}

#[test]
fn brightness_change_is_vetoed() {
    let mut frames = vec![frame(0, false); 30];
    frames.extend(vec![frame(1, true); 30]);
    let source = MemorySource::new("fade", frames, FPS).unwrap();

    let selection = run(Config::default(), source);
    assert_eq!(selection.stats.scene_count, 1);
    assert_eq!(selection.stats.vetoed_cuts, 1);

    // Without the veto the same change is a cut
    let config = Config::builder().delta_intensity_veto_enabled(false).build().unwrap();
    let mut frames = vec![frame(0, false); 30];
    frames.extend(vec![frame(1, true); 30]);
    let source = MemorySource::new("fade", frames, FPS).unwrap();

    let selection = run(config, source);
    assert_eq!(selection.stats.scene_count, 2);
    assert_eq!(selection.stats.vetoed_cuts, 0);
    assert_eq!(selection.frames_by_scene().len(), 2);
}

#[test]
fn overflow_keeps_the_strongest_cuts() {
    let config = Config::builder().target_frame_count(20).build().unwrap();
    let selection = run(config, clip(&[1; 40]));

    assert_well_formed(&selection, 20);
    assert_eq!(selection.stats.scene_count, 40);
    assert_eq!(selection.len(), 20);
    assert_eq!(selection.stats.dropped_scenes, 20);
    assert_eq!(selection.stats.fill_frames, 0);

    // Cuts into even scenes are the hard ones; odd scenes fold into them
    for (i, selected) in selection.frames.iter().enumerate() {
        assert_eq!(selected.record.role, FrameRole::Boundary);
        assert!((selected.record.timestamp - (2 * i) as f64).abs() < 1e-9);
        assert_eq!(selected.record.scene_id, 2 * i + 1);
        assert!((selected.record.duration - 2.0).abs() < 1e-9);
    }
    for summary in &selection.scenes {
        assert_eq!(summary.merged_scene_ids, vec![summary.scene_id + 1]);
    }
}

#[test]
fn spare_budget_goes_to_longer_scenes() {
    let selection = run(Config::default(), clip(&[2, 8, 2]));

    assert_well_formed(&selection, 24);
    assert_eq!(selection.stats.scene_count, 3);
    assert_eq!(selection.stats.boundary_frames, 3);

    let by_scene = selection.frames_by_scene();
    assert!(by_scene[&2].len() >= by_scene[&1].len());
    assert!(by_scene[&2].len() >= by_scene[&3].len());
    assert!(by_scene
        .values()
        .all(|frames| frames.len() <= Config::default().max_frames_per_scene()));
}

#[test]
fn selection_is_deterministic() {
    let first = run(Config::default(), clip(&[3, 1, 5, 2]));
    let second = run(Config::default(), clip(&[3, 1, 5, 2]));

    assert_eq!(first.records(), second.records());
    assert_eq!(first.scenes, second.scenes);
}

#[test]
fn overlong_video_is_rejected_before_decoding() {
    let config = Config::builder().max_video_duration(5.0).build().unwrap();
    let error = Pipeline::with_scorer(config, ScriptedScorer)
        .run(clip(&[6]))
        .unwrap_err();

    assert_eq!(error.stage, PipelineStage::Sampling);
    assert_eq!(error.frames_processed, 0);
    assert_matches!(error.kind(), FrameSelectError::DurationExceeded { .. });
}

#[test]
fn cancelled_run_reports_its_stage() {
    let token = CancellationToken::new();
    token.cancel();

    let mut pipeline =
        Pipeline::with_scorer(Config::default(), ScriptedScorer).with_cancellation_token(token);
    let error = pipeline.run(clip(&[4])).unwrap_err();

    assert_eq!(error.stage, PipelineStage::Segmenting);
    assert_eq!(pipeline.stage(), PipelineStage::Error);
    assert_matches!(
        error.kind(),
        FrameSelectError::Cancelled {
            frames_processed: 0
        }
    );
}

#[test]
fn expired_deadline_cancels() {
    let deadline = Instant::now() - Duration::from_millis(1);
    let error = Pipeline::with_scorer(Config::default(), ScriptedScorer)
        .with_deadline(deadline)
        .run(clip(&[4]))
        .unwrap_err();

    assert_matches!(error.kind(), FrameSelectError::Cancelled { .. });
}

#[test]
fn empty_video_fails_in_sampling() {
    let source = MemorySource::new("empty", Vec::new(), FPS).unwrap();
    let error = Pipeline::with_scorer(Config::default(), ScriptedScorer)
        .run(source)
        .unwrap_err();

    assert_eq!(error.stage, PipelineStage::Sampling);
    assert_matches!(error.kind(), FrameSelectError::EmptyVideo);
}

#[test]
fn pipeline_runs_again_after_reset() {
    let mut pipeline = Pipeline::with_scorer(Config::default(), ScriptedScorer);
    pipeline.run(clip(&[2])).unwrap();
    assert_eq!(pipeline.stage(), PipelineStage::Done);

    let error = pipeline.run(clip(&[2])).unwrap_err();
    assert_matches!(error.kind(), FrameSelectError::InvalidTransition { .. });

    pipeline.reset();
    let selection = pipeline.run(clip(&[2])).unwrap();
    assert_eq!(selection.stats.scene_count, 1);
}

#[test]
fn budget_is_never_exceeded() {
    for target in [1, 2, 5, 7, 24] {
        let config = Config::builder().target_frame_count(target).build().unwrap();
        let selection = run(config, clip(&[1, 3, 1, 1, 4, 2, 1]));
        assert_well_formed(&selection, target);
    }
}

#[test]
fn unreadable_source_fails_with_decode_error() {
    let source = CorruptAfter {
        inner: clip(&[4]),
        good: 0,
    };
    let mut pipeline = Pipeline::with_scorer(Config::default(), ScriptedScorer);
    let error = pipeline.run(source).unwrap_err();

    assert_eq!(error.stage, PipelineStage::Segmenting);
    assert_eq!(error.frames_processed, 0);
    assert_eq!(error.last_timestamp, None);
    assert_eq!(pipeline.stage(), PipelineStage::Error);
    assert_matches!(error.kind(), FrameSelectError::Decode { .. });
}

#[test]
fn mid_stream_failure_keeps_the_decoded_prefix() {
    // Three one-second scenes, but the decoder dies two seconds in
    let source = CorruptAfter {
        inner: clip(&[1, 1, 1]),
        good: 2 * FPS as u64,
    };
    let mut pipeline = Pipeline::with_scorer(Config::default(), ScriptedScorer);
    let selection = pipeline.run(source).unwrap();

    assert_eq!(pipeline.stage(), PipelineStage::Done);
    assert!(selection.truncated);
    assert_eq!(selection.stats.frames_decoded, 12);
    assert_eq!(selection.stats.candidate_count, 12);
    assert_eq!(selection.stats.scene_count, 2);

    let timestamps = selection.timestamps();
    assert!(timestamps.iter().all(|t| *t < 2.0));
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));

    // Durations stop at the end of the decoded part, not the container length
    let covered: f64 = selection.frames.iter().map(|f| f.record.duration).sum();
    assert!((covered - 2.0).abs() < 1e-6);
}
