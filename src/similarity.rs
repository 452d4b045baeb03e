//! Frame similarity scoring
//!
//! Two complementary metrics are combined into one similarity value:
//! a perceptual hash that tracks structural layout, and HSV histograms that
//! track colour distribution. A separate brightness-only metric,
//! `delta_intensity`, lets the classifier recognise fades and exposure
//! shifts that fool both.
//!
//! Scoring is split into a per-frame [`SimilarityScorer::signature`] step and
//! a pairwise [`SimilarityScorer::compare`] step, so a frame stream can be
//! fingerprinted once per frame rather than once per pair.

use std::sync::Arc;

use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use rustdct::{Dct2, DctPlanner, TransformType2And3};
use tracing::{instrument, trace};

use crate::common::{CandidateFrame, SimilarityResult};
use crate::config::Config;

/// Side of the grayscale thumbnail the DCT runs over
const HASH_INPUT_SIZE: usize = 32;
/// Side of the low-frequency block that becomes the hash
const HASH_BLOCK_SIZE: usize = 16;
const HASH_BITS: usize = HASH_BLOCK_SIZE * HASH_BLOCK_SIZE;
const HASH_WORDS: usize = HASH_BITS / 64;

const HUE_BINS: usize = 50;
const SATURATION_BINS: usize = 60;
const VALUE_BINS: usize = 60;
/// 8-bit hue range, matching the usual H/2 encoding
const HUE_RANGE: f64 = 180.0;

const HUE_WEIGHT: f64 = 0.2;
const SATURATION_WEIGHT: f64 = 0.3;
const VALUE_WEIGHT: f64 = 0.5;

/// Pairwise frame similarity
///
/// Implementations must be pure: the same pair of frames always yields the
/// same [`SimilarityResult`], and every value lies in `[0, 1]`.
pub trait SimilarityScorer {
    /// Per-frame precomputation reused across comparisons
    type Signature;

    fn signature(&self, frame: &CandidateFrame) -> Self::Signature;

    fn compare(&self, a: &Self::Signature, b: &Self::Signature) -> SimilarityResult;

    /// Score two frames directly
    fn score(&self, a: &CandidateFrame, b: &CandidateFrame) -> SimilarityResult {
        self.compare(&self.signature(a), &self.signature(b))
    }
}

/// 256-bit perceptual hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerceptualHash([u64; HASH_WORDS]);

impl PerceptualHash {
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// `1 - hamming / 256`
    pub fn similarity(&self, other: &Self) -> f64 {
        1.0 - self.hamming_distance(other) as f64 / HASH_BITS as f64
    }
}

/// HSV histograms of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct HsvHistogram {
    pub hue: Vec<f64>,
    pub saturation: Vec<f64>,
    pub value: Vec<f64>,
}

impl HsvHistogram {
    fn from_image(image: &RgbImage) -> Self {
        let mut hue = vec![0.0; HUE_BINS];
        let mut saturation = vec![0.0; SATURATION_BINS];
        let mut value = vec![0.0; VALUE_BINS];

        for pixel in image.pixels() {
            let (h, s, v) = rgb_to_hsv(pixel.0);
            hue[bin(h, HUE_RANGE, HUE_BINS)] += 1.0;
            saturation[bin(s, 256.0, SATURATION_BINS)] += 1.0;
            value[bin(v, 256.0, VALUE_BINS)] += 1.0;
        }

        Self { hue, saturation, value }
    }

    /// Weighted per-channel correlation, clamped to `[0, 1]`
    pub fn similarity(&self, other: &Self) -> f64 {
        let hue = correlation(&self.hue, &other.hue);
        let saturation = correlation(&self.saturation, &other.saturation);
        let value = correlation(&self.value, &other.value);

        let weighted = HUE_WEIGHT * hue + SATURATION_WEIGHT * saturation + VALUE_WEIGHT * value;
        weighted.clamp(0.0, 1.0)
    }
}

/// Everything [`CompositeScorer`] needs to know about one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSignature {
    pub phash: PerceptualHash,
    pub histogram: HsvHistogram,
    /// Mean BT.601 luma in `[0, 255]`
    pub mean_luma: f64,
}

/// Default scorer: weighted pHash + HSV histogram similarity
#[derive(Clone)]
pub struct CompositeScorer {
    phash_weight: f64,
    histogram_weight: f64,
    dct: Arc<dyn TransformType2And3<f64>>,
}

impl CompositeScorer {
    /// Create a scorer with explicit weights
    ///
    /// # Panics
    /// Panics if a weight is outside `[0, 1]` or the weights don't sum to 1
    /// (`Config` validates the same rule without panicking)
    pub fn new(phash_weight: f64, histogram_weight: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&phash_weight) && (0.0..=1.0).contains(&histogram_weight),
            "Weights must be within [0, 1], got: {} and {}",
            phash_weight,
            histogram_weight
        );
        assert!(
            (phash_weight + histogram_weight - 1.0).abs() <= 1e-6,
            "Weights must sum to 1.0, got: {}",
            phash_weight + histogram_weight
        );

        let mut planner = DctPlanner::new();
        let dct = planner.plan_dct2(HASH_INPUT_SIZE);

        Self {
            phash_weight,
            histogram_weight,
            dct,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.phash_weight(), config.histogram_weight())
    }

    pub fn phash_weight(&self) -> f64 {
        self.phash_weight
    }

    pub fn histogram_weight(&self) -> f64 {
        self.histogram_weight
    }

    /// Perceptual hash of an image
    ///
    /// Grayscale, downscale to 32x32, 2-D DCT-II, then one bit per
    /// coefficient of the top-left 16x16 block: set when the coefficient is
    /// above the block median.
    pub fn perceptual_hash(&self, image: &RgbImage) -> PerceptualHash {
        if image.width() == 0 || image.height() == 0 {
            return PerceptualHash([0; HASH_WORDS]);
        }

        let gray: GrayImage = imageops::grayscale(image);
        let thumb = imageops::resize(
            &gray,
            HASH_INPUT_SIZE as u32,
            HASH_INPUT_SIZE as u32,
            FilterType::Triangle,
        );

        let mut matrix: Vec<f64> = thumb.pixels().map(|p| p.0[0] as f64).collect();

        for row in matrix.chunks_exact_mut(HASH_INPUT_SIZE) {
            self.dct.process_dct2(row);
        }

        let mut column = vec![0.0; HASH_INPUT_SIZE];
        for x in 0..HASH_INPUT_SIZE {
            for y in 0..HASH_INPUT_SIZE {
                column[y] = matrix[y * HASH_INPUT_SIZE + x];
            }
            self.dct.process_dct2(&mut column);
            for y in 0..HASH_INPUT_SIZE {
                matrix[y * HASH_INPUT_SIZE + x] = column[y];
            }
        }

        let mut block = Vec::with_capacity(HASH_BITS);
        for y in 0..HASH_BLOCK_SIZE {
            let start = y * HASH_INPUT_SIZE;
            block.extend_from_slice(&matrix[start..start + HASH_BLOCK_SIZE]);
        }

        let median = median(&block);

        let mut words = [0u64; HASH_WORDS];
        for (i, coefficient) in block.iter().enumerate() {
            if *coefficient > median {
                words[i / 64] |= 1 << (i % 64);
            }
        }

        PerceptualHash(words)
    }
}

impl Default for CompositeScorer {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SimilarityScorer for CompositeScorer {
    type Signature = FrameSignature;

    #[instrument(skip(self, frame), fields(index = frame.index))]
    fn signature(&self, frame: &CandidateFrame) -> FrameSignature {
        FrameSignature {
            phash: self.perceptual_hash(&frame.image),
            histogram: HsvHistogram::from_image(&frame.image),
            mean_luma: mean_luma(&frame.image),
        }
    }

    fn compare(&self, a: &FrameSignature, b: &FrameSignature) -> SimilarityResult {
        let phash_similarity = a.phash.similarity(&b.phash);
        let histogram_similarity = a.histogram.similarity(&b.histogram);
        let combined_similarity = (self.phash_weight * phash_similarity
            + self.histogram_weight * histogram_similarity)
            .clamp(0.0, 1.0);
        let delta_intensity = (1.0 - (a.mean_luma - b.mean_luma).abs() / 255.0).clamp(0.0, 1.0);

        trace!(
            "phash={:.3}, hist={:.3}, combined={:.3}, delta_intensity={:.3}",
            phash_similarity,
            histogram_similarity,
            combined_similarity,
            delta_intensity
        );

        SimilarityResult {
            phash_similarity,
            histogram_similarity,
            combined_similarity,
            delta_intensity,
        }
    }
}

// Implement Debug manually, the planned DCT has no useful representation
impl std::fmt::Debug for CompositeScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeScorer")
            .field("phash_weight", &self.phash_weight)
            .field("histogram_weight", &self.histogram_weight)
            .finish()
    }
}

/// 8-bit HSV: hue in `[0, 180)`, saturation and value in `[0, 255]`
fn rgb_to_hsv([r, g, b]: [u8; 3]) -> (f64, f64, f64) {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { 255.0 * delta / max } else { 0.0 };

    let hue_degrees = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let hue_degrees = if hue_degrees < 0.0 { hue_degrees + 360.0 } else { hue_degrees };

    (hue_degrees / 2.0, saturation, max)
}

fn bin(value: f64, range: f64, bins: usize) -> usize {
    ((value / range * bins as f64) as usize).min(bins - 1)
}

/// Pearson correlation of two histograms
fn correlation(a: &[f64], b: &[f64]) -> f64 {
    if a == b {
        return 1.0;
    }

    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance_a = 0.0;
    let mut variance_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        covariance += dx * dy;
        variance_a += dx * dx;
        variance_b += dy * dy;
    }

    let denominator = (variance_a * variance_b).sqrt();
    if denominator == 0.0 {
        // A flat histogram has no shape to disagree with
        return 1.0;
    }

    covariance / denominator
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn mean_luma(image: &RgbImage) -> f64 {
    let count = image.width() as u64 * image.height() as u64;
    if count == 0 {
        return 0.0;
    }

    let total: f64 = image
        .pixels()
        .map(|p| 0.299 * p.0[0] as f64 + 0.587 * p.0[1] as f64 + 0.114 * p.0[2] as f64)
        .sum();
    total / count as f64
}
