//! Immutable pipeline configuration
//!
//! A [`Config`] can only be obtained through a validating path
//! ([`Config::default`], [`ConfigBuilder::build`] or one of the JSON loaders),
//! so every pipeline run starts from thresholds and weights that are known to
//! be consistent. Configs are plain data: clone them freely and share them
//! read-only between concurrent runs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::common::{FrameSelectError, Result};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Validated, immutable configuration for one or more pipeline runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConfigFile", into = "ConfigFile")]
pub struct Config {
    sampling_fps: f64,
    jump_cut_threshold: f64,
    delta_intensity_veto: f64,
    delta_intensity_veto_enabled: bool,
    phash_weight: f64,
    histogram_weight: f64,
    target_frame_count: usize,
    dedupe_threshold: Option<f64>,
    max_video_duration: f64,
    min_fill_scene_duration: f64,
    max_frames_per_scene: usize,
}

/// On-disk representation of [`Config`]; every field is optional and falls
/// back to its default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub sampling_fps: f64,
    pub jump_cut_threshold: f64,
    pub delta_intensity_veto: f64,
    pub delta_intensity_veto_enabled: bool,
    pub phash_weight: f64,
    pub histogram_weight: f64,
    pub target_frame_count: usize,
    pub dedupe_threshold: Option<f64>,
    pub max_video_duration: f64,
    pub min_fill_scene_duration: f64,
    pub max_frames_per_scene: usize,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            sampling_fps: 6.0,
            jump_cut_threshold: 0.73,
            delta_intensity_veto: 0.9,
            delta_intensity_veto_enabled: true,
            phash_weight: 0.75,
            histogram_weight: 0.25,
            target_frame_count: 24,
            dedupe_threshold: Some(0.95),
            max_video_duration: 90.0,
            min_fill_scene_duration: 0.5,
            max_frames_per_scene: 6,
        }
    }
}

impl ConfigFile {
    fn validate(&self) -> Result<()> {
        if !(self.sampling_fps.is_finite() && self.sampling_fps > 0.0) {
            return Err(FrameSelectError::config_error(format!(
                "sampling_fps must be positive, got {}",
                self.sampling_fps
            )));
        }

        check_unit("jump_cut_threshold", self.jump_cut_threshold)?;
        check_unit("delta_intensity_veto", self.delta_intensity_veto)?;
        check_unit("phash_weight", self.phash_weight)?;
        check_unit("histogram_weight", self.histogram_weight)?;

        let weight_sum = self.phash_weight + self.histogram_weight;
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(FrameSelectError::config_error(format!(
                "phash_weight + histogram_weight must equal 1.0, got {weight_sum}"
            )));
        }

        if self.target_frame_count == 0 {
            return Err(FrameSelectError::config_error(
                "target_frame_count must be at least 1",
            ));
        }

        if let Some(threshold) = self.dedupe_threshold {
            check_unit("dedupe_threshold", threshold)?;
        }

        if !(self.max_video_duration.is_finite() && self.max_video_duration > 0.0) {
            return Err(FrameSelectError::config_error(format!(
                "max_video_duration must be positive, got {}",
                self.max_video_duration
            )));
        }

        if !(self.min_fill_scene_duration.is_finite() && self.min_fill_scene_duration >= 0.0) {
            return Err(FrameSelectError::config_error(format!(
                "min_fill_scene_duration must be non-negative, got {}",
                self.min_fill_scene_duration
            )));
        }

        if self.max_frames_per_scene == 0 {
            return Err(FrameSelectError::config_error(
                "max_frames_per_scene must be at least 1",
            ));
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(FrameSelectError::config_error(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

impl TryFrom<ConfigFile> for Config {
    type Error = FrameSelectError;

    fn try_from(file: ConfigFile) -> Result<Self> {
        file.validate()?;
        Ok(Self {
            sampling_fps: file.sampling_fps,
            jump_cut_threshold: file.jump_cut_threshold,
            delta_intensity_veto: file.delta_intensity_veto,
            delta_intensity_veto_enabled: file.delta_intensity_veto_enabled,
            phash_weight: file.phash_weight,
            histogram_weight: file.histogram_weight,
            target_frame_count: file.target_frame_count,
            dedupe_threshold: file.dedupe_threshold,
            max_video_duration: file.max_video_duration,
            min_fill_scene_duration: file.min_fill_scene_duration,
            max_frames_per_scene: file.max_frames_per_scene,
        })
    }
}

impl From<Config> for ConfigFile {
    fn from(config: Config) -> Self {
        Self {
            sampling_fps: config.sampling_fps,
            jump_cut_threshold: config.jump_cut_threshold,
            delta_intensity_veto: config.delta_intensity_veto,
            delta_intensity_veto_enabled: config.delta_intensity_veto_enabled,
            phash_weight: config.phash_weight,
            histogram_weight: config.histogram_weight,
            target_frame_count: config.target_frame_count,
            dedupe_threshold: config.dedupe_threshold,
            max_video_duration: config.max_video_duration,
            min_fill_scene_duration: config.min_fill_scene_duration,
            max_frames_per_scene: config.max_frames_per_scene,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let file = ConfigFile::default();
        Self {
            sampling_fps: file.sampling_fps,
            jump_cut_threshold: file.jump_cut_threshold,
            delta_intensity_veto: file.delta_intensity_veto,
            delta_intensity_veto_enabled: file.delta_intensity_veto_enabled,
            phash_weight: file.phash_weight,
            histogram_weight: file.histogram_weight,
            target_frame_count: file.target_frame_count,
            dedupe_threshold: file.dedupe_threshold,
            max_video_duration: file.max_video_duration,
            min_fill_scene_duration: file.min_fill_scene_duration,
            max_frames_per_scene: file.max_frames_per_scene,
        }
    }
}

impl Config {
    /// Start from the defaults and override individual settings
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json)?;
        Self::try_from(file)
    }

    /// Load and validate a JSON configuration file
    #[instrument]
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Turn this config back into a builder, e.g. to derive a variant
    pub fn to_builder(&self) -> ConfigBuilder {
        ConfigBuilder {
            file: ConfigFile::from(self.clone()),
        }
    }

    pub fn sampling_fps(&self) -> f64 {
        self.sampling_fps
    }

    pub fn jump_cut_threshold(&self) -> f64 {
        self.jump_cut_threshold
    }

    pub fn delta_intensity_veto(&self) -> f64 {
        self.delta_intensity_veto
    }

    pub fn delta_intensity_veto_enabled(&self) -> bool {
        self.delta_intensity_veto_enabled
    }

    pub fn phash_weight(&self) -> f64 {
        self.phash_weight
    }

    pub fn histogram_weight(&self) -> f64 {
        self.histogram_weight
    }

    pub fn target_frame_count(&self) -> usize {
        self.target_frame_count
    }

    pub fn dedupe_threshold(&self) -> Option<f64> {
        self.dedupe_threshold
    }

    pub fn max_video_duration(&self) -> f64 {
        self.max_video_duration
    }

    pub fn min_fill_scene_duration(&self) -> f64 {
        self.min_fill_scene_duration
    }

    pub fn max_frames_per_scene(&self) -> usize {
        self.max_frames_per_scene
    }

    /// Seconds between two sampled candidates
    pub fn sampling_interval(&self) -> f64 {
        1.0 / self.sampling_fps
    }
}

/// Builder for [`Config`]; validation happens in [`ConfigBuilder::build`]
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    file: ConfigFile,
}

impl ConfigBuilder {
    pub fn sampling_fps(mut self, fps: f64) -> Self {
        self.file.sampling_fps = fps;
        self
    }

    pub fn jump_cut_threshold(mut self, threshold: f64) -> Self {
        self.file.jump_cut_threshold = threshold;
        self
    }

    pub fn delta_intensity_veto(mut self, threshold: f64) -> Self {
        self.file.delta_intensity_veto = threshold;
        self
    }

    pub fn delta_intensity_veto_enabled(mut self, enabled: bool) -> Self {
        self.file.delta_intensity_veto_enabled = enabled;
        self
    }

    pub fn weights(mut self, phash_weight: f64, histogram_weight: f64) -> Self {
        self.file.phash_weight = phash_weight;
        self.file.histogram_weight = histogram_weight;
        self
    }

    pub fn target_frame_count(mut self, count: usize) -> Self {
        self.file.target_frame_count = count;
        self
    }

    pub fn dedupe_threshold(mut self, threshold: Option<f64>) -> Self {
        self.file.dedupe_threshold = threshold;
        self
    }

    pub fn max_video_duration(mut self, seconds: f64) -> Self {
        self.file.max_video_duration = seconds;
        self
    }

    pub fn min_fill_scene_duration(mut self, seconds: f64) -> Self {
        self.file.min_fill_scene_duration = seconds;
        self
    }

    pub fn max_frames_per_scene(mut self, count: usize) -> Self {
        self.file.max_frames_per_scene = count;
        self
    }

    pub fn build(self) -> Result<Config> {
        Config::try_from(self.file)
    }
}
