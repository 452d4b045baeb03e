//! Fixed-rate frame sampling
//!
//! The sampler pulls decoded frames from a [`FrameSource`] and keeps the ones
//! that land on a fixed sampling grid (`k / sampling_fps` seconds). It is a
//! lazy, single-pass stream: candidates are produced one at a time as the
//! segmenter asks for them.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::common::{CandidateFrame, FrameSelectError, Result};
use crate::frame_source::{FrameSource, VideoMetadata};

/// Caller-controlled stop conditions, checked once per decoded frame
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Never trips
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_tripped(&self) -> bool {
        let cancelled = self.token.as_ref().is_some_and(|t| t.is_cancelled());
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        cancelled || expired
    }
}

/// Everything a sampler produced, for callers that want the whole stream
#[derive(Debug)]
pub struct SampledFrames {
    pub frames: Vec<CandidateFrame>,
    /// The decoder failed mid-stream; `frames` holds what came before
    pub truncated: bool,
}

/// Samples a decoded frame stream at a fixed rate
pub struct FrameSampler<S> {
    source: S,
    sampling_fps: f64,
    tolerance: f64,
    next_sample: u64,
    next_index: usize,
    frames_decoded: usize,
    last_timestamp: Option<f64>,
    truncated: bool,
    finished: bool,
    cancellation: Cancellation,
}

impl<S: FrameSource> FrameSampler<S> {
    /// Create a sampler over an opened source
    ///
    /// # Panics
    /// Panics if `sampling_fps` is not positive (validated by `Config`)
    #[instrument(skip(source, cancellation))]
    pub fn new(source: S, sampling_fps: f64, cancellation: Cancellation) -> Self {
        assert!(sampling_fps > 0.0, "Sampling FPS must be positive, got: {}", sampling_fps);

        // Accept a decoded frame up to half a native frame early so that
        // rounding in container timestamps doesn't skip a grid point
        let native_fps = source.metadata().fps;
        let tolerance = if native_fps > 0.0 { 0.5 / native_fps } else { 0.0 };

        debug!(
            "Created FrameSampler at {}fps over {} ({}fps native)",
            sampling_fps,
            source.metadata().source_name,
            native_fps
        );

        Self {
            source,
            sampling_fps,
            tolerance,
            next_sample: 0,
            next_index: 0,
            frames_decoded: 0,
            last_timestamp: None,
            truncated: false,
            finished: false,
            cancellation,
        }
    }

    pub fn metadata(&self) -> &VideoMetadata {
        self.source.metadata()
    }

    /// Produce the next candidate frame
    ///
    /// Returns `Ok(None)` at the end of the stream, including after a
    /// decode failure once at least one candidate was produced (see
    /// [`FrameSampler::truncated`]).
    ///
    /// # Errors
    /// * `Cancelled` - If the cancellation token or deadline tripped
    /// * `Decode` - If the source fails before the first candidate
    pub fn next_frame(&mut self) -> Result<Option<CandidateFrame>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if self.cancellation.is_tripped() {
                self.finished = true;
                info!("Sampling cancelled after {} decoded frames", self.frames_decoded);
                return Err(FrameSelectError::Cancelled {
                    frames_processed: self.frames_decoded,
                });
            }

            let decoded = match self.source.read_frame() {
                Ok(Some(decoded)) => decoded,
                Ok(None) => {
                    self.finished = true;
                    debug!(
                        "End of stream: {} decoded, {} sampled",
                        self.frames_decoded, self.next_index
                    );
                    return Ok(None);
                }
                Err(e) if self.next_index == 0 => {
                    // Nothing to keep, so the source itself is unreadable
                    self.finished = true;
                    return Err(e);
                }
                Err(e) => {
                    self.finished = true;
                    self.truncated = true;
                    warn!(
                        "Decode failed after {} frames, keeping {} sampled frames: {}",
                        self.frames_decoded, self.next_index, e
                    );
                    return Ok(None);
                }
            };

            self.frames_decoded += 1;
            if self.frames_decoded % 1000 == 0 {
                debug!(
                    "Decoded {}/{} frames",
                    self.frames_decoded,
                    self.source.metadata().frame_count
                );
            }

            let reach = decoded.timestamp + self.tolerance;
            if reach < self.grid_time(self.next_sample) {
                continue;
            }

            while self.grid_time(self.next_sample) <= reach {
                self.next_sample += 1;
            }

            let candidate = CandidateFrame::new(self.next_index, decoded.timestamp, decoded.image);
            self.next_index += 1;
            self.last_timestamp = Some(candidate.timestamp);
            return Ok(Some(candidate));
        }
    }

    /// Drain the stream into memory
    pub fn sample_all(mut self) -> Result<SampledFrames> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(SampledFrames {
            frames,
            truncated: self.truncated,
        })
    }

    fn grid_time(&self, sample: u64) -> f64 {
        sample as f64 / self.sampling_fps
    }

    /// Seconds between two grid points
    pub fn sampling_interval(&self) -> f64 {
        1.0 / self.sampling_fps
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Frames pulled from the decoder so far, sampled or not
    pub fn frames_decoded(&self) -> usize {
        self.frames_decoded
    }

    /// Candidates produced so far
    pub fn frames_sampled(&self) -> usize {
        self.next_index
    }

    /// Timestamp of the last candidate produced
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }
}

impl<S: FrameSource> Iterator for FrameSampler<S> {
    type Item = Result<CandidateFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

impl<S: FrameSource> std::fmt::Debug for FrameSampler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSampler")
            .field("source", &self.source.metadata().source_name)
            .field("sampling_fps", &self.sampling_fps)
            .field("frames_decoded", &self.frames_decoded)
            .field("frames_sampled", &self.next_index)
            .field("truncated", &self.truncated)
            .finish()
    }
}
