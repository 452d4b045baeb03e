//! Debug output for pipeline runs
//!
//! A [`DebugSink`] is told about every classification decision and about the
//! final selection. Sink failures are logged by the pipeline and never abort
//! a run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::allocator::SceneSummary;
use crate::classifier::CutDecision;
use crate::common::{CandidateFrame, FrameRecord, Result};
use crate::pipeline::{
    encode_jpeg, Selection, SelectionStats, DEFAULT_JPEG_MAX_SIZE, DEFAULT_JPEG_QUALITY,
};

pub trait DebugSink {
    /// Called once per candidate, in stream order
    fn on_decision(&mut self, frame: &CandidateFrame, decision: &CutDecision) -> Result<()>;

    /// Called once when a run completes
    fn on_selection(&mut self, selection: &Selection) -> Result<()>;
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DebugSink for NullSink {
    fn on_decision(&mut self, _frame: &CandidateFrame, _decision: &CutDecision) -> Result<()> {
        Ok(())
    }

    fn on_selection(&mut self, _selection: &Selection) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct DecisionEntry {
    index: usize,
    timestamp: f64,
    #[serde(flatten)]
    decision: CutDecision,
}

#[derive(Serialize)]
struct Report<'a> {
    source: &'a str,
    truncated: bool,
    stats: &'a SelectionStats,
    scenes: &'a [SceneSummary],
    frames: Vec<FrameRecord>,
    decisions: &'a [DecisionEntry],
}

/// Writes JPEGs of every cut and vetoed cut, the selected frames, and a
/// `report.json` describing the run
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    decisions: Vec<DecisionEntry>,
}

impl DirectorySink {
    /// Create the sink, creating `dir` if needed
    #[instrument]
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir.join("cuts"))?;
        fs::create_dir_all(dir.join("selected"))?;
        info!("Writing debug output to {}", dir.display());

        Ok(Self {
            dir: dir.to_path_buf(),
            decisions: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join("report.json")
    }
}

impl DebugSink for DirectorySink {
    fn on_decision(&mut self, frame: &CandidateFrame, decision: &CutDecision) -> Result<()> {
        self.decisions.push(DecisionEntry {
            index: frame.index,
            timestamp: frame.timestamp,
            decision: *decision,
        });

        let label = if decision.is_boundary {
            "cut"
        } else if decision.vetoed {
            "vetoed"
        } else {
            return Ok(());
        };

        let path = self
            .dir
            .join("cuts")
            .join(format!("{:05}_{:.3}s_{}.jpg", frame.index, frame.timestamp, label));
        fs::write(&path, encode_jpeg(&frame.image, DEFAULT_JPEG_MAX_SIZE, DEFAULT_JPEG_QUALITY)?)?;
        debug!("Saved {} frame {}", label, path.display());
        Ok(())
    }

    fn on_selection(&mut self, selection: &Selection) -> Result<()> {
        for (i, frame) in selection.frames.iter().enumerate() {
            let record = &frame.record;
            let path = self.dir.join("selected").join(format!(
                "{:03}_scene{:03}_{}_{:.3}s.jpg",
                i, record.scene_id, record.role, record.timestamp
            ));
            fs::write(&path, frame.to_jpeg(DEFAULT_JPEG_MAX_SIZE, DEFAULT_JPEG_QUALITY)?)?;
        }

        let report = Report {
            source: &selection.source.source_name,
            truncated: selection.truncated,
            stats: &selection.stats,
            scenes: &selection.scenes,
            frames: selection.records(),
            decisions: &self.decisions,
        };
        fs::write(self.report_path(), serde_json::to_string_pretty(&report)?)?;

        info!(
            "Debug report with {} decisions written to {}",
            self.decisions.len(),
            self.report_path().display()
        );
        Ok(())
    }
}
