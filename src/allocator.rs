//! Budget-constrained frame allocation
//!
//! Every scene is represented by its opening frame. When there are more
//! scenes than the budget allows, the least significant cuts (highest
//! boundary similarity) are dropped and their scenes are folded into the
//! preceding kept scene. When there are fewer, the spare budget is spent on
//! interior "fill" frames spread over the longer scenes, and fills that
//! would be near-duplicates of their predecessor are removed.

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::common::{FrameRecord, FrameRole, FrameSelectError, Result, Scene};
use crate::config::Config;

/// Reporting view of a kept scene
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneSummary {
    pub scene_id: usize,
    pub start_time: f64,
    /// End of the last candidate of this scene or of any scene merged into it
    pub end_time: f64,
    /// Dropped scenes folded into this one, in temporal order
    pub merged_scene_ids: Vec<usize>,
}

/// Output of one allocation
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Selected frames, ascending by timestamp
    pub records: Vec<FrameRecord>,
    pub scenes: Vec<SceneSummary>,
    /// Scenes removed by the significance ranking
    pub dropped_scenes: usize,
    /// Fill frames removed as near-duplicates
    pub deduplicated: usize,
}

impl Allocation {
    pub fn boundary_count(&self) -> usize {
        self.records.iter().filter(|r| r.role == FrameRole::Boundary).count()
    }

    pub fn fill_count(&self) -> usize {
        self.records.iter().filter(|r| r.role == FrameRole::Fill).count()
    }
}

/// Chooses the output frames under a global frame budget
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBudgetAllocator {
    target_frame_count: usize,
    dedupe_threshold: Option<f64>,
    min_fill_scene_duration: f64,
    max_frames_per_scene: usize,
}

impl FrameBudgetAllocator {
    /// Create an allocator for a budget, with the default fill settings
    ///
    /// # Panics
    /// Panics if `target_frame_count` is zero
    pub fn new(target_frame_count: usize) -> Self {
        assert!(target_frame_count > 0, "Target frame count must be at least 1");
        let defaults = Config::default();

        Self {
            target_frame_count,
            dedupe_threshold: defaults.dedupe_threshold(),
            min_fill_scene_duration: defaults.min_fill_scene_duration(),
            max_frames_per_scene: defaults.max_frames_per_scene(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            target_frame_count: config.target_frame_count(),
            dedupe_threshold: config.dedupe_threshold(),
            min_fill_scene_duration: config.min_fill_scene_duration(),
            max_frames_per_scene: config.max_frames_per_scene(),
        }
    }

    pub fn with_dedupe_threshold(mut self, threshold: Option<f64>) -> Self {
        self.dedupe_threshold = threshold;
        self
    }

    pub fn with_min_fill_scene_duration(mut self, seconds: f64) -> Self {
        self.min_fill_scene_duration = seconds;
        self
    }

    pub fn with_max_frames_per_scene(mut self, count: usize) -> Self {
        self.max_frames_per_scene = count.max(1);
        self
    }

    pub fn target_frame_count(&self) -> usize {
        self.target_frame_count
    }

    /// Select the output frames
    ///
    /// # Arguments
    /// * `scenes` - Scenes in temporal order, partitioning the candidates
    /// * `timestamps` - Candidate timestamps, indexed by candidate index
    /// * `frame_interval` - Seconds between adjacent candidates
    /// * `similarity` - Combined similarity of two candidates, by index
    ///
    /// # Errors
    /// * `EmptyVideo` - If there are no scenes
    #[instrument(skip(self, scenes, timestamps, similarity), fields(scene_count = scenes.len()))]
    pub fn allocate<F>(
        &self,
        scenes: &[Scene],
        timestamps: &[f64],
        frame_interval: f64,
        similarity: F,
    ) -> Result<Allocation>
    where
        F: Fn(usize, usize) -> f64,
    {
        if scenes.is_empty() {
            return Err(FrameSelectError::EmptyVideo);
        }

        let kept = self.rank_scenes(scenes);
        let summaries = summarize(scenes, &kept);
        let dropped_scenes = scenes.len() - kept.iter().filter(|k| **k).count();

        let mut records: Vec<FrameRecord> = scenes
            .iter()
            .zip(&kept)
            .filter(|(_, keep)| **keep)
            .map(|(scene, _)| FrameRecord {
                timestamp: scene.start_time,
                role: FrameRole::Boundary,
                scene_id: scene.id,
                frame_index: scene.boundary_index(),
                duration: 0.0,
            })
            .collect();

        // Overflow and surplus are exclusive: fills only exist when every
        // scene was kept
        if dropped_scenes == 0 && records.len() < self.target_frame_count {
            let surplus = self.target_frame_count - records.len();
            records.extend(self.place_fills(scenes, timestamps, frame_interval, surplus));
        }

        records.sort_by(|a, b| {
            a.timestamp
                .total_cmp(&b.timestamp)
                .then(a.frame_index.cmp(&b.frame_index))
        });

        let before_dedupe = records.len();
        if let Some(threshold) = self.dedupe_threshold {
            records = dedupe(records, threshold, &similarity);
        }
        let deduplicated = before_dedupe - records.len();

        let stream_end = timestamps.last().map(|t| t + frame_interval).unwrap_or(0.0);
        assign_durations(&mut records, stream_end);

        let allocation = Allocation {
            records,
            scenes: summaries,
            dropped_scenes,
            deduplicated,
        };

        info!(
            "Allocated {} frames ({} boundary, {} fill) from {} scenes; {} scenes dropped, {} fills deduplicated",
            allocation.records.len(),
            allocation.boundary_count(),
            allocation.fill_count(),
            scenes.len(),
            dropped_scenes,
            deduplicated
        );

        Ok(allocation)
    }

    /// Which scenes survive the budget, by position
    fn rank_scenes(&self, scenes: &[Scene]) -> Vec<bool> {
        if scenes.len() <= self.target_frame_count {
            return vec![true; scenes.len()];
        }

        let mut order: Vec<usize> = (0..scenes.len()).collect();
        // Stable sort keeps earlier scenes first on ties
        order.sort_by(|a, b| {
            scenes[*a]
                .boundary_similarity
                .total_cmp(&scenes[*b].boundary_similarity)
        });

        let mut kept = vec![false; scenes.len()];
        for position in order.into_iter().take(self.target_frame_count) {
            kept[position] = true;
        }

        debug!(
            "Budget overflow: keeping {} of {} scenes",
            self.target_frame_count,
            scenes.len()
        );
        kept
    }

    fn place_fills(
        &self,
        scenes: &[Scene],
        timestamps: &[f64],
        frame_interval: f64,
        surplus: usize,
    ) -> Vec<FrameRecord> {
        let coverage: Vec<f64> = scenes
            .iter()
            .enumerate()
            .map(|(i, scene)| {
                let end = match scenes.get(i + 1) {
                    Some(next) => next.start_time,
                    None => scene.end_time + frame_interval,
                };
                end - scene.start_time
            })
            .collect();

        let capacity: Vec<usize> = scenes
            .iter()
            .zip(&coverage)
            .map(|(scene, cov)| {
                if *cov > self.min_fill_scene_duration {
                    (self.max_frames_per_scene - 1).min(scene.len().saturating_sub(1))
                } else {
                    0
                }
            })
            .collect();

        let counts = distribute(surplus, &coverage, &capacity);

        let mut fills = Vec::new();
        for ((scene, cov), count) in scenes.iter().zip(&coverage).zip(&counts) {
            if *count == 0 {
                continue;
            }

            let mut used = vec![scene.boundary_index()];
            for j in 1..=*count {
                let target = scene.start_time + cov * j as f64 / (*count + 1) as f64;
                let Some(index) = nearest_unused(scene, timestamps, &used, target) else {
                    break;
                };
                used.push(index);
                fills.push(FrameRecord {
                    timestamp: timestamps[index],
                    role: FrameRole::Fill,
                    scene_id: scene.id,
                    frame_index: index,
                    duration: 0.0,
                });
            }

            debug!(
                "Scene {}: {} fill frames over {:.2}s",
                scene.id,
                used.len() - 1,
                cov
            );
        }

        fills
    }
}

/// Fold dropped scenes into their kept predecessor
fn summarize(scenes: &[Scene], kept: &[bool]) -> Vec<SceneSummary> {
    let mut summaries: Vec<SceneSummary> = Vec::new();
    // Dropped scenes before the first kept one attach to it instead
    let mut orphans: Vec<&Scene> = Vec::new();

    for (scene, keep) in scenes.iter().zip(kept) {
        if *keep {
            let start_time = orphans.first().map(|o| o.start_time).unwrap_or(scene.start_time);
            summaries.push(SceneSummary {
                scene_id: scene.id,
                start_time,
                end_time: scene.end_time,
                merged_scene_ids: orphans.drain(..).map(|o| o.id).collect(),
            });
        } else if let Some(previous) = summaries.last_mut() {
            previous.end_time = scene.end_time;
            previous.merged_scene_ids.push(scene.id);
        } else {
            orphans.push(scene);
        }
    }

    summaries
}

/// Largest-remainder split of `slots` proportional to `weights`, bounded by
/// `capacity`; slots a scene can't hold go to the longest scenes with room
fn distribute(slots: usize, weights: &[f64], capacity: &[usize]) -> Vec<usize> {
    let mut counts = vec![0usize; weights.len()];
    let total: f64 = weights
        .iter()
        .zip(capacity)
        .filter(|(_, cap)| **cap > 0)
        .map(|(w, _)| *w)
        .sum();

    if slots == 0 || total <= 0.0 {
        return counts;
    }

    let quotas: Vec<f64> = weights
        .iter()
        .zip(capacity)
        .map(|(w, cap)| if *cap > 0 { slots as f64 * w / total } else { 0.0 })
        .collect();

    for (i, quota) in quotas.iter().enumerate() {
        counts[i] = (quota.floor() as usize).min(capacity[i]);
    }

    let mut remaining = slots - counts.iter().sum::<usize>();

    let mut by_remainder: Vec<usize> = (0..weights.len()).collect();
    by_remainder.sort_by(|a, b| {
        let ra = quotas[*a] - quotas[*a].floor();
        let rb = quotas[*b] - quotas[*b].floor();
        rb.total_cmp(&ra)
    });
    for i in by_remainder {
        if remaining == 0 {
            break;
        }
        if quotas[i] > 0.0 && counts[i] < capacity[i] {
            counts[i] += 1;
            remaining -= 1;
        }
    }

    let mut by_length: Vec<usize> = (0..weights.len()).collect();
    by_length.sort_by(|a, b| weights[*b].total_cmp(&weights[*a]));
    while remaining > 0 {
        let mut placed = false;
        for i in &by_length {
            if remaining == 0 {
                break;
            }
            if counts[*i] < capacity[*i] {
                counts[*i] += 1;
                remaining -= 1;
                placed = true;
            }
        }
        if !placed {
            break;
        }
    }

    counts
}

fn nearest_unused(scene: &Scene, timestamps: &[f64], used: &[usize], target: f64) -> Option<usize> {
    scene
        .frame_indices
        .iter()
        .copied()
        .filter(|index| !used.contains(index))
        .min_by(|a, b| {
            (timestamps[*a] - target)
                .abs()
                .total_cmp(&(timestamps[*b] - target).abs())
        })
}

fn dedupe<F>(records: Vec<FrameRecord>, threshold: f64, similarity: &F) -> Vec<FrameRecord>
where
    F: Fn(usize, usize) -> f64,
{
    let mut kept: Vec<FrameRecord> = Vec::with_capacity(records.len());
    for record in records {
        if let Some(previous) = kept.last() {
            if record.role == FrameRole::Fill {
                let score = similarity(previous.frame_index, record.frame_index);
                if score > threshold {
                    debug!(
                        "Dropping fill at {:.3}s, {:.3} similar to frame at {:.3}s",
                        record.timestamp, score, previous.timestamp
                    );
                    continue;
                }
            }
        }
        kept.push(record);
    }
    kept
}

fn assign_durations(records: &mut [FrameRecord], stream_end: f64) {
    let next_starts: Vec<f64> = records
        .iter()
        .skip(1)
        .map(|r| r.timestamp)
        .chain(std::iter::once(stream_end))
        .collect();

    for (record, next) in records.iter_mut().zip(next_starts) {
        record.duration = (next - record.timestamp).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FPS: f64 = 6.0;

    fn timestamps(count: usize) -> Vec<f64> {
        (0..count).map(|i| i as f64 / FPS).collect()
    }

    /// Scenes opening at `starts`, covering `0..total` candidates
    fn scenes(starts: &[usize], total: usize, similarity: impl Fn(usize) -> f64) -> Vec<Scene> {
        starts
            .iter()
            .enumerate()
            .map(|(i, start)| {
                let end = starts.get(i + 1).copied().unwrap_or(total);
                Scene {
                    id: i + 1,
                    start_time: *start as f64 / FPS,
                    end_time: (end - 1) as f64 / FPS,
                    frame_indices: (*start..end).collect(),
                    boundary_similarity: if i == 0 { 0.0 } else { similarity(i) },
                }
            })
            .collect()
    }

    fn never_similar(_: usize, _: usize) -> f64 {
        0.0
    }

    #[test]
    fn test_empty_input_fails() {
        let result = FrameBudgetAllocator::new(24).allocate(&[], &[], 1.0 / FPS, never_similar);
        assert!(matches!(result, Err(FrameSelectError::EmptyVideo)));
    }

    #[test]
    fn test_single_scene_gets_boundary_and_fills() {
        let scenes = scenes(&[0], 24, |_| 0.0);
        let allocation = FrameBudgetAllocator::new(24)
            .allocate(&scenes, &timestamps(24), 1.0 / FPS, |_, _| 0.95)
            .unwrap();

        assert_eq!(allocation.boundary_count(), 1);
        assert_eq!(allocation.records[0].role, FrameRole::Boundary);
        assert_eq!(allocation.records[0].timestamp, 0.0);
        // Capped by max_frames_per_scene
        assert_eq!(allocation.fill_count(), 5);
        assert!(allocation.records.len() <= 24);
        assert!(allocation.records.iter().all(|r| r.scene_id == 1));
    }

    #[test]
    fn test_two_fills_land_on_thirds() {
        let scenes = scenes(&[0], 18, |_| 0.0);
        let allocation = FrameBudgetAllocator::new(3)
            .allocate(&scenes, &timestamps(18), 1.0 / FPS, never_similar)
            .unwrap();

        let times: Vec<f64> = allocation.records.iter().map(|r| r.timestamp).collect();
        // Coverage is 3s, fills at 1s and 2s
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
        assert_eq!(allocation.fill_count(), 2);
    }

    #[test]
    fn test_short_scenes_get_no_fill() {
        // Three frames at 6fps cover exactly 0.5s, the last two frames less
        let scenes = scenes(&[0, 3], 5, |_| 0.3);
        let allocation = FrameBudgetAllocator::new(10)
            .allocate(&scenes, &timestamps(5), 1.0 / FPS, never_similar)
            .unwrap();

        assert_eq!(allocation.records.len(), 2);
        assert_eq!(allocation.fill_count(), 0);
    }

    #[test]
    fn test_fills_proportional_to_coverage() {
        // 4s scene followed by a 1s scene, 5 spare slots
        let scenes = scenes(&[0, 24], 30, |_| 0.2);
        let allocation = FrameBudgetAllocator::new(7)
            .with_max_frames_per_scene(10)
            .allocate(&scenes, &timestamps(30), 1.0 / FPS, never_similar)
            .unwrap();

        let first = allocation.records.iter().filter(|r| r.scene_id == 1).count();
        let second = allocation.records.iter().filter(|r| r.scene_id == 2).count();
        assert_eq!(first, 5);
        assert_eq!(second, 2);
    }

    #[test]
    fn test_overflow_keeps_lowest_similarity_boundaries() {
        // 40 scenes of 3 frames, boundary similarity rising with position
        let starts: Vec<usize> = (0..40).map(|i| i * 3).collect();
        let scenes = scenes(&starts, 120, |i| 0.3 + i as f64 * 0.01);
        let allocation = FrameBudgetAllocator::new(20)
            .allocate(&scenes, &timestamps(120), 1.0 / FPS, never_similar)
            .unwrap();

        assert_eq!(allocation.records.len(), 20);
        assert_eq!(allocation.dropped_scenes, 20);
        assert!(allocation.records.iter().all(|r| r.role == FrameRole::Boundary));

        let ids: Vec<usize> = allocation.records.iter().map(|r| r.scene_id).collect();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());

        // Scenes 21..=40 are folded into scene 20
        let last = allocation.scenes.last().unwrap();
        assert_eq!(last.scene_id, 20);
        assert_eq!(last.merged_scene_ids, (21..=40).collect::<Vec<_>>());
        assert!((last.end_time - 119.0 / FPS).abs() < 1e-9);
    }

    #[test]
    fn test_overflow_merges_into_predecessor() {
        let scenes = scenes(&[0, 3, 6, 9], 12, |i| [0.0, 0.6, 0.1, 0.5][i]);
        let allocation = FrameBudgetAllocator::new(3)
            .allocate(&scenes, &timestamps(12), 1.0 / FPS, never_similar)
            .unwrap();

        let ids: Vec<usize> = allocation.records.iter().map(|r| r.scene_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert_eq!(allocation.scenes[0].merged_scene_ids, vec![2]);
        assert!((allocation.scenes[0].end_time - 5.0 / FPS).abs() < 1e-9);
    }

    #[test]
    fn test_record_bounds() {
        for scene_count in [1, 5, 24, 30] {
            let starts: Vec<usize> = (0..scene_count).map(|i| i * 4).collect();
            let total = scene_count * 4;
            let scenes = scenes(&starts, total, |i| (i % 7) as f64 / 10.0);

            for target in [1, 8, 24] {
                let allocation = FrameBudgetAllocator::new(target)
                    .with_dedupe_threshold(None)
                    .allocate(&scenes, &timestamps(total), 1.0 / FPS, never_similar)
                    .unwrap();

                let count = allocation.records.len();
                assert!(count >= scene_count.min(target), "{scene_count} scenes, target {target}");
                assert!(count <= target);
                assert!(allocation
                    .records
                    .windows(2)
                    .all(|w| w[0].timestamp < w[1].timestamp));
            }
        }
    }

    #[test]
    fn test_dedupe_drops_fills_but_never_boundaries() {
        let scenes = scenes(&[0, 12], 24, |_| 0.2);
        let allocation = FrameBudgetAllocator::new(8)
            .allocate(&scenes, &timestamps(24), 1.0 / FPS, |_, _| 0.99)
            .unwrap();

        assert_eq!(allocation.records.len(), 2);
        assert!(allocation.records.iter().all(|r| r.role == FrameRole::Boundary));
        assert_eq!(allocation.deduplicated, 6);
    }

    #[test]
    fn test_dedupe_threshold_is_strict() {
        let scenes = scenes(&[0], 12, |_| 0.0);
        let allocation = FrameBudgetAllocator::new(3)
            .with_dedupe_threshold(Some(0.95))
            .allocate(&scenes, &timestamps(12), 1.0 / FPS, |_, _| 0.95)
            .unwrap();

        assert_eq!(allocation.records.len(), 3);
        assert_eq!(allocation.deduplicated, 0);
    }

    #[test]
    fn test_durations_run_to_next_record() {
        let scenes = scenes(&[0, 6], 12, |_| 0.2);
        let allocation = FrameBudgetAllocator::new(2)
            .allocate(&scenes, &timestamps(12), 1.0 / FPS, never_similar)
            .unwrap();

        assert!((allocation.records[0].duration - 1.0).abs() < 1e-9);
        assert!((allocation.records[1].duration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_distribute_respects_capacity() {
        assert_eq!(distribute(5, &[4.0, 1.0], &[10, 10]), vec![4, 1]);
        assert_eq!(distribute(5, &[4.0, 1.0], &[2, 10]), vec![2, 3]);
        assert_eq!(distribute(5, &[4.0, 1.0], &[2, 1]), vec![2, 1]);
        assert_eq!(distribute(3, &[1.0, 1.0, 1.0], &[0, 0, 0]), vec![0, 0, 0]);
        assert_eq!(distribute(0, &[1.0], &[5]), vec![0]);
    }
}
