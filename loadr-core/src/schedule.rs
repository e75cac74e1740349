use std::time::Duration;

use crate::config::{RunProfile, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    /// 0-based index of the active stage.
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Target concurrency as a piecewise linear function of elapsed run time.
///
/// Every ramp starts where the previous stage ended (0 for the first stage) and
/// reaches the stage's own target at the stage's end. Past the last stage the
/// target is 0.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(profile: &RunProfile) -> Self {
        let stages = profile.stages().to_vec();
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            stages,
            cumulative_ends,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    pub fn max_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Index of the stage containing `elapsed`; a boundary instant belongs to the stage it ends.
    fn stage_index(&self, elapsed: Duration) -> usize {
        match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) | Err(i) => i.min(self.stages.len().saturating_sub(1)),
        }
    }

    fn stage_bounds(&self, idx: usize) -> (Duration, Duration) {
        let end = self.cumulative_ends[idx];
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        (start, end)
    }

    fn start_target(&self, idx: usize) -> u64 {
        if idx == 0 {
            0
        } else {
            self.stages[idx - 1].target
        }
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() || self.is_done(elapsed) {
            return 0;
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end) = self.stage_bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = elapsed.saturating_sub(stage_start);

        let start_target = self.start_target(idx);
        let end_target = self.stages[idx].target;

        if stage_duration.is_zero() {
            return end_target;
        }

        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;

        let num = stage_elapsed.as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        let cur = start_i + (delta.saturating_mul(num) / den.max(1));
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let clamped = elapsed.min(self.total_duration());
        let idx = self.stage_index(clamped);
        let (stage_start, stage_end) = self.stage_bounds(idx);

        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target: self.start_target(idx),
            end_target: self.stages[idx].target,
            current_target: self.target_at(elapsed),
        })
    }
}
