use std::sync::Arc;
use std::time::Duration;

use loadr_metrics::{Registry, Snapshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{RunOptions, RunProfile};
use crate::context::RunContext;
use crate::error::Result;
use crate::pool::VuPool;
use crate::progress::{ProgressFn, ProgressUpdate, iteration_totals, per_sec};
use crate::schedule::RampingSchedule;
use crate::thresholds::{ThresholdReport, ThresholdSet};
use crate::workload::Workload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// A failing threshold with `abort_on_fail` set.
    Threshold { selector: String, expression: String },
    /// The run's cancellation token was triggered from outside.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// Wall time from run start until every VU stopped.
    pub elapsed: Duration,
    pub snapshot: Snapshot,
    pub thresholds: ThresholdReport,
    pub aborted: Option<AbortReason>,
    pub vus_max: u64,
    /// VUs cut off by the graceful-stop timeout.
    pub interrupted_vus: usize,
}

impl RunReport {
    /// All thresholds passed and no threshold aborted the run.
    pub fn passed(&self) -> bool {
        self.thresholds.passed() && !matches!(self.aborted, Some(AbortReason::Threshold { .. }))
    }
}

/// Drives one run: follows the schedule, evaluates thresholds, then stops every VU.
#[derive(Debug)]
pub struct Runner {
    profile: RunProfile,
    options: RunOptions,
    thresholds: ThresholdSet,
    registry: Arc<Registry>,
    cancel: CancellationToken,
}

struct ProgressState {
    progress: ProgressFn,
    tick: u64,
    last_at: Instant,
    last_iterations: u64,
}

impl Runner {
    pub fn new(profile: RunProfile, options: RunOptions, thresholds: ThresholdSet) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            profile,
            options,
            thresholds,
            registry: Arc::new(Registry::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Cancelling this token stops the run early; VUs finish their current iteration.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run<W: Workload>(
        self,
        workload: Arc<W>,
        progress: Option<ProgressFn>,
    ) -> Result<RunReport> {
        workload.register_metrics(&self.registry)?;
        let ctx = RunContext::new(
            self.registry.clone(),
            self.options.tags.clone(),
            self.cancel.clone(),
        )?;
        self.thresholds.validate(&self.registry)?;

        let ctx = Arc::new(ctx);
        let schedule = RampingSchedule::new(&self.profile);
        let mut pool = VuPool::new(ctx.clone(), workload, self.options.pacing)?;

        tracing::info!(
            stages = self.profile.stages().len(),
            duration = ?schedule.total_duration(),
            max_vus = schedule.max_target(),
            thresholds = self.thresholds.len(),
            "run started"
        );

        let mut progress = progress.map(|progress| ProgressState {
            progress,
            tick: 0,
            last_at: ctx.started(),
            last_iterations: 0,
        });

        let controlled = self
            .control(&ctx, &schedule, &mut pool, progress.as_mut())
            .await;
        if controlled.is_err() {
            self.cancel.cancel();
        }

        let vus_max = pool.peak();
        let shutdown = pool.shutdown(self.options.graceful_stop).await;
        let aborted = controlled?;

        let elapsed = ctx.elapsed();
        let snapshot = self.registry.snapshot()?;
        let thresholds = self.thresholds.evaluate(&snapshot, elapsed);

        let report = RunReport {
            elapsed,
            snapshot,
            thresholds,
            aborted,
            vus_max,
            interrupted_vus: shutdown.aborted,
        };
        tracing::info!(
            elapsed = ?report.elapsed,
            passed = report.passed(),
            aborted = ?report.aborted,
            "run finished"
        );
        Ok(report)
    }

    async fn control<W: Workload>(
        &self,
        ctx: &RunContext,
        schedule: &RampingSchedule,
        pool: &mut VuPool<W>,
        mut progress: Option<&mut ProgressState>,
    ) -> Result<Option<AbortReason>> {
        let started = ctx.started();

        let mut tick = tokio::time::interval(self.options.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let every = self.options.threshold_interval;
        let mut threshold_tick = tokio::time::interval_at(started + every, every);
        threshold_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let second = Duration::from_secs(1);
        let mut progress_tick = tokio::time::interval_at(started + second, second);
        progress_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stage = None;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::info!("run cancelled");
                    return Ok(Some(AbortReason::Cancelled));
                }

                _ = tick.tick() => {
                    let elapsed = ctx.elapsed();
                    if schedule.is_done(elapsed) {
                        return Ok(None);
                    }
                    if let Some(snap) = schedule.stage_snapshot_at(elapsed)
                        && stage != Some(snap.index)
                    {
                        tracing::debug!(
                            stage = snap.index + 1,
                            of = snap.count,
                            from = snap.start_target,
                            to = snap.end_target,
                            "entering stage"
                        );
                        stage = Some(snap.index);
                    }
                    pool.scale_to(schedule.target_at(elapsed))?;
                }

                _ = threshold_tick.tick(), if !self.thresholds.is_empty() => {
                    let elapsed = ctx.elapsed();
                    let snapshot = self.registry.snapshot()?;
                    let report = self.thresholds.evaluate(&snapshot, elapsed);
                    tracing::debug!(
                        failing = report.failures().count(),
                        total = report.results.len(),
                        "evaluated thresholds"
                    );
                    if let Some(trigger) = report.abort_trigger(elapsed) {
                        tracing::warn!(
                            metric = %trigger.selector,
                            threshold = %trigger.expression,
                            observed = ?trigger.observed,
                            "threshold crossed; aborting run"
                        );
                        let reason = AbortReason::Threshold {
                            selector: trigger.selector.clone(),
                            expression: trigger.expression.clone(),
                        };
                        self.cancel.cancel();
                        return Ok(Some(reason));
                    }
                }

                _ = progress_tick.tick(), if progress.is_some() => {
                    if let Some(state) = progress.as_deref_mut() {
                        self.emit_progress(ctx, schedule, pool, state)?;
                    }
                }
            }
        }
    }

    fn emit_progress<W: Workload>(
        &self,
        ctx: &RunContext,
        schedule: &RampingSchedule,
        pool: &VuPool<W>,
        state: &mut ProgressState,
    ) -> Result<()> {
        let now = Instant::now();
        let elapsed = now.duration_since(ctx.started());
        let snapshot = self.registry.snapshot()?;
        let (iterations_total, iterations_failed) = iteration_totals(&snapshot);

        state.tick = state.tick.saturating_add(1);
        let iterations_per_sec_now = per_sec(
            iterations_total.saturating_sub(state.last_iterations),
            now.duration_since(state.last_at),
        );
        state.last_at = now;
        state.last_iterations = iterations_total;

        (state.progress)(ProgressUpdate {
            tick: state.tick,
            elapsed,
            total_duration: schedule.total_duration(),
            stage: schedule.stage_snapshot_at(elapsed),
            active_vus: pool.active(),
            vus_max: pool.peak(),
            iterations_total,
            iterations_failed,
            iterations_per_sec_now,
            snapshot: Arc::new(snapshot),
        });
        Ok(())
    }
}
