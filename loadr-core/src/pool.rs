use std::sync::Arc;
use std::time::Duration;

use loadr_metrics::SeriesHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::error::Result;
use crate::executor::VuExecutor;
use crate::workload::Workload;

#[derive(Debug)]
struct VuHandle {
    id: u64,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Outcome of [`VuPool::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownStats {
    /// VUs that finished their last iteration on their own.
    pub stopped: usize,
    /// VUs cut off by the graceful-stop timeout.
    pub aborted: usize,
}

/// Set of running virtual users, resized to follow the schedule.
///
/// Owned by the run controller; every spawn/retire decision goes through `&mut self`.
pub struct VuPool<W> {
    ctx: Arc<RunContext>,
    workload: Arc<W>,
    pacing: Option<Duration>,
    /// Ordered by id, oldest first.
    active: Vec<VuHandle>,
    retiring: Vec<VuHandle>,
    next_id: u64,
    peak: u64,
    vus: SeriesHandle,
    vus_max: SeriesHandle,
}

impl<W: Workload> VuPool<W> {
    pub fn new(ctx: Arc<RunContext>, workload: Arc<W>, pacing: Option<Duration>) -> Result<Self> {
        let registry = ctx.registry();
        let vus = registry.handle(ctx.metrics().vus, ctx.tags().clone())?;
        let vus_max = registry.handle(ctx.metrics().vus_max, ctx.tags().clone())?;
        Ok(Self {
            ctx,
            workload,
            pacing,
            active: Vec::new(),
            retiring: Vec::new(),
            next_id: 1,
            peak: 0,
            vus,
            vus_max,
        })
    }

    pub fn active(&self) -> u64 {
        self.active.len() as u64
    }

    /// VUs that were told to stop but are still finishing an iteration.
    pub fn retiring(&self) -> u64 {
        self.retiring.len() as u64
    }

    pub fn peak(&self) -> u64 {
        self.peak
    }

    /// Spawns or retires VUs until exactly `target` are active.
    ///
    /// Shrinking retires the newest VUs; they stop after their current iteration.
    pub fn scale_to(&mut self, target: u64) -> Result<()> {
        self.retiring.retain(|vu| !vu.task.is_finished());

        let current = self.active();
        if target > current {
            for _ in current..target {
                self.spawn()?;
            }
            tracing::debug!(from = current, to = target, "scaled vus up");
        } else if target < current {
            let keep = target as usize;
            for vu in self.active.drain(keep..).rev() {
                vu.stop.cancel();
                tracing::trace!(vu = vu.id, "retiring vu");
                self.retiring.push(vu);
            }
            tracing::debug!(from = current, to = target, "scaled vus down");
        }

        self.publish();
        Ok(())
    }

    fn spawn(&mut self) -> Result<()> {
        let id = self.next_id;
        let stop = self.ctx.cancel_token().child_token();
        let executor = VuExecutor::new(
            id,
            self.ctx.clone(),
            self.workload.clone(),
            stop.clone(),
            self.pacing,
        )?;
        let task = tokio::spawn(executor.run());

        self.next_id = self.next_id.saturating_add(1);
        self.active.push(VuHandle { id, stop, task });
        self.peak = self.peak.max(self.active());
        Ok(())
    }

    fn publish(&self) {
        for (handle, value) in [(&self.vus, self.active()), (&self.vus_max, self.peak)] {
            if let Err(err) = handle.record(value as f64) {
                tracing::debug!(error = %err, "dropping vu gauge sample");
            }
        }
    }

    /// Stops every VU and waits for it. With `graceful_stop` set, VUs still running
    /// after that long are aborted and their in-flight iteration is lost.
    pub async fn shutdown(mut self, graceful_stop: Option<Duration>) -> ShutdownStats {
        let mut vus: Vec<VuHandle> = self.active.drain(..).collect();
        vus.append(&mut self.retiring);
        for vu in &vus {
            vu.stop.cancel();
        }
        let total = vus.len();

        let mut tasks: Vec<JoinHandle<()>> = vus.into_iter().map(|vu| vu.task).collect();
        let wait = futures::future::join_all(tasks.iter_mut());
        let joined = match graceful_stop {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok(),
            None => Some(wait.await),
        };

        let mut stats = ShutdownStats::default();
        match joined {
            Some(results) => {
                for result in results {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "vu task failed");
                    }
                }
                stats.stopped = total;
            }
            None => {
                for task in &tasks {
                    if !task.is_finished() {
                        task.abort();
                        stats.aborted += 1;
                    }
                }
                for task in tasks {
                    let _ = task.await;
                }
                stats.stopped = total - stats.aborted;
                tracing::warn!(
                    aborted = stats.aborted,
                    "graceful stop expired; aborted running iterations"
                );
            }
        }

        if let Err(err) = self.vus.record(0.0) {
            tracing::debug!(error = %err, "dropping vu gauge sample");
        }
        stats
    }
}
