use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use loadr_metrics::{SeriesHandle, TagSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::metrics::IterationSeries;
use crate::workload::{IterationContext, IterationOutcome, Workload};

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

fn record(handle: &SeriesHandle, value: f64) {
    if let Err(err) = handle.record(value) {
        tracing::debug!(error = %err, "dropping sample");
    }
}

/// Iteration loop of a single virtual user.
pub(crate) struct VuExecutor<W> {
    id: u64,
    ctx: Arc<RunContext>,
    workload: Arc<W>,
    stop: CancellationToken,
    pacing: Option<Duration>,
    series: IterationSeries,
    checks: HashMap<Arc<str>, SeriesHandle>,
}

impl<W: Workload> VuExecutor<W> {
    pub(crate) fn new(
        id: u64,
        ctx: Arc<RunContext>,
        workload: Arc<W>,
        stop: CancellationToken,
        pacing: Option<Duration>,
    ) -> loadr_metrics::Result<Self> {
        let series = IterationSeries::resolve(ctx.registry(), ctx.metrics(), ctx.tags())?;
        Ok(Self {
            id,
            ctx,
            workload,
            stop,
            pacing,
            series,
            checks: HashMap::new(),
        })
    }

    /// Runs iterations until `stop` fires. An iteration in flight is never interrupted here.
    pub(crate) async fn run(mut self) {
        let mut iteration: u64 = 0;
        tracing::trace!(vu = self.id, "vu started");

        while !self.stop.is_cancelled() {
            let ictx = IterationContext {
                vu_id: self.id,
                iteration,
                started_at: self.ctx.elapsed(),
            };

            let begin = Instant::now();
            let result = AssertUnwindSafe(self.workload.iterate(&ictx))
                .catch_unwind()
                .await;
            let took = begin.elapsed();

            let (failed, outcome) = match result {
                Ok(Ok(outcome)) => (false, outcome),
                Ok(Err(err)) => {
                    tracing::trace!(
                        vu = self.id,
                        iteration,
                        error = err.message(),
                        "iteration failed"
                    );
                    (true, err.into_outcome())
                }
                Err(payload) => {
                    tracing::trace!(
                        vu = self.id,
                        iteration,
                        panic = panic_message(payload.as_ref()),
                        "iteration panicked"
                    );
                    (true, IterationOutcome::default())
                }
            };
            self.record_iteration(took, failed, outcome);
            iteration = iteration.saturating_add(1);

            match self.pacing {
                Some(pause) => {
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                None => tokio::task::yield_now().await,
            }
        }

        tracing::trace!(vu = self.id, iterations = iteration, "vu stopped");
    }

    fn record_iteration(&mut self, took: Duration, failed: bool, outcome: IterationOutcome) {
        record(&self.series.iterations, 1.0);
        record(&self.series.duration, took.as_secs_f64() * 1000.0);
        record(&self.series.failed, if failed { 1.0 } else { 0.0 });

        for check in outcome.checks {
            if let Some(handle) = self.check_series(&check.name) {
                record(&handle, if check.passed { 1.0 } else { 0.0 });
            }
        }

        if outcome.samples.is_empty() {
            return;
        }
        let now = self.ctx.elapsed();
        for sample in outcome.samples {
            let tags = self.ctx.tags().merged(sample.tags());
            let stamped = if sample.timestamp().is_zero() {
                sample.at(now)
            } else {
                sample
            };
            if let Err(err) = self.ctx.registry().ingest(&stamped.with_tags(tags)) {
                tracing::debug!(vu = self.id, error = %err, "dropping custom sample");
            }
        }
    }

    fn check_series(&mut self, name: &Arc<str>) -> Option<SeriesHandle> {
        if let Some(handle) = self.checks.get(name) {
            return Some(handle.clone());
        }
        let tags = self
            .ctx
            .tags()
            .merged(&TagSet::from_pairs([("check", name.as_ref())]));
        match self.ctx.registry().handle(self.ctx.metrics().checks, tags) {
            Ok(handle) => {
                self.checks.insert(name.clone(), handle.clone());
                Some(handle)
            }
            Err(err) => {
                tracing::debug!(vu = self.id, check = %name, error = %err, "dropping check");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::IterationError;
    use loadr_metrics::{MetricKind, Registry, Sample};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Scripted {
        calls: AtomicU64,
    }

    impl Workload for Scripted {
        fn register_metrics(&self, registry: &Registry) -> loadr_metrics::Result<()> {
            registry.register("payload_bytes", MetricKind::Counter)?;
            Ok(())
        }

        async fn iterate(
            &self,
            _ctx: &IterationContext,
        ) -> Result<IterationOutcome, IterationError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let n = self.calls.fetch_add(1, Ordering::Relaxed);
            let mut outcome = IterationOutcome::new();
            outcome
                .check("even", n % 2 == 0)
                .sample(Sample::new("payload_bytes", 100.0));
            match n % 3 {
                0 => Ok(outcome),
                1 => Err(IterationError::new("boom").with_outcome(outcome)),
                _ => panic!("iteration {n} panicked"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn records_failures_panics_checks_and_custom_samples() {
        let registry = Arc::new(Registry::new());
        let workload = Arc::new(Scripted {
            calls: AtomicU64::new(0),
        });
        workload
            .register_metrics(&registry)
            .unwrap_or_else(|e| panic!("{e}"));
        let ctx = Arc::new(
            RunContext::new(
                registry.clone(),
                TagSet::from_pairs([("test", "unit")]),
                CancellationToken::new(),
            )
            .unwrap_or_else(|e| panic!("{e}")),
        );

        let stop = CancellationToken::new();
        let vu = VuExecutor::new(1, ctx, workload.clone(), stop.clone(), None)
            .unwrap_or_else(|e| panic!("{e}"));
        let task = tokio::spawn(vu.run());

        while workload.calls.load(Ordering::Relaxed) < 6 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop.cancel();
        task.await.unwrap_or_else(|e| panic!("{e}"));

        let calls = workload.calls.load(Ordering::Relaxed);
        let snap = registry.snapshot().unwrap_or_else(|e| panic!("{e}"));

        let iterations = snap.counter_total("iterations");
        assert_eq!(iterations, calls as f64);

        let failed = snap
            .metric("iteration_failed", &[("test", "unit")])
            .unwrap_or_else(|| panic!("missing iteration_failed"));
        assert_eq!(failed.samples(), calls);
        let expected_failed = (0..calls).filter(|n| n % 3 != 0).count() as f64;
        assert_eq!(failed.rate(), Some(expected_failed / calls as f64));

        // Panicking iterations lose their outcome; the others keep it.
        let kept = (0..calls).filter(|n| n % 3 != 2).count() as u64;
        let checks = snap
            .metric("checks", &[("check", "even"), ("test", "unit")])
            .unwrap_or_else(|| panic!("missing checks"));
        assert_eq!(checks.samples(), kept);
        assert_eq!(snap.counter_total("payload_bytes"), 100.0 * kept as f64);

        let duration = snap
            .metric("iteration_duration", &[])
            .unwrap_or_else(|| panic!("missing iteration_duration"));
        assert_eq!(duration.samples(), calls);
    }

    struct Slow;

    impl Workload for Slow {
        async fn iterate(
            &self,
            _ctx: &IterationContext,
        ) -> Result<IterationOutcome, IterationError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(IterationOutcome::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_pacing_ends_vu_without_new_iteration() {
        let registry = Arc::new(Registry::new());
        let ctx = Arc::new(
            RunContext::new(registry.clone(), TagSet::default(), CancellationToken::new())
                .unwrap_or_else(|e| panic!("{e}")),
        );
        let stop = CancellationToken::new();
        let vu = VuExecutor::new(
            1,
            ctx,
            Arc::new(Slow),
            stop.clone(),
            Some(Duration::from_secs(10)),
        )
        .unwrap_or_else(|e| panic!("{e}"));
        let task = tokio::spawn(vu.run());

        // First iteration finishes at 200ms, then the VU sleeps for 10s.
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.cancel();
        task.await.unwrap_or_else(|e| panic!("{e}"));

        let snap = registry.snapshot().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(snap.counter_total("iterations"), 1.0);
    }
}
