use std::path::Path;
use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_rate};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;
use crate::test_file::TestPlan;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, test_path: &Path, plan: &TestPlan) {
        let req = plan.workload.request();
        println!("test: {}", test_path.display());
        println!("request: {} {}", req.method(), req.uri());
        let stages = plan
            .profile
            .stages()
            .iter()
            .map(|s| format!("{}:{}", format_duration(s.duration), s.target))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "stages: {stages} (total {})",
            format_duration(plan.profile.total_duration())
        );
        if let Some(pacing) = plan.options.pacing {
            println!("sleep: {}", humantime::format_duration(pacing));
        }
        println!(
            "checks: {} thresholds: {}",
            plan.workload.checks().len(),
            plan.thresholds.len()
        );
        println!();
    }

    fn progress(&self) -> Option<loadr_core::ProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u| {
            let stage = match &u.stage {
                Some(s) => format!(
                    "stage={}/{} target={} ",
                    s.index + 1,
                    s.count,
                    s.current_target
                ),
                None => String::new(),
            };
            let message = format!(
                "{stage}vus={}/{} elapsed={} iters={} iters/s={} failed={}",
                u.active_vus,
                u.vus_max,
                format_duration(u.elapsed),
                u.iterations_total,
                format_rate(u.iterations_per_sec_now),
                u.iterations_failed
            );
            progress.update(u.total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, report: &loadr_core::RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));

        let failed = report.thresholds.failures().count();
        if failed > 0 {
            eprintln!("thresholds failed: {failed}");
        }

        Ok(())
    }
}
