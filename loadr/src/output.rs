use crate::cli::OutputFormat;
use crate::test_file::TestPlan;
use std::path::Path;

mod digest;
mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, test_path: &Path, plan: &TestPlan);
    fn progress(&self) -> Option<loadr_core::ProgressFn>;
    fn print_summary(&self, report: &loadr_core::RunReport) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
