use std::sync::Arc;

use loadr_core::Runner;

use crate::cli::RunArgs;
use crate::env;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::test_file;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let env = env::merged_env(&args.env).map_err(RunError::InvalidInput)?;
    let plan = test_file::load(&args.test, &env, &args.stages).await?;

    out.print_header(&args.test, &plan);

    let test_file::TestPlan {
        profile,
        options,
        thresholds,
        workload,
    } = plan;
    let runner = Runner::new(profile, options, thresholds)
        .map_err(|e| RunError::from_core("invalid run options", e))?;

    let cancel = runner.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, waiting for in-flight iterations");
            cancel.cancel();
        }
    });

    let report = runner.run(Arc::new(workload), out.progress()).await;
    interrupt.abort();

    let report = report.map_err(|e| RunError::from_core("run failed", e))?;
    out.print_summary(&report).map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_verdict(report.passed()))
}
