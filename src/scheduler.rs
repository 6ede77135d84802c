//! Cron-driven triggers: periodic summary runs and hourly stats logging.
use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::pipeline::{Pipeline, PipelineError, RunMode, RunOutcome};

/// Log a run result the way the scheduled trigger reports it. Failures are
/// logged and swallowed so the process keeps running.
pub fn log_run_result(result: &Result<RunOutcome, PipelineError>) {
    match result {
        Ok(RunOutcome::Published(summary)) => {
            info!(summary_id = summary.id, "summary generated and posted")
        }
        Ok(RunOutcome::InsufficientContent { found, required }) => {
            info!(found, required, "no summary generated (not enough posts)")
        }
        Ok(RunOutcome::Skipped { reason, batch }) => {
            info!(?reason, batch, "no summary generated (content vetoed)")
        }
        Err(PipelineError::AlreadyRunning) => warn!("previous summary run still in progress"),
        Err(err) => error!(step = ?err.step(), %err, "scheduled summary run failed"),
    }
}

pub async fn log_stats(pipeline: &Pipeline) {
    match pipeline.stats().await {
        Ok(stats) => info!(
            total_posts = stats.total_posts,
            unused_posts = stats.unused_posts,
            total_summaries = stats.total_summaries,
            posted_summaries = stats.posted_summaries,
            ready_for_summary = stats.ready_for_summary,
            "current stats"
        ),
        Err(err) => error!(%err, "failed to read stats"),
    }
}

/// Build and start the scheduler with the summary and stats jobs.
pub async fn start(
    pipeline: Pipeline,
    summary_schedule: &str,
    stats_schedule: &str,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let run_pipeline = pipeline.clone();
    let summary_job = Job::new_async(summary_schedule, move |_uuid, _l| {
        let pipeline = run_pipeline.clone();
        Box::pin(async move {
            info!("starting scheduled summary generation");
            let result = pipeline.run(RunMode::Normal).await;
            log_run_result(&result);
        })
    })
    .with_context(|| format!("creating summary job for cron {}", summary_schedule))?;
    sched.add(summary_job).await.context("adding summary job")?;

    let stats_job = Job::new_async(stats_schedule, move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move { log_stats(&pipeline).await })
    })
    .with_context(|| format!("creating stats job for cron {}", stats_schedule))?;
    sched.add(stats_job).await.context("adding stats job")?;

    sched.start().await.context("starting scheduler")?;
    info!(summary_schedule, stats_schedule, "scheduler started");
    Ok(sched)
}
