//! Submit jobs and follow them with a live log tail.

use std::sync::Arc;

use anyhow::Result;
use console::style;
use ddp_client::{
    ElementarySetupStatus, Job, JobKind, JobPoller, PollState, WorkspaceSetupRequest,
};

use crate::context::AppContext;

pub async fn watch(ctx: &AppContext, kind: JobKind, job_id: &str) -> Result<bool> {
    ctx.print_header(&format!("Following {} job {}", kind, job_id));
    follow(ctx, Job::new(job_id, kind)).await
}

pub async fn dbt_run(ctx: &AppContext, deployment_id: &str) -> Result<bool> {
    ctx.print_header(&format!("Running dbt deployment {}", deployment_id));
    match submitted(ctx, ctx.client.run_dbt_deployment(deployment_id).await) {
        Some(job) => follow(ctx, job).await,
        None => Ok(false),
    }
}

pub async fn setup_workspace(ctx: &AppContext, repo_url: &str, dbt_version: &str) -> Result<bool> {
    ctx.print_header("Setting up workspace...");
    let mut request = WorkspaceSetupRequest::new(repo_url);
    request.dbt_version = dbt_version.to_string();

    match submitted(ctx, ctx.client.setup_workspace(&request).await) {
        Some(job) => follow(ctx, job).await,
        None => Ok(false),
    }
}

pub async fn refresh_report(ctx: &AppContext) -> Result<bool> {
    ctx.print_header("Regenerating Elementary report");
    match ctx.client.elementary_setup_status().await {
        Ok(ElementarySetupStatus::SetUp) => {}
        Ok(ElementarySetupStatus::NotSetUp) => {
            ctx.console.error_toast(
                "You currently don't have Elementary set up. Set it up before generating a report",
                Vec::new(),
            );
            ctx.flush_toasts();
            return Ok(false);
        }
        Err(e) => {
            ctx.console.error_toast(e.to_string(), Vec::new());
            ctx.flush_toasts();
            return Ok(false);
        }
    }

    match submitted(ctx, ctx.client.refresh_elementary_report().await) {
        Some(job) => {
            ctx.console.success_toast(
                "Your latest report is being generated. This may take a few minutes. Thank you for your patience",
                Vec::new(),
            );
            ctx.flush_toasts();
            follow(ctx, job).await
        }
        None => Ok(false),
    }
}

pub async fn sync(ctx: &AppContext, connection_id: &str) -> Result<bool> {
    ctx.print_header(&format!("Syncing connection {}", connection_id));
    match submitted(ctx, ctx.client.sync_connection(connection_id).await) {
        Some(job) => follow(ctx, job).await,
        None => Ok(false),
    }
}

/// Turn a failed submission into an error toast.
fn submitted(ctx: &AppContext, result: ddp_client::Result<Job>) -> Option<Job> {
    match result {
        Ok(job) => {
            ctx.print_info(&format!("Job {} submitted", job.job_id));
            Some(job)
        }
        Err(e) => {
            ctx.console.error_toast(e.to_string(), Vec::new());
            ctx.flush_toasts();
            None
        }
    }
}

/// Poll `job` until it finishes, printing log lines as they arrive. Ctrl-C
/// cancels the session.
async fn follow(ctx: &AppContext, job: Job) -> Result<bool> {
    let poller = JobPoller::new(Arc::new(ctx.client.clone()), ctx.config.poll.clone());
    let handle = poller.start(job)?;
    let mut updates = handle.updates();
    let mut printed = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let update = updates.borrow_and_update().clone();
                printed = print_new_lines(&update.logs, printed);
                if update.state.is_terminal() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                ctx.print_warning("Cancelling...");
                handle.cancel();
                break;
            }
        }
    }

    let outcome = handle.wait().await;
    print_new_lines(&outcome.logs, printed);

    if outcome.state == PollState::Cancelled {
        ctx.print_warning(&format!("Stopped following job {}", outcome.job.job_id));
    }
    ctx.console.report_outcome(&outcome);
    ctx.flush_toasts();

    Ok(outcome.is_success())
}

fn print_new_lines(logs: &[String], printed: usize) -> usize {
    for line in logs.iter().skip(printed) {
        println!("{} {}", style("│").dim(), line);
    }
    logs.len().max(printed)
}
