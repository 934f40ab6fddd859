//! Wait for locked tasks to finish.

use std::sync::Arc;

use anyhow::Result;
use console::style;
use ddp_client::{BusyOutcome, BusyReconciler};

use crate::context::AppContext;

pub async fn wait_unlocked(ctx: &AppContext, path: Option<String>) -> Result<bool> {
    let client = match path {
        Some(path) => ctx.client.clone().with_lock_path(path),
        None => ctx.client.clone(),
    };

    ctx.print_header("Waiting for running tasks to finish");
    let handle = BusyReconciler::new(Arc::new(client), ctx.config.poll.clone()).start();
    let mut updates = handle.updates();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let update = updates.borrow_and_update().clone();
                if !update.busy {
                    break;
                }
                if !ctx.quiet {
                    let ids: Vec<&str> = update.locked.iter().map(String::as_str).collect();
                    println!("{} locked: {}", style("…").dim(), ids.join(", "));
                }
            }
            _ = &mut ctrl_c => {
                handle.cancel();
                break;
            }
        }
    }

    let outcome = handle.wait().await;
    ctx.console.report_busy_outcome(&outcome);
    ctx.flush_toasts();

    match outcome {
        BusyOutcome::Idle => {
            ctx.print_info("Nothing is locked");
            Ok(true)
        }
        BusyOutcome::FetchFailed(_) => {
            ctx.print_warning("Could not check locks; treating tasks as idle");
            Ok(true)
        }
        BusyOutcome::GaveUp { locked } => {
            let ids: Vec<&str> = locked.iter().map(String::as_str).collect();
            ctx.print_warning(&format!(
                "Stopped waiting; still locked: {}",
                ids.join(", ")
            ));
            Ok(true)
        }
        BusyOutcome::Cancelled => {
            ctx.print_warning("Cancelled");
            Ok(false)
        }
    }
}
