//! Connection sync history and detailed attempt logs.

use anyhow::Result;
use console::style;

use crate::context::AppContext;

pub async fn run(ctx: &AppContext, job_id: &str, attempt: u32) -> Result<bool> {
    ctx.print_header(&format!("Logs for job {} attempt {}", job_id, attempt));

    match ctx.client.fetch_attempt_logs(job_id, attempt).await {
        Ok(lines) if lines.is_empty() => {
            ctx.print_info("No information available");
            Ok(true)
        }
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
            Ok(true)
        }
        Err(e) => {
            ctx.console.error_toast(e.to_string(), Vec::new());
            ctx.flush_toasts();
            Ok(false)
        }
    }
}

pub async fn history(
    ctx: &AppContext,
    connection_id: &str,
    limit: u32,
    offset: u32,
) -> Result<bool> {
    ctx.print_header(&format!("Sync history for connection {}", connection_id));

    let page = match ctx.client.fetch_sync_history(connection_id, limit, offset).await {
        Ok(page) => page,
        Err(e) => {
            ctx.console.error_toast(e.to_string(), Vec::new());
            ctx.flush_toasts();
            return Ok(false);
        }
    };

    if page.history.is_empty() {
        ctx.print_info("No information available");
        return Ok(true);
    }

    for attempt in &page.history {
        let status = match attempt.status.as_str() {
            "completed" | "succeeded" => style(attempt.status.as_str()).green(),
            "failed" | "cancelled" => style(attempt.status.as_str()).red(),
            _ => style(attempt.status.as_str()).yellow(),
        };
        println!(
            "job {} attempt {}  {}  {}  {} records  {}  {}s",
            attempt.job_id,
            attempt.attempt_no,
            status,
            attempt.date.as_deref().unwrap_or("-"),
            attempt.records_emitted.unwrap_or(0),
            attempt.bytes_emitted.as_deref().unwrap_or("-"),
            attempt.total_time_in_seconds.unwrap_or(0.0).round(),
        );
    }

    let next = u64::from(offset);
    if page.has_more(next) {
        ctx.print_info(&format!(
            "More syncs available: rerun with --offset {}",
            next + page.history.len() as u64
        ));
    }
    Ok(true)
}
