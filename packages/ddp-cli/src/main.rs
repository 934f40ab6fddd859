//! Command-line console for DDP backend jobs.
//!
//! Submits syncs, dbt runs, workspace setups and report refreshes, then
//! follows them to completion with a live log tail.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ddp_client::{ClientConfig, JobKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;
mod context;

use context::AppContext;

#[derive(Parser)]
#[command(name = "ddp")]
#[command(about = "Trigger and follow DDP backend jobs")]
#[command(version)]
struct Cli {
    /// Backend base URL (overrides DDP_BACKEND_URL)
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// API token (overrides DDP_API_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Organisation slug to act for (overrides DDP_ORG_SLUG)
    #[arg(long, global = true)]
    org: Option<String>,

    /// Milliseconds between status checks
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// Give up after this many status checks
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Give up after this many milliseconds
    #[arg(long, global = true)]
    max_duration_ms: Option<u64>,

    /// Only print job output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a job that is already running
    Watch {
        /// sync, dbt-run, workspace-setup or report-refresh
        #[arg(value_parser = parse_kind)]
        kind: JobKind,
        job_id: String,
    },

    /// Run a dbt task through its Prefect deployment
    DbtRun { deployment_id: String },

    /// Clone a dbt repository and set up the workspace
    SetupWorkspace {
        #[arg(long)]
        repo_url: String,

        #[arg(long, default_value = "1.4.5")]
        dbt_version: String,
    },

    /// Regenerate the Elementary report
    RefreshReport,

    /// Trigger a sync for a connection
    Sync { connection_id: String },

    /// List past syncs of a connection with their job ids and attempts
    History {
        connection_id: String,

        #[arg(long, default_value_t = 10)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Print the full logs of one sync attempt
    Logs { job_id: String, attempt: u32 },

    /// Wait until no task is locked
    WaitUnlocked {
        /// Collection to check (defaults to the transform tasks)
        #[arg(long)]
        path: Option<String>,
    },
}

fn parse_kind(raw: &str) -> std::result::Result<JobKind, String> {
    raw.parse().map_err(|e: ddp_client::PollerError| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,ddp_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = load_config(&cli, |key| std::env::var(key).ok())
        .context("Failed to load configuration")?;
    tracing::debug!(backend_url = %config.backend_url, "Loaded configuration");
    let ctx = AppContext::new(cli.quiet, config);

    match cli.command {
        Commands::Watch { kind, job_id } => cmd::jobs::watch(&ctx, kind, &job_id).await,
        Commands::DbtRun { deployment_id } => cmd::jobs::dbt_run(&ctx, &deployment_id).await,
        Commands::SetupWorkspace {
            repo_url,
            dbt_version,
        } => cmd::jobs::setup_workspace(&ctx, &repo_url, &dbt_version).await,
        Commands::RefreshReport => cmd::jobs::refresh_report(&ctx).await,
        Commands::Sync { connection_id } => cmd::jobs::sync(&ctx, &connection_id).await,
        Commands::History {
            connection_id,
            limit,
            offset,
        } => cmd::logs::history(&ctx, &connection_id, limit, offset).await,
        Commands::Logs { job_id, attempt } => cmd::logs::run(&ctx, &job_id, attempt).await,
        Commands::WaitUnlocked { path } => cmd::locks::wait_unlocked(&ctx, path).await,
    }
}

/// Flags win over environment variables.
fn load_config<F>(cli: &Cli, env: F) -> Result<ClientConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let config = ClientConfig::from_lookup(|key| {
        let flag = match key {
            "DDP_BACKEND_URL" => cli.backend_url.clone(),
            "DDP_API_TOKEN" => cli.token.clone(),
            "DDP_ORG_SLUG" => cli.org.clone(),
            "DDP_POLL_INTERVAL_MS" => cli.interval_ms.map(|v| v.to_string()),
            "DDP_POLL_MAX_ATTEMPTS" => cli.max_attempts.map(|v| v.to_string()),
            "DDP_POLL_MAX_DURATION_MS" => cli.max_duration_ms.map(|v| v.to_string()),
            _ => None,
        };
        flag.or_else(|| env(key))
    })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn env(key: &str) -> Option<String> {
        match key {
            "DDP_BACKEND_URL" => Some("http://localhost:8002/api".into()),
            "DDP_API_TOKEN" => Some("env-token".into()),
            "DDP_POLL_INTERVAL_MS" => Some("5000".into()),
            _ => None,
        }
    }

    #[test]
    fn flags_override_environment() {
        let cli = Cli::try_parse_from([
            "ddp",
            "--token",
            "flag-token",
            "--interval-ms",
            "1000",
            "--max-attempts",
            "30",
            "watch",
            "dbt-run",
            "123",
        ])
        .unwrap();

        let config = load_config(&cli, env).unwrap();
        assert_eq!(config.backend_url, "http://localhost:8002/api");
        assert_eq!(config.api_token, "flag-token");
        assert_eq!(config.poll.interval, Duration::from_millis(1000));
        assert_eq!(config.poll.max_attempts, Some(30));
        assert!(matches!(
            cli.command,
            Commands::Watch { kind: JobKind::DbtRun, ref job_id } if job_id == "123"
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(Cli::try_parse_from(["ddp", "watch", "airflow", "1"]).is_err());
    }

    #[test]
    fn missing_backend_url_fails() {
        let cli = Cli::try_parse_from(["ddp", "refresh-report"]).unwrap();
        assert!(load_config(&cli, |_| None).is_err());
    }

    #[test]
    fn history_pages_default_to_first_ten() {
        let cli = Cli::try_parse_from(["ddp", "history", "123"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::History { ref connection_id, limit: 10, offset: 0 } if connection_id == "123"
        ));

        let cli =
            Cli::try_parse_from(["ddp", "history", "123", "--limit", "5", "--offset", "10"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::History { limit: 5, offset: 10, .. }
        ));
    }

    #[test]
    fn setup_workspace_defaults_dbt_version() {
        let cli = Cli::try_parse_from([
            "ddp",
            "setup-workspace",
            "--repo-url",
            "https://github.com/acme/dbt",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::SetupWorkspace { ref dbt_version, .. } if dbt_version == "1.4.5"
        ));
    }
}
