//! Per-kind status vocabularies.
//!
//! Every backend endpoint reports progress differently: Airbyte uses
//! lowercase `status` strings, Prefect flow runs use an uppercase
//! `state_type`, and the workspace-setup task endpoint reports a `progress`
//! array whose last entry carries the state. [`EndpointTable`] maps each
//! [`JobKind`] to the endpoint paths and normalizer that turn those shapes
//! into a [`JobStatus`]. This is the only place vocabularies are compared.

use serde_json::Value;

use crate::types::{JobKind, JobState, JobStatus};

/// Placeholder substituted with the job id in endpoint paths.
pub const ID_PLACEHOLDER: &str = "{id}";

/// How an endpoint reports log lines across rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Each response carries only the lines produced since the last one.
    Incremental,
    /// Each response carries every line so far; already-seen lines are dropped.
    Snapshot,
}

pub type StatusNormalizer = fn(&Value) -> JobStatus;
pub type LogExtractor = fn(&Value) -> Vec<String>;

/// A separate endpoint that returns log lines for a job.
#[derive(Debug, Clone)]
pub struct LogsEndpoint {
    pub path: String,
    pub extract: LogExtractor,
}

/// How to check the status of one kind of job.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub status_path: String,
    pub normalize: StatusNormalizer,
    pub logs: Option<LogsEndpoint>,
    pub log_mode: LogMode,
}

impl Endpoint {
    pub fn status_url(&self, base_url: &str, job_id: &str) -> String {
        join_url(base_url, &render_path(&self.status_path, job_id))
    }

    pub fn logs_url(&self, base_url: &str, job_id: &str) -> Option<String> {
        self.logs
            .as_ref()
            .map(|logs| join_url(base_url, &render_path(&logs.path, job_id)))
    }
}

/// Endpoint lookup for every [`JobKind`].
#[derive(Debug, Clone)]
pub struct EndpointTable {
    sync: Endpoint,
    dbt_run: Endpoint,
    workspace_setup: Endpoint,
    report_refresh: Endpoint,
}

impl Default for EndpointTable {
    fn default() -> Self {
        Self {
            sync: Endpoint {
                status_path: "airbyte/v1/jobs/{id}".to_string(),
                normalize: normalize_airbyte_job,
                logs: None,
                log_mode: LogMode::Incremental,
            },
            dbt_run: prefect_flow_run_endpoint(),
            workspace_setup: Endpoint {
                status_path: "tasks/{id}".to_string(),
                normalize: normalize_task_progress,
                logs: None,
                log_mode: LogMode::Snapshot,
            },
            report_refresh: prefect_flow_run_endpoint(),
        }
    }
}

impl EndpointTable {
    pub fn get(&self, kind: JobKind) -> &Endpoint {
        match kind {
            JobKind::Sync => &self.sync,
            JobKind::DbtRun => &self.dbt_run,
            JobKind::WorkspaceSetup => &self.workspace_setup,
            JobKind::ReportRefresh => &self.report_refresh,
        }
    }

    /// Replace the endpoint used for `kind`.
    pub fn with_endpoint(mut self, kind: JobKind, endpoint: Endpoint) -> Self {
        match kind {
            JobKind::Sync => self.sync = endpoint,
            JobKind::DbtRun => self.dbt_run = endpoint,
            JobKind::WorkspaceSetup => self.workspace_setup = endpoint,
            JobKind::ReportRefresh => self.report_refresh = endpoint,
        }
        self
    }
}

fn prefect_flow_run_endpoint() -> Endpoint {
    Endpoint {
        status_path: "prefect/flow_runs/{id}".to_string(),
        normalize: normalize_prefect_flow_run,
        logs: Some(LogsEndpoint {
            path: "prefect/flow_runs/{id}/logs".to_string(),
            extract: extract_prefect_logs,
        }),
        log_mode: LogMode::Snapshot,
    }
}

/// Map any backend state string to the canonical set.
///
/// Matching is case-insensitive. Unknown strings return `None`, which the
/// detector treats as "keep polling".
pub fn canonical_state(raw: &str) -> Option<JobState> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "completed" | "succeeded" | "success" => Some(JobState::Completed),
        "failed" | "crashed" | "cancelled" | "canceled" | "error" => Some(JobState::Failed),
        "running" | "started" | "incomplete" | "cancelling" => Some(JobState::Running),
        "pending" | "scheduled" | "queued" | "paused" | "late" => Some(JobState::Pending),
        _ => None,
    }
}

/// Airbyte sync job: `{status|state, logs, failureMessage|message}`.
pub fn normalize_airbyte_job(body: &Value) -> JobStatus {
    let state = first_str(body, &["status", "state"]).and_then(canonical_state);
    let failure_message = match state {
        Some(JobState::Failed) => first_str(body, &["failureMessage", "message"]).map(str::to_string),
        _ => None,
    };

    JobStatus {
        state,
        log_lines: string_array(body.get("logs")),
        failure_message,
    }
}

/// Prefect flow run: `{state_type, state_name, state: {message}}`.
pub fn normalize_prefect_flow_run(body: &Value) -> JobStatus {
    let state = first_str(body, &["state_type"]).and_then(canonical_state);
    let failure_message = match state {
        Some(JobState::Failed) => body
            .get("state")
            .and_then(|s| s.get("message"))
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .or_else(|| first_str(body, &["state_name"]))
            .map(str::to_string),
        _ => None,
    };

    JobStatus {
        state,
        log_lines: Vec::new(),
        failure_message,
    }
}

/// Prefect flow run logs: `{logs: {logs: [{message}]}}`.
pub fn extract_prefect_logs(body: &Value) -> Vec<String> {
    body.get("logs")
        .and_then(|l| l.get("logs"))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("message").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Celery-style task progress: `{progress: [{stepnum, message, status}]}`.
///
/// The last entry decides the state; an empty or missing list is not yet
/// started.
pub fn normalize_task_progress(body: &Value) -> JobStatus {
    let progress = body
        .get("progress")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let last = progress.last();
    let state = last
        .and_then(|entry| first_str(entry, &["status"]))
        .and_then(canonical_state);
    let failure_message = match state {
        Some(JobState::Failed) => last
            .and_then(|entry| first_str(entry, &["message"]))
            .map(str::to_string),
        _ => None,
    };

    JobStatus {
        state,
        log_lines: progress
            .iter()
            .filter_map(|entry| first_str(entry, &["message"]))
            .map(str::to_string)
            .collect(),
        failure_message,
    }
}

/// Drop lines a snapshot endpoint already reported in earlier rounds.
pub fn new_lines(mode: LogMode, lines: Vec<String>, seen_lines: usize) -> Vec<String> {
    match mode {
        LogMode::Incremental => lines,
        LogMode::Snapshot => lines.into_iter().skip(seen_lines).collect(),
    }
}

pub(crate) fn render_path(template: &str, job_id: &str) -> String {
    template.replace(ID_PLACEHOLDER, job_id)
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn first_str<'a>(body: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vocabularies_collapse_to_canonical_states() {
        assert_eq!(canonical_state("completed"), Some(JobState::Completed));
        assert_eq!(canonical_state("COMPLETED"), Some(JobState::Completed));
        assert_eq!(canonical_state("failed"), Some(JobState::Failed));
        assert_eq!(canonical_state("FAILED"), Some(JobState::Failed));
        assert_eq!(canonical_state("CRASHED"), Some(JobState::Failed));
        assert_eq!(canonical_state("RUNNING"), Some(JobState::Running));
        assert_eq!(canonical_state("SCHEDULED"), Some(JobState::Pending));
        assert_eq!(canonical_state("set-up"), None);
        assert_eq!(canonical_state(""), None);
    }

    #[test]
    fn airbyte_job_with_logs() {
        let status = normalize_airbyte_job(&json!({"state": "completed", "logs": ["a", "b"]}));
        assert_eq!(status.state, Some(JobState::Completed));
        assert_eq!(status.log_lines, vec!["a", "b"]);
        assert_eq!(status.failure_message, None);
    }

    #[test]
    fn airbyte_failure_message_only_on_failure() {
        let failed = normalize_airbyte_job(&json!({"state": "failed", "failureMessage": "boom"}));
        assert_eq!(failed.failure_message.as_deref(), Some("boom"));

        let running = normalize_airbyte_job(&json!({"status": "running", "message": "syncing"}));
        assert_eq!(running.state, Some(JobState::Running));
        assert_eq!(running.failure_message, None);
    }

    #[test]
    fn missing_state_field_is_unknown() {
        assert_eq!(normalize_airbyte_job(&json!({})).state, None);
        assert_eq!(normalize_prefect_flow_run(&json!({"id": "123"})).state, None);
        assert_eq!(normalize_task_progress(&json!({})).state, None);
    }

    #[test]
    fn prefect_flow_run_failure_prefers_state_message() {
        let status = normalize_prefect_flow_run(&json!({
            "state_type": "FAILED",
            "state_name": "Failed",
            "state": {"message": "dbt exited with code 1"}
        }));
        assert_eq!(status.state, Some(JobState::Failed));
        assert_eq!(status.failure_message.as_deref(), Some("dbt exited with code 1"));

        let status = normalize_prefect_flow_run(&json!({"state_type": "CRASHED", "state_name": "Crashed"}));
        assert_eq!(status.failure_message.as_deref(), Some("Crashed"));
    }

    #[test]
    fn prefect_logs_are_extracted_in_order() {
        let lines = extract_prefect_logs(&json!({
            "logs": {"logs": [
                {"level": 20, "timestamp": "t0", "message": "Running dbt"},
                {"level": 20, "timestamp": "t1", "message": "Done"}
            ]}
        }));
        assert_eq!(lines, vec!["Running dbt", "Done"]);
        assert!(extract_prefect_logs(&json!({"logs": []})).is_empty());
    }

    #[test]
    fn task_progress_uses_last_entry() {
        let status = normalize_task_progress(&json!({"progress": [
            {"stepnum": 1, "message": "cloning repo", "status": "running"},
            {"stepnum": 2, "message": "git clone failed", "status": "failed"}
        ]}));
        assert_eq!(status.state, Some(JobState::Failed));
        assert_eq!(status.failure_message.as_deref(), Some("git clone failed"));
        assert_eq!(status.log_lines, vec!["cloning repo", "git clone failed"]);
    }

    #[test]
    fn snapshot_mode_drops_seen_lines() {
        let lines = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(new_lines(LogMode::Snapshot, lines.clone(), 2), vec!["c"]);
        assert_eq!(new_lines(LogMode::Snapshot, lines.clone(), 5), Vec::<String>::new());
        assert_eq!(new_lines(LogMode::Incremental, lines.clone(), 2), lines);
    }

    #[test]
    fn table_covers_every_kind() {
        let table = EndpointTable::default();
        for kind in JobKind::ALL {
            assert!(table.get(kind).status_path.contains(ID_PLACEHOLDER));
        }
        assert_eq!(
            table.get(JobKind::DbtRun).status_url("https://ddp.example/api/", "123"),
            "https://ddp.example/api/prefect/flow_runs/123"
        );
        assert_eq!(
            table.get(JobKind::ReportRefresh).logs_url("https://ddp.example/api", "9").as_deref(),
            Some("https://ddp.example/api/prefect/flow_runs/9/logs")
        );
        assert!(table.get(JobKind::Sync).logs_url("https://ddp.example/api", "9").is_none());
    }
}
