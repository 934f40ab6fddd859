use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{PollerError, Result};

/// The kind of long-running backend operation a job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Airbyte connection sync.
    Sync,
    /// dbt run triggered through a Prefect deployment.
    DbtRun,
    /// dbt workspace setup (git clone + profile).
    WorkspaceSetup,
    /// Elementary report regeneration.
    ReportRefresh,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Sync,
        JobKind::DbtRun,
        JobKind::WorkspaceSetup,
        JobKind::ReportRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Sync => "sync",
            JobKind::DbtRun => "dbt-run",
            JobKind::WorkspaceSetup => "workspace-setup",
            JobKind::ReportRefresh => "report-refresh",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = PollerError;

    fn from_str(s: &str) -> Result<Self> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PollerError::Config(format!("unknown job kind: {}", s)))
    }
}

/// One backend-tracked long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            started_at: Utc::now(),
        }
    }
}

/// Canonical job state every backend vocabulary collapses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A snapshot returned by one poll round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatus {
    /// `None` when the response had no recognised state field.
    pub state: Option<JobState>,
    /// Lines that are new in this round.
    pub log_lines: Vec<String>,
    /// Only meaningful when `state` is `Failed`.
    pub failure_message: Option<String>,
}

impl JobStatus {
    pub fn with_state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn logs<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_lines.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn failure(mut self, message: impl Into<String>) -> Self {
        self.failure_message = Some(message.into());
        self
    }
}

/// Response of any submit-job endpoint.
///
/// Endpoints disagree on the identifier's name (`jobId`, `job_id`,
/// `flow_run_id`, `task_id`) and type (string or number).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    #[serde(default, rename = "jobId")]
    pub job_id_camel: Option<Value>,
    #[serde(default)]
    pub job_id: Option<Value>,
    #[serde(default)]
    pub flow_run_id: Option<Value>,
    #[serde(default)]
    pub task_id: Option<Value>,
}

impl SubmitResponse {
    pub fn into_job_id(self) -> Result<String> {
        [self.job_id_camel, self.job_id, self.flow_run_id, self.task_id]
            .iter()
            .flatten()
            .find_map(id_string)
            .ok_or(PollerError::MissingJobId)
    }
}

/// Read an identifier that may be serialized as a string or a number.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Body for the dbt workspace setup endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceSetupRequest {
    #[serde(rename = "gitrepoUrl")]
    pub gitrepo_url: String,
    #[serde(rename = "dbtVersion")]
    pub dbt_version: String,
    pub profile: DbtProfile,
}

impl WorkspaceSetupRequest {
    pub fn new(gitrepo_url: impl Into<String>) -> Self {
        Self {
            gitrepo_url: gitrepo_url.into(),
            dbt_version: "1.4.5".to_string(),
            profile: DbtProfile::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DbtProfile {
    pub name: String,
    pub target: String,
    pub target_configs_schema: String,
}

impl Default for DbtProfile {
    fn default() -> Self {
        Self {
            name: "dbt".to_string(),
            target: "dev".to_string(),
            target_configs_schema: "public".to_string(),
        }
    }
}

/// One attempt of a connection sync, as listed in the sync history.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAttempt {
    #[serde(rename = "job_id", deserialize_with = "string_or_number")]
    pub job_id: String,
    #[serde(rename = "attempt_no")]
    pub attempt_no: u32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub records_emitted: Option<u64>,
    #[serde(default)]
    pub records_committed: Option<u64>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub bytes_emitted: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub total_time_in_seconds: Option<f64>,
}

/// A page of a connection's sync history.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistory {
    #[serde(default)]
    pub history: Vec<SyncAttempt>,
    #[serde(default)]
    pub total_syncs: Option<u64>,
}

impl SyncHistory {
    /// Whether syncs remain beyond a page fetched at `offset`.
    pub fn has_more(&self, offset: u64) -> bool {
        self.total_syncs
            .is_some_and(|total| offset + (self.history.len() as u64) < total)
    }
}

/// Whether the Elementary report has been configured for the organisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementarySetupStatus {
    SetUp,
    NotSetUp,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ElementarySetupResponse {
    pub status: ElementarySetupStatus,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    id_string(&value).ok_or_else(|| serde::de::Error::custom("expected a string or number"))
}

fn opt_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(id_string))
}
