//! HTTP client for the DDP backend.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{PollerError, Result};
use crate::fetcher::StatusFetcher;
use crate::lock::{parse_resources, LockSource, LockedResource};
use crate::normalize::{join_url, new_lines, render_path, EndpointTable};
use crate::types::{
    ElementarySetupResponse, ElementarySetupStatus, Job, JobKind, JobStatus, SubmitResponse,
    SyncHistory, WorkspaceSetupRequest,
};

/// Header carrying the slug of the organisation the request acts for.
pub const ORG_HEADER: &str = "x-dalgo-org";

/// Collection whose entries carry a `lock` while a task is running.
pub const DEFAULT_LOCK_PATH: &str = "prefect/tasks/transform/";

#[derive(Clone)]
pub struct DdpClient {
    http_client: Client,
    base_url: String,
    token: String,
    org_slug: Option<String>,
    endpoints: EndpointTable,
    lock_path: String,
}

impl DdpClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into(),
            token: token.into(),
            org_slug: None,
            endpoints: EndpointTable::default(),
            lock_path: DEFAULT_LOCK_PATH.to_string(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let client = Self::new(config.backend_url.clone(), config.api_token.clone());
        match &config.org_slug {
            Some(slug) => client.with_org(slug.clone()),
            None => client,
        }
    }

    /// Act on behalf of an organisation.
    pub fn with_org(mut self, slug: impl Into<String>) -> Self {
        self.org_slug = Some(slug.into());
        self
    }

    /// Override the per-kind status endpoints.
    pub fn with_endpoints(mut self, endpoints: EndpointTable) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Collection polled by the busy reconciler.
    pub fn with_lock_path(mut self, path: impl Into<String>) -> Self {
        self.lock_path = path.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = join_url(&self.base_url, path);
        let builder = self
            .http_client
            .request(method, url)
            .bearer_auth(&self.token);
        match &self.org_slug {
            Some(slug) => builder.header(ORG_HEADER, slug),
            None => builder,
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let resp = self.request(Method::GET, path).send().await?;
        read_json(resp).await
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let resp = self.request(Method::POST, path).json(body).send().await?;
        read_json(resp).await
    }

    /// Submit a job and return it ready for polling.
    pub async fn submit<B: Serialize + ?Sized>(
        &self,
        kind: JobKind,
        path: &str,
        body: &B,
    ) -> Result<Job> {
        let value = self.post_json(path, body).await?;
        let job_id = serde_json::from_value::<SubmitResponse>(value)?.into_job_id()?;
        info!(job_id = %job_id, kind = %kind, "Job submitted");
        Ok(Job::new(job_id, kind))
    }

    /// Start a dbt run through its Prefect deployment.
    pub async fn run_dbt_deployment(&self, deployment_id: &str) -> Result<Job> {
        let path = format!("prefect/v1/flows/{}/flow_run/", deployment_id);
        self.submit(JobKind::DbtRun, &path, &serde_json::json!({}))
            .await
    }

    /// Clone a dbt repo and set up the workspace.
    pub async fn setup_workspace(&self, request: &WorkspaceSetupRequest) -> Result<Job> {
        self.submit(JobKind::WorkspaceSetup, "dbt/workspace/", request)
            .await
    }

    /// Regenerate the Elementary report.
    pub async fn refresh_elementary_report(&self) -> Result<Job> {
        self.submit(
            JobKind::ReportRefresh,
            "dbt/v1/refresh-elementary-report/",
            &serde_json::json!({}),
        )
        .await
    }

    /// Trigger a sync for an Airbyte connection.
    pub async fn sync_connection(&self, connection_id: &str) -> Result<Job> {
        let path = format!("airbyte/connections/{}/sync/", connection_id);
        self.submit(JobKind::Sync, &path, &serde_json::json!({}))
            .await
    }

    /// Whether the Elementary report can be generated for this organisation.
    pub async fn elementary_setup_status(&self) -> Result<ElementarySetupStatus> {
        let value = self.get_json("dbt/elementary-setup-status").await?;
        Ok(serde_json::from_value::<ElementarySetupResponse>(value)?.status)
    }

    /// One page of a connection's sync history, newest first.
    pub async fn fetch_sync_history(
        &self,
        connection_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<SyncHistory> {
        let path = format!("airbyte/v1/connections/{}/sync/history", connection_id);
        let resp = self
            .request(Method::GET, &path)
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        Ok(serde_json::from_value(read_json(resp).await?)?)
    }

    /// Full log output of one sync attempt. Fetched on demand, never while
    /// polling.
    pub async fn fetch_attempt_logs(&self, job_id: &str, attempt: u32) -> Result<Vec<String>> {
        let resp = self
            .request(Method::GET, "airbyte/v1/logs")
            .query(&[("job_id", job_id.to_string()), ("attempt_number", attempt.to_string())])
            .send()
            .await?;
        let value = read_json(resp).await?;

        let lines = value
            .as_array()
            .or_else(|| value.get("logs").and_then(Value::as_array))
            .ok_or_else(|| PollerError::Parse("expected an array of log lines".into()))?;
        Ok(lines
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }
}

async fn read_json(resp: Response) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(PollerError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let text = resp.text().await?;
    Ok(serde_json::from_str(&text)?)
}

#[async_trait]
impl StatusFetcher for DdpClient {
    async fn fetch_status(&self, job: &Job, seen_lines: usize) -> Result<JobStatus> {
        let endpoint = self.endpoints.get(job.kind);

        let body = self
            .get_json(&render_path(&endpoint.status_path, &job.job_id))
            .await?;
        let mut status = (endpoint.normalize)(&body);

        // A failed log request costs this round its lines, not the job.
        if let Some(logs) = &endpoint.logs {
            status.log_lines = match self.get_json(&render_path(&logs.path, &job.job_id)).await {
                Ok(body) => (logs.extract)(&body),
                Err(err) => {
                    warn!(job_id = %job.job_id, error = %err, "Failed to fetch job logs");
                    Vec::new()
                }
            };
        }

        status.log_lines = new_lines(endpoint.log_mode, status.log_lines, seen_lines);
        debug!(
            job_id = %job.job_id,
            kind = %job.kind,
            state = ?status.state,
            new_lines = status.log_lines.len(),
            "Fetched job status"
        );
        Ok(status)
    }
}

#[async_trait]
impl LockSource for DdpClient {
    async fn fetch_resources(&self) -> Result<Vec<LockedResource>> {
        let body = self.get_json(&self.lock_path).await?;
        parse_resources(&body)
    }
}
