//! Client and polling configuration.

use std::time::Duration;

use crate::error::{PollerError, Result};

/// Interval used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Pacing and bounds for a poll session.
///
/// Both bounds default to `None`, which polls until the job reaches a
/// terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between rounds.
    pub interval: Duration,
    /// Give up after this many status fetches.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since the session started.
    pub max_duration: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
            max_duration: None,
        }
    }
}

impl PollConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    /// Whether a session that has made `attempts` fetches over `elapsed` is
    /// out of budget.
    pub fn exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.max_duration.is_some_and(|max| elapsed >= max)
    }

    /// Pause before the next round, cut short so it never runs past
    /// `max_duration`.
    pub fn next_delay(&self, elapsed: Duration) -> Duration {
        match self.max_duration {
            Some(max) => self.interval.min(max.saturating_sub(elapsed)),
            None => self.interval,
        }
    }
}

/// Connection settings for the DDP backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_url: String,
    pub api_token: String,
    pub org_slug: Option<String>,
    pub poll: PollConfig,
}

impl ClientConfig {
    /// Load from `DDP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_url = lookup("DDP_BACKEND_URL")
            .ok_or_else(|| PollerError::Config("DDP_BACKEND_URL not set".into()))?;
        let api_token = lookup("DDP_API_TOKEN")
            .ok_or_else(|| PollerError::Config("DDP_API_TOKEN not set".into()))?;

        let mut poll = PollConfig::default();
        if let Some(ms) = parse_var::<u64>(&lookup, "DDP_POLL_INTERVAL_MS")? {
            poll.interval = Duration::from_millis(ms);
        }
        poll.max_attempts = parse_var::<u32>(&lookup, "DDP_POLL_MAX_ATTEMPTS")?;
        poll.max_duration =
            parse_var::<u64>(&lookup, "DDP_POLL_MAX_DURATION_MS")?.map(Duration::from_millis);

        Ok(Self {
            backend_url,
            api_token,
            org_slug: lookup("DDP_ORG_SLUG").filter(|s| !s.is_empty()),
            poll,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PollerError::Config(format!("{} must be a valid number", key))),
    }
}
