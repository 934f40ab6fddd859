//! Console-wide state shared by reference.
//!
//! Holds the notification queue and the organisation the user is acting
//! for. Create one at start-up and pass `&ConsoleContext` to whatever needs
//! to report to the user; it lives for the whole process.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError, RwLock};

use crate::lock::BusyOutcome;
use crate::poller::{PollOutcome, PollState, DEFAULT_FAILURE_MESSAGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
    Info,
}

/// A transient notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub severity: Severity,
    pub message: String,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Org {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct ConsoleContext {
    toasts: Mutex<VecDeque<Toast>>,
    current_org: RwLock<Option<Org>>,
}

impl ConsoleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_toast(&self, toast: Toast) {
        match toast.severity {
            Severity::Error => tracing::error!(message = %toast.message, "Error toast"),
            _ => tracing::info!(message = %toast.message, severity = ?toast.severity, "Toast"),
        }
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(toast);
    }

    pub fn success_toast(&self, message: impl Into<String>, details: Vec<String>) {
        self.push_toast(Toast {
            severity: Severity::Success,
            message: message.into(),
            details,
        });
    }

    pub fn error_toast(&self, message: impl Into<String>, details: Vec<String>) {
        self.push_toast(Toast {
            severity: Severity::Error,
            message: message.into(),
            details,
        });
    }

    pub fn info_toast(&self, message: impl Into<String>, details: Vec<String>) {
        self.push_toast(Toast {
            severity: Severity::Info,
            message: message.into(),
            details,
        });
    }

    /// Take every pending toast, oldest first.
    pub fn drain_toasts(&self) -> Vec<Toast> {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Tell the user how a poll session ended. Cancelled sessions stay quiet.
    pub fn report_outcome(&self, outcome: &PollOutcome) {
        match outcome.state {
            PollState::Succeeded => self.success_toast("Job ran successfully", Vec::new()),
            PollState::Failed => self.error_toast(
                outcome
                    .failure_message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
                Vec::new(),
            ),
            PollState::Idle | PollState::Polling | PollState::Cancelled => {}
        }
    }

    /// Surface the error behind a fail-open busy check.
    pub fn report_busy_outcome(&self, outcome: &BusyOutcome) {
        if let BusyOutcome::FetchFailed(message) = outcome {
            self.error_toast(message.clone(), Vec::new());
        }
    }

    pub fn set_current_org(&self, org: Option<Org>) {
        *self
            .current_org
            .write()
            .unwrap_or_else(PoisonError::into_inner) = org;
    }

    pub fn current_org(&self) -> Option<Org> {
        self.current_org
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
