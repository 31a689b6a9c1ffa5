//! Job records and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job priority levels. Lower value claims first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    /// Urgent (user is waiting, e.g. an interactive download).
    Urgent = 0,
    /// Normal priority (default).
    Normal = 1,
    /// Background (bulk sync, metadata refresh).
    Background = 2,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value {
            0 => Priority::Urgent,
            1 => Priority::Normal,
            _ => Priority::Background,
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority as u8
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Urgent => write!(f, "urgent"),
            Priority::Normal => write!(f, "normal"),
            Priority::Background => write!(f, "background"),
        }
    }
}

/// Job lifecycle state.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal: a job in one of
/// those states never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed (possibly in backoff).
    Pending,
    /// Claimed by a worker, handler executing.
    Running,
    /// Handler succeeded.
    Completed,
    /// Retries exhausted or non-retryable failure.
    Failed,
    /// Explicitly cancelled.
    Cancelled,
    /// Explicitly paused, excluded from claiming until resumed.
    Paused,
}

impl JobStatus {
    /// Returns true if this state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Paused => write!(f, "paused"),
        }
    }
}

/// A unit of schedulable work.
///
/// The payload is opaque to the core; the handler registered for
/// `job_type` decodes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job ID, generated at submission.
    pub id: JobId,

    /// Type tag selecting a registered handler.
    pub job_type: String,

    /// Handler-interpreted payload.
    pub payload: serde_json::Value,

    /// Scheduling priority.
    pub priority: Priority,

    /// Current lifecycle state.
    pub status: JobStatus,

    /// Execution attempts so far, incremented on each claim.
    pub attempt_count: u32,

    /// Retry ceiling; the job runs at most `max_retries + 1` times.
    pub max_retries: u32,

    /// When the job was submitted.
    pub created_at: DateTime<Utc>,

    /// First transition into running, if any.
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// Earliest time the job may be claimed again (backoff).
    pub next_eligible_at: Option<DateTime<Utc>>,

    /// Message from the most recent failure.
    pub error_message: Option<String>,

    /// Handler result, set on success; opaque to the core.
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Creates a new pending job.
    pub fn new(
        job_type: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            priority,
            status: JobStatus::Pending,
            attempt_count: 0,
            max_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            next_eligible_at: None,
            error_message: None,
            result: None,
        }
    }

    /// Maximum executions including the initial attempt.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if a pending job's backoff window has elapsed.
    pub fn backoff_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at.map_or(true, |at| at <= now)
    }

    /// Creates the execution context handed to the handler.
    pub fn to_context(&self, worker_id: &str) -> JobContext {
        JobContext {
            job_id: self.id.clone(),
            job_type: self.job_type.clone(),
            attempt: self.attempt_count,
            max_attempts: self.max_attempts(),
            started_at: self.started_at.unwrap_or_else(Utc::now),
            worker_id: worker_id.to_string(),
        }
    }
}

/// Job execution context passed to handlers.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job ID.
    pub job_id: JobId,

    /// Job type tag.
    pub job_type: String,

    /// Current attempt number (1-based).
    pub attempt: u32,

    /// Maximum attempts allowed.
    pub max_attempts: u32,

    /// When this attempt started.
    pub started_at: DateTime<Utc>,

    /// Worker executing this attempt.
    pub worker_id: String,
}

impl JobContext {
    /// Returns true if this is the last attempt.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Returns remaining attempts after this one.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt)
    }
}

/// Filter for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Match this lifecycle state.
    pub status: Option<JobStatus>,
    /// Match this job type.
    pub job_type: Option<String>,
    /// Match this priority.
    pub priority: Option<Priority>,
}

impl JobFilter {
    /// Returns true if the job matches every set criterion.
    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self
                .job_type
                .as_deref()
                .map_or(true, |t| job.job_type == t)
            && self.priority.map_or(true, |p| job.priority == p)
    }
}
