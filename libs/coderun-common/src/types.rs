use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::language::{self, ExecutionProfile, ResolveError};
use crate::units;

/// Inbound execution request, as posted to `/execute`
/// Never mutated after parse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
}

impl ExecutionRequest {
    /// Validate the request and resolve its execution profile.
    ///
    /// The language is checked first so that an unknown language is reported
    /// even when the code is also missing.
    pub fn validate(&self) -> Result<ExecutionProfile, ResolveError> {
        let profile = language::resolve(&self.language)?;
        if self.code.trim().is_empty() {
            return Err(ResolveError::EmptyInput { field: "code" });
        }
        Ok(profile)
    }
}

/// Per-task resource caps, in the engine's string notation ("1", "256m")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub cpus: String,
    pub memory: String,
}

/// Engine-facing description of a single containerized step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub image: String,
    pub run: String,
    /// Duration string, e.g. "5s"
    pub timeout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl TaskSpec {
    pub fn timeout_duration(&self) -> Result<Duration, InvalidJob> {
        units::parse_duration(&self.timeout)
            .map_err(|e| InvalidJob::new(format!("task {:?}: invalid timeout {:?}: {}", self.name, self.timeout, e)))
    }

    fn validate(&self) -> Result<(), InvalidJob> {
        if self.name.trim().is_empty() {
            return Err(InvalidJob::new("task name is required"));
        }
        if self.image.trim().is_empty() {
            return Err(InvalidJob::new(format!("task {:?}: image is required", self.name)));
        }
        if self.run.trim().is_empty() {
            return Err(InvalidJob::new(format!("task {:?}: run command is required", self.name)));
        }
        self.timeout_duration()?;

        if let Some(limits) = &self.limits {
            units::parse_cpus(&limits.cpus).map_err(|e| {
                InvalidJob::new(format!("task {:?}: invalid cpu limit {:?}: {}", self.name, limits.cpus, e))
            })?;
            units::parse_memory(&limits.memory).map_err(|e| {
                InvalidJob::new(format!("task {:?}: invalid memory limit {:?}: {}", self.name, limits.memory, e))
            })?;
        }

        for filename in self.files.keys() {
            let bad = filename.is_empty()
                || filename.starts_with('/')
                || filename.split('/').any(|part| part == "..");
            if bad {
                return Err(InvalidJob::new(format!(
                    "task {:?}: invalid file name {:?}",
                    self.name, filename
                )));
            }
        }
        Ok(())
    }
}

/// A job as submitted to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    pub name: String,
    pub tasks: Vec<TaskSpec>,
}

impl JobInput {
    /// Reject specs the worker could never run
    pub fn validate(&self) -> Result<(), InvalidJob> {
        if self.tasks.is_empty() {
            return Err(InvalidJob::new("job has no tasks"));
        }
        self.tasks.iter().try_for_each(TaskSpec::validate)
    }
}

/// Reason a job spec was rejected at submission
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job: {0}")]
pub struct InvalidJob(pub String);

impl InvalidJob {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Job State Machine
/// Pending → Scheduled → Running → {Completed, Failed, Cancelled}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// No further transitions happen after a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Completed,
    Failed,
}

/// What happened when one task ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub state: TaskState,
    /// Captured stdout (the output file) of a successful run
    #[serde(default)]
    pub result: String,
    /// Diagnostics of a failed run
    #[serde(default)]
    pub error: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// The engine's record of a submitted job
/// Also the payload of every state change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub state: JobState,
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub execution: Vec<TaskExecution>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(input: JobInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: input.name,
            state: JobState::Pending,
            tasks: input.tasks,
            execution: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Captured text of the first task for a terminal job.
    /// `None` while the job is still in flight.
    pub fn outcome(&self) -> Option<JobOutcome> {
        if !self.state.is_terminal() {
            return None;
        }
        let first = self.execution.first();
        let outcome = match self.state {
            JobState::Completed => JobOutcome {
                succeeded: true,
                output: first.map(|e| e.result.clone()).unwrap_or_default(),
            },
            _ => JobOutcome {
                succeeded: false,
                output: first
                    .map(|e| e.error.clone())
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| format!("job {}", self.state)),
            },
        };
        Some(outcome)
    }
}

/// Delivered to the waiting request handler at most once per job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub succeeded: bool,
    pub output: String,
}
