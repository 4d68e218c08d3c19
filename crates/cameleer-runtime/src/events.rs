//! The work-event stream.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use cameleer_core::Job;

/// Transitions a job goes through as the engine sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkEventKind {
    Scheduled,
    Interruptable,
    Run,
    Done,
    Failed,
}

impl fmt::Display for WorkEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Scheduled => "scheduled",
            Self::Interruptable => "interruptable",
            Self::Run => "run",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One uniform record on the engine's work stream.
#[derive(Debug, Clone, Serialize)]
pub struct WorkEvent {
    pub kind: WorkEventKind,
    pub task: String,
    pub job_id: Option<u64>,
    /// Present on failed transitions.
    pub error: Option<String>,
    /// The live job handle; not part of the serialized shape.
    #[serde(skip)]
    pub job: Option<Arc<Job>>,
}

impl WorkEvent {
    fn with_job(kind: WorkEventKind, task: &str, job: &Arc<Job>) -> Self {
        Self {
            kind,
            task: task.to_string(),
            job_id: Some(job.id()),
            error: None,
            job: Some(Arc::clone(job)),
        }
    }

    pub fn scheduled(task: &str, job: &Arc<Job>) -> Self {
        Self::with_job(WorkEventKind::Scheduled, task, job)
    }

    pub fn interruptable(task: &str, job: &Arc<Job>) -> Self {
        Self::with_job(WorkEventKind::Interruptable, task, job)
    }

    pub fn run(task: &str, job: &Arc<Job>) -> Self {
        Self::with_job(WorkEventKind::Run, task, job)
    }

    pub fn done(task: &str, job: &Arc<Job>) -> Self {
        Self::with_job(WorkEventKind::Done, task, job)
    }

    pub fn failed(task: &str, job: &Arc<Job>, error: impl Into<String>) -> Self {
        let mut event = Self::with_job(WorkEventKind::Failed, task, job);
        event.error = Some(error.into());
        event
    }
}
