//! Error taxonomy shared across the workspace.
//!
//! Every wrap preserves the originating cause. Step bodies raise arbitrary
//! JSON payloads; those travel as [`Thrown`] and are only stringified for
//! display.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Payload raised by a step body. Preserves the original value bit-exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thrown(pub Value);

impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<&str> for Thrown {
    fn from(value: &str) -> Self {
        Thrown(Value::String(value.to_string()))
    }
}

impl From<String> for Thrown {
    fn from(value: String) -> Self {
        Thrown(Value::String(value))
    }
}

impl From<Value> for Thrown {
    fn from(value: Value) -> Self {
        Thrown(value)
    }
}

/// Configuration-slot resolution errors.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The value could not be shaped into the requested type after callable
    /// invocation and future awaiting.
    #[error("cannot resolve value: {0}")]
    CannotResolve(String),

    /// A compute chain kept producing further computations.
    #[error("resolution depth exceeded (self-referential config?)")]
    DepthExceeded,
}

/// Why a run attempt's recovery gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalFailReason {
    /// `max_num_fails` was zero; no retry allowed.
    NoRetryAllowed,
    /// The retry budget was reached.
    BudgetExhausted,
    /// The recovery schedule reported an error.
    ScheduleErrored(String),
    /// The recovery schedule completed without a successful retry.
    NoMoreRetries,
}

impl fmt::Display for FinalFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRetryAllowed => write!(f, "no retry allowed"),
            Self::BudgetExhausted => write!(f, "retry budget exhausted"),
            Self::ScheduleErrored(msg) => write!(f, "recovery schedule errored: {}", msg),
            Self::NoMoreRetries => write!(f, "no more retries"),
        }
    }
}

/// Errors raised by one step's run attempt.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    #[error("failed to resolve step arguments: {0}")]
    ResolveArgs(#[source] ResolveError),

    #[error("failed to resolve step error config: {0}")]
    ResolveErrConf(#[source] ResolveError),

    #[error("step failed finally ({reason}): {cause}")]
    FinalFail {
        reason: FinalFailReason,
        cause: Thrown,
    },
}

impl AttemptError {
    /// The raised payload behind a final failure, if any.
    pub fn cause(&self) -> Option<&Thrown> {
        match self {
            Self::FinalFail { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// A job's failure: the first step that failed finally, with its cause.
#[derive(Debug, Clone, Error)]
#[error("job {job_id} of task '{task}' failed at step '{step}': {cause}")]
pub struct JobError {
    pub job_id: u64,
    pub task: String,
    pub step: String,
    #[source]
    pub cause: AttemptError,
}
