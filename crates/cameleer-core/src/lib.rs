//! Core orchestration model.
//!
//! This crate defines the building blocks the engine composes:
//! - declarative task configuration and its lazy resolution
//! - schedules (calendar, interval, manual) and the recovery-scheduler seam
//! - jobs and per-step run attempts with schedule-driven recovery
//! - the name→factory registries for tasks and other configurable classes

pub mod attempt;
pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod logging;
pub mod registry;
pub mod resolver;
pub mod result;
pub mod schedule;
pub mod task;

pub use attempt::RunAttempt;
pub use config::{
    CameleerDefaults, CanFail, ComputeFn, ErrorConfigDefaults, ErrorConfigSpec, ProgressHandle,
    Provided, ResolveCtx, ResolvedConfig, ResolvedErrorConfig, ResolvedStep, StepConfig, StepFn,
    TaskConfig,
};
pub use context::{ContextMutation, TaskContext};
pub use error::{AttemptError, FinalFailReason, JobError, ResolveError, Thrown};
pub use job::Job;
pub use logging::Logger;
pub use registry::{ClassRegistry, RegistryError, TaskBuildArgs, TaskDescriptor, TaskRegistry};
pub use resolver::{optional_to_value, provided_to_value, resolve, resolve_error_config};
pub use result::StepResult;
pub use schedule::{
    CalendarEvent, CalendarSchedule, IntervalSchedule, ManualSchedule, RecoveryScheduler, Schedule,
    ScheduleError, ScheduleEvent, ScheduleEventKind, ScheduleId, SchedulePulse,
};
pub use task::Task;
