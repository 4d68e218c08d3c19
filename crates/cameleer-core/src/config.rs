//! Declarative task configuration.
//!
//! A task's configuration is a frozen record whose slots may be literals or
//! computations. A computation receives the pre-resolved `resolve` bag and
//! the owning task, returns a future, and that future may itself yield
//! another computation, which the resolver loops on with a bounded depth. This
//! one sum type covers "value", "callable" and "promised value" alike.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::{ResolveError, Thrown};
use crate::job::Job;
use crate::schedule::Schedule;
use crate::task::Task;

/// Input handed to every configuration computation.
#[derive(Clone)]
pub struct ResolveCtx {
    /// The materialized `resolve` bag.
    pub resolved: Arc<HashMap<String, Value>>,
    /// The task whose configuration is being resolved.
    pub task: Arc<Task>,
}

impl ResolveCtx {
    /// Look up a value from the resolve bag.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.resolved.get(key)
    }
}

/// A computation producing the next shape of a configuration slot.
pub type ComputeFn<T> =
    Arc<dyn Fn(ResolveCtx) -> BoxFuture<'static, Result<Provided<T>, ResolveError>> + Send + Sync>;

/// A configuration slot: a literal, or a computation yielding one.
pub enum Provided<T> {
    Literal(T),
    Compute(ComputeFn<T>),
}

impl<T> Provided<T> {
    /// Wrap a literal value.
    pub fn value(value: T) -> Self {
        Self::Literal(value)
    }

    /// Wrap a computation.
    pub fn compute<F, Fut>(f: F) -> Self
    where
        F: Fn(ResolveCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Provided<T>, ResolveError>> + Send + 'static,
    {
        Self::Compute(Arc::new(move |ctx| Box::pin(f(ctx))))
    }
}

impl<T: Clone> Clone for Provided<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Literal(v) => Self::Literal(v.clone()),
            Self::Compute(f) => Self::Compute(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Provided<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Self::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

impl<T> From<T> for Provided<T> {
    fn from(value: T) -> Self {
        Self::Literal(value)
    }
}

/// A step body: receives its resolved arguments and the running job.
pub type StepFn =
    Arc<dyn Fn(Vec<Value>, Arc<Job>) -> BoxFuture<'static, Result<Value, Thrown>> + Send + Sync>;

/// Opaque progress handle; the engine carries it through untouched.
pub type ProgressHandle = Arc<dyn Any + Send + Sync>;

/// Partial per-step error policy; unset fields merge from the engine
/// defaults (explicit field wins).
#[derive(Clone, Default)]
pub struct ErrorConfigSpec {
    /// Produces the recovery schedule; defaults to the bounded retry interval.
    pub schedule: Option<Provided<Schedule>>,
    /// Retry budget; 0 means no retry allowed.
    pub max_num_fails: Option<u32>,
    /// On regular failure, treat the error as the step's result and continue.
    pub skip: Option<bool>,
    /// On exhaustion, return the error as the step's result instead of
    /// propagating the failure.
    pub continue_on_final_fail: Option<bool>,
}

impl ErrorConfigSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedule(mut self, schedule: impl Into<Provided<Schedule>>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn with_max_num_fails(mut self, max_num_fails: u32) -> Self {
        self.max_num_fails = Some(max_num_fails);
        self
    }

    pub fn with_skip(mut self, skip: bool) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_continue_on_final_fail(mut self, value: bool) -> Self {
        self.continue_on_final_fail = Some(value);
        self
    }
}

impl fmt::Debug for ErrorConfigSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorConfigSpec")
            .field("schedule", &self.schedule.as_ref().map(|_| ".."))
            .field("max_num_fails", &self.max_num_fails)
            .field("skip", &self.skip)
            .field("continue_on_final_fail", &self.continue_on_final_fail)
            .finish()
    }
}

/// A step's failure policy.
#[derive(Debug, Clone, Default)]
pub enum CanFail {
    /// Apply the engine defaults wholesale.
    #[default]
    UseDefaults,
    /// Shorthand `true`: defaults, with continue-on-final-fail forced on.
    Allow,
    /// Shorthand `false`: zero retries, must not fail.
    Deny,
    /// An explicit partial record merged over the defaults.
    Spec(ErrorConfigSpec),
}

/// One step of a task's linear pipeline.
#[derive(Clone)]
pub struct StepConfig {
    pub name: Option<String>,
    pub func: StepFn,
    /// Produces the argument list; the job handle is passed separately.
    pub args: Option<Provided<Vec<Value>>>,
    pub can_fail: CanFail,
}

impl StepConfig {
    /// A bare step body; defaults are applied for everything else.
    pub fn func<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>, Arc<Job>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, Thrown>> + Send + 'static,
    {
        Self {
            name: None,
            func: Arc::new(move |args, job| Box::pin(f(args, job))),
            args: None,
            can_fail: CanFail::default(),
        }
    }

    /// A named step body.
    pub fn named<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>, Arc<Job>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, Thrown>> + Send + 'static,
    {
        let mut step = Self::func(f);
        step.name = Some(name.into());
        step
    }

    pub fn with_args(mut self, args: impl Into<Provided<Vec<Value>>>) -> Self {
        self.args = Some(args.into());
        self
    }

    pub fn with_can_fail(mut self, can_fail: CanFail) -> Self {
        self.can_fail = can_fail;
        self
    }
}

impl fmt::Debug for StepConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepConfig")
            .field("name", &self.name)
            .field("can_fail", &self.can_fail)
            .finish()
    }
}

/// The declarative description of a task.
#[derive(Clone)]
pub struct TaskConfig {
    /// Stable name, unique within an engine instance.
    pub name: String,
    /// Registry key of the concrete task kind.
    pub type_name: String,
    /// Gates loading; evaluated exactly once per load.
    pub enabled: Provided<bool>,
    /// Evaluated exactly once per load.
    pub schedule: Provided<Schedule>,
    /// Re-evaluated per firing.
    pub skip: Option<Provided<bool>>,
    /// Enables cost-queue admission when present.
    pub cost: Option<Provided<f64>>,
    /// Gates overlap of this task's jobs.
    pub allow_multiple: Option<Provided<bool>>,
    /// Queue names this task may run on; empty means use the default.
    pub queues: Option<Provided<Vec<String>>>,
    /// Opaque to the engine.
    pub progress: Option<ProgressHandle>,
    /// Opens a premature-interruption window when present.
    pub interrupt_timeout_secs: Option<Provided<f64>>,
    /// The ordered step pipeline.
    pub steps: Option<Provided<Vec<StepConfig>>>,
    /// Pre-resolved bag handed to every other computation.
    pub resolve: HashMap<String, Provided<Value>>,
    /// Kind-specific record validated by the task's registry entry.
    pub extra: Value,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            type_name: Task::BASE_TYPE.to_string(),
            enabled: Provided::value(true),
            schedule: Provided::value(schedule),
            skip: None,
            cost: None,
            allow_multiple: None,
            queues: None,
            progress: None,
            interrupt_timeout_secs: None,
            steps: None,
            resolve: HashMap::new(),
            extra: Value::Null,
        }
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn with_enabled(mut self, enabled: impl Into<Provided<bool>>) -> Self {
        self.enabled = enabled.into();
        self
    }

    pub fn with_skip(mut self, skip: impl Into<Provided<bool>>) -> Self {
        self.skip = Some(skip.into());
        self
    }

    pub fn with_cost(mut self, cost: impl Into<Provided<f64>>) -> Self {
        self.cost = Some(cost.into());
        self
    }

    pub fn with_allow_multiple(mut self, allow: impl Into<Provided<bool>>) -> Self {
        self.allow_multiple = Some(allow.into());
        self
    }

    pub fn with_queues(mut self, queues: impl Into<Provided<Vec<String>>>) -> Self {
        self.queues = Some(queues.into());
        self
    }

    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_interrupt_timeout_secs(mut self, secs: impl Into<Provided<f64>>) -> Self {
        self.interrupt_timeout_secs = Some(secs.into());
        self
    }

    /// Append one step to the pipeline. Only usable while the pipeline is a
    /// literal list; a computed pipeline replaces it wholesale.
    pub fn with_step(mut self, step: StepConfig) -> Self {
        match self.steps.take() {
            None => self.steps = Some(Provided::value(vec![step])),
            Some(Provided::Literal(mut steps)) => {
                steps.push(step);
                self.steps = Some(Provided::value(steps));
            }
            Some(computed) => {
                // Keep the computed pipeline; the extra step is a caller bug.
                self.steps = Some(computed);
            }
        }
        self
    }

    pub fn with_steps(mut self, steps: impl Into<Provided<Vec<StepConfig>>>) -> Self {
        self.steps = Some(steps.into());
        self
    }

    pub fn with_resolve(mut self, key: impl Into<String>, value: impl Into<Provided<Value>>) -> Self {
        self.resolve.insert(key.into(), value.into());
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }
}

impl fmt::Debug for TaskConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskConfig")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("resolve_keys", &self.resolve.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Engine-wide defaults for per-step error policies.
#[derive(Debug, Clone)]
pub struct ErrorConfigDefaults {
    /// Period of the default retry interval.
    pub schedule_period_millis: u64,
    /// Trigger bound of the default retry interval; negative means unbounded.
    pub schedule_max_triggers: i64,
    pub max_num_fails: u32,
    pub skip: bool,
    pub continue_on_final_fail: bool,
}

impl Default for ErrorConfigDefaults {
    fn default() -> Self {
        Self {
            schedule_period_millis: 30_000,
            schedule_max_triggers: 3,
            max_num_fails: 3,
            skip: false,
            continue_on_final_fail: false,
        }
    }
}

impl ErrorConfigDefaults {
    /// A fresh instance of the default recovery schedule.
    pub fn default_schedule(&self) -> Schedule {
        Schedule::interval(self.schedule_period_millis, self.schedule_max_triggers, false)
    }
}

/// Defaults applied while resolving task configurations.
#[derive(Debug, Clone, Default)]
pub struct CameleerDefaults {
    pub error: ErrorConfigDefaults,
}

/// A fully materialized per-step error policy.
#[derive(Clone)]
pub struct ResolvedErrorConfig {
    pub schedule: Schedule,
    pub max_num_fails: u32,
    pub skip: bool,
    pub continue_on_final_fail: bool,
}

impl fmt::Debug for ResolvedErrorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedErrorConfig")
            .field("schedule", &self.schedule.kind_name())
            .field("max_num_fails", &self.max_num_fails)
            .field("skip", &self.skip)
            .field("continue_on_final_fail", &self.continue_on_final_fail)
            .finish()
    }
}

/// A step normalized to its full record shape.
#[derive(Clone)]
pub struct ResolvedStep {
    pub name: String,
    pub func: StepFn,
    /// Resolved lazily when the attempt starts.
    pub args: Option<Provided<Vec<Value>>>,
    /// Materialized lazily when the attempt's regular try fails.
    pub can_fail: CanFail,
}

impl fmt::Debug for ResolvedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedStep")
            .field("name", &self.name)
            .field("can_fail", &self.can_fail)
            .finish()
    }
}

/// The materialized counterpart of a [`TaskConfig`], produced fresh on every
/// firing and never cached.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub name: String,
    pub type_name: String,
    pub skip: bool,
    pub cost: Option<f64>,
    pub allow_multiple: bool,
    pub queues: Vec<String>,
    pub interrupt_timeout_secs: Option<f64>,
    /// Carried through untouched; consumers downcast it themselves.
    pub progress: Option<ProgressHandle>,
    pub steps: Vec<ResolvedStep>,
    /// The materialized resolve bag, exposed to step bodies through the job.
    pub resolved: Arc<HashMap<String, Value>>,
    /// The defaults lazy per-step error policies materialize against.
    pub defaults: CameleerDefaults,
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("name", &self.name)
            .field("skip", &self.skip)
            .field("cost", &self.cost)
            .field("allow_multiple", &self.allow_multiple)
            .field("queues", &self.queues)
            .field("steps", &self.steps.iter().map(|s| &s.name).collect::<Vec<_>>())
            .finish()
    }
}
