//! The engine.
//!
//! Lifecycle: tasks are loaded once, queues start paused and are resumed by
//! `run`, and every schedule firing walks the same path: resolve the task's
//! configuration, check skip and overlap, open the interruption window if
//! configured, select a queue, submit the job and republish its transitions
//! as work events.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use cameleer_config::{CameleerConfig, ConfigError, ConfigProvider};
use cameleer_core::{
    provided_to_value, resolve, CameleerDefaults, Job, Logger, RecoveryScheduler, RegistryError,
    ResolveCtx, ResolveError, ResolvedConfig, Schedule, ScheduleError, ScheduleEvent,
    ScheduleEventKind, ScheduleId, SchedulePulse, Task, TaskConfig, TaskDescriptor, TaskRegistry,
};
use cameleer_queues::{CameleerQueue, QueueEvent};
use cameleer_sched::SchedulerHub;

use crate::context_store::StaticContextStore;
use crate::control::Control;
use crate::events::WorkEvent;
use crate::host::{HostHooks, PanicLogHooks};
use crate::keepalive;
use crate::manager::{builtin_managers, Manager, ManagerFactory};

/// Capacity of the work-event channel.
const WORK_CHANNEL_CAPACITY: usize = 1024;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("tasks are already loaded")]
    TasksAlreadyLoaded,

    #[error("duplicate task name '{0}'")]
    DuplicateTask(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("queue selection failed: {0}")]
    QueueSelection(String),

    #[error("job {0} is not in an interruptable window")]
    NotInterruptable(u64),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

struct LoadedTask {
    task: Arc<Task>,
    schedule_id: ScheduleId,
    listener: JoinHandle<()>,
    /// Jobs of this task currently enqueued or running.
    active: Arc<AtomicUsize>,
}

/// The orchestration engine.
pub struct Cameleer {
    config: CameleerConfig,
    defaults: CameleerDefaults,
    provider: Arc<dyn ConfigProvider>,
    registry: RwLock<TaskRegistry>,
    queues: Vec<Arc<CameleerQueue>>,
    hub: Arc<SchedulerHub>,
    tasks: tokio::sync::Mutex<HashMap<String, LoadedTask>>,
    work_tx: broadcast::Sender<WorkEvent>,
    context_store: Arc<StaticContextStore>,
    interruptables: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
    controls: Mutex<Vec<Arc<dyn Control>>>,
    managers: Mutex<Vec<Arc<dyn Manager>>>,
    manager_kinds: Mutex<cameleer_core::ClassRegistry<ManagerFactory>>,
    host: Option<Arc<dyn HostHooks>>,
    shutdown_done: tokio::sync::Mutex<bool>,
    shutdown_tx: watch::Sender<bool>,
    logger: Logger,
}

impl Cameleer {
    /// Build an engine from its configuration provider.
    pub fn new(provider: Arc<dyn ConfigProvider>) -> Result<Arc<Self>, EngineError> {
        let config = provider.cameleer_config();
        cameleer_config::validate_config(&config)?;
        let defaults = config.defaults();

        let queues: Vec<Arc<CameleerQueue>> = config
            .queues
            .iter()
            .map(|spec| Arc::new(CameleerQueue::from_spec(spec.clone())))
            .collect();

        let context_store = StaticContextStore::open(
            config.static_task_context_path.clone(),
            Duration::from_millis(config.static_task_context_serialize_interval_millis),
        );

        let (work_tx, _) = broadcast::channel(WORK_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let logger = Logger::scoped("Cameleer");

        let host: Option<Arc<dyn HostHooks>> = if config.install_host_handlers {
            Some(Arc::new(PanicLogHooks::new()))
        } else {
            None
        };

        let engine = Arc::new(Self {
            config,
            defaults,
            provider,
            registry: RwLock::new(TaskRegistry::with_base()),
            queues,
            hub: Arc::new(SchedulerHub::new()),
            tasks: tokio::sync::Mutex::new(HashMap::new()),
            work_tx,
            context_store,
            interruptables: Mutex::new(HashMap::new()),
            keep_alive: Mutex::new(None),
            controls: Mutex::new(Vec::new()),
            managers: Mutex::new(Vec::new()),
            manager_kinds: Mutex::new(builtin_managers()),
            host,
            shutdown_done: tokio::sync::Mutex::new(false),
            shutdown_tx,
            logger,
        });

        if let Some(host) = &engine.host {
            host.install(engine.logger.clone());
        }
        engine.init_managers();
        Ok(engine)
    }

    fn init_managers(self: &Arc<Self>) {
        for spec in self.config.managers.clone() {
            let factory = {
                let kinds = self.manager_kinds.lock().expect("manager kinds poisoned");
                kinds
                    .resolve(crate::manager::MANAGER_ROOT, &spec.name)
                    .cloned()
            };
            match factory {
                Some(factory) => match factory(self, &spec) {
                    Ok(manager) => {
                        self.logger.debug(format!("manager '{}' attached", manager.name()));
                        self.managers
                            .lock()
                            .expect("managers poisoned")
                            .push(manager);
                    }
                    Err(e) => {
                        self.logger
                            .error(format!("manager '{}' failed to construct: {}", spec.name, e));
                    }
                },
                None => {
                    self.logger
                        .error(format!("unknown manager kind '{}'", spec.name));
                }
            }
        }
    }

    /// Register a custom task kind before loading tasks.
    pub fn register_task_kind(
        &self,
        name: impl Into<String>,
        descriptor: TaskDescriptor,
        force_override: bool,
    ) -> Result<(), RegistryError> {
        self.registry
            .write()
            .expect("task registry poisoned")
            .register(name, descriptor, force_override)
    }

    /// Register a custom manager kind before construction picks it up.
    pub fn register_manager_kind(
        &self,
        name: impl Into<String>,
        factory: ManagerFactory,
        force_override: bool,
    ) -> Result<(), RegistryError> {
        self.manager_kinds
            .lock()
            .expect("manager kinds poisoned")
            .register(crate::manager::MANAGER_ROOT, name, factory, force_override)
    }

    /// Attach a control endpoint; torn down on shutdown.
    pub fn attach_control(&self, control: Arc<dyn Control>) {
        self.logger.debug(format!("control '{}' attached", control.name()));
        self.controls.lock().expect("controls poisoned").push(control);
    }

    /// A logger configured from the engine's logging policy.
    pub fn get_logger(&self, type_tag: &str) -> Logger {
        Logger::scoped(type_tag)
    }

    /// The engine's configured log level.
    pub fn log_level(&self) -> &str {
        &self.config.log_level
    }

    /// Subscribe to the full work-event stream.
    pub fn work_events(&self) -> broadcast::Receiver<WorkEvent> {
        self.work_tx.subscribe()
    }

    /// A filtered event stream for one task only.
    pub fn observable_for_work(&self, task: &str) -> mpsc::UnboundedReceiver<WorkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut events = self.work_tx.subscribe();
        let task = task.to_string();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.task == task => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
        rx
    }

    fn publish(&self, event: WorkEvent) {
        let _ = self.work_tx.send(event);
    }

    /// Load every enabled task from the provider.
    ///
    /// Duplicate names abort the whole load; any other single task's failure
    /// is logged and skipped without tearing down the rest.
    pub async fn load_tasks(self: &Arc<Self>) -> Result<usize, EngineError> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Err(EngineError::TasksAlreadyLoaded);
        }

        let configs = self.provider.all_task_configs();
        let mut seen = HashSet::new();
        for config in &configs {
            if !seen.insert(config.name.clone()) {
                return Err(EngineError::DuplicateTask(config.name.clone()));
            }
        }

        let mut loaded = 0;
        for config in configs {
            let name = config.name.clone();
            match self.load_one(config).await {
                Ok(Some(entry)) => {
                    tasks.insert(name, entry);
                    loaded += 1;
                }
                Ok(None) => {
                    self.logger.debug(format!("task '{}' is disabled", name));
                }
                Err(e) => {
                    self.logger
                        .error(format!("task '{}' failed to load: {}", name, e));
                }
            }
        }
        self.logger.info(format!("{} task(s) loaded", loaded));
        Ok(loaded)
    }

    async fn load_one(self: &Arc<Self>, config: TaskConfig) -> Result<Option<LoadedTask>, EngineError> {
        let logger = self.get_logger(&format!("{}:{}", config.type_name, config.name));
        let static_context = self
            .context_store
            .handle_for(&config.type_name, &config.name);

        let task = {
            let registry = self.registry.read().expect("task registry poisoned");
            registry.instantiate(config, self.defaults.clone(), logger, Some(static_context))?
        };

        // `enabled` and `schedule` are evaluated exactly once per load.
        let ctx = ResolveCtx {
            resolved: Arc::new(HashMap::new()),
            task: Arc::clone(&task),
        };
        let enabled = provided_to_value(&task.config().enabled, &ctx).await?;
        if !enabled {
            return Ok(None);
        }
        let schedule = provided_to_value(&task.config().schedule, &ctx).await?;
        let schedule_id = schedule.id();

        // The registration's own receiver: subscribed before any driver
        // runs, so an immediately-firing schedule loses nothing.
        let pulses = self.hub.add_schedule(&schedule)?;
        let active = Arc::new(AtomicUsize::new(0));
        let listener = tokio::spawn(Self::listen_for_firings(
            Arc::clone(self),
            Arc::clone(&task),
            pulses,
            Arc::clone(&active),
        ));

        task.logger().debug(format!(
            "task loaded on a {} schedule",
            schedule.kind_name()
        ));
        Ok(Some(LoadedTask {
            task,
            schedule_id,
            listener,
            active,
        }))
    }

    async fn listen_for_firings(
        engine: Arc<Self>,
        task: Arc<Task>,
        mut pulses: broadcast::Receiver<SchedulePulse>,
        active: Arc<AtomicUsize>,
    ) {
        loop {
            match pulses.recv().await {
                Ok(SchedulePulse::Next(event)) => {
                    engine.handle_firing(&task, event, &active).await;
                }
                Ok(SchedulePulse::Error(message)) => {
                    task.logger().error(format!("schedule errored: {}", message));
                }
                Ok(SchedulePulse::Complete) | Err(broadcast::error::RecvError::Closed) => {
                    task.logger().debug("schedule completed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }

    async fn handle_firing(
        self: &Arc<Self>,
        task: &Arc<Task>,
        event: ScheduleEvent,
        active: &Arc<AtomicUsize>,
    ) {
        // Calendar end firings are not task firings.
        if event.kind == ScheduleEventKind::End {
            task.logger().trace("calendar event end discarded");
            return;
        }

        let resolved = match resolve(task, &self.defaults).await {
            Ok(resolved) => resolved,
            Err(e) => {
                task.logger().error(format!("config did not resolve: {}", e));
                return;
            }
        };

        if resolved.skip {
            task.logger().debug("firing skipped");
            return;
        }

        if !resolved.allow_multiple && active.load(Ordering::SeqCst) > 0 {
            task.logger()
                .info("task is already enqueued or running, firing discarded");
            return;
        }

        let job = Job::new(
            Arc::clone(task),
            resolved,
            event,
            Arc::clone(&self.hub) as Arc<dyn RecoveryScheduler>,
        );
        self.publish(WorkEvent::scheduled(task.name(), &job));

        if let Some(secs) = job.config().interrupt_timeout_secs {
            if !self.await_interruption_window(task, &job, secs).await {
                return;
            }
        }

        let queue = match self.select_queue(job.config()) {
            Ok(queue) => queue,
            Err(e) => {
                task.logger().error(e.to_string());
                return;
            }
        };

        self.watch_job(&queue, &job, active);
        active.fetch_add(1, Ordering::SeqCst);
        queue.add_job(Arc::clone(&job));
        task.logger().debug(format!(
            "job {} submitted to queue '{}'",
            job.id(),
            queue.name()
        ));
    }

    /// Publish the interruptable event and race an external interrupt
    /// against the window timer. Returns whether submission proceeds.
    async fn await_interruption_window(&self, task: &Arc<Task>, job: &Arc<Job>, secs: f64) -> bool {
        self.publish(WorkEvent::interruptable(task.name(), job));
        let (interrupt_tx, interrupt_rx) = oneshot::channel();
        self.interruptables
            .lock()
            .expect("interruptables poisoned")
            .insert(job.id(), interrupt_tx);

        let interrupted = tokio::select! {
            result = interrupt_rx => result.is_ok(),
            _ = tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))) => false,
        };
        self.interruptables
            .lock()
            .expect("interruptables poisoned")
            .remove(&job.id());

        if interrupted {
            task.logger()
                .info(format!("job {} interrupted before submission", job.id()));
        }
        !interrupted
    }

    /// Cancel a job still inside its interruption window.
    pub fn interrupt_job(&self, job_id: u64) -> Result<(), EngineError> {
        let sender = self
            .interruptables
            .lock()
            .expect("interruptables poisoned")
            .remove(&job_id)
            .ok_or(EngineError::NotInterruptable(job_id))?;
        sender
            .send(())
            .map_err(|_| EngineError::NotInterruptable(job_id))
    }

    /// Republish this job's queue transitions as work events.
    fn watch_job(&self, queue: &Arc<CameleerQueue>, job: &Arc<Job>, active: &Arc<AtomicUsize>) {
        let mut events = queue.events();
        let work_tx = self.work_tx.clone();
        let job_id = job.id();
        let task_name = job.task_name().to_string();
        let active = Arc::clone(active);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(QueueEvent::Run { job }) if job.id() == job_id => {
                        let _ = work_tx.send(WorkEvent::run(&task_name, &job));
                    }
                    Ok(QueueEvent::Done { job }) if job.id() == job_id => {
                        let _ = work_tx.send(WorkEvent::done(&task_name, &job));
                        active.fetch_sub(1, Ordering::SeqCst);
                        break;
                    }
                    Ok(QueueEvent::Failed { job, error }) if job.id() == job_id => {
                        let _ = work_tx.send(WorkEvent::failed(&task_name, &job, error.to_string()));
                        active.fetch_sub(1, Ordering::SeqCst);
                        break;
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        active.fetch_sub(1, Ordering::SeqCst);
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
    }

    /// Pick the best queue for a resolved configuration.
    ///
    /// Deterministic: given identical engine state and configuration, the
    /// same queue is selected; ties break on configuration order.
    pub fn select_queue(&self, config: &ResolvedConfig) -> Result<Arc<CameleerQueue>, EngineError> {
        let cost = config.cost;
        let appropriate: Vec<Arc<CameleerQueue>> = self
            .queues
            .iter()
            .filter(|queue| match cost {
                Some(cost) => {
                    queue.is_cost()
                        && (cost <= queue.capabilities().unwrap_or(0.0)
                            || queue.allow_exclusive_jobs())
                }
                None => !queue.is_cost(),
            })
            .cloned()
            .collect();

        if config.queues.is_empty() {
            if let Some(queue) = appropriate.iter().find(|q| q.is_default()) {
                return Ok(Arc::clone(queue));
            }
        }
        if appropriate.is_empty() {
            return Err(EngineError::QueueSelection(format!(
                "no appropriate queue for task '{}'",
                config.name
            )));
        }

        let allowed: Vec<Arc<CameleerQueue>> = if config.queues.is_empty() {
            appropriate
        } else {
            appropriate
                .into_iter()
                .filter(|queue| config.queues.iter().any(|name| name == queue.name()))
                .collect()
        };
        if allowed.is_empty() {
            return Err(EngineError::QueueSelection(format!(
                "none of the demanded queues is available for task '{}'",
                config.name
            )));
        }

        // Cost: favor capability, penalize load. Parallel: lowest load.
        let mut best: Option<(f64, Arc<CameleerQueue>)> = None;
        for queue in allowed {
            let score = match cost {
                Some(_) => queue.capabilities().unwrap_or(0.0) / queue.load().max(1.0),
                None => -queue.load(),
            };
            match &best {
                Some((best_score, _)) if score <= *best_score => {}
                _ => best = Some((score, queue)),
            }
        }
        Ok(best.expect("allowed set is nonempty").1)
    }

    /// Resume every queue and arm the keep-alive. Idempotent.
    pub fn run(&self) {
        for queue in &self.queues {
            queue.resume();
        }
        let mut keep_alive = self.keep_alive.lock().expect("keep-alive slot poisoned");
        if keep_alive.is_none() {
            *keep_alive = Some(keepalive::arm(self.logger.clone()));
        }
        self.logger.info("engine running");
    }

    /// Run and resolve once shutdown completes.
    pub async fn run_async(&self) {
        self.run();
        let mut rx = self.shutdown_tx.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Pause every queue; running jobs continue. Idempotent.
    pub fn pause(&self) {
        for queue in &self.queues {
            queue.pause();
        }
        self.logger.info("engine paused");
    }

    /// Pause and await idle on every queue.
    pub async fn pause_wait(&self) {
        self.pause();
        for queue in &self.queues {
            queue.wait_idle().await;
        }
        self.logger.info("all queues idle");
    }

    /// Clear queue backlogs and tear every task's schedule down.
    pub async fn clear_tasks(&self) {
        for queue in &self.queues {
            queue.clear_backlog();
        }
        let mut tasks = self.tasks.lock().await;
        for (_, entry) in tasks.drain() {
            self.hub.remove_schedule(entry.schedule_id);
            entry.listener.abort();
        }
        self.logger.info("tasks cleared");
    }

    /// Full shutdown: quiesce, clear, tear down collaborators and persist
    /// the static context. Single-shot; a second call observes the first's
    /// completion.
    pub async fn shutdown(&self) {
        let mut done = self.shutdown_done.lock().await;
        if *done {
            return;
        }

        self.pause_wait().await;
        self.clear_tasks().await;

        let controls: Vec<_> = self.controls.lock().expect("controls poisoned").drain(..).collect();
        for control in controls {
            control.teardown().await;
        }
        let managers: Vec<_> = self.managers.lock().expect("managers poisoned").drain(..).collect();
        for manager in managers {
            manager.teardown().await;
        }
        if let Some(host) = &self.host {
            host.remove();
        }

        if let Some(handle) = self.keep_alive.lock().expect("keep-alive slot poisoned").take() {
            handle.abort();
        }
        self.context_store.shutdown();

        *done = true;
        let _ = self.shutdown_tx.send(true);
        self.logger.info("shutdown complete");
    }

    /// Every queue idle.
    pub fn is_idle(&self) -> bool {
        self.queues.iter().all(|queue| queue.is_idle())
    }

    /// A loaded task by name.
    pub async fn task(&self, name: &str) -> Option<Arc<Task>> {
        let tasks = self.tasks.lock().await;
        tasks.get(name).map(|entry| Arc::clone(&entry.task))
    }

    /// Names of the loaded tasks, sorted.
    pub async fn task_names(&self) -> Vec<String> {
        let tasks = self.tasks.lock().await;
        let mut names: Vec<String> = tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// The static context store.
    pub fn context_store(&self) -> &Arc<StaticContextStore> {
        &self.context_store
    }

    /// Per-queue snapshots for the command surface.
    pub fn queue_snapshots(&self) -> Value {
        Value::Array(
            self.queues
                .iter()
                .map(|queue| {
                    json!({
                        "name": queue.name(),
                        "is_default": queue.is_default(),
                        "is_cost": queue.is_cost(),
                        "paused": queue.is_paused(),
                        "load": queue.load(),
                        "running": queue.current_jobs().iter().map(|j| j.id()).collect::<Vec<_>>(),
                        "backlog": queue.backlog().iter().map(|j| j.id()).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        )
    }

    /// Invoke a public engine method by name. The command surfaces use this
    /// for everything beyond their fixed verbs.
    pub async fn invoke(&self, method: &str, args: &[String]) -> Result<Value, EngineError> {
        match method {
            "interruptjob" => {
                let job_id = args
                    .first()
                    .and_then(|arg| arg.parse::<u64>().ok())
                    .ok_or_else(|| {
                        EngineError::UnknownCommand("interruptjob <job-id>".to_string())
                    })?;
                self.interrupt_job(job_id)?;
                Ok(json!({ "interrupted": job_id }))
            }
            "isidle" => Ok(json!(self.is_idle())),
            "isworking" => Ok(json!(!self.is_idle())),
            "queues" => Ok(self.queue_snapshots()),
            "tasks" => Ok(json!(self.task_names().await)),
            "loglevel" => Ok(json!(self.log_level())),
            other => Err(EngineError::UnknownCommand(other.to_string())),
        }
    }
}

impl std::fmt::Debug for Cameleer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cameleer")
            .field("queues", &self.queues.len())
            .finish()
    }
}
