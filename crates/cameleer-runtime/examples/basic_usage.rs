//! Basic usage example for Cameleer
//!
//! This example demonstrates:
//! - Declaring tasks with steps, a resolve bag and an error policy
//! - Driving a manual schedule by hand
//! - Observing the engine's work-event stream
//! - A clean shutdown persisting the static task context

use std::sync::Arc;

use serde_json::json;

use cameleer_config::{CameleerConfig, ConfigProvider};
use cameleer_core::{
    CanFail, ErrorConfigSpec, Job, ManualSchedule, Provided, Schedule, StepConfig, TaskConfig,
    Thrown,
};
use cameleer_runtime::Cameleer;

struct ExampleProvider {
    tasks: Vec<TaskConfig>,
}

impl ConfigProvider for ExampleProvider {
    fn cameleer_config(&self) -> CameleerConfig {
        CameleerConfig::default()
    }

    fn all_task_configs(&self) -> Vec<TaskConfig> {
        self.tasks.clone()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Cameleer Basic Usage Example ===\n");

    // A manual schedule we trigger by hand below.
    let schedule = Schedule::manual();
    let trigger = schedule.as_manual().unwrap().clone();

    // A recovery schedule for the flaky step.
    let recovery = ManualSchedule::new();

    let greet = TaskConfig::new("greet", schedule)
        .with_resolve("who", json!("Cameleer"))
        .with_step(StepConfig::named("compose", |_args, job: Arc<Job>| async move {
            let who = job
                .resolved("who")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            job.context_set("greeting", json!(format!("Hello, {}!", who)));
            Ok(json!("composed"))
        }))
        .with_step(
            StepConfig::named("deliver", |_args, job: Arc<Job>| async move {
                // Fails the first time; the recovery schedule retries it.
                if job.context_get("delivered").is_none() {
                    job.context_set("delivered", json!(true));
                    return Err(Thrown::from("delivery failed, try again"));
                }
                Ok(job.context_get("greeting").unwrap_or(json!(null)))
            })
            .with_can_fail(CanFail::Spec(
                ErrorConfigSpec::new()
                    .with_schedule(Provided::value(Schedule::Manual(recovery.clone())))
                    .with_max_num_fails(2),
            )),
        );

    let engine = Cameleer::new(Arc::new(ExampleProvider { tasks: vec![greet] }))?;
    let loaded = engine.load_tasks().await?;
    println!("Loaded {} task(s)", loaded);

    let mut events = engine.work_events();
    engine.run();

    // Fire the task, then drive the recovery once the first delivery fails.
    trigger.trigger();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    recovery.trigger();

    loop {
        let event = events.recv().await?;
        println!("work event: {} task={} job={:?}", event.kind, event.task, event.job_id);
        if event.kind == cameleer_runtime::WorkEventKind::Done {
            let job = event.job.expect("job handle");
            println!("job result: {:?}", job.result().map(|r| r.value().clone()));
            break;
        }
    }

    engine.shutdown().await;
    println!("\nShutdown complete");
    Ok(())
}
