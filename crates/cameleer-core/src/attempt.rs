//! Run attempt: one step's regular try plus schedule-driven recovery.
//!
//! After the regular attempt fails, the step's error policy is materialized
//! and a recovery schedule is armed. Recovery firings are serialized: at most
//! one invocation of the step body is outstanding at any time, and firings
//! that land while an attempt is outstanding are dropped, not queued. A
//! terminal pulse observed during such a drop is deferred and applied once
//! the outstanding attempt returns.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::{ResolveCtx, ResolvedErrorConfig, ResolvedStep};
use crate::error::{AttemptError, FinalFailReason, Thrown};
use crate::job::Job;
use crate::resolver::{provided_to_value, resolve_error_config};
use crate::result::StepResult;
use crate::schedule::SchedulePulse;

/// Executes one step of a job.
pub struct RunAttempt {
    job: Arc<Job>,
    step: ResolvedStep,
    index: usize,
}

impl RunAttempt {
    pub fn new(job: Arc<Job>, step: ResolvedStep, index: usize) -> Self {
        Self { job, step, index }
    }

    /// Run the step to a result, or raise the attempt failure.
    pub async fn run(&self) -> Result<StepResult, AttemptError> {
        let ctx = ResolveCtx {
            resolved: Arc::clone(&self.job.config().resolved),
            task: Arc::clone(self.job.task()),
        };

        let args = match self.step.args.as_ref() {
            None => Vec::new(),
            Some(slot) => provided_to_value(slot, &ctx)
                .await
                .map_err(AttemptError::ResolveArgs)?,
        };

        let cause = match self.invoke(&args).await {
            Ok(value) => return Ok(StepResult::ok(value)),
            Err(thrown) => thrown,
        };
        tracing::debug!(
            job_id = self.job.id(),
            task = %self.job.task_name(),
            step = %self.step.name,
            index = self.index,
            error = %cause,
            "regular attempt failed"
        );

        let err_conf =
            resolve_error_config(&self.step.can_fail, &self.job.config().defaults.error, &ctx)
                .await
                .map_err(AttemptError::ResolveErrConf)?;

        if err_conf.skip {
            tracing::debug!(
                job_id = self.job.id(),
                step = %self.step.name,
                "step error skipped, job continues"
            );
            return Ok(StepResult::err(cause));
        }

        if err_conf.max_num_fails == 0 {
            return Err(AttemptError::FinalFail {
                reason: FinalFailReason::NoRetryAllowed,
                cause,
            });
        }

        match self.recover(&args, &err_conf, cause).await {
            Ok(value) => Ok(StepResult::ok(value)),
            Err((reason, last_cause)) => {
                if err_conf.continue_on_final_fail {
                    tracing::debug!(
                        job_id = self.job.id(),
                        step = %self.step.name,
                        reason = %reason,
                        "recovery exhausted, continuing with error result"
                    );
                    Ok(StepResult::err(last_cause))
                } else {
                    Err(AttemptError::FinalFail {
                        reason,
                        cause: last_cause,
                    })
                }
            }
        }
    }

    async fn invoke(&self, args: &[Value]) -> Result<Value, Thrown> {
        (self.step.func)(args.to_vec(), Arc::clone(&self.job)).await
    }

    /// Drive retries off the recovery schedule until one succeeds, the
    /// budget is reached, or the schedule terminates.
    async fn recover(
        &self,
        args: &[Value],
        conf: &ResolvedErrorConfig,
        first_cause: Thrown,
    ) -> Result<Value, (FinalFailReason, Thrown)> {
        let schedule = conf.schedule.clone();
        let schedule_id = schedule.id();
        let mut rx = match self.job.recovery().arm(&schedule) {
            Ok(rx) => rx,
            Err(e) => {
                return Err((FinalFailReason::ScheduleErrored(e.to_string()), first_cause));
            }
        };

        let mut num_subsequent_fails: u32 = 0;
        let mut last_cause = first_cause;
        let outcome = loop {
            let pulse = match rx.recv().await {
                Ok(pulse) => pulse,
                Err(broadcast::error::RecvError::Closed) => SchedulePulse::Complete,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            };
            match pulse {
                SchedulePulse::Next(_) => {
                    let result = self.invoke(args).await;
                    let deferred_terminal = drain_stale_pulses(&mut rx);
                    match result {
                        Ok(value) => break Ok(value),
                        Err(thrown) => {
                            num_subsequent_fails += 1;
                            last_cause = thrown;
                            tracing::debug!(
                                job_id = self.job.id(),
                                step = %self.step.name,
                                num_subsequent_fails,
                                max_num_fails = conf.max_num_fails,
                                "recovery attempt failed"
                            );
                            if num_subsequent_fails >= conf.max_num_fails {
                                break Err(FinalFailReason::BudgetExhausted);
                            }
                            if let Some(reason) = deferred_terminal {
                                break Err(reason);
                            }
                        }
                    }
                }
                SchedulePulse::Error(message) => {
                    break Err(FinalFailReason::ScheduleErrored(message));
                }
                SchedulePulse::Complete => break Err(FinalFailReason::NoMoreRetries),
            }
        };
        self.job.recovery().disarm(schedule_id);

        outcome.map_err(|reason| (reason, last_cause))
    }
}

/// Drop firings that arrived while an attempt was outstanding. A terminal
/// pulse among them is returned so the caller can apply it.
fn drain_stale_pulses(rx: &mut broadcast::Receiver<SchedulePulse>) -> Option<FinalFailReason> {
    loop {
        match rx.try_recv() {
            Ok(SchedulePulse::Next(_)) => continue,
            Ok(SchedulePulse::Error(message)) => {
                return Some(FinalFailReason::ScheduleErrored(message));
            }
            Ok(SchedulePulse::Complete) => return Some(FinalFailReason::NoMoreRetries),
            Err(broadcast::error::TryRecvError::Empty) => return None,
            Err(broadcast::error::TryRecvError::Closed) => {
                return Some(FinalFailReason::NoMoreRetries);
            }
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CameleerDefaults, CanFail, ErrorConfigSpec, Provided, StepConfig, TaskConfig,
    };
    use crate::error::ResolveError;
    use crate::logging::Logger;
    use crate::resolver::resolve;
    use crate::schedule::{
        ManualSchedule, RecoveryScheduler, Schedule, ScheduleError, ScheduleEvent, ScheduleId,
    };
    use crate::task::Task;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Recovery seam that taps manual schedules directly.
    struct ManualRecovery;

    impl RecoveryScheduler for ManualRecovery {
        fn arm(
            &self,
            schedule: &Schedule,
        ) -> Result<broadcast::Receiver<SchedulePulse>, ScheduleError> {
            match schedule {
                Schedule::Manual(m) => Ok(m.subscribe()),
                other => Err(ScheduleError::Unsupported(other.kind_name().to_string())),
            }
        }

        fn disarm(&self, _id: ScheduleId) {}
    }

    async fn job_with_step(step: StepConfig) -> Arc<Job> {
        let config = TaskConfig::new("t", Schedule::manual()).with_step(step);
        let task = Task::new(config, Logger::scoped("test"), None);
        let resolved = resolve(&task, &CameleerDefaults::default()).await.unwrap();
        Job::new(
            task,
            resolved,
            ScheduleEvent::begin(ScheduleId(0)),
            Arc::new(ManualRecovery),
        )
    }

    fn failing_n_times(
        n: usize,
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(Vec<Value>, Arc<Job>) -> futures_util::future::BoxFuture<'static, Result<Value, Thrown>>
           + Send
           + Sync
           + 'static {
        move |_args, _job| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= n {
                    Err(Thrown::from(format!("failure {}", call)))
                } else {
                    Ok(json!(call))
                }
            })
        }
    }

    #[tokio::test]
    async fn test_successful_step_returns_ok_result() {
        let job = job_with_step(StepConfig::func(|_args, _job| async { Ok(json!(7)) })).await;
        job.run().await.unwrap();
        assert_eq!(job.result().unwrap().value(), &json!(7));
    }

    #[tokio::test]
    async fn test_args_are_resolved_and_passed() {
        let step = StepConfig::func(|args: Vec<Value>, _job| async move {
            Ok(json!(args[0].as_i64().unwrap() + args[1].as_i64().unwrap()))
        })
        .with_args(vec![json!(40), json!(2)]);
        let job = job_with_step(step).await;
        job.run().await.unwrap();
        assert_eq!(job.result().unwrap().value(), &json!(42));
    }

    #[tokio::test]
    async fn test_failing_args_resolution_raises_resolve_args() {
        let step = StepConfig::func(|_args, _job| async { Ok(json!(0)) }).with_args(
            Provided::compute(|_ctx| async {
                Err(ResolveError::CannotResolve("args".to_string()))
            }),
        );
        let job = job_with_step(step).await;
        let err = job.run().await.expect_err("job fails");
        assert!(matches!(err.cause, AttemptError::ResolveArgs(_)));
    }

    #[tokio::test]
    async fn test_failing_error_config_resolution_raises_resolve_err_conf() {
        let step = StepConfig::func(|_args, _job| async { Err(Thrown::from("boom")) })
            .with_can_fail(CanFail::Spec(ErrorConfigSpec::new().with_schedule(
                Provided::compute(|_ctx| async {
                    Err(ResolveError::CannotResolve("no schedule".to_string()))
                }),
            )));
        let job = job_with_step(step).await;
        let err = job.run().await.expect_err("job fails");
        assert!(matches!(err.cause, AttemptError::ResolveErrConf(_)));
    }

    #[tokio::test]
    async fn test_skip_returns_error_result_and_continues() {
        let step = StepConfig::func(|_args, _job| async { Err(Thrown::from("42")) })
            .with_can_fail(CanFail::Spec(ErrorConfigSpec::new().with_skip(true)));
        let job = job_with_step(step).await;
        job.run().await.expect("job done, not failed");
        let result = job.result().unwrap();
        assert!(result.is_error());
        assert_eq!(result.value(), &json!("42"));
    }

    #[tokio::test]
    async fn test_zero_budget_fails_finally_with_original_cause() {
        let step = StepConfig::func(|_args, _job| async { Err(Thrown::from("42")) })
            .with_can_fail(CanFail::Deny);
        let job = job_with_step(step).await;
        let err = job.run().await.expect_err("job fails");
        match err.cause {
            AttemptError::FinalFail { reason, cause } => {
                assert_eq!(reason, FinalFailReason::NoRetryAllowed);
                assert_eq!(cause, Thrown::from("42"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recovery_succeeds_on_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recovery = ManualSchedule::new();
        let step = StepConfig::func(failing_n_times(1, Arc::clone(&calls))).with_can_fail(
            CanFail::Spec(
                ErrorConfigSpec::new()
                    .with_schedule(Schedule::Manual(recovery.clone()))
                    .with_max_num_fails(2),
            ),
        );
        let job = job_with_step(step).await;

        let runner = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.run().await })
        };
        sleep(Duration::from_millis(50)).await;
        recovery.trigger();

        runner.await.unwrap().expect("job done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let result = job.result().unwrap();
        assert!(!result.is_error());
        assert_eq!(result.value(), &json!(2));
    }

    #[tokio::test]
    async fn test_budget_exhausted_with_continue_returns_error_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recovery = ManualSchedule::new();
        let step = StepConfig::func(failing_n_times(usize::MAX, Arc::clone(&calls)))
            .with_can_fail(CanFail::Spec(
                ErrorConfigSpec::new()
                    .with_schedule(Schedule::Manual(recovery.clone()))
                    .with_max_num_fails(2)
                    .with_continue_on_final_fail(true),
            ));
        let job = job_with_step(step).await;

        let runner = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.run().await })
        };
        sleep(Duration::from_millis(50)).await;
        recovery.trigger();
        sleep(Duration::from_millis(50)).await;
        recovery.trigger();

        runner.await.unwrap().expect("job done, not failed");
        // Regular attempt plus the full retry budget.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let result = job.result().unwrap();
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_schedule_complete_ends_recovery() {
        let recovery = ManualSchedule::new();
        let step = StepConfig::func(|_args, _job| async { Err(Thrown::from("down")) })
            .with_can_fail(CanFail::Spec(
                ErrorConfigSpec::new()
                    .with_schedule(Schedule::Manual(recovery.clone()))
                    .with_max_num_fails(5),
            ));
        let job = job_with_step(step).await;

        let runner = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.run().await })
        };
        sleep(Duration::from_millis(50)).await;
        recovery.complete();

        let err = runner.await.unwrap().expect_err("job fails");
        match err.cause {
            AttemptError::FinalFail { reason, .. } => {
                assert_eq!(reason, FinalFailReason::NoMoreRetries);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_schedule_error_ends_recovery() {
        let recovery = ManualSchedule::new();
        let step = StepConfig::func(|_args, _job| async { Err(Thrown::from("down")) })
            .with_can_fail(CanFail::Spec(
                ErrorConfigSpec::new()
                    .with_schedule(Schedule::Manual(recovery.clone()))
                    .with_max_num_fails(5),
            ));
        let job = job_with_step(step).await;

        let runner = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.run().await })
        };
        sleep(Duration::from_millis(50)).await;
        recovery.fail("clock broke");

        let err = runner.await.unwrap().expect_err("job fails");
        match err.cause {
            AttemptError::FinalFail { reason, .. } => {
                assert_eq!(
                    reason,
                    FinalFailReason::ScheduleErrored("clock broke".to_string())
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_firing_buffered_before_complete_is_not_lost() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recovery = ManualSchedule::new();
        let step = StepConfig::func(failing_n_times(1, Arc::clone(&calls))).with_can_fail(
            CanFail::Spec(
                ErrorConfigSpec::new()
                    .with_schedule(Schedule::Manual(recovery.clone()))
                    .with_max_num_fails(3),
            ),
        );
        let job = job_with_step(step).await;

        let runner = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.run().await })
        };
        sleep(Duration::from_millis(50)).await;
        // The firing and the completion land back to back; the firing wins.
        recovery.trigger();
        recovery.complete();

        runner.await.unwrap().expect("job done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_firings_during_outstanding_attempt_are_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recovery = ManualSchedule::new();
        let step = {
            let calls = Arc::clone(&calls);
            StepConfig::func(move |_args, _job| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(120)).await;
                    Err(Thrown::from("still down"))
                }
            })
        }
        .with_can_fail(CanFail::Spec(
            ErrorConfigSpec::new()
                .with_schedule(Schedule::Manual(recovery.clone()))
                .with_max_num_fails(10),
        ));
        let job = job_with_step(step).await;

        let runner = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.run().await })
        };
        // Let the regular attempt fail and the recovery arm.
        sleep(Duration::from_millis(180)).await;
        recovery.trigger();
        sleep(Duration::from_millis(30)).await;
        // These land while the recovery attempt is still outstanding.
        recovery.trigger();
        recovery.trigger();
        sleep(Duration::from_millis(200)).await;
        recovery.complete();

        let err = runner.await.unwrap().expect_err("job fails");
        match err.cause {
            AttemptError::FinalFail { reason, .. } => {
                assert_eq!(reason, FinalFailReason::NoMoreRetries);
            }
            other => panic!("unexpected {:?}", other),
        }
        // Regular attempt + one recovery attempt; the burst was dropped.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
