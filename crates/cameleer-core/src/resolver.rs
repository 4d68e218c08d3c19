//! Config resolution.
//!
//! Turns a task's declarative configuration into a fully materialized run
//! configuration. The `resolve` bag is evaluated first, concurrently; every
//! other slot then resolves sequentially with the bag in scope. Each slot is
//! a loop over [`Provided`] shapes with a bounded depth, so self-referential
//! configurations fail instead of hanging.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::try_join_all;
use serde_json::Value;

use crate::config::{
    CameleerDefaults, CanFail, ErrorConfigDefaults, Provided, ResolveCtx, ResolvedConfig,
    ResolvedErrorConfig, ResolvedStep, StepConfig,
};
use crate::error::ResolveError;
use crate::task::Task;

/// Upper bound on compute-chain length per slot.
pub const MAX_RESOLVE_DEPTH: usize = 32;

/// Resolve one slot to its value.
pub async fn provided_to_value<T: Clone>(
    slot: &Provided<T>,
    ctx: &ResolveCtx,
) -> Result<T, ResolveError> {
    let mut current = slot.clone();
    for _ in 0..MAX_RESOLVE_DEPTH {
        match current {
            Provided::Literal(value) => return Ok(value),
            Provided::Compute(f) => current = f(ctx.clone()).await?,
        }
    }
    Err(ResolveError::DepthExceeded)
}

/// Resolve an optional slot, falling back to `default` when absent.
pub async fn optional_to_value<T: Clone>(
    default: T,
    slot: Option<&Provided<T>>,
    ctx: &ResolveCtx,
) -> Result<T, ResolveError> {
    match slot {
        None => Ok(default),
        Some(slot) => provided_to_value(slot, ctx).await,
    }
}

/// Materialize a task's configuration for one firing.
pub async fn resolve(
    task: &Arc<Task>,
    defaults: &CameleerDefaults,
) -> Result<ResolvedConfig, ResolveError> {
    let config = task.config();

    // The resolve bag first, concurrently; its failures propagate.
    let bag_ctx = ResolveCtx {
        resolved: Arc::new(HashMap::new()),
        task: Arc::clone(task),
    };
    let entries = try_join_all(config.resolve.iter().map(|(key, slot)| {
        let bag_ctx = bag_ctx.clone();
        async move { Ok::<_, ResolveError>((key.clone(), provided_to_value(slot, &bag_ctx).await?)) }
    }))
    .await?;
    let resolved: Arc<HashMap<String, Value>> = Arc::new(entries.into_iter().collect());

    let ctx = ResolveCtx {
        resolved: Arc::clone(&resolved),
        task: Arc::clone(task),
    };

    let skip = optional_to_value(false, config.skip.as_ref(), &ctx).await?;
    let cost = match config.cost.as_ref() {
        None => None,
        Some(slot) => Some(provided_to_value(slot, &ctx).await?),
    };
    let allow_multiple = optional_to_value(false, config.allow_multiple.as_ref(), &ctx).await?;
    let queues = optional_to_value(Vec::new(), config.queues.as_ref(), &ctx).await?;
    let interrupt_timeout_secs = match config.interrupt_timeout_secs.as_ref() {
        None => None,
        Some(slot) => Some(provided_to_value(slot, &ctx).await?),
    };
    let step_configs = optional_to_value(Vec::new(), config.steps.as_ref(), &ctx).await?;

    let steps = step_configs
        .into_iter()
        .enumerate()
        .map(|(index, step)| normalize_step(index, step))
        .collect();

    Ok(ResolvedConfig {
        name: config.name.clone(),
        type_name: config.type_name.clone(),
        skip,
        cost,
        allow_multiple,
        queues,
        interrupt_timeout_secs,
        progress: config.progress.clone(),
        steps,
        resolved,
        defaults: defaults.clone(),
    })
}

/// Normalize one step to the full record shape.
fn normalize_step(index: usize, step: StepConfig) -> ResolvedStep {
    ResolvedStep {
        name: step.name.unwrap_or_else(|| format!("step-{}", index + 1)),
        func: step.func,
        args: step.args,
        can_fail: step.can_fail,
    }
}

/// Materialize a step's error policy against the engine defaults.
///
/// Each recognized key copies from its own field only; unset fields take the
/// defaults' values.
pub async fn resolve_error_config(
    can_fail: &CanFail,
    defaults: &ErrorConfigDefaults,
    ctx: &ResolveCtx,
) -> Result<ResolvedErrorConfig, ResolveError> {
    match can_fail {
        CanFail::Deny => Ok(ResolvedErrorConfig {
            schedule: defaults.default_schedule(),
            max_num_fails: 0,
            skip: false,
            continue_on_final_fail: false,
        }),
        CanFail::Allow => Ok(ResolvedErrorConfig {
            schedule: defaults.default_schedule(),
            max_num_fails: defaults.max_num_fails,
            skip: defaults.skip,
            continue_on_final_fail: true,
        }),
        CanFail::UseDefaults => Ok(ResolvedErrorConfig {
            schedule: defaults.default_schedule(),
            max_num_fails: defaults.max_num_fails,
            skip: defaults.skip,
            continue_on_final_fail: defaults.continue_on_final_fail,
        }),
        CanFail::Spec(spec) => {
            let schedule = match spec.schedule.as_ref() {
                Some(slot) => provided_to_value(slot, ctx).await?,
                None => defaults.default_schedule(),
            };
            Ok(ResolvedErrorConfig {
                schedule,
                max_num_fails: spec.max_num_fails.unwrap_or(defaults.max_num_fails),
                skip: spec.skip.unwrap_or(defaults.skip),
                continue_on_final_fail: spec
                    .continue_on_final_fail
                    .unwrap_or(defaults.continue_on_final_fail),
            })
        }
    }
}
