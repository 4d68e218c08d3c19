//! Scheduler for externally driven schedules.
//!
//! A manual schedule owns its own pulse stream; this scheduler only tracks
//! registration so the hub can hand out subscriptions and tear schedules
//! down uniformly.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use cameleer_core::{ManualSchedule, ScheduleError, ScheduleId, SchedulePulse};

pub struct ManualScheduler {
    schedules: Mutex<HashMap<ScheduleId, ManualSchedule>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            schedules: Mutex::new(HashMap::new()),
        }
    }

    /// Register a schedule and return its pulse stream. Subscribing here,
    /// before the call returns, means no pulse can slip past the caller.
    pub fn add(
        &self,
        schedule: &ManualSchedule,
        id: ScheduleId,
    ) -> Result<broadcast::Receiver<SchedulePulse>, ScheduleError> {
        let mut schedules = self.schedules.lock().expect("manual scheduler poisoned");
        if schedules.contains_key(&id) {
            return Err(ScheduleError::AlreadyRegistered(id));
        }
        schedules.insert(id, schedule.clone());
        Ok(schedule.subscribe())
    }

    /// Remove a schedule. Returns whether it was registered.
    pub fn remove(&self, id: ScheduleId) -> bool {
        self.schedules
            .lock()
            .expect("manual scheduler poisoned")
            .remove(&id)
            .is_some()
    }

    pub fn subscribe(
        &self,
        id: ScheduleId,
    ) -> Result<broadcast::Receiver<SchedulePulse>, ScheduleError> {
        let schedules = self.schedules.lock().expect("manual scheduler poisoned");
        schedules
            .get(&id)
            .map(|s| s.subscribe())
            .ok_or(ScheduleError::NotRegistered(id))
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}
