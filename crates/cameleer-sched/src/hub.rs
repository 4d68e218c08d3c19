//! Scheduler fan-in.
//!
//! The hub owns one scheduler per schedule kind and routes registration,
//! teardown and subscriptions. It also implements the recovery seam so run
//! attempts can arm their retry schedules without knowing which scheduler
//! backs them.

use tokio::sync::broadcast;

use cameleer_core::{RecoveryScheduler, Schedule, ScheduleError, ScheduleId, SchedulePulse};

use crate::calendar::CalendarScheduler;
use crate::interval::IntervalScheduler;
use crate::manual::ManualScheduler;

pub struct SchedulerHub {
    manual: ManualScheduler,
    interval: IntervalScheduler,
    calendar: CalendarScheduler,
}

impl SchedulerHub {
    pub fn new() -> Self {
        Self {
            manual: ManualScheduler::new(),
            interval: IntervalScheduler::new(),
            calendar: CalendarScheduler::new(),
        }
    }

    /// Register a schedule with the scheduler that owns its kind and return
    /// its pulse stream. The subscription exists before any driver runs, so
    /// an immediately-firing schedule cannot lose its first pulse to the
    /// registration itself.
    pub fn add_schedule(
        &self,
        schedule: &Schedule,
    ) -> Result<broadcast::Receiver<SchedulePulse>, ScheduleError> {
        let id = schedule.id();
        match schedule {
            Schedule::Manual(s) => self.manual.add(s, id),
            Schedule::Interval(s) => self.interval.add(s, id),
            Schedule::Calendar(s) => self.calendar.add(s, id),
        }
    }

    /// Remove a schedule wherever it is registered.
    pub fn remove_schedule(&self, id: ScheduleId) -> bool {
        self.manual.remove(id) || self.interval.remove(id) || self.calendar.remove(id)
    }

    /// A further subscription to a registered schedule's pulse stream.
    ///
    /// Late subscribers only see pulses sent after this call; the stream a
    /// consumer must not miss anything on is the one `add_schedule` returns.
    pub fn pulses(&self, id: ScheduleId) -> Result<broadcast::Receiver<SchedulePulse>, ScheduleError> {
        if let Ok(rx) = self.manual.subscribe(id) {
            return Ok(rx);
        }
        if let Ok(rx) = self.interval.subscribe(id) {
            return Ok(rx);
        }
        self.calendar.subscribe(id)
    }
}

impl Default for SchedulerHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryScheduler for SchedulerHub {
    fn arm(&self, schedule: &Schedule) -> Result<broadcast::Receiver<SchedulePulse>, ScheduleError> {
        self.add_schedule(schedule)
    }

    fn disarm(&self, id: ScheduleId) {
        self.remove_schedule(id);
    }
}
