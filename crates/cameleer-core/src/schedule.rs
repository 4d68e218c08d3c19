//! Schedule model.
//!
//! A schedule is an event stream of firings. The three kinds (calendar,
//! interval, manual) are a sealed set; the scheduler fan-in routes each to
//! its owning scheduler. Manual schedules drive their own stream and are the
//! preferred test fixture.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

static NEXT_SCHEDULE_ID: AtomicU64 = AtomicU64::new(1);

/// Capacity of a manual schedule's pulse channel.
const MANUAL_CHANNEL_CAPACITY: usize = 64;

/// Identity of one schedule instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ScheduleId(pub u64);

impl ScheduleId {
    fn next() -> Self {
        Self(NEXT_SCHEDULE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Whether a firing marks the begin or the end of an occurrence.
///
/// Only calendars produce `End`; interval and manual firings are all `Begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScheduleEventKind {
    Begin,
    End,
}

/// One firing of a schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleEvent {
    pub schedule: ScheduleId,
    pub kind: ScheduleEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl ScheduleEvent {
    pub fn begin(schedule: ScheduleId) -> Self {
        Self {
            schedule,
            kind: ScheduleEventKind::Begin,
            occurred_at: Utc::now(),
        }
    }

    pub fn end(schedule: ScheduleId) -> Self {
        Self {
            schedule,
            kind: ScheduleEventKind::End,
            occurred_at: Utc::now(),
        }
    }
}

/// Lifecycle pulse on a schedule's stream.
#[derive(Debug, Clone)]
pub enum SchedulePulse {
    Next(ScheduleEvent),
    Error(String),
    Complete,
}

/// Errors at the scheduler seam.
#[derive(Debug, Clone, Error)]
pub enum ScheduleError {
    #[error("unsupported schedule kind: {0}")]
    Unsupported(String),

    #[error("schedule {0:?} is already registered")]
    AlreadyRegistered(ScheduleId),

    #[error("schedule {0:?} is not registered")]
    NotRegistered(ScheduleId),
}

/// A fixed-period schedule, optionally bounded by a trigger count.
///
/// The bounded form is the default recovery schedule for failing steps.
#[derive(Debug, Clone)]
pub struct IntervalSchedule {
    id: ScheduleId,
    pub period: Duration,
    /// `None` means unbounded.
    pub max_triggers: Option<u64>,
    pub trigger_immediately: bool,
}

/// One calendar occurrence; a bounded event carries its end instant.
#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
}

/// A list of dated occurrences with a bounded look-ahead window.
///
/// Occurrences outside the window produce no firings until the window
/// advances over them.
#[derive(Debug, Clone)]
pub struct CalendarSchedule {
    id: ScheduleId,
    pub events: Vec<CalendarEvent>,
    pub look_ahead: chrono::Duration,
}

/// An externally driven schedule.
#[derive(Clone)]
pub struct ManualSchedule {
    id: ScheduleId,
    tx: broadcast::Sender<SchedulePulse>,
}

impl ManualSchedule {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(MANUAL_CHANNEL_CAPACITY);
        Self {
            id: ScheduleId::next(),
            tx,
        }
    }

    /// Fire once, now. No receivers is not an error.
    pub fn trigger(&self) {
        let _ = self.tx.send(SchedulePulse::Next(ScheduleEvent::begin(self.id)));
    }

    /// Signal a schedule error to all listeners.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.tx.send(SchedulePulse::Error(message.into()));
    }

    /// Signal completion to all listeners.
    pub fn complete(&self) {
        let _ = self.tx.send(SchedulePulse::Complete);
    }

    /// Tap this schedule's pulse stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulePulse> {
        self.tx.subscribe()
    }
}

impl Default for ManualSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualSchedule").field("id", &self.id).finish()
    }
}

/// The sealed set of schedule kinds.
#[derive(Debug, Clone)]
pub enum Schedule {
    Calendar(CalendarSchedule),
    Interval(IntervalSchedule),
    Manual(ManualSchedule),
}

impl Schedule {
    /// A fixed-period schedule. `max_triggers < 0` means unbounded.
    pub fn interval(period_millis: u64, max_triggers: i64, trigger_immediately: bool) -> Self {
        Self::Interval(IntervalSchedule {
            id: ScheduleId::next(),
            period: Duration::from_millis(period_millis),
            max_triggers: u64::try_from(max_triggers).ok(),
            trigger_immediately,
        })
    }

    /// A calendar over dated occurrences with the given look-ahead window.
    pub fn calendar(events: Vec<CalendarEvent>, look_ahead: chrono::Duration) -> Self {
        Self::Calendar(CalendarSchedule {
            id: ScheduleId::next(),
            events,
            look_ahead,
        })
    }

    /// An externally driven schedule.
    pub fn manual() -> Self {
        Self::Manual(ManualSchedule::new())
    }

    pub fn id(&self) -> ScheduleId {
        match self {
            Self::Calendar(s) => s.id,
            Self::Interval(s) => s.id,
            Self::Manual(s) => s.id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Calendar(_) => "calendar",
            Self::Interval(_) => "interval",
            Self::Manual(_) => "manual",
        }
    }

    /// The manual handle, when this is a manual schedule.
    pub fn as_manual(&self) -> Option<&ManualSchedule> {
        match self {
            Self::Manual(s) => Some(s),
            _ => None,
        }
    }
}

/// Seam through which run attempts arm recovery schedules.
///
/// The scheduler fan-in implements this; jobs carry it so attempts never
/// depend on a concrete scheduler.
pub trait RecoveryScheduler: Send + Sync {
    /// Register the schedule and return its pulse stream.
    fn arm(&self, schedule: &Schedule) -> Result<broadcast::Receiver<SchedulePulse>, ScheduleError>;

    /// Remove the schedule and stop its firings.
    fn disarm(&self, id: ScheduleId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_ids_are_unique() {
        let a = Schedule::manual();
        let b = Schedule::manual();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_interval_negative_max_triggers_is_unbounded() {
        let schedule = Schedule::interval(100, -1, false);
        match schedule {
            Schedule::Interval(s) => assert_eq!(s.max_triggers, None),
            _ => panic!("expected interval"),
        }
    }

    #[test]
    fn test_manual_trigger_reaches_subscriber() {
        tokio_test::block_on(async {
            let schedule = ManualSchedule::new();
            let mut rx = schedule.subscribe();
            schedule.trigger();
            match rx.recv().await.expect("pulse") {
                SchedulePulse::Next(event) => {
                    assert_eq!(event.kind, ScheduleEventKind::Begin);
                }
                other => panic!("expected next pulse, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_manual_trigger_without_subscribers_is_ok() {
        let schedule = ManualSchedule::new();
        schedule.trigger();
        schedule.complete();
    }
}
