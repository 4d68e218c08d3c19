//! Scheduler for dated occurrences.
//!
//! The driver repeatedly scans the schedule's occurrences within the
//! look-ahead window, sleeps until each upcoming instant and fires a begin
//! or end pulse. Occurrences beyond the window produce nothing until the
//! window advances over them; when every occurrence lies in the past the
//! schedule completes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cameleer_core::{
    CalendarSchedule, ScheduleError, ScheduleEvent, ScheduleEventKind, ScheduleId, SchedulePulse,
};

/// Capacity of a calendar's pulse channel.
const PULSE_CHANNEL_CAPACITY: usize = 64;

/// Upper bound on the idle re-scan interval.
const MAX_RESCAN: Duration = Duration::from_secs(60);

struct ArmedCalendar {
    tx: broadcast::Sender<SchedulePulse>,
    driver: JoinHandle<()>,
}

pub struct CalendarScheduler {
    armed: Mutex<HashMap<ScheduleId, ArmedCalendar>>,
}

impl CalendarScheduler {
    pub fn new() -> Self {
        Self {
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Register a schedule and return its pulse stream.
    ///
    /// The subscription is taken before the driver is spawned: a calendar
    /// whose occurrences all lie in the past completes on the driver's first
    /// poll, and that pulse must not race the caller's subscription.
    pub fn add(
        &self,
        schedule: &CalendarSchedule,
        id: ScheduleId,
    ) -> Result<broadcast::Receiver<SchedulePulse>, ScheduleError> {
        let mut armed = self.armed.lock().expect("calendar scheduler poisoned");
        if armed.contains_key(&id) {
            return Err(ScheduleError::AlreadyRegistered(id));
        }

        let (tx, rx) = broadcast::channel(PULSE_CHANNEL_CAPACITY);
        let driver = tokio::spawn(drive(id, schedule.clone(), tx.clone()));
        armed.insert(id, ArmedCalendar { tx, driver });
        Ok(rx)
    }

    /// Remove a schedule and stop its driver. Returns whether it existed.
    pub fn remove(&self, id: ScheduleId) -> bool {
        let removed = self
            .armed
            .lock()
            .expect("calendar scheduler poisoned")
            .remove(&id);
        match removed {
            Some(entry) => {
                entry.driver.abort();
                true
            }
            None => false,
        }
    }

    pub fn subscribe(
        &self,
        id: ScheduleId,
    ) -> Result<broadcast::Receiver<SchedulePulse>, ScheduleError> {
        let armed = self.armed.lock().expect("calendar scheduler poisoned");
        armed
            .get(&id)
            .map(|entry| entry.tx.subscribe())
            .ok_or(ScheduleError::NotRegistered(id))
    }
}

impl Default for CalendarScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// All instants the schedule produces, tagged begin/end.
fn occurrences(schedule: &CalendarSchedule) -> Vec<(DateTime<Utc>, ScheduleEventKind)> {
    let mut instants = Vec::new();
    for event in &schedule.events {
        instants.push((event.starts_at, ScheduleEventKind::Begin));
        if let Some(ends_at) = event.ends_at {
            instants.push((ends_at, ScheduleEventKind::End));
        }
    }
    instants.sort_by_key(|(at, _)| *at);
    instants
}

async fn drive(id: ScheduleId, schedule: CalendarSchedule, tx: broadcast::Sender<SchedulePulse>) {
    let instants = occurrences(&schedule);
    let mut cursor = Utc::now();

    loop {
        let now = Utc::now();
        let window_end = now + schedule.look_ahead;

        if instants.iter().all(|(at, _)| *at <= cursor) {
            let _ = tx.send(SchedulePulse::Complete);
            return;
        }

        let upcoming: Vec<_> = instants
            .iter()
            .filter(|(at, _)| *at > cursor && *at <= window_end)
            .cloned()
            .collect();

        if upcoming.is_empty() {
            // Nothing inside the window yet; re-scan once it may have moved.
            let rescan = schedule
                .look_ahead
                .to_std()
                .map(|d| d / 2)
                .unwrap_or(MAX_RESCAN)
                .min(MAX_RESCAN)
                .max(Duration::from_millis(10));
            tokio::time::sleep(rescan).await;
            continue;
        }

        for (at, kind) in upcoming {
            let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            tracing::trace!(schedule = ?id, kind = ?kind, "calendar occurrence");
            let _ = tx.send(SchedulePulse::Next(ScheduleEvent {
                schedule: id,
                kind,
                occurred_at: at,
            }));
            cursor = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cameleer_core::{CalendarEvent, Schedule};
    use tokio::time::timeout;

    fn calendar_parts(schedule: &Schedule) -> (&CalendarSchedule, ScheduleId) {
        match schedule {
            Schedule::Calendar(s) => (s, schedule.id()),
            _ => panic!("expected calendar"),
        }
    }

    #[tokio::test]
    async fn test_bounded_event_fires_begin_then_end() {
        let now = Utc::now();
        let schedule = Schedule::calendar(
            vec![CalendarEvent {
                starts_at: now + chrono::Duration::milliseconds(30),
                ends_at: Some(now + chrono::Duration::milliseconds(80)),
            }],
            chrono::Duration::seconds(10),
        );
        let (calendar, id) = calendar_parts(&schedule);
        let scheduler = CalendarScheduler::new();
        let mut rx = scheduler.add(calendar, id).unwrap();

        let kinds = timeout(Duration::from_secs(3), async {
            let mut kinds = Vec::new();
            loop {
                match rx.recv().await.unwrap() {
                    SchedulePulse::Next(event) => kinds.push(event.kind),
                    SchedulePulse::Complete => return kinds,
                    SchedulePulse::Error(e) => panic!("calendar errored: {}", e),
                }
            }
        })
        .await
        .expect("calendar runs out in time");

        assert_eq!(kinds, vec![ScheduleEventKind::Begin, ScheduleEventKind::End]);
    }

    #[tokio::test]
    async fn test_occurrence_outside_look_ahead_does_not_fire() {
        let now = Utc::now();
        let schedule = Schedule::calendar(
            vec![CalendarEvent {
                starts_at: now + chrono::Duration::seconds(3600),
                ends_at: None,
            }],
            chrono::Duration::milliseconds(50),
        );
        let (calendar, id) = calendar_parts(&schedule);
        let scheduler = CalendarScheduler::new();
        let mut rx = scheduler.add(calendar, id).unwrap();

        let fired = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(fired.is_err(), "nothing fires outside the window");
    }

    #[tokio::test]
    async fn test_all_past_occurrences_complete_immediately() {
        let now = Utc::now();
        let schedule = Schedule::calendar(
            vec![CalendarEvent {
                starts_at: now - chrono::Duration::seconds(60),
                ends_at: None,
            }],
            chrono::Duration::seconds(10),
        );
        let (calendar, id) = calendar_parts(&schedule);
        let scheduler = CalendarScheduler::new();
        let mut rx = scheduler.add(calendar, id).unwrap();

        let pulse = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("prompt completion")
            .unwrap();
        assert!(matches!(pulse, SchedulePulse::Complete));
    }

    /// The all-in-the-past completion fires on the driver's first poll,
    /// which on a multi-thread runtime can happen before the spawning
    /// thread's next statement. The receiver from `add` must still see it.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_past_calendar_completion_survives_multi_thread_spawn() {
        let scheduler = CalendarScheduler::new();
        for _ in 0..200 {
            let schedule = Schedule::calendar(
                vec![CalendarEvent {
                    starts_at: Utc::now() - chrono::Duration::seconds(60),
                    ends_at: None,
                }],
                chrono::Duration::seconds(10),
            );
            let (calendar, id) = calendar_parts(&schedule);
            let mut rx = scheduler.add(calendar, id).unwrap();

            let pulse = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("completion is never lost")
                .unwrap();
            assert!(matches!(pulse, SchedulePulse::Complete));
            scheduler.remove(id);
        }
    }
}
