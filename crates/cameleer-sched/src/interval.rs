//! Scheduler for fixed-period schedules.
//!
//! Each registered interval gets its own driver task firing `Next` pulses
//! until the trigger bound is reached, then a final `Complete`. Removing the
//! schedule aborts the driver.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cameleer_core::{
    IntervalSchedule, ScheduleError, ScheduleEvent, ScheduleId, SchedulePulse,
};

/// Capacity of an interval's pulse channel.
const PULSE_CHANNEL_CAPACITY: usize = 64;

struct ArmedInterval {
    tx: broadcast::Sender<SchedulePulse>,
    driver: JoinHandle<()>,
}

pub struct IntervalScheduler {
    armed: Mutex<HashMap<ScheduleId, ArmedInterval>>,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self {
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Register a schedule and return its pulse stream.
    ///
    /// The subscription is taken before the driver is spawned: an immediate
    /// first firing cannot land while nobody is listening, even when the
    /// driver runs on another worker thread.
    pub fn add(
        &self,
        schedule: &IntervalSchedule,
        id: ScheduleId,
    ) -> Result<broadcast::Receiver<SchedulePulse>, ScheduleError> {
        let mut armed = self.armed.lock().expect("interval scheduler poisoned");
        if armed.contains_key(&id) {
            return Err(ScheduleError::AlreadyRegistered(id));
        }

        let (tx, rx) = broadcast::channel(PULSE_CHANNEL_CAPACITY);
        let driver = tokio::spawn(drive(
            id,
            schedule.period.max(Duration::from_millis(1)),
            schedule.max_triggers,
            schedule.trigger_immediately,
            tx.clone(),
        ));
        armed.insert(id, ArmedInterval { tx, driver });
        Ok(rx)
    }

    /// Remove a schedule and stop its driver. Returns whether it existed.
    pub fn remove(&self, id: ScheduleId) -> bool {
        let removed = self
            .armed
            .lock()
            .expect("interval scheduler poisoned")
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
        let armed = self.armed.lock().expect("interval scheduler poisoned");
        armed
            .get(&id)
            .map(|entry| entry.tx.subscribe())
            .ok_or(ScheduleError::NotRegistered(id))
    }
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn drive(
    id: ScheduleId,
    period: Duration,
    max_triggers: Option<u64>,
    trigger_immediately: bool,
    tx: broadcast::Sender<SchedulePulse>,
) {
    let mut fired: u64 = 0;

    if max_triggers == Some(0) {
        let _ = tx.send(SchedulePulse::Complete);
        return;
    }

    if trigger_immediately {
        let _ = tx.send(SchedulePulse::Next(ScheduleEvent::begin(id)));
        fired += 1;
        if Some(fired) == max_triggers {
            let _ = tx.send(SchedulePulse::Complete);
            return;
        }
    }

    loop {
        tokio::time::sleep(period).await;
        let _ = tx.send(SchedulePulse::Next(ScheduleEvent::begin(id)));
        fired += 1;
        if Some(fired) == max_triggers {
            let _ = tx.send(SchedulePulse::Complete);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cameleer_core::Schedule;
    use tokio::time::timeout;

    fn interval_parts(schedule: &Schedule) -> (&IntervalSchedule, ScheduleId) {
        match schedule {
            Schedule::Interval(s) => (s, schedule.id()),
            _ => panic!("expected interval"),
        }
    }

    #[tokio::test]
    async fn test_bounded_interval_fires_then_completes() {
        let scheduler = IntervalScheduler::new();
        let schedule = Schedule::interval(10, 2, false);
        let (interval, id) = interval_parts(&schedule);
        let mut rx = scheduler.add(interval, id).unwrap();

        let mut nexts = 0;
        let completed = timeout(Duration::from_secs(3), async {
            loop {
                match rx.recv().await.unwrap() {
                    SchedulePulse::Next(_) => nexts += 1,
                    SchedulePulse::Complete => return true,
                    SchedulePulse::Error(_) => return false,
                }
            }
        })
        .await
        .expect("completes in time");

        assert!(completed);
        assert_eq!(nexts, 2);
    }

    #[tokio::test]
    async fn test_trigger_immediately_fires_without_waiting_a_period() {
        let scheduler = IntervalScheduler::new();
        let schedule = Schedule::interval(60_000, 1, true);
        let (interval, id) = interval_parts(&schedule);
        let mut rx = scheduler.add(interval, id).unwrap();

        let pulse = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("prompt firing")
            .unwrap();
        assert!(matches!(pulse, SchedulePulse::Next(_)));
    }

    #[tokio::test]
    async fn test_zero_trigger_bound_completes_immediately() {
        let scheduler = IntervalScheduler::new();
        let schedule = Schedule::interval(10, 0, false);
        let (interval, id) = interval_parts(&schedule);
        let mut rx = scheduler.add(interval, id).unwrap();

        let pulse = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("prompt completion")
            .unwrap();
        assert!(matches!(pulse, SchedulePulse::Complete));
    }

    /// On a multi-thread runtime the driver can outrun the spawning thread
    /// and send the immediate first firing straight away, so the receiver
    /// `add` hands out must already be subscribed when the driver starts.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_immediate_firing_survives_multi_thread_spawn() {
        let scheduler = IntervalScheduler::new();
        for _ in 0..200 {
            let schedule = Schedule::interval(60_000, 1, true);
            let (interval, id) = interval_parts(&schedule);
            let mut rx = scheduler.add(interval, id).unwrap();

            let pulse = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("first firing is never lost")
                .unwrap();
            assert!(matches!(pulse, SchedulePulse::Next(_)));
            scheduler.remove(id);
        }
    }

    /// Same race, terminal pulse: a zero-bound interval completes at once,
    /// and that `Complete` must reach the receiver handed out by `add`.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_immediate_completion_survives_multi_thread_spawn() {
        let scheduler = IntervalScheduler::new();
        for _ in 0..200 {
            let schedule = Schedule::interval(10, 0, false);
            let (interval, id) = interval_parts(&schedule);
            let mut rx = scheduler.add(interval, id).unwrap();

            let pulse = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("completion is never lost")
                .unwrap();
            assert!(matches!(pulse, SchedulePulse::Complete));
            scheduler.remove(id);
        }
    }

    #[tokio::test]
    async fn test_remove_stops_firing() {
        let scheduler = IntervalScheduler::new();
        let schedule = Schedule::interval(20, -1, false);
        let (interval, id) = interval_parts(&schedule);
        scheduler.add(interval, id).unwrap();
        assert!(scheduler.remove(id));
        assert!(!scheduler.remove(id));
        assert!(matches!(
            scheduler.subscribe(id),
            Err(ScheduleError::NotRegistered(_))
        ));
    }
}
