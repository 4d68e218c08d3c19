//! Keep-alive timer.
//!
//! A single timer armed at the next local-midnight boundary; on fire it logs
//! a day marker and rearms. Its sole purpose is keeping the host runtime
//! alive while the engine has no other activity.

use std::time::Duration;

use chrono::{Days, Local, TimeZone};
use tokio::task::JoinHandle;

use cameleer_core::Logger;

/// Arm the keep-alive. Abort the handle to disarm.
pub fn arm(logger: Logger) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(until_next_local_midnight()).await;
            logger.info(format!("--- {} ---", Local::now().format("%Y-%m-%d")));
        }
    })
}

fn until_next_local_midnight() -> Duration {
    let now = Local::now();
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .expect("date range");
    let midnight = tomorrow.and_hms_opt(0, 0, 0).expect("valid midnight");
    let next = now
        .timezone()
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or_else(|| now + chrono::Duration::days(1));
    (next - now).to_std().unwrap_or(Duration::from_secs(1))
}
