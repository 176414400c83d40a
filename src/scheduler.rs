//! Cron-driven trigger for the nightly run.
//!
//! The schedule is evaluated in the configured timezone, so "4:20 AM"
//! stays 4:20 AM local across DST transitions.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::learning::LearningLoop;

/// Spawn the scheduler task. It sleeps until each upcoming fire time
/// and runs the loop; runs never overlap because the next sleep is
/// computed only after the previous run returns.
pub fn spawn(
    config: SchedulerConfig,
    learning_loop: Arc<LearningLoop>,
) -> Result<JoinHandle<()>, SchedulerError> {
    let schedule = Schedule::from_str(&config.cron).map_err(|e| SchedulerError::InvalidCron {
        expr: config.cron.clone(),
        reason: e.to_string(),
    })?;
    let timezone = config.timezone;

    info!(cron = %config.cron, %timezone, "scheduler starting");

    Ok(tokio::spawn(async move {
        loop {
            let now = Utc::now().with_timezone(&timezone);
            let Some(next) = schedule.after(&now).next() else {
                warn!("cron schedule yields no future fire times, scheduler stopping");
                break;
            };

            let wait = match (next.with_timezone(&Utc) - Utc::now()).to_std() {
                Ok(wait) => wait,
                // Fire time already passed while computing; run now.
                Err(_) => std::time::Duration::ZERO,
            };

            info!(fire_at = %next, "next learning run scheduled");
            tokio::time::sleep(wait).await;
            learning_loop.run_scheduled().await;
        }
    }))
}
