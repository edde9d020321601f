//! Background demotion of users whose clients stopped heartbeating without
//! closing their connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::presence::PresenceTracker;

/// Run [`PresenceTracker::sweep_inactive`] every `period` for the life of
/// the process. Resulting offline statuses reach clients through the
/// tracker's status channel.
pub fn spawn_sweeper(
    presence: Arc<PresenceTracker>,
    period: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    info!(
        period_ms = period.as_millis() as u64,
        timeout_ms = timeout.as_millis() as u64,
        "Starting inactivity sweeper"
    );

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let demoted = presence.sweep_inactive(timeout);
            if demoted.is_empty() {
                debug!(online = presence.online_count(), "Sweep found no stale users");
            } else {
                info!(demoted = demoted.len(), "Sweep demoted stale users");
            }
        }
    })
}
