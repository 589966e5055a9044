//! Background sweep of expired query sessions.
//!
//! The task holds a `Weak<SessionManager>` and exits on its next tick once
//! the manager has been dropped.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::query::manager::SessionManager;

/// Spawn a task that sweeps `manager` every `period`.
///
/// # Invariants
/// - Uses a `Weak` reference so the task never keeps the manager alive
/// - The first sweep happens one full period after spawning
pub fn spawn_sweeper(
    manager: Weak<SessionManager>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        sweep_loop(manager, period).await;
    })
}

async fn sweep_loop(manager: Weak<SessionManager>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.sweep_expired();
    }
}
