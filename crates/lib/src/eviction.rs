//! Optional idle eviction: periodically drop conversations nobody has answered in a while.

use crate::registry::Registry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long a suspended conversation may sit idle, and how often to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

/// Spawn a task that evicts idle conversations every `sweep_interval`. The task ends on its own
/// once the registry is dropped; abort the handle to stop it earlier.
pub fn spawn_idle_sweeper(registry: &Arc<Registry>, policy: IdlePolicy) -> JoinHandle<()> {
    let registry = Arc::downgrade(registry);
    log::info!(
        "idle sweeper: starting (ttl {}s, every {}s)",
        policy.ttl.as_secs(),
        policy.sweep_interval.as_secs()
    );
    tokio::spawn(async move {
        // tokio panics on a zero period.
        let period = policy.sweep_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(registry) = registry.upgrade() else {
                break;
            };
            let evicted = registry.evict_idle(policy.ttl, Utc::now()).await;
            if evicted > 0 {
                log::debug!("idle sweeper: evicted {} conversation(s)", evicted);
            }
        }
        log::info!("idle sweeper: registry dropped, stopping");
    })
}
