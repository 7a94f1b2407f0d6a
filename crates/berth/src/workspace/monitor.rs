//! Periodic liveness sweep over running workspaces.
//!
//! The exit watcher catches most deaths the moment they happen; this
//! monitor is the backstop for processes that vanish without the watcher
//! noticing (e.g. a reparented child after a launcher double-fork). It
//! stands down as soon as shutdown begins so it never races the ordered
//! teardown.

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::workspace::supervisor::WorkspaceSupervisor;

pub(crate) fn spawn(supervisor: WorkspaceSupervisor) -> JoinHandle<()> {
    let health = &supervisor.config().health;
    let enabled = health.enabled;
    let interval = health.interval();
    tokio::spawn(async move {
        if !enabled {
            debug!("health monitor disabled by configuration");
            return;
        }
        debug!("health monitor running every {}s", interval.as_secs());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; skip it so
        // freshly started workspaces get a full period before the first probe.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if supervisor.is_shutting_down() {
                debug!("health monitor stopping: shutdown in progress");
                break;
            }
            supervisor.health_check_once();
        }
    })
}
