//! Game client lifecycle detection
//!
//! Polls the process table for the configured client executables and turns
//! edges into [`ProcessEvent`]s. A wall-clock jump much larger than the poll
//! interval means the host slept, which is reported as [`ProcessEvent::Resuming`].

mod scan;

pub use scan::running_process_names;

use std::collections::HashSet;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{ConfigSource, SharedConfig};
use crate::orchestrator::OrchestratorHandle;

/// Poll gaps longer than this many intervals are treated as a sleep/resume
const SUSPEND_GAP_FACTOR: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A watched game client appeared
    Started,
    /// The last watched game client exited
    Stopped,
    /// The host is about to sleep
    Suspending,
    /// The host woke up
    Resuming,
}

/// Normalize an executable name for comparison
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    let lower = name.to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

/// Whether any watched executable is among `running`
pub fn any_watched_running(watched: &[String], running: &HashSet<String>) -> bool {
    watched
        .iter()
        .map(|name| normalize_name(name))
        .any(|name| running.contains(&name))
}

/// Edge between two samples, if any
pub fn transition(was_running: bool, is_running: bool) -> Option<ProcessEvent> {
    match (was_running, is_running) {
        (false, true) => Some(ProcessEvent::Started),
        (true, false) => Some(ProcessEvent::Stopped),
        _ => None,
    }
}

/// Whether the wall-clock time between two polls means the host slept
pub fn slept_between(previous: SystemTime, now: SystemTime, interval: Duration) -> bool {
    match now.duration_since(previous) {
        Ok(elapsed) => elapsed > interval * SUSPEND_GAP_FACTOR,
        // Clock moved backwards
        Err(_) => false,
    }
}

/// Executables to watch for the enabled flavours
fn watched_names(shared: &SharedConfig) -> Vec<String> {
    let config = shared.load();
    let mut names = Vec::new();
    if config.flavour.retail_enabled {
        names.push(config.recording.retail_process.clone());
    }
    if config.flavour.classic_enabled {
        names.push(config.recording.classic_process.clone());
    }
    names
}

/// Spawn the process poller
pub fn spawn_process_watcher(shared: SharedConfig, handle: OrchestratorHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_millis(shared.load().recording.process_poll_ms.max(100));
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut was_running = false;
        let mut last_poll = SystemTime::now();
        info!("Watching for game clients every {:?}", interval);

        loop {
            timer.tick().await;

            let now = SystemTime::now();
            if slept_between(last_poll, now, interval) {
                info!("Detected host sleep, resuming");
                if !handle.process_event(ProcessEvent::Resuming) {
                    break;
                }
            }
            last_poll = now;

            let running = tokio::task::spawn_blocking(running_process_names)
                .await
                .unwrap_or_default();
            let is_running = any_watched_running(&watched_names(&shared), &running);

            if let Some(event) = transition(was_running, is_running) {
                debug!("Game client transition: {:?}", event);
                if !handle.process_event(event) {
                    break;
                }
            }
            was_running = is_running;
        }

        debug!("Process watcher stopped");
    })
}
