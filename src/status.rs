//! Composite status shown to the user
//!
//! Status is never stored: it is derived from the orchestrator flags, the
//! activity aggregator and the engine state each time it may have changed.

use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::{EngineState, MicStatus};
use crate::store::CloudUsage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CompositeStatus {
    Reconfiguring,
    InvalidConfig(String),
    Overrunning,
    /// Mid-activity, capture is being persisted
    Recording,
    /// Buffering, no activity
    ReadyToRecord,
    /// Engine not armed
    WaitingForCaptureTarget,
}

impl fmt::Display for CompositeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeStatus::Reconfiguring => write!(f, "Reconfiguring"),
            CompositeStatus::InvalidConfig(reason) => write!(f, "Invalid config: {}", reason),
            CompositeStatus::Overrunning => write!(f, "Overrunning"),
            CompositeStatus::Recording => write!(f, "Recording"),
            CompositeStatus::ReadyToRecord => write!(f, "Ready to record"),
            CompositeStatus::WaitingForCaptureTarget => write!(f, "Waiting for game"),
        }
    }
}

/// Everything status is derived from
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub reconfiguring: bool,
    pub config_valid: bool,
    pub config_message: &'a str,
    pub any_overrunning: bool,
    pub any_active: bool,
    pub engine_state: EngineState,
}

/// First match wins
pub fn compute_status(inputs: &StatusInputs<'_>) -> CompositeStatus {
    if inputs.reconfiguring {
        return CompositeStatus::Reconfiguring;
    }
    if !inputs.config_valid {
        return CompositeStatus::InvalidConfig(inputs.config_message.to_string());
    }
    if inputs.any_overrunning {
        return CompositeStatus::Overrunning;
    }
    if inputs.any_active {
        return CompositeStatus::Recording;
    }
    match inputs.engine_state {
        EngineState::Recording => CompositeStatus::ReadyToRecord,
        EngineState::Offline | EngineState::Starting | EngineState::Stopping => {
            CompositeStatus::WaitingForCaptureTarget
        }
    }
}

/// What observers receive
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub status: CompositeStatus,
    pub mic: MicStatus,
    pub cloud_usage: Option<CloudUsage>,
}

/// Broadcasts status updates, dropping consecutive duplicates
pub struct StatusPublisher {
    tx: broadcast::Sender<StatusUpdate>,
    last: Option<StatusUpdate>,
}

impl StatusPublisher {
    pub fn new(tx: broadcast::Sender<StatusUpdate>) -> Self {
        Self { tx, last: None }
    }

    pub fn publish(&mut self, update: StatusUpdate) {
        if self.last.as_ref() == Some(&update) {
            return;
        }
        debug!("Status: {} (mic {:?})", update.status, update.mic);
        // No subscribers is fine
        let _ = self.tx.send(update.clone());
        self.last = Some(update);
    }
}
