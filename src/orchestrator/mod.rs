//! Orchestrator - owns the engine, the activity sources and the pipeline
//!
//! Everything that touches live session state goes through the command
//! channel and is serialized by a single loop.

mod control;
mod gate;
mod restart;
mod supervisor;


pub use control::{Orchestrator, OrchestratorParts};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use crate::process::ProcessEvent;
use crate::status::StatusUpdate;
use crate::store::StoredVideo;

/// Best-effort edits on stored videos
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreMutation {
    Tag { name: String, tag: String },
    Protect { name: String, protected: bool },
    Delete { name: String },
}

/// Commands that can be sent to the orchestrator
#[derive(Debug)]
pub enum OrchestratorCommand {
    /// Settings may have changed, run the pipeline
    Reconcile,
    /// End every in-progress activity now
    ForceStop,
    /// Drive a synthetic activity through the preferred source
    TestActivity { end_test: bool },
    /// Game client lifecycle or host power event
    Process(ProcessEvent),
    /// Fetch fresh cloud usage for the status feed
    RefreshCloudUsage,
    /// List videos in cloud storage
    ListVideos(oneshot::Sender<Vec<StoredVideo>>),
    Store(StoreMutation),
    /// Shutdown the orchestrator
    Shutdown,
}

/// Cloneable sender side of the command channel
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<OrchestratorCommand>,
}

impl OrchestratorHandle {
    pub fn new(tx: mpsc::UnboundedSender<OrchestratorCommand>) -> Self {
        Self { tx }
    }

    pub fn send(&self, cmd: OrchestratorCommand) -> bool {
        match self.tx.send(cmd) {
            Ok(()) => true,
            Err(e) => {
                warn!("Orchestrator is gone, dropped command {:?}", e.0);
                false
            }
        }
    }

    pub fn request_reconcile(&self) -> bool {
        self.send(OrchestratorCommand::Reconcile)
    }

    pub fn force_stop(&self) -> bool {
        self.send(OrchestratorCommand::ForceStop)
    }

    pub fn test_activity(&self, end_test: bool) -> bool {
        self.send(OrchestratorCommand::TestActivity { end_test })
    }

    pub fn process_event(&self, event: ProcessEvent) -> bool {
        self.send(OrchestratorCommand::Process(event))
    }

    pub fn refresh_cloud_usage(&self) -> bool {
        self.send(OrchestratorCommand::RefreshCloudUsage)
    }

    /// Empty when cloud storage is not configured or unreachable
    pub async fn list_videos(&self) -> Vec<StoredVideo> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.send(OrchestratorCommand::ListVideos(reply_tx)) {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub fn tag_video(&self, name: impl Into<String>, tag: impl Into<String>) -> bool {
        self.send(OrchestratorCommand::Store(StoreMutation::Tag {
            name: name.into(),
            tag: tag.into(),
        }))
    }

    pub fn protect_video(&self, name: impl Into<String>, protected: bool) -> bool {
        self.send(OrchestratorCommand::Store(StoreMutation::Protect {
            name: name.into(),
            protected,
        }))
    }

    pub fn delete_video(&self, name: impl Into<String>) -> bool {
        self.send(OrchestratorCommand::Store(StoreMutation::Delete { name: name.into() }))
    }

    pub fn shutdown(&self) -> bool {
        self.send(OrchestratorCommand::Shutdown)
    }
}

/// Create the command and status channels
pub fn create_orchestrator_channels() -> (
    OrchestratorHandle,
    mpsc::UnboundedReceiver<OrchestratorCommand>,
    broadcast::Sender<StatusUpdate>,
    broadcast::Receiver<StatusUpdate>,
) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = broadcast::channel(32);
    (OrchestratorHandle::new(cmd_tx), cmd_rx, status_tx, status_rx)
}
