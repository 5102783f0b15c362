//! Capture engine contract
//!
//! The orchestrator never touches encoders or devices directly. It drives an
//! engine through this narrow start/stop/configure surface and listens to the
//! engine's state and fault events on a channel handed over at construction.

mod simulated;

pub use simulated::{SimulatedEngine, SimulatedEngineFactory};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::pipeline::{AudioSnapshot, BaseSnapshot, OverlaySnapshot, VideoSnapshot};

/// Session state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EngineState {
    #[default]
    Offline,
    Starting,
    /// Recording into the rolling buffer (or persisting, if an activity is live)
    Recording,
    Stopping,
}

/// Microphone state derived from device polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MicStatus {
    /// No input device configured
    #[default]
    None,
    Listening,
    /// Push-to-talk configured and key not held
    Muted,
}

/// Events an engine instance emits
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(EngineState),
    /// Fatal fault; the instance must be torn down and rebuilt
    Fault(String),
}

/// An engine event tagged with the instance generation that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEnvelope {
    pub generation: u64,
    pub event: EngineEvent,
}

/// Outbound signal handle given to each engine instance
#[derive(Debug, Clone)]
pub struct EngineSignals {
    generation: u64,
    tx: mpsc::UnboundedSender<EngineEnvelope>,
}

impl EngineSignals {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<EngineEnvelope>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state_changed(&self, state: EngineState) {
        self.emit(EngineEvent::StateChanged(state));
    }

    pub fn fault(&self, message: impl Into<String>) {
        self.emit(EngineEvent::Fault(message.into()));
    }

    fn emit(&self, event: EngineEvent) {
        // Receiver gone means the orchestrator is shutting down
        let _ = self.tx.send(EngineEnvelope {
            generation: self.generation,
            event,
        });
    }
}

/// Start/stop/configure surface of a capture engine
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    fn state(&self) -> EngineState;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Discard the temporary buffer left by the last session
    async fn cleanup(&mut self) -> Result<()>;

    fn configure_base(&mut self, snapshot: &BaseSnapshot) -> Result<()>;

    fn configure_video(&mut self, snapshot: &VideoSnapshot) -> Result<()>;

    fn configure_audio(&mut self, snapshot: &AudioSnapshot) -> Result<()>;

    fn configure_overlay(&mut self, snapshot: &OverlaySnapshot) -> Result<()>;

    fn mic_status(&self) -> MicStatus;

    /// Tear down without finalizing anything; used after a fault
    fn force_shutdown(&mut self);
}

/// Builds fresh engine instances, starting from engine defaults
pub trait EngineFactory: Send + Sync {
    fn create(&self, signals: EngineSignals) -> Box<dyn CaptureEngine>;
}

/// The single mutable slot the engine lives in
///
/// Replaced wholesale on crash recovery; each replacement bumps the
/// generation so late events from the dead instance can be told apart.
pub struct EngineSlot {
    engine: Box<dyn CaptureEngine>,
    generation: u64,
    factory: Arc<dyn EngineFactory>,
    tx: mpsc::UnboundedSender<EngineEnvelope>,
}

impl EngineSlot {
    pub fn new(factory: Arc<dyn EngineFactory>, tx: mpsc::UnboundedSender<EngineEnvelope>) -> Self {
        let generation = 1;
        let engine = factory.create(EngineSignals::new(generation, tx.clone()));
        Self {
            engine,
            generation,
            factory,
            tx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn engine(&self) -> &dyn CaptureEngine {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut dyn CaptureEngine {
        self.engine.as_mut()
    }

    /// Force-shutdown the current instance and replace it with a new one
    pub fn rebuild(&mut self) {
        info!("Rebuilding capture engine (generation {})", self.generation);
        self.engine.force_shutdown();
        self.generation += 1;
        self.engine = self
            .factory
            .create(EngineSignals::new(self.generation, self.tx.clone()));
        debug!("Capture engine generation {} ready", self.generation);
    }
}
