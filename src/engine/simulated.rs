//! Stand-in capture engine
//!
//! Tracks the session state machine and buffer files the way a real engine
//! would, without encoding anything. Lets the agent run end to end on hosts
//! where no capture backend is attached.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{CaptureEngine, EngineFactory, EngineSignals, EngineState, MicStatus};
use crate::pipeline::{AudioSnapshot, BaseSnapshot, OverlaySnapshot, VideoSnapshot};

/// Builds [`SimulatedEngine`] instances
#[derive(Debug, Default)]
pub struct SimulatedEngineFactory;

impl EngineFactory for SimulatedEngineFactory {
    fn create(&self, signals: EngineSignals) -> Box<dyn CaptureEngine> {
        Box::new(SimulatedEngine::new(signals))
    }
}

pub struct SimulatedEngine {
    signals: EngineSignals,
    state: EngineState,
    buffer_dir: Option<PathBuf>,
    /// Marker file standing in for the rolling buffer of the live session
    buffer_file: Option<PathBuf>,
    mics: usize,
    push_to_talk: bool,
}

impl SimulatedEngine {
    pub fn new(signals: EngineSignals) -> Self {
        debug!(
            "Simulated engine created (generation {})",
            signals.generation()
        );
        Self {
            signals,
            state: EngineState::Offline,
            buffer_dir: None,
            buffer_file: None,
            mics: 0,
            push_to_talk: false,
        }
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            self.state = state;
            self.signals.state_changed(state);
        }
    }

    async fn discard_buffer(&mut self) {
        let Some(path) = self.buffer_file.take() else {
            return;
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Discarded buffer {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to discard buffer {:?}: {}", path, e),
        }
    }
}

#[async_trait]
impl CaptureEngine for SimulatedEngine {
    fn state(&self) -> EngineState {
        self.state
    }

    async fn start(&mut self) -> Result<()> {
        if self.state == EngineState::Recording {
            debug!("Engine already recording");
            return Ok(());
        }

        let buffer_dir = self
            .buffer_dir
            .clone()
            .context("Engine started before base configuration")?;

        self.set_state(EngineState::Starting);

        // A stop without cleanup leaves the previous buffer behind
        self.discard_buffer().await;

        let path = buffer_dir.join(format!("buffer_{}.mkv", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&path, b"").await {
            self.set_state(EngineState::Offline);
            return Err(e).with_context(|| format!("Failed to create buffer file: {:?}", path));
        }

        info!("Buffering to {:?}", path);
        self.buffer_file = Some(path);
        self.set_state(EngineState::Recording);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.state == EngineState::Offline {
            debug!("Engine already stopped");
            return Ok(());
        }

        info!("Stopping capture session");
        self.set_state(EngineState::Stopping);
        self.set_state(EngineState::Offline);
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.discard_buffer().await;
        Ok(())
    }

    fn configure_base(&mut self, snapshot: &BaseSnapshot) -> Result<()> {
        debug!("Base configured: buffer at {:?}", snapshot.buffer_path);
        self.buffer_dir = Some(snapshot.buffer_path.clone());
        Ok(())
    }

    fn configure_video(&mut self, snapshot: &VideoSnapshot) -> Result<()> {
        let resolution = snapshot.resolution.unwrap_or_default();
        debug!(
            "Video configured: {}x{}@{} ({}, {:?})",
            resolution.width,
            resolution.height,
            snapshot.fps,
            snapshot.encoder,
            snapshot.quality
        );
        Ok(())
    }

    fn configure_audio(&mut self, snapshot: &AudioSnapshot) -> Result<()> {
        self.mics = snapshot.mics.len();
        self.push_to_talk = snapshot.push_to_talk;
        debug!(
            "Audio configured: {} speaker(s), {} mic(s)",
            snapshot.speakers.len(),
            snapshot.mics.len()
        );
        Ok(())
    }

    fn configure_overlay(&mut self, snapshot: &OverlaySnapshot) -> Result<()> {
        debug!("Overlay configured: enabled={}", snapshot.enabled);
        Ok(())
    }

    fn mic_status(&self) -> MicStatus {
        if self.mics == 0 {
            MicStatus::None
        } else if self.push_to_talk {
            MicStatus::Muted
        } else {
            MicStatus::Listening
        }
    }

    fn force_shutdown(&mut self) {
        warn!("Force shutting down simulated engine");
        self.state = EngineState::Offline;
        self.buffer_file = None;
    }
}
