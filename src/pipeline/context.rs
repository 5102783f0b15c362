use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::activity::{ActivityAggregator, ActivitySignal, ActivitySourceFactory, Flavour};
use crate::engine::{EngineSlot, EngineState};
use crate::store::{StoreClient, StoreConnector};

/// Live session state the stages act on
///
/// Owned by the orchestrator loop, or by the single in-flight pass while one
/// is running. Nothing else holds a reference to it.
pub struct SessionContext {
    pub engine: EngineSlot,
    pub sources: ActivityAggregator,
    /// Store client for the currently applied cloud settings
    pub store: Option<Arc<dyn StoreClient>>,
    /// Whether a watched game client is running
    pub process_running: bool,
    source_factory: Arc<dyn ActivitySourceFactory>,
    signal_tx: mpsc::UnboundedSender<ActivitySignal>,
    store_connector: Arc<dyn StoreConnector>,
}

impl SessionContext {
    pub fn new(
        engine: EngineSlot,
        source_factory: Arc<dyn ActivitySourceFactory>,
        signal_tx: mpsc::UnboundedSender<ActivitySignal>,
        store_connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            engine,
            sources: ActivityAggregator::new(),
            store: None,
            process_running: false,
            source_factory,
            signal_tx,
            store_connector,
        }
    }

    pub fn store_connector(&self) -> &dyn StoreConnector {
        self.store_connector.as_ref()
    }

    /// Engine is persisting a real activity, not just buffering
    pub fn mid_activity(&self) -> bool {
        self.engine.state() == EngineState::Recording && self.sources.any_active()
    }

    /// End any activity and stop the engine
    pub async fn quiesce(&mut self) -> Result<()> {
        self.sources.force_end_all();
        if self.engine.state() != EngineState::Offline {
            self.engine.engine_mut().stop().await?;
        }
        Ok(())
    }

    /// Start buffering if the game is running and the engine is idle
    pub async fn arm(&mut self) -> Result<()> {
        if self.process_running && self.engine.state() == EngineState::Offline {
            info!("Arming capture engine");
            self.engine.engine_mut().start().await?;
        }
        Ok(())
    }

    /// Replace every activity source with the given selection
    pub fn rebuild_sources(&mut self, selection: &[(Flavour, PathBuf)]) -> Result<()> {
        self.sources.destroy_all();
        for (flavour, log_dir) in selection {
            let source = self
                .source_factory
                .create(*flavour, log_dir, self.signal_tx.clone())?;
            self.sources.add(source);
        }
        Ok(())
    }
}
