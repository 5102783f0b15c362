//! Periodic buffer restart
//!
//! While the engine only buffers (no activity), it is cycled now and then so
//! the temporary buffer does not grow without bound.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::activity::ActivityAggregator;
use crate::engine::EngineState;
use crate::pipeline::SessionContext;

pub fn is_eligible(state: EngineState, sources: &ActivityAggregator) -> bool {
    state == EngineState::Recording && !sources.any_active() && !sources.any_overrunning()
}

/// Stop, discard the buffer and start again.
/// Returns false without touching the engine when not eligible.
pub async fn restart_buffer(ctx: &mut SessionContext) -> Result<bool> {
    if !is_eligible(ctx.engine.state(), &ctx.sources) {
        debug!("Skipping buffer restart (state {:?})", ctx.engine.state());
        return Ok(false);
    }

    info!("Restarting capture buffer");
    let engine = ctx.engine.engine_mut();
    engine.stop().await.context("Failed to stop engine for restart")?;
    engine.cleanup().await.context("Failed to discard buffer")?;
    engine.start().await.context("Failed to restart engine")?;
    Ok(true)
}
