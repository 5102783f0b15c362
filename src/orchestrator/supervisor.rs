//! Recovery after a fatal engine fault

use tracing::{error, info};

use super::control::Core;
use crate::crash;

/// Tear down everything bound to the dead engine and build a fresh one.
/// The caller resets the gate and requests a full reconcile afterwards.
pub fn recover(core: &mut Core, fault: &str) {
    error!("Capture engine crashed: {}", fault);
    crash::record_engine_fault(fault);

    core.ctx.sources.destroy_all();
    crash::log_critical_operation("capture engine rebuild");
    core.ctx.engine.rebuild();
    core.pipeline.invalidate_all();

    info!(
        "Capture engine rebuilt (generation {}), reapplying settings",
        core.ctx.engine.generation()
    );
}
