/// Single-flight guard for reconciliation
///
/// At most one pass runs at a time. Requests that arrive while one is running
/// collapse into a single follow-up pass.
#[derive(Debug, Default)]
pub struct ReconcileGate {
    active: bool,
    queued: bool,
}

impl ReconcileGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    #[cfg(test)]
    pub fn is_queued(&self) -> bool {
        self.queued
    }

    /// Returns true when the caller should start a pass now
    pub fn try_enter(&mut self) -> bool {
        if self.active {
            self.queued = true;
            false
        } else {
            self.active = true;
            true
        }
    }

    /// Called when a pass ends. Returns true when the queued follow-up
    /// must start now, in which case the gate stays held.
    pub fn finish(&mut self) -> bool {
        if self.queued {
            self.queued = false;
            true
        } else {
            self.active = false;
            false
        }
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.queued = false;
    }
}
