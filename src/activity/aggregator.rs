use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::{ActivityCategory, ActivitySource, Flavour};

/// Category used whenever a classic source is tested
const CLASSIC_TEST_CATEGORY: ActivityCategory = ActivityCategory::TwoVTwo;

/// Merges the live activity sources into the two flags status cares about
///
/// Clones share one source set, so the orchestrator can reach the sources
/// while a reconciliation pass owns the session. The lock is only held for
/// the duration of a single call and never across an await.
#[derive(Clone, Default)]
pub struct ActivityAggregator {
    sources: Arc<Mutex<Vec<Box<dyn ActivitySource>>>>,
}

impl ActivityAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Box<dyn ActivitySource>>> {
        self.sources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn any_active(&self) -> bool {
        self.lock().iter().any(|s| s.in_activity())
    }

    pub fn any_overrunning(&self) -> bool {
        self.lock().iter().any(|s| s.overrunning())
    }

    pub fn add(&self, source: Box<dyn ActivitySource>) {
        info!("Activity source attached: {}", source.flavour());
        self.lock().push(source);
    }

    /// Tell every source to end its activity now; idle sources ignore it
    pub fn force_end_all(&self) {
        for source in self.lock().iter_mut() {
            debug!("Force ending {} activity", source.flavour());
            source.force_end_activity();
        }
    }

    pub fn destroy_all(&self) {
        for mut source in self.lock().drain(..) {
            debug!("Destroying {} activity source", source.flavour());
            source.destroy();
        }
    }

    /// Run the manual test action, preferring retail when both are live
    pub fn test(&self, end_test: bool) -> Option<(Flavour, ActivityCategory)> {
        let mut sources = self.lock();
        let index = sources
            .iter()
            .position(|s| s.flavour() == Flavour::Retail)
            .or_else(|| sources.iter().position(|s| s.flavour() == Flavour::Classic));

        let Some(index) = index else {
            warn!("No activity source configured, cannot run test");
            return None;
        };

        let source = &mut sources[index];
        let flavour = source.flavour();
        let category = match flavour {
            Flavour::Retail => ActivityCategory::TwoVTwo,
            Flavour::Classic => CLASSIC_TEST_CATEGORY,
        };

        info!("Running {:?} test on {} source", category, flavour);
        source.test(category, end_test);
        Some((flavour, category))
    }
}
