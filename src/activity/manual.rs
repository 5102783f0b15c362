//! Activity source driven only by manual actions
//!
//! Used when no log handler is plugged in: it never detects activities on its
//! own, but the test and force-stop actions behave like they do on a real
//! watcher, so the whole record/persist path can be exercised.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{ActivityCategory, ActivitySignal, ActivitySource, ActivitySourceFactory, Flavour};

/// How long a self-ending test activity lasts
const TEST_ACTIVITY_DURATION: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct ManualSourceFactory;

impl ActivitySourceFactory for ManualSourceFactory {
    fn create(
        &self,
        flavour: Flavour,
        log_dir: &Path,
        signals: mpsc::UnboundedSender<ActivitySignal>,
    ) -> Result<Box<dyn ActivitySource>> {
        let log_dir = log_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve {} log directory {:?}", flavour, log_dir))?;
        Ok(Box::new(ManualSource::new(flavour, log_dir, signals)))
    }
}

pub struct ManualSource {
    flavour: Flavour,
    log_dir: PathBuf,
    active: Arc<AtomicBool>,
    signals: mpsc::UnboundedSender<ActivitySignal>,
    end_timer: Option<JoinHandle<()>>,
}

impl ManualSource {
    pub fn new(
        flavour: Flavour,
        log_dir: PathBuf,
        signals: mpsc::UnboundedSender<ActivitySignal>,
    ) -> Self {
        debug!("Manual {} source watching {:?}", flavour, log_dir);
        Self {
            flavour,
            log_dir,
            active: Arc::new(AtomicBool::new(false)),
            signals,
            end_timer: None,
        }
    }

    fn set_active(&self, active: bool) {
        if self.active.swap(active, Ordering::SeqCst) != active {
            let _ = self.signals.send(ActivitySignal {
                flavour: self.flavour,
            });
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.end_timer.take() {
            timer.abort();
        }
    }
}

impl ActivitySource for ManualSource {
    fn flavour(&self) -> Flavour {
        self.flavour
    }

    fn in_activity(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn overrunning(&self) -> bool {
        false
    }

    fn force_end_activity(&mut self) {
        self.cancel_timer();
        self.set_active(false);
    }

    fn test(&mut self, category: ActivityCategory, end_test: bool) {
        info!(
            "Test {:?} activity started on {} ({:?})",
            category, self.flavour, self.log_dir
        );
        self.cancel_timer();
        self.set_active(true);

        if !end_test {
            return;
        }

        let active = self.active.clone();
        let signals = self.signals.clone();
        let flavour = self.flavour;
        self.end_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(TEST_ACTIVITY_DURATION).await;
            if active.swap(false, Ordering::SeqCst) {
                info!("Test activity on {} ended", flavour);
                let _ = signals.send(ActivitySignal { flavour });
            }
        }));
    }

    fn destroy(&mut self) {
        self.cancel_timer();
        self.active.store(false, Ordering::SeqCst);
    }
}
