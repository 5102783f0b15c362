//! Activity sources
//!
//! An activity source watches one game client's logs and reports when an
//! in-game activity (arena match, dungeon run, raid encounter) is in progress.
//! The log grammar lives behind [`ActivitySource`]; this crate only consumes
//! the booleans and change signals it exposes.

mod aggregator;
mod manual;

pub use aggregator::ActivityAggregator;
pub use manual::{ManualSource, ManualSourceFactory};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::sync::mpsc;

/// Game client flavour, one activity source each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavour {
    Retail,
    Classic,
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavour::Retail => write!(f, "retail"),
            Flavour::Classic => write!(f, "classic"),
        }
    }
}

/// Kind of activity a manual test simulates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityCategory {
    TwoVTwo,
    ThreeVThree,
    SoloShuffle,
    Skirmish,
    Battleground,
    MythicPlus,
    Raid,
}

/// "Something about this source changed, recompute status"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySignal {
    pub flavour: Flavour,
}

/// One independent log watcher
pub trait ActivitySource: Send + Sync {
    fn flavour(&self) -> Flavour;

    fn in_activity(&self) -> bool;

    /// Activity whose end boundary was not seen within the grace window
    fn overrunning(&self) -> bool;

    /// End the current activity now, persisting whatever was captured
    fn force_end_activity(&mut self);

    /// Start a simulated activity; `end_test` ends it after a short while
    fn test(&mut self, category: ActivityCategory, end_test: bool);

    /// Stop watching and release the log handle
    fn destroy(&mut self);
}

/// Constructs sources for the flavours the configuration selects
pub trait ActivitySourceFactory: Send + Sync {
    fn create(
        &self,
        flavour: Flavour,
        log_dir: &Path,
        signals: mpsc::UnboundedSender<ActivitySignal>,
    ) -> Result<Box<dyn ActivitySource>>;
}
