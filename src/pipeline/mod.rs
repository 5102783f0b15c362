//! Staged configuration pipeline
//!
//! Each stage owns one slice of the configuration. A pass walks the stages in
//! declaration order, re-validating and re-applying only the stages whose
//! snapshot changed (or that were invalidated), and stops at the first
//! failure so later stages can rely on the ones before them.

mod context;
mod stages;
pub mod validate;

pub use context::SessionContext;
pub use stages::{
    AudioSnapshot, AudioStage, BaseSnapshot, BaseStage, CloudSnapshot, FlavourSnapshot,
    FlavourStage, OverlaySnapshot, OverlayStage, Resolution, VideoSnapshot, VideoStage,
};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigSource};

/// Why a stage refused its snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The user has to change something; never retried
    #[error("{0}")]
    Invalid(String),
    /// Transient; the pass is retried after `retry_after`
    #[error("{reason}")]
    Retryable {
        reason: String,
        retry_after: Duration,
    },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ConfigError::Invalid(_) => None,
            ConfigError::Retryable { retry_after, .. } => Some(*retry_after),
        }
    }
}

/// Fetch/validate/apply behaviour of one stage
#[async_trait]
pub trait StageBehavior: Send + Sync + 'static {
    type Snapshot: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn fetch(&self, config: &Config) -> Self::Snapshot;

    async fn validate(
        &self,
        snapshot: &Self::Snapshot,
        ctx: &SessionContext,
    ) -> Result<(), ConfigError>;

    async fn apply(&self, snapshot: &Self::Snapshot, ctx: &mut SessionContext)
        -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStep {
    Unchanged,
    Applied,
}

/// Type-erased stage as stored in the pipeline
#[async_trait]
pub trait PipelineStage: Send {
    fn name(&self) -> &'static str;

    fn is_valid(&self) -> bool;

    fn invalidate(&mut self);

    async fn reconcile(
        &mut self,
        source: &dyn ConfigSource,
        ctx: &mut SessionContext,
    ) -> Result<StageStep, ConfigError>;
}

/// A stage's behaviour plus its last applied snapshot and validity flag
pub struct StageRecord<B: StageBehavior> {
    behavior: B,
    current: B::Snapshot,
    valid: bool,
}

impl<B: StageBehavior> StageRecord<B> {
    pub fn new(behavior: B, source: &dyn ConfigSource) -> Self {
        let current = behavior.fetch(&source.load());
        Self {
            behavior,
            current,
            valid: false,
        }
    }
}

#[async_trait]
impl<B: StageBehavior> PipelineStage for StageRecord<B> {
    fn name(&self) -> &'static str {
        self.behavior.name()
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn invalidate(&mut self) {
        self.valid = false;
    }

    async fn reconcile(
        &mut self,
        source: &dyn ConfigSource,
        ctx: &mut SessionContext,
    ) -> Result<StageStep, ConfigError> {
        let snapshot = self.behavior.fetch(&source.load());
        if snapshot != self.current {
            debug!("Stage {} changed", self.behavior.name());
            self.valid = false;
        }

        if self.valid {
            return Ok(StageStep::Unchanged);
        }

        self.behavior.validate(&snapshot, ctx).await?;
        self.behavior.apply(&snapshot, ctx).await.map_err(|e| {
            ConfigError::invalid(format!(
                "Failed to apply {} settings: {:#}",
                self.behavior.name(),
                e
            ))
        })?;

        self.current = snapshot;
        self.valid = true;
        Ok(StageStep::Applied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: &'static str,
    pub error: ConfigError,
}

/// Result of one walk over the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PassReport {
    /// Stages validated and applied in this pass, in order
    pub applied: Vec<&'static str>,
    pub failure: Option<StageFailure>,
}

impl PassReport {
    pub fn is_valid(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct StagePipeline {
    source: Arc<dyn ConfigSource>,
    stages: Vec<Box<dyn PipelineStage>>,
}

impl StagePipeline {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            source,
            stages: Vec::new(),
        }
    }

    /// The capture pipeline: storage first, everything else depends on it
    pub fn standard(source: Arc<dyn ConfigSource>) -> Self {
        Self::new(source)
            .with_stage(BaseStage)
            .with_stage(VideoStage)
            .with_stage(AudioStage)
            .with_stage(FlavourStage)
            .with_stage(OverlayStage)
    }

    /// Append a stage; its initial snapshot is fetched now and marked invalid
    pub fn with_stage<B: StageBehavior>(mut self, behavior: B) -> Self {
        let record = StageRecord::new(behavior, self.source.as_ref());
        self.stages.push(Box::new(record));
        self
    }

    #[cfg(test)]
    pub fn validity(&self) -> Vec<(&'static str, bool)> {
        self.stages.iter().map(|s| (s.name(), s.is_valid())).collect()
    }

    /// Force every stage to re-validate and re-apply on the next pass
    pub fn invalidate_all(&mut self) {
        for stage in &mut self.stages {
            stage.invalidate();
        }
    }

    pub async fn reconcile(&mut self, ctx: &mut SessionContext) -> PassReport {
        let mut report = PassReport::default();
        debug!(
            "Reconciling, {} of {} stage(s) not yet valid",
            self.stages.iter().filter(|s| !s.is_valid()).count(),
            self.stages.len()
        );

        for stage in self.stages.iter_mut() {
            let name = stage.name();
            match stage.reconcile(self.source.as_ref(), ctx).await {
                Ok(StageStep::Applied) => {
                    info!("Stage {} applied", name);
                    report.applied.push(name);
                }
                Ok(StageStep::Unchanged) => {
                    debug!("Stage {} unchanged", name);
                }
                Err(error) => {
                    warn!("Stage {} rejected configuration: {}", name, error);
                    report.failure = Some(StageFailure { stage: name, error });
                    return report;
                }
            }
        }

        report
    }
}
