//! Orchestrator loop
//!
//! Reconciliation passes run as owned futures polled alongside the command
//! channel, so commands and engine events keep flowing while a pass waits on
//! the network. While a pass runs it owns the session, and anything that
//! needs the session is parked until the pass hands it back. Forced stop only
//! needs the activity sources, which the loop shares with the session, so it
//! is never parked.

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::gate::ReconcileGate;
use super::{restart, supervisor, OrchestratorCommand, StoreMutation};
use crate::activity::{ActivityAggregator, ActivitySignal, ActivitySourceFactory};
use crate::engine::{
    EngineEnvelope, EngineEvent, EngineFactory, EngineSlot, EngineState, MicStatus,
};
use crate::pipeline::{PassReport, SessionContext, StagePipeline};
use crate::process::ProcessEvent;
use crate::status::{compute_status, CompositeStatus, StatusInputs, StatusPublisher, StatusUpdate};
use crate::store::{CloudUsage, StoreClient, StoreConnector, StoredVideo};

/// How often the microphone state is sampled for the status feed
const MIC_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pipeline plus the session it reconciles; moved into a pass while it runs
pub(crate) struct Core {
    pub(crate) pipeline: StagePipeline,
    pub(crate) ctx: SessionContext,
}

impl Core {
    async fn run_pass(mut self) -> (Core, PassReport) {
        let report = self.pipeline.reconcile(&mut self.ctx).await;
        if report.is_valid() {
            if let Err(e) = self.ctx.arm().await {
                error!("Failed to start capture engine: {:#}", e);
            }
        }
        (self, report)
    }
}

type PassFuture = BoxFuture<'static, (Core, PassReport)>;

/// Results of background store calls, fed back into the loop
#[derive(Debug)]
enum Internal {
    CloudUsage(CloudUsage),
    StoreChanged,
}

/// Collaborators the orchestrator is built from
pub struct OrchestratorParts {
    pub pipeline: StagePipeline,
    pub engine_factory: Arc<dyn EngineFactory>,
    pub source_factory: Arc<dyn ActivitySourceFactory>,
    pub store_connector: Arc<dyn StoreConnector>,
    /// Buffer restart period while idle
    pub restart_interval: Duration,
}

pub struct Orchestrator {
    /// Session state; `None` while a pass owns it
    core: Option<Core>,
    /// Same source set the session holds, reachable mid-pass
    sources: ActivityAggregator,
    /// The in-flight pass
    pass: Option<PassFuture>,
    gate: ReconcileGate,
    reconfiguring: bool,
    config_valid: bool,
    config_message: String,
    /// When the next retry of a transiently failed pass is due
    retry_at: Option<Instant>,
    /// Fault reported while a pass held the session
    pending_fault: Option<String>,
    /// Commands that arrived while a pass held the session
    deferred: VecDeque<OrchestratorCommand>,
    engine_generation: u64,
    mic: MicStatus,
    cloud_usage: Option<CloudUsage>,
    publisher: StatusPublisher,
    restart_interval: Duration,
    passes: u64,
    cmd_rx: mpsc::UnboundedReceiver<OrchestratorCommand>,
    engine_rx: mpsc::UnboundedReceiver<EngineEnvelope>,
    signal_rx: mpsc::UnboundedReceiver<ActivitySignal>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl Orchestrator {
    pub fn new(
        parts: OrchestratorParts,
        cmd_rx: mpsc::UnboundedReceiver<OrchestratorCommand>,
        status_tx: broadcast::Sender<StatusUpdate>,
    ) -> Self {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let engine = EngineSlot::new(parts.engine_factory, engine_tx);
        let engine_generation = engine.generation();
        let ctx = SessionContext::new(
            engine,
            parts.source_factory,
            signal_tx,
            parts.store_connector,
        );
        let sources = ctx.sources.clone();

        Self {
            sources,
            core: Some(Core {
                pipeline: parts.pipeline,
                ctx,
            }),
            pass: None,
            gate: ReconcileGate::new(),
            reconfiguring: false,
            config_valid: false,
            config_message: String::new(),
            retry_at: None,
            pending_fault: None,
            deferred: VecDeque::new(),
            engine_generation,
            mic: MicStatus::None,
            cloud_usage: None,
            publisher: StatusPublisher::new(status_tx),
            restart_interval: parts.restart_interval,
            passes: 0,
            cmd_rx,
            engine_rx,
            signal_rx,
            internal_tx,
            internal_rx,
        }
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(&mut self) -> Result<()> {
        info!("Orchestrator starting");

        let period = self.restart_interval;
        let mut restart_timer = tokio::time::interval_at(Instant::now() + period, period);
        restart_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut mic_timer = tokio::time::interval(MIC_POLL_INTERVAL);
        mic_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.request_reconcile();

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        info!("Command channel closed");
                        self.shutdown().await;
                        break;
                    };
                    if !self.on_command(cmd).await {
                        break;
                    }
                }

                (core, report) = next_pass(&mut self.pass) => {
                    self.on_pass_complete(core, report).await;
                }

                Some(envelope) = self.engine_rx.recv() => {
                    self.on_engine_event(envelope);
                }

                Some(signal) = self.signal_rx.recv() => {
                    debug!("Activity changed on {} source", signal.flavour);
                    self.publish_status();
                }

                Some(event) = self.internal_rx.recv() => {
                    self.on_internal(event);
                }

                _ = sleep_until_opt(self.retry_at) => {
                    self.retry_at = None;
                    info!("Retrying reconciliation");
                    self.request_reconcile();
                }

                _ = restart_timer.tick() => {
                    self.on_restart_tick().await;
                }

                _ = mic_timer.tick() => {
                    self.poll_mic();
                }
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }

    /// Returns false once the loop should exit
    async fn on_command(&mut self, cmd: OrchestratorCommand) -> bool {
        match cmd {
            OrchestratorCommand::Reconcile => self.request_reconcile(),
            OrchestratorCommand::ForceStop => self.force_stop(),
            OrchestratorCommand::Shutdown => {
                info!("Shutdown command received");
                self.shutdown().await;
                return false;
            }
            cmd if self.core.is_none() => {
                debug!("Deferring {:?} until reconciliation completes", cmd);
                self.deferred.push_back(cmd);
            }
            cmd => self.execute(cmd).await,
        }
        true
    }

    async fn execute(&mut self, cmd: OrchestratorCommand) {
        match cmd {
            OrchestratorCommand::Reconcile => self.request_reconcile(),
            OrchestratorCommand::ForceStop => self.force_stop(),
            OrchestratorCommand::TestActivity { end_test } => self.test_activity(end_test),
            OrchestratorCommand::Process(event) => self.on_process_event(event).await,
            OrchestratorCommand::RefreshCloudUsage => self.refresh_cloud_usage(),
            OrchestratorCommand::ListVideos(reply) => self.list_videos(reply),
            OrchestratorCommand::Store(mutation) => self.mutate_store(mutation),
            OrchestratorCommand::Shutdown => {}
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    fn request_reconcile(&mut self) {
        if self.gate.try_enter() {
            self.start_pass();
        } else {
            debug!("Reconciliation running, queued a follow-up pass");
        }
    }

    fn start_pass(&mut self) {
        let Some(core) = self.core.take() else {
            warn!("Session unavailable, cannot start reconciliation");
            self.gate.reset();
            return;
        };

        self.retry_at = None;
        self.passes += 1;
        self.reconfiguring = true;
        debug!("Starting reconciliation pass {}", self.passes);
        self.pass = Some(core.run_pass().boxed());
        self.publish_status();
    }

    async fn on_pass_complete(&mut self, core: Core, report: PassReport) {
        self.core = Some(core);
        self.reconfiguring = false;
        self.record_outcome(report);

        if let Some(fault) = self.pending_fault.take() {
            self.on_fault(fault);
            return;
        }

        if self.gate.finish() {
            debug!("Running queued reconciliation");
            self.start_pass();
            return;
        }

        self.publish_status();
        self.replay_deferred().await;
    }

    fn record_outcome(&mut self, report: PassReport) {
        match report.failure {
            None => {
                self.config_valid = true;
                self.config_message.clear();
                if self.store().is_none() {
                    self.cloud_usage = None;
                } else if !report.applied.is_empty() {
                    self.refresh_cloud_usage();
                }
            }
            Some(failure) => {
                self.config_valid = false;
                self.config_message = failure.error.to_string();
                if let Some(delay) = failure.error.retry_after() {
                    info!(
                        "Stage {} failed transiently, retrying in {}s",
                        failure.stage,
                        delay.as_secs()
                    );
                    self.retry_at = Some(Instant::now() + delay);
                }
            }
        }
    }

    async fn replay_deferred(&mut self) {
        while self.core.is_some() {
            let Some(cmd) = self.deferred.pop_front() else {
                break;
            };
            self.execute(cmd).await;
        }
    }

    // ========================================================================
    // Engine
    // ========================================================================

    fn on_engine_event(&mut self, envelope: EngineEnvelope) {
        if envelope.generation != self.engine_generation {
            debug!(
                "Ignoring event from retired engine generation {}",
                envelope.generation
            );
            return;
        }

        match envelope.event {
            EngineEvent::StateChanged(state) => {
                debug!("Engine state: {:?}", state);
                self.publish_status();
            }
            EngineEvent::Fault(message) => self.on_fault(message),
        }
    }

    fn on_fault(&mut self, message: String) {
        let Some(core) = self.core.as_mut() else {
            warn!("Engine fault during reconciliation, recovering once it completes");
            self.pending_fault.get_or_insert(message);
            return;
        };

        supervisor::recover(core, &message);
        self.engine_generation = core.ctx.engine.generation();
        self.gate.reset();
        self.request_reconcile();
    }

    async fn on_restart_tick(&mut self) {
        if self.gate.is_active() {
            debug!("Skipping buffer restart during reconciliation");
            return;
        }
        let Some(core) = self.core.as_mut() else {
            return;
        };
        if let Err(e) = restart::restart_buffer(&mut core.ctx).await {
            error!("Buffer restart failed: {:#}", e);
        }
    }

    fn poll_mic(&mut self) {
        let Some(core) = self.core.as_ref() else {
            return;
        };
        let mic = core.ctx.engine.engine().mic_status();
        if mic != self.mic {
            self.mic = mic;
            self.publish_status();
        }
    }

    // ========================================================================
    // Activities and process lifecycle
    // ========================================================================

    fn force_stop(&mut self) {
        info!("Force stopping activities");
        self.sources.force_end_all();
        self.publish_status();
    }

    fn test_activity(&mut self, end_test: bool) {
        if !self.config_valid {
            warn!("Configuration is invalid, ignoring test activity");
            return;
        }
        if let Some(core) = self.core.as_mut() {
            core.ctx.sources.test(end_test);
        }
    }

    async fn on_process_event(&mut self, event: ProcessEvent) {
        if event == ProcessEvent::Resuming {
            info!("Host resumed, reapplying settings");
            self.request_reconcile();
            return;
        }

        let config_valid = self.config_valid;
        let Some(core) = self.core.as_mut() else {
            return;
        };
        let ctx = &mut core.ctx;

        let result = match event {
            ProcessEvent::Started => {
                info!("Game client started");
                ctx.process_running = true;
                if config_valid {
                    ctx.arm().await
                } else {
                    debug!("Configuration invalid, not arming");
                    Ok(())
                }
            }
            ProcessEvent::Stopped => {
                info!("Game client stopped");
                ctx.process_running = false;
                ctx.quiesce().await
            }
            ProcessEvent::Suspending => {
                info!("Host suspending, stopping capture");
                ctx.quiesce().await
            }
            ProcessEvent::Resuming => Ok(()),
        };

        if let Err(e) = result {
            error!("Failed to handle {:?}: {:#}", event, e);
        }
        self.publish_status();
    }

    // ========================================================================
    // Cloud store
    // ========================================================================

    fn store(&self) -> Option<Arc<dyn StoreClient>> {
        self.core.as_ref().and_then(|core| core.ctx.store.clone())
    }

    fn refresh_cloud_usage(&self) {
        let Some(store) = self.store() else {
            return;
        };
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            match store.usage().await {
                Ok(usage) => {
                    let _ = tx.send(Internal::CloudUsage(usage));
                }
                Err(e) => warn!("Failed to fetch cloud usage: {}", e),
            }
        });
    }

    fn list_videos(&self, reply: oneshot::Sender<Vec<StoredVideo>>) {
        let Some(store) = self.store() else {
            let _ = reply.send(Vec::new());
            return;
        };
        tokio::spawn(async move {
            let videos = match store.list().await {
                Ok(videos) => videos,
                Err(e) => {
                    warn!("Failed to list cloud videos: {}", e);
                    Vec::new()
                }
            };
            let _ = reply.send(videos);
        });
    }

    fn mutate_store(&self, mutation: StoreMutation) {
        let Some(store) = self.store() else {
            warn!("Cloud storage is not configured, ignoring {:?}", mutation);
            return;
        };
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match &mutation {
                StoreMutation::Tag { name, tag } => store.tag(name, tag).await,
                StoreMutation::Protect { name, protected } => store.protect(name, *protected).await,
                StoreMutation::Delete { name } => store.delete(name).await,
            };
            if let Err(e) = result {
                warn!("Cloud {:?} failed: {}", mutation, e);
            }
            let _ = tx.send(Internal::StoreChanged);
        });
    }

    fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::CloudUsage(usage) => {
                self.cloud_usage = Some(usage);
                self.publish_status();
            }
            Internal::StoreChanged => self.refresh_cloud_usage(),
        }
    }

    // ========================================================================
    // Status and shutdown
    // ========================================================================

    fn publish_status(&mut self) {
        let status = match self.core.as_ref() {
            Some(core) => compute_status(&StatusInputs {
                reconfiguring: self.reconfiguring,
                config_valid: self.config_valid,
                config_message: &self.config_message,
                any_overrunning: core.ctx.sources.any_overrunning(),
                any_active: core.ctx.sources.any_active(),
                engine_state: core.ctx.engine.state(),
            }),
            None => CompositeStatus::Reconfiguring,
        };
        self.publisher.publish(StatusUpdate {
            status,
            mic: self.mic,
            cloud_usage: self.cloud_usage,
        });
    }

    async fn shutdown(&mut self) {
        if let Some(pass) = self.pass.take() {
            info!("Waiting for reconciliation to finish");
            let (core, report) = pass.await;
            self.core = Some(core);
            self.reconfiguring = false;
            self.record_outcome(report);
        }
        self.gate.reset();
        self.retry_at = None;
        if !self.deferred.is_empty() {
            debug!("Dropping {} deferred command(s)", self.deferred.len());
            self.deferred.clear();
        }

        let Some(core) = self.core.as_mut() else {
            return;
        };
        core.ctx.sources.destroy_all();

        let engine = core.ctx.engine.engine_mut();
        if engine.state() != EngineState::Offline {
            if let Err(e) = engine.stop().await {
                error!("Failed to stop capture engine: {:#}", e);
            }
        }
        if let Err(e) = engine.cleanup().await {
            warn!("Failed to clean up capture buffer: {:#}", e);
        }
        self.publish_status();
    }
}

async fn next_pass(pass: &mut Option<PassFuture>) -> (Core, PassReport) {
    match pass.as_mut() {
        Some(future) => {
            let output = future.await;
            *pass = None;
            output
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
