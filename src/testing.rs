//! Scripted collaborators for unit tests

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::activity::{
    ActivityCategory, ActivitySignal, ActivitySource, ActivitySourceFactory, Flavour,
};
use crate::engine::{
    CaptureEngine, EngineEnvelope, EngineFactory, EngineSignals, EngineSlot, EngineState,
    MicStatus,
};
use crate::pipeline::{AudioSnapshot, BaseSnapshot, OverlaySnapshot, SessionContext, VideoSnapshot};
use crate::store::{
    CloudCredentials, CloudUsage, Permissions, StoreClient, StoreConnector, StoreError,
    StoredVideo,
};

/// Ordered record of collaborator calls, shared by every fake
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct FakeEngine {
    log: CallLog,
    signals: EngineSignals,
    state: EngineState,
}

impl FakeEngine {
    fn set_state(&mut self, state: EngineState) {
        self.state = state;
        self.signals.state_changed(state);
    }
}

#[async_trait]
impl CaptureEngine for FakeEngine {
    fn state(&self) -> EngineState {
        self.state
    }

    async fn start(&mut self) -> Result<()> {
        self.log.push("start");
        self.set_state(EngineState::Starting);
        self.set_state(EngineState::Recording);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.log.push("stop");
        self.set_state(EngineState::Stopping);
        self.set_state(EngineState::Offline);
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.log.push("cleanup");
        Ok(())
    }

    fn configure_base(&mut self, _snapshot: &BaseSnapshot) -> Result<()> {
        self.log.push("configure_base");
        Ok(())
    }

    fn configure_video(&mut self, _snapshot: &VideoSnapshot) -> Result<()> {
        self.log.push("configure_video");
        Ok(())
    }

    fn configure_audio(&mut self, _snapshot: &AudioSnapshot) -> Result<()> {
        self.log.push("configure_audio");
        Ok(())
    }

    fn configure_overlay(&mut self, _snapshot: &OverlaySnapshot) -> Result<()> {
        self.log.push("configure_overlay");
        Ok(())
    }

    fn mic_status(&self) -> MicStatus {
        MicStatus::None
    }

    fn force_shutdown(&mut self) {
        self.log.push("force_shutdown");
        self.state = EngineState::Offline;
    }
}

pub struct FakeEngineFactory {
    log: CallLog,
    created: AtomicUsize,
    issued: Mutex<Vec<EngineSignals>>,
}

impl FakeEngineFactory {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            created: AtomicUsize::new(0),
            issued: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Report a fatal fault from the newest engine instance
    pub fn fault(&self, message: &str) {
        if let Some(signals) = self.issued.lock().unwrap().last() {
            signals.fault(message);
        }
    }

    /// Report a fault from the instance built for `generation`, retired or not
    pub fn fault_from(&self, generation: u64, message: &str) {
        let issued = self.issued.lock().unwrap();
        if let Some(signals) = issued.iter().find(|s| s.generation() == generation) {
            signals.fault(message);
        }
    }
}

impl EngineFactory for FakeEngineFactory {
    fn create(&self, signals: EngineSignals) -> Box<dyn CaptureEngine> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.issued.lock().unwrap().push(signals.clone());
        Box::new(FakeEngine {
            log: self.log.clone(),
            signals,
            state: EngineState::Offline,
        })
    }
}

// ============================================================================
// Activity sources
// ============================================================================

#[derive(Default)]
pub struct SourceFlags {
    pub active: AtomicBool,
    pub overrunning: AtomicBool,
    pub destroyed: AtomicBool,
}

struct FakeSource {
    flavour: Flavour,
    flags: Arc<SourceFlags>,
    log: CallLog,
    signals: mpsc::UnboundedSender<ActivitySignal>,
}

impl FakeSource {
    fn signal(&self) {
        let _ = self.signals.send(ActivitySignal {
            flavour: self.flavour,
        });
    }
}

impl ActivitySource for FakeSource {
    fn flavour(&self) -> Flavour {
        self.flavour
    }

    fn in_activity(&self) -> bool {
        self.flags.active.load(Ordering::SeqCst)
    }

    fn overrunning(&self) -> bool {
        self.flags.overrunning.load(Ordering::SeqCst)
    }

    fn force_end_activity(&mut self) {
        self.log.push(format!("force_end:{}", self.flavour));
        self.flags.active.store(false, Ordering::SeqCst);
        self.flags.overrunning.store(false, Ordering::SeqCst);
        self.signal();
    }

    fn test(&mut self, category: ActivityCategory, _end_test: bool) {
        self.log.push(format!("test:{}:{:?}", self.flavour, category));
        self.flags.active.store(true, Ordering::SeqCst);
        self.signal();
    }

    fn destroy(&mut self) {
        self.log.push(format!("destroy:{}", self.flavour));
        self.flags.destroyed.store(true, Ordering::SeqCst);
    }
}

struct LiveSource {
    flavour: Flavour,
    flags: Arc<SourceFlags>,
    signals: mpsc::UnboundedSender<ActivitySignal>,
}

pub struct FakeSourceFactory {
    log: CallLog,
    live: Mutex<Vec<LiveSource>>,
}

impl FakeSourceFactory {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            live: Mutex::new(Vec::new()),
        }
    }

    fn with_newest(&self, flavour: Flavour, edit: impl FnOnce(&SourceFlags)) {
        let live = self.live.lock().unwrap();
        if let Some(source) = live.iter().rev().find(|s| s.flavour == flavour) {
            edit(&source.flags);
            let _ = source.signals.send(ActivitySignal { flavour });
        }
    }

    /// Flip the newest source of `flavour` in or out of an activity
    pub fn set_in_activity(&self, flavour: Flavour, active: bool) {
        self.with_newest(flavour, |flags| flags.active.store(active, Ordering::SeqCst));
    }

    pub fn set_overrunning(&self, flavour: Flavour, overrunning: bool) {
        self.with_newest(flavour, |flags| {
            flags.overrunning.store(overrunning, Ordering::SeqCst)
        });
    }
}

impl ActivitySourceFactory for FakeSourceFactory {
    fn create(
        &self,
        flavour: Flavour,
        _log_dir: &Path,
        signals: mpsc::UnboundedSender<ActivitySignal>,
    ) -> Result<Box<dyn ActivitySource>> {
        self.log.push(format!("create_source:{}", flavour));
        let flags = Arc::new(SourceFlags::default());
        self.live.lock().unwrap().push(LiveSource {
            flavour,
            flags: flags.clone(),
            signals: signals.clone(),
        });
        Ok(Box::new(FakeSource {
            flavour,
            flags,
            log: self.log.clone(),
            signals,
        }))
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScript {
    Grant(Permissions),
    Deny,
    NetworkError,
    /// Never settles
    Hang,
}

struct StoreShared {
    script: Mutex<AuthScript>,
    auth_calls: AtomicUsize,
    log: CallLog,
}

struct FakeStore {
    shared: Arc<StoreShared>,
}

#[async_trait]
impl StoreClient for FakeStore {
    async fn check_auth(&self) -> Result<Permissions, StoreError> {
        self.shared.auth_calls.fetch_add(1, Ordering::SeqCst);
        let script = *self.shared.script.lock().unwrap();
        match script {
            AuthScript::Grant(permissions) => Ok(permissions),
            AuthScript::Deny => Err(StoreError::Unauthorized),
            AuthScript::NetworkError => Err(StoreError::Network("connection refused".to_string())),
            AuthScript::Hang => std::future::pending().await,
        }
    }

    async fn usage(&self) -> Result<CloudUsage, StoreError> {
        Ok(CloudUsage {
            used_bytes: 1024,
            quota_bytes: 4096,
        })
    }

    async fn list(&self) -> Result<Vec<StoredVideo>, StoreError> {
        Ok(Vec::new())
    }

    async fn tag(&self, name: &str, tag: &str) -> Result<(), StoreError> {
        self.shared.log.push(format!("tag:{}:{}", name, tag));
        Ok(())
    }

    async fn protect(&self, name: &str, protected: bool) -> Result<(), StoreError> {
        self.shared.log.push(format!("protect:{}:{}", name, protected));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.shared.log.push(format!("delete:{}", name));
        Err(StoreError::Status(500))
    }
}

pub struct FakeConnector {
    shared: Arc<StoreShared>,
}

impl FakeConnector {
    pub fn new(script: AuthScript) -> Self {
        Self::with_log(script, CallLog::default())
    }

    pub fn with_log(script: AuthScript, log: CallLog) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                script: Mutex::new(script),
                auth_calls: AtomicUsize::new(0),
                log,
            }),
        }
    }

    pub fn set_script(&self, script: AuthScript) {
        *self.shared.script.lock().unwrap() = script;
    }

    pub fn auth_calls(&self) -> usize {
        self.shared.auth_calls.load(Ordering::SeqCst)
    }

    pub fn client(&self) -> Arc<dyn StoreClient> {
        Arc::new(FakeStore {
            shared: self.shared.clone(),
        })
    }
}

impl StoreConnector for FakeConnector {
    fn connect(&self, _credentials: &CloudCredentials) -> Result<Arc<dyn StoreClient>, StoreError> {
        Ok(self.client())
    }
}

// ============================================================================
// Session context
// ============================================================================

/// Keeps the fakes and channel ends alive next to a test session
pub struct Fakes {
    pub log: CallLog,
    pub engines: Arc<FakeEngineFactory>,
    pub sources: Arc<FakeSourceFactory>,
    pub store: Arc<FakeConnector>,
    pub engine_rx: mpsc::UnboundedReceiver<EngineEnvelope>,
    pub signal_rx: mpsc::UnboundedReceiver<ActivitySignal>,
}

pub fn session_context() -> (SessionContext, Fakes) {
    let log = CallLog::default();
    let engines = Arc::new(FakeEngineFactory::new(log.clone()));
    let sources = Arc::new(FakeSourceFactory::new(log.clone()));
    let store = Arc::new(FakeConnector::with_log(
        AuthScript::Grant(Permissions {
            read: true,
            write: true,
        }),
        log.clone(),
    ));
    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();

    let ctx = SessionContext::new(
        EngineSlot::new(engines.clone(), engine_tx),
        sources.clone(),
        signal_tx,
        store.clone(),
    );

    (
        ctx,
        Fakes {
            log,
            engines,
            sources,
            store,
            engine_rx,
            signal_rx,
        },
    )
}
