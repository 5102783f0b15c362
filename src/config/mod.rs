//! Configuration management for raidcast Agent

mod watch;

pub use watch::watch_config;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Where finished recordings and the rolling buffer live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Cloud store credentials and upload behaviour
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Video encoder settings
    #[serde(default)]
    pub video: VideoConfig,

    /// Audio device selection
    #[serde(default)]
    pub audio: AudioConfig,

    /// Which game flavours to watch logs for
    #[serde(default)]
    pub flavour: FlavourConfig,

    /// Chat/image overlay compositing
    #[serde(default)]
    pub overlay: OverlayConfig,

    /// Session supervision settings
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory that finished recordings are written to
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    /// Directory for the rolling pre-activity buffer
    #[serde(default)]
    pub buffer_path: Option<PathBuf>,

    /// Maximum disk usage in GB before old recordings are pruned (0 = unlimited)
    #[serde(default = "default_max_storage_gb")]
    pub max_storage_gb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Whether the cloud store is used at all
    #[serde(default)]
    pub enabled: bool,

    /// Whether finished recordings are uploaded (requires write access)
    #[serde(default)]
    pub upload: bool,

    /// Base URL of the store API
    #[serde(default = "default_cloud_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub pass_key: String,

    /// Guild/account bucket the recordings belong to
    #[serde(default)]
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Output resolution as "WIDTHxHEIGHT"
    #[serde(default = "default_resolution")]
    pub resolution: String,

    /// Encoder identifier handed to the capture engine
    #[serde(default = "default_encoder")]
    pub encoder: String,

    #[serde(default)]
    pub quality: VideoQuality,

    #[serde(default)]
    pub capture_mode: CaptureMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    Low,
    #[default]
    Moderate,
    High,
    Ultra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Game,
    Window,
    Monitor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output devices to capture (engine device IDs)
    #[serde(default)]
    pub speakers: Vec<String>,

    #[serde(default = "default_volume")]
    pub speaker_volume: f32,

    /// Input devices to capture (engine device IDs)
    #[serde(default)]
    pub mics: Vec<String>,

    #[serde(default = "default_volume")]
    pub mic_volume: f32,

    #[serde(default)]
    pub push_to_talk: bool,

    #[serde(default)]
    pub force_mono: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavourConfig {
    #[serde(default = "default_true")]
    pub retail_enabled: bool,

    /// Retail client log directory
    #[serde(default)]
    pub retail_log_path: Option<PathBuf>,

    #[serde(default)]
    pub classic_enabled: bool,

    /// Classic client log directory
    #[serde(default)]
    pub classic_log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Optional custom image composited over the capture
    #[serde(default)]
    pub image_path: Option<PathBuf>,

    #[serde(default = "default_overlay_scale")]
    pub scale: f32,

    #[serde(default)]
    pub position_x: i32,

    #[serde(default)]
    pub position_y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Interval between maintenance restarts of an idle buffer (seconds)
    #[serde(default = "default_buffer_restart_secs")]
    pub buffer_restart_secs: u64,

    /// Process polling interval for game detection (ms)
    #[serde(default = "default_process_poll_ms")]
    pub process_poll_ms: u64,

    /// Retail executable name, without extension
    #[serde(default = "default_retail_process")]
    pub retail_process: String,

    /// Classic executable name, without extension
    #[serde(default = "default_classic_process")]
    pub classic_process: String,
}

// Default value functions
fn default_max_storage_gb() -> u64 {
    100
}

fn default_cloud_endpoint() -> String {
    "https://api.raidcast.dev".to_string()
}

fn default_fps() -> u32 {
    60
}

fn default_resolution() -> String {
    "1920x1080".to_string()
}

fn default_encoder() -> String {
    "x264".to_string()
}

fn default_volume() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_overlay_scale() -> f32 {
    1.0
}

fn default_buffer_restart_secs() -> u64 {
    15 * 60
}

fn default_process_poll_ms() -> u64 {
    2000
}

fn default_retail_process() -> String {
    "Wow".to_string()
}

fn default_classic_process() -> String {
    "WowClassic".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            buffer_path: None,
            max_storage_gb: default_max_storage_gb(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            upload: false,
            endpoint: default_cloud_endpoint(),
            user: String::new(),
            pass_key: String::new(),
            account: String::new(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            resolution: default_resolution(),
            encoder: default_encoder(),
            quality: VideoQuality::default(),
            capture_mode: CaptureMode::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            speakers: Vec::new(),
            speaker_volume: default_volume(),
            mics: Vec::new(),
            mic_volume: default_volume(),
            push_to_talk: false,
            force_mono: false,
        }
    }
}

impl Default for FlavourConfig {
    fn default() -> Self {
        Self {
            retail_enabled: true,
            retail_log_path: None,
            classic_enabled: false,
            classic_log_path: None,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            image_path: None,
            scale: default_overlay_scale(),
            position_x: 0,
            position_y: 0,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            buffer_restart_secs: default_buffer_restart_secs(),
            process_poll_ms: default_process_poll_ms(),
            retail_process: default_retail_process(),
            classic_process: default_classic_process(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            cloud: CloudConfig::default(),
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
            flavour: FlavourConfig::default(),
            overlay: OverlayConfig::default(),
            recording: RecordingConfig::default(),
            config_path: None,
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create(config_path)
    }

    /// Load configuration from an explicit path, creating a default file if missing
    pub fn load_or_create(config_path: PathBuf) -> Result<Self> {
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    /// Parse an existing config file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        config.config_path = Some(config_path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "raidcast", "agent")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

/// Produces the configuration that stage snapshots are projected from.
///
/// Every call returns whatever is current at that moment; stages fetch at
/// the start of their own step so a pass never works from a stale copy.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Arc<Config>;
}

/// In-memory handle on the live configuration, refreshed by the file watcher
#[derive(Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Swap in a freshly loaded configuration
    pub fn replace(&self, config: Config) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
    }

    /// Edit the current configuration in place
    pub fn update(&self, edit: impl FnOnce(&mut Config)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut next = Config::clone(&guard);
        edit(&mut next);
        *guard = Arc::new(next);
    }
}

impl ConfigSource for SharedConfig {
    fn load(&self) -> Arc<Config> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[storage]
storage_path = "/videos"
"#,
        )
        .unwrap();

        assert_eq!(config.storage.storage_path, Some(PathBuf::from("/videos")));
        assert_eq!(config.storage.buffer_path, None);
        assert_eq!(config.video.fps, 60);
        assert!(config.flavour.retail_enabled);
        assert!(!config.flavour.classic_enabled);
        assert_eq!(config.recording.buffer_restart_secs, 900);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::load_or_create(path.clone()).unwrap();
        assert!(path.exists());

        config.video.quality = VideoQuality::Ultra;
        config.audio.mics.push("default".to_string());
        config.save().unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.video.quality, VideoQuality::Ultra);
        assert_eq!(reloaded.audio.mics, vec!["default".to_string()]);
    }

    #[test]
    fn test_shared_config_update_is_visible_to_later_loads() {
        let shared = SharedConfig::new(Config::default());
        let before = shared.load();

        shared.update(|c| c.video.fps = 30);

        assert_eq!(before.video.fps, 60);
        assert_eq!(shared.load().video.fps, 30);
    }
}
