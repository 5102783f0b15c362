//! The capture pipeline stages
//!
//! Base and video changes need the engine stopped; audio and overlay apply
//! live. The flavour stage owns the activity-source set.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use super::validate::{require_dir, require_file, validate_cloud};
use super::{ConfigError, SessionContext, StageBehavior};
use crate::activity::Flavour;
use crate::config::{CaptureMode, Config, VideoQuality};
use crate::store::CloudCredentials;

const MIN_FPS: u32 = 10;
const MAX_FPS: u32 = 60;
const MAX_OVERLAY_SCALE: f32 = 5.0;

// ============================================================================
// Base: storage, buffer and cloud
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSnapshot {
    pub credentials: CloudCredentials,
    pub upload: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseSnapshot {
    pub storage_path: PathBuf,
    pub buffer_path: PathBuf,
    pub max_storage_gb: u64,
    pub cloud: Option<CloudSnapshot>,
}

pub struct BaseStage;

#[async_trait]
impl StageBehavior for BaseStage {
    type Snapshot = BaseSnapshot;

    fn name(&self) -> &'static str {
        "base"
    }

    fn fetch(&self, config: &Config) -> BaseSnapshot {
        let cloud = config.cloud.enabled.then(|| CloudSnapshot {
            credentials: CloudCredentials {
                endpoint: config.cloud.endpoint.clone(),
                user: config.cloud.user.clone(),
                pass_key: config.cloud.pass_key.clone(),
                account: config.cloud.account.clone(),
            },
            upload: config.cloud.upload,
        });

        BaseSnapshot {
            storage_path: config.storage.storage_path.clone().unwrap_or_default(),
            buffer_path: config.storage.buffer_path.clone().unwrap_or_default(),
            max_storage_gb: config.storage.max_storage_gb,
            cloud,
        }
    }

    async fn validate(&self, snapshot: &BaseSnapshot, ctx: &SessionContext) -> Result<(), ConfigError> {
        require_dir(&snapshot.storage_path, "Storage path")?;
        require_dir(&snapshot.buffer_path, "Buffer path")?;

        if snapshot.storage_path == snapshot.buffer_path {
            return Err(ConfigError::invalid(
                "Storage path and buffer path must be different directories",
            ));
        }

        if let Some(cloud) = &snapshot.cloud {
            validate_cloud(ctx.store_connector(), cloud).await?;
        }

        Ok(())
    }

    async fn apply(&self, snapshot: &BaseSnapshot, ctx: &mut SessionContext) -> Result<()> {
        ctx.quiesce().await?;
        ctx.engine.engine_mut().configure_base(snapshot)?;

        ctx.store = match &snapshot.cloud {
            Some(cloud) => {
                info!("Cloud store connected for {}", cloud.credentials.account);
                Some(ctx.store_connector().connect(&cloud.credentials)?)
            }
            None => None,
        };

        Ok(())
    }
}

// ============================================================================
// Video
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Parse "WIDTHxHEIGHT"
    pub fn parse(value: &str) -> Option<Self> {
        let (w, h) = value.trim().split_once(['x', 'X'])?;
        Some(Self {
            width: w.trim().parse().ok()?,
            height: h.trim().parse().ok()?,
        })
    }

    /// Encoders need non-zero, even dimensions
    pub fn is_encodable(&self) -> bool {
        self.width > 0 && self.height > 0 && self.width % 2 == 0 && self.height % 2 == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSnapshot {
    pub fps: u32,
    /// `None` when the configured string does not parse
    pub resolution: Option<Resolution>,
    pub encoder: String,
    pub quality: VideoQuality,
    pub capture_mode: CaptureMode,
}

pub struct VideoStage;

#[async_trait]
impl StageBehavior for VideoStage {
    type Snapshot = VideoSnapshot;

    fn name(&self) -> &'static str {
        "video"
    }

    fn fetch(&self, config: &Config) -> VideoSnapshot {
        VideoSnapshot {
            fps: config.video.fps,
            resolution: Resolution::parse(&config.video.resolution),
            encoder: config.video.encoder.clone(),
            quality: config.video.quality,
            capture_mode: config.video.capture_mode,
        }
    }

    async fn validate(&self, snapshot: &VideoSnapshot, _ctx: &SessionContext) -> Result<(), ConfigError> {
        if !(MIN_FPS..=MAX_FPS).contains(&snapshot.fps) {
            return Err(ConfigError::invalid(format!(
                "FPS must be between {} and {}",
                MIN_FPS, MAX_FPS
            )));
        }

        match snapshot.resolution {
            Some(resolution) if resolution.is_encodable() => {}
            _ => {
                return Err(ConfigError::invalid(
                    "Resolution must be WIDTHxHEIGHT with even, non-zero dimensions",
                ))
            }
        }

        if snapshot.encoder.trim().is_empty() {
            return Err(ConfigError::invalid("No video encoder selected"));
        }

        Ok(())
    }

    async fn apply(&self, snapshot: &VideoSnapshot, ctx: &mut SessionContext) -> Result<()> {
        ctx.quiesce().await?;
        ctx.engine.engine_mut().configure_video(snapshot)
    }
}

// ============================================================================
// Audio
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSnapshot {
    pub speakers: Vec<String>,
    pub speaker_volume: f32,
    pub mics: Vec<String>,
    pub mic_volume: f32,
    pub push_to_talk: bool,
    pub force_mono: bool,
}

pub struct AudioStage;

#[async_trait]
impl StageBehavior for AudioStage {
    type Snapshot = AudioSnapshot;

    fn name(&self) -> &'static str {
        "audio"
    }

    fn fetch(&self, config: &Config) -> AudioSnapshot {
        AudioSnapshot {
            speakers: config.audio.speakers.clone(),
            speaker_volume: config.audio.speaker_volume,
            mics: config.audio.mics.clone(),
            mic_volume: config.audio.mic_volume,
            push_to_talk: config.audio.push_to_talk,
            force_mono: config.audio.force_mono,
        }
    }

    async fn validate(&self, snapshot: &AudioSnapshot, _ctx: &SessionContext) -> Result<(), ConfigError> {
        for (volume, label) in [
            (snapshot.speaker_volume, "Speaker volume"),
            (snapshot.mic_volume, "Mic volume"),
        ] {
            if !(0.0..=1.0).contains(&volume) {
                return Err(ConfigError::invalid(format!(
                    "{} must be between 0 and 1",
                    label
                )));
            }
        }

        if snapshot
            .speakers
            .iter()
            .chain(snapshot.mics.iter())
            .any(|device| device.trim().is_empty())
        {
            return Err(ConfigError::invalid("Audio device IDs must not be empty"));
        }

        Ok(())
    }

    async fn apply(&self, snapshot: &AudioSnapshot, ctx: &mut SessionContext) -> Result<()> {
        ctx.engine.engine_mut().configure_audio(snapshot)
    }
}

// ============================================================================
// Flavour: which activity sources exist
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavourSnapshot {
    /// Log directory per enabled flavour
    pub retail: Option<PathBuf>,
    pub classic: Option<PathBuf>,
}

impl FlavourSnapshot {
    pub fn selection(&self) -> Vec<(Flavour, PathBuf)> {
        let mut selection = Vec::new();
        if let Some(path) = &self.retail {
            selection.push((Flavour::Retail, path.clone()));
        }
        if let Some(path) = &self.classic {
            selection.push((Flavour::Classic, path.clone()));
        }
        selection
    }
}

pub struct FlavourStage;

#[async_trait]
impl StageBehavior for FlavourStage {
    type Snapshot = FlavourSnapshot;

    fn name(&self) -> &'static str {
        "flavour"
    }

    fn fetch(&self, config: &Config) -> FlavourSnapshot {
        let flavour = &config.flavour;
        FlavourSnapshot {
            retail: flavour
                .retail_enabled
                .then(|| flavour.retail_log_path.clone().unwrap_or_default()),
            classic: flavour
                .classic_enabled
                .then(|| flavour.classic_log_path.clone().unwrap_or_default()),
        }
    }

    async fn validate(&self, snapshot: &FlavourSnapshot, _ctx: &SessionContext) -> Result<(), ConfigError> {
        if let Some(path) = &snapshot.retail {
            require_dir(path, "Retail log path")?;
        }
        if let Some(path) = &snapshot.classic {
            require_dir(path, "Classic log path")?;
        }
        Ok(())
    }

    async fn apply(&self, snapshot: &FlavourSnapshot, ctx: &mut SessionContext) -> Result<()> {
        if ctx.mid_activity() {
            info!("Stopping live recording before swapping activity sources");
            ctx.quiesce().await?;
        }
        ctx.rebuild_sources(&snapshot.selection())
    }
}

// ============================================================================
// Overlay
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySnapshot {
    pub enabled: bool,
    pub image_path: Option<PathBuf>,
    pub scale: f32,
    pub position: (i32, i32),
}

pub struct OverlayStage;

#[async_trait]
impl StageBehavior for OverlayStage {
    type Snapshot = OverlaySnapshot;

    fn name(&self) -> &'static str {
        "overlay"
    }

    fn fetch(&self, config: &Config) -> OverlaySnapshot {
        OverlaySnapshot {
            enabled: config.overlay.enabled,
            image_path: config.overlay.image_path.clone(),
            scale: config.overlay.scale,
            position: (config.overlay.position_x, config.overlay.position_y),
        }
    }

    async fn validate(&self, snapshot: &OverlaySnapshot, _ctx: &SessionContext) -> Result<(), ConfigError> {
        if !snapshot.enabled {
            return Ok(());
        }

        if !(snapshot.scale > 0.0 && snapshot.scale <= MAX_OVERLAY_SCALE) {
            return Err(ConfigError::invalid(format!(
                "Overlay scale must be greater than 0 and at most {}",
                MAX_OVERLAY_SCALE
            )));
        }

        if let Some(image) = &snapshot.image_path {
            require_file(image, "Overlay image")?;
        }

        Ok(())
    }

    async fn apply(&self, snapshot: &OverlaySnapshot, ctx: &mut SessionContext) -> Result<()> {
        ctx.engine.engine_mut().configure_overlay(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::session_context;

    #[test]
    fn test_resolution_parsing() {
        assert_eq!(
            Resolution::parse("1920x1080"),
            Some(Resolution {
                width: 1920,
                height: 1080
            })
        );
        assert_eq!(
            Resolution::parse(" 2560 X 1440 "),
            Some(Resolution {
                width: 2560,
                height: 1440
            })
        );
        assert_eq!(Resolution::parse("1080p"), None);
        assert!(!Resolution::parse("1921x1080").unwrap().is_encodable());
    }

    #[test]
    fn test_disabled_cloud_has_no_snapshot() {
        let mut config = Config::default();
        config.cloud.user = "someone".to_string();
        assert_eq!(BaseStage.fetch(&config).cloud, None);

        config.cloud.enabled = true;
        assert!(BaseStage.fetch(&config).cloud.is_some());
    }

    #[tokio::test]
    async fn test_base_rejects_missing_storage_path() {
        let (ctx, _harness) = session_context();
        let snapshot = BaseStage.fetch(&Config::default());

        let error = BaseStage.validate(&snapshot, &ctx).await.unwrap_err();

        assert_eq!(error, ConfigError::invalid("Storage path is not set"));
    }

    #[tokio::test]
    async fn test_base_rejects_shared_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _harness) = session_context();
        let mut config = Config::default();
        config.storage.storage_path = Some(dir.path().to_path_buf());
        config.storage.buffer_path = Some(dir.path().to_path_buf());

        let error = BaseStage
            .validate(&BaseStage.fetch(&config), &ctx)
            .await
            .unwrap_err();

        assert!(error.to_string().contains("must be different"));
    }

    #[tokio::test]
    async fn test_video_bounds() {
        let (ctx, _harness) = session_context();
        let mut config = Config::default();
        assert!(VideoStage.validate(&VideoStage.fetch(&config), &ctx).await.is_ok());

        config.video.fps = 120;
        assert!(VideoStage.validate(&VideoStage.fetch(&config), &ctx).await.is_err());

        config.video.fps = 30;
        config.video.resolution = "wide".to_string();
        assert!(VideoStage.validate(&VideoStage.fetch(&config), &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_audio_volume_range() {
        let (ctx, _harness) = session_context();
        let mut config = Config::default();
        config.audio.mic_volume = 1.5;

        let error = AudioStage
            .validate(&AudioStage.fetch(&config), &ctx)
            .await
            .unwrap_err();

        assert_eq!(error, ConfigError::invalid("Mic volume must be between 0 and 1"));
    }

    #[tokio::test]
    async fn test_flavour_requires_log_dirs_for_enabled_flavours() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _harness) = session_context();
        let mut config = Config::default();

        let error = FlavourStage
            .validate(&FlavourStage.fetch(&config), &ctx)
            .await
            .unwrap_err();
        assert_eq!(error, ConfigError::invalid("Retail log path is not set"));

        config.flavour.retail_enabled = false;
        let snapshot = FlavourStage.fetch(&config);
        assert!(snapshot.selection().is_empty());
        assert!(FlavourStage.validate(&snapshot, &ctx).await.is_ok());

        config.flavour.classic_enabled = true;
        config.flavour.classic_log_path = Some(dir.path().to_path_buf());
        let snapshot = FlavourStage.fetch(&config);
        assert_eq!(
            snapshot.selection(),
            vec![(Flavour::Classic, dir.path().to_path_buf())]
        );
        assert!(FlavourStage.validate(&snapshot, &ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_overlay_only_checked_when_enabled() {
        let (ctx, _harness) = session_context();
        let mut config = Config::default();
        config.overlay.scale = 0.0;
        assert!(OverlayStage.validate(&OverlayStage.fetch(&config), &ctx).await.is_ok());

        config.overlay.enabled = true;
        assert!(OverlayStage.validate(&OverlayStage.fetch(&config), &ctx).await.is_err());

        config.overlay.scale = 1.0;
        config.overlay.image_path = Some(PathBuf::from("/definitely/not/here.png"));
        assert!(OverlayStage.validate(&OverlayStage.fetch(&config), &ctx).await.is_err());
    }
}
