//! Configuration loading and resolution.
//!
//! An optional TOML file supplies defaults; command-line flags win over it.
//!
//! ```toml
//! library_dir = "/home/me/Music"
//! default_track = "assets/song.mp3"
//! output_device = "USB"
//! input_device = "MacBook"
//! autoplay = true
//!
//! [timing]
//! fade_ms = 500
//! volume_interval_ms = 300
//! position_interval_ms = 16
//!
//! [playback]
//! buffer_seconds = 2.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Args;
use crate::coordinator::CoordinatorSettings;
use crate::session::DeviceSettings;

pub use smartplayer_audio::config::{MeterConfig, PlaybackConfig};

/// Config file schema. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    /// Music directory the playlist is built from.
    pub library_dir: Option<PathBuf>,
    /// Track used when the library is empty.
    pub default_track: Option<PathBuf>,
    /// Output device substring.
    pub output_device: Option<String>,
    /// Input device substring.
    pub input_device: Option<String>,
    /// Start playing on launch.
    pub autoplay: Option<bool>,
    pub timing: Option<TimingConfig>,
    pub playback: Option<PlaybackFileConfig>,
    pub meter: Option<MeterFileConfig>,
}

/// Coordinator timing, in milliseconds.
#[derive(Debug, Default, Deserialize)]
pub struct TimingConfig {
    pub fade_ms: Option<u64>,
    pub volume_interval_ms: Option<u64>,
    pub position_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    pub chunk_frames: Option<usize>,
    pub refill_max_frames: Option<usize>,
    pub buffer_seconds: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MeterFileConfig {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

impl FileConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<FileConfig>(raw)?)
    }
}

/// Everything the runtime needs, after merging file and flags.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub library_dir: Option<PathBuf>,
    pub autoplay: bool,
    pub devices: DeviceSettings,
    pub coordinator: CoordinatorSettings,
}

impl PlayerConfig {
    pub fn resolve(args: &Args, file: FileConfig) -> Self {
        let timing = file.timing.unwrap_or_default();
        let playback_file = file.playback.unwrap_or_default();
        let meter_file = file.meter.unwrap_or_default();

        let defaults = PlaybackConfig::default();
        let playback = PlaybackConfig {
            chunk_frames: args
                .chunk_frames
                .or(playback_file.chunk_frames)
                .unwrap_or(defaults.chunk_frames)
                .max(1),
            refill_max_frames: args
                .refill_max_frames
                .or(playback_file.refill_max_frames)
                .unwrap_or(defaults.refill_max_frames)
                .max(1),
            buffer_seconds: args
                .buffer_seconds
                .or(playback_file.buffer_seconds)
                .filter(|s| s.is_finite() && *s > 0.0)
                .unwrap_or(defaults.buffer_seconds),
        };

        let meter_defaults = MeterConfig::default();
        let meter = MeterConfig {
            sample_rate: meter_file.sample_rate.unwrap_or(meter_defaults.sample_rate),
            channels: meter_file.channels.unwrap_or(meter_defaults.channels).max(1),
        };

        let mut coordinator = CoordinatorSettings::default();
        if let Some(path) = args.default_track.clone().or(file.default_track) {
            coordinator.default_track = path;
        }
        if let Some(ms) = timing.fade_ms {
            coordinator.fade = Duration::from_millis(ms);
        }
        if let Some(ms) = timing.volume_interval_ms.filter(|ms| *ms > 0) {
            coordinator.volume_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = timing.position_interval_ms.filter(|ms| *ms > 0) {
            coordinator.position_interval = Duration::from_millis(ms);
        }

        Self {
            library_dir: args.library.clone().or(file.library_dir),
            autoplay: args.autoplay || file.autoplay.unwrap_or(false),
            devices: DeviceSettings {
                output_device: normalize_device_name(args.device.clone().or(file.output_device)),
                input_device: normalize_device_name(
                    args.input_device.clone().or(file.input_device),
                ),
                playback,
                meter,
            },
            coordinator,
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB DAC ".to_string())),
            Some("USB DAC".to_string())
        );
    }

    #[test]
    fn parse_full_file() {
        let file = FileConfig::parse(
            r#"
            library_dir = "/music"
            output_device = "Speakers"
            autoplay = true

            [timing]
            fade_ms = 250
            volume_interval_ms = 100

            [playback]
            buffer_seconds = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(file.library_dir, Some(PathBuf::from("/music")));
        assert_eq!(file.autoplay, Some(true));
        assert_eq!(file.timing.as_ref().unwrap().fade_ms, Some(250));
        assert_eq!(file.playback.as_ref().unwrap().buffer_seconds, Some(1.0));
    }

    #[test]
    fn parse_rejects_bad_types() {
        assert!(FileConfig::parse("autoplay = \"yes\"").is_err());
    }

    #[test]
    fn defaults_without_file_or_flags() {
        let cfg = PlayerConfig::resolve(&Args::default(), FileConfig::default());
        assert!(cfg.library_dir.is_none());
        assert!(!cfg.autoplay);
        assert_eq!(cfg.devices.playback, PlaybackConfig::default());
        assert_eq!(cfg.devices.meter, MeterConfig::default());
        assert_eq!(cfg.coordinator.fade, Duration::from_millis(500));
        assert_eq!(cfg.coordinator.volume_interval, Duration::from_millis(300));
        assert_eq!(cfg.coordinator.position_interval, Duration::from_millis(16));
    }

    #[test]
    fn flags_override_file() {
        let file = FileConfig::parse(
            r#"
            library_dir = "/from-file"
            output_device = "File Device"
            [playback]
            chunk_frames = 2048
            buffer_seconds = 3.0
            "#,
        )
        .unwrap();
        let args = Args {
            library: Some(PathBuf::from("/from-flag")),
            device: Some("Flag Device".into()),
            buffer_seconds: Some(0.5),
            ..Args::default()
        };
        let cfg = PlayerConfig::resolve(&args, file);
        assert_eq!(cfg.library_dir, Some(PathBuf::from("/from-flag")));
        assert_eq!(cfg.devices.output_device.as_deref(), Some("Flag Device"));
        assert_eq!(cfg.devices.playback.chunk_frames, 2048);
        assert_eq!(cfg.devices.playback.buffer_seconds, 0.5);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let file = FileConfig::parse(
            r#"
            [timing]
            volume_interval_ms = 0
            [playback]
            buffer_seconds = -1.0
            chunk_frames = 0
            "#,
        )
        .unwrap();
        let cfg = PlayerConfig::resolve(&Args::default(), file);
        assert_eq!(cfg.coordinator.volume_interval, Duration::from_millis(300));
        assert_eq!(cfg.devices.playback.buffer_seconds, 2.0);
        assert_eq!(cfg.devices.playback.chunk_frames, 1);
    }
}
