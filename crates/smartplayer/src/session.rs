//! Audio session seam.
//!
//! The coordinator never talks to CPAL directly. It is handed an [`AudioSession`]
//! at construction and opens its output ([`PlaybackStream`]) and input
//! ([`MeteringStream`]) through it. [`CpalAudioSession`] is the real implementation;
//! tests substitute in-memory fakes.

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;
use smartplayer_audio::config::{MeterConfig, PlaybackConfig};
use smartplayer_audio::device;

use crate::catalog::Track;
use crate::player::CpalPlayer;
use crate::recorder::CpalRecorder;

/// Routing requested from the platform when the coordinator starts up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Playback and microphone capture at the same time.
    pub play_and_record: bool,
    /// Route output to the speaker rather than the receiver/earpiece.
    pub default_to_speaker: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            play_and_record: true,
            default_to_speaker: true,
        }
    }
}

/// Repeat behaviour of a playback stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopMode {
    /// Play once and report completion.
    #[default]
    Once,
    /// Repeat forever; never completes on its own.
    Forever,
}

impl LoopMode {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled { LoopMode::Forever } else { LoopMode::Once }
    }

    /// Platform-style loop count: `0` plays once, `-1` repeats forever.
    pub fn loop_count(self) -> i32 {
        match self {
            LoopMode::Once => 0,
            LoopMode::Forever => -1,
        }
    }
}

/// Events sent from streams back to the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StreamEvent {
    /// The stream opened for `session` reached the end of its track by itself.
    Finished { session: u64 },
}

/// Handle a playback stream uses to report natural completion.
#[derive(Clone, Debug)]
pub struct CompletionNotifier {
    session: u64,
    tx: Sender<StreamEvent>,
}

impl CompletionNotifier {
    pub(crate) fn new(session: u64, tx: Sender<StreamEvent>) -> Self {
        Self { session, tx }
    }

    /// Report that the track played to its end. Not called on `stop`.
    pub fn finished(&self) {
        if self
            .tx
            .send(StreamEvent::Finished {
                session: self.session,
            })
            .is_err()
        {
            tracing::debug!(session = self.session, "completion dropped, coordinator gone");
        }
    }
}

/// An open output stream bound to one track.
///
/// `prepare`, `play` and `stop` are issued from the coordinator's output queue.
/// `stop` keeps the position; `close` releases the device and is final.
pub trait PlaybackStream: Send + Sync {
    fn locator(&self) -> &Path;
    fn prepare(&self) -> Result<()>;
    fn play(&self) -> Result<()>;
    fn stop(&self);
    fn close(&self);
    fn is_playing(&self) -> bool;
    fn set_looping(&self, mode: LoopMode);
    fn looping(&self) -> LoopMode;
    /// Move toward `level` (clamped to `[0, 1]`) over `fade`.
    fn set_volume(&self, level: f32, fade: Duration);
    fn volume(&self) -> f32;
    fn duration(&self) -> Option<Duration>;
    fn position(&self) -> Duration;
    fn seek(&self, position: Duration) -> Result<()>;
}

/// An open input stream used only for level metering.
pub trait MeteringStream: Send + Sync {
    fn prepare(&self) -> Result<()>;
    fn set_metering_enabled(&self, enabled: bool);
    fn record(&self) -> Result<()>;
    fn stop(&self);
    /// Refresh the power readings from the samples captured since the last call.
    fn update_meters(&self);
    /// Average power of `channel` in dBFS (`-160` when silent or idle).
    fn average_power(&self, channel: usize) -> f32;
    fn peak_power(&self, channel: usize) -> f32;
}

/// Platform audio session plus the factories for its streams.
pub trait AudioSession: Send + Sync {
    /// Configure routing. One-time: later calls return the first outcome.
    fn configure(&self, options: SessionOptions) -> Result<()>;
    fn open_player(
        &self,
        track: &Track,
        on_finish: CompletionNotifier,
    ) -> Result<Arc<dyn PlaybackStream>>;
    fn open_recorder(&self) -> Result<Arc<dyn MeteringStream>>;
}

/// Device preferences for [`CpalAudioSession`].
#[derive(Clone, Debug, Default)]
pub struct DeviceSettings {
    /// Output device substring; `None` uses the host default.
    pub output_device: Option<String>,
    /// Input device substring; `None` uses the host default.
    pub input_device: Option<String>,
    pub playback: PlaybackConfig,
    pub meter: MeterConfig,
}

/// [`AudioSession`] backed by the default CPAL host.
pub struct CpalAudioSession {
    devices: DeviceSettings,
    configured: OnceLock<std::result::Result<SessionOptions, String>>,
}

impl CpalAudioSession {
    pub fn new(devices: DeviceSettings) -> Self {
        Self {
            devices,
            configured: OnceLock::new(),
        }
    }

    fn check_routing(&self, options: SessionOptions) -> Result<()> {
        let host = cpal::default_host();
        device::pick_device(&host, self.devices.output_device.as_deref())?;
        if options.play_and_record {
            device::pick_input_device(&host, self.devices.input_device.as_deref())?;
        }
        Ok(())
    }
}

impl AudioSession for CpalAudioSession {
    fn configure(&self, options: SessionOptions) -> Result<()> {
        let outcome = self.configured.get_or_init(|| {
            self.check_routing(options)
                .map(|_| options)
                .map_err(|e| format!("{e:#}"))
        });
        match outcome {
            Ok(active) => {
                if *active != options {
                    tracing::debug!(?active, requested = ?options, "audio session already configured");
                }
                Ok(())
            }
            Err(msg) => Err(anyhow!("audio session configuration failed: {msg}")),
        }
    }

    fn open_player(
        &self,
        track: &Track,
        on_finish: CompletionNotifier,
    ) -> Result<Arc<dyn PlaybackStream>> {
        let player = CpalPlayer::open(
            &track.locator,
            self.devices.output_device.clone(),
            self.devices.playback.clone(),
            on_finish,
        )?;
        Ok(Arc::new(player))
    }

    fn open_recorder(&self) -> Result<Arc<dyn MeteringStream>> {
        let recorder = CpalRecorder::open(self.devices.input_device.clone(), self.devices.meter)?;
        Ok(Arc::new(recorder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_mode_maps_to_platform_counts() {
        assert_eq!(LoopMode::from_enabled(false).loop_count(), 0);
        assert_eq!(LoopMode::from_enabled(true).loop_count(), -1);
        assert_eq!(LoopMode::default(), LoopMode::Once);
    }

    #[test]
    fn completion_notifier_tags_events_with_session() {
        let (tx, rx) = crossbeam_channel::unbounded();
        CompletionNotifier::new(7, tx).finished();
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::Finished { session: 7 });
    }

    #[test]
    fn completion_notifier_tolerates_closed_channel() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        CompletionNotifier::new(1, tx).finished();
    }

    #[test]
    fn session_options_default_to_play_and_record_on_speaker() {
        let options = SessionOptions::default();
        assert!(options.play_and_record);
        assert!(options.default_to_speaker);
    }
}
