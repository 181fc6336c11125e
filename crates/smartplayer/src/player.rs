//! CPAL-backed [`PlaybackStream`].
//!
//! A player owns at most one session thread at a time. The session thread holds
//! the CPAL output stream and runs the engine pipeline until the track drains or
//! the session is cancelled. Seeking cancels the running session and starts a
//! fresh one at the new offset; a session id keeps late completions from stale
//! sessions from being reported.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::DeviceTrait;
use smartplayer_audio::config::PlaybackConfig;
use smartplayer_audio::decode::{self, DecodeControl, DecodedSource};
use smartplayer_audio::device;
use smartplayer_audio::gain::VolumeControl;
use smartplayer_audio::pipeline::{self, SessionControls, SessionEnd};

use crate::session::{CompletionNotifier, LoopMode, PlaybackStream};

/// A decoded source waiting for its output session.
struct PendingSource {
    source: DecodedSource,
    decode: DecodeControl,
    start_ms: u64,
}

impl PendingSource {
    fn discard(self) {
        self.decode.cancel.store(true, Ordering::Relaxed);
        self.source.queue.close();
    }
}

struct SessionHandle {
    controls: SessionControls,
    decode: DecodeControl,
    output_rate: Arc<AtomicU32>,
    start_ms: u64,
    join: JoinHandle<()>,
}

impl SessionHandle {
    fn signal_cancel(&self) {
        self.controls.cancel.store(true, Ordering::Relaxed);
        self.decode.cancel.store(true, Ordering::Relaxed);
    }

    fn position_ms(&self) -> u64 {
        let rate = self.output_rate.load(Ordering::Acquire);
        if rate == 0 {
            return self.start_ms;
        }
        self.controls.played_frames.load(Ordering::Relaxed) * 1000 / u64::from(rate)
    }
}

#[derive(Default)]
struct PlayerState {
    pending: Option<PendingSource>,
    session: Option<SessionHandle>,
    closed: bool,
}

/// Local-file player on the default CPAL host.
pub struct CpalPlayer {
    locator: PathBuf,
    device_name: Option<String>,
    playback: PlaybackConfig,
    duration_ms: Option<u64>,
    looping: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    volume: Arc<VolumeControl>,
    session_id: Arc<AtomicU64>,
    on_finish: CompletionNotifier,
    state: Mutex<PlayerState>,
}

impl CpalPlayer {
    /// Probe `path` and start decoding it. Fails when the file cannot be opened
    /// or has no playable audio track.
    pub fn open(
        path: &Path,
        device_name: Option<String>,
        playback: PlaybackConfig,
        on_finish: CompletionNotifier,
    ) -> Result<Self> {
        let looping = Arc::new(AtomicBool::new(false));
        let control = DecodeControl {
            looping: looping.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        let source = decode::start_file_decode(path, playback.buffer_seconds, None, control.clone())
            .with_context(|| format!("open player for {:?}", path))?;
        tracing::info!(
            path = ?path,
            rate_hz = source.spec.rate,
            channels = source.spec.channels.count(),
            duration_ms = ?source.duration_ms,
            codec = source.codec.as_deref().unwrap_or("unknown"),
            "player opened"
        );

        Ok(Self {
            locator: path.to_path_buf(),
            device_name,
            playback,
            duration_ms: source.duration_ms,
            looping,
            playing: Arc::new(AtomicBool::new(false)),
            volume: Arc::new(VolumeControl::default()),
            session_id: Arc::new(AtomicU64::new(0)),
            on_finish,
            state: Mutex::new(PlayerState {
                pending: Some(PendingSource {
                    source,
                    decode: control,
                    start_ms: 0,
                }),
                ..PlayerState::default()
            }),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PlayerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn decode_from(&self, start_ms: u64) -> Result<PendingSource> {
        let control = DecodeControl {
            looping: self.looping.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        let playback = effective_playback_for_seek(&self.playback, Some(start_ms));
        let source = decode::start_file_decode(
            &self.locator,
            playback.buffer_seconds,
            Some(start_ms),
            control.clone(),
        )?;
        Ok(PendingSource {
            source,
            decode: control,
            start_ms,
        })
    }

    /// Make sure a session thread exists, spawning one paused if needed.
    fn ensure_session(&self, state: &mut PlayerState) -> Result<()> {
        if state.closed {
            return Err(anyhow!("player for {:?} is closed", self.locator));
        }
        if state.session.is_some() {
            return Ok(());
        }
        let pending = match state.pending.take() {
            Some(p) => p,
            None => self.decode_from(0)?,
        };
        let paused = !self.playing.load(Ordering::Relaxed);
        state.session = Some(self.spawn_session(pending, paused)?);
        Ok(())
    }

    fn spawn_session(&self, pending: PendingSource, paused: bool) -> Result<SessionHandle> {
        let my_id = self
            .session_id
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);
        let controls = SessionControls::new(self.volume.clone(), paused);
        let output_rate = Arc::new(AtomicU32::new(0));
        let start_ms = pending.start_ms;
        let decode = pending.decode.clone();

        let seek_ms = (start_ms > 0).then_some(start_ms);
        let playback = effective_playback_for_seek(&self.playback, seek_ms);
        let device_name = self.device_name.clone();
        let duration_ms = self.duration_ms;
        let locator = self.locator.clone();
        let session_id = self.session_id.clone();
        let playing = self.playing.clone();
        let on_finish = self.on_finish.clone();
        let controls_for_thread = controls.clone();
        let rate_for_thread = output_rate.clone();

        let join = std::thread::Builder::new()
            .name("smartplayer-session".into())
            .spawn(move || {
                let srcq = pending.source.queue.clone();
                let result = run_session(
                    device_name.as_deref(),
                    &playback,
                    pending.source,
                    seek_ms,
                    duration_ms,
                    &controls_for_thread,
                    &rate_for_thread,
                );
                srcq.close();
                let current = session_id.load(Ordering::Relaxed) == my_id;
                match result {
                    Ok(SessionEnd::Finished) if current => {
                        tracing::info!(path = ?locator, "track finished");
                        playing.store(false, Ordering::Relaxed);
                        on_finish.finished();
                    }
                    Ok(end) => tracing::debug!(path = ?locator, ?end, current, "session ended"),
                    Err(e) => tracing::warn!(path = ?locator, "playback session error: {e:#}"),
                }
            })
            .context("spawn session thread")?;

        Ok(SessionHandle {
            controls,
            decode,
            output_rate,
            start_ms,
            join,
        })
    }
}

/// Open the output device and run the pipeline for one session.
fn run_session(
    device_name: Option<&str>,
    playback: &PlaybackConfig,
    source: DecodedSource,
    seek_ms: Option<u64>,
    duration_ms: Option<u64>,
    controls: &SessionControls,
    output_rate: &AtomicU32,
) -> Result<SessionEnd> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device_name)?;
    let config = device::pick_output_config(&device, Some(source.spec.rate))?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = device::pick_buffer_size(&config) {
        stream_config.buffer_size = buf;
    }

    if let Some(ms) = seek_ms {
        if let Some(frames) = played_frames_from_seek(ms, duration_ms, stream_config.sample_rate) {
            controls.played_frames.store(frames, Ordering::Relaxed);
        }
    }
    output_rate.store(stream_config.sample_rate, Ordering::Release);

    tracing::info!(
        device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        sample_format = ?config.sample_format(),
        seek_ms = ?seek_ms,
        "output session started"
    );

    pipeline::play_decoded_source(&device, &config, &stream_config, playback, source, controls)
}

/// Cancel a session and wait for its thread.
fn cancel_session(session: &mut Option<SessionHandle>) {
    if let Some(sess) = session.take() {
        sess.signal_cancel();
        let _ = sess.join.join();
    }
}

/// Cancel a session without blocking the caller.
fn cancel_session_async(session: &mut Option<SessionHandle>) {
    if let Some(sess) = session.take() {
        sess.signal_cancel();
        std::thread::spawn(move || {
            let _ = sess.join.join();
        });
    }
}

impl PlaybackStream for CpalPlayer {
    fn locator(&self) -> &Path {
        &self.locator
    }

    fn prepare(&self) -> Result<()> {
        let mut state = self.lock_state();
        self.ensure_session(&mut state)
    }

    fn play(&self) -> Result<()> {
        let mut state = self.lock_state();
        self.playing.store(true, Ordering::Relaxed);
        if let Err(e) = self.ensure_session(&mut state) {
            self.playing.store(false, Ordering::Relaxed);
            return Err(e);
        }
        if let Some(sess) = state.session.as_ref() {
            sess.controls.paused.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    fn stop(&self) {
        let state = self.lock_state();
        self.playing.store(false, Ordering::Relaxed);
        if let Some(sess) = state.session.as_ref() {
            sess.controls.paused.store(true, Ordering::Relaxed);
        }
    }

    fn close(&self) {
        let mut state = self.lock_state();
        if state.closed {
            return;
        }
        state.closed = true;
        self.playing.store(false, Ordering::Relaxed);
        self.session_id.fetch_add(1, Ordering::Relaxed);
        cancel_session(&mut state.session);
        if let Some(pending) = state.pending.take() {
            pending.discard();
        }
        tracing::debug!(path = ?self.locator, "player closed");
    }

    fn is_playing(&self) -> bool {
        let state = self.lock_state();
        state.session.is_some() && self.playing.load(Ordering::Relaxed)
    }

    fn set_looping(&self, mode: LoopMode) {
        self.looping
            .store(mode == LoopMode::Forever, Ordering::Relaxed);
    }

    fn looping(&self) -> LoopMode {
        LoopMode::from_enabled(self.looping.load(Ordering::Relaxed))
    }

    fn set_volume(&self, level: f32, fade: Duration) {
        self.volume.set(level, fade);
    }

    fn volume(&self) -> f32 {
        self.volume.target()
    }

    fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }

    fn position(&self) -> Duration {
        let state = self.lock_state();
        let ms = match (&state.session, &state.pending) {
            (Some(sess), _) => sess.position_ms(),
            (None, Some(pending)) => pending.start_ms,
            (None, None) => 0,
        };
        Duration::from_millis(wrap_position_ms(
            ms,
            self.duration_ms,
            self.looping.load(Ordering::Relaxed),
        ))
    }

    fn seek(&self, position: Duration) -> Result<()> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(anyhow!("player for {:?} is closed", self.locator));
        }
        let requested = u64::try_from(position.as_millis()).unwrap_or(u64::MAX);
        let ms = self.duration_ms.map_or(requested, |d| requested.min(d));
        tracing::debug!(path = ?self.locator, seek_ms = ms, "seek");

        let had_session = state.session.is_some();
        self.session_id.fetch_add(1, Ordering::Relaxed);
        cancel_session_async(&mut state.session);
        if let Some(old) = state.pending.take() {
            old.discard();
        }

        let pending = self.decode_from(ms)?;
        if had_session {
            let paused = !self.playing.load(Ordering::Relaxed);
            state.session = Some(self.spawn_session(pending, paused)?);
        } else {
            state.pending = Some(pending);
        }
        Ok(())
    }
}

impl Drop for CpalPlayer {
    fn drop(&mut self) {
        let mut state = self.lock_state();
        cancel_session_async(&mut state.session);
        if let Some(pending) = state.pending.take() {
            pending.discard();
        }
    }
}

/// Smaller buffers after a seek so playback resumes quickly.
fn effective_playback_for_seek(playback: &PlaybackConfig, seek_ms: Option<u64>) -> PlaybackConfig {
    let mut playback_eff = playback.clone();
    if seek_ms.is_some() {
        playback_eff.buffer_seconds = playback_eff.buffer_seconds.min(1.0);
        playback_eff.refill_max_frames = playback_eff.refill_max_frames.min(2048);
        playback_eff.chunk_frames = playback_eff.chunk_frames.min(1024);
    }
    playback_eff
}

fn played_frames_from_seek(
    seek_ms: u64,
    duration_ms: Option<u64>,
    sample_rate_hz: u32,
) -> Option<u64> {
    if sample_rate_hz == 0 {
        return None;
    }
    let target_ms = duration_ms.map_or(seek_ms, |total| seek_ms.min(total));
    Some(target_ms.saturating_mul(sample_rate_hz as u64) / 1000)
}

/// Played time folded into the track: modulo the duration while looping,
/// capped at the duration otherwise.
fn wrap_position_ms(ms: u64, duration_ms: Option<u64>, looping: bool) -> u64 {
    match duration_ms {
        Some(d) if d > 0 && looping => ms % d,
        Some(d) => ms.min(d),
        None => ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_playback_for_seek_caps_values() {
        let playback = PlaybackConfig {
            buffer_seconds: 3.0,
            refill_max_frames: 8192,
            chunk_frames: 4096,
        };
        let eff = effective_playback_for_seek(&playback, Some(1000));
        assert_eq!(eff.buffer_seconds, 1.0);
        assert_eq!(eff.refill_max_frames, 2048);
        assert_eq!(eff.chunk_frames, 1024);
    }

    #[test]
    fn effective_playback_for_seek_keeps_values_without_seek() {
        let playback = PlaybackConfig::default();
        assert_eq!(effective_playback_for_seek(&playback, None), playback);
    }

    #[test]
    fn played_frames_from_seek_clamps_to_duration() {
        assert_eq!(played_frames_from_seek(5_000, Some(2_000), 48_000), Some(96_000));
        assert_eq!(played_frames_from_seek(1_500, None, 44_100), Some(66_150));
        assert!(played_frames_from_seek(1_000, Some(2_000), 0).is_none());
    }

    #[test]
    fn position_wraps_only_while_looping() {
        assert_eq!(wrap_position_ms(12_500, Some(10_000), true), 2_500);
        assert_eq!(wrap_position_ms(12_500, Some(10_000), false), 10_000);
        assert_eq!(wrap_position_ms(4_000, Some(10_000), true), 4_000);
        assert_eq!(wrap_position_ms(4_000, None, true), 4_000);
        assert_eq!(wrap_position_ms(4_000, Some(0), true), 0);
    }

    #[test]
    fn open_missing_file_fails() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let missing = std::env::temp_dir().join("smartplayer-no-such-track.mp3");
        let result = CpalPlayer::open(
            &missing,
            None,
            PlaybackConfig::default(),
            CompletionNotifier::new(1, tx),
        );
        assert!(result.is_err());
    }
}
