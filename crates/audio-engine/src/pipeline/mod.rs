//! Session pipeline: decode → resample (when needed) → output stream.
//!
//! [`play_decoded_source`] owns the CPAL stream for the lifetime of one track and
//! blocks the calling thread until the track drains or the session is cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use cpal::traits::StreamTrait;

use crate::config::PlaybackConfig;
use crate::decode::DecodedSource;
use crate::gain::VolumeControl;
use crate::{playback, queue, resample};

/// Shared flags a session owner uses to steer a running pipeline.
#[derive(Clone, Debug)]
pub struct SessionControls {
    /// Output silence without draining while set.
    pub paused: Arc<AtomicBool>,
    /// Terminate the session early.
    pub cancel: Arc<AtomicBool>,
    /// Frames written to the device so far.
    pub played_frames: Arc<AtomicU64>,
    pub volume: Arc<VolumeControl>,
}

impl SessionControls {
    pub fn new(volume: Arc<VolumeControl>, paused: bool) -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(paused)),
            cancel: Arc::new(AtomicBool::new(false)),
            played_frames: Arc::new(AtomicU64::new(0)),
            volume,
        }
    }
}

/// How a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The track played to its end.
    Finished,
    /// The owner cancelled the session.
    Cancelled,
}

/// Wire the stages for `source` and block until playback ends.
pub fn play_decoded_source(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    stream_config: &cpal::StreamConfig,
    playback: &PlaybackConfig,
    source: DecodedSource,
    controls: &SessionControls,
) -> Result<SessionEnd> {
    let srcq = source.queue;
    let dst_rate = stream_config.sample_rate;
    let dstq = if source.spec.rate == dst_rate {
        tracing::debug!(rate_hz = dst_rate, "resample skipped");
        srcq.clone()
    } else {
        tracing::info!(
            from_hz = source.spec.rate,
            to_hz = dst_rate,
            "resampling"
        );
        resample::start_resampler(
            srcq.clone(),
            source.spec,
            dst_rate,
            resample::ResampleConfig {
                chunk_frames: playback.chunk_frames,
                buffer_seconds: playback.buffer_seconds,
            },
        )?
    };

    let stream = playback::build_output_stream(
        device,
        stream_config,
        config.sample_format(),
        &dstq,
        playback::OutputControls {
            refill_max_frames: playback.refill_max_frames,
            paused: controls.paused.clone(),
            played_frames: controls.played_frames.clone(),
            volume: controls.volume.clone(),
        },
    )?;
    stream.play()?;

    let drained = queue::wait_until_drained_or_cancel(&dstq, &controls.cancel);
    if !drained {
        controls.paused.store(true, Ordering::Relaxed);
        srcq.close();
        dstq.close();
        return Ok(SessionEnd::Cancelled);
    }

    // Let the device play out its last callback before the stream drops.
    thread::sleep(Duration::from_millis(100));
    Ok(SessionEnd::Finished)
}
