//! Output stage (CPAL output stream).
//!
//! The real-time callback:
//! - refills a small local buffer from the shared queue without blocking
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - multiplies every frame by the fading gain from [`crate::gain`]
//! - converts `f32` samples to the device sample format

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::gain::{GainRamp, VolumeControl};
use crate::queue::{PopStrategy, SampleQueue};

/// Shared state the output callback reads and updates.
#[derive(Clone, Debug)]
pub struct OutputControls {
    /// Maximum frames pulled from the queue per refill.
    pub refill_max_frames: usize,
    /// When `true` the callback writes silence and leaves the queue untouched.
    pub paused: Arc<AtomicBool>,
    /// Incremented by the number of frames written from the queue.
    pub played_frames: Arc<AtomicU64>,
    /// Target volume and fade length.
    pub volume: Arc<VolumeControl>,
}

/// Build an output stream that plays the interleaved `f32` samples in `queue`.
///
/// `queue` must already be at the device sample rate. Underruns are filled with silence.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    controls: OutputControls,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, controls),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, controls),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, controls),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, controls),
        other => Err(anyhow!("unsupported output sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    controls: OutputControls,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels_out = (config.channels as usize).max(1);
    let sample_rate = config.sample_rate;
    let refill_max_frames = controls.refill_max_frames.max(1);
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let state = Mutex::new(CallbackState {
        pending: FrameCursor {
            pos: 0,
            src_channels: queue.channels(),
            src: Vec::new(),
        },
        gain: GainRamp::new(&controls.volume),
    });
    let queue = queue.clone();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if controls.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }

            let mut st = state.lock().unwrap();
            let CallbackState { pending, gain } = &mut *st;
            gain.sync(&controls.volume, sample_rate);

            let frames = data.len() / channels_out;
            let mut filled = 0usize;
            for frame in 0..frames {
                if pending.is_empty() {
                    match queue.pop(PopStrategy::NonBlocking {
                        max_frames: refill_max_frames,
                    }) {
                        Some(v) => pending.reset(v),
                        None => {
                            data[frame * channels_out..].fill(silence);
                            break;
                        }
                    }
                }
                let g = gain.advance();
                for ch in 0..channels_out {
                    let s = pending.mapped_sample(channels_out, ch) * g;
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(s);
                }
                filled += 1;
            }

            if filled > 0 {
                controls
                    .played_frames
                    .fetch_add(filled as u64, Ordering::Relaxed);
            }
        },
        |err| tracing::warn!("output stream error: {err}"),
        None,
    )?;

    Ok(stream)
}

struct CallbackState {
    pending: FrameCursor,
    gain: GainRamp,
}

/// Interleaved samples fetched from the queue, consumed one frame at a time.
struct FrameCursor {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

impl FrameCursor {
    fn is_empty(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn reset(&mut self, src: Vec<f32>) {
        self.src = src;
        self.pos = 0;
    }

    /// Sample for destination channel `dst_ch`; advances after the last channel.
    ///
    /// mono→stereo duplicates, stereo→mono averages, anything else clamps to the
    /// available source channels.
    fn mapped_sample(&mut self, dst_channels: usize, dst_ch: usize) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let start = self.pos;
        let get = |ch: usize| -> f32 {
            if ch < self.src_channels {
                self.src.get(start + ch).copied().unwrap_or(0.0)
            } else {
                0.0
            }
        };
        let out = match (self.src_channels, dst_channels) {
            (2, 1) => 0.5 * (get(0) + get(1)),
            (1, _) => get(0),
            (src, _) => get(dst_ch.min(src.saturating_sub(1))),
        };
        if dst_ch + 1 == dst_channels {
            self.pos += self.src_channels;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(src_channels: usize, src: Vec<f32>) -> FrameCursor {
        FrameCursor {
            pos: 0,
            src_channels,
            src,
        }
    }

    #[test]
    fn mono_source_duplicates_to_stereo() {
        let mut c = cursor(1, vec![0.25, 0.5]);
        assert_eq!(c.mapped_sample(2, 0), 0.25);
        assert_eq!(c.mapped_sample(2, 1), 0.25);
        assert_eq!(c.mapped_sample(2, 0), 0.5);
        assert_eq!(c.mapped_sample(2, 1), 0.5);
        assert!(c.is_empty());
    }

    #[test]
    fn stereo_source_averages_to_mono() {
        let mut c = cursor(2, vec![0.2, 0.6]);
        assert!((c.mapped_sample(1, 0) - 0.4).abs() < 1e-6);
        assert!(c.is_empty());
    }

    #[test]
    fn wide_source_clamps_to_available_channels() {
        let mut c = cursor(2, vec![0.1, 0.9]);
        assert_eq!(c.mapped_sample(4, 0), 0.1);
        assert_eq!(c.mapped_sample(4, 1), 0.9);
        assert_eq!(c.mapped_sample(4, 2), 0.9);
        assert_eq!(c.mapped_sample(4, 3), 0.9);
        assert!(c.is_empty());
    }

    #[test]
    fn empty_cursor_yields_silence() {
        let mut c = cursor(2, Vec::new());
        assert_eq!(c.mapped_sample(2, 0), 0.0);
    }
}
