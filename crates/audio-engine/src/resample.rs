//! Streaming resample stage.
//!
//! Converts decoded audio from the track's sample rate to the output device rate
//! with Rubato's sinc resampler, on a background thread between two
//! [`SampleQueue`]s.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};
use symphonia::core::audio::SignalSpec;

use crate::queue::{PopStrategy, SampleQueue, queue_capacity_samples};

/// Tuning for the resampler stage.
#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    /// Input chunk size in frames.
    pub chunk_frames: usize,
    /// Buffering target (seconds) for the output queue.
    pub buffer_seconds: f32,
}

/// Start a resampler thread reading `srcq` and return the queue it writes.
///
/// The output queue is closed once `srcq` is closed and drained, or when the
/// output queue itself is closed by the consumer.
pub fn start_resampler(
    srcq: Arc<SampleQueue>,
    src_spec: SignalSpec,
    dst_rate: u32,
    cfg: ResampleConfig,
) -> Result<Arc<SampleQueue>> {
    let channels = src_spec.channels.count();
    let chunk_frames = cfg.chunk_frames.max(1);
    let capacity = queue_capacity_samples(dst_rate, channels, cfg.buffer_seconds);
    let dstq = Arc::new(SampleQueue::new(channels, capacity));

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };
    let ratio = dst_rate as f64 / src_spec.rate as f64;

    let dstq_thread = dstq.clone();
    thread::Builder::new()
        .name("smartplayer-resample".into())
        .spawn(move || {
            let resampler = match Async::<f32>::new_sinc(
                ratio,
                1.1,
                &params,
                chunk_frames,
                channels,
                FixedAsync::Input,
            ) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("resampler init error: {e}");
                    dstq_thread.close();
                    return;
                }
            };
            let mut stage = ResampleStage {
                resampler: Box::new(resampler),
                channels,
                out: vec![0.0f32; channels * chunk_frames * 3],
            };
            if let Err(e) = stage.run(&srcq, &dstq_thread, chunk_frames) {
                tracing::error!("resampler error: {e:#}");
            }
            dstq_thread.close();
        })
        .context("spawn resample thread")?;

    Ok(dstq)
}

struct ResampleStage {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    out: Vec<f32>,
}

impl ResampleStage {
    fn run(&mut self, srcq: &SampleQueue, dstq: &SampleQueue, chunk_frames: usize) -> Result<()> {
        // Steady state: full chunks only.
        while let Some(chunk) = srcq.pop(PopStrategy::BlockingExact {
            frames: chunk_frames,
        }) {
            if dstq.is_done() {
                return Ok(());
            }
            self.process(&chunk, chunk_frames, None, dstq)?;
        }
        // The source closed with less than a chunk left.
        while let Some(tail) = srcq.pop(PopStrategy::BlockingUpTo {
            max_frames: chunk_frames,
        }) {
            let frames = tail.len() / self.channels;
            if frames > 0 {
                self.process(&tail, frames, Some(frames), dstq)?;
            }
        }
        Ok(())
    }

    fn process(
        &mut self,
        input: &[f32],
        frames: usize,
        partial_len: Option<usize>,
        dstq: &SampleQueue,
    ) -> Result<()> {
        let input_adapter = InterleavedSlice::new(input, self.channels, frames)
            .map_err(|e| anyhow!("resampler input slice: {e}"))?;
        let out_frames = self.out.len() / self.channels;
        let mut output_adapter = InterleavedSlice::new_mut(&mut self.out, self.channels, out_frames)
            .map_err(|e| anyhow!("resampler output slice: {e}"))?;
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };
        let (_consumed, produced) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process: {e}"))?;
        let produced_samples = produced * self.channels;
        if produced_samples > 0 {
            dstq.push_interleaved_blocking(&self.out[..produced_samples]);
        }
        Ok(())
    }
}
