/// Pipeline tuning shared by the decode, resample and output stages.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackConfig {
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration per stage queue.
    pub buffer_seconds: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
        }
    }
}

/// Input format requested for ambient metering.
///
/// Only the level matters, so a low-rate mono stream is enough.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeterConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
        }
    }
}
