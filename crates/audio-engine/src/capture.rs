//! Input metering stage (CPAL input stream).
//!
//! Nothing captured here is stored. The input callback only feeds channel 0 into a
//! [`LevelMeter`], which turns the energy collected between two `update` calls into
//! average and peak power in dBFS.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::Sample;
use cpal::traits::DeviceTrait;

/// Floor reported for silence or an idle meter.
pub const MIN_POWER_DB: f32 = -160.0;

/// Convert a linear amplitude to dBFS, clamped to `[MIN_POWER_DB, 0]`.
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    if !(amplitude > 0.0) {
        return MIN_POWER_DB;
    }
    (20.0 * amplitude.log10()).clamp(MIN_POWER_DB, 0.0)
}

/// Accumulates input energy and publishes power readings on demand.
#[derive(Debug)]
pub struct LevelMeter {
    enabled: AtomicBool,
    window: Mutex<MeterWindow>,
    average_db: AtomicU32,
    peak_db: AtomicU32,
}

#[derive(Debug, Default)]
struct MeterWindow {
    sum_sq: f64,
    count: u64,
    peak: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            window: Mutex::new(MeterWindow::default()),
            average_db: AtomicU32::new(MIN_POWER_DB.to_bits()),
            peak_db: AtomicU32::new(MIN_POWER_DB.to_bits()),
        }
    }
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.reset();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Add channel-0 samples to the current window. Ignored while disabled.
    pub fn accumulate<I>(&self, samples: I)
    where
        I: IntoIterator<Item = f32>,
    {
        if !self.is_enabled() {
            return;
        }
        let mut w = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for s in samples {
            w.sum_sq += f64::from(s) * f64::from(s);
            w.count += 1;
            w.peak = w.peak.max(s.abs());
        }
    }

    /// Publish readings for the samples gathered since the previous update.
    pub fn update(&self) {
        let (sum_sq, count, peak) = {
            let mut w = match self.window.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let snapshot = (w.sum_sq, w.count, w.peak);
            *w = MeterWindow::default();
            snapshot
        };
        let average = if count == 0 {
            MIN_POWER_DB
        } else {
            amplitude_to_db((sum_sq / count as f64).sqrt() as f32)
        };
        self.average_db.store(average.to_bits(), Ordering::Relaxed);
        self.peak_db
            .store(amplitude_to_db(peak).to_bits(), Ordering::Relaxed);
    }

    /// Average power from the last update, in dBFS.
    pub fn average_power_db(&self) -> f32 {
        f32::from_bits(self.average_db.load(Ordering::Relaxed))
    }

    /// Peak power from the last update, in dBFS.
    pub fn peak_power_db(&self) -> f32 {
        f32::from_bits(self.peak_db.load(Ordering::Relaxed))
    }

    fn reset(&self) {
        if let Ok(mut w) = self.window.lock() {
            *w = MeterWindow::default();
        }
        self.average_db
            .store(MIN_POWER_DB.to_bits(), Ordering::Relaxed);
        self.peak_db.store(MIN_POWER_DB.to_bits(), Ordering::Relaxed);
    }
}

/// Build an input stream that feeds `meter`.
pub fn build_meter_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    meter: Arc<LevelMeter>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, meter),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, meter),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, meter),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, meter),
        other => Err(anyhow!("unsupported input sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    meter: Arc<LevelMeter>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            meter.accumulate(data.iter().step_by(channels).map(|s| s.to_sample::<f32>()));
        },
        |err| tracing::warn!("input stream error: {err}"),
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amplitude_to_db_reference_points() {
        assert_eq!(amplitude_to_db(1.0), 0.0);
        assert!((amplitude_to_db(0.1) + 20.0).abs() < 1e-4);
        assert!((amplitude_to_db(0.01) + 40.0).abs() < 1e-4);
        assert_eq!(amplitude_to_db(0.0), MIN_POWER_DB);
        assert_eq!(amplitude_to_db(f32::NAN), MIN_POWER_DB);
        assert_eq!(amplitude_to_db(1e-12), MIN_POWER_DB);
    }

    #[test]
    fn idle_meter_reports_floor() {
        let meter = LevelMeter::new();
        meter.update();
        assert_eq!(meter.average_power_db(), MIN_POWER_DB);
        assert_eq!(meter.peak_power_db(), MIN_POWER_DB);
    }

    #[test]
    fn disabled_meter_ignores_samples() {
        let meter = LevelMeter::new();
        meter.accumulate([0.5f32; 8]);
        meter.update();
        assert_eq!(meter.average_power_db(), MIN_POWER_DB);
    }

    #[test]
    fn constant_signal_reports_its_level() {
        let meter = LevelMeter::new();
        meter.set_enabled(true);
        meter.accumulate([0.1f32, -0.1, 0.1, -0.1]);
        meter.update();
        assert!((meter.average_power_db() + 20.0).abs() < 1e-3);
        assert!((meter.peak_power_db() + 20.0).abs() < 1e-3);
    }

    #[test]
    fn update_starts_a_new_window() {
        let meter = LevelMeter::new();
        meter.set_enabled(true);
        meter.accumulate([1.0f32; 4]);
        meter.update();
        assert_eq!(meter.average_power_db(), 0.0);
        meter.update();
        assert_eq!(meter.average_power_db(), MIN_POWER_DB);
    }

    #[test]
    fn disabling_resets_readings() {
        let meter = LevelMeter::new();
        meter.set_enabled(true);
        meter.accumulate([1.0f32; 4]);
        meter.update();
        meter.set_enabled(false);
        assert_eq!(meter.average_power_db(), MIN_POWER_DB);
    }
}
