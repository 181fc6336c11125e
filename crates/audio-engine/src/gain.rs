//! Output gain with timed fades.
//!
//! [`VolumeControl`] is the writer side, shared with whoever sets the volume.
//! [`GainRamp`] is the reader side, owned by the output callback, which walks the
//! applied gain toward the latest target one frame at a time.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Clamp a requested level into the stream's volume bounds.
pub fn clamp_volume(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

/// Target volume plus the fade length to reach it.
#[derive(Debug)]
pub struct VolumeControl {
    target_bits: AtomicU32,
    fade_ms: AtomicU32,
    generation: AtomicU64,
}

impl VolumeControl {
    pub fn new(initial: f32) -> Self {
        Self {
            target_bits: AtomicU32::new(clamp_volume(initial).to_bits()),
            fade_ms: AtomicU32::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Request `level` (clamped to `[0, 1]`) reached over `fade`.
    pub fn set(&self, level: f32, fade: Duration) {
        let fade_ms = u32::try_from(fade.as_millis()).unwrap_or(u32::MAX);
        self.fade_ms.store(fade_ms, Ordering::Relaxed);
        self.target_bits
            .store(clamp_volume(level).to_bits(), Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Latest requested level.
    pub fn target(&self) -> f32 {
        f32::from_bits(self.target_bits.load(Ordering::Relaxed))
    }

    fn fade_ms(&self) -> u32 {
        self.fade_ms.load(Ordering::Relaxed)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Per-stream gain state advanced by the output callback.
#[derive(Debug)]
pub struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    seen_generation: u64,
}

impl GainRamp {
    /// Start at the control's current target with no fade in progress.
    pub fn new(control: &VolumeControl) -> Self {
        let target = control.target();
        Self {
            current: target,
            target,
            step: 0.0,
            seen_generation: control.generation(),
        }
    }

    /// Pick up a new target, if any. Call once per callback.
    pub fn sync(&mut self, control: &VolumeControl, sample_rate: u32) {
        let generation = control.generation();
        if generation == self.seen_generation {
            return;
        }
        self.seen_generation = generation;
        self.target = control.target();
        let fade_frames = u64::from(control.fade_ms()) * u64::from(sample_rate) / 1000;
        if fade_frames == 0 {
            self.current = self.target;
            self.step = 0.0;
        } else {
            self.step = (self.target - self.current) / fade_frames as f32;
        }
    }

    /// Gain for the next frame.
    pub fn advance(&mut self) -> f32 {
        if self.step != 0.0 {
            self.current += self.step;
            let reached = if self.step > 0.0 {
                self.current >= self.target
            } else {
                self.current <= self.target
            };
            if reached {
                self.current = self.target;
                self.step = 0.0;
            }
        }
        self.current
    }

    pub fn current(&self) -> f32 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_volume_bounds_and_nan() {
        assert_eq!(clamp_volume(100.5), 1.0);
        assert_eq!(clamp_volume(-3.0), 0.0);
        assert_eq!(clamp_volume(0.25), 0.25);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
    }

    #[test]
    fn ramp_reaches_target_after_fade_frames() {
        let control = VolumeControl::new(0.0);
        let mut ramp = GainRamp::new(&control);
        control.set(1.0, Duration::from_millis(10));
        ramp.sync(&control, 1_000);

        for _ in 0..5 {
            ramp.advance();
        }
        assert!((ramp.current() - 0.5).abs() < 1e-4);
        for _ in 0..6 {
            ramp.advance();
        }
        assert_eq!(ramp.current(), 1.0);
        assert_eq!(ramp.advance(), 1.0);
    }

    #[test]
    fn ramp_fades_down_without_overshoot() {
        let control = VolumeControl::new(1.0);
        let mut ramp = GainRamp::new(&control);
        control.set(0.2, Duration::from_millis(3));
        ramp.sync(&control, 1_000);
        for _ in 0..10 {
            ramp.advance();
        }
        assert_eq!(ramp.current(), 0.2);
    }

    #[test]
    fn zero_fade_applies_immediately() {
        let control = VolumeControl::new(1.0);
        let mut ramp = GainRamp::new(&control);
        control.set(0.3, Duration::ZERO);
        ramp.sync(&control, 48_000);
        assert_eq!(ramp.advance(), 0.3);
    }

    #[test]
    fn sync_without_new_target_keeps_fade_running() {
        let control = VolumeControl::new(0.0);
        let mut ramp = GainRamp::new(&control);
        control.set(1.0, Duration::from_millis(4));
        ramp.sync(&control, 1_000);
        ramp.advance();
        ramp.sync(&control, 1_000);
        ramp.advance();
        assert!((ramp.current() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn set_clamps_target() {
        let control = VolumeControl::default();
        control.set(100.5, Duration::from_millis(500));
        assert_eq!(control.target(), 1.0);
    }
}
