//! Ambient-volume mapping.
//!
//! Louder surroundings raise the output level. Every sample reads the microphone's
//! average power and fades the player toward the mapped level.

use std::time::Duration;

use crate::session::{MeteringStream, PlaybackStream};

/// Fade length for each ambient volume change.
pub const FADE_DURATION: Duration = Duration::from_millis(500);

/// Time between two ambient volume samples.
pub const VOLUME_SAMPLE_INTERVAL: Duration = Duration::from_millis(300);

/// Time between two position reports to the observer.
pub const POSITION_INTERVAL: Duration = Duration::from_millis(16);

/// Map average input power (dBFS) to an output level.
///
/// The result is not clamped here; streams clamp to their own bounds, so `0 dB`
/// (`100.5`) becomes full volume and the floor becomes `0.5`.
pub fn volume_from_average_power(power_db: f32) -> f32 {
    10f32.powf(0.05 * power_db) * 100.0 + 0.5
}

/// Take one ambient sample from `recorder` and apply it to `player`.
pub(crate) fn apply_ambient_volume(
    recorder: &dyn MeteringStream,
    player: &dyn PlaybackStream,
    fade: Duration,
) {
    recorder.update_meters();
    let power_db = recorder.average_power(0);
    let level = volume_from_average_power(power_db);
    tracing::trace!(power_db, level, "ambient volume sample");
    player.set_volume(level, fade);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn reference_points() {
        assert_close(volume_from_average_power(0.0), 100.5);
        assert_close(volume_from_average_power(-20.0), 10.5);
        assert_close(volume_from_average_power(-40.0), 1.5);
    }

    #[test]
    fn silence_maps_to_floor() {
        assert_close(volume_from_average_power(-160.0), 0.5);
    }

    #[test]
    fn mapping_is_monotonic() {
        let mut last = volume_from_average_power(-160.0);
        for db in (-159..=0).map(|d| d as f32) {
            let v = volume_from_average_power(db);
            assert!(v >= last);
            last = v;
        }
    }
}
