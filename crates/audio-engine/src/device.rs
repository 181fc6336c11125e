//! Device discovery and stream-config selection.
//!
//! Thin wrappers around CPAL for both directions:
//! - output: the speaker/headphone device that plays tracks
//! - input: the microphone used for ambient level metering
//!
//! Devices are chosen by case-insensitive substring or fall back to the host default.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Which side of the host a device is picked from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Output,
    Input,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Output => f.write_str("output"),
            Direction::Input => f.write_str("input"),
        }
    }
}

/// Pick the first output device matching `needle`, or the host default output.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    pick(host, Direction::Output, needle)
}

/// Pick the first input device matching `needle`, or the host default input.
pub fn pick_input_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    pick(host, Direction::Input, needle)
}

fn pick(host: &cpal::Host, direction: Direction, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle.map(str::trim).filter(|n| !n.is_empty()) {
        let mut devices: Vec<cpal::Device> = match direction {
            Direction::Output => host
                .output_devices()
                .context("enumerate output devices")?
                .collect(),
            Direction::Input => host
                .input_devices()
                .context("enumerate input devices")?
                .collect(),
        };
        return devices
            .drain(..)
            .find(|d| {
                d.description()
                    .map(|desc| matches_device_name(&desc.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("no {direction} device matched: {needle}"));
    }

    let default = match direction {
        Direction::Output => host.default_output_device(),
        Direction::Input => host.default_input_device(),
    };
    default.ok_or_else(|| anyhow!("no default {direction} device"))
}

/// Pick the output config closest to `target_rate`.
///
/// Prefers the highest supported rate that is not above the target, then the lowest
/// rate above it; ties are broken by sample format (float first).
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    best_config(ranges, target_rate, None).ok_or_else(|| anyhow!("no supported output configs"))
}

/// Pick the input config closest to the requested rate and channel count.
///
/// Falls back to the device default input config when nothing is advertised.
pub fn pick_input_config(
    device: &cpal::Device,
    target_rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map(|r| r.collect())
        .unwrap_or_default();
    if let Some(cfg) = best_config(ranges, Some(target_rate), Some(channels)) {
        return Ok(cfg);
    }
    device
        .default_input_config()
        .context("no supported input configs")
}

/// Prefer a fixed buffer size when the device reports a range.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn best_config(
    ranges: Vec<cpal::SupportedStreamConfigRange>,
    target_rate: Option<u32>,
    channels: Option<u16>,
) -> Option<cpal::SupportedStreamConfig> {
    ranges
        .into_iter()
        .map(|range| {
            let rate = pick_rate_for_range(
                range.min_sample_rate(),
                range.max_sample_rate(),
                target_rate,
            );
            let rank = ConfigRank {
                channels_match: channels.map(|c| c == range.channels()).unwrap_or(true),
                below_target: target_rate.map(|t| rate <= t).unwrap_or(true),
                rate,
                format_rank: sample_format_rank(range.sample_format()),
            };
            (rank, range.with_sample_rate(rate))
        })
        .fold(None, |best: Option<(ConfigRank, cpal::SupportedStreamConfig)>, candidate| {
            match best {
                Some(b) if !candidate.0.beats(&b.0) => Some(b),
                _ => Some(candidate),
            }
        })
        .map(|(_, cfg)| cfg)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ConfigRank {
    channels_match: bool,
    below_target: bool,
    rate: u32,
    format_rank: u8,
}

impl ConfigRank {
    fn beats(&self, other: &ConfigRank) -> bool {
        if self.channels_match != other.channels_match {
            return self.channels_match;
        }
        if self.below_target != other.below_target {
            return self.below_target;
        }
        if self.rate != other.rate {
            // Below the target the higher rate is closer; above it the lower one is.
            return if self.below_target {
                self.rate > other.rate
            } else {
                self.rate < other.rate
            };
        }
        self.format_rank < other.format_rank
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Print output and input devices to stdout (for `--list-devices`).
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    println!("output devices:");
    for (i, d) in host.output_devices().context("enumerate output devices")?.enumerate() {
        println!("  #{i}: {}", d.description()?);
    }
    println!("input devices:");
    for (i, d) in host.input_devices().context("enumerate input devices")?.enumerate() {
        println!("  #{i}: {}", d.description()?);
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(channels_match: bool, below_target: bool, rate: u32, format_rank: u8) -> ConfigRank {
        ConfigRank {
            channels_match,
            below_target,
            rate,
            format_rank,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("Built-in Speaker", "speaker"));
        assert!(matches_device_name("built-in microphone", "MICRO"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn pick_rate_for_range_clamps_target() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn rank_prefers_matching_channels_first() {
        assert!(rank(true, false, 96_000, 3).beats(&rank(false, true, 44_100, 0)));
    }

    #[test]
    fn rank_prefers_rates_at_or_below_target() {
        assert!(rank(true, true, 44_100, 2).beats(&rank(true, false, 48_000, 0)));
    }

    #[test]
    fn rank_prefers_closest_rate_on_each_side() {
        assert!(rank(true, true, 48_000, 0).beats(&rank(true, true, 44_100, 0)));
        assert!(rank(true, false, 48_000, 0).beats(&rank(true, false, 96_000, 0)));
    }

    #[test]
    fn rank_breaks_ties_on_sample_format() {
        assert!(rank(true, true, 48_000, 0).beats(&rank(true, true, 48_000, 2)));
        assert!(!rank(true, true, 48_000, 2).beats(&rank(true, true, 48_000, 2)));
    }

    #[test]
    fn direction_displays_lowercase() {
        assert_eq!(Direction::Output.to_string(), "output");
        assert_eq!(Direction::Input.to_string(), "input");
    }
}
