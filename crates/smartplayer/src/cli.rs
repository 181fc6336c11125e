use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

/// Music player that follows the room: louder surroundings, louder playback.
///
/// Flags override values from `--config`.
#[derive(Parser, Debug, Default)]
#[command(name = "smartplayer", version = VERSION)]
pub struct Args {
    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Music directory the playlist is built from (scanned recursively)
    #[arg(long)]
    pub library: Option<PathBuf>,

    /// Track to play when the library is empty or not set
    #[arg(long)]
    pub default_track: Option<PathBuf>,

    /// List output and input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Use a specific input (microphone) device by substring match
    #[arg(long)]
    pub input_device: Option<String>,

    /// Start playing as soon as the first track is loaded
    #[arg(long)]
    pub autoplay: bool,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// Playback callback refill cap (frames). Larger reduces lock churn but can add latency.
    #[arg(long)]
    pub refill_max_frames: Option<usize>,

    /// Queue buffer target in seconds (per stage)
    #[arg(long)]
    pub buffer_seconds: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "smartplayer",
            "--library",
            "/music",
            "--device",
            "USB",
            "--autoplay",
            "--buffer-seconds",
            "1.5",
        ])
        .unwrap();
        assert_eq!(args.library, Some(PathBuf::from("/music")));
        assert_eq!(args.device.as_deref(), Some("USB"));
        assert!(args.autoplay);
        assert_eq!(args.buffer_seconds, Some(1.5));
        assert!(args.chunk_frames.is_none());
    }

    #[test]
    fn defaults_leave_everything_unset() {
        let args = Args::try_parse_from(["smartplayer"]).unwrap();
        assert!(args.config.is_none());
        assert!(!args.list_devices);
        assert!(!args.autoplay);
    }
}
