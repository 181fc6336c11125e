//! SmartPlayer: a terminal music player whose volume follows the room.
//!
//! ## Pipeline
//! 1. **Decode**: a background thread uses Symphonia to decode the track into interleaved `f32`.
//! 2. **Resample**: when the device rate differs, Rubato converts on another thread.
//! 3. **Playback**: the CPAL callback pulls audio without blocking, applies the faded gain and
//!    writes to the device.
//! 4. **Metering**: a CPAL input stream measures microphone power; every 300 ms the coordinator
//!    maps it to a playback volume.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use smartplayer::{cli, config, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,smartplayer=info")),
        )
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let file = match args.config.as_deref() {
        Some(path) => config::FileConfig::load(path)?,
        None => config::FileConfig::default(),
    };
    let config = config::PlayerConfig::resolve(&args, file);

    match runtime::run(config, true)? {
        runtime::Exit::Quit => Ok(()),
        runtime::Exit::Interrupted => std::process::exit(130),
    }
}
