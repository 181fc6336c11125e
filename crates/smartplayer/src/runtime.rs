//! Terminal front end.
//!
//! Builds the coordinator on the default CPAL host, prints track changes and
//! reads one-letter transport commands from stdin until `q` or Ctrl-C. When
//! stdin closes the player keeps going until Ctrl-C.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, bounded, select, unbounded};
use smartplayer_audio::device;

use crate::catalog::{DirectoryCatalog, StaticCatalog, TrackCatalog};
use crate::config::PlayerConfig;
use crate::controller::{TransportController, TransportView, ViewChange};
use crate::coordinator::PlaybackCoordinator;
use crate::session::{AudioSession, CpalAudioSession};

const HELP: &str = "commands: p play/pause, n next, b previous, l loop, s SECS seek, \
v LEVEL volume (0-1), t tracks, i status, r rescan, h help, q quit";

/// How the interactive loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    Quit,
    Interrupted,
}

#[derive(Clone, Debug, PartialEq)]
enum Command {
    PlayPause,
    Next,
    Previous,
    Loop,
    Seek(Duration),
    Volume(f32),
    Tracks,
    Status,
    Rescan,
    Help,
    Quit,
}

/// List output and input devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Run the player until the user quits or interrupts.
pub fn run(config: PlayerConfig, install_ctrlc: bool) -> Result<Exit> {
    let session: Arc<dyn AudioSession> = Arc::new(CpalAudioSession::new(config.devices.clone()));
    let catalog: Box<dyn TrackCatalog> = match config.library_dir.as_ref() {
        Some(dir) => Box::new(DirectoryCatalog::new(dir)),
        None => Box::new(StaticCatalog::default()),
    };
    let coordinator =
        PlaybackCoordinator::new(catalog.as_ref(), session, config.coordinator.clone())
            .context("start player")?;
    tracing::info!(tracks = coordinator.tracks().len(), "playlist ready");

    let controller = TransportController::with_render_hook(coordinator, render);
    print_status(&controller.view());
    if config.autoplay {
        controller.toggle_play();
    }

    let (interrupt_tx, interrupt_rx) = bounded::<()>(1);
    if install_ctrlc {
        if let Err(e) = ctrlc::set_handler(move || {
            let _ = interrupt_tx.try_send(());
        }) {
            tracing::warn!("ctrl-c handler unavailable: {e}");
        }
    }

    let lines = spawn_stdin_reader()?;
    println!("{HELP}");
    let exit = loop {
        select! {
            recv(interrupt_rx) -> _ => break Exit::Interrupted,
            recv(lines) -> line => match line {
                Ok(line) => match parse_command(&line) {
                    Some(Command::Quit) => break Exit::Quit,
                    Some(cmd) => apply(&controller, catalog.as_ref(), cmd),
                    None if line.trim().is_empty() => {}
                    None => println!("unknown command {:?}; {HELP}", line.trim()),
                },
                Err(_) if install_ctrlc => {
                    tracing::debug!("stdin closed; waiting for ctrl-c");
                    let _ = interrupt_rx.recv();
                    break Exit::Interrupted;
                }
                Err(_) => break Exit::Quit,
            },
        }
    };

    tracing::info!(?exit, "shutting down");
    drop(controller);
    Ok(exit)
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("smartplayer-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin thread")?;
    Ok(rx)
}

fn apply(controller: &TransportController, catalog: &dyn TrackCatalog, cmd: Command) {
    match cmd {
        Command::PlayPause => {
            let playing = controller.toggle_play();
            println!("{}", if playing { "playing" } else { "paused" });
        }
        Command::Next => controller.next(),
        Command::Previous => controller.previous(),
        Command::Loop => {
            let looping = controller.toggle_loop();
            println!("loop {}", if looping { "on" } else { "off" });
        }
        Command::Seek(position) => match controller.scrub(position) {
            Ok(()) => println!("seek {}", format_duration(position)),
            Err(e) => println!("seek failed: {e:#}"),
        },
        Command::Volume(level) => controller.set_volume(level),
        Command::Tracks => {
            let coordinator = controller.coordinator();
            let current = coordinator.current_index();
            for (i, track) in coordinator.tracks().iter().enumerate() {
                let marker = if Some(i) == current { '>' } else { ' ' };
                println!("{marker} {:>3}. {}", i + 1, track.title);
            }
        }
        Command::Status => print_status(&controller.view()),
        Command::Rescan => match controller.coordinator().resync(catalog) {
            Ok(count) => println!("{count} tracks"),
            Err(e) => println!("rescan failed: {e}"),
        },
        Command::Help | Command::Quit => println!("{HELP}"),
    }
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let cmd = match parts.next()? {
        "p" | "play" | "pause" => Command::PlayPause,
        "n" | "next" => Command::Next,
        "b" | "prev" | "previous" => Command::Previous,
        "l" | "loop" => Command::Loop,
        "s" | "seek" => {
            let secs: f64 = parts.next()?.parse().ok()?;
            if !secs.is_finite() || secs < 0.0 {
                return None;
            }
            Command::Seek(Duration::from_secs_f64(secs))
        }
        "v" | "volume" => {
            let level: f32 = parts.next()?.parse().ok()?;
            if !level.is_finite() {
                return None;
            }
            Command::Volume(level)
        }
        "t" | "tracks" => Command::Tracks,
        "i" | "status" => Command::Status,
        "r" | "rescan" => Command::Rescan,
        "h" | "help" | "?" => Command::Help,
        "q" | "quit" | "exit" => Command::Quit,
        _ => return None,
    };
    Some(cmd)
}

fn render(view: &TransportView, change: ViewChange) {
    match change {
        ViewChange::Title => println!("now playing: {}", view.title),
        ViewChange::Track => {
            let length = view
                .scrub_max
                .map(format_duration)
                .unwrap_or_else(|| "--:--".to_string());
            println!("track length {length}");
        }
        ViewChange::Position => {}
    }
}

fn print_status(view: &TransportView) {
    let length = view
        .scrub_max
        .map(format_duration)
        .unwrap_or_else(|| "--:--".to_string());
    println!(
        "{} [{} / {}]{}{}",
        view.title,
        format_duration(view.scrub_value),
        length,
        if view.playing { " playing" } else { " paused" },
        if view.looping { " loop" } else { "" },
    );
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_transport_commands() {
        assert_eq!(parse_command("p"), Some(Command::PlayPause));
        assert_eq!(parse_command(" next "), Some(Command::Next));
        assert_eq!(parse_command("b"), Some(Command::Previous));
        assert_eq!(parse_command("l"), Some(Command::Loop));
        assert_eq!(parse_command("q"), Some(Command::Quit));
        assert_eq!(parse_command("r"), Some(Command::Rescan));
    }

    #[test]
    fn parse_seek_and_volume_arguments() {
        assert_eq!(
            parse_command("s 12.5"),
            Some(Command::Seek(Duration::from_millis(12_500)))
        );
        assert_eq!(parse_command("v 0.25"), Some(Command::Volume(0.25)));
        assert_eq!(parse_command("s"), None);
        assert_eq!(parse_command("s -3"), None);
        assert_eq!(parse_command("v loud"), None);
    }

    #[test]
    fn parse_rejects_unknown_and_blank() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("dance"), None);
    }

    #[test]
    fn format_duration_minutes_and_seconds() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(65)), "1:05");
        assert_eq!(format_duration(Duration::from_millis(599_999)), "9:59");
    }
}
