//! CPAL-backed [`MeteringStream`].
//!
//! The input stream lives on its own thread (CPAL streams are not `Send`) and is
//! dropped when `stop` is called. Captured audio only feeds a [`LevelMeter`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Sender, bounded};
use smartplayer_audio::capture::{self, LevelMeter, MIN_POWER_DB};
use smartplayer_audio::config::MeterConfig;
use smartplayer_audio::device;

use crate::session::MeteringStream;

struct Capture {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct RecorderState {
    prepared: bool,
    capture: Option<Capture>,
}

/// Microphone level meter on the default CPAL host.
pub struct CpalRecorder {
    device_name: Option<String>,
    config: MeterConfig,
    meter: Arc<LevelMeter>,
    state: Mutex<RecorderState>,
}

impl CpalRecorder {
    /// Resolve the input device up front so a missing microphone is reported
    /// at construction.
    pub fn open(device_name: Option<String>, config: MeterConfig) -> Result<Self> {
        let host = cpal::default_host();
        let input = device::pick_input_device(&host, device_name.as_deref())?;
        device::pick_input_config(&input, config.sample_rate, config.channels)?;
        tracing::info!(
            device = %input.description().map(|d| d.to_string()).unwrap_or_default(),
            rate_hz = config.sample_rate,
            "recorder opened"
        );
        Ok(Self {
            device_name,
            config,
            meter: Arc::new(LevelMeter::new()),
            state: Mutex::new(RecorderState::default()),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, RecorderState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn spawn_capture(&self) -> Result<Capture> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let device_name = self.device_name.clone();
        let config = self.config;
        let meter = self.meter.clone();

        let join = std::thread::Builder::new()
            .name("smartplayer-capture".into())
            .spawn(move || {
                let stream = match open_meter_stream(device_name.as_deref(), config, meter) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{e:#}")));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until `stop` sends or drops the sender.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("spawn capture thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Capture { stop_tx, join }),
            Ok(Err(msg)) => {
                let _ = join.join();
                Err(anyhow!("start input stream: {msg}"))
            }
            Err(_) => {
                let _ = join.join();
                Err(anyhow!("capture thread exited before starting"))
            }
        }
    }
}

fn open_meter_stream(
    device_name: Option<&str>,
    config: MeterConfig,
    meter: Arc<LevelMeter>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let input = device::pick_input_device(&host, device_name)?;
    let supported = device::pick_input_config(&input, config.sample_rate, config.channels)?;
    let stream_config: cpal::StreamConfig = supported.clone().into();
    let stream =
        capture::build_meter_stream(&input, &stream_config, supported.sample_format(), meter)?;
    stream.play()?;
    tracing::debug!(
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        "input stream started"
    );
    Ok(stream)
}

impl MeteringStream for CpalRecorder {
    fn prepare(&self) -> Result<()> {
        self.lock_state().prepared = true;
        Ok(())
    }

    fn set_metering_enabled(&self, enabled: bool) {
        self.meter.set_enabled(enabled);
    }

    fn record(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.capture.is_some() {
            return Ok(());
        }
        if !state.prepared {
            tracing::debug!("record without prepare");
            state.prepared = true;
        }
        state.capture = Some(self.spawn_capture()?);
        Ok(())
    }

    fn stop(&self) {
        let capture = self.lock_state().capture.take();
        if let Some(capture) = capture {
            let _ = capture.stop_tx.send(());
            let _ = capture.join.join();
            tracing::debug!("input stream stopped");
        }
    }

    fn update_meters(&self) {
        self.meter.update();
    }

    fn average_power(&self, channel: usize) -> f32 {
        if channel == 0 {
            self.meter.average_power_db()
        } else {
            MIN_POWER_DB
        }
    }

    fn peak_power(&self, channel: usize) -> f32 {
        if channel == 0 {
            self.meter.peak_power_db()
        } else {
            MIN_POWER_DB
        }
    }
}

impl Drop for CpalRecorder {
    fn drop(&mut self) {
        if let Some(capture) = self.lock_state().capture.take() {
            let _ = capture.stop_tx.send(());
        }
    }
}
