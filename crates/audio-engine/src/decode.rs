//! Streaming decode stage.
//!
//! Uses Symphonia to probe a local file, then decodes packets on a background
//! thread into a bounded [`SampleQueue`]. The decoder honours two shared flags:
//! `looping` rewinds to the start at end of stream instead of closing the queue,
//! and `cancel` stops decoding early.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::{Hint, ProbeResult};
use symphonia::core::units::Time;

use crate::queue::{SampleQueue, queue_capacity_samples};

/// Flags shared between a decode thread and its owner.
#[derive(Clone, Debug, Default)]
pub struct DecodeControl {
    /// When set at end of stream, decoding restarts from zero.
    pub looping: Arc<AtomicBool>,
    /// When set, the decode thread stops at the next packet boundary.
    pub cancel: Arc<AtomicBool>,
}

/// A probed source whose samples are being pushed into `queue`.
pub struct DecodedSource {
    pub spec: SignalSpec,
    pub queue: Arc<SampleQueue>,
    pub duration_ms: Option<u64>,
    pub codec: Option<String>,
}

/// Tags and stream facts read without decoding audio.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub title: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Probe `path` and start decoding it on a background thread.
///
/// `start_ms` positions the reader before the first packet. The queue is closed
/// on end of stream (unless looping), on cancel, or on error.
pub fn start_file_decode(
    path: &Path,
    buffer_seconds: f32,
    start_ms: Option<u64>,
    control: DecodeControl,
) -> Result<DecodedSource> {
    let probed = probe_path(path)?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track in {:?}", path))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let channels = codec_params
        .channels
        .ok_or_else(|| anyhow!("unknown channel layout in {:?}", path))?;
    let rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate in {:?}", path))?;
    let spec = SignalSpec::new(rate, channels);

    if let Some(ms) = start_ms.filter(|ms| *ms > 0) {
        if let Err(e) = format.seek(SeekMode::Accurate, seek_target(ms, track_id)) {
            tracing::warn!(path = ?path, seek_ms = ms, "seek failed, starting from zero: {e}");
        }
    }

    let capacity = queue_capacity_samples(rate, channels.count(), buffer_seconds);
    let queue = Arc::new(SampleQueue::new(channels.count(), capacity));
    let duration_ms = duration_ms_from_codec_params(&codec_params);
    let codec = codec_name_from_params(&codec_params);

    let queue_for_thread = queue.clone();
    thread::Builder::new()
        .name("smartplayer-decode".into())
        .spawn(move || {
            if let Err(e) = decode_loop(format, track_id, &codec_params, &queue_for_thread, &control)
            {
                tracing::error!("decoder thread error: {e:#}");
            }
            queue_for_thread.close();
        })
        .context("spawn decode thread")?;

    Ok(DecodedSource {
        spec,
        queue,
        duration_ms,
        codec,
    })
}

/// Read the title and duration from a file's container tags.
pub fn read_track_tags(path: &Path) -> Result<TrackTags> {
    let mut probed = probe_path(path)?;
    let mut tags = TrackTags::default();

    if let Some(track) = probed.format.default_track() {
        tags.duration_ms = duration_ms_from_codec_params(&track.codec_params);
    }

    if let Some(rev) = probed.format.metadata().current() {
        apply_tags(&mut tags, rev);
    }
    if let Some(meta) = probed.metadata.get() {
        if let Some(rev) = meta.current() {
            apply_tags(&mut tags, rev);
        }
    }
    Ok(tags)
}

fn probe_path(path: &Path) -> Result<ProbeResult> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probe {:?}", path))
}

fn apply_tags(tags: &mut TrackTags, rev: &MetadataRevision) {
    if tags.title.is_some() {
        return;
    }
    tags.title = rev
        .tags()
        .iter()
        .filter(|tag| tag.std_key == Some(StandardTagKey::TrackTitle))
        .find_map(|tag| non_empty(tag.value.to_string()));
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn decode_loop(
    mut format: Box<dyn FormatReader>,
    track_id: u32,
    codec_params: &CodecParameters,
    queue: &SampleQueue,
    control: &DecodeControl,
) -> Result<()> {
    let mut decoder =
        symphonia::default::get_codecs().make(codec_params, &DecoderOptions::default())?;

    loop {
        if control.cancel.load(Ordering::Relaxed) || queue.is_done() {
            return Ok(());
        }

        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => {
                // End of stream.
                if !control.looping.load(Ordering::Relaxed) {
                    return Ok(());
                }
                format
                    .seek(SeekMode::Coarse, seek_target(0, track_id))
                    .context("rewind for loop")?;
                decoder.reset();
                tracing::debug!(track_id, "decoder rewound for loop");
                continue;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(_) => continue,
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        queue.push_interleaved_blocking(sample_buf.samples());
    }
}

fn seek_target(ms: u64, track_id: u32) -> SeekTo {
    SeekTo::Time {
        time: Time::new(ms / 1000, (ms % 1000) as f64 / 1000.0),
        track_id: Some(track_id),
    }
}

/// Duration in milliseconds from codec metadata, when the container reports it.
pub fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;

    #[test]
    fn duration_ms_from_codec_params_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ms_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_ms_from_codec_params_computes() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(44_100);
        params.n_frames = Some(441_000);
        assert_eq!(duration_ms_from_codec_params(&params), Some(10_000));
    }

    #[test]
    fn codec_name_maps_mp3_and_unknown() {
        let mut params = CodecParameters::new();
        assert!(codec_name_from_params(&params).is_none());
        params.codec = CODEC_TYPE_MP3;
        assert_eq!(codec_name_from_params(&params), Some("MP3".to_string()));
    }

    #[test]
    fn seek_target_splits_millis() {
        match seek_target(2_250, 3) {
            SeekTo::Time { time, track_id } => {
                assert_eq!(time.seconds, 2);
                assert!((time.frac - 0.25).abs() < 1e-9);
                assert_eq!(track_id, Some(3));
            }
            _ => panic!("expected time seek"),
        }
    }

    #[test]
    fn non_empty_trims_and_drops_blank() {
        assert_eq!(non_empty("  Song ".into()), Some("Song".to_string()));
        assert_eq!(non_empty("   ".into()), None);
    }

    #[test]
    fn start_file_decode_rejects_missing_file() {
        let missing = std::env::temp_dir().join("smartplayer-missing-track.mp3");
        let result = start_file_decode(&missing, 1.0, None, DecodeControl::default());
        assert!(result.is_err());
    }
}
