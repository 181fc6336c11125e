//! Playback coordinator.
//!
//! Owns the active output stream, the ambient-level input stream and the two
//! periodic producers (ambient volume sampling, position reporting). Transport
//! calls never block on the device: stream work is queued on two serial queues,
//! one per direction, in the order the calls were made.
//!
//! Lock discipline:
//! - producers hold their own stream handles and never take the coordinator lock;
//! - producers are joined, and observer notifications emitted, after the lock is
//!   released;
//! - natural completion arrives over a channel and is matched against the current
//!   session id, so a late event from a replaced stream is dropped.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use thiserror::Error;

use crate::catalog::{Track, TrackCatalog};
use crate::dispatch::SerialQueue;
use crate::observer::{ObserverSlot, PlaybackObserver};
use crate::session::{
    AudioSession, CompletionNotifier, LoopMode, MeteringStream, PlaybackStream, SessionOptions,
    StreamEvent,
};
use crate::ticker::Ticker;
use crate::volume::{self, FADE_DURATION, POSITION_INTERVAL, VOLUME_SAMPLE_INTERVAL};

/// Title shown for tracks that carry none.
pub const UNTITLED: &str = "This song has no title!";

/// Bundled track used when the catalog is empty.
pub const DEFAULT_TRACK: &str = "assets/song.mp3";

#[derive(Clone, Debug)]
pub struct CoordinatorSettings {
    pub default_track: PathBuf,
    pub untitled: String,
    /// Fade applied to every volume change.
    pub fade: Duration,
    pub volume_interval: Duration,
    pub position_interval: Duration,
    pub session: SessionOptions,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            default_track: PathBuf::from(DEFAULT_TRACK),
            untitled: UNTITLED.to_string(),
            fade: FADE_DURATION,
            volume_interval: VOLUME_SAMPLE_INTERVAL,
            position_interval: POSITION_INTERVAL,
            session: SessionOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("catalog is empty and the default track {0:?} does not exist")]
    MissingDefaultTrack(PathBuf),
    #[error("failed to start {name} thread")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

enum Notice {
    Title(String),
    TrackChanged(Option<Duration>),
}

/// Work left over after a locked transition, finished once the lock is gone.
#[derive(Default)]
struct Aftermath {
    producers: Vec<Ticker>,
    retired: Option<Arc<dyn PlaybackStream>>,
    notices: Vec<Notice>,
}

struct State {
    tracks: Arc<[Track]>,
    settings: CoordinatorSettings,
    player: Option<Arc<dyn PlaybackStream>>,
    recorder: Option<Arc<dyn MeteringStream>>,
    volume_ticker: Option<Ticker>,
    position_ticker: Option<Ticker>,
    /// Index of the last track a player was opened for.
    cursor: usize,
    session_id: u64,
    running: bool,
    title: String,
    /// Volume handed to the next player.
    carried_volume: f32,
}

struct Shared {
    state: Mutex<State>,
    session: Arc<dyn AudioSession>,
    observer: Arc<ObserverSlot>,
    output: SerialQueue,
    input: SerialQueue,
    events: Sender<StreamEvent>,
}

/// Owner of the playlist and the live audio streams.
pub struct PlaybackCoordinator {
    shared: Arc<Shared>,
}

impl PlaybackCoordinator {
    /// Load the playlist, configure the session and open (but do not start) the
    /// first track and the recorder.
    ///
    /// Session, player and recorder failures are logged and leave that part
    /// unset. The only fatal case is an empty catalog without a default track.
    pub fn new(
        catalog: &dyn TrackCatalog,
        session: Arc<dyn AudioSession>,
        settings: CoordinatorSettings,
    ) -> Result<Self, CoordinatorError> {
        if let Err(e) = session.configure(settings.session) {
            tracing::warn!("{e:#}; continuing without session routing");
        }

        let tracks = build_playlist(catalog, &settings)?;
        let output = SerialQueue::new("smartplayer-output").map_err(|source| {
            CoordinatorError::Thread {
                name: "output queue",
                source,
            }
        })?;
        let input = SerialQueue::new("smartplayer-input").map_err(|source| {
            CoordinatorError::Thread {
                name: "input queue",
                source,
            }
        })?;
        let (events_tx, events_rx) = unbounded();

        let title = tracks[0].title.clone();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tracks,
                settings,
                player: None,
                recorder: None,
                volume_ticker: None,
                position_ticker: None,
                cursor: 0,
                session_id: 0,
                running: false,
                title,
                carried_volume: 1.0,
            }),
            session,
            observer: Arc::new(ObserverSlot::default()),
            output,
            input,
            events: events_tx,
        });

        {
            let mut st = shared.lock();
            let mut notices = Vec::new();
            shared.open_track(&mut st, 0, &mut notices);
            st.recorder = match shared.session.open_recorder() {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    tracing::warn!("recorder unavailable: {e:#}");
                    None
                }
            };
        }

        spawn_supervisor(Arc::downgrade(&shared), events_rx).map_err(|source| {
            CoordinatorError::Thread {
                name: "event supervisor",
                source,
            }
        })?;

        Ok(Self { shared })
    }

    /// Register the single observer. Only a weak reference is kept.
    pub fn set_observer<O>(&self, observer: &Arc<O>)
    where
        O: PlaybackObserver + 'static,
    {
        let weak: Weak<O> = Arc::downgrade(observer);
        self.shared.observer.set(weak);
    }

    /// Start output playback, input metering and both periodic producers.
    pub fn start(&self) {
        let mut st = self.shared.lock();
        self.shared.launch(&mut st);
    }

    /// Cancel the producers and halt both streams. Idempotent.
    ///
    /// Returns once both producer threads have exited.
    pub fn stop(&self) {
        let after = {
            let mut st = self.shared.lock();
            Aftermath {
                producers: self.shared.halt(&mut st),
                ..Aftermath::default()
            }
        };
        self.shared.settle(after);
    }

    /// Advance one track forward or back, wrapping at either end, and start it.
    pub fn play_next(&self, forward: bool) {
        let after = {
            let mut st = self.shared.lock();
            self.shared.advance(&mut st, forward)
        };
        self.shared.settle(after);
    }

    /// Repeat the active track forever, or play it once.
    pub fn set_loop(&self, enabled: bool) {
        if let Some(player) = self.player() {
            player.set_looping(LoopMode::from_enabled(enabled));
        }
    }

    /// Fade the active track toward `level`.
    pub fn set_volume(&self, level: f32) {
        let (player, fade) = {
            let st = self.shared.lock();
            (st.player.clone(), st.settings.fade)
        };
        if let Some(player) = player {
            player.set_volume(level, fade);
        }
    }

    /// Handle to the active output stream for seeking and inspection.
    pub fn player(&self) -> Option<Arc<dyn PlaybackStream>> {
        self.shared.lock().player.clone()
    }

    pub fn tracks(&self) -> Arc<[Track]> {
        self.shared.lock().tracks.clone()
    }

    /// Playlist index of the active track.
    ///
    /// `None` when the active stream's track is no longer in the playlist.
    pub fn current_index(&self) -> Option<usize> {
        let st = self.shared.lock();
        current_index(&st)
    }

    pub fn current_title(&self) -> String {
        self.shared.lock().title.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn volume(&self) -> Option<f32> {
        self.player().map(|p| p.volume())
    }

    /// Replace the playlist with a fresh read of `catalog`.
    ///
    /// The active stream is kept. Returns the new track count.
    pub fn resync(&self, catalog: &dyn TrackCatalog) -> Result<usize, CoordinatorError> {
        let mut st = self.shared.lock();
        let tracks = build_playlist(catalog, &st.settings)?;
        let count = tracks.len();
        st.tracks = tracks;
        if st.cursor >= count {
            st.cursor = 0;
        }
        tracing::info!(tracks = count, "playlist resynced");
        Ok(count)
    }

    /// Wait until all queued stream work has run.
    pub fn flush(&self) {
        self.shared.output.flush();
        self.shared.input.flush();
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        let after = {
            let mut st = self.shared.lock();
            let producers = self.shared.halt(&mut st);
            if let Some(recorder) = st.recorder.take() {
                self.shared.input.dispatch(move || recorder.stop());
            }
            Aftermath {
                producers,
                retired: st.player.take(),
                notices: Vec::new(),
            }
        };
        self.shared.settle(after);
        self.flush();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn launch(&self, st: &mut State) {
        if st.running {
            return;
        }
        st.running = true;
        tracing::debug!(track = st.cursor, "coordinator started");

        if let Some(player) = st.player.clone() {
            self.output.dispatch(move || {
                if let Err(e) = player.prepare().and_then(|_| player.play()) {
                    tracing::warn!(path = ?player.locator(), "playback failed to start: {e:#}");
                }
            });
        }
        if let Some(recorder) = st.recorder.clone() {
            self.input.dispatch(move || {
                let started = recorder.prepare().and_then(|_| {
                    recorder.set_metering_enabled(true);
                    recorder.record()
                });
                if let Err(e) = started {
                    tracing::warn!("metering failed to start: {e:#}");
                }
            });
        }

        if let (Some(recorder), Some(player)) = (st.recorder.clone(), st.player.clone()) {
            let fade = st.settings.fade;
            match Ticker::spawn("smartplayer-volume", st.settings.volume_interval, move || {
                volume::apply_ambient_volume(recorder.as_ref(), player.as_ref(), fade);
            }) {
                Ok(ticker) => st.volume_ticker = Some(ticker),
                Err(e) => tracing::warn!("volume sampling unavailable: {e}"),
            }
        }

        if let Some(player) = st.player.clone() {
            let observer = self.observer.clone();
            match Ticker::spawn("smartplayer-position", st.settings.position_interval, move || {
                if let Some(observer) = observer.get() {
                    observer.position_updated(player.position());
                }
            }) {
                Ok(ticker) => st.position_ticker = Some(ticker),
                Err(e) => tracing::warn!("position reporting unavailable: {e}"),
            }
        }
    }

    /// Take the producers out of the state and queue stream halts.
    fn halt(&self, st: &mut State) -> Vec<Ticker> {
        let producers: Vec<Ticker> = st
            .position_ticker
            .take()
            .into_iter()
            .chain(st.volume_ticker.take())
            .collect();
        if st.running {
            st.running = false;
            if let Some(recorder) = st.recorder.clone() {
                self.input.dispatch(move || {
                    recorder.stop();
                    recorder.set_metering_enabled(false);
                });
            }
            if let Some(player) = st.player.clone() {
                self.output.dispatch(move || player.stop());
            }
            tracing::debug!("coordinator stopped");
        }
        producers
    }

    fn advance(&self, st: &mut State, forward: bool) -> Aftermath {
        let current = if st.player.is_some() {
            match current_index(st) {
                Some(index) => index,
                None => {
                    tracing::warn!("active track not in playlist, not advancing");
                    return Aftermath::default();
                }
            }
        } else {
            st.cursor
        };
        let next = step_index(current, st.tracks.len(), forward);

        let mut after = Aftermath {
            producers: self.halt(st),
            ..Aftermath::default()
        };
        if let Some(old) = st.player.take() {
            st.carried_volume = old.volume();
            after.retired = Some(old);
        }
        let opened = self.open_track(st, next, &mut after.notices);
        self.launch(st);
        if opened {
            let duration = st.player.as_ref().and_then(|p| p.duration());
            after.notices.push(Notice::TrackChanged(duration));
        }
        after
    }

    /// Open a player for `index`; on failure the player stays unset.
    fn open_track(&self, st: &mut State, index: usize, notices: &mut Vec<Notice>) -> bool {
        st.cursor = index;
        st.session_id += 1;
        let track = st.tracks[index].clone();
        let notifier = CompletionNotifier::new(st.session_id, self.events.clone());
        match self.session.open_player(&track, notifier) {
            Ok(player) => {
                player.set_volume(st.carried_volume, Duration::ZERO);
                tracing::info!(
                    index,
                    path = ?track.locator,
                    title = %track.title,
                    session = st.session_id,
                    "track loaded"
                );
                st.player = Some(player);
                st.title = track.title.clone();
                notices.push(Notice::Title(track.title));
                true
            }
            Err(e) => {
                tracing::warn!(index, path = ?track.locator, "player unavailable: {e:#}");
                st.player = None;
                false
            }
        }
    }

    fn on_finished(&self, session: u64) {
        let after = {
            let mut st = self.lock();
            if session != st.session_id {
                tracing::debug!(session, current = st.session_id, "stale completion ignored");
                return;
            }
            if !st.running {
                tracing::debug!(session, "completion after stop ignored");
                return;
            }
            if let Some(player) = st.player.clone() {
                if player.looping() == LoopMode::Forever {
                    self.output.dispatch(move || {
                        let restarted = player.seek(Duration::ZERO).and_then(|_| player.play());
                        if let Err(e) = restarted {
                            tracing::warn!("loop restart failed: {e:#}");
                        }
                    });
                    return;
                }
            }
            self.advance(&mut st, true)
        };
        self.settle(after);
    }

    fn settle(&self, after: Aftermath) {
        // Joins the producer threads.
        drop(after.producers);
        if let Some(old) = after.retired {
            self.output.dispatch(move || old.close());
        }
        if after.notices.is_empty() {
            return;
        }
        let Some(observer) = self.observer.get() else {
            return;
        };
        for notice in after.notices {
            match notice {
                Notice::Title(title) => observer.title_changed(&title),
                Notice::TrackChanged(duration) => observer.track_changed(duration),
            }
        }
    }
}

fn current_index(st: &State) -> Option<usize> {
    match st.player.as_ref() {
        Some(player) => st
            .tracks
            .iter()
            .position(|t| t.locator.as_path() == player.locator()),
        None => Some(st.cursor),
    }
}

/// Neighbour of `current` in a playlist of `len` tracks, wrapping at both ends.
fn step_index(current: usize, len: usize, forward: bool) -> usize {
    if len == 0 {
        return 0;
    }
    let current = current % len;
    if forward {
        (current + 1) % len
    } else {
        (current + len - 1) % len
    }
}

fn build_playlist(
    catalog: &dyn TrackCatalog,
    settings: &CoordinatorSettings,
) -> Result<Arc<[Track]>, CoordinatorError> {
    let entries = catalog.ordered_tracks().unwrap_or_else(|e| {
        tracing::warn!("catalog unavailable: {e:#}");
        Vec::new()
    });

    if entries.is_empty() {
        if !settings.default_track.is_file() {
            return Err(CoordinatorError::MissingDefaultTrack(
                settings.default_track.clone(),
            ));
        }
        tracing::info!(path = ?settings.default_track, "catalog empty, using default track");
        return Ok(Arc::from(vec![Track {
            locator: settings.default_track.clone(),
            title: settings.untitled.clone(),
        }]));
    }

    Ok(entries
        .into_iter()
        .map(|entry| Track {
            locator: entry.locator,
            title: entry
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| settings.untitled.clone()),
        })
        .collect())
}

fn spawn_supervisor(shared: Weak<Shared>, events: Receiver<StreamEvent>) -> std::io::Result<()> {
    thread::Builder::new()
        .name("smartplayer-events".into())
        .spawn(move || {
            while let Ok(event) = events.recv() {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                match event {
                    StreamEvent::Finished { session } => shared.on_finished(session),
                }
            }
            tracing::debug!("event supervisor exiting");
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, StaticCatalog};

    #[test]
    fn step_index_wraps_both_ways() {
        assert_eq!(step_index(0, 3, true), 1);
        assert_eq!(step_index(2, 3, true), 0);
        assert_eq!(step_index(0, 3, false), 2);
        assert_eq!(step_index(1, 3, false), 0);
        assert_eq!(step_index(0, 1, true), 0);
        assert_eq!(step_index(0, 1, false), 0);
    }

    #[test]
    fn step_index_full_cycle_returns_home() {
        for len in 1..8 {
            let mut index = 0;
            for _ in 0..len {
                index = step_index(index, len, true);
            }
            assert_eq!(index, 0);
        }
    }

    #[test]
    fn step_index_tolerates_stale_cursor() {
        assert_eq!(step_index(5, 3, true), 0);
        assert_eq!(step_index(5, 3, false), 1);
        assert_eq!(step_index(4, 0, true), 0);
    }

    #[test]
    fn playlist_fills_missing_titles() {
        let catalog = StaticCatalog::new(vec![
            CatalogEntry::new("/m/a.mp3", Some("A")),
            CatalogEntry::new("/m/b.mp3", None),
            CatalogEntry::new("/m/c.mp3", Some("  ")),
        ]);
        let tracks = build_playlist(&catalog, &CoordinatorSettings::default()).unwrap();
        let titles: Vec<_> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["A", UNTITLED, UNTITLED]);
    }

    #[test]
    fn empty_catalog_without_default_track_is_fatal() {
        let settings = CoordinatorSettings {
            default_track: std::env::temp_dir().join("smartplayer-no-default-track.mp3"),
            ..CoordinatorSettings::default()
        };
        let err = build_playlist(&StaticCatalog::default(), &settings).unwrap_err();
        assert!(matches!(err, CoordinatorError::MissingDefaultTrack(_)));
    }

    #[test]
    fn settings_default_timing() {
        let settings = CoordinatorSettings::default();
        assert_eq!(settings.fade, Duration::from_millis(500));
        assert_eq!(settings.volume_interval, Duration::from_millis(300));
        assert_eq!(settings.position_interval, Duration::from_millis(16));
        assert_eq!(settings.default_track, PathBuf::from("assets/song.mp3"));
    }
}
