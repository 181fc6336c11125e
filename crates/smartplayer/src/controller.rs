//! Transport view-model for a single player screen.
//!
//! [`TransportController`] turns button presses into coordinator calls and keeps
//! a [`TransportView`] (title label, play/loop toggles, scrub bar) in sync with
//! coordinator notifications.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::coordinator::PlaybackCoordinator;
use crate::observer::PlaybackObserver;

/// What the screen shows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransportView {
    pub title: String,
    pub playing: bool,
    pub looping: bool,
    pub scrub_value: Duration,
    /// Scrub range; `None` until a duration is known.
    pub scrub_max: Option<Duration>,
}

/// Which part of the view a notification touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewChange {
    Title,
    Track,
    Position,
}

type RenderHook = Box<dyn Fn(&TransportView, ViewChange) + Send + Sync>;

struct Screen {
    view: Mutex<TransportView>,
    render: Option<RenderHook>,
}

impl Screen {
    fn view(&self) -> MutexGuard<'_, TransportView> {
        match self.view.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn update(&self, change: ViewChange, apply: impl FnOnce(&mut TransportView)) {
        let snapshot = {
            let mut view = self.view();
            apply(&mut view);
            view.clone()
        };
        if let Some(render) = self.render.as_ref() {
            render(&snapshot, change);
        }
    }
}

impl PlaybackObserver for Screen {
    fn track_changed(&self, duration: Option<Duration>) {
        self.update(ViewChange::Track, |view| {
            view.scrub_max = duration;
            view.scrub_value = Duration::ZERO;
        });
    }

    fn position_updated(&self, position: Duration) {
        self.update(ViewChange::Position, |view| view.scrub_value = position);
    }

    fn title_changed(&self, title: &str) {
        self.update(ViewChange::Title, |view| view.title = title.to_string());
    }
}

pub struct TransportController {
    coordinator: PlaybackCoordinator,
    screen: Arc<Screen>,
}

impl TransportController {
    pub fn new(coordinator: PlaybackCoordinator) -> Self {
        Self::build(coordinator, None)
    }

    /// Like [`TransportController::new`], calling `render` after every
    /// notification with the updated view.
    pub fn with_render_hook<F>(coordinator: PlaybackCoordinator, render: F) -> Self
    where
        F: Fn(&TransportView, ViewChange) + Send + Sync + 'static,
    {
        Self::build(coordinator, Some(Box::new(render)))
    }

    fn build(coordinator: PlaybackCoordinator, render: Option<RenderHook>) -> Self {
        let view = TransportView {
            title: coordinator.current_title(),
            scrub_max: coordinator.player().and_then(|p| p.duration()),
            ..TransportView::default()
        };
        let screen = Arc::new(Screen {
            view: Mutex::new(view),
            render,
        });
        coordinator.set_observer(&screen);
        Self {
            coordinator,
            screen,
        }
    }

    pub fn coordinator(&self) -> &PlaybackCoordinator {
        &self.coordinator
    }

    pub fn view(&self) -> TransportView {
        self.screen.view().clone()
    }

    /// Play/pause button. Returns whether playback is now on.
    pub fn toggle_play(&self) -> bool {
        let playing = {
            let mut view = self.screen.view();
            view.playing = !view.playing;
            view.playing
        };
        if playing {
            self.coordinator.start();
        } else {
            self.coordinator.stop();
        }
        let duration = self.coordinator.player().and_then(|p| p.duration());
        self.screen.view().scrub_max = duration;
        playing
    }

    pub fn next(&self) {
        self.skip(true);
    }

    pub fn previous(&self) {
        self.skip(false);
    }

    fn skip(&self, forward: bool) {
        self.coordinator.play_next(forward);
        let mut view = self.screen.view();
        view.playing = true;
        view.looping = false;
    }

    /// Loop button. Returns whether looping is now on.
    pub fn toggle_loop(&self) -> bool {
        let looping = {
            let mut view = self.screen.view();
            view.looping = !view.looping;
            view.looping
        };
        self.coordinator.set_loop(looping);
        looping
    }

    /// Scrub bar moved to `position`.
    pub fn scrub(&self, position: Duration) -> Result<()> {
        let player = self
            .coordinator
            .player()
            .ok_or_else(|| anyhow!("no active track"))?;
        player.seek(position)?;
        self.screen.view().scrub_value = position;
        Ok(())
    }

    pub fn set_volume(&self, level: f32) {
        self.coordinator.set_volume(level);
    }
}
