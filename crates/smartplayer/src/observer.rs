//! Playback notifications for the presentation layer.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Receives coordinator notifications.
///
/// Calls arrive on coordinator-owned threads, never while the coordinator holds
/// its lock, so implementations may call back into the coordinator.
pub trait PlaybackObserver: Send + Sync {
    /// A new track was loaded and started. `duration` is `None` when unknown.
    fn track_changed(&self, duration: Option<Duration>);
    /// Periodic position report while the coordinator runs.
    fn position_updated(&self, position: Duration);
    fn title_changed(&self, title: &str);
}

/// Weak registration slot shared between the coordinator and its tickers.
#[derive(Default)]
pub(crate) struct ObserverSlot {
    inner: Mutex<Option<Weak<dyn PlaybackObserver>>>,
}

impl ObserverSlot {
    pub(crate) fn set(&self, observer: Weak<dyn PlaybackObserver>) {
        match self.inner.lock() {
            Ok(mut slot) => *slot = Some(observer),
            Err(poisoned) => *poisoned.into_inner() = Some(observer),
        }
    }

    /// The observer, if one is registered and still alive.
    pub(crate) fn get(&self) -> Option<Arc<dyn PlaybackObserver>> {
        let slot = match self.inner.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().and_then(Weak::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quiet;

    impl PlaybackObserver for Quiet {
        fn track_changed(&self, _: Option<Duration>) {}
        fn position_updated(&self, _: Duration) {}
        fn title_changed(&self, _: &str) {}
    }

    #[test]
    fn empty_slot_yields_none() {
        assert!(ObserverSlot::default().get().is_none());
    }

    #[test]
    fn slot_does_not_keep_observer_alive() {
        let slot = ObserverSlot::default();
        let observer: Arc<dyn PlaybackObserver> = Arc::new(Quiet);
        slot.set(Arc::downgrade(&observer));
        assert!(slot.get().is_some());
        drop(observer);
        assert!(slot.get().is_none());
    }
}
