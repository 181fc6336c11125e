//! Periodic callbacks on a dedicated thread.

use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};

/// Runs a callback every `period` until cancelled or dropped.
///
/// `cancel` returns only after the thread has exited, so no callback runs after
/// it. The exception is a callback cancelling its own ticker, which just detaches.
pub struct Ticker {
    name: &'static str,
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Ticker {
    pub fn spawn<F>(name: &'static str, period: Duration, mut on_tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticks = tick(period.max(Duration::from_millis(1)));
        let join = thread::Builder::new().name(name.into()).spawn(move || {
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticks) -> _ => on_tick(),
                }
            }
        })?;
        tracing::debug!(ticker = name, period_ms = period.as_millis() as u64, "ticker started");
        Ok(Self {
            name,
            stop_tx: Some(stop_tx),
            thread_id: join.thread().id(),
            join: Some(join),
        })
    }

    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects `stop_rx`, which wakes the select.
        drop(self.stop_tx.take());
        if let Some(join) = self.join.take() {
            if thread::current().id() != self.thread_id {
                let _ = join.join();
            }
            tracing::debug!(ticker = self.name, "ticker stopped");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let ticker = Ticker::spawn("test-ticks", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        thread::sleep(Duration::from_millis(60));
        ticker.cancel();
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn drop_stops_the_thread() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        {
            let _ticker = Ticker::spawn("test-drop", Duration::from_millis(5), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        let after_drop = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }
}
