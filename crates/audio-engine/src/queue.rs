//! Bounded sample queues connecting the pipeline stages.
//!
//! Every stage hands audio to the next one through a [`SampleQueue`]:
//! - decode thread → queue
//! - resampler thread → queue
//! - output callback drains the queue without blocking
//!
//! Closing a queue is how stages shut each other down: producers stop pushing,
//! consumers drain what is left and then observe the end of stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Thread-safe bounded queue of interleaved `f32` samples.
///
/// The channel count is fixed for the lifetime of the queue and every pop returns
/// whole frames. The `done` flag lives under the same mutex as the samples so a
/// waiter can never miss the close.
pub struct SampleQueue {
    channels: usize,
    capacity_samples: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

struct QueueInner {
    samples: VecDeque<f32>,
    done: bool,
}

/// How a consumer wants to pull frames out of the queue.
#[derive(Clone, Copy, Debug)]
pub enum PopStrategy {
    /// Wait for exactly `frames`; `None` if the queue closes first.
    BlockingExact { frames: usize },
    /// Wait for at least one frame, then take up to `max_frames`.
    BlockingUpTo { max_frames: usize },
    /// Take up to `max_frames` right now; `None` when empty.
    NonBlocking { max_frames: usize },
}

/// Queue capacity in samples for `seconds` of audio at `rate_hz`.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub fn queue_capacity_samples(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl SampleQueue {
    pub fn new(channels: usize, capacity_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity_samples: capacity_samples.max(channels),
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Buffered frames at the time of the call.
    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Mark the end of stream and wake every waiter. Idempotent.
    pub fn close(&self) {
        self.lock().done = true;
        self.cv.notify_all();
    }

    /// Push samples, waiting for room when the queue is full.
    ///
    /// Returns early (dropping the rest) once the queue is closed.
    pub fn push_interleaved_blocking(&self, samples: &[f32]) {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            while g.samples.len() >= self.capacity_samples && !g.done {
                g = self.wait(g);
            }
            if g.done {
                return;
            }
            let room = self.capacity_samples - g.samples.len();
            let end = (offset + room).min(samples.len());
            g.samples.extend(&samples[offset..end]);
            offset = end;
            drop(g);
            self.cv.notify_all();
        }
    }

    /// Pop whole frames according to `strategy`.
    pub fn pop(&self, strategy: PopStrategy) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let frames = match strategy {
            PopStrategy::BlockingExact { frames } => {
                let want = frames * self.channels;
                while g.samples.len() < want && !g.done {
                    g = self.wait(g);
                }
                if g.samples.len() < want {
                    return None;
                }
                frames
            }
            PopStrategy::BlockingUpTo { max_frames } => {
                while g.samples.len() < self.channels && !g.done {
                    g = self.wait(g);
                }
                (g.samples.len() / self.channels).min(max_frames)
            }
            PopStrategy::NonBlocking { max_frames } => {
                (g.samples.len() / self.channels).min(max_frames)
            }
        };
        if frames == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..frames * self.channels).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(&self, g: MutexGuard<'a, QueueInner>) -> MutexGuard<'a, QueueInner> {
        self.cv
            .wait(g)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Block until `q` is closed and drained, or `cancel` is raised.
///
/// Returns `true` when the queue drained normally.
pub fn wait_until_drained_or_cancel(q: &SampleQueue, cancel: &AtomicBool) -> bool {
    let mut g = q.lock();
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        if g.done && g.samples.is_empty() {
            return true;
        }
        let (next, _timeout) = q
            .cv
            .wait_timeout(g, Duration::from_millis(50))
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        g = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn queue_capacity_samples_falls_back_on_bad_durations() {
        assert_eq!(queue_capacity_samples(44_100, 2, 1.0), 88_200);
        assert_eq!(queue_capacity_samples(48_000, 2, 0.0), 192_000);
        assert_eq!(queue_capacity_samples(48_000, 1, f32::NAN), 96_000);
    }

    #[test]
    fn nonblocking_pop_on_empty_queue_returns_none() {
        let q = SampleQueue::new(2, 16);
        assert!(q.pop(PopStrategy::NonBlocking { max_frames: 4 }).is_none());
    }

    #[test]
    fn nonblocking_pop_takes_whole_frames_in_order() {
        let q = SampleQueue::new(2, 64);
        q.push_interleaved_blocking(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = q.pop(PopStrategy::NonBlocking { max_frames: 8 }).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(q.len_frames(), 0);
    }

    #[test]
    fn blocking_exact_waits_for_producer() {
        let q = Arc::new(SampleQueue::new(2, 64));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pop(PopStrategy::BlockingExact { frames: 3 }))
        };
        q.push_interleaved_blocking(&[0.1, 0.2, 0.3, 0.4]);
        q.push_interleaved_blocking(&[0.5, 0.6]);
        let out = consumer.join().unwrap().unwrap();
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn blocking_up_to_drains_tail_then_sees_close() {
        let q = SampleQueue::new(1, 64);
        q.push_interleaved_blocking(&[1.0, 2.0, 3.0]);
        q.close();
        let out = q.pop(PopStrategy::BlockingUpTo { max_frames: 8 }).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
        assert!(q.pop(PopStrategy::BlockingUpTo { max_frames: 8 }).is_none());
    }

    #[test]
    fn close_releases_blocked_producer() {
        let q = Arc::new(SampleQueue::new(1, 2));
        let producer = {
            let q = q.clone();
            thread::spawn(move || q.push_interleaved_blocking(&[0.0; 16]))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        producer.join().unwrap();
        assert_eq!(q.len_frames(), 2);
    }

    #[test]
    fn wait_until_drained_or_cancel_reports_drain() {
        let q = SampleQueue::new(2, 8);
        q.close();
        assert!(wait_until_drained_or_cancel(&q, &AtomicBool::new(false)));
    }

    #[test]
    fn wait_until_drained_or_cancel_respects_cancel() {
        let q = SampleQueue::new(2, 8);
        q.push_interleaved_blocking(&[1.0, 1.0]);
        assert!(!wait_until_drained_or_cancel(&q, &AtomicBool::new(true)));
    }
}
