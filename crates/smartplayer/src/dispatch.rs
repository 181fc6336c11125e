//! Serial background queues.
//!
//! A [`SerialQueue`] is one named worker thread draining a channel of jobs in
//! submission order. The coordinator keeps one for output-stream calls and one for
//! input-stream calls so that blocking device work never runs under its lock.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Sender, bounded, unbounded};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct SerialQueue {
    label: &'static str,
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl SerialQueue {
    pub fn new(label: &'static str) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let worker = thread::Builder::new().name(label.into()).spawn(move || {
            while let Ok(job) = rx.recv() {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!(queue = label, "queued job panicked");
                }
            }
        })?;
        Ok(Self {
            label,
            tx: Some(tx),
            worker_id: worker.thread().id(),
            worker: Some(worker),
        })
    }

    /// Queue `job` and return immediately.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        if tx.send(Box::new(job)).is_err() {
            tracing::warn!(queue = self.label, "queue worker gone, job dropped");
        }
    }

    /// Block until every job queued before this call has run.
    ///
    /// Calling this from inside a job on the same queue returns immediately.
    pub fn flush(&self) {
        if thread::current().id() == self.worker_id {
            return;
        }
        let (done_tx, done_rx) = bounded::<()>(1);
        self.dispatch(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish what is queued and exit.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if thread::current().id() != self.worker_id {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn jobs_run_in_submission_order() {
        let queue = SerialQueue::new("test-order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let seen = seen.clone();
            queue.dispatch(move || seen.lock().unwrap().push(i));
        }
        queue.flush();
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn flush_waits_for_slow_jobs() {
        let queue = SerialQueue::new("test-flush").unwrap();
        let done = Arc::new(Mutex::new(false));
        let flag = done.clone();
        queue.dispatch(move || {
            std::thread::sleep(Duration::from_millis(50));
            *flag.lock().unwrap() = true;
        });
        queue.flush();
        assert!(*done.lock().unwrap());
    }

    #[test]
    fn panicking_job_does_not_stop_the_queue() {
        let queue = SerialQueue::new("test-panic").unwrap();
        queue.dispatch(|| panic!("boom"));
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        queue.dispatch(move || *flag.lock().unwrap() = true);
        queue.flush();
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn drop_drains_pending_jobs() {
        let seen = Arc::new(Mutex::new(0));
        {
            let queue = SerialQueue::new("test-drop").unwrap();
            for _ in 0..5 {
                let seen = seen.clone();
                queue.dispatch(move || *seen.lock().unwrap() += 1);
            }
        }
        assert_eq!(*seen.lock().unwrap(), 5);
    }

    #[test]
    fn worker_thread_carries_label() {
        let queue = SerialQueue::new("test-label").unwrap();
        let name = Arc::new(Mutex::new(None));
        let slot = name.clone();
        queue.dispatch(move || {
            *slot.lock().unwrap() = std::thread::current().name().map(str::to_string);
        });
        queue.flush();
        assert_eq!(name.lock().unwrap().as_deref(), Some("test-label"));
    }
}
