use super::Job;
use tokio::sync::mpsc;

/// The producer half of the executor's job queue (§4.A).
///
/// An unbounded MPSC FIFO of boxed closures. Ordering is strict FIFO across
/// all producers: `tokio::sync::mpsc` already gives us that guarantee, so
/// this type exists mainly to keep call sites reading in terms of
/// push/drain rather than raw channel methods.
#[derive(Clone)]
pub(crate) struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

/// The single-consumer half, owned by the executor's worker thread.
pub(crate) struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Job>,
}

pub(crate) fn channel() -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobQueue { tx }, JobReceiver { rx })
}

impl JobQueue {
    /// Post a job. Never blocks; if the worker thread is gone the job is
    /// simply dropped (mirrors the original's `push` onto a queue whose
    /// consumer may already have exited during shutdown).
    pub(crate) fn push(&self, job: Job) {
        let _ = self.tx.send(job);
    }
}

impl JobReceiver {
    /// Pop a single job without blocking.
    pub(crate) fn pop(&mut self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    /// Drain and run every job currently queued, in FIFO order.
    pub(crate) fn drain_and_run(&mut self) {
        while let Some(job) = self.pop() {
            job();
        }
    }

    /// Await the next job, suspending the caller until one is posted or
    /// every `JobQueue` handle has been dropped.
    pub(crate) async fn recv(&mut self) -> Option<Job> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fifo_order_preserved_across_producers() {
        let (tx, mut rx) = channel();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..8 {
            let order = order.clone();
            tx.push(Box::new(move || order.lock().unwrap().push(i)));
        }
        rx.drain_and_run();
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn pop_is_non_blocking_when_empty() {
        let (_tx, mut rx) = channel();
        assert!(rx.pop().is_none());
    }

    #[test]
    fn jobs_run_exactly_once() {
        let (tx, mut rx) = channel();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        tx.push(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        rx.drain_and_run();
        rx.drain_and_run();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
