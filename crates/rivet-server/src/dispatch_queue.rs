//! Hand-off of handler calls from sessions to the threads that drive the
//! executor.
//!
//! Sessions live on the executor and never run a handler themselves. Each
//! call is queued here as a [`Job`]; a driving thread picks it up, leaves the
//! executor and runs it, so the scheduler passes to another driver for the
//! duration of the call. With N driving threads up to N handlers run at once
//! while sessions and the accept loop keep going. The session waits for the
//! outcome on a oneshot channel, which keeps replies on one connection in
//! request order.

use tokio::sync::{Mutex, mpsc};

/// One queued handler call.
pub(crate) struct Job(Box<dyn FnOnce() + Send>);

impl Job {
    /// Run the call on the current thread.
    pub(crate) fn run(self) {
        (self.0)();
    }
}

/// Submitting side, held by every session.
#[derive(Debug, Clone)]
pub(crate) struct JobSender {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobSender {
    /// Queue `job`. Returns `false` once the queue is gone.
    pub(crate) fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Job(Box::new(job))).is_ok()
    }
}

/// Queue shared by all driving threads of one server.
pub(crate) struct DispatchQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
}

impl DispatchQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Mutex::new(rx) }
    }

    pub(crate) fn sender(&self) -> JobSender {
        JobSender { tx: self.tx.clone() }
    }

    /// Wait for the next job. Any number of threads may wait at once; each
    /// job goes to exactly one of them.
    pub(crate) async fn next(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }

    /// Run jobs on the calling thread for as long as the queue exists.
    #[cfg(test)]
    pub(crate) fn run_blocking(&self) {
        loop {
            let next = self.rx.blocking_lock().blocking_recv();
            let Some(job) = next else { break };
            job.run();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let queue = DispatchQueue::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let sender = queue.sender();
        for n in 0..3 {
            let order = Arc::clone(&order);
            assert!(sender.submit(move || order.lock().unwrap().push(n)));
        }

        for _ in 0..3 {
            queue.next().await.unwrap().run();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn every_job_runs_once_across_runners() {
        let queue = Arc::new(DispatchQueue::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let _runners: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.run_blocking())
            })
            .collect();

        let sender = queue.sender();
        for _ in 0..50 {
            let ran = Arc::clone(&ran);
            sender.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while ran.load(Ordering::SeqCst) < 50 && Instant::now() < deadline {
            thread::yield_now();
        }
        assert_eq!(ran.load(Ordering::SeqCst), 50);
    }
}
