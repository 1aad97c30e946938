//! Worker threads for multithreaded dispatch.
//!
//! The fuser session reads requests on one thread. In multithreaded mode
//! each request is handed to this pool together with its reply object, so
//! slow operations do not hold up the session loop.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};
use tracing::{debug, warn};

/// Queued jobs per worker before submission blocks.
const QUEUE_DEPTH_PER_WORKER: usize = 64;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs requests either inline or on a fixed pool of threads.
pub struct Dispatcher {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Runs every job on the calling thread.
    pub fn inline() -> Self {
        Self {
            sender: None,
            workers: Vec::new(),
        }
    }

    /// Runs jobs on `threads` worker threads.
    pub fn pool(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = bounded::<Job>(threads * QUEUE_DEPTH_PER_WORKER);
        let workers = (0..threads)
            .filter_map(|worker_id| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("fuseshim-worker-{worker_id}"))
                    .spawn(move || {
                        for job in receiver {
                            job();
                        }
                        debug!(worker_id, "Worker exiting");
                    })
                    .inspect_err(|e| warn!(worker_id, error = %e, "Failed to spawn worker"))
                    .ok()
            })
            .collect::<Vec<_>>();

        if workers.is_empty() {
            warn!("No worker threads available, dispatching inline");
            return Self::inline();
        }
        debug!(workers = workers.len(), "Started worker pool");
        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub fn is_inline(&self) -> bool {
        self.sender.is_none()
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Runs `job`, on a worker if there is a pool.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        match &self.sender {
            Some(sender) => {
                if let Err(rejected) = sender.send(Box::new(job)) {
                    // Workers are gone; still answer the request.
                    (rejected.into_inner())();
                }
            }
            None => job(),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the channel lets workers drain the queue and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_inline_runs_immediately() {
        let dispatcher = Dispatcher::inline();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        dispatcher.execute(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(dispatcher.is_inline());
    }

    #[test]
    fn test_pool_runs_everything_before_drop_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let dispatcher = Dispatcher::pool(4);
            assert_eq!(dispatcher.workers(), 4);
            for _ in 0..1000 {
                let c = Arc::clone(&counter);
                dispatcher.execute(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn test_pool_uses_other_threads() {
        let dispatcher = Dispatcher::pool(2);
        let (tx, rx) = crossbeam_channel::unbounded();
        dispatcher.execute(move || {
            tx.send(thread::current().id()).unwrap();
        });
        let worker_thread = rx.recv().unwrap();
        assert_ne!(worker_thread, thread::current().id());
    }
}
