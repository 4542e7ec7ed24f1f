//! Fixed-size background worker pool with a shared FIFO queue.
//!
//! Producers either enqueue without waiting ([`WorkerPool::submit`]) or wait
//! until the backlog drops below a limit ([`WorkerPool::submit_bounded`]).
//! Shutdown either abandons the backlog or drains it; in both modes jobs that
//! are already running are allowed to finish.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    ShutDown,
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Worker pool needs at least one worker thread")]
    NoWorkers,
    #[error("Queue limit must be at least 1")]
    ZeroQueueLimit,
}

/// What happens to queued jobs on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Drop queued jobs; only in-flight jobs complete.
    Abandon,
    /// Process every queued job before the workers exit.
    Drain,
}

#[derive(Debug)]
struct PoolState<J> {
    queue: VecDeque<J>,
    in_flight: usize,
    accepting: bool,
    stop: bool,
}

#[derive(Debug)]
struct Shared<J> {
    state: Mutex<PoolState<J>>,
    /// Signalled when a job is queued or the pool stops.
    job_available: Condvar,
    /// Signalled when a job leaves the queue or finishes.
    progress: Condvar,
}

/// Decrements the in-flight counter even if the handler panics.
struct InFlightGuard<'a, J> {
    shared: &'a Shared<J>,
}

impl<J> Drop for InFlightGuard<'_, J> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.in_flight -= 1;
        self.shared.progress.notify_all();
    }
}

#[derive(Debug)]
pub struct WorkerPool<J: Send + 'static> {
    shared: Arc<Shared<J>>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Starts `worker_count` threads named `{name}-{index}` that feed queued
    /// jobs to `handler`.
    pub fn new<H>(name: &str, worker_count: usize, handler: H) -> Result<Self, PoolError>
    where
        H: Fn(J) + Send + Sync + 'static,
    {
        if worker_count == 0 {
            return Err(PoolError::NoWorkers);
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                in_flight: 0,
                accepting: true,
                stop: false,
            }),
            job_available: Condvar::new(),
            progress: Condvar::new(),
        });
        let handler = Arc::new(handler);

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(worker_count),
        };

        for index in 0..worker_count {
            let shared = Arc::clone(&pool.shared);
            let handler = Arc::clone(&handler);
            let spawned = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&shared, handler.as_ref()));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(err) => {
                    pool.shutdown(ShutdownMode::Abandon);
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        debug!("Worker pool '{}' started with {} threads", name, worker_count);
        Ok(pool)
    }

    /// Queues a job without waiting.
    pub fn submit(&self, job: J) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        if !state.accepting {
            return Err(PoolError::ShutDown);
        }
        state.queue.push_back(job);
        self.shared.job_available.notify_one();
        Ok(())
    }

    /// Waits until fewer than `limit` jobs are queued, then queues the job.
    pub fn submit_bounded(&self, job: J, limit: usize) -> Result<(), PoolError> {
        if limit == 0 {
            return Err(PoolError::ZeroQueueLimit);
        }

        let mut state = self.shared.state.lock();
        while state.accepting && state.queue.len() >= limit {
            self.shared.progress.wait(&mut state);
        }
        if !state.accepting {
            return Err(PoolError::ShutDown);
        }
        state.queue.push_back(job);
        self.shared.job_available.notify_one();
        Ok(())
    }

    /// Number of jobs waiting in the queue (not counting running ones).
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Number of jobs currently being processed.
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    /// Blocks until the queue is empty and no job is running.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while !state.queue.is_empty() || state.in_flight > 0 {
            self.shared.progress.wait(&mut state);
        }
    }

    /// Stops accepting jobs and joins the workers.
    ///
    /// Returns the number of queued jobs that were dropped (always 0 for
    /// [`ShutdownMode::Drain`]). Calling it again is a no-op.
    pub fn shutdown(&mut self, mode: ShutdownMode) -> usize {
        let abandoned = {
            let mut state = self.shared.state.lock();
            state.accepting = false;
            let abandoned = match mode {
                ShutdownMode::Abandon => state.queue.drain(..).count(),
                ShutdownMode::Drain => 0,
            };
            state.stop = true;
            self.shared.job_available.notify_all();
            self.shared.progress.notify_all();
            abandoned
        };

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }

        if abandoned > 0 {
            debug!("Worker pool shut down, {} queued jobs abandoned", abandoned);
        }
        abandoned
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            let abandoned = self.shutdown(ShutdownMode::Abandon);
            if abandoned > 0 {
                warn!(
                    "Worker pool dropped without shutdown; {} queued jobs abandoned",
                    abandoned
                );
            }
        }
    }
}

fn worker_loop<J, H>(shared: &Shared<J>, handler: &H)
where
    H: Fn(J),
{
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.in_flight += 1;
                    shared.progress.notify_all();
                    break job;
                }
                if state.stop {
                    return;
                }
                shared.job_available.wait(&mut state);
            }
        };

        let _guard = InFlightGuard { shared };
        handler(job);
    }
}
