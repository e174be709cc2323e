//! Bounded FIFO work queue with a concurrency ceiling.
//!
//! Jobs start in submission order. At most `ceiling` worker tasks run at
//! once; a worker that finishes a job loops back to pop the next one, so
//! completion never recurses into dispatch. When the backlog is empty the
//! worker exits and the slot frees up for a later burst.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::{Error, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueueInner {
    backlog: VecDeque<Job>,
    running: usize,
    /// Slots claimed via [`WorkQueue::reserve`] but not yet submitted.
    reserved: usize,
}

/// FIFO queue running jobs on the tokio runtime under a concurrency ceiling.
///
/// Cloning produces another handle to the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Mutex<QueueInner>>,
    idle: Arc<Notify>,
    ceiling: usize,
    capacity: usize,
}

impl WorkQueue {
    /// Create a queue with the given concurrency ceiling and backlog
    /// capacity. Both are clamped to at least 1.
    #[must_use]
    pub fn new(ceiling: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                backlog: VecDeque::new(),
                running: 0,
                reserved: 0,
            })),
            idle: Arc::new(Notify::new()),
            ceiling: ceiling.max(1),
            capacity: capacity.max(1),
        }
    }

    /// Submit a job.
    ///
    /// # Errors
    ///
    /// `Error::QueueFull` when the backlog is at capacity. The error is
    /// local; nothing already queued is affected.
    pub fn push<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let spawn_worker = {
            let mut inner = self.lock_inner();
            if inner.backlog.len() + inner.reserved >= self.capacity {
                return Err(Error::QueueFull {
                    capacity: self.capacity,
                });
            }
            inner.backlog.push_back(Box::pin(job));
            Self::claim_worker(&mut inner, self.ceiling)
        };

        if spawn_worker {
            self.spawn_worker();
        }
        Ok(())
    }

    /// Claim a backlog slot without a job yet.
    ///
    /// The slot counts against capacity immediately, so the caller can do
    /// expensive stateful work (compression, encoding) knowing the later
    /// [`QueueSlot::submit`] cannot be rejected. Dropping the slot without
    /// submitting releases it.
    ///
    /// # Errors
    ///
    /// `Error::QueueFull` when the backlog plus outstanding reservations
    /// is at capacity.
    pub fn reserve(&self) -> Result<QueueSlot> {
        let mut inner = self.lock_inner();
        if inner.backlog.len() + inner.reserved >= self.capacity {
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }
        inner.reserved += 1;
        drop(inner);
        Ok(QueueSlot {
            queue: self.clone(),
            redeemed: false,
        })
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn claim_worker(inner: &mut QueueInner, ceiling: usize) -> bool {
        if inner.running < ceiling {
            inner.running += 1;
            true
        } else {
            false
        }
    }

    fn spawn_worker(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            queue.run_worker().await;
        });
    }

    /// Pop-and-run loop for one worker slot.
    async fn run_worker(&self) {
        loop {
            let job = {
                let mut inner = self.lock_inner();
                match inner.backlog.pop_front() {
                    Some(job) => job,
                    None => {
                        inner.running -= 1;
                        if inner.running == 0 {
                            self.idle.notify_waiters();
                        }
                        return;
                    }
                }
            };
            job.await;
        }
    }

    /// Whether a push right now would be accepted.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        let inner = self.lock_inner();
        inner.backlog.len() + inner.reserved < self.capacity
    }

    /// Jobs waiting to start.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.lock_inner().backlog.len()
    }

    /// Worker slots currently occupied.
    #[must_use]
    pub fn running(&self) -> usize {
        self.lock_inner().running
    }

    /// Wait until every submitted job has finished and no worker is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            {
                let inner = self.lock_inner();
                if inner.running == 0 && inner.backlog.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}

/// A claimed backlog slot, created by [`WorkQueue::reserve`].
///
/// Submitting through the slot always succeeds; dropping it unsubmitted
/// releases the claim.
pub struct QueueSlot {
    queue: WorkQueue,
    redeemed: bool,
}

impl QueueSlot {
    /// Turn the reservation into a queued job.
    pub fn submit<F>(mut self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.redeemed = true;
        let spawn_worker = {
            let mut inner = self.queue.lock_inner();
            inner.reserved -= 1;
            inner.backlog.push_back(Box::pin(job));
            WorkQueue::claim_worker(&mut inner, self.queue.ceiling)
        };
        if spawn_worker {
            self.queue.spawn_worker();
        }
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        if !self.redeemed {
            self.queue.lock_inner().reserved -= 1;
        }
    }
}
