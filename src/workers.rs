/*
 * mualib - background task queue.
 *
 * This file is part of mualib.
 *
 * mualib is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mualib is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mualib. If not, see <http://www.gnu.org/licenses/>.
 */

//! Simple blocking job control.
//!
//! A bounded pool of worker threads consumes units of work from a shared
//! pending queue, keeping long mailbox scans and network calls off the
//! interactive thread. Workers post status/result objects to an outbound
//! channel the caller drains with a non-blocking poll. A panicking unit of
//! work is logged and swallowed at the work-unit boundary; the worker lives
//! on to serve the next unit.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use crossbeam::channel::{unbounded, Receiver, Sender};

const MAX_WORKERS: usize = 4;

type Job<T> = Box<dyn FnOnce(&Sender<T>) + Send + 'static>;

/// A fixed-capacity pool of background workers.
///
/// `T` is whatever the submitted jobs report back: progress snapshots,
/// results, errors. Workers are started lazily as work arrives and run
/// indefinitely afterwards, pulling the next unit when idle.
pub struct TaskQueue<T: Send + 'static> {
    jobs_tx: Sender<Job<T>>,
    jobs_rx: Receiver<Job<T>>,
    info_tx: Sender<T>,
    info_rx: Receiver<T>,
    workers: AtomicUsize,
}

impl<T: Send + 'static> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> TaskQueue<T> {
    pub fn new() -> Self {
        let (jobs_tx, jobs_rx) = unbounded();
        let (info_tx, info_rx) = unbounded();
        Self {
            jobs_tx,
            jobs_rx,
            info_tx,
            info_rx,
            workers: AtomicUsize::new(0),
        }
    }

    /// Queue a unit of work. The job receives a sender with which it may post
    /// zero or more `T` objects for [`TaskQueue::check_for_info`] to pick up.
    ///
    /// A new worker is started only for the first submission, or while work
    /// is already pending and the pool is below capacity; otherwise the job
    /// waits for a busy worker to come around.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce(&Sender<T>) + Send + 'static,
    {
        let workers = self.workers.load(Ordering::SeqCst);
        let spawn = workers == 0 || (workers < MAX_WORKERS && !self.jobs_rx.is_empty());
        let _ = self.jobs_tx.send(Box::new(job));
        if spawn {
            self.spawn_worker();
        }
    }

    /// Non-blocking poll: one pending object from the outbound channel, or
    /// `None` if nothing is available right now.
    pub fn check_for_info(&self) -> Option<T> {
        self.info_rx.try_recv().ok()
    }

    /// Units of work waiting for a worker.
    pub fn pending(&self) -> usize {
        self.jobs_rx.len()
    }

    fn spawn_worker(&self) {
        let n = self.workers.fetch_add(1, Ordering::SeqCst);
        if n >= MAX_WORKERS {
            self.workers.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        let jobs_rx = self.jobs_rx.clone();
        let info_tx = self.info_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("mualib-worker-{}", n))
            .spawn(move || {
                // Exits when the queue itself is dropped and the channel
                // disconnects.
                while let Ok(job) = jobs_rx.recv() {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| job(&info_tx))) {
                        let msg = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        log::error!("worker: unit of work panicked: {}", msg);
                    }
                }
            });
        if let Err(err) = spawned {
            self.workers.fetch_sub(1, Ordering::SeqCst);
            log::error!("could not spawn worker thread: {}", err);
        }
    }
}
