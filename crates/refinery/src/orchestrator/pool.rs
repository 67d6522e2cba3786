//! Bounded worker pool.
//!
//! A fixed number of tokio tasks pull jobs from one bounded channel. When the
//! channel is full, submission is rejected instead of queueing without bound.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, info};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::runner::JobRunner;
use crate::error::{RefineryError, WorkerError};
use crate::job::Job;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Spawns `worker_count` workers. Must be called inside a tokio runtime.
    pub fn new(
        runner: Arc<JobRunner>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 || queue_capacity == 0 {
            return Err(WorkerError::InvalidPool(format!(
                "worker count ({}) and queue capacity ({}) must be greater than zero",
                worker_count, queue_capacity
            )));
        }

        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let runner = Arc::clone(&runner);
                tokio::spawn(run_worker(worker_id, receiver, runner))
            })
            .collect();

        info!(
            "Started {} workers (queue capacity {})",
            worker_count, queue_capacity
        );

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            shutdown: AtomicBool::new(false),
            queue_capacity,
        })
    }

    /// Enqueues a job without waiting. Rejects when the queue is full.
    pub fn try_submit(&self, job: Job) -> Result<(), RefineryError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed.into());
        }

        let guard = match self.sender.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Worker pool sender lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let sender = guard.as_ref().ok_or(WorkerError::ChannelClosed)?;

        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                debug!("Queue full, rejecting job {}", job.id);
                Err(RefineryError::QueueFull {
                    capacity: self.queue_capacity,
                })
            }
            Err(TrySendError::Closed(_)) => Err(WorkerError::ChannelClosed.into()),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Stops accepting jobs, lets queued jobs drain, and waits for the workers.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }
        info!("Shutting down worker pool...");

        let sender = match self.sender.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let workers = match self.workers.lock() {
            Ok(mut g) => std::mem::take(&mut *g),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    runner: Arc<JobRunner>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let next = receiver.lock().await.recv().await;
        match next {
            Some(job) => {
                debug!("Worker {} picked up job {}", worker_id, job.id);
                runner.run(job).await;
            }
            None => {
                debug!("Worker {} job channel closed", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
