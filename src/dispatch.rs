//! # Background Dispatcher
//!
//! Webhook handlers must acknowledge SRS immediately, so all persistence
//! and capture work runs here instead. The queue is bounded: a burst of
//! lifecycle events degrades to dropped background jobs (logged), never to
//! unbounded concurrent work. Each job runs under a timeout.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 256;
const WORKER_COUNT: usize = 8;
const JOB_TIMEOUT: Duration = Duration::from_secs(30);

struct Job {
    label: &'static str,
    fut: Pin<Box<dyn Future<Output = ()> + Send>>,
}

#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::Sender<Job>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(QUEUE_CAPACITY, WORKER_COUNT, JOB_TIMEOUT)
    }
}

impl Dispatcher {
    pub fn new(capacity: usize, workers: usize, job_timeout: Duration) -> Self {
        let (queue, receiver) = mpsc::channel::<Job>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        for worker in 0..workers {
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let job = { receiver.lock().await.recv().await };
                    let Some(job) = job else { break };
                    if tokio::time::timeout(job_timeout, job.fut).await.is_err() {
                        warn!(worker, label = job.label, "background job timed out");
                    }
                }
            });
        }

        Self { queue }
    }

    /// Queue a background job. When the queue is full the job is dropped
    /// and logged; callers have already acknowledged the webhook by then.
    pub fn dispatch<F>(&self, label: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job = Job {
            label,
            fut: Box::pin(fut),
        };
        if self.queue.try_send(job).is_err() {
            warn!(label, "dispatch queue full, dropping background job");
        }
    }
}
