//! Job channel between submitters and workers: bounded or unbounded
//! `tokio::sync::mpsc`, driven from plain threads through the blocking API.

use lull_core::FullPolicy;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::error::SchedulerError;

use super::job::Job;

#[derive(Debug, Clone)]
pub(crate) enum JobSender {
    Bounded { tx: mpsc::Sender<Job>, capacity: usize },
    Unbounded(mpsc::UnboundedSender<Job>),
}

#[derive(Debug)]
pub(crate) enum JobReceiver {
    Bounded(mpsc::Receiver<Job>),
    Unbounded(mpsc::UnboundedReceiver<Job>),
}

pub(crate) fn job_channel(capacity: Option<usize>) -> (JobSender, JobReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (JobSender::Bounded { tx, capacity }, JobReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (JobSender::Unbounded(tx), JobReceiver::Unbounded(rx))
        }
    }
}

impl JobSender {
    /// Hand a job to the workers. On failure the job comes back with the
    /// error so the caller can settle its handle.
    ///
    /// `Block` parks the calling thread while the channel is full, except
    /// inside an async runtime, where the send falls back to `Reject`.
    pub(crate) fn send(&self, job: Job, policy: FullPolicy) -> Result<(), (SchedulerError, Job)> {
        match self {
            Self::Unbounded(tx) => tx.send(job).map_err(|e| (SchedulerError::ShuttingDown, e.0)),
            Self::Bounded { tx, capacity } => {
                let blocking = policy == FullPolicy::Block && Handle::try_current().is_err();
                if blocking {
                    return tx
                        .blocking_send(job)
                        .map_err(|e| (SchedulerError::ShuttingDown, e.0));
                }
                if policy == FullPolicy::Block {
                    debug!("inside an async runtime; background submission will not block");
                }
                tx.try_send(job).map_err(|e| match e {
                    TrySendError::Full(job) => (SchedulerError::QueueFull { capacity: *capacity }, job),
                    TrySendError::Closed(job) => (SchedulerError::ShuttingDown, job),
                })
            }
        }
    }
}

impl JobReceiver {
    /// Block until a job arrives. `None` once every sender is gone and the
    /// channel is drained.
    pub(crate) fn blocking_recv(&mut self) -> Option<Job> {
        match self {
            Self::Bounded(rx) => rx.blocking_recv(),
            Self::Unbounded(rx) => rx.blocking_recv(),
        }
    }
}
