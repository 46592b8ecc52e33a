//! Bounded fan-out over a batch of independent fallible jobs.
//!
//! `N` workers pop jobs from one shared queue until it is empty. A failing
//! job never stops the others; every error is kept and returned as a single
//! [`AggregateError`] once all workers have been joined.

use std::{collections::VecDeque, future::Future, pin::Pin, sync::Arc};

use tokio::{sync::Mutex, task::JoinSet};
use tracing::{debug, warn};

use crate::error::{AggregateError, Error};

pub type Job = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

type Queue = Arc<Mutex<VecDeque<Job>>>;
type Errors = Arc<Mutex<Vec<Error>>>;

#[derive(Default)]
pub struct WorkerGroup {
    pending: Vec<Job>,
}

impl WorkerGroup {
    pub fn new() -> Self {
        WorkerGroup::default()
    }

    pub fn add<F>(&mut self, job: F)
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.pending.push(Box::pin(job));
    }

    /// Runs every queued job on at most `concurrency` workers.
    ///
    /// The batch is driven from its own task, so dropping the returned
    /// future does not abort jobs that were already dispatched.
    pub async fn run(self, concurrency: usize) -> Result<(), Error> {
        let tasks = self.pending.len();

        if tasks == 0 {
            return Ok(());
        }

        let workers = concurrency.clamp(1, tasks);
        let queue: Queue = Arc::new(Mutex::new(self.pending.into()));
        let errors: Errors = Arc::new(Mutex::new(Vec::new()));

        debug!(tasks, concurrency = workers, "worker group: starting");

        let batch = {
            let errors = errors.clone();
            tokio::spawn(async move {
                let mut set = JoinSet::new();

                for worker_id in 0..workers {
                    set.spawn(work(worker_id, queue.clone(), errors.clone()));
                }

                while let Some(result) = set.join_next().await {
                    match result {
                        Ok(worker_id) => {
                            debug!(worker_id, "worker group: worker reaped")
                        },
                        Err(e) => errors.lock().await.push(e.into()),
                    }
                }
            })
        };

        batch.await?;

        let errors = std::mem::take(&mut *errors.lock().await);

        debug!(
            tasks,
            concurrency = workers,
            errors = errors.len(),
            "worker group: finished"
        );

        if errors.is_empty() {
            return Ok(());
        }

        Err(AggregateError::new(errors).into())
    }
}

async fn work(worker_id: usize, queue: Queue, errors: Errors) -> usize {
    debug!(worker_id, "worker: starting");

    loop {
        let job = match queue.lock().await.pop_front() {
            Some(job) => job,
            None => break,
        };

        debug!(worker_id, "worker: starting task");

        let error = match tokio::spawn(job).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) => Some(Error::TaskError(format!("job aborted: {}", e))),
        };

        if let Some(e) = error {
            warn!(worker_id, error = %e, "worker group: received error");
            errors.lock().await.push(e);
        }

        debug!(worker_id, "worker: completed task");
    }

    debug!(worker_id, "worker: completed");

    worker_id
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn empty_group_succeeds() {
        assert!(WorkerGroup::new().run(4).await.is_ok());
    }

    #[tokio::test]
    async fn every_job_runs_once_and_errors_are_kept() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut group = WorkerGroup::new();

        for i in 0..10 {
            let runs = runs.clone();
            group.add(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                if i % 4 == 0 {
                    return Err(Error::TaskError(format!("job {}", i)));
                }
                Ok(())
            });
        }

        let result = group.run(3).await;

        assert_eq!(runs.load(Ordering::SeqCst), 10);

        match result {
            Err(Error::Aggregate(errors)) => {
                assert_eq!(errors.len(), 3);
                let message = errors.to_string();
                for i in [0, 4, 8] {
                    assert!(message.contains(&format!("job {}", i)));
                }
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut group = WorkerGroup::new();

        for _ in 0..12 {
            let active = active.clone();
            let peak = peak.clone();
            group.add(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        group.run(3).await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn panicking_job_is_reported() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut group = WorkerGroup::new();

        group.add(async { panic!("boom") });
        for _ in 0..3 {
            let runs = runs.clone();
            group.add(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let result = group.run(1).await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(Error::Aggregate(ref e)) if e.len() == 1));
    }

    #[tokio::test]
    async fn cancelled_run_lets_dispatched_jobs_finish() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut group = WorkerGroup::new();

        for _ in 0..4 {
            let done = done.clone();
            group.add(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let result =
            tokio::time::timeout(Duration::from_millis(10), group.run(4)).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }
}
