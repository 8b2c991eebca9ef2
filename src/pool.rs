//! Bounded-concurrency pool for worker processes.
//!
//! Admission is bounded by a semaphore: `submit` acquires a permit before
//! spawning, so the caller blocks while the pool is at capacity and no more
//! than the configured limit of workers are ever live at once. Draining
//! waits for every outstanding unit and aggregates failures instead of
//! raising on the first, so a failing worker never steals its siblings'
//! chance to run.

use crate::worker::TaskReport;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct WorkerPool {
    limit: usize,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<TaskReport>,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            tasks: JoinSet::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of units submitted and not yet reaped by `drain`.
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// Submit one unit of work. Blocks until a slot is free.
    pub async fn submit<F>(&mut self, work: F) -> Result<()>
    where
        F: Future<Output = TaskReport> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("worker pool semaphore closed")?;
        self.tasks.spawn(async move {
            let _permit = permit; // held until the unit finishes
            work.await
        });
        Ok(())
    }

    /// Block until every outstanding unit has terminated, collecting all
    /// reports in completion order.
    pub async fn drain(&mut self) -> Vec<TaskReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!("worker unit aborted before reporting: {e}"),
            }
        }
        reports
    }
}
