//! Bounded-concurrency worker dispatcher.
//!
//! A semaphore with one permit per worker slot bounds how many processing
//! callbacks run at once; each worker task holds its owned permit for the
//! whole callback. Workers are tracked in a `JoinSet` so the drain can wait
//! for every submitted record, including ones submitted before an abort was
//! observed. The callback runs on `spawn_blocking` since it is a plain
//! synchronous function that may block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout_at;

use crate::error::RunError;
use crate::processor::Processor;
use crate::shutdown::ShutdownCoordinator;
use crate::source::Record;

pub(crate) struct Dispatcher<R: Record> {
    limiter: Arc<Semaphore>,
    workers: JoinSet<()>,
    processor: Arc<dyn Processor<R>>,
    shutdown: ShutdownCoordinator,
    failures: Arc<AtomicU64>,
}

impl<R: Record> Dispatcher<R> {
    pub(crate) fn new(
        concurrency: usize,
        processor: Arc<dyn Processor<R>>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(concurrency)),
            workers: JoinSet::new(),
            processor,
            shutdown,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Submit one record to a worker, waiting for a slot while the pool is
    /// saturated.
    ///
    /// Returns `Ok(false)` when the grace deadline expired before a slot
    /// freed: the record is not dispatched and the caller must stop
    /// reading. A worker-error abort never interrupts the wait; the record
    /// is dispatched once a slot frees and the abort is observed on the
    /// next iteration.
    pub(crate) async fn submit(&mut self, record: R) -> Result<bool, RunError> {
        let acquired = tokio::select! {
            acquired = self.limiter.clone().acquire_owned() => acquired,
            () = self.shutdown.signalled() => {
                // Deadline is recorded before the signal token fires.
                let deadline = self.shutdown.deadline().unwrap_or_else(Instant::now);
                match timeout_at(deadline.into(), self.limiter.clone().acquire_owned()).await {
                    Ok(acquired) => acquired,
                    Err(_) => {
                        tracing::warn!(
                            timestamp = %record.timestamp(),
                            "Grace period expired waiting for a worker slot, record not dispatched"
                        );
                        return Ok(false);
                    }
                }
            }
        };
        let permit = acquired
            .map_err(|err| RunError::Internal(anyhow::anyhow!("worker limiter closed: {err}")))?;

        let processor = Arc::clone(&self.processor);
        let shutdown = self.shutdown.clone();
        let failures = Arc::clone(&self.failures);
        let timestamp = record.timestamp();
        self.workers.spawn(async move {
            let _permit = permit;
            match tokio::task::spawn_blocking(move || processor.process(record)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        timestamp = %timestamp,
                        "Record processing failed, aborting the read loop: {err:#}"
                    );
                    shutdown.abort();
                }
                Err(join_err) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        timestamp = %timestamp,
                        "Record processing panicked: {join_err}"
                    );
                    shutdown.abort();
                }
            }
        });
        Ok(true)
    }

    /// Wait for every submitted worker to complete.
    ///
    /// Once a termination signal has fixed a grace deadline the wait is
    /// bounded by it; on expiry the remaining workers are abandoned and
    /// their count returned. Without a signal the drain is unbounded.
    pub(crate) async fn drain(&mut self) -> usize {
        loop {
            if let Some(deadline) = self.shutdown.deadline() {
                return match timeout_at(deadline.into(), join_all(&mut self.workers)).await {
                    Ok(()) => 0,
                    Err(_) => {
                        let abandoned = self.workers.len();
                        self.workers.abort_all();
                        abandoned
                    }
                };
            }
            tokio::select! {
                joined = self.workers.join_next() => match joined {
                    Some(result) => log_join(result),
                    None => return 0,
                },
                // A signal mid-drain bounds the rest of the drain.
                () = self.shutdown.signalled() => {}
            }
        }
    }

    /// Number of callback failures (including panics) observed so far.
    pub(crate) fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

async fn join_all(workers: &mut JoinSet<()>) {
    while let Some(result) = workers.join_next().await {
        log_join(result);
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            tracing::error!("Worker task panicked: {err}");
        }
    }
}
