//! Extraction engine orchestration.
//!
//! One [`Engine::run`] is a single bounded pass:
//! load checkpoint → build query → connect → open cursor → read/dispatch
//! loop → drain → close cursor → save checkpoint. The in-memory checkpoint
//! advances to `max(current, record.timestamp)` when a record is *read*,
//! not when its callback completes, and is persisted once at the end of the
//! run on every exit path that got past checkpoint load.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use skimmer_state::{CheckpointStore, FileCheckpointStore};

use crate::config::RunConfig;
use crate::dispatch::Dispatcher;
use crate::error::RunError;
use crate::processor::Processor;
use crate::shutdown::ShutdownCoordinator;
use crate::source::{CursorSource, QueryBuilder, Record, RecordCursor, SortOrder};

/// How a run ended, for runs that ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The cursor was read to exhaustion.
    Completed,
    /// The abort signal stopped reading before exhaustion; everything
    /// already submitted was still drained.
    Aborted,
}

/// Result of a clean extraction run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Records read off the cursor (read, not necessarily processed
    /// successfully).
    pub records_read: u64,
    /// Callback failures observed; non-zero means the abort signal fired
    /// mid-run.
    pub processing_failures: u64,
    /// Final in-memory checkpoint, equal to what was persisted.
    pub checkpoint: DateTime<Utc>,
    pub duration_secs: f64,
}

/// Checkpointed extraction engine.
///
/// Generic over the caller's [`CursorSource`], [`QueryBuilder`], and
/// [`Processor`]; see the crate docs for the run lifecycle.
pub struct Engine<S, B, P>
where
    S: CursorSource,
    B: QueryBuilder<S::Query>,
    P: Processor<S::Record>,
{
    config: RunConfig,
    source: S,
    query_builder: B,
    processor: Arc<P>,
    store: Option<Arc<dyn CheckpointStore>>,
    shutdown: ShutdownCoordinator,
}

impl<S, B, P> Engine<S, B, P>
where
    S: CursorSource,
    B: QueryBuilder<S::Query>,
    P: Processor<S::Record>,
{
    /// Build an engine, validating the configuration.
    ///
    /// A checkpoint path in the configuration wires up a
    /// [`FileCheckpointStore`]; none (or an empty path) disables
    /// persistence.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Config`] when the configuration is invalid; the
    /// run never starts.
    pub fn new(
        config: RunConfig,
        source: S,
        query_builder: B,
        processor: P,
    ) -> Result<Self, RunError> {
        config.validate()?;
        let store = config
            .checkpoint_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
            .map(|path| Arc::new(FileCheckpointStore::new(path)) as Arc<dyn CheckpointStore>);
        let shutdown = ShutdownCoordinator::new(config.grace_period);
        Ok(Self {
            config,
            source,
            query_builder,
            processor: Arc::new(processor),
            store,
            shutdown,
        })
    }

    /// Replace the checkpoint store (e.g. an in-memory store in tests).
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the shutdown coordinator, e.g. to share one across runs.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownCoordinator) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// The coordinator driving this run's shutdown sequence. Clone it to
    /// trigger shutdown externally or to spawn the signal listener.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Execute one extraction run.
    ///
    /// # Errors
    ///
    /// See [`RunError`]; only callback failures are contained (the run
    /// still drains, saves its checkpoint, and returns `Ok`).
    pub async fn run(mut self) -> Result<RunReport, RunError> {
        let run_started = Instant::now();

        let mut checkpoint = match &self.store {
            Some(store) => store.load()?,
            None => DateTime::<Utc>::UNIX_EPOCH,
        };
        tracing::info!(
            database = %self.config.database,
            collection = %self.config.collection,
            workers = self.config.workers,
            checkpoint = %checkpoint.to_rfc3339(),
            "Starting extraction run"
        );

        self.source.connect().await.map_err(RunError::Connect)?;

        let query = self.query_builder.build(checkpoint);
        let mut cursor = self
            .source
            .open(query, SortOrder::Ascending)
            .await
            .map_err(RunError::Query)?;
        tracing::info!("Cursor opened, reading records");

        let mut dispatcher = Dispatcher::new(
            self.config.workers,
            self.processor.clone() as Arc<dyn Processor<S::Record>>,
            self.shutdown.clone(),
        );

        let mut records_read: u64 = 0;
        let mut outcome = RunOutcome::Completed;
        let mut fatal: Option<RunError> = None;
        let mut gave_up_mid_submit = false;

        loop {
            if self.shutdown.is_aborted() {
                outcome = RunOutcome::Aborted;
                tracing::info!(records_read, "Abort observed, cleaning up");
                break;
            }
            match cursor.try_next().await {
                Ok(Some(record)) => {
                    let ts = record.timestamp();
                    if ts > checkpoint {
                        checkpoint = ts;
                    }
                    records_read += 1;
                    match dispatcher.submit(record).await {
                        Ok(true) => {}
                        Ok(false) => {
                            outcome = RunOutcome::Aborted;
                            gave_up_mid_submit = true;
                            break;
                        }
                        Err(err) => {
                            fatal = Some(err);
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    fatal = Some(RunError::Read(err));
                    break;
                }
            }
        }

        let abandoned = dispatcher.drain().await;
        if abandoned > 0 {
            tracing::warn!(abandoned, "Grace period expired, abandoning in-flight workers");
        }

        if let Err(err) = cursor.close().await {
            tracing::warn!("Cursor close failed: {err:#}");
        }

        if let Some(store) = &self.store {
            if let Err(err) = store.save(checkpoint) {
                if fatal.is_none() {
                    fatal = Some(RunError::Checkpoint(err));
                } else {
                    tracing::warn!("Checkpoint save failed: {err}");
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        if abandoned > 0 || gave_up_mid_submit {
            return Err(RunError::GraceExpired { abandoned });
        }

        let report = RunReport {
            outcome,
            records_read,
            processing_failures: dispatcher.failures(),
            checkpoint,
            duration_secs: run_started.elapsed().as_secs_f64(),
        };
        tracing::info!(
            outcome = ?report.outcome,
            records_read = report.records_read,
            failures = report.processing_failures,
            checkpoint = %report.checkpoint.to_rfc3339(),
            duration_secs = report.duration_secs,
            "Extraction run finished"
        );
        Ok(report)
    }
}
