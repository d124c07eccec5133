//! End-to-end engine scenarios against a scripted in-memory cursor source.
//!
//! The scripted source filters its records by the query timestamp the same
//! way a real event store would, so checkpoint resumption can be exercised
//! by running twice against the same record set.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use skimmer_engine::{
    CursorSource, Engine, Record, RecordCursor, RunConfig, RunError, RunOutcome,
    ShutdownCoordinator, SortOrder,
};
use skimmer_state::{CheckpointStore, MemoryCheckpointStore, StateError};

#[derive(Debug, Clone)]
struct Event {
    ts: DateTime<Utc>,
}

impl Record for Event {
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn events(secs: impl IntoIterator<Item = i64>) -> Vec<Event> {
    secs.into_iter().map(|s| Event { ts: ts(s) }).collect()
}

/// Observation points shared between a scripted source and the test body.
#[derive(Clone, Default)]
struct Probes {
    connected: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    /// Set by the cursor just before it reports end of stream.
    eos_reached: Arc<AtomicBool>,
}

struct ScriptedSource {
    records: Vec<Event>,
    fail_connect: bool,
    fail_open: bool,
    /// `try_next` fails after this many records have been yielded.
    fail_read_after: Option<usize>,
    /// Trigger a shutdown signal after this many records have been yielded.
    signal_after: Option<(usize, ShutdownCoordinator)>,
    probes: Probes,
}

impl ScriptedSource {
    fn new(records: Vec<Event>) -> (Self, Probes) {
        let probes = Probes::default();
        (
            Self {
                records,
                fail_connect: false,
                fail_open: false,
                fail_read_after: None,
                signal_after: None,
                probes: probes.clone(),
            },
            probes,
        )
    }
}

struct ScriptedCursor {
    records: std::vec::IntoIter<Event>,
    yielded: usize,
    fail_read_after: Option<usize>,
    signal_after: Option<(usize, ShutdownCoordinator)>,
    probes: Probes,
}

#[async_trait]
impl CursorSource for ScriptedSource {
    type Query = DateTime<Utc>;
    type Record = Event;
    type Cursor = ScriptedCursor;

    async fn connect(&mut self) -> anyhow::Result<()> {
        if self.fail_connect {
            anyhow::bail!("event store unreachable");
        }
        self.probes.connected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open(
        &mut self,
        query: DateTime<Utc>,
        order: SortOrder,
    ) -> anyhow::Result<ScriptedCursor> {
        assert_eq!(order, SortOrder::Ascending);
        if self.fail_open {
            anyhow::bail!("query rejected");
        }
        self.probes.opened.fetch_add(1, Ordering::SeqCst);
        let matching: Vec<Event> = self
            .records
            .iter()
            .filter(|event| event.ts > query)
            .cloned()
            .collect();
        Ok(ScriptedCursor {
            records: matching.into_iter(),
            yielded: 0,
            fail_read_after: self.fail_read_after,
            signal_after: self.signal_after.clone(),
            probes: self.probes.clone(),
        })
    }
}

#[async_trait]
impl RecordCursor for ScriptedCursor {
    type Record = Event;

    async fn try_next(&mut self) -> anyhow::Result<Option<Event>> {
        if self.fail_read_after == Some(self.yielded) {
            anyhow::bail!("failed to decode record");
        }
        match self.records.next() {
            Some(event) => {
                self.yielded += 1;
                if let Some((after, shutdown)) = &self.signal_after {
                    if self.yielded == *after {
                        shutdown.signal();
                    }
                }
                Ok(Some(event))
            }
            None => {
                self.probes.eos_reached.store(true, Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.probes.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config(workers: usize) -> RunConfig {
    RunConfig {
        source_uri: "mongodb://localhost:27017".to_string(),
        database: "events".to_string(),
        collection: "raw".to_string(),
        workers,
        checkpoint_path: None,
        grace_period: Duration::from_secs(5),
    }
}

fn ok_processor() -> impl Fn(Event) -> anyhow::Result<()> + Send + Sync + 'static {
    |_| Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn successful_run_persists_last_timestamp() {
    let (source, probes) = ScriptedSource::new(events(1..=5));
    let store = Arc::new(MemoryCheckpointStore::new());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    let engine = Engine::new(
        config(2),
        source,
        |since: DateTime<Utc>| since,
        move |event: Event| {
            seen2.lock().unwrap().push(event.ts);
            Ok(())
        },
    )
    .unwrap()
    .with_checkpoint_store(store.clone() as Arc<dyn CheckpointStore>);

    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.records_read, 5);
    assert_eq!(report.processing_failures, 0);
    assert_eq!(report.checkpoint, ts(5));
    assert_eq!(store.current(), Some(ts(5)));
    assert_eq!(seen.lock().unwrap().len(), 5);
    assert_eq!(probes.connected.load(Ordering::SeqCst), 1);
    assert_eq!(probes.opened.load(Ordering::SeqCst), 1);
    assert_eq!(probes.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rerun_with_no_new_records_processes_nothing() {
    let store = Arc::new(MemoryCheckpointStore::new());

    let first = Engine::new(
        config(2),
        ScriptedSource::new(events(1..=3)).0,
        |since: DateTime<Utc>| since,
        ok_processor(),
    )
    .unwrap()
    .with_checkpoint_store(store.clone() as Arc<dyn CheckpointStore>);
    first.run().await.unwrap();
    assert_eq!(store.current(), Some(ts(3)));

    // Same record set, rebuilt query: nothing is newer than the checkpoint.
    let queries = Arc::new(Mutex::new(Vec::new()));
    let queries2 = Arc::clone(&queries);
    let second = Engine::new(
        config(2),
        ScriptedSource::new(events(1..=3)).0,
        move |since: DateTime<Utc>| {
            queries2.lock().unwrap().push(since);
            since
        },
        ok_processor(),
    )
    .unwrap()
    .with_checkpoint_store(store.clone() as Arc<dyn CheckpointStore>);
    let report = second.run().await.unwrap();

    assert_eq!(&*queries.lock().unwrap(), &[ts(3)]);
    assert_eq!(report.records_read, 0);
    assert_eq!(report.checkpoint, ts(3));
    assert_eq!(store.current(), Some(ts(3)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_checkpoint_file_means_full_history() {
    let dir = tempfile::tempdir().unwrap();
    let mut run_config = config(1);
    run_config.checkpoint_path = Some(dir.path().join("last_run"));

    let queries = Arc::new(Mutex::new(Vec::new()));
    let queries2 = Arc::clone(&queries);
    let engine = Engine::new(
        run_config,
        ScriptedSource::new(events(1..=2)).0,
        move |since: DateTime<Utc>| {
            queries2.lock().unwrap().push(since);
            since
        },
        ok_processor(),
    )
    .unwrap();

    let report = engine.run().await.unwrap();
    assert_eq!(&*queries.lock().unwrap(), &[DateTime::<Utc>::UNIX_EPOCH]);
    assert_eq!(report.records_read, 2);
    assert!(dir.path().join("last_run").exists());
}

#[tokio::test]
async fn garbage_checkpoint_file_fails_before_any_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("last_run");
    std::fs::write(&path, "garbage").unwrap();

    let mut run_config = config(1);
    run_config.checkpoint_path = Some(path.clone());

    let (source, probes) = ScriptedSource::new(events(1..=5));
    let engine = Engine::new(run_config, source, |since: DateTime<Utc>| since, ok_processor())
        .unwrap();

    let err = engine.run().await.unwrap_err();
    assert!(matches!(
        err,
        RunError::Checkpoint(StateError::Format { .. })
    ));
    assert!(err.to_string().contains("last_run"), "got: {err}");
    assert_eq!(probes.connected.load(Ordering::SeqCst), 0);
    assert_eq!(probes.opened.load(Ordering::SeqCst), 0);
}

/// Timestamps T1 < T2 < T3 < T4, pool size 2, only the T2 callback fails —
/// and only after the whole stream has been read, so the abort fires during
/// the drain. All four records are read and attempted, the drain completes,
/// and the persisted checkpoint is T4, not T2.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mid_stream_callback_failure_still_drains_and_checkpoints() {
    let (source, probes) = ScriptedSource::new(events(1..=4));
    let store = Arc::new(MemoryCheckpointStore::new());

    let attempts = Arc::new(Mutex::new(Vec::new()));
    let attempts2 = Arc::clone(&attempts);
    let eos = Arc::clone(&probes.eos_reached);
    let processor = move |event: Event| {
        attempts2.lock().unwrap().push(event.ts);
        if event.ts == ts(2) {
            let waited = std::time::Instant::now();
            while !eos.load(Ordering::SeqCst) {
                assert!(waited.elapsed() < Duration::from_secs(2), "stream never ended");
                std::thread::sleep(Duration::from_millis(1));
            }
            anyhow::bail!("downstream rejected record");
        }
        Ok(())
    };

    let engine = Engine::new(config(2), source, |since: DateTime<Utc>| since, processor)
        .unwrap()
        .with_checkpoint_store(store.clone() as Arc<dyn CheckpointStore>);
    let report = engine.run().await.unwrap();

    assert_eq!(report.records_read, 4);
    assert_eq!(report.processing_failures, 1);
    assert_eq!(report.checkpoint, ts(4));
    assert_eq!(store.current(), Some(ts(4)));
    let mut attempted = attempts.lock().unwrap().clone();
    attempted.sort();
    assert_eq!(attempted, vec![ts(1), ts(2), ts(3), ts(4)]);
    assert_eq!(probes.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn signal_stops_reading_and_still_saves_checkpoint() {
    let (mut source, probes) = ScriptedSource::new(events(1..=10));
    let store = Arc::new(MemoryCheckpointStore::new());

    let shutdown = ShutdownCoordinator::new(Duration::from_secs(5));
    source.signal_after = Some((2, shutdown.clone()));

    let engine = Engine::new(config(2), source, |since: DateTime<Utc>| since, ok_processor())
        .unwrap()
        .with_shutdown(shutdown)
        .with_checkpoint_store(store.clone() as Arc<dyn CheckpointStore>);
    let report = engine.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.records_read, 2);
    assert_eq!(report.checkpoint, ts(2));
    assert_eq!(store.current(), Some(ts(2)));
    assert_eq!(probes.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn grace_expiry_abandons_workers_and_saves_checkpoint() {
    let (mut source, _probes) = ScriptedSource::new(events(1..=3));
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut run_config = config(1);
    run_config.grace_period = Duration::from_millis(100);

    let processor = |_: Event| {
        std::thread::sleep(Duration::from_millis(800));
        Ok(())
    };

    let shutdown = ShutdownCoordinator::new(Duration::from_millis(100));
    source.signal_after = Some((1, shutdown.clone()));
    let engine = Engine::new(run_config, source, |s: DateTime<Utc>| s, processor)
        .unwrap()
        .with_shutdown(shutdown)
        .with_checkpoint_store(store.clone() as Arc<dyn CheckpointStore>);

    let started = std::time::Instant::now();
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err, RunError::GraceExpired { abandoned: 1 }));
    assert!(
        started.elapsed() < Duration::from_millis(600),
        "forced path should not wait for the worker"
    );
    assert_eq!(store.current(), Some(ts(1)));
}

#[tokio::test]
async fn fatal_read_error_saves_progress_and_closes_cursor() {
    let (mut source, probes) = ScriptedSource::new(events(1..=5));
    source.fail_read_after = Some(2);
    let store = Arc::new(MemoryCheckpointStore::new());

    let engine = Engine::new(config(2), source, |since: DateTime<Utc>| since, ok_processor())
        .unwrap()
        .with_checkpoint_store(store.clone() as Arc<dyn CheckpointStore>);
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err, RunError::Read(_)));
    assert_eq!(store.current(), Some(ts(2)));
    assert_eq!(probes.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connect_failure_is_fatal() {
    let (mut source, probes) = ScriptedSource::new(events(1..=5));
    source.fail_connect = true;

    let engine = Engine::new(config(1), source, |since: DateTime<Utc>| since, ok_processor())
        .unwrap();
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err, RunError::Connect(_)));
    assert_eq!(probes.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cursor_open_failure_is_fatal() {
    let (mut source, probes) = ScriptedSource::new(events(1..=5));
    source.fail_open = true;

    let engine = Engine::new(config(1), source, |since: DateTime<Utc>| since, ok_processor())
        .unwrap();
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err, RunError::Query(_)));
    assert_eq!(probes.closed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_worker_count_fails_fast() {
    let (source, probes) = ScriptedSource::new(events(1..=5));
    let result = Engine::new(config(0), source, |since: DateTime<Utc>| since, ok_processor());

    assert!(matches!(result, Err(RunError::Config(_))));
    assert_eq!(probes.connected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_checkpoint_path_disables_persistence() {
    let mut run_config = config(1);
    run_config.checkpoint_path = Some(std::path::PathBuf::new());

    let engine = Engine::new(
        run_config,
        ScriptedSource::new(events(1..=2)).0,
        |since: DateTime<Utc>| since,
        ok_processor(),
    )
    .unwrap();
    let report = engine.run().await.unwrap();
    assert_eq!(report.records_read, 2);
    assert_eq!(report.checkpoint, ts(2));
}
