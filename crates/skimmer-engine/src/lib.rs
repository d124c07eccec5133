//! Checkpointed extraction engine.
//!
//! A run loads the last-seen timestamp from a [`CheckpointStore`], asks the
//! caller's [`QueryBuilder`] for a store-specific filter, opens one
//! ascending-by-timestamp cursor on the caller's [`CursorSource`], and hands
//! each record to the caller's [`Processor`] with bounded parallelism. The
//! in-memory checkpoint advances as records are *read*, and is persisted
//! once at the end of the run on every exit path, so a restarted run resumes
//! where the previous one left off.
//!
//! Shutdown is cooperative: a termination signal (or a callback failure)
//! stops further reads, in-flight workers are drained, and the checkpoint is
//! saved. After a signal the drain is bounded by a grace period; on expiry
//! remaining workers are abandoned and [`RunError::GraceExpired`] is
//! returned so the caller can decide to exit non-zero.
//!
//! ```ignore
//! use skimmer_engine::{Engine, RunConfig};
//!
//! let config = RunConfig {
//!     source_uri: "mongodb://localhost:27017".into(),
//!     database: "events".into(),
//!     collection: "raw".into(),
//!     workers: 8,
//!     checkpoint_path: Some("/var/lib/skimmer/last_run".into()),
//!     grace_period: std::time::Duration::from_secs(5),
//! };
//! let engine = Engine::new(config, source, |since| newer_than(since), process_record)?;
//! engine.shutdown().spawn_signal_listener();
//! let report = engine.run().await?;
//! ```
//!
//! [`CheckpointStore`]: skimmer_state::CheckpointStore

pub mod config;
mod dispatch;
pub mod engine;
pub mod error;
pub mod processor;
pub mod shutdown;
pub mod source;

pub use config::RunConfig;
pub use engine::{Engine, RunOutcome, RunReport};
pub use error::{ConfigError, RunError};
pub use processor::Processor;
pub use shutdown::{ShutdownCoordinator, DEFAULT_GRACE_PERIOD};
pub use source::{CursorSource, QueryBuilder, Record, RecordCursor, SortOrder};
