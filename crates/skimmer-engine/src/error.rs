//! Run error model.
//!
//! Every variant except `GraceExpired` maps to a phase of the run; the
//! phase determines whether the failure could have touched any record.
//! Callback failures are not represented here at all: they abort further
//! reads but the run still drains, saves its checkpoint, and reports the
//! failure count in [`RunReport`](crate::RunReport).

use skimmer_state::StateError;

/// Invalid run configuration, reported before anything else happens.
///
/// Collects every validation failure found, one message per problem.
#[derive(Debug, thiserror::Error)]
#[error("invalid run configuration: {}", .0.join("; "))]
pub struct ConfigError(pub(crate) Vec<String>);

impl ConfigError {
    /// The individual validation failures.
    #[must_use]
    pub fn problems(&self) -> &[String] {
        &self.0
    }
}

/// Errors that end an extraction run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Invalid configuration; the run never starts.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Checkpoint load failed before any record was read, or the final
    /// save failed.
    #[error(transparent)]
    Checkpoint(#[from] StateError),

    /// The event store could not be reached. No retry; callers re-invoke
    /// the whole run.
    #[error("failed to connect to the event store: {0:#}")]
    Connect(anyhow::Error),

    /// The cursor could not be opened.
    #[error("failed to open a cursor: {0:#}")]
    Query(anyhow::Error),

    /// Reading or decoding the next record failed. Fatal for the whole
    /// run; there is no per-record skip.
    #[error("cursor read failed: {0:#}")]
    Read(anyhow::Error),

    /// The shutdown grace period expired before the drain finished. The
    /// checkpoint was still saved; terminating the process is the
    /// caller's decision.
    #[error("grace period expired with {abandoned} workers still outstanding")]
    GraceExpired {
        /// Workers abandoned mid-flight at the deadline.
        abandoned: usize,
    },

    /// Engine-internal failure.
    #[error("internal engine error: {0:#}")]
    Internal(anyhow::Error),
}
