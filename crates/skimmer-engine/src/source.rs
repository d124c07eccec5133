//! Strategy seams between the engine and the event store.
//!
//! The engine never sees a record schema or a store technology: it talks to
//! a [`CursorSource`] through an opaque `Query` built by the caller's
//! [`QueryBuilder`], and only reads one thing off each [`Record`] — its
//! timestamp.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Cursor ordering requested at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending by record timestamp. The engine always opens cursors this
    /// way; checkpoint resumption depends on it.
    Ascending,
    /// Descending by record timestamp.
    Descending,
}

/// A decoded event record.
///
/// The timestamp drives checkpoint advancement and is the ordering key the
/// cursor guarantees.
pub trait Record: Send + 'static {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Builds the store-specific filter for records newer than a checkpoint.
///
/// Invoked exactly once per run, after checkpoint load and before the
/// cursor is opened. The engine treats the result as opaque.
pub trait QueryBuilder<Q>: Send {
    fn build(&self, since: DateTime<Utc>) -> Q;
}

impl<Q, F> QueryBuilder<Q> for F
where
    F: Fn(DateTime<Utc>) -> Q + Send,
{
    fn build(&self, since: DateTime<Utc>) -> Q {
        self(since)
    }
}

/// Connection and cursor-opening contract of the event store.
///
/// The engine calls [`connect`](CursorSource::connect) once, then
/// [`open`](CursorSource::open) once. Connection teardown is the
/// implementation's concern (release on drop).
#[async_trait]
pub trait CursorSource: Send {
    /// Store-specific filter type produced by the caller's [`QueryBuilder`].
    type Query: Send + 'static;
    /// Decoded record type.
    type Record: Record;
    /// Open-cursor handle type.
    type Cursor: RecordCursor<Record = Self::Record>;

    /// Establish the event-store connection. Failure is fatal for the run;
    /// there is no retry.
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Open a cursor over records matching `query`, ordered by timestamp
    /// as requested.
    async fn open(
        &mut self,
        query: Self::Query,
        order: SortOrder,
    ) -> anyhow::Result<Self::Cursor>;
}

/// Ordered sequence of records behind an open cursor.
#[async_trait]
pub trait RecordCursor: Send {
    type Record: Record;

    /// Fetch and decode the next record; `Ok(None)` signals end of stream.
    ///
    /// Any error here — transport or decode — is fatal for the whole run;
    /// the engine does not skip individual records.
    async fn try_next(&mut self) -> anyhow::Result<Option<Self::Record>>;

    /// Release server-side cursor resources.
    async fn close(&mut self) -> anyhow::Result<()>;
}
