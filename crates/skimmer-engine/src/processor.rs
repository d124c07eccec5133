//! Per-record processing callback contract.

/// User-supplied callback invoked once per record with bounded parallelism.
///
/// Runs on a blocking worker thread, so implementations may block. An error
/// stops the engine from reading further records, but every record already
/// submitted still runs to completion.
pub trait Processor<R>: Send + Sync + 'static {
    fn process(&self, record: R) -> anyhow::Result<()>;
}

impl<R, F> Processor<R> for F
where
    F: Fn(R) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn process(&self, record: R) -> anyhow::Result<()> {
        self(record)
    }
}
