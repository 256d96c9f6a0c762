use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

/// Destination for per-task results.
///
/// Appends arrive in completion order, not id order. Implementations must
/// surface previously recorded ids so an interrupted batch can resume without
/// repeating work; a null record does not count as recorded.
pub trait ResultSink: Send + Sync {
    /// Ids that already have a completion on record.
    fn existing_ids<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = common::Result<BTreeSet<u64>>> + Send + 'a>>;

    /// Record one result. `text` is `None` when the task failed for good.
    fn append<'a>(
        &'a self,
        id: u64,
        text: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = common::Result<()>> + Send + 'a>>;
}

/// Consumer of completion ticks, one call per finished task.
pub trait ProgressReporter: Send + Sync {
    fn advance(&self, n: u64);
}
