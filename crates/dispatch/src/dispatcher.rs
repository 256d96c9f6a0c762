use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use completion::{CompletionClient, Prompt};
use futures_util::FutureExt;
use futures_util::stream::{self, StreamExt};
use keypool::{KeyPool, PoolCounts};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::sink::{ProgressReporter, ResultSink};
use crate::worker::{Outcome, run_task};

/// Workers to run when the caller does not say otherwise.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Client invocations allowed per task before it is written off.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// How long a rate-limited credential sits out.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Tuning knobs for a dispatch run.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Requested worker count. Clamped at run time so it never exceeds the
    /// number of pending tasks or live credentials.
    pub concurrency: usize,
    /// Attempt budget per task for transient errors. Clamped at run time so
    /// it is never below one.
    pub max_retries: u32,
    /// Sit-out period for a rate-limited credential.
    pub cooldown: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Runs prompt batches to completion over a shared credential pool.
pub struct Dispatcher {
    client: Arc<dyn CompletionClient>,
    pool: Arc<KeyPool>,
    opts: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        pool: Arc<KeyPool>,
        opts: DispatchOptions,
    ) -> Self {
        Self { client, pool, opts }
    }

    /// Snapshot of the credential pool, for end-of-run reporting.
    pub async fn pool_counts(&self) -> PoolCounts {
        self.pool.counts().await
    }

    /// Drive `tasks` to terminal outcomes.
    ///
    /// Ids the sink already holds are skipped. Each finished task is appended
    /// to the sink before its progress tick, so an interrupt loses at most
    /// the work in flight. A panic inside a task is contained and recorded as
    /// a permanent failure, with the credential it held back in the pool.
    ///
    /// Returns the outcome of every task dispatched in this run, keyed by id.
    /// The only error is credential exhaustion: the run aborts, in-flight
    /// tasks are cancelled, and results appended so far remain in the sink.
    pub async fn run(
        &self,
        tasks: BTreeMap<u64, Prompt>,
        sink: &dyn ResultSink,
        progress: &dyn ProgressReporter,
    ) -> Result<BTreeMap<u64, Outcome>> {
        let done = sink.existing_ids().await.map_err(Error::Sink)?;
        let todo: Vec<(u64, Prompt)> = tasks
            .into_iter()
            .filter(|(id, _)| !done.contains(id))
            .collect();

        let live_keys = self.pool.len().await;
        let effective = self.opts.concurrency.min(todo.len()).min(live_keys).max(1);

        info!(
            pending = todo.len(),
            recorded = done.len(),
            workers = effective,
            keys = live_keys,
            "dispatching batch"
        );

        let workers = todo.into_iter().map(|(id, prompt)| {
            let client = self.client.as_ref();
            let pool = self.pool.as_ref();
            let opts = &self.opts;
            async move {
                match AssertUnwindSafe(run_task(id, &prompt, client, pool, opts))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome.map(|outcome| (id, outcome)),
                    Err(payload) => {
                        let reason = panic_reason(payload);
                        error!(id, %reason, "task panicked");
                        Ok((id, Outcome::PermanentFailure(format!("task panicked: {reason}"))))
                    }
                }
            }
        });

        let mut in_flight = stream::iter(workers).buffer_unordered(effective);

        let mut outcomes = BTreeMap::new();
        while let Some(finished) = in_flight.next().await {
            let (id, outcome) = finished?;
            if let Err(err) = sink.append(id, outcome.text()).await {
                error!(id, error = %err, "failed to append result");
            }
            progress.advance(1);
            outcomes.insert(id, outcome);
        }

        Ok(outcomes)
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(reason) => *reason,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(reason) => (*reason).to_owned(),
            Err(_) => "opaque panic payload".to_owned(),
        },
    }
}
