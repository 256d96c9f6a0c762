//! Bounded-concurrency dispatch of prompt batches over a shared key pool.
//!
//! [`Dispatcher::run`] drives every pending task to a terminal [`Outcome`]:
//!
//! 1. ids the [`ResultSink`] already holds are skipped, so an interrupted
//!    run picks up where it left off
//! 2. the rest go through a fixed-width worker set, each worker holding at
//!    most one credential from the pool at a time
//! 3. completion errors are classified: rate limits and dead keys rotate the
//!    credential without costing the task anything, transient faults burn one
//!    of `max_retries` attempts
//! 4. each outcome is appended to the sink as it lands, null for failures
//!
//! A panicking task is contained and recorded as a permanent failure. The one
//! fatal condition is credential exhaustion: once the pool has no keys left
//! the run aborts with [`Error::Pool`], keeping whatever results were already
//! appended.

mod dispatcher;
mod error;
mod sink;
mod worker;

pub use dispatcher::{
    DEFAULT_CONCURRENCY, DEFAULT_COOLDOWN, DEFAULT_MAX_RETRIES, DispatchOptions, Dispatcher,
};
pub use error::{Error, Result};
pub use sink::{ProgressReporter, ResultSink};
pub use worker::Outcome;
