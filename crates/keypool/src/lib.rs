//! Credential pool with cooldown tracking
//!
//! Manages a set of interchangeable API keys for a rate-limited completion
//! service. Every live key sits in exactly one of three buckets: available,
//! in use (checked out by exactly one worker), or cooling down after a
//! rate-limit signal. Quota-exhausted keys are removed for good.
//!
//! Key lifecycle:
//! 1. Config supplies the key set → all keys start `available`
//! 2. Worker calls `checkout()` → uniform-random key moves to `in_use`
//! 3. Request succeeds → `release()` moves it back to `available`
//! 4. Remote rate-limits the key → `cool_down()` parks it until the window
//!    elapses; expiry is swept lazily on the next checkout
//! 5. Remote reports quota exhausted → `remove_permanently()` drops it; once
//!    the last key is gone, `checkout()` fails with `PoolExhausted`

mod error;
mod pool;

pub use error::{Error, Result};
pub use pool::{KeyPool, PoolCounts};
