//! Pool state machine and credential checkout
//!
//! Every live key sits in exactly one bucket: `available`, `in_use`, or
//! `cooling_down { until }`. Workers check keys out and report back what the
//! remote did with them: release on success, cool down on a rate limit,
//! remove on quota exhaustion.
//!
//! Cooldown transitions happen lazily: each checkout sweeps expired entries
//! back into `available` before selecting, so no background timer runs. A
//! checkout that finds nothing available parks on a `Notify`, raced against
//! the soonest cooldown expiry.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use common::ApiKey;
use rand::RngExt;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Grace added to cooldown waits so a wakeup lands strictly after expiry.
const COOLDOWN_GRACE: Duration = Duration::from_millis(25);

/// Bucket membership snapshot, for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub available: usize,
    pub in_use: usize,
    pub cooling_down: usize,
    pub removed: usize,
}

impl PoolCounts {
    /// Keys still usable, now or after their cooldown.
    pub fn live(&self) -> usize {
        self.available + self.in_use + self.cooling_down
    }
}

/// The three buckets plus the removal tally. Bucket disjointness is the
/// core invariant; every mutation below moves a key between buckets whole.
struct PoolState {
    available: Vec<ApiKey>,
    in_use: HashSet<ApiKey>,
    cooling_down: HashMap<ApiKey, Instant>,
    removed: usize,
}

impl PoolState {
    fn live(&self) -> usize {
        self.available.len() + self.in_use.len() + self.cooling_down.len()
    }

    /// Move every cooldown entry whose window has elapsed back to available.
    /// Runs inside the checkout critical section (lazy expiry).
    fn sweep_expired(&mut self, now: Instant) -> usize {
        let mut expired = Vec::new();
        self.cooling_down.retain(|key, until| {
            if *until <= now {
                expired.push(key.clone());
                false
            } else {
                true
            }
        });
        let woken = expired.len();
        self.available.extend(expired);
        woken
    }

    fn soonest_expiry(&self) -> Option<Instant> {
        self.cooling_down.values().min().copied()
    }

    /// Snapshot without mutating: cooldown entries already past their expiry
    /// count as available, the sweep itself happens on the next checkout.
    fn counts(&self, now: Instant) -> PoolCounts {
        let expired = self
            .cooling_down
            .values()
            .filter(|until| **until <= now)
            .count();
        PoolCounts {
            available: self.available.len() + expired,
            in_use: self.in_use.len(),
            cooling_down: self.cooling_down.len() - expired,
            removed: self.removed,
        }
    }
}

/// What one checkout pass decided while holding the lock.
enum Checkout {
    Granted(ApiKey),
    Exhausted(PoolCounts),
    /// Nothing available right now. `Some(deadline)` when keys are cooling
    /// down (soonest expiry plus grace), `None` when they are merely in use
    /// and only a release or removal can change anything.
    Wait(Option<Instant>),
}

/// Key pool managing interchangeable completion-service credentials.
///
/// All bucket mutations happen under a single `Mutex<PoolState>` so
/// concurrent checkout/release/cool_down/remove calls can never observe a
/// key in two buckets or hand one key to two workers. The lock is never held
/// across an await; waiters park on `wakeup` outside the critical section.
pub struct KeyPool {
    state: Mutex<PoolState>,
    wakeup: Notify,
}

impl KeyPool {
    /// Create a pool from the configured keys. Duplicate tokens collapse to
    /// a single key; all keys start available.
    pub fn new(keys: impl IntoIterator<Item = ApiKey>) -> Self {
        let mut seen = HashSet::new();
        let available: Vec<ApiKey> = keys
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();
        info!(keys = available.len(), "key pool initialized");
        Self {
            state: Mutex::new(PoolState {
                available,
                in_use: HashSet::new(),
                cooling_down: HashMap::new(),
                removed: 0,
            }),
            wakeup: Notify::new(),
        }
    }

    /// Check out a key, suspending the caller until one is available.
    ///
    /// Selection is uniformly random among the available bucket so no key
    /// becomes the hot first choice. When nothing is available the caller
    /// sleeps until the soonest cooldown expiry (plus [`COOLDOWN_GRACE`]) or
    /// until a release/removal notification, then re-evaluates.
    ///
    /// Returns `PoolExhausted` once the live key set is empty.
    pub async fn checkout(&self) -> Result<ApiKey> {
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            // Register interest before re-checking state so a release that
            // lands between the check and the await still wakes us.
            notified.as_mut().enable();

            let decision = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let woken = state.sweep_expired(now);
                if woken > 0 {
                    debug!(keys = woken, "cooldown expired, keys available again");
                }
                if !state.available.is_empty() {
                    let idx = rand::rng().random_range(0..state.available.len());
                    let key = state.available.swap_remove(idx);
                    state.in_use.insert(key.clone());
                    Checkout::Granted(key)
                } else if state.live() == 0 {
                    Checkout::Exhausted(state.counts(now))
                } else {
                    Checkout::Wait(state.soonest_expiry().map(|at| at + COOLDOWN_GRACE))
                }
            };

            match decision {
                Checkout::Granted(key) => {
                    debug!(key = %key.label(), "key checked out");
                    return Ok(key);
                }
                Checkout::Exhausted(counts) => {
                    warn!(removed = counts.removed, "no live keys remain");
                    return Err(Error::PoolExhausted {
                        removed: counts.removed,
                    });
                }
                Checkout::Wait(Some(deadline)) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Checkout::Wait(None) => notified.await,
            }
        }
    }

    /// Return a checked-out key to the available bucket.
    ///
    /// No-op if the key was removed in the meantime, or is cooling down; a
    /// cooling key must wait out its window rather than jump straight back.
    pub async fn release(&self, key: &ApiKey) {
        let mut state = self.state.lock().await;
        if state.in_use.remove(key) {
            state.available.push(key.clone());
            debug!(key = %key.label(), "key released");
            drop(state);
            self.wakeup.notify_waiters();
        }
    }

    /// Park a key until `now + duration` after a rate-limit signal.
    ///
    /// Takes the key out of whichever bucket currently holds it. Overlapping
    /// calls for the same key keep the strictly later expiry; a shorter
    /// window never cuts an existing one short. No-op for removed keys.
    pub async fn cool_down(&self, key: &ApiKey, duration: Duration) {
        let until = Instant::now() + duration;
        let mut state = self.state.lock().await;

        let was_in_use = state.in_use.remove(key);
        let before = state.available.len();
        if !was_in_use {
            state.available.retain(|k| k != key);
        }
        let was_available = state.available.len() < before;
        if !was_in_use && !was_available && !state.cooling_down.contains_key(key) {
            // Already removed; nothing to park.
            return;
        }

        let entry = state.cooling_down.entry(key.clone()).or_insert(until);
        if until > *entry {
            *entry = until;
        }
        info!(
            key = %key.label(),
            cooldown_secs = duration.as_secs(),
            "key entering cooldown (rate limited)"
        );
        drop(state);
        // Waiters recompute their deadline against the new soonest expiry.
        self.wakeup.notify_waiters();
    }

    /// Permanently drop a key after a quota-exhaustion signal.
    ///
    /// Removes it from whichever bucket holds it; removal is irreversible for
    /// the lifetime of the pool. Idempotent. Waiters are woken so a checkout
    /// blocked on the last live key fails fast instead of hanging.
    pub async fn remove_permanently(&self, key: &ApiKey) {
        let mut state = self.state.lock().await;
        let before = state.available.len();
        state.available.retain(|k| k != key);
        let removed = state.available.len() < before
            || state.in_use.remove(key)
            || state.cooling_down.remove(key).is_some();
        if removed {
            state.removed += 1;
            warn!(
                key = %key.label(),
                live = state.live(),
                "key removed from pool (quota exhausted)"
            );
            drop(state);
            self.wakeup.notify_waiters();
        }
    }

    /// Bucket snapshot for logging and the run summary.
    pub async fn counts(&self) -> PoolCounts {
        let state = self.state.lock().await;
        state.counts(Instant::now())
    }

    /// Number of live keys across all buckets.
    pub async fn len(&self) -> usize {
        self.state.lock().await.live()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
