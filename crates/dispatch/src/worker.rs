use std::panic::{AssertUnwindSafe, resume_unwind};

use completion::{CompletionClient, ErrorClass, Prompt};
use futures_util::FutureExt;
use keypool::KeyPool;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::DispatchOptions;
use crate::error::Result;

/// Terminal state of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The model produced a completion.
    Success(String),
    /// Retrying cannot help, for example because the prompt exceeds the
    /// model's context window or the task panicked. Carries the reason.
    PermanentFailure(String),
    /// The per-task attempt budget ran out on transient errors.
    RetriesExhausted,
}

impl Outcome {
    /// Completion text, if there is one. Failures record a null.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Success(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Drive one task to a terminal outcome.
///
/// Holds at most one credential at any moment. The error class decides what
/// happens to that credential and whether the attempt counted:
///
/// * rate limit: the credential cools down and a fresh one is checked out;
///   the attempt is free
/// * dead key (quota or auth): the credential is removed for good; the
///   re-checkout is free as well
/// * context overflow: the credential goes back untouched and the task fails
///   permanently
/// * transient or unknown: the worker keeps the credential and burns one of
///   `max_retries` attempts
///
/// A panic inside the client releases the credential before the unwind
/// continues. The only error is [`keypool::Error::PoolExhausted`], surfaced
/// when a checkout finds no live credentials.
#[instrument(skip_all, fields(id))]
pub(crate) async fn run_task(
    id: u64,
    prompt: &Prompt,
    client: &dyn CompletionClient,
    pool: &KeyPool,
    opts: &DispatchOptions,
) -> Result<Outcome> {
    let budget = opts.max_retries.max(1);
    let mut attempts: u32 = 0;
    let mut held = None;

    loop {
        let key = match held.take() {
            Some(key) => key,
            None => pool.checkout().await?,
        };

        // A panicking client must not strand the checked-out key.
        let result = match AssertUnwindSafe(client.complete(&key, prompt))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                pool.release(&key).await;
                resume_unwind(payload);
            }
        };

        match result {
            Ok(text) => {
                pool.release(&key).await;
                debug!(attempts, "task complete");
                return Ok(Outcome::Success(text));
            }
            Err(err) => match err.class() {
                ErrorClass::RateLimited => {
                    info!(key = %key, "rate limited, rotating credential");
                    pool.cool_down(&key, opts.cooldown).await;
                }
                ErrorClass::QuotaExhausted => {
                    warn!(key = %key, error = %err, "credential dead, removing it");
                    pool.remove_permanently(&key).await;
                }
                ErrorClass::ContextTooLong => {
                    pool.release(&key).await;
                    warn!(error = %err, "prompt rejected as too long");
                    return Ok(Outcome::PermanentFailure(err.to_string()));
                }
                class @ (ErrorClass::Transient | ErrorClass::Unknown) => {
                    attempts += 1;
                    if class == ErrorClass::Unknown {
                        error!(attempt = attempts, error = %err, "unclassified completion error");
                    } else {
                        debug!(attempt = attempts, error = %err, "transient error, retrying");
                    }
                    if attempts >= budget {
                        pool.release(&key).await;
                        warn!(attempts, "attempt budget exhausted");
                        return Ok(Outcome::RetriesExhausted);
                    }
                    held = Some(key);
                }
            },
        }
    }
}
