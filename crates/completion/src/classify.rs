//! Failure classification for completion-service responses
//!
//! Distinguishes key-local conditions (per-minute rate limit, spent quota)
//! from task-local ones (prompt too large) and transient service trouble.
//! The retry state machine keys every rotate/retry/abort decision off
//! `ErrorClass`; nothing downstream looks at wire details.

/// Retry classification of one failed completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Key-local and temporary. Cool the key down and rotate; the retry is
    /// free (the key is at fault, not the task).
    RateLimited,
    /// Key-local and permanent: quota or billing spent, or the key rejected
    /// outright. Remove the key and rotate; the retry is free.
    QuotaExhausted,
    /// Task-local and permanent: the prompt does not fit the model. No
    /// retry can help.
    ContextTooLong,
    /// Worth another attempt on the same key; counts against the task's
    /// retry budget.
    Transient,
    /// Unrecognized. Handled like `Transient` but logged louder so the
    /// pattern tables can grow.
    Unknown,
}

impl ErrorClass {
    /// Classification label for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::QuotaExhausted => "quota_exhausted",
            ErrorClass::ContextTooLong => "context_too_long",
            ErrorClass::Transient => "transient",
            ErrorClass::Unknown => "unknown",
        }
    }
}

/// Spent-quota phrases in 429 bodies.
///
/// These mean the key's budget is gone for good, not that it is briefly
/// over a per-minute limit.
const QUOTA_PATTERNS: &[&str] = &[
    "exceeded your current quota",
    "insufficient_quota",
    "billing hard limit",
    "account is not active",
    "account deactivated",
];

/// Prompt-overflow phrases in 400/413 bodies.
const CONTEXT_PATTERNS: &[&str] = &[
    "maximum context length",
    "context_length_exceeded",
    "string too long",
];

/// Classify a 429 response body: spent quota versus plain rate limiting.
///
/// Checks the body for known spent-quota phrases. Any match returns
/// `QuotaExhausted` (drop the key); otherwise `RateLimited` (cool the key
/// down and come back after the window).
pub fn classify_429(body: &str) -> ErrorClass {
    let lower = body.to_lowercase();
    for pattern in QUOTA_PATTERNS {
        if lower.contains(pattern) {
            return ErrorClass::QuotaExhausted;
        }
    }
    ErrorClass::RateLimited
}

/// Classify an error response by HTTP status and body.
///
/// 429 splits on the body via `classify_429`. 401/403 mean the key itself
/// is unusable and get the spent-quota treatment (remove and rotate).
/// 400/413 bodies are checked for context overflow. 408/5xx are transient;
/// anything else is unknown and retried conservatively.
pub fn classify_status(status: u16, body: &str) -> ErrorClass {
    match status {
        429 => classify_429(body),
        401 | 403 => ErrorClass::QuotaExhausted,
        400 | 413 => {
            let lower = body.to_lowercase();
            if CONTEXT_PATTERNS.iter().any(|p| lower.contains(p)) {
                ErrorClass::ContextTooLong
            } else {
                ErrorClass::Unknown
            }
        }
        408 | 500 | 502 | 503 | 504 => ErrorClass::Transient,
        _ => ErrorClass::Unknown,
    }
}
