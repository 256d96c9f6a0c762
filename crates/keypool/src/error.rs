//! Pool error types

use thiserror::Error;

/// Pool errors
#[derive(Debug, Error)]
pub enum Error {
    /// Every key has been permanently removed. Fatal for the whole run:
    /// there is nothing left to rotate to.
    #[error("key pool exhausted: all keys removed ({removed} hit their quota)")]
    PoolExhausted { removed: usize },
}

/// Result alias for pool operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_display_includes_removed_count() {
        let err = Error::PoolExhausted { removed: 3 };
        assert_eq!(
            err.to_string(),
            "key pool exhausted: all keys removed (3 hit their quota)"
        );
    }
}
