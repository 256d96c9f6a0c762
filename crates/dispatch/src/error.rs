use thiserror::Error;

/// Errors that abort a whole dispatch run.
#[derive(Debug, Error)]
pub enum Error {
    /// The credential pool ran dry mid-run.
    #[error("dispatch aborted: {0}")]
    Pool(#[from] keypool::Error),

    /// The sink could not report which ids are already recorded, so the run
    /// cannot safely decide what to skip.
    #[error("result sink unusable: {0}")]
    Sink(#[source] common::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_keeps_the_removed_count_visible() {
        let err = Error::from(keypool::Error::PoolExhausted { removed: 4 });
        assert!(err.to_string().contains("4 hit their quota"));
    }
}
