//! Shared types for the promptpool workspace

mod error;
mod key;

pub use error::{Error, Result};
pub use key::ApiKey;
