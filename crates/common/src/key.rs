//! Credential token wrapper

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use zeroize::Zeroize;

/// Characters of the raw token that survive into `label()`.
const LABEL_CHARS: usize = 8;

/// Owned token storage, wiped on drop.
struct Token(String);

impl Drop for Token {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A completion-service credential.
///
/// Cheap to clone (shared token storage); the raw token is zeroized when the
/// last clone drops and never appears in `Debug`/`Display` output. Log lines
/// identify a key by `label()`, a short prefix of the token.
#[derive(Clone)]
pub struct ApiKey {
    token: Arc<Token>,
    label: Arc<str>,
}

impl ApiKey {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let mut label: String = token.chars().take(LABEL_CHARS).collect();
        if token.chars().count() > LABEL_CHARS {
            label.push('…');
        }
        Self {
            token: Arc::new(Token(token)),
            label: label.into(),
        }
    }

    /// The raw token, for request authorization (use sparingly).
    pub fn expose(&self) -> &str {
        &self.token.0
    }

    /// Truncated identifier safe for log lines.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Identity is the raw token, so pool buckets treat equal tokens as one key.
impl PartialEq for ApiKey {
    fn eq(&self, other: &Self) -> bool {
        self.token.0 == other.token.0
    }
}

impl Eq for ApiKey {}

impl Hash for ApiKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.0.hash(state);
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.label)
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn label_truncates_long_tokens() {
        let key = ApiKey::new("sk-test-0123456789abcdef");
        assert_eq!(key.label(), "sk-test-…");
    }

    #[test]
    fn short_token_label_is_the_token() {
        let key = ApiKey::new("sk-1");
        assert_eq!(key.label(), "sk-1");
    }

    #[test]
    fn debug_and_display_redact_the_token() {
        let key = ApiKey::new("sk-test-0123456789abcdef");
        for rendered in [format!("{:?}", key), format!("{}", key)] {
            assert!(
                !rendered.contains("0123456789abcdef"),
                "token leaked: {rendered}"
            );
            assert!(rendered.contains("sk-test-"), "label missing: {rendered}");
        }
    }

    #[test]
    fn expose_returns_the_raw_token() {
        let key = ApiKey::new("sk-test-raw");
        assert_eq!(key.expose(), "sk-test-raw");
    }

    #[test]
    fn equality_and_hash_follow_the_token() {
        let a = ApiKey::new("sk-same");
        let b = ApiKey::new("sk-same");
        let c = ApiKey::new("sk-other");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(b);
        set.insert(c);
        assert_eq!(set.len(), 2, "equal tokens must collapse to one entry");
        assert!(set.contains(&a));
    }

    #[test]
    fn clones_share_the_same_token() {
        let key = ApiKey::new("sk-clone-me");
        let copy = key.clone();
        assert_eq!(key.expose(), copy.expose());
        assert_eq!(key, copy);
    }
}
