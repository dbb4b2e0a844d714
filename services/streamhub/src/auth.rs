//! Pluggable bearer-token validation for the HTTP binding.
//!
//! Production token validation against the upstream scheduler's identity
//! store is out of scope here; the shipped [`StaticTokenValidator`] exists to
//! demonstrate the binding's 401 path end to end.

use std::collections::HashMap;

/// Maps a bearer token string to an opaque principal, or rejects it.
pub trait TokenValidator: Send + Sync {
    /// Returns the principal name for a valid token, `None` otherwise.
    fn validate(&self, token: &str) -> Option<String>;
}

/// A static in-memory token table, loaded once from configuration.
pub struct StaticTokenValidator {
    tokens: HashMap<String, String>,
}

impl StaticTokenValidator {
    #[must_use]
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// Pull the bearer token out of an `Authorization: Bearer <token>` header
/// value.
#[must_use]
pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_strips_the_prefix() {
        assert_eq!(extract_bearer("Bearer abc123"), Some("abc123"));
    }

    #[test]
    fn extract_bearer_rejects_other_schemes() {
        assert_eq!(extract_bearer("Basic abc123"), None);
    }

    #[test]
    fn static_validator_accepts_known_tokens_only() {
        let mut tokens = HashMap::new();
        tokens.insert("secret".to_owned(), "alice".to_owned());
        let validator = StaticTokenValidator::new(tokens);

        assert_eq!(validator.validate("secret"), Some("alice".to_owned()));
        assert_eq!(validator.validate("unknown"), None);
    }
}
