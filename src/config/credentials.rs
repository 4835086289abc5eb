use crate::HarvestError;
use std::fmt;

/// Libraries.io API key
///
/// Only obtainable from the environment, so holding one proves the
/// credential check already happened before any request was built.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Reads the key from the environment variable `var`
    ///
    /// An unset or blank variable is a fatal precondition, reported as
    /// [`HarvestError::MissingCredential`].
    pub fn from_env(var: &str) -> Result<Self, HarvestError> {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Ok(Self(value)),
            _ => Err(HarvestError::MissingCredential {
                var: var.to_string(),
            }),
        }
    }

    /// Wraps a key obtained elsewhere (tests, embedding callers)
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

// Keep the secret out of logs and panics.
impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}
