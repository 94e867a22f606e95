//! API key handling.
//!
//! Keys are wrapped in [`SecretString`] as soon as they are read, so they
//! never appear in `Debug`/`Display` output, logs or error messages.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Named environment variable
    Environment(String),
    /// Passed in by the caller
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment(var) => write!(f, "env:{var}"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A backend API key.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source: CredentialSource::Programmatic,
        }
    }

    /// Read the key from `env_var`. Unset and blank both count as missing.
    pub fn from_env(env_var: &str) -> Result<Self, ProviderError> {
        Self::from_lookup(env_var, |k| std::env::var(k).ok())
    }

    pub(crate) fn from_lookup(
        env_var: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ProviderError> {
        match lookup(env_var) {
            Some(value) if !value.trim().is_empty() => Ok(Self {
                value: SecretString::from(value),
                source: CredentialSource::Environment(env_var.to_string()),
            }),
            _ => Err(ProviderError::NotConfigured(format!(
                "API key not set: configure the '{env_var}' environment variable"
            ))),
        }
    }

    /// The raw key, for setting a request header.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API key from {} [REDACTED]", self.source)
    }
}
