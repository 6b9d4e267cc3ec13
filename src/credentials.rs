//! Controller credentials and their resolution from configuration

use std::collections::HashMap;
use std::fmt;

use crate::config::CredentialConfig;

/// Plaintext controller login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecryptionError {
    #[error("unknown credential reference '{0}'")]
    UnknownReference(String),

    #[error("no secret available for credential '{reference}': {reason}")]
    MissingSecret { reference: String, reason: String },
}

/// Turns a device's credential reference into a usable login.
pub trait CredentialStore: Send + Sync {
    fn decrypt(&self, reference: &str) -> Result<Credentials, DecryptionError>;
}

/// Credentials declared in the config file, passwords optionally read
/// from the environment at lookup time.
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentialStore {
    entries: HashMap<String, CredentialConfig>,
}

impl ConfigCredentialStore {
    pub fn new(entries: HashMap<String, CredentialConfig>) -> Self {
        Self { entries }
    }

    /// Convenience for a single inline login.
    pub fn with_inline(
        mut self,
        reference: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            reference.into(),
            CredentialConfig {
                username: username.into(),
                password: Some(password.into()),
                password_env: None,
            },
        );
        self
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn decrypt(&self, reference: &str) -> Result<Credentials, DecryptionError> {
        let entry = self
            .entries
            .get(reference)
            .ok_or_else(|| DecryptionError::UnknownReference(reference.to_string()))?;

        let password = match (&entry.password_env, &entry.password) {
            (Some(var), _) => std::env::var(var).map_err(|e| DecryptionError::MissingSecret {
                reference: reference.to_string(),
                reason: format!("{var}: {e}"),
            })?,
            (None, Some(password)) => password.clone(),
            (None, None) => {
                return Err(DecryptionError::MissingSecret {
                    reference: reference.to_string(),
                    reason: "neither password nor password_env configured".to_string(),
                });
            }
        };

        Ok(Credentials::new(&entry.username, password))
    }
}
