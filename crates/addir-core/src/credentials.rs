//! Credentials for the account used to search the directory.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

/// Bind credentials for the search account.
///
/// These are separate from any credential being validated: the engine binds with them before
/// every search, and the password is never serialized.
#[derive(Debug, Serialize, Deserialize)]
pub struct BindCredentials {
    /// Bind name (`user@domain`, `DOMAIN\user` or a distinguished name)
    pub username: String,

    /// Bind password
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub password: SecretString,
}

impl BindCredentials {
    /// Create new bind credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Get the bind name.
    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.username
    }

    /// Get the bind password.
    #[must_use]
    pub fn bind_password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl Clone for BindCredentials {
    fn clone(&self) -> Self {
        Self::new(self.username.clone(), self.bind_password().to_owned())
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}
