//! Password storage in the OS keyring.
//!
//! Lets users keep warehouse passwords out of secrets files and the
//! environment. The keyring is only a fallback source during config
//! resolution; a missing or unavailable keyring is never an error there.

use crate::error::{Error, Result};
use keyring::Entry;
use tracing::{debug, warn};

const SERVICE_NAME: &str = "snowlink";

/// Manages passwords stored in the OS keyring.
#[derive(Debug, Clone)]
pub struct SecretStorage {
    keyring_available: bool,
}

impl Default for SecretStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStorage {
    /// Creates a new secret storage instance, probing keyring availability.
    pub fn new() -> Self {
        let keyring_available = Self::probe_keyring();
        if !keyring_available {
            debug!("OS keyring unavailable; keyring passwords disabled");
        }
        Self { keyring_available }
    }

    /// Probes whether the OS keyring is available.
    fn probe_keyring() -> bool {
        let test_entry = match Entry::new(SERVICE_NAME, "__probe__") {
            Ok(e) => e,
            Err(_) => return false,
        };

        match test_entry.set_password("test") {
            Ok(()) => {
                let _ = test_entry.delete_credential();
                true
            }
            Err(_) => false,
        }
    }

    /// Returns whether the keyring is available.
    pub fn is_available(&self) -> bool {
        self.keyring_available
    }

    /// Stores a secret in the keyring.
    pub fn store(&self, key: &str, secret: &str) -> Result<()> {
        if !self.keyring_available {
            return Err(Error::config(
                "OS keyring unavailable; set SNOWFLAKE_PASSWORD or use a secrets file instead",
            ));
        }

        let entry = Entry::new(SERVICE_NAME, key)
            .map_err(|e| Error::config(format!("Failed to create keyring entry: {e}")))?;

        entry
            .set_password(secret)
            .map_err(|e| Error::config(format!("Failed to store secret: {e}")))?;

        Ok(())
    }

    /// Retrieves a secret from the keyring.
    pub fn retrieve(&self, key: &str) -> Result<Option<String>> {
        if !self.keyring_available {
            return Ok(None);
        }

        let entry = Entry::new(SERVICE_NAME, key)
            .map_err(|e| Error::config(format!("Failed to access keyring: {e}")))?;

        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::config(format!("Failed to retrieve secret: {e}"))),
        }
    }

    /// Deletes a secret from the keyring.
    pub fn delete(&self, key: &str) -> Result<()> {
        if !self.keyring_available {
            return Ok(());
        }

        let entry = Entry::new(SERVICE_NAME, key)
            .map_err(|e| Error::config(format!("Failed to access keyring: {e}")))?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                warn!("Failed to delete secret from keyring: {e}");
                Ok(())
            }
        }
    }

    /// Generates a keyring key for a connection password.
    ///
    /// Account identifiers are case-insensitive, so the account is
    /// lower-cased.
    pub fn connection_password_key(account: &str, user: &str) -> String {
        format!("conn:{}:{}", account.to_ascii_lowercase(), user)
    }

    /// Masks a secret for display, showing only the last 4 characters.
    pub fn mask_secret(secret: &str) -> String {
        let chars: Vec<char> = secret.chars().collect();
        if chars.len() <= 4 {
            "*".repeat(chars.len())
        } else {
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", "*".repeat(4), tail)
        }
    }
}
