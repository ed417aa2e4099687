//! Credential decryption for stored provider keys.
//!
//! The cipher itself is an opaque dependency. Backends:
//! - Plaintext (the stored value is the key; local development)
//! - Environment references (`env:NAME` resolves to `$NAME`)
//! - In-memory (for testing)

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Malformed ciphertext: {0}")]
    Malformed(String),
}

pub type SecretResult<T> = Result<T, SecretError>;

/// Turns a stored credential blob into the plaintext API key.
pub trait CredentialCipher: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> SecretResult<String>;
}

/// Decrypt a stored credential. Empty plaintext is rejected so a bad key
/// surfaces here rather than as a vendor 401.
pub fn decrypt_credential(cipher: &dyn CredentialCipher, ciphertext: &str) -> SecretResult<String> {
    let plaintext = cipher.decrypt(ciphertext)?;
    if plaintext.trim().is_empty() {
        return Err(SecretError::Malformed("credential decrypted to an empty value".into()));
    }
    Ok(plaintext)
}

/// Selects the cipher backend in `[secrets]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum SecretsConfig {
    #[default]
    Plaintext,
    Env,
}

impl SecretsConfig {
    pub fn build(&self) -> std::sync::Arc<dyn CredentialCipher> {
        match self {
            SecretsConfig::Plaintext => std::sync::Arc::new(PlaintextCipher),
            SecretsConfig::Env => std::sync::Arc::new(EnvCipher),
        }
    }
}

pub struct PlaintextCipher;

impl CredentialCipher for PlaintextCipher {
    fn decrypt(&self, ciphertext: &str) -> SecretResult<String> {
        Ok(ciphertext.to_string())
    }
}

/// Resolves `env:NAME` references from the process environment.
pub struct EnvCipher;

impl CredentialCipher for EnvCipher {
    fn decrypt(&self, ciphertext: &str) -> SecretResult<String> {
        let name = ciphertext
            .strip_prefix("env:")
            .ok_or_else(|| SecretError::Malformed("expected an 'env:NAME' reference".into()))?;
        std::env::var(name).map_err(|_| SecretError::NotFound(name.to_string()))
    }
}

/// Lookup table cipher (for testing only)
#[derive(Default)]
pub struct MemoryCipher {
    secrets: DashMap<String, String>,
}

impl MemoryCipher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, ciphertext: impl Into<String>, plaintext: impl Into<String>) -> Self {
        self.secrets.insert(ciphertext.into(), plaintext.into());
        self
    }
}

impl CredentialCipher for MemoryCipher {
    fn decrypt(&self, ciphertext: &str) -> SecretResult<String> {
        self.secrets
            .get(ciphertext)
            .map(|v| v.value().clone())
            .ok_or_else(|| SecretError::NotFound(ciphertext.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_cipher_resolves_reference() {
        temp_env::with_var("GATEWAY_TEST_KEY", Some("sk-live"), || {
            assert_eq!(
                decrypt_credential(&EnvCipher, "env:GATEWAY_TEST_KEY").unwrap(),
                "sk-live"
            );
        });
    }

    #[test]
    fn test_env_cipher_rejects_bare_values() {
        let err = EnvCipher.decrypt("sk-live").unwrap_err();
        assert!(matches!(err, SecretError::Malformed(_)));
    }

    #[test]
    fn test_empty_plaintext_is_rejected() {
        let err = decrypt_credential(&PlaintextCipher, "  ").unwrap_err();
        assert!(matches!(err, SecretError::Malformed(_)));
    }

    #[test]
    fn test_memory_cipher_unknown_blob() {
        let cipher = MemoryCipher::new().with("blob", "sk");
        assert_eq!(cipher.decrypt("blob").unwrap(), "sk");
        assert!(matches!(cipher.decrypt("other"), Err(SecretError::NotFound(_))));
    }
}
