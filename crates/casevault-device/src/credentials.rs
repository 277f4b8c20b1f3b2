//! Sealing of remote share passwords
//!
//! Passwords are encrypted with AES-256-GCM under a random 96-bit nonce; the
//! stored form is base64 of `nonce || ciphertext`. Plaintext only lives for the
//! duration of a capacity query.

use aes_gcm::aead::{rand_core::RngCore, Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use casevault_types::{Error, Result};
use std::fmt;
use tracing::warn;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Seals and opens share passwords
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; KEY_LEN],
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl CredentialCipher {
    /// Build from a base64-encoded 32-byte key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::credential(format!("credential key is not base64: {}", e)))?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            Error::credential(format!(
                "credential key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Build from the configured key, or a throwaway one when none is set
    pub fn from_config(key: Option<&str>) -> Result<Self> {
        match key {
            Some(encoded) => Self::from_base64(encoded),
            None => {
                warn!("No credential key configured; sealed passwords will not survive a restart");
                Ok(Self::ephemeral())
            }
        }
    }

    /// Random key for this process only
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Fresh base64 key suitable for `security.credential_key`
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        STANDARD.encode(key)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }

    /// Encrypt a plaintext password
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::credential("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    /// Decrypt a sealed password
    pub fn open(&self, sealed: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(sealed.trim())
            .map_err(|e| Error::credential(format!("sealed password is not base64: {}", e)))?;
        if bytes.len() <= NONCE_LEN {
            return Err(Error::credential("sealed password is truncated"));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| Error::credential("cannot unseal password; wrong key or tampered data"))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::credential("unsealed password is not UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let cipher = CredentialCipher::ephemeral();
        let sealed = cipher.seal("s3cret").unwrap();
        assert_ne!(sealed, "s3cret");
        assert_eq!(cipher.open(&sealed).unwrap(), "s3cret");
    }

    #[test]
    fn test_nonce_differs_per_seal() {
        let cipher = CredentialCipher::ephemeral();
        assert_ne!(cipher.seal("same").unwrap(), cipher.seal("same").unwrap());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealed = CredentialCipher::ephemeral().seal("s3cret").unwrap();
        let err = CredentialCipher::ephemeral().open(&sealed).unwrap_err();
        assert_eq!(err.kind(), casevault_types::ErrorKind::Credential);
    }

    #[test]
    fn test_key_from_base64() {
        let encoded = CredentialCipher::generate_key();
        let cipher = CredentialCipher::from_base64(&encoded).unwrap();
        let again = CredentialCipher::from_base64(&encoded).unwrap();
        let sealed = cipher.seal("pw").unwrap();
        assert_eq!(again.open(&sealed).unwrap(), "pw");

        assert!(CredentialCipher::from_base64("c2hvcnQ=").is_err());
        assert!(CredentialCipher::from_base64("!!!").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let text = format!("{:?}", CredentialCipher::ephemeral());
        assert!(text.contains("redacted"));
    }
}
