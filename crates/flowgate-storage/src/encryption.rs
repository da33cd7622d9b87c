// At-rest encryption for stored credentials.
// AES-256-GCM with a single service key; payloads are base64(nonce || ct).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flowgate_core::{Error, Result};
use rand::RngCore;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Encrypts and decrypts credential values. Thread-safe, cheap to clone.
#[derive(Clone)]
pub struct CredentialEncryption {
    cipher: Aes256Gcm,
}

impl CredentialEncryption {
    /// Create from a base64-encoded 32-byte key
    pub fn new(key_base64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .map_err(|e| Error::configuration(format!("credential key is not base64: {e}")))?;

        if key_bytes.len() != KEY_SIZE {
            return Err(Error::configuration(format!(
                "credential key must be {} bytes, got {}",
                KEY_SIZE,
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| Error::configuration(format!("failed to build cipher: {e}")))?;

        Ok(Self { cipher })
    }

    /// Create from the CREDENTIAL_ENCRYPTION_KEY environment variable
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("CREDENTIAL_ENCRYPTION_KEY")
            .map_err(|_| Error::configuration("CREDENTIAL_ENCRYPTION_KEY not set"))?;
        Self::new(&key)
    }

    /// Encrypt a token for storage. Output is base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Internal(anyhow::anyhow!("encryption failed: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    /// Decrypt a stored payload back to the token string
    pub fn decrypt(&self, payload: &str) -> Result<String> {
        let bytes = BASE64
            .decode(payload)
            .map_err(|e| Error::repository(format!("stored credential is not base64: {e}")))?;

        if bytes.len() <= NONCE_SIZE {
            return Err(Error::repository("stored credential payload too short"));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::repository("credential decryption failed (wrong key or corrupt data)"))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::repository("decrypted credential is not valid UTF-8"))
    }
}

/// Generate a fresh random key in the format CREDENTIAL_ENCRYPTION_KEY expects
pub fn generate_credential_key() -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let service = CredentialEncryption::new(&generate_credential_key()).unwrap();

        let token = "gho_testtoken12345";
        let encrypted = service.encrypt(token).unwrap();
        assert_ne!(encrypted, token);
        assert_eq!(service.decrypt(&encrypted).unwrap(), token);
    }

    #[test]
    fn same_plaintext_gives_different_ciphertext() {
        let service = CredentialEncryption::new(&generate_credential_key()).unwrap();

        let a = service.encrypt("token").unwrap();
        let b = service.encrypt("token").unwrap();
        assert_ne!(a, b);
        assert_eq!(service.decrypt(&a).unwrap(), service.decrypt(&b).unwrap());
    }

    #[test]
    fn wrong_key_fails_closed() {
        let service_a = CredentialEncryption::new(&generate_credential_key()).unwrap();
        let service_b = CredentialEncryption::new(&generate_credential_key()).unwrap();

        let encrypted = service_a.encrypt("token").unwrap();
        assert!(service_b.decrypt(&encrypted).is_err());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(CredentialEncryption::new("not base64!!!").is_err());
        assert!(CredentialEncryption::new(&BASE64.encode([0u8; 16])).is_err());
    }

    #[test]
    fn rejects_truncated_payload() {
        let service = CredentialEncryption::new(&generate_credential_key()).unwrap();
        assert!(service.decrypt(&BASE64.encode([0u8; 8])).is_err());
    }
}
