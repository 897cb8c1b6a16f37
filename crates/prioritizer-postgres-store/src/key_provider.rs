//! Secret/Key Service (§6) implementation: reads the 32-byte symmetric key
//! from configuration and exposes AES-256-GCM encrypt/decrypt helpers for
//! third-party OAuth token material at rest.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use prioritizer_core::config::ENCRYPTION_KEY;
use prioritizer_core::error::{Error, Result};
use prioritizer_core::store::KeyProvider;

const NONCE_LEN: usize = 12;

/// Reads `PRIORITIZER_ENCRYPTION_KEY` (hex-encoded, 32 bytes) from the
/// environment, per spec.md §6's `encryption_key(hex, 32 bytes)` config key.
pub struct EnvKeyProvider {
    key: [u8; 32],
}

impl EnvKeyProvider {
    pub fn from_env() -> Result<Self> {
        let hex_key = std::env::var(ENCRYPTION_KEY).map_err(|_| {
            Error::internal(format!("{ENCRYPTION_KEY} is not set"))
        })?;
        Self::from_hex(&hex_key)
    }

    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = decode_hex(hex_key)
            .map_err(|e| Error::validation(format!("invalid encryption key hex: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            Error::validation(format!(
                "encryption key must decode to exactly 32 bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self { key })
    }
}

impl KeyProvider for EnvKeyProvider {
    fn symmetric_key(&self) -> Result<[u8; 32]> {
        Ok(self.key)
    }
}

/// Encrypts `plaintext` with AES-256-GCM under `key`, returning
/// `nonce || ciphertext_with_tag` so decryption needs no side channel.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::internal(format!("invalid AES-256-GCM key: {e}")))?;
    let nonce_bytes = Aes256Gcm::generate_nonce(OsRng);
    let ciphertext = cipher
        .encrypt(&nonce_bytes, plaintext)
        .map_err(|e| Error::internal(format!("encryption failed: {e}")))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce_bytes.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a blob produced by [`encrypt`].
pub fn decrypt(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN {
        return Err(Error::validation(
            "ciphertext shorter than nonce length".to_string(),
        ));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::internal(format!("invalid AES-256-GCM key: {e}")))?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| Error::validation(format!("decryption failed: {e}")))
}

fn decode_hex(s: &str) -> std::result::Result<Vec<u8>, String> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err("hex string must have an even number of characters".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| format!("invalid hex digit: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = EnvKeyProvider::from_hex("aabb").unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn from_hex_rejects_odd_length_string() {
        let err = EnvKeyProvider::from_hex("abc").unwrap_err();
        assert!(err.to_string().to_lowercase().contains("hex"));
    }

    #[test]
    fn from_hex_accepts_64_hex_chars() {
        let hex_key = "11".repeat(32);
        let provider = EnvKeyProvider::from_hex(&hex_key).unwrap();
        assert_eq!(provider.symmetric_key().unwrap(), [0x11u8; 32]);
    }

    #[test]
    fn encrypt_decrypt_round_trips() {
        let key = sample_key();
        let plaintext = b"oauth-refresh-token-xyz";
        let ciphertext = encrypt(&key, plaintext).unwrap();
        assert_ne!(ciphertext.as_slice(), plaintext.as_slice());
        let decrypted = decrypt(&key, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn encrypt_is_nondeterministic_across_calls() {
        let key = sample_key();
        let a = encrypt(&key, b"same-plaintext").unwrap();
        let b = encrypt(&key, b"same-plaintext").unwrap();
        assert_ne!(a, b, "random nonce should make each encryption unique");
    }

    #[test]
    fn decrypt_rejects_tampered_ciphertext() {
        let key = sample_key();
        let mut ciphertext = encrypt(&key, b"secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(decrypt(&key, &ciphertext).is_err());
    }

    #[test]
    fn decrypt_rejects_wrong_key() {
        let ciphertext = encrypt(&sample_key(), b"secret").unwrap();
        let wrong_key = [9u8; 32];
        assert!(decrypt(&wrong_key, &ciphertext).is_err());
    }

    #[test]
    fn decrypt_rejects_truncated_blob() {
        let key = sample_key();
        assert!(decrypt(&key, &[0u8; 4]).is_err());
    }
}
