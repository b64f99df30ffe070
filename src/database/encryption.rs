// ABOUTME: AES-256-GCM helpers for OAuth tokens stored at rest
// ABOUTME: Random 12-byte nonce prepended to the ciphertext, base64 wire form
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const NONCE_LEN: usize = 12;

/// Encrypt a token for storage
///
/// # Errors
///
/// Returns an error if the key length is wrong or encryption fails
pub fn encrypt_token(key: &[u8], plaintext: &str) -> Result<String> {
    if key.len() != 32 {
        return Err(anyhow!("encryption key must be 32 bytes, got {}", key.len()));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("token encryption failed: {e}"))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(combined))
}

/// Decrypt a stored token
///
/// # Errors
///
/// Returns an error if the payload is malformed or authentication fails
pub fn decrypt_token(key: &[u8], stored: &str) -> Result<String> {
    if key.len() != 32 {
        return Err(anyhow!("encryption key must be 32 bytes, got {}", key.len()));
    }
    let combined = BASE64.decode(stored)?;
    if combined.len() <= NONCE_LEN {
        return Err(anyhow!("encrypted token payload too short"));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| anyhow!("token decryption failed: {e}"))?;
    String::from_utf8(plaintext).map_err(|e| anyhow!("decrypted token is not UTF-8: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_token() {
        let key = [3u8; 32];
        let encrypted = encrypt_token(&key, "secret-access-token").unwrap();
        assert_ne!(encrypted, "secret-access-token");
        assert_eq!(decrypt_token(&key, &encrypted).unwrap(), "secret-access-token");
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let encrypted = encrypt_token(&[3u8; 32], "secret").unwrap();
        assert!(decrypt_token(&[4u8; 32], &encrypted).is_err());
    }

    #[test]
    fn rejects_bad_key_length() {
        assert!(encrypt_token(&[0u8; 16], "x").is_err());
    }
}
