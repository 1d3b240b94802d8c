//! AES-256-GCM helpers for secrets at rest.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use tracing::info;

use crate::error::StoreError;

pub const KEY_ENV: &str = "FINSYNC_ENCRYPTION_KEY";
const KEY_FILE: &str = ".finsync_key";
const TAG_LEN: usize = 16;
const IV_LEN: usize = 12;

/// Encrypt a secret. Returns "iv:tag:ciphertext" in hex.
pub fn encrypt_secret(key: &[u8; 32], plaintext: &str) -> Result<String, StoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| StoreError::Crypto(format!("Failed to create cipher: {e}")))?;

    let mut iv_bytes = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv_bytes);
    let nonce = Nonce::from_slice(&iv_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| StoreError::Crypto(format!("Encryption failed: {e}")))?;

    // The tag is appended to the ciphertext; store it separately.
    let (ct, tag) = ciphertext.split_at(ciphertext.len() - TAG_LEN);

    Ok(format!("{}:{}:{}", hex::encode(iv_bytes), hex::encode(tag), hex::encode(ct)))
}

/// Decrypt a secret from "iv:tag:ciphertext" hex format.
pub fn decrypt_secret(key: &[u8; 32], encrypted: &str) -> Result<String, StoreError> {
    let parts: Vec<&str> = encrypted.splitn(3, ':').collect();
    if parts.len() != 3 {
        return Err(StoreError::Crypto(
            "Invalid encrypted format (expected iv:tag:ciphertext)".into(),
        ));
    }

    let iv_bytes = hex::decode(parts[0])?;
    let tag_bytes = hex::decode(parts[1])?;
    let ct_bytes = hex::decode(parts[2])?;

    if iv_bytes.len() != IV_LEN {
        return Err(StoreError::Crypto(format!(
            "Invalid IV length: expected {IV_LEN}, got {}",
            iv_bytes.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| StoreError::Crypto(format!("Failed to create cipher: {e}")))?;
    let nonce = Nonce::from_slice(&iv_bytes);

    let mut combined = ct_bytes;
    combined.extend_from_slice(&tag_bytes);

    let plaintext = cipher
        .decrypt(nonce, combined.as_ref())
        .map_err(|e| StoreError::Crypto(format!("Decryption failed: {e}")))?;

    String::from_utf8(plaintext).map_err(|e| StoreError::Crypto(format!("Invalid UTF-8: {e}")))
}

fn key_from_hex(hex_key: &str, source: &str) -> Result<[u8; 32], StoreError> {
    let bytes = hex::decode(hex_key.trim())?;
    let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        StoreError::InvalidKey(format!(
            "{source} must be 64 hex characters (32 bytes), got {} bytes",
            bytes.len()
        ))
    })?;
    Ok(key)
}

/// Load the key from `FINSYNC_ENCRYPTION_KEY`, else from `{data_dir}/.finsync_key`,
/// generating that file on first use.
pub fn load_or_generate_key(data_dir: &Path) -> Result<[u8; 32], StoreError> {
    if let Ok(env_key) = std::env::var(KEY_ENV) {
        let key = key_from_hex(&env_key, KEY_ENV)?;
        info!("Using encryption key from {KEY_ENV} env var");
        return Ok(key);
    }

    let key_path = data_dir.join(KEY_FILE);
    if key_path.exists() {
        let key = key_from_hex(&std::fs::read_to_string(&key_path)?, &key_path.display().to_string())?;
        info!("Loaded encryption key from {}", key_path.display());
        return Ok(key);
    }

    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&key_path, hex::encode(key))?;
    info!("Generated new encryption key at {}", key_path.display());
    Ok(key)
}
