//! Encryption envelope: PBKDF2-HMAC-SHA-256 key derivation, the auth
//! verifier, deterministic per-section IV derivation, and AES-256-GCM
//! encrypt/decrypt with a fixed AAD (§4.10).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const FILE_NONCE_LEN: usize = 12;
pub const DEFAULT_ITERATIONS: u32 = 600_000;

const AUTH_VERIFY_MESSAGE: &[u8] = b"GICS_V1.3_AUTH_VERIFY";

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("AEAD encryption failed")]
    EncryptionFailed,
    #[error("AEAD decryption failed: tag mismatch or wrong password")]
    DecryptionFailed,
    #[error("wrong password: auth verifier mismatch")]
    AuthVerifyMismatch,
    #[error("encrypted payload too short (minimum {0} bytes for the GCM tag)")]
    TooShort(usize),
}

/// Derive the 256-bit AES key via PBKDF2-HMAC-SHA-256.
pub fn derive_key(password: &str, salt: &[u8; SALT_LEN], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// HMAC-SHA-256 of a fixed constant string under the derived key, used to
/// detect a wrong password without attempting a full section decrypt.
pub fn compute_auth_verify(key: &[u8; KEY_LEN]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(AUTH_VERIFY_MESSAGE);
    mac.finalize().into_bytes().into()
}

/// Verify `stored` against a freshly computed verifier, in constant time
/// relative to input length (`Mac::verify_slice` does not short-circuit on
/// the first mismatched byte).
pub fn verify_auth(key: &[u8; KEY_LEN], stored: &[u8; 32]) -> Result<(), CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(AUTH_VERIFY_MESSAGE);
    mac.verify_slice(stored).map_err(|_| CryptoError::AuthVerifyMismatch)
}

/// Deterministic per-section IV: `HMAC-SHA-256(key, file_nonce ||
/// stream_id || segment_id_le32)[0..12]` (§4.10).
pub fn derive_section_iv(key: &[u8; KEY_LEN], file_nonce: &[u8; FILE_NONCE_LEN], stream_id: u8, segment_id: u32) -> [u8; 12] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(file_nonce);
    mac.update(&[stream_id]);
    mac.update(&segment_id.to_le_bytes());
    let digest = mac.finalize().into_bytes();
    let mut iv = [0u8; 12];
    iv.copy_from_slice(&digest[0..12]);
    iv
}

/// Encrypt `plaintext` under `key` with the section's derived `iv` and the
/// engine's fixed 5-byte AAD.
pub fn encrypt_section(key: &[u8; KEY_LEN], iv: &[u8; 12], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    let nonce = Nonce::from_slice(iv);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt a payload produced by [`encrypt_section`]. Tag mismatch (wrong
/// key, wrong AAD, or corrupted ciphertext) surfaces as `DecryptionFailed`,
/// which the engine boundary maps to `IntegrityError`.
pub fn decrypt_section(key: &[u8; KEY_LEN], iv: &[u8; 12], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < 16 {
        return Err(CryptoError::TooShort(16));
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_derivation_is_deterministic() {
        let salt = [1u8; SALT_LEN];
        let k1 = derive_key("hunter2", &salt, 1000);
        let k2 = derive_key("hunter2", &salt, 1000);
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_salts_yield_different_keys() {
        let k1 = derive_key("hunter2", &[1u8; SALT_LEN], 1000);
        let k2 = derive_key("hunter2", &[2u8; SALT_LEN], 1000);
        assert_ne!(k1, k2);
    }

    #[test]
    fn auth_verify_roundtrips() {
        let key = derive_key("correct horse", &[9u8; SALT_LEN], 1000);
        let verify = compute_auth_verify(&key);
        assert!(verify_auth(&key, &verify).is_ok());
    }

    #[test]
    fn wrong_password_fails_auth_verify() {
        let key1 = derive_key("right", &[9u8; SALT_LEN], 1000);
        let key2 = derive_key("wrong", &[9u8; SALT_LEN], 1000);
        let verify = compute_auth_verify(&key1);
        assert!(verify_auth(&key2, &verify).is_err());
    }

    #[test]
    fn section_iv_is_deterministic_and_distinguishes_segments() {
        let key = [5u8; KEY_LEN];
        let nonce = [6u8; FILE_NONCE_LEN];
        let iv1 = derive_section_iv(&key, &nonce, 20, 0);
        let iv2 = derive_section_iv(&key, &nonce, 20, 0);
        let iv3 = derive_section_iv(&key, &nonce, 20, 1);
        assert_eq!(iv1, iv2);
        assert_ne!(iv1, iv3);
    }

    #[test]
    fn encrypt_decrypt_roundtrips() {
        let key = derive_key("hunter2", &[1u8; SALT_LEN], 1000);
        let nonce = [2u8; FILE_NONCE_LEN];
        let iv = derive_section_iv(&key, &nonce, 20, 0);
        let aad = crate::format::aad_tag();
        let plaintext = b"time series payload bytes";
        let ciphertext = encrypt_section(&key, &iv, plaintext, aad).unwrap();
        let back = decrypt_section(&key, &iv, &ciphertext, aad).unwrap();
        assert_eq!(back, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let key = derive_key("hunter2", &[1u8; SALT_LEN], 1000);
        let nonce = [2u8; FILE_NONCE_LEN];
        let iv = derive_section_iv(&key, &nonce, 20, 0);
        let aad = crate::format::aad_tag();
        let mut ciphertext = encrypt_section(&key, &iv, b"payload", aad).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(decrypt_section(&key, &iv, &ciphertext, aad).is_err());
    }
}
