//! AES-256-GCM with a 16-byte nonce, and HMAC-SHA256 file digests.
//!
//! Sealed member layout: [ ciphertext | GCM tag (16 B) ]
//!
//! The nonce is not stored with the member; every member of a module shares
//! the nonce from the module's `encMsgV3`. GCM only authenticates once the
//! whole buffer has been seen, so decryption is one-shot and releases no
//! plaintext on a tag mismatch. Digests, in contrast, are computed
//! incrementally from any [`Read`].

use std::io::{self, Read};

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::kdf::KEY_LEN;

/// Byte length of the GCM nonce used by this format (not the usual 12).
pub const NONCE_LEN: usize = 16;
/// Byte length of the GCM authentication tag appended to every member.
pub const TAG_LEN: usize = 16;
/// Byte length of an HMAC-SHA256 digest.
pub const DIGEST_LEN: usize = 32;

const DIGEST_CHUNK: usize = 64 * 1024;

/// AES-256-GCM configured for 16-byte nonces.
pub type Aes256Gcm16 = AesGcm<Aes256, U16>;
type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Authentication failed: wrong password or corrupted data")]
    Authentication,
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Invalid key length")]
    InvalidKey,
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Open a sealed buffer (`ciphertext ‖ tag`) with the module key and nonce.
pub fn decrypt_aead_buffer(
    sealed: &[u8],
    key:    &[u8; KEY_LEN],
    nonce:  &[u8; NONCE_LEN],
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::Authentication);
    }
    let cipher = Aes256Gcm16::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
    cipher
        .decrypt(aes_gcm::Nonce::<U16>::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::Authentication)
}

/// Seal `plaintext` the way the backup producer does.
///
/// Returns `ciphertext ‖ GCM-tag (16 B)`. Only fixtures and benches need this.
pub fn encrypt_aead_buffer(
    plaintext: &[u8],
    key:       &[u8; KEY_LEN],
    nonce:     &[u8; NONCE_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm16::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
    cipher
        .encrypt(aes_gcm::Nonce::<U16>::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// HMAC-SHA256 over everything `reader` yields.
pub fn compute_file_digest<R: Read>(mut reader: R, hmac_key: &[u8]) -> io::Result<[u8; DIGEST_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(hmac_key)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid HMAC key length"))?;

    let mut buf = vec![0u8; DIGEST_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => mac.update(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Compare the digest of `reader` against `expected` in constant time.
pub fn verify<R: Read>(reader: R, expected: &[u8; DIGEST_LEN], hmac_key: &[u8]) -> io::Result<bool> {
    let actual = compute_file_digest(reader, hmac_key)?;
    Ok(bool::from(actual[..].ct_eq(&expected[..])))
}
