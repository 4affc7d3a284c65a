//! PBKDF2-HMAC-SHA256 key derivation for module keys and HMAC keys.
//!
//! Decryption uses the derived 32 bytes directly as the AES-256 key.
//! Integrity verification does not: the HMAC key is the *lowercase hex text*
//! of the derived key, i.e. 64 ASCII bytes. Keying HMAC with the raw bytes
//! produces digests that never match the ones stored in `checkMsgV3`.

use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::CryptoError;

pub const PBKDF2_ITERATIONS: u32 = 5000;
pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 32;
pub const HMAC_KEY_LEN: usize = 2 * KEY_LEN;

/// AES-256 key; wiped on drop.
pub type DerivedKey = Zeroizing<[u8; KEY_LEN]>;
/// Hex-encoded derived key used as HMAC-SHA256 key; wiped on drop.
pub type HmacKeyMaterial = Zeroizing<[u8; HMAC_KEY_LEN]>;

pub fn derive_raw_key(password: &str, salt: &[u8]) -> Result<DerivedKey, CryptoError> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, PBKDF2_ITERATIONS, key.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivation(format!("PBKDF2 failed: {e}")))?;
    Ok(key)
}

pub fn derive_hmac_key_material(password: &str, salt: &[u8]) -> Result<HmacKeyMaterial, CryptoError> {
    let raw = derive_raw_key(password, salt)?;
    let mut material = Zeroizing::new([0u8; HMAC_KEY_LEN]);
    hex::encode_to_slice(raw.as_slice(), material.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivation(format!("hex encoding failed: {e}")))?;
    Ok(material)
}

#[cfg(test)]
mod tests {
    use super::*;

    // PBKDF2-HMAC-SHA256("test", 00*32, 5000, 32)
    const TEST_KEY_HEX: &str = "ddd51c2526ee50dacc3ac2016e0af1114a738c80c83c1ca7c051e91f9b9f421c";

    #[test]
    fn raw_key_matches_reference_vector() {
        let key = derive_raw_key("test", &[0u8; 32]).unwrap();
        assert_eq!(hex::encode(*key), TEST_KEY_HEX);
    }

    #[test]
    fn raw_key_is_deterministic() {
        let a = derive_raw_key("hunter2", &[7u8; 32]).unwrap();
        let b = derive_raw_key("hunter2", &[7u8; 32]).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn different_salts_give_different_keys() {
        let a = derive_raw_key("hunter2", &[0u8; 32]).unwrap();
        let b = derive_raw_key("hunter2", &[1u8; 32]).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn hmac_material_is_lowercase_hex_of_raw_key() {
        let material = derive_hmac_key_material("test", &[0u8; 32]).unwrap();
        assert_eq!(material.as_slice(), TEST_KEY_HEX.as_bytes());

        let raw = derive_raw_key("test", &[0u8; 32]).unwrap();
        assert_eq!(material.as_slice(), hex::encode(*raw).as_bytes());
    }

    #[test]
    fn empty_password_is_accepted() {
        let key = derive_raw_key("", &[0u8; 32]).unwrap();
        assert_eq!(key.len(), KEY_LEN);
    }
}
