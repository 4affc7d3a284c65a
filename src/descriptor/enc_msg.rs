use std::fmt;
use std::str::FromStr;

use super::{decode_hex_array, FormatError};
use crate::crypto::NONCE_LEN;
use crate::kdf::SALT_LEN;

/// Length of a packed `encMsgV3` string in characters.
pub const ENC_MSG_LEN: usize = 2 * (SALT_LEN + NONCE_LEN);

/// Module-wide key salt and GCM nonce, decoded from `encMsgV3`.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionDescriptor {
    pub salt:  [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
}

impl EncryptionDescriptor {
    pub fn parse(raw: &str) -> Result<Self, FormatError> {
        let bytes = raw.as_bytes();
        if bytes.len() != ENC_MSG_LEN {
            return Err(FormatError::EncMsgLength(bytes.len()));
        }
        let (salt_hex, nonce_hex) = bytes.split_at(2 * SALT_LEN);
        Ok(Self {
            salt:  decode_hex_array("encMsgV3 salt", salt_hex)?,
            nonce: decode_hex_array("encMsgV3 nonce", nonce_hex)?,
        })
    }

    /// Re-pack as lowercase hex, `salt ‖ nonce`.
    pub fn to_hex(&self) -> String {
        let mut out = hex::encode(self.salt);
        out.push_str(&hex::encode(self.nonce));
        out
    }
}

impl FromStr for EncryptionDescriptor {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Salts and nonces are public values, but keep debug output compact.
impl fmt::Debug for EncryptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionDescriptor")
            .field("salt", &hex::encode(self.salt))
            .field("nonce", &hex::encode(self.nonce))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff\
                          0102030405060708090a0b0c0d0e0f10";

    #[test]
    fn parses_salt_then_nonce() {
        let d = EncryptionDescriptor::parse(SAMPLE).unwrap();
        assert_eq!(d.salt[0], 0x00);
        assert_eq!(d.salt[31], 0xff);
        assert_eq!(d.nonce, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
        assert_eq!(d.to_hex(), SAMPLE);
    }

    #[test]
    fn accepts_uppercase_hex() {
        let d = EncryptionDescriptor::parse(&SAMPLE.to_uppercase()).unwrap();
        assert_eq!(d.to_hex(), SAMPLE);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(EncryptionDescriptor::parse(""), Err(FormatError::EncMsgLength(0)));
        assert_eq!(
            EncryptionDescriptor::parse(&SAMPLE[..95]),
            Err(FormatError::EncMsgLength(95))
        );
        let long = format!("{SAMPLE}00");
        assert_eq!(EncryptionDescriptor::parse(&long), Err(FormatError::EncMsgLength(98)));
    }

    #[test]
    fn rejects_non_hex_in_either_half() {
        let mut bad_salt = SAMPLE.to_string();
        bad_salt.replace_range(10..11, "g");
        assert!(matches!(
            EncryptionDescriptor::parse(&bad_salt),
            Err(FormatError::Hex { field: "encMsgV3 salt", .. })
        ));

        let mut bad_nonce = SAMPLE.to_string();
        bad_nonce.replace_range(90..91, "z");
        assert!(matches!(
            EncryptionDescriptor::parse(&bad_nonce),
            Err(FormatError::Hex { field: "encMsgV3 nonce", .. })
        ));
    }

    #[test]
    fn multibyte_input_of_right_byte_length_does_not_panic() {
        // 48 two-byte characters = 96 bytes.
        let s = "é".repeat(48);
        assert!(matches!(EncryptionDescriptor::parse(&s), Err(FormatError::Hex { .. })));
    }

    proptest! {
        #[test]
        fn roundtrips_any_valid_string(s in "[0-9a-f]{96}") {
            let d = EncryptionDescriptor::parse(&s).unwrap();
            prop_assert_eq!(d.to_hex(), s);
        }

        #[test]
        fn never_panics(s in "\\PC{0,120}") {
            let _ = EncryptionDescriptor::parse(&s);
        }

        #[test]
        fn wrong_lengths_are_format_errors(s in "[0-9a-f]{0,200}") {
            prop_assume!(s.len() != ENC_MSG_LEN);
            prop_assert_eq!(EncryptionDescriptor::parse(&s), Err(FormatError::EncMsgLength(s.len())));
        }
    }
}
