//! Parsers for the two packed metadata strings stored per backup module.
//!
//! | Field        | Layout |
//! |--------------|--------|
//! | `encMsgV3`   | `salt (64 hex) ‖ nonce (32 hex)`, exactly 96 characters |
//! | `checkMsgV3` | `entry ("**" entry)*`, `entry = digest (64 hex) ‖ salt (64 hex) "_" filename` |
//!
//! Both parsers work on the raw bytes of the input, so malformed or
//! non-ASCII strings are rejected with a [`FormatError`] and never cause a
//! slicing panic.

mod check_msg;
mod enc_msg;

pub use check_msg::{EntryNotFound, IntegrityDescriptor, IntegrityEntry, CHECK_PREFIX_LEN};
pub use enc_msg::{EncryptionDescriptor, ENC_MSG_LEN};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("encMsgV3 must be {ENC_MSG_LEN} characters, got {0}")]
    EncMsgLength(usize),
    #[error("checkMsgV3 must be at least {CHECK_PREFIX_LEN} characters, got {0}")]
    CheckMsgTooShort(usize),
    #[error("checkMsgV3 entry {index} must split into <prefix>_<filename>, got {parts} part(s)")]
    EntrySplit { index: usize, parts: usize },
    #[error("checkMsgV3 entry {index} prefix must be {CHECK_PREFIX_LEN} characters, got {len}")]
    PrefixLength { index: usize, len: usize },
    #[error("{field} is not valid hex: {source}")]
    Hex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },
}

/// Decode exactly `2 * N` hex characters into an `N`-byte array.
fn decode_hex_array<const N: usize>(field: &'static str, src: &[u8]) -> Result<[u8; N], FormatError> {
    let mut out = [0u8; N];
    hex::decode_to_slice(src, &mut out).map_err(|source| FormatError::Hex { field, source })?;
    Ok(out)
}
