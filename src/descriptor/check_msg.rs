use std::str::FromStr;

use thiserror::Error;

use super::{decode_hex_array, FormatError};
use crate::crypto::DIGEST_LEN;
use crate::kdf::SALT_LEN;

/// Length of the hex prefix (`digest ‖ salt`) that opens every entry.
pub const CHECK_PREFIX_LEN: usize = 2 * (DIGEST_LEN + SALT_LEN);

const ENTRY_SEPARATOR: &str = "**";
const NAME_SEPARATOR: char = '_';

/// Expected HMAC digest and verification salt for one archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityEntry {
    pub expected_digest: [u8; DIGEST_LEN],
    pub salt:            [u8; SALT_LEN],
    /// Base name of the member file, e.g. `com.tencent.mm514.tar`.
    pub member_name:     String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no integrity entry for member '{0}'")]
pub struct EntryNotFound(pub String);

/// All entries of a `checkMsgV3` string, in the order they appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityDescriptor {
    entries: Vec<IntegrityEntry>,
}

impl IntegrityDescriptor {
    pub fn parse(raw: &str) -> Result<Self, FormatError> {
        if raw.len() < CHECK_PREFIX_LEN {
            return Err(FormatError::CheckMsgTooShort(raw.len()));
        }

        let entries = raw
            .split(ENTRY_SEPARATOR)
            .enumerate()
            .map(|(index, piece)| parse_entry(index, piece))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { entries })
    }

    /// Build a one-entry descriptor from a bare `digest ‖ salt` prefix.
    ///
    /// Lets a caller check a single file whose name is known out of band,
    /// including names that contain `_`.
    pub fn single(prefix: &str, member_name: &str) -> Result<Self, FormatError> {
        let entry = parse_prefix(0, prefix, member_name)?;
        Ok(Self { entries: vec![entry] })
    }

    /// Find the entry for `member_name` (exact, case-sensitive base name).
    ///
    /// Duplicate names are kept as parsed; the last one wins.
    pub fn lookup(&self, member_name: &str) -> Result<&IntegrityEntry, EntryNotFound> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.member_name == member_name)
            .ok_or_else(|| EntryNotFound(member_name.to_owned()))
    }

    pub fn entries(&self) -> &[IntegrityEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IntegrityEntry> {
        self.entries.iter()
    }
}

impl FromStr for IntegrityDescriptor {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'a> IntoIterator for &'a IntegrityDescriptor {
    type Item = &'a IntegrityEntry;
    type IntoIter = std::slice::Iter<'a, IntegrityEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn parse_entry(index: usize, piece: &str) -> Result<IntegrityEntry, FormatError> {
    let parts: Vec<&str> = piece.split(NAME_SEPARATOR).collect();
    let &[prefix, name] = parts.as_slice() else {
        return Err(FormatError::EntrySplit { index, parts: parts.len() });
    };
    parse_prefix(index, prefix, name)
}

fn parse_prefix(index: usize, prefix: &str, name: &str) -> Result<IntegrityEntry, FormatError> {
    let prefix = prefix.as_bytes();
    if prefix.len() != CHECK_PREFIX_LEN {
        return Err(FormatError::PrefixLength { index, len: prefix.len() });
    }
    let (digest_hex, salt_hex) = prefix.split_at(2 * DIGEST_LEN);

    Ok(IntegrityEntry {
        expected_digest: decode_hex_array("checkMsgV3 digest", digest_hex)?,
        salt:            decode_hex_array("checkMsgV3 salt", salt_hex)?,
        member_name:     name.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn prefix(digest: u8, salt: u8) -> String {
        format!("{}{}", hex::encode([digest; 32]), hex::encode([salt; 32]))
    }

    fn entry(digest: u8, salt: u8, name: &str) -> String {
        format!("{}_{name}", prefix(digest, salt))
    }

    #[test]
    fn parses_single_entry() {
        let raw = entry(0xaa, 0xbb, "com.tencent.mm514.tar");
        let d = IntegrityDescriptor::parse(&raw).unwrap();
        assert_eq!(d.len(), 1);
        let e = &d.entries()[0];
        assert_eq!(e.expected_digest, [0xaa; 32]);
        assert_eq!(e.salt, [0xbb; 32]);
        assert_eq!(e.member_name, "com.tencent.mm514.tar");
    }

    #[test]
    fn parses_entries_in_order() {
        let raw = [entry(1, 2, "a.tar"), entry(3, 4, "b.tar"), entry(5, 6, "c.tar")].join("**");
        let d = IntegrityDescriptor::parse(&raw).unwrap();
        let names: Vec<_> = d.iter().map(|e| e.member_name.as_str()).collect();
        assert_eq!(names, ["a.tar", "b.tar", "c.tar"]);
        assert_eq!(d.lookup("b.tar").unwrap().salt, [4; 32]);
    }

    #[test]
    fn duplicate_names_resolve_to_last_entry() {
        let raw = [entry(1, 1, "dup.tar"), entry(2, 2, "other.tar"), entry(3, 3, "dup.tar")].join("**");
        let d = IntegrityDescriptor::parse(&raw).unwrap();
        assert_eq!(d.len(), 3);
        let hit = d.lookup("dup.tar").unwrap();
        assert_eq!(hit.expected_digest, [3; 32]);
        assert_eq!(hit.salt, [3; 32]);
    }

    #[test]
    fn lookup_miss_is_not_found() {
        let d = IntegrityDescriptor::parse(&entry(1, 1, "a.tar")).unwrap();
        assert_eq!(d.lookup("A.tar"), Err(EntryNotFound("A.tar".into())));
        assert_eq!(d.lookup("dir/a.tar"), Err(EntryNotFound("dir/a.tar".into())));
    }

    #[test]
    fn single_accepts_bare_prefix() {
        let d = IntegrityDescriptor::single(&prefix(7, 8), "com.app_data.tar").unwrap();
        let e = d.lookup("com.app_data.tar").unwrap();
        assert_eq!(e.expected_digest, [7; 32]);
        assert_eq!(e.salt, [8; 32]);
        assert_eq!(
            IntegrityDescriptor::single(&prefix(7, 8)[..126], "a.tar"),
            Err(FormatError::PrefixLength { index: 0, len: 126 })
        );
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(IntegrityDescriptor::parse(""), Err(FormatError::CheckMsgTooShort(0)));
        assert_eq!(
            IntegrityDescriptor::parse(&prefix(0, 0)[..127]),
            Err(FormatError::CheckMsgTooShort(127))
        );
    }

    #[test]
    fn rejects_underscore_in_filename() {
        let raw = entry(1, 1, "com.app_data.tar");
        assert_eq!(
            IntegrityDescriptor::parse(&raw),
            Err(FormatError::EntrySplit { index: 0, parts: 3 })
        );
    }

    #[test]
    fn rejects_entry_without_filename() {
        let raw = format!("{}**{}", entry(1, 1, "a.tar"), prefix(2, 2));
        assert_eq!(
            IntegrityDescriptor::parse(&raw),
            Err(FormatError::EntrySplit { index: 1, parts: 1 })
        );
    }

    #[test]
    fn rejects_bad_prefix_length() {
        let raw = format!("{}00_a.tar", prefix(1, 1));
        assert_eq!(
            IntegrityDescriptor::parse(&raw),
            Err(FormatError::PrefixLength { index: 0, len: 130 })
        );
    }

    #[test]
    fn rejects_non_hex_prefix() {
        let mut raw = entry(1, 1, "a.tar");
        raw.replace_range(100..101, "x");
        assert!(matches!(
            IntegrityDescriptor::parse(&raw),
            Err(FormatError::Hex { field: "checkMsgV3 salt", .. })
        ));
    }

    proptest! {
        #[test]
        fn never_panics(s in "\\PC{0,400}") {
            let _ = IntegrityDescriptor::parse(&s);
        }

        #[test]
        fn valid_entries_parse(
            prefixes in proptest::collection::vec("[0-9a-f]{128}", 1..5),
            names in proptest::collection::vec("[a-z0-9.]{1,20}", 5),
        ) {
            let raw = prefixes
                .iter()
                .zip(&names)
                .map(|(p, n)| format!("{p}_{n}"))
                .collect::<Vec<_>>()
                .join("**");
            let d = IntegrityDescriptor::parse(&raw).unwrap();
            prop_assert_eq!(d.len(), prefixes.len());
            for (e, p) in d.iter().zip(&prefixes) {
                prop_assert_eq!(hex::encode(e.expected_digest), &p[..64]);
                prop_assert_eq!(hex::encode(e.salt), &p[64..]);
            }
        }
    }
}
