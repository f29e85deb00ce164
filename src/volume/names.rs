//! LVM Name Encoding
//!
//! LVM accepts only `[A-Za-z0-9._-]` in group and volume names and reserves a
//! few volume name patterns for its internal volumes. User-supplied names are
//! encoded so that anything else survives a round trip through LVM: each
//! disallowed byte becomes `+xx` (lowercase hex), and names LVM would refuse
//! get a `+_` prefix.

use crate::domain::ports::NameCodec;

/// Escape character used by the encoding
const ESCAPE: u8 = b'+';

/// Prefix that marks a name encoded to avoid a reserved pattern
const RESERVED_PREFIX: &str = "+_";

/// Substrings LVM reserves inside logical volume names
const RESERVED_VOLUME_INFIXES: &[&str] = &[
    "_cdata", "_cmeta", "_corig", "_mlog", "_mimage", "_pmspare", "_rimage", "_rmeta", "_tdata",
    "_tmeta", "_vorigin",
];

/// Prefixes LVM reserves for logical volume names
const RESERVED_VOLUME_PREFIXES: &[&str] = &["pvmove", "snapshot"];

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-')
}

fn is_reserved(name: &str, for_volume: bool) -> bool {
    if name == "." || name == ".." || name.starts_with('-') {
        return true;
    }
    for_volume
        && (RESERVED_VOLUME_PREFIXES.iter().any(|p| name.starts_with(p))
            || RESERVED_VOLUME_INFIXES.iter().any(|i| name.contains(i)))
}

/// Name codec implementing LVM's naming rules
#[derive(Debug, Default, Clone, Copy)]
pub struct LvmNames;

impl NameCodec for LvmNames {
    fn encode(&self, name: &str, for_volume: bool) -> String {
        let mut encoded = String::with_capacity(name.len());
        for &b in name.as_bytes() {
            if is_name_byte(b) {
                encoded.push(b as char);
            } else {
                encoded.push_str(&format!("+{:02x}", b));
            }
        }
        if is_reserved(&encoded, for_volume) {
            encoded.insert_str(0, RESERVED_PREFIX);
        }
        encoded
    }

    fn decode(&self, name: &str) -> String {
        let bytes = name
            .strip_prefix(RESERVED_PREFIX)
            .unwrap_or(name)
            .as_bytes();
        let mut decoded = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == ESCAPE {
                let value = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(value) = value {
                    decoded.push(value);
                    i += 3;
                    continue;
                }
            }
            decoded.push(bytes[i]);
            i += 1;
        }
        String::from_utf8_lossy(&decoded).into_owned()
    }
}
