//! Ordered ASCII/binary metadata multimap (spec §3) and percent-escaping
//! for `grpc-message` values (spec §6).
//!
//! This plays the role `grpcurl-core/src/metadata.rs` played for CLI
//! header strings, but at the wire level: call headers and trailers are
//! built and read through this type rather than through
//! `tonic::metadata::MetadataMap`.

use std::fmt;

/// One metadata entry's value: either a printable ASCII string, or an
/// opaque byte string carried under a `-bin` suffixed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Ascii(Vec<u8>),
    Binary(Vec<u8>),
}

impl MetadataValue {
    pub fn ascii(value: impl Into<Vec<u8>>) -> Self {
        MetadataValue::Ascii(value.into())
    }

    pub fn binary(value: impl Into<Vec<u8>>) -> Self {
        MetadataValue::Binary(value.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MetadataValue::Ascii(v) => v,
            MetadataValue::Binary(v) => v,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, MetadataValue::Binary(_))
    }

    /// Interprets the value as a UTF-8 string, lossily for binary values
    /// (callers that need exact binary bytes should use `as_bytes`).
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

/// An ordered ASCII/binary multimap from header name to value (spec §3).
///
/// Names are stored lowercased (gRPC header names are case-insensitive on
/// the wire and lowercase by convention); a name ending in `-bin` carries a
/// `MetadataValue::Binary`, anything else carries `MetadataValue::Ascii`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Metadata {
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Appends `name: value` to the multimap, preserving prior entries with
    /// the same name (gRPC metadata allows repeated keys).
    pub fn append(&mut self, name: impl Into<String>, value: MetadataValue) {
        let name = name.into().to_ascii_lowercase();
        if name.ends_with("-bin") {
            debug_assert!(value.is_binary(), "'-bin' metadata key must carry a binary value");
        }
        self.entries.push((name, value));
    }

    pub fn append_ascii(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.append(name, MetadataValue::ascii(value));
    }

    pub fn append_binary(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.append(name, MetadataValue::binary(value));
    }

    /// Returns the first value stored under `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&MetadataValue> {
        let name = name.to_ascii_lowercase();
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Returns every value stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MetadataValue> + 'a {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(move |(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn extend(&mut self, other: Metadata) {
        self.entries.extend(other.entries);
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{name}: {}", value.as_str_lossy())?;
        }
        Ok(())
    }
}

/// Percent-escapes a `grpc-message` value per spec §6: bytes outside the
/// printable-ASCII range (and the escape character itself) are replaced
/// with `%XX`.
pub fn percent_encode_message(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if b >= 0x20 && b <= 0x7E && b != b'%' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Reverses `percent_encode_message`. Malformed escapes are passed through
/// literally rather than rejected, matching how gRPC implementations treat
/// `grpc-message` decoding as best-effort.
pub fn percent_decode_message(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &input[i + 1..i + 3];
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_get_ascii() {
        let mut md = Metadata::new();
        md.append_ascii("X-Custom", b"value".to_vec());
        assert_eq!(md.get("x-custom").unwrap().as_bytes(), b"value");
    }

    #[test]
    fn names_are_lowercased() {
        let mut md = Metadata::new();
        md.append_ascii("Authorization", b"Bearer x".to_vec());
        assert!(md.get("authorization").is_some());
        assert_eq!(md.iter().next().unwrap().0, "authorization");
    }

    #[test]
    fn repeated_keys_preserve_order() {
        let mut md = Metadata::new();
        md.append_ascii("x-trace", b"first".to_vec());
        md.append_ascii("x-trace", b"second".to_vec());
        let values: Vec<_> = md.get_all("x-trace").map(|v| v.as_bytes().to_vec()).collect();
        assert_eq!(values, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn binary_values_round_trip() {
        let mut md = Metadata::new();
        md.append_binary("x-data-bin", vec![0xff, 0x00, 0x10]);
        let value = md.get("x-data-bin").unwrap();
        assert!(value.is_binary());
        assert_eq!(value.as_bytes(), &[0xff, 0x00, 0x10]);
    }

    #[test]
    fn percent_encode_round_trips_ascii_message() {
        let message = "method not found";
        let encoded = percent_encode_message(message);
        assert_eq!(encoded, message);
        assert_eq!(percent_decode_message(&encoded), message);
    }

    #[test]
    fn percent_encode_escapes_non_printable_and_percent() {
        let message = "100% done\nnext";
        let encoded = percent_encode_message(message);
        assert!(encoded.contains("%25"));
        assert!(encoded.contains("%0A"));
        assert_eq!(percent_decode_message(&encoded), message);
    }

    #[test]
    fn percent_decode_passes_through_malformed_escape() {
        assert_eq!(percent_decode_message("100%ZZ"), "100%ZZ");
    }
}
