//! Cache key helpers.
//!
//! Keys are opaque to the archive engine. They only need translating where a
//! backend stores them as file names.

use stash_core::ArchiveFormat;
use std::fmt::Write;

/// Escape a key into a single file name.
///
/// ASCII letters, digits, `-` and `_` pass through; every other byte becomes
/// `%XX`. The mapping is injective, so distinct keys never share a file.
/// The empty key maps to a lone `%`, which no other key can produce.
pub fn escape_key(key: &str) -> String {
    if key.is_empty() {
        return "%".to_string();
    }
    let mut escaped = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            escaped.push(byte as char);
        } else {
            let _ = write!(escaped, "%{:02X}", byte);
        }
    }
    escaped
}

/// File name used when staging an archive for `key` locally.
pub fn staged_name(key: &str, format: ArchiveFormat) -> String {
    format!("{}.{}", escape_key(key), format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("my/cache/key"), "my%2Fcache%2Fkey");
        assert_eq!(escape_key("cache:key"), "cache%3Akey");
        assert_eq!(escape_key("line\nbreak"), "line%0Abreak");
        assert_eq!(escape_key("deps-v1_linux"), "deps-v1_linux");
    }

    #[test]
    fn test_escape_is_injective() {
        assert_ne!(escape_key("feature/x"), escape_key("feature_x"));
        assert_ne!(escape_key("a%2Fb"), escape_key("a/b"));
        assert_ne!(escape_key(""), escape_key("%"));
    }

    #[test]
    fn test_escape_reserved_names() {
        assert_eq!(escape_key(""), "%");
        assert_eq!(escape_key("."), "%2E");
        assert_eq!(escape_key(".."), "%2E%2E");
        assert_eq!(escape_key("é"), "%C3%A9");
    }

    #[test]
    fn test_staged_name() {
        assert_eq!(
            staged_name("deps/linux", ArchiveFormat::Tar),
            "deps%2Flinux.tar.gz"
        );
        assert_eq!(staged_name("blob", ArchiveFormat::Stream), "blob.gz");
    }
}
