//! [ResourceKey] is the identity of a cacheable resource, derived from its source URI.
//!
//! Keys are the lowercase hex SHA-256 of the normalized URI, which makes them stable across runs and processes and
//! safe to use as file names in a persistent store.
use std::borrow::{Borrow, Cow};
use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// Compute the key for a URI.
    pub fn from_uri(uri: &str) -> ResourceKey {
        let normalized = normalize_uri(uri);
        let digest = Sha256::digest(normalized.as_bytes());
        let mut hex = String::with_capacity(digest.len() * 2);
        for b in digest.iter() {
            write!(hex, "{:02x}", b).expect("Writing to a String can't fail");
        }
        ResourceKey(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Normalize a URI so that trivially different spellings of the same resource share a key.
///
/// Absolute URLs go through the `url` crate, which lowercases the scheme and host, drops default ports and fills in
/// an empty path.  Anything which doesn't parse is only trimmed.
pub fn normalize_uri(uri: &str) -> Cow<'_, str> {
    let trimmed = uri.trim();
    match url::Url::parse(trimmed) {
        Ok(parsed) => Cow::Owned(parsed.into()),
        Err(_) => Cow::Borrowed(trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic() {
        let a = ResourceKey::from_uri("https://example.com/a.png");
        let b = ResourceKey::from_uri("https://example.com/a.png");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(a, ResourceKey::from_uri("https://example.com/b.png"));
    }

    #[test]
    fn test_normalization() {
        let canonical = ResourceKey::from_uri("http://example.com/a.png");
        assert_eq!(
            canonical,
            ResourceKey::from_uri("  HTTP://Example.COM:80/a.png ")
        );
        assert_eq!(normalize_uri("http://example.com"), "http://example.com/");

        // Not a URL, so only trimmed.
        assert_eq!(normalize_uri(" images/a.png "), "images/a.png");
        assert_eq!(
            ResourceKey::from_uri("images/a.png"),
            ResourceKey::from_uri("images/a.png\n")
        );
    }

    #[test]
    fn test_known_digest() {
        // sha256("abc"), which isn't a URL and so is hashed verbatim.
        assert_eq!(
            ResourceKey::from_uri("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
