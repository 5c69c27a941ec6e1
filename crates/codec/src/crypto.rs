use base64::{Engine, prelude::BASE64_STANDARD};
use md5::{Digest, Md5};
use rand::Rng;
use sha1::Sha1;

/// Appended to the client key before hashing in the opening handshake.
pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }

    hex
}

/// MD5 of the parts joined with `:`, as lowercase hex.
///
/// # Test
///
/// ```
/// use wshost_codec::crypto::md5_hex;
///
/// assert_eq!(md5_hex(&["a"]), "0cc175b9c0f1b6a831c399e269772661");
/// assert_eq!(md5_hex(&["a", "b"]), md5_hex(&["a:b"]));
/// ```
pub fn md5_hex(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }

        hasher.update(part.as_bytes());
    }

    to_hex(&hasher.finalize())
}

/// Computes `Sec-WebSocket-Accept` for a `Sec-WebSocket-Key`.
///
/// # Test
///
/// ```
/// use wshost_codec::crypto::accept_key;
///
/// assert_eq!(
///     accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// A fresh base64 encoded 16 byte `Sec-WebSocket-Key`.
pub fn create_key() -> String {
    let mut key = [0u8; 16];
    rand::rng().fill(&mut key);
    BASE64_STANDARD.encode(key)
}

/// A handshake key is valid when it decodes to exactly 16 bytes.
pub fn is_valid_key(key: &str) -> bool {
    BASE64_STANDARD
        .decode(key.trim())
        .map(|bytes| bytes.len() == 16)
        .unwrap_or(false)
}

pub fn masking_key() -> [u8; 4] {
    rand::rng().random()
}

/// 32 random hex digits, used for nonces and session ids.
pub fn random_hex() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    to_hex(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_valid() {
        assert!(is_valid_key(&create_key()));
        assert!(!is_valid_key("c2hvcnQ="));
        assert!(!is_valid_key("not base64!"));
    }

    #[test]
    fn random_hex_shape() {
        let value = random_hex();
        assert_eq!(value.len(), 32);
        assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(value, random_hex());
    }
}
