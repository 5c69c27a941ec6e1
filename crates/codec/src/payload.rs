use bytes::{BufMut, Bytes, BytesMut};

use crate::close::CloseCode;

/// The largest payload a frame may declare.
pub const MAX_LENGTH: u64 = i64::MAX as u64;

/// Applies the masking algorithm in place.
///
/// Octet `i` of the data is XORed with octet `i % 4` of the key, so masking
/// twice with the same key restores the input.
///
/// # Test
///
/// ```
/// use wshost_codec::payload::mask;
///
/// let key = [0x37, 0xfa, 0x21, 0x3d];
/// let mut data = *b"Hello";
///
/// mask(&mut data, key);
/// assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
///
/// mask(&mut data, key);
/// assert_eq!(&data, b"Hello");
/// ```
pub fn mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// The application bytes of a frame.
///
/// A payload may start with extension data whose length is negotiated out
/// of band; the rest is application data. For close frames the first two
/// bytes are a big-endian status code followed by a UTF-8 reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadData {
    data: Bytes,
    extension_len: usize,
}

impl PayloadData {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            extension_len: 0,
        }
    }

    pub fn with_extension(data: impl Into<Bytes>, extension_len: usize) -> Self {
        let data = data.into();
        let extension_len = extension_len.min(data.len());
        Self {
            data,
            extension_len,
        }
    }

    /// Builds a close payload.
    ///
    /// # Test
    ///
    /// ```
    /// use wshost_codec::{CloseCode, PayloadData};
    ///
    /// let payload = PayloadData::close(CloseCode::AWAY, "bye");
    ///
    /// assert_eq!(payload.as_bytes(), &[0x03, 0xe9, b'b', b'y', b'e']);
    /// assert_eq!(payload.code(), CloseCode::AWAY);
    /// assert_eq!(payload.reason(), "bye");
    /// assert_eq!(PayloadData::default().code(), CloseCode::NO_STATUS);
    /// ```
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut bytes = BytesMut::with_capacity(2 + reason.len());
        bytes.put_u16(code.0);
        bytes.put_slice(reason.as_bytes());
        Self::new(bytes.freeze())
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn extension_data(&self) -> &[u8] {
        &self.data[..self.extension_len]
    }

    pub fn application_data(&self) -> &[u8] {
        &self.data[self.extension_len..]
    }

    /// The close status, or 1005 when the payload is too short to hold one.
    pub fn code(&self) -> CloseCode {
        if self.data.len() < 2 {
            return CloseCode::NO_STATUS;
        }

        CloseCode(u16::from_be_bytes([self.data[0], self.data[1]]))
    }

    pub fn has_code(&self) -> bool {
        self.data.len() >= 2
    }

    pub fn reason(&self) -> String {
        if self.data.len() <= 2 {
            return String::new();
        }

        String::from_utf8_lossy(&self.data[2..]).into_owned()
    }

    /// Whether a status code is present and is one of the reserved codes.
    pub fn has_reserved_code(&self) -> bool {
        self.has_code() && self.code().is_reserved()
    }
}

impl From<Bytes> for PayloadData {
    fn from(value: Bytes) -> Self {
        Self::new(value)
    }
}

impl From<Vec<u8>> for PayloadData {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_split() {
        let payload = PayloadData::with_extension(&b"extapp"[..], 3);
        assert_eq!(payload.extension_data(), b"ext");
        assert_eq!(payload.application_data(), b"app");

        let clamped = PayloadData::with_extension(&b"ab"[..], 8);
        assert_eq!(clamped.application_data(), b"");
    }

    #[test]
    fn reserved_code_needs_a_code() {
        assert!(!PayloadData::default().has_reserved_code());
        assert!(PayloadData::close(CloseCode::ABNORMAL, "").has_reserved_code());
        assert!(!PayloadData::close(CloseCode::NORMAL, "").has_reserved_code());
        assert_eq!(PayloadData::new(vec![0x03]).reason(), "");
    }
}
