//! Per-message compression.
//!
//! Messages are compressed as raw DEFLATE streams. The extension is
//! negotiated through the `Sec-WebSocket-Extensions` header using the
//! `permessage-deflate` token.

use std::io::Write;

use flate2::{Compression, Decompress, FlushDecompress, Status, write::DeflateEncoder};

use crate::Error;

/// The tail a sender strips from a sync-flushed block, restored before
/// inflating.
const SYNC_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Output is inflated this many bytes at a time.
const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    #[default]
    None,
    Deflate,
}

impl CompressionMethod {
    /// Extension token for this method, empty for `None`.
    pub fn extension_token(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Deflate => "permessage-deflate",
        }
    }

    /// # Test
    ///
    /// ```
    /// use wshost_codec::compression::CompressionMethod;
    ///
    /// assert_eq!(
    ///     CompressionMethod::Deflate.to_extension_string(&["server_no_context_takeover"]),
    ///     "permessage-deflate; server_no_context_takeover"
    /// );
    /// assert_eq!(CompressionMethod::None.to_extension_string(&["x"]), "");
    /// ```
    pub fn to_extension_string(&self, params: &[&str]) -> String {
        if *self == Self::None {
            return String::new();
        }

        let mut value = self.extension_token().to_string();
        for param in params {
            value.push_str("; ");
            value.push_str(param);
        }

        value
    }

    /// Parses one comma separated element of the extensions header.
    pub fn from_extension(value: &str) -> Self {
        match value.split(';').next().map(str::trim) {
            Some(token) if token.eq_ignore_ascii_case("permessage-deflate") => Self::Deflate,
            _ => Self::None,
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Deflate => compress(data),
        }
    }

    pub fn decompress(&self, data: &[u8], max_length: u64) -> Result<Vec<u8>, Error> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Deflate => decompress(data, max_length),
        }
    }
}

/// Compresses a message into a final raw DEFLATE block.
///
/// A single zero octet follows the final block so the output also inflates
/// cleanly on peers that append the sync tail unconditionally.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, Error> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len()), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(e.to_string()))?;

    let mut output = encoder
        .finish()
        .map_err(|e| Error::Compression(e.to_string()))?;

    output.push(0x00);
    Ok(output)
}

/// Inflates a message of at most `max_length` bytes.
///
/// Accepts streams ending with a final block as well as sync-flushed
/// streams whose tail was stripped by the sender. Inflating stops with
/// `PayloadTooBig` as soon as the output passes `max_length`.
///
/// # Test
///
/// ```
/// use wshost_codec::compression::{compress, decompress};
///
/// let data = b"Hello, Hello, Hello, Hello";
/// let compressed = compress(data).unwrap();
///
/// assert_eq!(decompress(&compressed, u64::MAX).unwrap(), data);
/// assert!(decompress(&compressed, 10).is_err());
///
/// // "Hello" compressed by a browser, sync tail removed
/// let browser = [0xf2, 0x48, 0xcd, 0xc9, 0xc9, 0x07, 0x00];
/// assert_eq!(decompress(&browser, 5).unwrap(), b"Hello");
/// ```
pub fn decompress(data: &[u8], max_length: u64) -> Result<Vec<u8>, Error> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut input = Vec::with_capacity(data.len() + SYNC_TAIL.len());
    input.extend_from_slice(data);
    input.extend_from_slice(&SYNC_TAIL);

    let mut inflater = Decompress::new(false);
    let mut output = Vec::with_capacity((data.len() * 2).min(max_length.min(1 << 20) as usize));
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();
        let status = inflater
            .decompress(&input[consumed..], &mut chunk, FlushDecompress::Sync)
            .map_err(|e| Error::Compression(e.to_string()))?;

        let size = (inflater.total_out() - produced) as usize;
        output.extend_from_slice(&chunk[..size]);

        if output.len() as u64 > max_length {
            return Err(Error::PayloadTooBig {
                len: output.len() as u64,
                max: max_length,
            });
        }

        if status == Status::StreamEnd {
            break;
        }

        // a chunk that was not filled up means the inflater has nothing
        // left to give for the input it has seen
        if inflater.total_in() as usize >= input.len() && size < chunk.len() {
            break;
        }

        if size == 0 && inflater.total_in() as usize == consumed {
            break;
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_token() {
        assert_eq!(
            CompressionMethod::from_extension(" permessage-deflate; client_max_window_bits"),
            CompressionMethod::Deflate
        );
        assert_eq!(
            CompressionMethod::from_extension("x-webkit-deflate-frame"),
            CompressionMethod::None
        );
    }

    #[test]
    fn large_message() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let compressed = compress(&data).unwrap();

        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed, data.len() as u64).unwrap(), data);
    }

    #[test]
    fn inflating_stops_at_the_limit() {
        let data = vec![0u8; 50_000_000];
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < 100_000);

        match decompress(&compressed, 1024) {
            Err(Error::PayloadTooBig { len, max }) => {
                assert_eq!(max, 1024);
                assert!(len <= 1024 + CHUNK_SIZE as u64, "inflated {len} bytes");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_passes_through() {
        assert!(compress(&[]).unwrap().is_empty());
        assert!(decompress(&[], 0).unwrap().is_empty());
    }
}
