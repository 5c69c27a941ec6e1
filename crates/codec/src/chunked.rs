//! Chunked transfer coding.
//!
//! ```text
//! chunked-body   = *chunk
//!                  last-chunk
//!                  trailer
//!                  CRLF
//!
//! chunk          = chunk-size [ chunk-extension ] CRLF
//!                  chunk-data CRLF
//! last-chunk     = 1*("0") [ chunk-extension ] CRLF
//! ```

use bytes::{BufMut, BytesMut};

use crate::{Error, http::LineScanner};

/// Longest chunk size line accepted, extensions included.
const MAX_SIZE_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data,
    DataEnd,
    Trailer,
    Done,
}

/// Incremental decoder for a chunked body.
///
/// # Test
///
/// ```
/// use wshost_codec::chunked::ChunkDecoder;
///
/// let mut decoder = ChunkDecoder::default();
/// let mut output = Vec::new();
///
/// let input = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
/// let size = decoder.decode(input, &mut output).unwrap();
///
/// assert_eq!(size, input.len());
/// assert!(decoder.is_done());
/// assert_eq!(output, b"Wikipedia");
/// ```
#[derive(Debug)]
pub struct ChunkDecoder {
    state: State,
    remaining: usize,
    scanner: LineScanner,
    line_size: usize,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self {
            state: State::Size,
            remaining: 0,
            scanner: LineScanner::default(),
            line_size: 0,
        }
    }
}

impl ChunkDecoder {
    /// Decodes as much of the input as possible, appending chunk data to
    /// the output.
    ///
    /// Returns the number of bytes consumed. Nothing past the end of the
    /// body is consumed, so bytes of a following request stay untouched.
    pub fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<usize, Error> {
        let mut offset = 0;

        while offset < input.len() && self.state != State::Done {
            match self.state {
                State::Size => {
                    let (size, line) = self.scan_line(&input[offset..])?;
                    offset += size;

                    if let Some(line) = line {
                        self.remaining = parse_size(&line)?;
                        self.state = if self.remaining == 0 {
                            State::Trailer
                        } else {
                            State::Data
                        };
                    }
                }
                State::Data => {
                    let size = self.remaining.min(input.len() - offset);
                    output.extend_from_slice(&input[offset..offset + size]);
                    offset += size;
                    self.remaining -= size;

                    if self.remaining == 0 {
                        self.state = State::DataEnd;
                    }
                }
                State::DataEnd => {
                    let (size, line) = self.scan_line(&input[offset..])?;
                    offset += size;

                    match line {
                        Some(line) if line.is_empty() => self.state = State::Size,
                        Some(_) => return Err(Error::InvalidChunk("missing CRLF after chunk data")),
                        None => (),
                    }
                }
                State::Trailer => {
                    let (size, line) = self.scan_line(&input[offset..])?;
                    offset += size;

                    if line.is_some_and(|line| line.is_empty()) {
                        self.state = State::Done;
                    }
                }
                State::Done => (),
            }
        }

        Ok(offset)
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn scan_line(&mut self, input: &[u8]) -> Result<(usize, Option<String>), Error> {
        let (size, line) = self.scanner.scan(input);
        self.line_size += size;
        if self.line_size > MAX_SIZE_LINE {
            return Err(Error::InvalidChunk("line too long"));
        }

        if line.is_some() {
            self.line_size = 0;
        }

        Ok((size, line))
    }
}

fn parse_size(line: &str) -> Result<usize, Error> {
    let size = line.split(';').next().unwrap_or_default().trim();
    if size.is_empty() {
        return Err(Error::InvalidChunk("empty chunk size"));
    }

    usize::from_str_radix(size, 16).map_err(|_| Error::InvalidChunk("invalid chunk size"))
}

/// Writes one chunk. An empty slice writes the last chunk.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use wshost_codec::chunked::encode_chunk;
///
/// let mut buf = BytesMut::new();
/// encode_chunk(b"Wikipedia", &mut buf);
/// encode_chunk(b"", &mut buf);
///
/// assert_eq!(&buf[..], b"9\r\nWikipedia\r\n0\r\n\r\n");
/// ```
pub fn encode_chunk(data: &[u8], buf: &mut BytesMut) {
    buf.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_by_byte() {
        let input = b"4;name=value\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: 1\r\n\r\nNEXT";
        let mut decoder = ChunkDecoder::default();
        let mut output = Vec::new();
        let mut consumed = 0;

        for byte in input.iter() {
            if decoder.is_done() {
                break;
            }

            consumed += decoder.decode(std::slice::from_ref(byte), &mut output).unwrap();
        }

        assert!(decoder.is_done());
        assert_eq!(output, b"Wikipedia");
        assert_eq!(&input[consumed..], b"NEXT");
    }

    #[test]
    fn invalid_size() {
        let mut decoder = ChunkDecoder::default();
        assert!(decoder.decode(b"zz\r\n", &mut Vec::new()).is_err());
    }

    #[test]
    fn missing_crlf_after_data() {
        let mut decoder = ChunkDecoder::default();
        assert!(decoder.decode(b"2\r\nabX\r\n", &mut Vec::new()).is_err());
    }
}
