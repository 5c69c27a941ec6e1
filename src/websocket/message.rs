//! Turning frames into messages.

use std::io::{Error as IoError, ErrorKind};

use bytes::{Buf, Bytes, BytesMut};
use codec::{
    Error, Frame, Message, Opcode, PayloadData, compression::CompressionMethod,
};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::WebSocketError;

/// What one frame amounts to.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Message(Message),
    Ping(PayloadData),
    Pong(PayloadData),
    Close(PayloadData),
    /// A fragment of a message that is not complete yet.
    Nothing,
}

struct Pending {
    opcode: Opcode,
    compressed: bool,
    data: BytesMut,
}

/// Reassembles fragmented messages.
///
/// Control frames may arrive between the fragments of a message; they are
/// returned right away and leave the pending message alone.
pub struct Assembler {
    compression: CompressionMethod,
    max_length: u64,
    pending: Option<Pending>,
}

impl Assembler {
    pub fn new(compression: CompressionMethod, max_length: u64) -> Self {
        Self {
            compression,
            max_length,
            pending: None,
        }
    }

    pub fn push(&mut self, frame: Frame) -> Result<Received, Error> {
        if frame.rsv2 || frame.rsv3 {
            return Err(Error::UnexpectedFrame("reserved bits are set"));
        }

        if frame.rsv1 && self.compression == CompressionMethod::None {
            return Err(Error::UnexpectedFrame("compression was not negotiated"));
        }

        match frame.opcode {
            Opcode::Ping => Ok(Received::Ping(frame.payload)),
            Opcode::Pong => Ok(Received::Pong(frame.payload)),
            Opcode::Close => {
                let payload = frame.payload;
                if payload.len() == 1 {
                    return Err(Error::UnexpectedFrame("close payload of one byte"));
                }

                if payload.len() > 2 && std::str::from_utf8(&payload.as_bytes()[2..]).is_err() {
                    return Err(Error::InvalidText);
                }

                Ok(Received::Close(payload))
            }
            Opcode::Text | Opcode::Binary => {
                if self.pending.is_some() {
                    return Err(Error::UnexpectedFrame("a message started inside another one"));
                }

                let data = frame.payload.into_bytes();
                if frame.fin == codec::Fin::Final {
                    return self.finish(frame.opcode, frame.rsv1, data);
                }

                self.pending = Some(Pending {
                    opcode: frame.opcode,
                    compressed: frame.rsv1,
                    data: BytesMut::from(&data[..]),
                });

                Ok(Received::Nothing)
            }
            Opcode::Continuation => {
                let pending = self
                    .pending
                    .as_mut()
                    .ok_or(Error::UnexpectedFrame("continuation without a message"))?;

                let len = pending.data.len() as u64 + frame.payload.len();
                if len > self.max_length {
                    return Err(Error::PayloadTooBig {
                        len,
                        max: self.max_length,
                    });
                }

                pending.data.extend_from_slice(frame.payload.as_bytes());
                if frame.fin == codec::Fin::More {
                    return Ok(Received::Nothing);
                }

                match self.pending.take() {
                    Some(pending) => self.finish(pending.opcode, pending.compressed, pending.data.freeze()),
                    None => Ok(Received::Nothing),
                }
            }
        }
    }

    fn finish(&self, opcode: Opcode, compressed: bool, data: Bytes) -> Result<Received, Error> {
        let data = if compressed {
            Bytes::from(self.compression.decompress(&data, self.max_length)?)
        } else {
            data
        };

        if data.len() as u64 > self.max_length {
            return Err(Error::PayloadTooBig {
                len: data.len() as u64,
                max: self.max_length,
            });
        }

        Ok(Received::Message(match opcode {
            Opcode::Text => Message::Text(String::from_utf8(data.to_vec()).map_err(|_| Error::InvalidText)?),
            _ => Message::Binary(data),
        }))
    }
}

/// Reads whole frames from a stream.
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
    max_length: u64,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// `buffer` holds bytes already read from the stream.
    pub fn new(reader: R, buffer: BytesMut, max_length: u64) -> Self {
        Self {
            reader,
            buffer,
            max_length,
        }
    }

    /// The next frame, unmasked.
    ///
    /// The stream ending between frames is an unexpected EOF, inside the
    /// two header bytes a truncated header, anywhere else an underread.
    pub async fn next(&mut self) -> Result<Frame, WebSocketError> {
        loop {
            if let Some((frame, size)) = Frame::decode(&self.buffer, self.max_length)? {
                self.buffer.advance(size);
                return Ok(frame);
            }

            self.buffer.reserve(4096);
            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                return Err(match self.buffer.len() {
                    0 => IoError::new(ErrorKind::UnexpectedEof, "the connection was closed").into(),
                    1 => Error::TruncatedHeader.into(),
                    _ => Error::Underread.into(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use codec::Fin;

    fn text(fin: Fin, opcode: Opcode, data: &str) -> Frame {
        Frame::new(fin, opcode, data.as_bytes().to_vec(), false, true)
    }

    #[test]
    fn control_frames_interleave_fragments() {
        let mut assembler = Assembler::new(CompressionMethod::None, u64::MAX);

        assert_eq!(assembler.push(text(Fin::More, Opcode::Text, "He")).unwrap(), Received::Nothing);
        assert_eq!(
            assembler.push(Frame::ping(b"?".to_vec(), true)).unwrap(),
            Received::Ping(PayloadData::new(b"?".to_vec()))
        );
        assert_eq!(
            assembler.push(text(Fin::More, Opcode::Continuation, "ll")).unwrap(),
            Received::Nothing
        );
        assert_eq!(
            assembler.push(text(Fin::Final, Opcode::Continuation, "o")).unwrap(),
            Received::Message(Message::Text("Hello".to_string()))
        );
    }

    #[test]
    fn continuation_rules() {
        let mut assembler = Assembler::new(CompressionMethod::None, u64::MAX);
        assert!(assembler.push(text(Fin::Final, Opcode::Continuation, "x")).is_err());

        assembler.push(text(Fin::More, Opcode::Binary, "x")).unwrap();
        assert!(assembler.push(text(Fin::Final, Opcode::Text, "y")).is_err());
    }

    #[test]
    fn invalid_text_and_size() {
        let mut assembler = Assembler::new(CompressionMethod::None, 4);

        let invalid = Frame::new(Fin::Final, Opcode::Text, vec![0xff, 0xfe], false, false);
        assert!(matches!(assembler.push(invalid), Err(Error::InvalidText)));

        assembler.push(text(Fin::More, Opcode::Text, "abc")).unwrap();
        assert!(matches!(
            assembler.push(text(Fin::Final, Opcode::Continuation, "de")),
            Err(Error::PayloadTooBig { len: 5, max: 4 })
        ));
    }

    #[test]
    fn compressed_messages() {
        let compressed = codec::compression::compress(b"Hello Hello Hello").unwrap();
        let frame = Frame::new(Fin::Final, Opcode::Text, compressed, true, false);

        let mut plain = Assembler::new(CompressionMethod::None, u64::MAX);
        assert!(plain.push(frame.clone()).is_err());

        let mut deflate = Assembler::new(CompressionMethod::Deflate, u64::MAX);
        assert_eq!(
            deflate.push(frame).unwrap(),
            Received::Message(Message::Text("Hello Hello Hello".to_string()))
        );
    }

    #[test]
    fn compressed_message_over_the_limit() {
        let compressed = codec::compression::compress(&vec![0u8; 1 << 20]).unwrap();

        let frame = Frame::new(Fin::Final, Opcode::Binary, compressed, true, true);
        let mut deflate = Assembler::new(CompressionMethod::Deflate, 1024);
        assert!(matches!(
            deflate.push(frame),
            Err(Error::PayloadTooBig { max: 1024, .. })
        ));
    }

    #[tokio::test]
    async fn reader_reports_how_the_stream_ended() {
        let frame = Frame::new(Fin::Final, Opcode::Binary, vec![1, 2, 3], false, true).to_bytes();

        let mut reader = FrameReader::new(&frame[..], BytesMut::new(), u64::MAX);
        assert_eq!(reader.next().await.unwrap().payload.as_bytes(), &[1, 2, 3]);
        assert!(matches!(reader.next().await, Err(WebSocketError::Io(_))));

        let mut reader = FrameReader::new(&frame[..1], BytesMut::new(), u64::MAX);
        assert!(matches!(
            reader.next().await,
            Err(WebSocketError::Codec(Error::TruncatedHeader))
        ));

        let mut reader = FrameReader::new(&frame[..4], BytesMut::new(), u64::MAX);
        assert!(matches!(reader.next().await, Err(WebSocketError::Codec(Error::Underread))));
    }
}
