//! ## The WebSocket Protocol and HTTP/1.1 wire formats
//!
//! [RFC6455]: https://tools.ietf.org/html/rfc6455
//! [RFC7692]: https://tools.ietf.org/html/rfc7692
//! [RFC2617]: https://tools.ietf.org/html/rfc2617
//!
//! The WebSocket Protocol enables two-way communication between a client
//! running untrusted code in a controlled environment to a remote host
//! that has opted-in to communications from that code.  The protocol
//! consists of an opening handshake followed by basic message framing,
//! layered over TCP [RFC6455].
//!
//! This crate holds everything that can be expressed without touching a
//! socket: the frame codec, close codes, the per-message deflate
//! extension [RFC7692], the HTTP message model used by the opening
//! handshake and the listener, the chunked transfer decoder, and the
//! Basic/Digest access authentication schemes [RFC2617].

pub mod auth;
pub mod chunked;
pub mod close;
pub mod compression;
pub mod crypto;
pub mod frame;
pub mod http;
pub mod payload;

pub use self::{
    close::CloseCode,
    frame::{Fin, Frame, FrameHeader, Message, Opcode},
    payload::PayloadData,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the header of a frame could not be read")]
    TruncatedHeader,
    #[error("unsupported opcode: {0:#x}")]
    UnsupportedOpcode(u8),
    #[error("a non data frame is compressed")]
    CompressedControlFrame,
    #[error("a control frame is fragmented")]
    FragmentedControlFrame,
    #[error("a control frame has too long payload: len={0}")]
    ControlFrameTooLong(u64),
    #[error("the payload data of a frame is too big: len={len}, max={max}")]
    PayloadTooBig { len: u64, max: u64 },
    #[error("the stream ended before the frame was complete")]
    Underread,
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(&'static str),
    #[error("the text payload is not valid utf-8")]
    InvalidText,
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("invalid request line: {0}")]
    InvalidRequestLine(String),
    #[error("invalid status line: {0}")]
    InvalidStatusLine(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid http version: {0}")]
    InvalidVersion(String),
    #[error("the header block is too long")]
    HeadersTooLong,
    #[error("invalid chunk: {0}")]
    InvalidChunk(&'static str),
    #[error("invalid credentials")]
    InvalidCredentials,
}

impl Error {
    /// The close code a session sends when it fails with this error.
    ///
    /// # Test
    ///
    /// ```
    /// use wshost_codec::{CloseCode, Error};
    ///
    /// assert_eq!(Error::FragmentedControlFrame.close_code(), CloseCode::PROTOCOL_ERROR);
    /// assert_eq!(Error::PayloadTooBig { len: 10, max: 1 }.close_code(), CloseCode::TOO_BIG);
    /// assert_eq!(Error::InvalidText.close_code(), CloseCode::INVALID_DATA);
    /// assert_eq!(Error::Underread.close_code(), CloseCode::ABNORMAL);
    /// ```
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::PayloadTooBig { .. } => CloseCode::TOO_BIG,
            Self::InvalidText | Self::Compression(_) => CloseCode::INVALID_DATA,
            Self::Underread => CloseCode::ABNORMAL,
            _ => CloseCode::PROTOCOL_ERROR,
        }
    }
}
