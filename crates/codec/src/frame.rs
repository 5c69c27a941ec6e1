//! Base framing protocol.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    Error,
    crypto::masking_key,
    payload::{PayloadData, mask},
};

/// An unmasked ping frame without payload.
pub const EMPTY_PING_BYTES: [u8; 2] = [0x89, 0x00];

/// Control frames carry at most this many payload bytes.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

#[repr(u8)]
#[derive(TryFromPrimitive, IntoPrimitive, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    pub fn is_data(self) -> bool {
        matches!(self, Self::Text | Self::Binary)
    }
}

/// A complete data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Text(_) => Opcode::Text,
            Self::Binary(_) => Opcode::Binary,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Whether a frame is the last fragment of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fin {
    More,
    Final,
}

impl From<bool> for Fin {
    fn from(value: bool) -> Self {
        if value { Self::Final } else { Self::More }
    }
}

/// The two fixed octets at the start of every frame.
///
/// Parsing validates everything that can be known from these two octets,
/// so a reader can reject a bad frame before waiting for the rest of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: Fin,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub len7: u8,
}

impl FrameHeader {
    /// # Test
    ///
    /// ```
    /// use wshost_codec::{Error, Fin, FrameHeader, Opcode};
    ///
    /// let header = FrameHeader::parse([0x81, 0x85]).unwrap();
    /// assert_eq!(header.fin, Fin::Final);
    /// assert_eq!(header.opcode, Opcode::Text);
    /// assert!(header.masked);
    /// assert_eq!(header.len7, 5);
    ///
    /// // ping without FIN
    /// assert!(matches!(
    ///     FrameHeader::parse([0x09, 0x00]),
    ///     Err(Error::FragmentedControlFrame)
    /// ));
    ///
    /// assert!(matches!(
    ///     FrameHeader::parse([0x83, 0x00]),
    ///     Err(Error::UnsupportedOpcode(3))
    /// ));
    /// ```
    pub fn parse(bytes: [u8; 2]) -> Result<Self, Error> {
        let code = bytes[0] & 0x0f;
        let opcode = Opcode::try_from(code).map_err(|_| Error::UnsupportedOpcode(code))?;
        let header = Self {
            fin: Fin::from(bytes[0] & 0x80 != 0),
            rsv1: bytes[0] & 0x40 != 0,
            rsv2: bytes[0] & 0x20 != 0,
            rsv3: bytes[0] & 0x10 != 0,
            opcode,
            masked: bytes[1] & 0x80 != 0,
            len7: bytes[1] & 0x7f,
        };

        if header.rsv1 && !opcode.is_data() {
            return Err(Error::CompressedControlFrame);
        }

        if header.fin == Fin::More && opcode.is_control() {
            return Err(Error::FragmentedControlFrame);
        }

        if opcode.is_control() && header.len7 as u64 > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFrameTooLong(header.len7 as u64));
        }

        Ok(header)
    }

    /// Size of the extended payload length field that follows the header.
    pub fn extended_len_size(&self) -> usize {
        match self.len7 {
            126 => 2,
            127 => 8,
            _ => 0,
        }
    }

    pub fn mask_size(&self) -> usize {
        if self.masked { 4 } else { 0 }
    }

    /// Full payload length, given the extended length field.
    pub fn payload_len(&self, extended: &[u8]) -> u64 {
        match self.len7 {
            126 => u16::from_be_bytes([extended[0], extended[1]]) as u64,
            127 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&extended[..8]);
                u64::from_be_bytes(bytes)
            }
            len => len as u64,
        }
    }

    /// Assembles a frame once the masking key and the raw payload are read.
    pub fn into_frame(self, key: Option<[u8; 4]>, mut payload: Vec<u8>) -> Frame {
        if let Some(key) = key {
            mask(&mut payload, key);
        }

        Frame {
            fin: self.fin,
            rsv1: self.rsv1,
            rsv2: self.rsv2,
            rsv3: self.rsv3,
            opcode: self.opcode,
            mask: key,
            payload: PayloadData::new(payload),
        }
    }
}

/// A single frame.
///
/// The payload is always held unmasked; `mask` records the key that is
/// applied when the frame goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: Fin,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: PayloadData,
}

impl Frame {
    /// Creates a frame. RSV1 is only set for compressed text and binary
    /// frames, and a masked frame gets a fresh random key.
    pub fn new(
        fin: Fin,
        opcode: Opcode,
        payload: impl Into<PayloadData>,
        compressed: bool,
        masked: bool,
    ) -> Self {
        Self {
            fin,
            rsv1: compressed && opcode.is_data(),
            rsv2: false,
            rsv3: false,
            opcode,
            mask: masked.then(masking_key),
            payload: payload.into(),
        }
    }

    pub fn close(payload: PayloadData, masked: bool) -> Self {
        Self::new(Fin::Final, Opcode::Close, payload, false, masked)
    }

    pub fn ping(payload: impl Into<PayloadData>, masked: bool) -> Self {
        Self::new(Fin::Final, Opcode::Ping, payload, false, masked)
    }

    pub fn pong(payload: PayloadData, masked: bool) -> Self {
        Self::new(Fin::Final, Opcode::Pong, payload, false, masked)
    }

    pub fn is_final(&self) -> bool {
        self.fin == Fin::Final
    }

    pub fn is_compressed(&self) -> bool {
        self.rsv1
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Number of bytes the frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        let len = self.payload.len();
        let extended = match len {
            0..126 => 0,
            126..65536 => 2,
            _ => 8,
        };

        2 + extended + if self.mask.is_some() { 4 } else { 0 } + len as usize
    }

    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use wshost_codec::{Fin, Frame, Opcode};
    ///
    /// let frame = Frame::new(Fin::Final, Opcode::Text, b"Hello".to_vec(), false, false);
    /// let mut buf = BytesMut::new();
    /// frame.encode(&mut buf);
    ///
    /// assert_eq!(&buf[..], &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    /// ```
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());

        let mut first = u8::from(self.opcode);
        if self.fin == Fin::Final {
            first |= 0x80;
        }

        if self.rsv1 {
            first |= 0x40;
        }

        if self.rsv2 {
            first |= 0x20;
        }

        if self.rsv3 {
            first |= 0x10;
        }

        buf.put_u8(first);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        let len = self.payload.len();
        if len < 126 {
            buf.put_u8(mask_bit | len as u8);
        } else if len < 65536 {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(len);
        }

        let start = match self.mask {
            Some(key) => {
                buf.put_slice(&key);
                buf.len()
            }
            None => buf.len(),
        };

        buf.put_slice(self.payload.as_bytes());
        if let Some(key) = self.mask {
            mask(&mut buf[start..], key);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes one frame from the front of the buffer.
    ///
    /// Returns `None` while the buffer does not yet hold a complete frame,
    /// otherwise the frame and the number of bytes it occupied.
    ///
    /// # Test
    ///
    /// ```
    /// use wshost_codec::{Frame, Opcode};
    ///
    /// let buf = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
    ///
    /// assert!(Frame::decode(&buf[..6], u64::MAX).unwrap().is_none());
    ///
    /// let (frame, size) = Frame::decode(&buf, u64::MAX).unwrap().unwrap();
    /// assert_eq!(size, buf.len());
    /// assert_eq!(frame.opcode, Opcode::Text);
    /// assert_eq!(frame.payload.as_bytes(), b"Hello");
    /// ```
    pub fn decode(buf: &[u8], max_payload: u64) -> Result<Option<(Self, usize)>, Error> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let header = FrameHeader::parse([buf[0], buf[1]])?;
        let mut offset = 2 + header.extended_len_size();
        if buf.len() < offset {
            return Ok(None);
        }

        let len = header.payload_len(&buf[2..offset]);
        if len > max_payload.min(crate::payload::MAX_LENGTH) {
            return Err(Error::PayloadTooBig {
                len,
                max: max_payload.min(crate::payload::MAX_LENGTH),
            });
        }

        let key = if header.masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }

            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[offset..offset + 4]);
            offset += 4;
            Some(key)
        } else {
            None
        };

        let len = usize::try_from(len).map_err(|_| Error::PayloadTooBig {
            len,
            max: usize::MAX as u64,
        })?;

        if buf.len() - offset < len {
            return Ok(None);
        }

        let payload = buf[offset..offset + len].to_vec();
        Ok(Some((header.into_frame(key, payload), offset + len)))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |bit: bool| if bit { "On" } else { "Off" };
        let payload = self.payload.as_bytes();

        writeln!(f, "                    FIN: {:?}", self.fin)?;
        writeln!(f, "                   RSV1: {}", on_off(self.rsv1))?;
        writeln!(f, "                   RSV2: {}", on_off(self.rsv2))?;
        writeln!(f, "                   RSV3: {}", on_off(self.rsv3))?;
        writeln!(f, "                 Opcode: {:?}", self.opcode)?;
        writeln!(f, "                   MASK: {}", on_off(self.mask.is_some()))?;
        writeln!(f, "         Payload Length: {}", payload.len())?;

        if let Some(key) = self.mask {
            writeln!(f, "            Masking Key: {:02x?}", key)?;
        }

        match self.opcode {
            Opcode::Text if !self.rsv1 => {
                write!(f, "           Payload Data: {}", String::from_utf8_lossy(payload))
            }
            _ => write!(f, "           Payload Data: {:02x?}", payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_flag_only_on_data_frames() {
        let text = Frame::new(Fin::Final, Opcode::Text, b"x".to_vec(), true, false);
        assert!(text.is_compressed());

        let ping = Frame::new(Fin::Final, Opcode::Ping, b"x".to_vec(), true, false);
        assert!(!ping.is_compressed());

        let cont = Frame::new(Fin::Final, Opcode::Continuation, b"x".to_vec(), true, false);
        assert!(!cont.is_compressed());
    }

    #[test]
    fn compressed_control_frame_is_rejected() {
        assert!(matches!(
            FrameHeader::parse([0xc9, 0x00]),
            Err(Error::CompressedControlFrame)
        ));
    }

    #[test]
    fn compressed_continuation_is_rejected() {
        assert!(matches!(
            FrameHeader::parse([0xc0, 0x00]),
            Err(Error::CompressedControlFrame)
        ));
    }

    #[test]
    fn oversized_control_frame_is_rejected() {
        assert!(matches!(
            FrameHeader::parse([0x88, 0x7e]),
            Err(Error::ControlFrameTooLong(126))
        ));
    }

    #[test]
    fn payload_limit() {
        let frame = Frame::new(Fin::Final, Opcode::Binary, vec![0u8; 300], false, true);
        let bytes = frame.to_bytes();

        assert!(matches!(
            Frame::decode(&bytes, 299),
            Err(Error::PayloadTooBig { len: 300, max: 299 })
        ));
        assert!(Frame::decode(&bytes, 300).unwrap().is_some());
    }

    #[test]
    fn display_names_the_fields() {
        let frame = Frame::ping(b"hi".to_vec(), false);
        let text = frame.to_string();

        assert!(text.contains("Opcode: Ping"));
        assert!(text.contains("Payload Length: 2"));
        assert!(text.contains("MASK: Off"));
    }

    #[test]
    fn empty_ping_constant() {
        assert_eq!(&Frame::ping(Vec::new(), false).to_bytes()[..], &EMPTY_PING_BYTES);
    }
}
