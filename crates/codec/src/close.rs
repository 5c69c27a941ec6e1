use std::fmt;

/// Status code carried by a close frame.
///
/// Endpoints may use codes from 1000 to 4999. The codes 1004, 1005, 1006
/// and 1015 are reserved: they never appear on the wire and only describe
/// local conditions such as "no code was received".
///
/// # Test
///
/// ```
/// use wshost_codec::CloseCode;
///
/// assert!(CloseCode::NO_STATUS.is_reserved());
/// assert!(!CloseCode::NORMAL.is_reserved());
/// assert!(CloseCode(4999).is_valid());
/// assert!(!CloseCode(999).is_valid());
/// assert!(!CloseCode(5000).is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: Self = Self(1000);
    pub const AWAY: Self = Self(1001);
    pub const PROTOCOL_ERROR: Self = Self(1002);
    pub const UNSUPPORTED_DATA: Self = Self(1003);
    pub const UNDEFINED: Self = Self(1004);
    pub const NO_STATUS: Self = Self(1005);
    pub const ABNORMAL: Self = Self(1006);
    pub const INVALID_DATA: Self = Self(1007);
    pub const POLICY_VIOLATION: Self = Self(1008);
    pub const TOO_BIG: Self = Self(1009);
    pub const MANDATORY_EXTENSION: Self = Self(1010);
    pub const SERVER_ERROR: Self = Self(1011);
    pub const TLS_HANDSHAKE_FAILURE: Self = Self(1015);

    pub fn is_reserved(&self) -> bool {
        matches!(self.0, 1004 | 1005 | 1006 | 1015)
    }

    pub fn is_valid(&self) -> bool {
        (1000..=4999).contains(&self.0)
    }

    /// Whether an endpoint is allowed to put this code in a close frame.
    pub fn is_sendable(&self) -> bool {
        self.is_valid() && !self.is_reserved()
    }

    /// Human readable text for the error codes, empty for everything else.
    pub fn message(&self) -> &'static str {
        match self.0 {
            1002 => "A WebSocket protocol error has occurred.",
            1003 => "Unsupported data has been received.",
            1006 => "An exception has occurred.",
            1007 => "Invalid data has been received.",
            1008 => "A policy violation has occurred.",
            1009 => "A too big message has been received.",
            1010 => "WebSocket client didn't receive expected extension(s).",
            1011 => "WebSocket server got an internal error.",
            1015 => "An error has occurred during a TLS handshake.",
            _ => "",
        }
    }
}

impl From<u16> for CloseCode {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<CloseCode> for u16 {
    fn from(value: CloseCode) -> Self {
        value.0
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
