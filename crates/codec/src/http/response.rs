use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, HttpVersion, MAX_HEADER_LENGTH, keeps_alive, read_head, status::description};
use crate::{Error, auth::AuthenticationChallenge};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: HttpVersion,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            version: HttpVersion::Http11,
            status,
            reason: description(status).to_string(),
            headers: Headers::default(),
            body: Bytes::new(),
        }
    }

    /// `101 Switching Protocols` for a WebSocket upgrade.
    pub fn websocket() -> Self {
        let mut response = Self::new(101);
        response.headers.add("Upgrade", "websocket");
        response.headers.add("Connection", "Upgrade");
        response
    }

    /// A response that closes the connection after it is sent.
    pub fn close(status: u16) -> Self {
        let mut response = Self::new(status);
        response.headers.set("Connection", "close");
        response
    }

    pub fn unauthorized(challenge: &AuthenticationChallenge) -> Self {
        let mut response = Self::close(401);
        response.headers.add("WWW-Authenticate", challenge.to_string());
        response
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.headers.set("Content-Type", content_type);
        self.headers.set("Content-Length", self.body.len().to_string());
        self
    }

    /// # Test
    ///
    /// ```
    /// use wshost_codec::http::HttpResponse;
    ///
    /// let lines = ["HTTP/1.1 101 Switching Protocols", "Upgrade: websocket"].map(String::from);
    /// let response = HttpResponse::from_lines(&lines).unwrap();
    ///
    /// assert_eq!(response.status, 101);
    /// assert_eq!(response.reason, "Switching Protocols");
    /// ```
    pub fn from_lines(lines: &[String]) -> Result<Self, Error> {
        let (first, rest) = lines
            .split_first()
            .ok_or_else(|| Error::InvalidStatusLine(String::new()))?;

        let mut parts = first.splitn(3, ' ');
        let version = parts
            .next()
            .ok_or_else(|| Error::InvalidStatusLine(first.clone()))?
            .parse()?;

        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (100..1000).contains(code))
            .ok_or_else(|| Error::InvalidStatusLine(first.clone()))?;

        let mut headers = Headers::default();
        for line in rest {
            headers.add_line(line)?;
        }

        Ok(Self {
            version,
            status,
            reason: parts.next().unwrap_or_default().to_string(),
            headers,
            body: Bytes::new(),
        })
    }

    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, Error> {
        let Some((lines, mut size)) = read_head(buf, MAX_HEADER_LENGTH)? else {
            return Ok(None);
        };

        let mut response = Self::from_lines(&lines)?;
        if let Some(len) = response.headers.get("Content-Length") {
            let len = len
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::InvalidHeader(format!("Content-Length: {len}")))?;

            if buf.len() - size < len {
                return Ok(None);
            }

            response.body = Bytes::copy_from_slice(&buf[size..size + len]);
            size += len;
        }

        Ok(Some((response, size)))
    }

    /// Whether the connection has to be closed after this response.
    pub fn closes_connection(&self) -> bool {
        !keeps_alive(&self.headers, self.version)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn encode_head(&self, buf: &mut BytesMut) {
        buf.put_slice(format!("{} {} {}\r\n", self.version, self.status, self.reason).as_bytes());
        self.headers.encode(buf);
        buf.put_slice(b"\r\n");
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        self.encode_head(buf);
        buf.put_slice(&self.body);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

impl fmt::Display for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_response() {
        let response = HttpResponse::close(400);

        assert!(response.closes_connection());
        assert_eq!(
            &response.to_bytes()[..],
            b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn decode_with_body() {
        let input = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";
        let (response, size) = HttpResponse::decode(input).unwrap().unwrap();

        assert_eq!(size, input.len());
        assert_eq!(&response.body[..], b"hi");
        assert!(response.is_success());
    }

    #[test]
    fn invalid_status_line() {
        assert!(HttpResponse::from_lines(&["HTTP/1.1 abc OK".to_string()]).is_err());
        assert!(HttpResponse::from_lines(&["HTTP/3 200 OK".to_string()]).is_err());
    }
}
