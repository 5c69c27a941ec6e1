use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, HttpVersion, MAX_HEADER_LENGTH, is_token, keeps_alive, parse_cookies, read_head, upgrades};
use crate::{Error, auth::AuthenticationResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: HttpVersion,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            version: HttpVersion::Http11,
            headers: Headers::default(),
            body: Bytes::new(),
        }
    }

    /// A client opening handshake request without the key and version.
    pub fn websocket(host: &str, path: &str) -> Self {
        let mut request = Self::new("GET", path);
        request.headers.add("Host", host);
        request.headers.add("Upgrade", "websocket");
        request.headers.add("Connection", "Upgrade");
        request
    }

    /// Builds a request from a start line and header lines.
    ///
    /// # Test
    ///
    /// ```
    /// use wshost_codec::http::{HttpRequest, HttpVersion};
    ///
    /// let lines = ["GET /chat?room=1 HTTP/1.0", "Host: example.com"].map(String::from);
    /// let request = HttpRequest::from_lines(&lines).unwrap();
    ///
    /// assert_eq!(request.method, "GET");
    /// assert_eq!(request.path(), "/chat");
    /// assert_eq!(request.query(), Some("room=1"));
    /// assert_eq!(request.version, HttpVersion::Http10);
    /// assert_eq!(request.headers.get("host"), Some("example.com"));
    /// ```
    pub fn from_lines(lines: &[String]) -> Result<Self, Error> {
        let (first, rest) = lines
            .split_first()
            .ok_or_else(|| Error::InvalidRequestLine(String::new()))?;

        let parts = first.split(' ').collect::<Vec<_>>();
        if parts.len() != 3 || !is_token(parts[0]) || parts[1].is_empty() {
            return Err(Error::InvalidRequestLine(first.clone()));
        }

        let mut headers = Headers::default();
        for line in rest {
            headers.add_line(line)?;
        }

        Ok(Self {
            method: parts[0].to_string(),
            uri: parts[1].to_string(),
            version: parts[2].parse()?,
            headers,
            body: Bytes::new(),
        })
    }

    /// Decodes a whole request from the front of a buffer, including a
    /// body announced by `Content-Length`.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, Error> {
        let Some((lines, mut size)) = read_head(buf, MAX_HEADER_LENGTH)? else {
            return Ok(None);
        };

        let mut request = Self::from_lines(&lines)?;
        if let Some(len) = request.content_length()? {
            let len = len as usize;
            if buf.len() - size < len {
                return Ok(None);
            }

            request.body = Bytes::copy_from_slice(&buf[size..size + len]);
            size += len;
        }

        Ok(Some((request, size)))
    }

    /// The declared body length, if any.
    pub fn content_length(&self) -> Result<Option<u64>, Error> {
        match self.headers.get("Content-Length") {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| Error::InvalidHeader(format!("Content-Length: {value}"))),
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.headers.contains_token("Transfer-Encoding", "chunked")
    }

    pub fn keeps_alive(&self) -> bool {
        keeps_alive(&self.headers, self.version)
    }

    pub fn upgrades(&self, protocol: &str) -> bool {
        upgrades(&self.headers, protocol)
    }

    /// A GET request on HTTP/1.1 asking to switch to WebSocket.
    pub fn is_websocket_request(&self) -> bool {
        self.method == "GET" && self.version > HttpVersion::Http10 && self.upgrades("websocket")
    }

    pub fn cookies(&self) -> Vec<(String, String)> {
        self.headers
            .get_all("Cookie")
            .flat_map(parse_cookies)
            .collect()
    }

    pub fn authorization(&self) -> Option<AuthenticationResponse> {
        self.headers
            .get("Authorization")
            .and_then(|value| AuthenticationResponse::parse(value).ok())
    }

    /// The path of the target, without query. Absolute targets are reduced
    /// to their path.
    pub fn path(&self) -> &str {
        let target = match self.uri.find("://") {
            Some(index) => {
                let rest = &self.uri[index + 3..];
                rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
            }
            None => self.uri.as_str(),
        };

        target.split(['?', '#']).next().unwrap_or(target)
    }

    pub fn query(&self) -> Option<&str> {
        let query = self.uri.split_once('?')?.1;
        Some(query.split('#').next().unwrap_or(query))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(format!("{} {} {}\r\n", self.method, self.uri, self.version).as_bytes());
        self.headers.encode(buf);
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_with_body_and_pipelined_rest() {
        let input = b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET";
        let (request, size) = HttpRequest::decode(input).unwrap().unwrap();

        assert_eq!(&request.body[..], b"abc");
        assert_eq!(&input[size..], b"GET");
    }

    #[test]
    fn decode_waits_for_body() {
        let input = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nab";
        assert!(HttpRequest::decode(input).unwrap().is_none());
    }

    #[test]
    fn serialization_keeps_header_order() {
        let mut request = HttpRequest::websocket("example.com", "/chat");
        request.headers.add("Sec-WebSocket-Version", "13");

        assert_eq!(
            &request.to_bytes()[..],
            b"GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\r\n"
        );
    }

    #[test]
    fn rejects_bad_request_lines() {
        for line in ["GET /", "GET / HTTP/2.0", "G T / HTTP/1.1 x", " / HTTP/1.1"] {
            assert!(HttpRequest::from_lines(&[line.to_string()]).is_err(), "{line}");
        }
    }

    #[test]
    fn absolute_target_path() {
        let request = HttpRequest::new("GET", "http://example.com:8080/a/b?x=1");
        assert_eq!(request.path(), "/a/b");
        assert_eq!(HttpRequest::new("GET", "http://example.com").path(), "/");
    }

    #[test]
    fn websocket_request_needs_get_and_http11() {
        let mut request = HttpRequest::websocket("h", "/");
        assert!(request.is_websocket_request());

        request.version = HttpVersion::Http10;
        assert!(!request.is_websocket_request());
    }
}
