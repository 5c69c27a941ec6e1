//! HTTP/1.x message model.
//!
//! Messages are a start line, an ordered header block and an optional
//! entity body. Both the listener and the WebSocket opening handshake are
//! built on top of this module.

pub mod request;
pub mod response;
pub mod status;

pub use self::{request::HttpRequest, response::HttpResponse};

use std::{fmt, str::FromStr};

use bytes::{BufMut, BytesMut};

use crate::Error;

/// Header block budget when reading a message on its own.
pub const MAX_HEADER_LENGTH: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl FromStr for HttpVersion {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "HTTP/1.0" => Ok(Self::Http10),
            "HTTP/1.1" => Ok(Self::Http11),
            _ => Err(Error::InvalidVersion(value.to_string())),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        })
    }
}

/// An ordered, case-insensitive header collection.
///
/// A name may occur several times; insertion order is kept so that a
/// message serializes back exactly as it was built.
///
/// # Test
///
/// ```
/// use wshost_codec::http::Headers;
///
/// let mut headers = Headers::default();
/// headers.add("Accept", "text/html");
/// headers.add("accept", "text/plain");
/// headers.add("Connection", "keep-alive, Upgrade");
///
/// assert_eq!(headers.get("ACCEPT"), Some("text/html"));
/// assert_eq!(headers.get_joined("accept").as_deref(), Some("text/html,text/plain"));
/// assert!(headers.contains_token("connection", "upgrade"));
///
/// headers.set("Accept", "*/*");
/// assert_eq!(headers.get_all("accept").collect::<Vec<_>>(), vec!["*/*"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// The first value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header joined with `,`.
    pub fn get_joined(&self, name: &str) -> Option<String> {
        let values = self.get_all(name).collect::<Vec<_>>();
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }

    pub fn get_all<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a str> + use<'a, 'b> {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any comma separated element of the header equals the token,
    /// ignoring case.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replaces every value of a header with a single one, keeping the
    /// position of the first occurrence.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(index) => {
                self.0[index].1 = value;

                let mut i = 0;
                self.0.retain(|(k, _)| {
                    i += 1;
                    i - 1 == index || !k.eq_ignore_ascii_case(&name)
                });
            }
            None => self.0.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses and appends a `name: value` line.
    pub fn add_line(&mut self, line: &str) -> Result<(), Error> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHeader(line.to_string()))?;

        let name = name.trim();
        if name.is_empty() || !name.bytes().all(is_token_char) {
            return Err(Error::InvalidHeader(line.to_string()));
        }

        self.add(name, value.trim());
        Ok(())
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        for (name, value) in &self.0 {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
    }
}

/// Whether a byte may appear in an HTTP token.
pub fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&byte)
}

pub fn is_token(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(is_token_char)
}

/// HTTP/1.0 keeps the connection only on `Connection: keep-alive`, HTTP/1.1
/// keeps it unless `Connection: close`.
///
/// # Test
///
/// ```
/// use wshost_codec::http::{Headers, HttpVersion, keeps_alive};
///
/// let mut headers = Headers::default();
/// assert!(keeps_alive(&headers, HttpVersion::Http11));
/// assert!(!keeps_alive(&headers, HttpVersion::Http10));
///
/// headers.add("Connection", "Keep-Alive");
/// assert!(keeps_alive(&headers, HttpVersion::Http10));
///
/// headers.set("Connection", "close");
/// assert!(!keeps_alive(&headers, HttpVersion::Http11));
/// ```
pub fn keeps_alive(headers: &Headers, version: HttpVersion) -> bool {
    match version {
        HttpVersion::Http10 => headers.contains_token("Connection", "keep-alive"),
        HttpVersion::Http11 => !headers.contains_token("Connection", "close"),
    }
}

/// Whether the headers ask to switch to the protocol.
pub fn upgrades(headers: &Headers, protocol: &str) -> bool {
    headers.contains_token("Upgrade", protocol) && headers.contains_token("Connection", "Upgrade")
}

/// Parses a `Cookie` header into name and value pairs.
///
/// # Test
///
/// ```
/// use wshost_codec::http::parse_cookies;
///
/// assert_eq!(
///     parse_cookies("$Version=1; id=\"a1\"; theme=dark"),
///     vec![("id".to_string(), "a1".to_string()), ("theme".to_string(), "dark".to_string())]
/// );
/// ```
pub fn parse_cookies(value: &str) -> Vec<(String, String)> {
    value
        .split([';', ','])
        .map(str::trim)
        .filter(|item| !item.is_empty() && !item.starts_with('$'))
        .map(|item| match item.split_once('=') {
            Some((name, value)) => (
                name.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            ),
            None => (item.to_string(), String::new()),
        })
        .collect()
}

/// Splits incoming bytes into lines terminated by CRLF.
///
/// A bare LF also ends a line. The scanner keeps a partial line between
/// calls, so input may arrive in arbitrary pieces.
#[derive(Debug, Default)]
pub struct LineScanner {
    line: Vec<u8>,
}

impl LineScanner {
    /// Consumes input up to and including the next line feed.
    ///
    /// Returns the number of bytes consumed and the completed line, if any.
    ///
    /// # Test
    ///
    /// ```
    /// use wshost_codec::http::LineScanner;
    ///
    /// let mut scanner = LineScanner::default();
    ///
    /// assert_eq!(scanner.scan(b"GET / HT"), (8, None));
    /// assert_eq!(scanner.scan(b"TP/1.1\r\nHost"), (8, Some("GET / HTTP/1.1".to_string())));
    /// ```
    pub fn scan(&mut self, input: &[u8]) -> (usize, Option<String>) {
        match input.iter().position(|b| *b == b'\n') {
            Some(index) => {
                self.line.extend_from_slice(&input[..index]);
                if self.line.last() == Some(&b'\r') {
                    self.line.pop();
                }

                let line = String::from_utf8_lossy(&self.line).into_owned();
                self.line.clear();
                (index + 1, Some(line))
            }
            None => {
                self.line.extend_from_slice(input);
                (input.len(), None)
            }
        }
    }

    pub fn reset(&mut self) {
        self.line.clear();
    }
}

/// Incremental reader for a start line plus header block.
///
/// Empty lines before the start line are skipped, folded continuation
/// lines are joined onto the previous header with a single space, and the
/// block ends at the first empty line.
#[derive(Debug)]
pub struct HeadReader {
    scanner: LineScanner,
    lines: Vec<String>,
    size: usize,
    limit: usize,
}

impl HeadReader {
    pub fn new(limit: usize) -> Self {
        Self {
            scanner: LineScanner::default(),
            lines: Vec::with_capacity(16),
            size: 0,
            limit,
        }
    }

    /// Feeds bytes into the reader.
    ///
    /// Returns the number of bytes consumed and whether the head is
    /// complete. Bytes after the head are never consumed.
    pub fn feed(&mut self, input: &[u8]) -> Result<(usize, bool), Error> {
        let mut offset = 0;

        while offset < input.len() {
            let (size, line) = self.scanner.scan(&input[offset..]);
            offset += size;
            self.size += size;

            if self.size > self.limit {
                return Err(Error::HeadersTooLong);
            }

            let Some(line) = line else {
                break;
            };

            if line.is_empty() {
                if self.lines.is_empty() {
                    continue;
                }

                return Ok((offset, true));
            }

            let folded = self.lines.len() > 1 && line.starts_with([' ', '\t']);
            match self.lines.last_mut() {
                Some(previous) if folded => {
                    previous.push(' ');
                    previous.push_str(line.trim());
                }
                _ => self.lines.push(line),
            }
        }

        Ok((offset, false))
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }

    pub fn reset(&mut self) {
        self.scanner.reset();
        self.lines.clear();
        self.size = 0;
    }
}

/// Reads a complete head from the front of a buffer.
///
/// Returns the lines and the number of bytes the head occupied, or `None`
/// when the buffer ends before the empty line.
pub fn read_head(buf: &[u8], limit: usize) -> Result<Option<(Vec<String>, usize)>, Error> {
    let mut reader = HeadReader::new(limit);
    match reader.feed(buf)? {
        (size, true) => Ok(Some((reader.take_lines(), size))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folded_headers_are_joined() {
        let input = b"GET / HTTP/1.1\r\nX-Long: first\r\n  second\r\n\tthird\r\nHost: a\r\n\r\nrest";
        let (lines, size) = read_head(input, MAX_HEADER_LENGTH).unwrap().unwrap();

        assert_eq!(lines, vec!["GET / HTTP/1.1", "X-Long: first second third", "Host: a"]);
        assert_eq!(&input[size..], b"rest");
    }

    #[test]
    fn leading_empty_lines_are_skipped() {
        let (lines, _) = read_head(b"\r\n\r\nGET / HTTP/1.1\r\n\r\n", 100).unwrap().unwrap();
        assert_eq!(lines, vec!["GET / HTTP/1.1"]);
    }

    #[test]
    fn head_limit() {
        let mut input = b"GET / HTTP/1.1\r\n".to_vec();
        input.extend(std::iter::repeat_n(b'a', 200));

        assert!(matches!(read_head(&input, 100), Err(Error::HeadersTooLong)));
        assert!(read_head(&input, 1000).unwrap().is_none());
    }

    #[test]
    fn head_across_pieces() {
        let mut reader = HeadReader::new(MAX_HEADER_LENGTH);

        assert_eq!(reader.feed(b"GET /chat HTTP/1.1\r\nHo").unwrap(), (22, false));
        assert_eq!(reader.feed(b"st: x\r\n\r\nbody").unwrap(), (9, true));
        assert_eq!(reader.lines(), ["GET /chat HTTP/1.1", "Host: x"]);
    }

    #[test]
    fn invalid_header_name() {
        let mut headers = Headers::default();
        assert!(headers.add_line("Bad Name: x").is_err());
        assert!(headers.add_line("no colon").is_err());
        assert!(headers.add_line("Good: x: y").is_ok());
        assert_eq!(headers.get("good"), Some("x: y"));
    }

    #[test]
    fn upgrade_detection() {
        let mut headers = Headers::default();
        headers.add("Upgrade", "WebSocket");
        assert!(!upgrades(&headers, "websocket"));

        headers.add("Connection", "keep-alive, Upgrade");
        assert!(upgrades(&headers, "websocket"));
    }
}
