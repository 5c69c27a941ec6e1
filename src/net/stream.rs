//! Request and response bodies.
//!
//! Both streams only keep state; the bytes move through the connection's
//! [`Transport`], which the context lends them for each call.

use std::io::{Error, ErrorKind, Result};

use bytes::{Buf, BufMut, BytesMut};
use codec::{
    chunked::{ChunkDecoder, encode_chunk},
    http::{HttpResponse, HttpVersion},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::Transport;

/// Largest chunk read from the socket at once.
const READ_SIZE: usize = 8192;

/// Reads a request body without ever reading past it, so the next request
/// on the connection stays in the buffer.
pub enum RequestStream {
    Empty,
    Bounded { remaining: u64 },
    Chunked(ChunkedBody),
}

pub struct ChunkedBody {
    decoder: ChunkDecoder,
    decoded: Vec<u8>,
    offset: usize,
}

impl RequestStream {
    pub fn bounded(length: u64) -> Self {
        if length == 0 {
            Self::Empty
        } else {
            Self::Bounded { remaining: length }
        }
    }

    pub fn chunked() -> Self {
        Self::Chunked(ChunkedBody {
            decoder: ChunkDecoder::default(),
            decoded: Vec::new(),
            offset: 0,
        })
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bounded { remaining } => *remaining == 0,
            Self::Chunked(body) => body.decoder.is_done() && body.offset == body.decoded.len(),
        }
    }

    /// Reads body bytes into `buf`. Returns 0 at the end of the body.
    ///
    /// A malformed chunk fails with `InvalidData`; the stream ending early
    /// fails with `UnexpectedEof`.
    pub async fn read(&mut self, io: &mut Transport, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        match self {
            Self::Empty => Ok(0),
            Self::Bounded { remaining } => {
                if *remaining == 0 {
                    return Ok(0);
                }

                if io.buffer.is_empty() {
                    fill(io).await?;
                }

                let size = buf.len().min(io.buffer.len()).min(*remaining as usize);
                buf[..size].copy_from_slice(&io.buffer[..size]);
                io.buffer.advance(size);
                *remaining -= size as u64;
                Ok(size)
            }
            Self::Chunked(body) => loop {
                if body.offset < body.decoded.len() {
                    let size = buf.len().min(body.decoded.len() - body.offset);
                    buf[..size].copy_from_slice(&body.decoded[body.offset..body.offset + size]);
                    body.offset += size;
                    return Ok(size);
                }

                body.decoded.clear();
                body.offset = 0;

                if body.decoder.is_done() {
                    return Ok(0);
                }

                if io.buffer.is_empty() {
                    fill(io).await?;
                }

                let size = body
                    .decoder
                    .decode(&io.buffer, &mut body.decoded)
                    .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;

                io.buffer.advance(size);
            },
        }
    }

    /// Reads the rest of the body, up to `limit` bytes.
    pub async fn read_to_end(&mut self, io: &mut Transport, limit: usize) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut buf = [0u8; READ_SIZE];

        loop {
            let size = self.read(io, &mut buf).await?;
            if size == 0 {
                return Ok(body);
            }

            if body.len() + size > limit {
                return Err(Error::new(ErrorKind::InvalidData, "request body too large"));
            }

            body.extend_from_slice(&buf[..size]);
        }
    }

    /// Discards what is left of the body so the connection can be reused.
    pub async fn drain(&mut self, io: &mut Transport) -> Result<()> {
        let mut buf = [0u8; READ_SIZE];
        while self.read(io, &mut buf).await? > 0 {}
        Ok(())
    }
}

async fn fill(io: &mut Transport) -> Result<usize> {
    io.buffer.reserve(READ_SIZE);
    match io.stream.read_buf(&mut io.buffer).await? {
        0 => Err(Error::new(ErrorKind::UnexpectedEof, "connection closed inside the body")),
        size => Ok(size),
    }
}

/// Writes a response.
///
/// The head goes out with the first write. Without a declared length the
/// body is chunked on HTTP/1.1; on HTTP/1.0 the connection is closed to
/// mark its end.
pub struct ResponseStream {
    head: HttpResponse,
    head_sent: bool,
    chunked: bool,
    closed: bool,
    request_version: HttpVersion,
}

impl ResponseStream {
    pub fn new(request_version: HttpVersion, keep_alive: bool) -> Self {
        let mut head = HttpResponse::new(200);
        head.version = request_version;
        if request_version == HttpVersion::Http10 && keep_alive {
            head.headers.set("Connection", "keep-alive");
        } else if !keep_alive {
            head.headers.set("Connection", "close");
        }

        Self {
            head,
            head_sent: false,
            chunked: false,
            closed: false,
            request_version,
        }
    }

    /// The response head, writable until the first byte is sent.
    pub fn head(&self) -> &HttpResponse {
        &self.head
    }

    pub fn head_mut(&mut self) -> Option<&mut HttpResponse> {
        (!self.head_sent).then_some(&mut self.head)
    }

    pub fn head_sent(&self) -> bool {
        self.head_sent
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the connection must not be reused after this response.
    pub fn closes_connection(&self) -> bool {
        self.head.closes_connection()
    }

    fn prepare_head(&mut self, final_body: Option<usize>) {
        let status = self.head.status;
        let headers = &mut self.head.headers;
        if headers.contains("Content-Length") || status < 200 || status == 204 || status == 304 {
            return;
        }

        match final_body {
            Some(size) => headers.set("Content-Length", size.to_string()),
            None if self.request_version == HttpVersion::Http11 => {
                headers.set("Transfer-Encoding", "chunked");
                self.chunked = true;
            }
            None => headers.set("Connection", "close"),
        }
    }

    pub async fn write(&mut self, io: &mut Transport, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::new(ErrorKind::BrokenPipe, "the response is closed"));
        }

        let mut buf = BytesMut::with_capacity(data.len() + 256);
        if !self.head_sent {
            self.prepare_head(None);
            self.head.encode_head(&mut buf);
            self.head_sent = true;
        }

        if self.chunked {
            if !data.is_empty() {
                encode_chunk(data, &mut buf);
            }
        } else {
            buf.put_slice(data);
        }

        io.stream.write_all(&buf).await?;
        io.stream.flush().await
    }

    /// Completes the response, optionally with a last piece of body.
    pub async fn close(&mut self, io: &mut Transport, body: Option<&[u8]>) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;

        let body = body.unwrap_or_default();
        let mut buf = BytesMut::with_capacity(body.len() + 256);
        if !self.head_sent {
            self.prepare_head(Some(body.len()));
            self.head.encode_head(&mut buf);
            self.head_sent = true;
            buf.put_slice(body);
        } else if self.chunked {
            if !body.is_empty() {
                encode_chunk(body, &mut buf);
            }

            encode_chunk(&[], &mut buf);
        } else {
            buf.put_slice(body);
        }

        io.stream.write_all(&buf).await?;
        io.stream.flush().await
    }
}

/// The HTML page sent with error responses.
///
/// # Test
///
/// ```
/// use wshost::net::stream::error_page;
///
/// assert_eq!(
///     error_page(404, Some("no listener")),
///     "<html><body><h1>404 Not Found (no listener)</h1></body></html>"
/// );
/// ```
pub fn error_page(status: u16, message: Option<&str>) -> String {
    let description = codec::http::status::description(status);
    match message {
        Some(message) if !message.is_empty() => {
            format!("<html><body><h1>{status} {description} ({message})</h1></body></html>")
        }
        _ => format!("<html><body><h1>{status} {description}</h1></body></html>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn transport(stream: tokio::io::DuplexStream, buffered: &[u8]) -> Transport {
        let mut transport = Transport::new(Box::new(stream));
        transport.buffer.extend_from_slice(buffered);
        transport
    }

    #[tokio::test]
    async fn bounded_body_stops_at_the_boundary() -> anyhow::Result<()> {
        let (client, server) = duplex(1024);
        let mut io = transport(server, b"hel");
        let mut client = client;
        client.write_all(b"lo world GET").await?;

        let mut body = RequestStream::bounded(11);
        let data = body.read_to_end(&mut io, 1024).await?;

        assert_eq!(data, b"hello world");
        assert!(body.is_finished());

        // the rest of the bytes belong to the next request
        let mut rest = vec![0u8; 3];
        if io.buffer.len() < 3 {
            io.stream.read_exact(&mut rest[io.buffer.len()..]).await?;
            rest[..io.buffer.len()].copy_from_slice(&io.buffer);
        } else {
            rest.copy_from_slice(&io.buffer[..3]);
        }

        assert_eq!(rest, b"GET");
        Ok(())
    }

    #[tokio::test]
    async fn chunked_body() -> anyhow::Result<()> {
        let (client, server) = duplex(1024);
        let mut io = transport(server, b"4\r\nWiki\r\n5\r\n");
        let mut client = client;
        client.write_all(b"pedia\r\n0\r\n\r\nNEXT").await?;

        let mut body = RequestStream::chunked();
        assert_eq!(body.read_to_end(&mut io, 1024).await?, b"Wikipedia");
        assert!(body.is_finished());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_chunk_is_invalid_data() {
        let (_client, server) = duplex(64);
        let mut io = transport(server, b"zz\r\n");

        let error = RequestStream::chunked()
            .read_to_end(&mut io, 1024)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn early_eof_inside_body() {
        let (client, server) = duplex(64);
        drop(client);

        let mut io = transport(server, b"ab");
        let error = RequestStream::bounded(5)
            .read_to_end(&mut io, 1024)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn streamed_response_is_chunked() -> anyhow::Result<()> {
        let (mut client, server) = duplex(1024);
        let mut io = transport(server, b"");

        let mut response = ResponseStream::new(HttpVersion::Http11, true);
        response.write(&mut io, b"Wiki").await?;
        assert!(response.head_mut().is_none());
        response.close(&mut io, Some(b"pedia")).await?;
        drop(io);

        let mut output = Vec::new();
        client.read_to_end(&mut output).await?;

        assert_eq!(
            output,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn closed_response_has_a_length() -> anyhow::Result<()> {
        let (mut client, server) = duplex(1024);
        let mut io = transport(server, b"");

        let mut response = ResponseStream::new(HttpVersion::Http10, false);
        response.close(&mut io, Some(b"hi")).await?;
        drop(io);

        let mut output = Vec::new();
        client.read_to_end(&mut output).await?;

        assert_eq!(
            output,
            b"HTTP/1.0 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nhi"
        );
        Ok(())
    }
}
