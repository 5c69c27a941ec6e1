use anyhow::Result;
use wshost_codec::{
    chunked::ChunkDecoder,
    http::{HeadReader, HttpRequest, HttpResponse, HttpVersion, status::description},
};

#[rustfmt::skip]
const HANDSHAKE: &[u8] = b"GET /chat HTTP/1.1\r\n\
Host: server.example.com\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Origin: http://example.com\r\n\
Sec-WebSocket-Protocol: chat, superchat\r\n\
Sec-WebSocket-Version: 13\r\n\
Cookie: session=abc; lang=en\r\n\
\r\n";

#[test]
fn opening_handshake_request() -> Result<()> {
    let (request, size) = HttpRequest::decode(HANDSHAKE)?.expect("complete request");

    assert_eq!(size, HANDSHAKE.len());
    assert!(request.is_websocket_request());
    assert_eq!(request.headers.get("sec-websocket-key"), Some("dGhlIHNhbXBsZSBub25jZQ=="));
    assert_eq!(request.headers.get("Sec-WebSocket-Protocol"), Some("chat, superchat"));
    assert_eq!(
        request.cookies(),
        vec![
            ("session".to_string(), "abc".to_string()),
            ("lang".to_string(), "en".to_string())
        ]
    );

    // serialization reproduces the input
    assert_eq!(&request.to_bytes()[..], HANDSHAKE);
    Ok(())
}

#[test]
fn head_reader_stops_at_the_head() -> Result<()> {
    let mut input = HANDSHAKE.to_vec();
    input.extend_from_slice(&[0x81, 0x80]);

    let mut reader = HeadReader::new(32768);
    let mut consumed = 0;
    for piece in input.chunks(7) {
        let (size, done) = reader.feed(piece)?;
        consumed += size;
        if done {
            break;
        }
    }

    assert_eq!(&input[consumed..], &[0x81, 0x80]);
    let request = HttpRequest::from_lines(reader.lines())?;
    assert_eq!(request.uri, "/chat");
    Ok(())
}

#[test]
fn response_round_trip() -> Result<()> {
    let mut response = HttpResponse::websocket();
    response.headers.add("Sec-WebSocket-Accept", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");

    let bytes = response.to_bytes();
    let (decoded, size) = HttpResponse::decode(&bytes)?.expect("complete response");

    assert_eq!(size, bytes.len());
    assert_eq!(decoded, response);
    assert_eq!(decoded.version, HttpVersion::Http11);
    assert!(!decoded.closes_connection());
    Ok(())
}

#[test]
fn error_response_body() {
    let response = HttpResponse::close(404).with_body("text/html", "<h1>404</h1>");

    assert_eq!(response.headers.get("Content-Length"), Some("12"));
    assert_eq!(description(response.status), "Not Found");
    assert!(response.closes_connection());
}

#[test]
fn chunked_body_decodes() -> Result<()> {
    let mut decoder = ChunkDecoder::default();
    let mut output = Vec::new();

    let first = decoder.decode(b"4\r\nWi", &mut output)?;
    let second = decoder.decode(b"ki\r\n5\r\npedia\r\n0\r\n\r\n", &mut output)?;

    assert_eq!((first, second), (5, 19));
    assert!(decoder.is_done());
    assert_eq!(output, b"Wikipedia");
    Ok(())
}

#[test]
fn content_length_must_be_numeric() -> Result<()> {
    let input = b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n";
    assert!(HttpRequest::decode(input).is_err());
    Ok(())
}
