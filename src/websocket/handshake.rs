//! The opening handshake.

use codec::{
    compression::CompressionMethod,
    crypto::{accept_key, create_key, is_valid_key},
    http::{HttpRequest, HttpResponse, is_token},
};

use super::{WebSocketError, WebSocketOptions};
use crate::net::stream::error_page;

pub const VERSION: &str = "13";

/// What both sides agreed on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiated {
    pub protocol: Option<String>,
    pub extensions: Option<String>,
    pub compression: CompressionMethod,
}

/// The parameters the server answers `permessage-deflate` with.
const DEFLATE_PARAMS: [&str; 2] = ["server_no_context_takeover", "client_no_context_takeover"];

fn reject(status: u16, message: &str) -> HttpResponse {
    log::debug!("websocket handshake rejected: status={status}, reason={message}");
    HttpResponse::close(status).with_body("text/html", error_page(status, Some(message)))
}

/// Checks an upgrade request and builds the 101 response.
///
/// A request that cannot be accepted yields the error response to send
/// instead.
pub fn accept(request: &HttpRequest, options: &WebSocketOptions) -> Result<(HttpResponse, Negotiated), HttpResponse> {
    if !request.is_websocket_request() {
        return Err(reject(400, "Not a WebSocket handshake request"));
    }

    if !request.headers.contains("Host") {
        return Err(reject(400, "Includes no Host header"));
    }

    let key = match request.headers.get("Sec-WebSocket-Key") {
        Some(key) if is_valid_key(key) => key,
        _ => return Err(reject(400, "Includes an invalid Sec-WebSocket-Key header")),
    };

    if request.headers.get("Sec-WebSocket-Version").map(str::trim) != Some(VERSION) {
        let mut response = reject(400, "Includes an invalid Sec-WebSocket-Version header");
        response.headers.add("Sec-WebSocket-Version", VERSION);
        return Err(response);
    }

    let mut negotiated = Negotiated::default();

    if let Some(value) = request.headers.get_joined("Sec-WebSocket-Protocol") {
        let offered = value.split(',').map(str::trim).collect::<Vec<_>>();
        if offered.iter().any(|protocol| !is_token(protocol)) {
            return Err(reject(400, "Includes an invalid Sec-WebSocket-Protocol header"));
        }

        negotiated.protocol = options
            .protocol
            .as_ref()
            .filter(|protocol| offered.contains(&protocol.as_str()))
            .cloned();
    }

    if !options.ignore_extensions {
        if let Some(value) = request.headers.get_joined("Sec-WebSocket-Extensions") {
            for extension in value.split(',') {
                let name = extension.split(';').next().unwrap_or_default().trim();
                if name.is_empty() || !is_token(name) {
                    return Err(reject(400, "Includes an invalid Sec-WebSocket-Extensions header"));
                }

                if negotiated.compression == CompressionMethod::None {
                    negotiated.compression = CompressionMethod::from_extension(extension);
                }
            }

            if negotiated.compression != CompressionMethod::None {
                negotiated.extensions = Some(negotiated.compression.to_extension_string(&DEFLATE_PARAMS));
            }
        }
    }

    if let Some(validator) = &options.origin_validator {
        if !validator(request.headers.get("Origin")) {
            return Err(reject(403, "Includes an invalid Origin header"));
        }
    }

    if let Some(validator) = &options.cookies_validator {
        if !validator(&request.cookies()) {
            return Err(reject(403, "Includes no cookies or invalid ones"));
        }
    }

    let mut response = HttpResponse::websocket();
    response.headers.add("Sec-WebSocket-Accept", accept_key(key));

    if let Some(protocol) = &negotiated.protocol {
        response.headers.add("Sec-WebSocket-Protocol", protocol.as_str());
    }

    if let Some(extensions) = &negotiated.extensions {
        response.headers.add("Sec-WebSocket-Extensions", extensions.as_str());
    }

    Ok((response, negotiated))
}

/// The client side: an upgrade request and the key its answer must match.
pub fn client_request(host: &str, path: &str, protocols: &[&str], compress: bool) -> (HttpRequest, String) {
    let key = create_key();

    let mut request = HttpRequest::websocket(host, path);
    request.headers.add("Sec-WebSocket-Key", key.as_str());
    request.headers.add("Sec-WebSocket-Version", VERSION);

    if !protocols.is_empty() {
        request.headers.add("Sec-WebSocket-Protocol", protocols.join(", "));
    }

    if compress {
        request.headers.add(
            "Sec-WebSocket-Extensions",
            CompressionMethod::Deflate.to_extension_string(&["client_no_context_takeover"]),
        );
    }

    (request, key)
}

/// Checks the server's answer to [`client_request`].
pub fn verify_response(response: &HttpResponse, key: &str, protocols: &[&str]) -> Result<Negotiated, WebSocketError> {
    let fail = |message: &str| WebSocketError::Handshake {
        status: response.status,
        message: message.to_string(),
    };

    if response.status != 101 {
        return Err(fail("the server refused to switch protocols"));
    }

    if !response.headers.contains_token("Upgrade", "websocket")
        || !response.headers.contains_token("Connection", "Upgrade")
    {
        return Err(fail("the response does not upgrade to websocket"));
    }

    if response.headers.get("Sec-WebSocket-Accept") != Some(accept_key(key).as_str()) {
        return Err(fail("invalid Sec-WebSocket-Accept"));
    }

    let protocol = response.headers.get("Sec-WebSocket-Protocol").map(str::to_string);
    if let Some(protocol) = &protocol {
        if !protocols.contains(&protocol.as_str()) {
            return Err(fail("the server selected a protocol that was not offered"));
        }
    }

    let extensions = response.headers.get_joined("Sec-WebSocket-Extensions");
    let compression = extensions
        .as_deref()
        .map(CompressionMethod::from_extension)
        .unwrap_or_default();

    Ok(Negotiated {
        protocol,
        extensions,
        compression,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    fn request() -> HttpRequest {
        let mut request = HttpRequest::websocket("example.com", "/chat");
        request.headers.add("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        request.headers.add("Sec-WebSocket-Version", "13");
        request
    }

    #[test]
    fn accepts_a_valid_request() {
        let (response, negotiated) = accept(&request(), &WebSocketOptions::default()).unwrap();

        assert_eq!(response.status, 101);
        assert_eq!(
            response.headers.get("Sec-WebSocket-Accept"),
            Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );
        assert_eq!(negotiated, Negotiated::default());
    }

    #[test]
    fn rejects_bad_requests() {
        let mut plain = request();
        plain.headers.remove("Upgrade");
        assert_eq!(accept(&plain, &WebSocketOptions::default()).unwrap_err().status, 400);

        let mut key = request();
        key.headers.set("Sec-WebSocket-Key", "c2hvcnQ=");
        assert_eq!(accept(&key, &WebSocketOptions::default()).unwrap_err().status, 400);

        let mut version = request();
        version.headers.set("Sec-WebSocket-Version", "8");
        let response = accept(&version, &WebSocketOptions::default()).unwrap_err();
        assert_eq!(response.status, 400);
        assert_eq!(response.headers.get("Sec-WebSocket-Version"), Some("13"));
    }

    #[test]
    fn negotiates_protocol_and_compression() {
        let mut offered = request();
        offered.headers.add("Sec-WebSocket-Protocol", "chat, superchat");
        offered
            .headers
            .add("Sec-WebSocket-Extensions", "permessage-deflate; client_max_window_bits");

        let options = WebSocketOptions {
            protocol: Some("superchat".to_string()),
            ..Default::default()
        };

        let (response, negotiated) = accept(&offered, &options).unwrap();
        assert_eq!(negotiated.protocol.as_deref(), Some("superchat"));
        assert_eq!(negotiated.compression, CompressionMethod::Deflate);
        assert_eq!(
            response.headers.get("Sec-WebSocket-Extensions"),
            Some("permessage-deflate; server_no_context_takeover; client_no_context_takeover")
        );

        let ignoring = WebSocketOptions {
            ignore_extensions: true,
            ..Default::default()
        };

        let (_, negotiated) = accept(&offered, &ignoring).unwrap();
        assert_eq!(negotiated.compression, CompressionMethod::None);
        assert_eq!(negotiated.protocol, None);
    }

    #[test]
    fn validators_forbid() {
        let options = WebSocketOptions {
            origin_validator: Some(Arc::new(|origin: Option<&str>| origin == Some("https://example.com"))),
            ..Default::default()
        };

        assert_eq!(accept(&request(), &options).unwrap_err().status, 403);

        let mut allowed = request();
        allowed.headers.add("Origin", "https://example.com");
        assert!(accept(&allowed, &options).is_ok());
    }

    #[test]
    fn client_verifies_the_answer() {
        let (request, key) = client_request("example.com", "/chat", &["chat"], true);

        let (response, _) = accept(
            &request,
            &WebSocketOptions {
                protocol: Some("chat".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let negotiated = verify_response(&response, &key, &["chat"]).unwrap();
        assert_eq!(negotiated.protocol.as_deref(), Some("chat"));
        assert_eq!(negotiated.compression, CompressionMethod::Deflate);

        assert!(verify_response(&response, &create_key(), &["chat"]).is_err());
    }
}
