use std::{io::ErrorKind, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Buf;
use codec::http::{HeadReader, HttpRequest, HttpResponse, HttpVersion};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::watch,
    time::timeout,
};
use url::Url;

use super::{
    BoxedStream, ConnectionHandle, Transport, closed,
    context::HttpContext,
    endpoint::EndPointListener,
    listener::HttpListener,
    percent_decode,
    stream::{RequestStream, ResponseStream, error_page},
};

/// Upper bound of a request line plus headers.
pub const MAX_HEAD_LENGTH: usize = 32768;

enum Next {
    KeepAlive,
    Close,
    Upgraded,
}

enum HeadError {
    /// The peer went away before sending anything.
    Closed,
    Invalid(String),
    /// No bytes arrived within the read timeout.
    Timeout,
}

/// One accepted socket serving requests until it is closed or upgraded.
pub struct HttpConnection {
    endpoint: Arc<EndPointListener>,
    io: Option<Transport>,
    handle: ConnectionHandle,
    close_flag: watch::Receiver<bool>,
    remote: SocketAddr,
    local: SocketAddr,
    reuses: usize,
    listener: Option<HttpListener>,
}

impl HttpConnection {
    pub fn new(endpoint: Arc<EndPointListener>, stream: BoxedStream, remote: SocketAddr, local: SocketAddr) -> Self {
        let (handle, close_flag) = ConnectionHandle::new(remote);
        Self {
            io: Some(Transport::new(stream)),
            listener: None,
            reuses: 0,
            close_flag,
            endpoint,
            handle,
            remote,
            local,
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Serves requests until the peer or the server ends the connection.
    pub async fn run(mut self) {
        self.endpoint.add_unregistered(&self.handle);

        let mut close_flag = self.close_flag.clone();
        let mut upgraded = false;
        loop {
            let next = tokio::select! {
                _ = closed(&mut close_flag) => Next::Close,
                next = self.serve() => next,
            };

            match next {
                Next::KeepAlive => self.reuses += 1,
                Next::Close => break,
                Next::Upgraded => {
                    upgraded = true;
                    break;
                }
            }
        }

        self.endpoint.remove_unregistered(self.handle.id);
        if let Some(listener) = self.listener.take() {
            listener.unregister_connection(self.handle.id);
        }

        if let Some(mut io) = self.io.take() {
            if let Err(e) = io.stream.shutdown().await {
                log::debug!("connection shutdown failed: addr={}, err={e}", self.remote);
            }
        }

        log::debug!(
            "connection closed: addr={}, requests={}, upgraded={upgraded}",
            self.remote,
            self.reuses + 1
        );
    }

    async fn serve(&mut self) -> Next {
        let options = self.endpoint.options();
        let reuse_timeout = options.reuse_timeout;
        let budget = if self.reuses == 0 {
            options.first_request_timeout
        } else {
            reuse_timeout
        };

        let Some(io) = self.io.as_mut() else {
            return Next::Close;
        };

        let request = match read_request(io, budget).await {
            Ok(request) => request,
            Err(HeadError::Closed) => return Next::Close,
            Err(HeadError::Invalid(message)) => {
                log::debug!("bad request: addr={}, err={message}", self.remote);
                return self.reject(400, Some(&message)).await;
            }
            Err(HeadError::Timeout) => {
                log::debug!("connection timed out: addr={}, budget={budget:?}", self.remote);
                return self.reject(408, None).await;
            }
        };

        let url = match self.request_url(&request) {
            Some(url) => url,
            None => return self.reject(400, Some("Invalid host")).await,
        };

        let path = percent_decode(url.path()).into_owned();
        let host = url.host_str().unwrap_or_default();
        let port = url.port_or_known_default().unwrap_or(self.local.port());

        let Some((listener, prefix)) = self.endpoint.search(host, port, &path) else {
            log::debug!("no listener for request: addr={}, url={url}", self.remote);
            return self.reject(404, None).await;
        };

        let input = match (request.is_chunked(), request.content_length()) {
            (_, Err(e)) => return self.reject(400, Some(&e.to_string())).await,
            (true, _) => RequestStream::chunked(),
            (false, Ok(Some(length))) => RequestStream::bounded(length),
            (false, Ok(None)) if matches!(request.method.as_str(), "POST" | "PUT") => {
                return self.reject(411, None).await;
            }
            (false, Ok(None)) => RequestStream::Empty,
        };

        let user = match listener.authenticate(&request).await {
            Ok(user) => user,
            Err(response) => {
                log::info!("unauthorized request: addr={}, url={url}", self.remote);
                return self.send(response).await;
            }
        };

        self.register(&listener);

        let keep_alive = request.keeps_alive();
        let mut context = HttpContext {
            output: ResponseStream::new(request.version, keep_alive),
            secure: self.endpoint.is_secure(),
            handle: self.handle.clone(),
            listener: listener.clone(),
            io: self.io.take(),
            remote: self.remote,
            local: self.local,
            request,
            prefix,
            input,
            user,
            url,
        };

        let result = listener.handler().handle(&mut context).await;
        if let Err(e) = &result {
            log::warn!("request handler failed: addr={}, url={}, err={e}", self.remote, context.url);

            if context.io.is_some() && !context.response_started() {
                if let Some(head) = context.response_mut() {
                    head.headers.set("Connection", "close");
                }

                // A body that fails to parse is the client's fault.
                let status = match e.downcast_ref::<std::io::Error>() {
                    Some(e) if e.kind() == ErrorKind::InvalidData => 400,
                    _ => 500,
                };

                if let Err(e) = context.send_error(status, None).await {
                    log::debug!("error response not sent: addr={}, err={e}", self.remote);
                }
            }
        }

        let Some(mut io) = context.io.take() else {
            return Next::Upgraded;
        };

        if !context.output.is_closed() && context.output.close(&mut io, None).await.is_err() {
            return Next::Close;
        }

        let reuse = keep_alive && result.is_ok() && !context.output.closes_connection();
        if reuse {
            let drained = timeout(reuse_timeout, context.input.drain(&mut io)).await;
            if matches!(drained, Ok(Ok(()))) {
                self.io = Some(io);
                return Next::KeepAlive;
            }
        }

        self.io = Some(io);
        Next::Close
    }

    /// The full URL of a request, built from the `Host` header or the local
    /// address.
    fn request_url(&self, request: &HttpRequest) -> Option<Url> {
        if request.uri.contains("://") {
            return Url::parse(&request.uri).ok();
        }

        let scheme = if self.endpoint.is_secure() { "https" } else { "http" };
        let host = match request.headers.get("Host").map(str::trim) {
            Some(host) if !host.is_empty() => host.to_string(),
            _ if request.version == HttpVersion::Http11 => return None,
            _ => self.local.to_string(),
        };

        if !request.uri.starts_with('/') {
            return None;
        }

        Url::parse(&format!("{scheme}://{host}{}", request.uri)).ok()
    }

    /// Moves the connection to the listener serving the current request.
    fn register(&mut self, listener: &HttpListener) {
        if self.listener.as_ref() == Some(listener) {
            return;
        }

        match self.listener.replace(listener.clone()) {
            Some(previous) => previous.unregister_connection(self.handle.id),
            None => self.endpoint.remove_unregistered(self.handle.id),
        }

        listener.register_connection(&self.handle);
    }

    async fn reject(&mut self, status: u16, message: Option<&str>) -> Next {
        self.send(HttpResponse::close(status).with_body("text/html", error_page(status, message)))
            .await
    }

    /// Writes a response that ends the connection.
    async fn send(&mut self, response: HttpResponse) -> Next {
        if let Some(io) = self.io.as_mut() {
            let written = async {
                io.stream.write_all(&response.to_bytes()).await?;
                io.stream.flush().await
            };

            if let Err(e) = written.await {
                log::debug!("response not sent: addr={}, status={}, err={e}", self.remote, response.status);
            }
        }

        Next::Close
    }
}

/// Reads a request head. The timeout restarts with every read.
async fn read_request(io: &mut Transport, read_timeout: Duration) -> Result<HttpRequest, HeadError> {
    let mut reader = HeadReader::new(MAX_HEAD_LENGTH);
    let mut received = false;

    loop {
        if !io.buffer.is_empty() {
            received = true;

            let (size, done) = reader
                .feed(&io.buffer)
                .map_err(|_| HeadError::Invalid("Headers too long".to_string()))?;

            io.buffer.advance(size);
            if done {
                break;
            }
        }

        io.buffer.reserve(4096);
        let read = timeout(read_timeout, io.stream.read_buf(&mut io.buffer))
            .await
            .map_err(|_| HeadError::Timeout)?;

        match read {
            Ok(size) if size > 0 => (),
            _ if received => return Err(HeadError::Invalid("Incomplete request".to_string())),
            _ => return Err(HeadError::Closed),
        }
    }

    HttpRequest::from_lines(&reader.take_lines()).map_err(|e| HeadError::Invalid(e.to_string()))
}
