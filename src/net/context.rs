use std::{
    io::{Error, ErrorKind, Result},
    net::SocketAddr,
};

use codec::{
    auth::Identity,
    http::{HttpRequest, HttpResponse},
};
use service::ListenerPrefix;
use url::Url;

use super::{
    ConnectionHandle, Transport,
    listener::HttpListener,
    stream::{RequestStream, ResponseStream, error_page},
};

/// One request routed to a listener, with the means to answer it.
///
/// The context borrows the connection's transport for the duration of the
/// handler. A WebSocket service takes the transport for good with
/// [`HttpContext::upgrade`].
pub struct HttpContext {
    pub request: HttpRequest,
    pub url: Url,
    pub prefix: ListenerPrefix,
    pub user: Option<Identity>,
    pub remote: SocketAddr,
    pub local: SocketAddr,
    pub secure: bool,
    pub(crate) io: Option<Transport>,
    pub(crate) input: RequestStream,
    pub(crate) output: ResponseStream,
    pub(crate) handle: ConnectionHandle,
    pub(crate) listener: HttpListener,
}

fn upgraded() -> Error {
    Error::new(ErrorKind::NotConnected, "the connection was upgraded")
}

impl HttpContext {
    pub fn listener(&self) -> &HttpListener {
        &self.listener
    }

    pub fn is_websocket_request(&self) -> bool {
        self.request.is_websocket_request()
    }

    pub fn is_upgraded(&self) -> bool {
        self.io.is_none()
    }

    /// The response head, while it can still be changed.
    pub fn response_mut(&mut self) -> Option<&mut HttpResponse> {
        self.output.head_mut()
    }

    pub fn response_started(&self) -> bool {
        self.output.head_sent()
    }

    pub async fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        let io = self.io.as_mut().ok_or_else(upgraded)?;
        self.input.read(io, buf).await
    }

    pub async fn read_to_end(&mut self, limit: usize) -> Result<Vec<u8>> {
        let io = self.io.as_mut().ok_or_else(upgraded)?;
        self.input.read_to_end(io, limit).await
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let io = self.io.as_mut().ok_or_else(upgraded)?;
        self.output.write(io, data).await
    }

    /// Finishes the response, with an optional last piece of body.
    pub async fn close(&mut self, body: Option<&[u8]>) -> Result<()> {
        let io = self.io.as_mut().ok_or_else(upgraded)?;
        self.output.close(io, body).await
    }

    /// Sends a complete response. Its headers are merged over the ones
    /// already set.
    pub async fn respond(&mut self, response: HttpResponse) -> Result<()> {
        let head = self
            .output
            .head_mut()
            .ok_or_else(|| Error::other("the response head was already sent"))?;

        head.status = response.status;
        head.reason = response.reason;
        for (name, _) in response.headers.iter() {
            head.headers.remove(name);
        }

        for (name, value) in response.headers.iter() {
            head.headers.add(name, value);
        }

        self.close(Some(&response.body)).await
    }

    /// Answers with an error status and the standard HTML page.
    pub async fn send_error(&mut self, status: u16, message: Option<&str>) -> Result<()> {
        let page = error_page(status, message);
        self.respond(HttpResponse::new(status).with_body("text/html", page))
            .await
    }

    /// Takes the connection out of the HTTP loop.
    ///
    /// The listener forgets the connection, so stopping the listener no
    /// longer closes it.
    pub fn upgrade(&mut self) -> Result<Transport> {
        let io = self.io.take().ok_or_else(upgraded)?;
        self.listener.unregister_connection(self.handle.id);
        Ok(io)
    }
}
