//! WebSocket sessions.
//!
//! A [`WebSocket`] is a cheap handle; clones share one session. The task
//! that calls [`WebSocket::run`] owns the read side and drives the
//! [`Behavior`] callbacks, every other task may send, ping or close.

pub mod handshake;
pub mod message;

use std::{
    future::Future,
    io::{Error as IoError, ErrorKind},
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use codec::{
    CloseCode, Fin, Frame, Message, Opcode, PayloadData,
    auth::Identity,
    compression::CompressionMethod,
    http::{HeadReader, HttpRequest, HttpResponse, MAX_HEADER_LENGTH},
    payload::MAX_LENGTH,
};
use parking_lot::{Mutex, RwLock};
use service::{ReadyState, Session};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf, split},
    sync::{Mutex as AsyncMutex, Notify, watch},
    time::{Instant, timeout},
};

use self::{
    handshake::Negotiated,
    message::{Assembler, FrameReader, Received},
};
use crate::net::{BoxedStream, Transport, closed};

tokio::task_local! {
    // The session whose `run` is on this task's stack.
    static READER: usize;
}

#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    #[error("the session is not open: state={0:?}")]
    InvalidState(ReadyState),
    #[error("handshake failed: status={status}, message={message}")]
    Handshake { status: u16, message: String },
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Codec(#[from] codec::Error),
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),
    #[error("the close reason is longer than 123 bytes")]
    ReasonTooLong,
    #[error("timed out")]
    Timeout,
}

impl WebSocketError {
    /// The code the session closes with after this error.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::Codec(e) => e.close_code(),
            Self::Io(_) | Self::Timeout => CloseCode::ABNORMAL,
            _ => CloseCode::SERVER_ERROR,
        }
    }
}

pub type OriginValidator = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;
pub type CookiesValidator = Arc<dyn Fn(&[(String, String)]) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct WebSocketOptions {
    /// Also hand received pings to [`Behavior::on_ping`].
    pub emit_on_ping: bool,
    /// Answer handshakes without negotiating any extension.
    pub ignore_extensions: bool,
    /// The subprotocol selected when the client offers it.
    pub protocol: Option<String>,
    /// How long to wait for a pong or for the peer's close frame.
    pub wait_time: Duration,
    /// Messages longer than this go out in several frames.
    pub fragment_length: usize,
    pub max_payload_length: u64,
    pub origin_validator: Option<OriginValidator>,
    pub cookies_validator: Option<CookiesValidator>,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            emit_on_ping: false,
            ignore_extensions: false,
            protocol: None,
            wait_time: Duration::from_secs(1),
            fragment_length: 1016,
            max_payload_length: MAX_LENGTH,
            origin_validator: None,
            cookies_validator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: CloseCode,
    pub reason: String,
    /// Whether both close frames were exchanged.
    pub was_clean: bool,
}

/// The callbacks of a session.
#[async_trait]
#[allow(unused_variables)]
pub trait Behavior: Send + Sync + 'static {
    async fn on_open(&self, socket: &WebSocket) {}

    async fn on_message(&self, socket: &WebSocket, message: Message) {}

    /// Only called when [`WebSocketOptions::emit_on_ping`] is set. The pong
    /// is sent either way.
    async fn on_ping(&self, socket: &WebSocket, payload: Bytes) {}

    async fn on_error(&self, socket: &WebSocket, error: &WebSocketError) {}

    async fn on_close(&self, socket: &WebSocket, event: CloseEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// The read side of a session, consumed by [`WebSocket::run`].
pub type SessionReader = FrameReader<ReadHalf<BoxedStream>>;

struct Inner {
    role: Role,
    id: OnceLock<String>,
    state: RwLock<ReadyState>,
    writer: AsyncMutex<WriteHalf<BoxedStream>>,
    negotiated: Negotiated,
    options: WebSocketOptions,
    request: Option<HttpRequest>,
    user: Option<Identity>,
    remote: Option<SocketAddr>,
    pong: Notify,
    done: watch::Sender<bool>,
    aborted: watch::Sender<bool>,
    last_activity: Mutex<Instant>,
    close_status: Mutex<Option<(CloseCode, String)>>,
}

#[derive(Clone)]
pub struct WebSocket(Arc<Inner>);

impl WebSocket {
    /// Wraps a connection whose handshake is complete. The session starts
    /// out open.
    pub fn new(
        role: Role,
        io: Transport,
        negotiated: Negotiated,
        options: WebSocketOptions,
        request: Option<HttpRequest>,
        user: Option<Identity>,
        remote: Option<SocketAddr>,
    ) -> (Self, SessionReader) {
        let (reader, writer) = split(io.stream);
        let reader = FrameReader::new(reader, io.buffer, options.max_payload_length);

        let socket = Self(Arc::new(Inner {
            id: OnceLock::new(),
            state: RwLock::new(ReadyState::Open),
            writer: AsyncMutex::new(writer),
            pong: Notify::new(),
            done: watch::Sender::new(false),
            aborted: watch::Sender::new(false),
            last_activity: Mutex::new(Instant::now()),
            close_status: Mutex::new(None),
            negotiated,
            options,
            request,
            remote,
            role,
            user,
        }));

        (socket, reader)
    }

    /// Opens a client session over a connected stream.
    pub async fn connect(
        stream: BoxedStream,
        host: &str,
        path: &str,
        protocols: &[&str],
        options: WebSocketOptions,
    ) -> Result<(Self, SessionReader), WebSocketError> {
        let mut io = Transport::new(stream);
        let (request, key) = handshake::client_request(host, path, protocols, !options.ignore_extensions);
        io.stream.write_all(&request.to_bytes()).await?;
        io.stream.flush().await?;

        let mut reader = HeadReader::new(MAX_HEADER_LENGTH);
        loop {
            let (size, done) = reader.feed(&io.buffer)?;
            io.buffer.advance(size);
            if done {
                break;
            }

            if io.stream.read_buf(&mut io.buffer).await? == 0 {
                return Err(IoError::new(ErrorKind::UnexpectedEof, "no handshake response").into());
            }
        }

        let response = HttpResponse::from_lines(&reader.take_lines())?;
        let negotiated = handshake::verify_response(&response, &key, protocols)?;

        Ok(Self::new(Role::Client, io, negotiated, options, Some(request), None, None))
    }

    /// The id the session manager assigned, once added.
    pub fn id(&self) -> Option<&str> {
        self.0.id.get().map(String::as_str)
    }

    pub(crate) fn set_id(&self, id: String) {
        let _ = self.0.id.set(id);
    }

    pub fn state(&self) -> ReadyState {
        *self.0.state.read()
    }

    pub fn role(&self) -> Role {
        self.0.role
    }

    pub fn protocol(&self) -> Option<&str> {
        self.0.negotiated.protocol.as_deref()
    }

    pub fn extensions(&self) -> Option<&str> {
        self.0.negotiated.extensions.as_deref()
    }

    pub fn compression(&self) -> CompressionMethod {
        self.0.negotiated.compression
    }

    /// The handshake request.
    pub fn request(&self) -> Option<&HttpRequest> {
        self.0.request.as_ref()
    }

    pub fn user(&self) -> Option<&Identity> {
        self.0.user.as_ref()
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.0.remote
    }

    pub fn options(&self) -> &WebSocketOptions {
        &self.0.options
    }

    /// When the last frame arrived.
    pub fn last_activity(&self) -> Instant {
        *self.0.last_activity.lock()
    }

    /// The close code and reason, once the session closes.
    pub fn close_status(&self) -> Option<(CloseCode, String)> {
        self.0.close_status.lock().clone()
    }

    fn masked(&self) -> bool {
        self.0.role == Role::Client
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Whether the caller is inside one of this session's callbacks.
    fn in_reader(&self) -> bool {
        READER.try_with(|key| *key == self.key()).unwrap_or(false)
    }

    /// Aborts the session unless it closes within the wait time.
    fn close_timer(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut done = this.0.done.subscribe();
            if timeout(this.0.options.wait_time, closed(&mut done)).await.is_err() {
                log::debug!("close handshake timed out: session={:?}", this.id());
                this.abort();
            }
        });
    }

    fn ensure_open(&self) -> Result<(), WebSocketError> {
        match self.state() {
            ReadyState::Open => Ok(()),
            state => Err(WebSocketError::InvalidState(state)),
        }
    }

    /// Writes frames back to back; no other send can come between them.
    async fn write_frames(&self, frames: &[Frame]) -> Result<(), WebSocketError> {
        let mut buf = BytesMut::with_capacity(frames.iter().map(Frame::encoded_len).sum());
        for frame in frames {
            log::trace!("send frame: session={:?}\n{frame}", self.id());
            frame.encode(&mut buf);
        }

        let mut writer = self.0.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    fn data_frames(&self, opcode: Opcode, data: &[u8]) -> Result<Vec<Frame>, WebSocketError> {
        let compression = self.0.negotiated.compression;
        let compressed = compression != CompressionMethod::None && !data.is_empty();
        let payload = if compressed {
            compression.compress(data)?
        } else {
            data.to_vec()
        };

        let size = self.0.options.fragment_length.max(1);
        if payload.len() <= size {
            return Ok(vec![Frame::new(Fin::Final, opcode, payload, compressed, self.masked())]);
        }

        let count = payload.len().div_ceil(size);
        Ok(payload
            .chunks(size)
            .enumerate()
            .map(|(index, chunk)| {
                let opcode = if index == 0 { opcode } else { Opcode::Continuation };
                let fin = Fin::from(index + 1 == count);
                Frame::new(fin, opcode, chunk.to_vec(), compressed && index == 0, self.masked())
            })
            .collect())
    }

    pub async fn send(&self, message: Message) -> Result<(), WebSocketError> {
        self.ensure_open()?;

        let frames = self.data_frames(message.opcode(), message.as_bytes())?;
        self.write_frames(&frames).await
    }

    pub async fn send_text(&self, text: &str) -> Result<(), WebSocketError> {
        self.send(Message::Text(text.to_string())).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send(Message::Binary(data.into())).await
    }

    /// Sends `length` bytes read from a source as one binary message.
    ///
    /// Without compression the source is forwarded a fragment at a time,
    /// holding the writer so no other message interleaves. A deflated
    /// message has to be read whole first. A source that ends early sends
    /// what it had.
    pub async fn send_stream<R>(&self, source: R, length: u64) -> Result<(), WebSocketError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.ensure_open()?;

        let mut source = source.take(length);
        if self.0.negotiated.compression != CompressionMethod::None {
            let mut data = Vec::with_capacity(length.min(1 << 20) as usize);
            let read = source.read_to_end(&mut data).await?;
            self.short_stream(length, read as u64);

            let frames = self.data_frames(Opcode::Binary, &data)?;
            return self.write_frames(&frames).await;
        }

        let size = self.0.options.fragment_length.max(1);
        let mut writer = self.0.writer.lock().await;
        let mut opcode = Opcode::Binary;
        let mut sent = 0;
        let mut buf = BytesMut::new();

        loop {
            let mut chunk = Vec::with_capacity(size.min((length - sent) as usize));
            let read = (&mut source).take(size as u64).read_to_end(&mut chunk).await?;
            sent += read as u64;

            let fin = read < size || sent == length;
            let frame = Frame::new(Fin::from(fin), opcode, chunk, false, self.masked());
            log::trace!("send frame: session={:?}\n{frame}", self.id());

            buf.clear();
            frame.encode(&mut buf);
            writer.write_all(&buf).await?;

            if fin {
                break;
            }

            opcode = Opcode::Continuation;
        }

        writer.flush().await?;
        self.short_stream(length, sent);
        Ok(())
    }

    fn short_stream(&self, expected: u64, read: u64) {
        if read < expected {
            log::warn!("stream ended early: session={:?}, expected={expected}, read={read}", self.id());
        }
    }

    /// Pings the peer and waits up to the wait time for a pong.
    pub async fn ping(&self) -> bool {
        self.ping_with(Bytes::new()).await
    }

    pub async fn ping_with(&self, data: Bytes) -> bool {
        if self.state() != ReadyState::Open || data.len() > 125 {
            return false;
        }

        let pong = self.0.pong.notified();
        tokio::pin!(pong);
        pong.as_mut().enable();

        if self.write_frames(&[Frame::ping(data, self.masked())]).await.is_err() {
            return false;
        }

        timeout(self.0.options.wait_time, pong).await.is_ok()
    }

    /// Starts the closing handshake and waits for the peer's answer.
    ///
    /// The connection is torn down when no answer comes within the wait
    /// time. Closing a session that is not open does nothing. `NO_STATUS`
    /// sends an empty close frame and takes no reason.
    ///
    /// Called from a callback, it returns once the frame is written: the
    /// answer can only be read after the callback returns.
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<(), WebSocketError> {
        let payload = if code == CloseCode::NO_STATUS {
            if !reason.is_empty() {
                return Err(WebSocketError::InvalidCloseCode(code.0));
            }

            PayloadData::default()
        } else {
            if !code.is_sendable() {
                return Err(WebSocketError::InvalidCloseCode(code.0));
            }

            if reason.len() > 123 {
                return Err(WebSocketError::ReasonTooLong);
            }

            PayloadData::close(code, reason)
        };

        {
            let mut state = self.0.state.write();
            if *state != ReadyState::Open {
                return Ok(());
            }

            *state = ReadyState::Closing;
        }

        *self.0.close_status.lock() = Some((code, reason.to_string()));

        let mut done = self.0.done.subscribe();
        if let Err(e) = self.write_frames(&[Frame::close(payload, self.masked())]).await {
            log::debug!("close frame not sent: session={:?}, err={e}", self.id());
            self.abort();
            return Ok(());
        }

        if self.in_reader() {
            self.close_timer();
            return Ok(());
        }

        if timeout(self.0.options.wait_time, closed(&mut done)).await.is_err() {
            log::debug!("close handshake timed out: session={:?}", self.id());
            self.abort();
        }

        Ok(())
    }

    /// Closes without waiting.
    pub fn close_async(&self, code: CloseCode, reason: &str) {
        let this = self.clone();
        let reason = reason.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.close(code, &reason).await {
                log::warn!("close failed: session={:?}, err={e}", this.id());
            }
        });
    }

    /// Sends a close frame and drops the connection without waiting for
    /// the answer. For sessions that never run.
    pub(crate) async fn refuse(&self, code: CloseCode, reason: &str) {
        *self.0.state.write() = ReadyState::Closed;
        *self.0.close_status.lock() = Some((code, reason.to_string()));

        let frame = Frame::close(PayloadData::close(code, reason), self.masked());
        if let Err(e) = self.write_frames(&[frame]).await {
            log::debug!("close frame not sent: session={:?}, err={e}", self.id());
        }

        self.shutdown().await;
        self.0.aborted.send_replace(true);
        self.0.done.send_replace(true);
    }

    async fn shutdown(&self) {
        let shutdown = async { self.0.writer.lock().await.shutdown().await };
        match timeout(self.0.options.wait_time, shutdown).await {
            Ok(Ok(())) => (),
            Ok(Err(e)) => log::debug!("socket shutdown failed: session={:?}, err={e}", self.id()),
            Err(_) => log::debug!("socket shutdown timed out: session={:?}", self.id()),
        }
    }

    /// Drops the connection without a closing handshake.
    pub fn abort(&self) {
        *self.0.state.write() = ReadyState::Closed;
        self.0.aborted.send_replace(true);
    }

    /// Reads frames and feeds the behavior until the session closes.
    ///
    /// Fires `on_open` first and `on_close` exactly once at the end.
    pub async fn run(&self, reader: SessionReader, behavior: &dyn Behavior) {
        READER.scope(self.key(), self.read_loop(reader, behavior)).await
    }

    async fn read_loop(&self, mut reader: SessionReader, behavior: &dyn Behavior) {
        behavior.on_open(self).await;

        let mut assembler = Assembler::new(self.0.negotiated.compression, self.0.options.max_payload_length);
        let mut aborted = self.0.aborted.subscribe();

        let result = loop {
            let frame = tokio::select! {
                _ = closed(&mut aborted) => {
                    break Err(IoError::new(ErrorKind::ConnectionAborted, "the session was aborted").into());
                }
                frame = reader.next() => frame,
            };

            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => break Err(e),
            };

            log::trace!("received frame: session={:?}\n{frame}", self.id());
            *self.0.last_activity.lock() = Instant::now();

            match self.process(&mut assembler, frame, behavior).await {
                Ok(true) => (),
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.teardown(result, behavior).await;
    }

    /// Handles one frame. Returns false once the closing handshake is
    /// complete.
    async fn process(
        &self,
        assembler: &mut Assembler,
        frame: Frame,
        behavior: &dyn Behavior,
    ) -> Result<bool, WebSocketError> {
        match (self.0.role, frame.is_masked()) {
            (Role::Server, false) => return Err(codec::Error::UnexpectedFrame("unmasked client frame").into()),
            (Role::Client, true) => return Err(codec::Error::UnexpectedFrame("masked server frame").into()),
            _ => (),
        }

        match assembler.push(frame)? {
            Received::Nothing => (),
            Received::Message(message) => {
                if self.state() == ReadyState::Open {
                    behavior.on_message(self, message).await;
                }
            }
            Received::Ping(payload) => {
                let data = payload.as_bytes().to_vec();
                self.write_frames(&[Frame::pong(payload, self.masked())]).await?;

                if self.0.options.emit_on_ping {
                    behavior.on_ping(self, Bytes::from(data)).await;
                }
            }
            Received::Pong(_) => self.0.pong.notify_waiters(),
            Received::Close(payload) => {
                self.receive_close(payload).await;
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn receive_close(&self, payload: PayloadData) {
        let code = payload.code();
        let reason = payload.reason();

        let previous = {
            let mut state = self.0.state.write();
            let previous = *state;
            if previous == ReadyState::Open {
                *state = ReadyState::Closing;
            }

            previous
        };

        if previous == ReadyState::Closed {
            return;
        }

        if previous == ReadyState::Closing {
            log::debug!("close handshake complete: session={:?}, code={code}", self.id());
            return;
        }

        // A reserved code must not go back on the wire.
        let reply = if payload.has_reserved_code() {
            PayloadData::close(CloseCode::NORMAL, "")
        } else {
            payload
        };

        *self.0.close_status.lock() = Some((code, reason));
        if let Err(e) = self.write_frames(&[Frame::close(reply, self.masked())]).await {
            log::debug!("close reply not sent: session={:?}, err={e}", self.id());
        }
    }

    async fn teardown(&self, result: Result<(), WebSocketError>, behavior: &dyn Behavior) {
        let event = match result {
            Ok(()) => {
                let (code, reason) = self.close_status().unwrap_or((CloseCode::NO_STATUS, String::new()));
                CloseEvent {
                    code,
                    reason,
                    was_clean: true,
                }
            }
            Err(e) => {
                let aborted = *self.0.aborted.borrow();
                let code = if aborted { CloseCode::ABNORMAL } else { e.close_code() };

                if !aborted {
                    log::warn!("session failed: session={:?}, code={code}, err={e}", self.id());
                    behavior.on_error(self, &e).await;

                    if self.state() == ReadyState::Open && code.is_sendable() {
                        let payload = PayloadData::close(code, code.message());
                        if let Err(e) = self.write_frames(&[Frame::close(payload, self.masked())]).await {
                            log::debug!("close frame not sent: session={:?}, err={e}", self.id());
                        }
                    }
                }

                *self.0.close_status.lock() = Some((code, code.message().to_string()));

                CloseEvent {
                    code,
                    reason: code.message().to_string(),
                    was_clean: false,
                }
            }
        };

        *self.0.state.write() = ReadyState::Closed;
        self.shutdown().await;
        self.0.done.send_replace(true);

        log::info!(
            "session closed: session={:?}, code={}, clean={}",
            self.id(),
            event.code,
            event.was_clean
        );

        behavior.on_close(self, event).await;
    }
}

impl Session for WebSocket {
    fn state(&self) -> ReadyState {
        WebSocket::state(self)
    }

    fn close(&self, code: CloseCode, reason: &str) {
        self.close_async(code, reason);
    }

    fn abort(&self) {
        WebSocket::abort(self);
    }

    fn ping(&self) -> impl Future<Output = bool> + Send {
        WebSocket::ping(self)
    }

    fn send(&self, message: Message) -> impl Future<Output = bool> + Send {
        async move { WebSocket::send(self, message).await.is_ok() }
    }
}
