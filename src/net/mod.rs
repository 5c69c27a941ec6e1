//! The HTTP listener.
//!
//! An [`EndPointListener`](endpoint::EndPointListener) owns one listening
//! socket per address and routes each request to the logical
//! [`HttpListener`](listener::HttpListener) whose prefix matches best. The
//! process wide [`manager`] keeps the endpoints.

pub mod connection;
pub mod context;
pub mod endpoint;
pub mod listener;
pub mod manager;
pub mod stream;

#[cfg(feature = "ssl")]
pub mod tls;

use std::{
    borrow::Cow,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
};

/// Any byte stream a connection can run on, plain or TLS.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedStream = Box<dyn Stream>;

/// The raw stream of a connection and the bytes read from it that no one
/// has consumed yet.
pub struct Transport {
    pub stream: BoxedStream,
    pub buffer: BytesMut,
}

impl Transport {
    pub fn new(stream: BoxedStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(8192),
        }
    }
}

/// Closes a connection from outside its task.
///
/// The connection watches the flag around every read, write and handler
/// call and drops its socket as soon as the flag is raised.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: u64,
    pub remote: SocketAddr,
    closer: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    pub fn new(remote: SocketAddr) -> (Self, watch::Receiver<bool>) {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let (closer, closed) = watch::channel(false);
        let handle = Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            remote,
            closer: Arc::new(closer),
        };

        (handle, closed)
    }

    pub fn close(&self) {
        self.closer.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closer.borrow()
    }
}

/// Resolves once the close flag is raised or every handle is gone.
pub async fn closed(receiver: &mut watch::Receiver<bool>) {
    let _ = receiver.wait_for(|closed| *closed).await;
}

/// Decodes `%XX` escapes in a path. Malformed escapes are kept as they
/// are, and `+` is not a space here.
pub fn percent_decode(value: &str) -> Cow<'_, str> {
    if !value.contains('%') {
        return Cow::Borrowed(value);
    }

    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1), bytes.get(i + 2)) {
            (b'%', Some(hi), Some(lo)) => match (hex_value(*hi), hex_value(*lo)) {
                (Some(hi), Some(lo)) => {
                    decoded.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    decoded.push(b'%');
                    i += 1;
                }
            },
            (byte, _, _) => {
                decoded.push(byte);
                i += 1;
            }
        }
    }

    Cow::Owned(String::from_utf8_lossy(&decoded).into_owned())
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
