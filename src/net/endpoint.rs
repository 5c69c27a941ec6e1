use std::{net::SocketAddr, sync::Arc};

use ahash::{HashMap, HashMapExt};
use anyhow::Result;
use parking_lot::Mutex;
use service::{ListenerPrefix, PrefixTable, RoutingError};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::watch,
};

#[cfg(feature = "ssl")]
use tokio_rustls::TlsAcceptor;

use super::{
    BoxedStream, ConnectionHandle, closed,
    connection::HttpConnection,
    listener::{HttpListener, ListenerOptions},
};

/// One listening socket and the listeners routed through it.
pub struct EndPointListener {
    address: SocketAddr,
    secure: bool,
    options: ListenerOptions,
    prefixes: PrefixTable<HttpListener>,
    unregistered: Mutex<HashMap<u64, ConnectionHandle>>,
    shutdown: watch::Sender<bool>,
    #[cfg(feature = "ssl")]
    acceptor: Option<TlsAcceptor>,
}

impl EndPointListener {
    /// Binds the socket and starts accepting.
    ///
    /// A secure endpoint resolves its certificate here and fails when it
    /// has none. Must be called inside a tokio runtime.
    pub fn bind(address: SocketAddr, secure: bool, options: &ListenerOptions) -> Result<Arc<Self>> {
        #[cfg(feature = "ssl")]
        let acceptor = if secure {
            Some(super::tls::acceptor(
                options.certificate_folder.as_deref(),
                address.port(),
                options.ssl.as_ref(),
            )?)
        } else {
            None
        };

        #[cfg(not(feature = "ssl"))]
        if secure {
            anyhow::bail!("https prefixes need the ssl feature: address={address}");
        }

        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        if options.reuse_address {
            socket.set_reuseaddr(true)?;
        }

        socket.bind(address)?;
        let listener = socket.listen(1024)?;
        let address = listener.local_addr()?;

        let (shutdown, receiver) = watch::channel(false);
        let this = Arc::new(Self {
            address,
            secure,
            options: options.clone(),
            prefixes: PrefixTable::default(),
            unregistered: Mutex::new(HashMap::with_capacity(64)),
            shutdown,
            #[cfg(feature = "ssl")]
            acceptor,
        });

        tokio::spawn(this.clone().accept(listener, receiver));

        log::info!("endpoint listening: address={address}, secure={secure}");

        Ok(this)
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    async fn accept(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            let (socket, remote) = tokio::select! {
                _ = closed(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::warn!("accept failed: interface={}, err={e}", self.address);
                        continue;
                    }
                },
            };

            if let Err(e) = socket.set_nodelay(true) {
                log::error!("socket set nodelay failed!: addr={remote}, err={e}");
            }

            let this = self.clone();
            tokio::spawn(async move {
                let local = socket.local_addr().unwrap_or(this.address);
                let Some(stream) = this.wrap(socket, remote).await else {
                    return;
                };

                log::debug!("connection accepted: addr={remote}, interface={local}");

                HttpConnection::new(this, stream, remote, local).run().await;
            });
        }

        log::info!("endpoint closed: address={}", self.address);
    }

    #[cfg_attr(not(feature = "ssl"), allow(unused_variables))]
    async fn wrap(&self, socket: TcpStream, remote: SocketAddr) -> Option<BoxedStream> {
        #[cfg(feature = "ssl")]
        if let Some(acceptor) = &self.acceptor {
            return match acceptor.accept(socket).await {
                Ok(stream) => Some(Box::new(stream)),
                Err(e) => {
                    log::warn!("tls handshake failed: addr={remote}, err={e}");
                    None
                }
            };
        }

        Some(Box::new(socket))
    }

    /// The listener serving a request, and the prefix it matched.
    pub fn search(&self, host: &str, port: u16, path: &str) -> Option<(HttpListener, ListenerPrefix)> {
        self.prefixes.search(host, port, path)
    }

    pub fn add_prefix(&self, prefix: ListenerPrefix, listener: HttpListener) -> Result<(), RoutingError> {
        self.prefixes.add(prefix, listener)
    }

    /// Returns whether the endpoint has no prefix left.
    pub fn remove_prefix(&self, prefix: &ListenerPrefix, listener: &HttpListener) -> bool {
        self.prefixes.remove(prefix, listener);
        self.prefixes.is_empty()
    }

    pub fn prefixes(&self) -> Vec<ListenerPrefix> {
        self.prefixes
            .entries()
            .into_iter()
            .map(|(prefix, _)| prefix)
            .collect()
    }

    pub(crate) fn add_unregistered(&self, handle: &ConnectionHandle) {
        self.unregistered.lock().insert(handle.id, handle.clone());
    }

    pub(crate) fn remove_unregistered(&self, id: u64) {
        self.unregistered.lock().remove(&id);
    }

    /// Stops accepting and closes every connection no listener has taken.
    pub fn close(&self) {
        self.shutdown.send_replace(true);

        let connections = std::mem::take(&mut *self.unregistered.lock());
        for handle in connections.values() {
            handle.close();
        }
    }
}
