//! Socket ownership, the receive loop and peer selection.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::{UdpSocket, UnixDatagram};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Binding, Datagram, Endpoint, PeerMode, TransportError, INBOX_CAPACITY, MAX_DATAGRAM_SIZE,
};

/// Pull queue of an inbox-mode transport.
pub type Inbox = mpsc::Receiver<Datagram>;

// ============================================================================
// Socket
// ============================================================================

/// Receives through Tokio and sends through a std clone of the same
/// descriptor, so a send works before the runtime has polled the socket.
enum Socket {
    Unix {
        io: UnixDatagram,
        out: std::os::unix::net::UnixDatagram,
    },
    Udp {
        io: UdpSocket,
        out: std::net::UdpSocket,
    },
}

impl Socket {
    fn unix(sock: std::os::unix::net::UnixDatagram) -> io::Result<Self> {
        sock.set_nonblocking(true)?;
        let out = sock.try_clone()?;
        Ok(Self::Unix {
            io: UnixDatagram::from_std(sock)?,
            out,
        })
    }

    fn udp(sock: std::net::UdpSocket) -> io::Result<Self> {
        sock.set_nonblocking(true)?;
        let out = sock.try_clone()?;
        Ok(Self::Udp {
            io: UdpSocket::from_std(sock)?,
            out,
        })
    }

    fn local_udp_addr(&self) -> Option<Endpoint> {
        match self {
            Self::Udp { out, .. } => out.local_addr().ok().map(Endpoint::Udp),
            Self::Unix { .. } => None,
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<Endpoint>)> {
        match self {
            Self::Unix { io, .. } => {
                let (len, addr) = io.recv_from(buf).await?;
                let from = addr.as_pathname().map(|p| Endpoint::Unix(p.to_path_buf()));
                Ok((len, from))
            }
            Self::Udp { io, .. } => {
                let (len, addr) = io.recv_from(buf).await?;
                Ok((len, Some(Endpoint::Udp(addr))))
            }
        }
    }

    fn send_to(&self, bytes: &[u8], to: &Endpoint) -> io::Result<usize> {
        match (self, to) {
            (Self::Unix { out, .. }, Endpoint::Unix(path)) => out.send_to(bytes, path),
            (Self::Udp { out, .. }, Endpoint::Udp(addr)) => out.send_to(bytes, *addr),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "peer address family does not match the socket",
            )),
        }
    }
}

fn bind_unix(path: &Path) -> Result<Socket, TransportError> {
    let setup_err = |e: io::Error| TransportError::SocketSetup {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    // A stale file from a crashed process would make bind fail
    if path.exists() {
        std::fs::remove_file(path).map_err(setup_err)?;
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(setup_err)?;
        }
    }
    std::os::unix::net::UnixDatagram::bind(path)
        .and_then(Socket::unix)
        .map_err(setup_err)
}

fn bind_udp(addr: SocketAddr) -> Result<Socket, TransportError> {
    let bind_err = |e: io::Error| TransportError::Bind {
        addr: addr.to_string(),
        error: e.to_string(),
    };
    std::net::UdpSocket::bind(addr)
        .and_then(Socket::udp)
        .map_err(bind_err)
}

fn bind(binding: &Binding) -> Result<(Socket, Option<Endpoint>, Option<PathBuf>), TransportError> {
    match (&binding.local, &binding.remote) {
        (Some(Endpoint::Unix(path)), _) => {
            let sock = bind_unix(path)?;
            Ok((sock, binding.local.clone(), Some(path.clone())))
        }
        (Some(Endpoint::Udp(addr)), _) => {
            let sock = bind_udp(*addr)?;
            let local = sock.local_udp_addr();
            Ok((sock, local.or_else(|| binding.local.clone()), None))
        }
        (None, Some(Endpoint::Unix(_))) => {
            let sock = std::os::unix::net::UnixDatagram::unbound()
                .and_then(Socket::unix)
                .map_err(|e| TransportError::Bind {
                    addr: "unbound unix".to_string(),
                    error: e.to_string(),
                })?;
            Ok((sock, None, None))
        }
        (None, Some(Endpoint::Udp(remote))) => {
            let any = if remote.is_ipv4() {
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
            } else {
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
            };
            let sock = bind_udp(any)?;
            let local = sock.local_udp_addr();
            Ok((sock, local, None))
        }
        (None, None) => Err(TransportError::NoEndpoint),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Transport
// ============================================================================

/// State shared with the receive task.
struct Shared {
    socket: Socket,
    local: Option<Endpoint>,
    mode: PeerMode,
    /// Configured default peer
    peer: Mutex<Option<Endpoint>>,
    /// Most recent sender, consulted in server mode
    last_sender: Mutex<Option<Endpoint>>,
}

impl Shared {
    fn destination(&self) -> Option<Endpoint> {
        if self.mode == PeerMode::Server {
            if let Some(sender) = lock(&self.last_sender).clone() {
                return Some(sender);
            }
        }
        lock(&self.peer).clone()
    }
}

struct Inner {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    /// Socket file removed when the last handle drops
    unlink: Option<PathBuf>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(path) = &self.unlink {
            if let Err(e) = std::fs::remove_file(path) {
                debug!(socket = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}

/// A bound datagram endpoint. Clones share the socket.
///
/// Constructors must run inside a Tokio runtime.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Binds and queues every inbound datagram for the owner to drain.
    pub fn with_inbox(binding: &Binding, mode: PeerMode) -> Result<(Self, Inbox), TransportError> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let transport = Self::with_handler(binding, mode, move |datagram| {
            match tx.try_send(datagram) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("Inbox full, dropping datagram"),
                Err(TrySendError::Closed(_)) => debug!("Inbox closed, dropping datagram"),
            }
        })?;
        Ok((transport, rx))
    }

    /// Binds and runs `handler` on the receive task for every inbound
    /// datagram. A slow handler delays only this transport.
    pub fn with_handler<F>(binding: &Binding, mode: PeerMode, handler: F) -> Result<Self, TransportError>
    where
        F: FnMut(Datagram) + Send + 'static,
    {
        let transport = Self::open(binding, mode)?;
        spawn_receiver(
            Arc::clone(&transport.inner.shared),
            transport.inner.cancel.clone(),
            handler,
        );
        Ok(transport)
    }

    /// Binds without a receive task.
    pub fn send_only(binding: &Binding) -> Result<Self, TransportError> {
        Self::open(binding, PeerMode::Client)
    }

    fn open(binding: &Binding, mode: PeerMode) -> Result<Self, TransportError> {
        let (socket, local, unlink) = bind(binding)?;
        info!(
            local = %local.as_ref().map_or_else(|| "-".to_string(), Endpoint::to_string),
            remote = %binding.remote.as_ref().map_or_else(|| "-".to_string(), Endpoint::to_string),
            "Transport bound"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared {
                    socket,
                    local,
                    mode,
                    peer: Mutex::new(binding.remote.clone()),
                    last_sender: Mutex::new(None),
                }),
                cancel: CancellationToken::new(),
                unlink,
            }),
        })
    }

    /// Sends to the current peer. Failures are logged, never returned.
    pub fn send(&self, bytes: &[u8]) {
        match self.inner.shared.destination() {
            Some(peer) => self.send_to(bytes, &peer),
            None => debug!(len = bytes.len(), "No peer yet, dropping datagram"),
        }
    }

    /// Sends to an explicit address. Failures are logged, never returned.
    pub fn send_to(&self, bytes: &[u8], to: &Endpoint) {
        match self.inner.shared.socket.send_to(bytes, to) {
            Ok(_) => {}
            Err(e) => debug!(peer = %to, error = %e, "Send failed"),
        }
    }

    /// Replaces the default peer and forgets the last sender.
    pub fn set_peer(&self, peer: Endpoint) {
        *lock(&self.inner.shared.peer) = Some(peer);
        *lock(&self.inner.shared.last_sender) = None;
    }

    /// Where `send` would deliver right now.
    pub fn peer(&self) -> Option<Endpoint> {
        self.inner.shared.destination()
    }

    pub fn local_addr(&self) -> Option<&Endpoint> {
        self.inner.shared.local.as_ref()
    }

    pub fn mode(&self) -> PeerMode {
        self.inner.shared.mode
    }

    /// Stops the receive task. Sends keep working.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("local", &self.inner.shared.local)
            .field("peer", &self.peer())
            .field("mode", &self.inner.shared.mode)
            .finish()
    }
}

fn spawn_receiver<F>(shared: Arc<Shared>, cancel: CancellationToken, mut handler: F)
where
    F: FnMut(Datagram) + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Receive loop stopping");
                    break;
                }

                result = shared.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => {
                            let bytes = buf.get(..len).map(<[u8]>::to_vec).unwrap_or_default();
                            if shared.mode == PeerMode::Server {
                                if let Some(sender) = &from {
                                    *lock(&shared.last_sender) = Some(sender.clone());
                                }
                            }
                            handler(Datagram { bytes, from });
                        }
                        Err(e) => {
                            warn!(error = %e, "Receive failed");
                        }
                    }
                }
            }
        }
    });
}
