//! Reference-counted TCP listeners.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::ListenerConfig;

/// Errors from the listener manager.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Binding failed with an error that retrying cannot fix.
    #[error("bind {addr} failed: {source}")]
    Bind {
        /// Address that was being bound.
        addr: SocketAddr,
        /// Underlying error.
        source: io::Error,
    },

    /// Binding kept failing until the retry budget ran out.
    #[error("bind {addr} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Address that was being bound.
        addr: SocketAddr,
        /// Bind attempts made.
        attempts: u32,
        /// Error from the last attempt.
        source: io::Error,
    },

    /// The handle does not name a live listener.
    #[error("unknown listener")]
    UnknownListener,
}

/// A TCP connection accepted by one of the listeners.
#[derive(Debug)]
pub struct Accepted {
    /// Accepted stream.
    pub stream: TcpStream,
    /// Local address the connection arrived on.
    pub local: SocketAddr,
    /// Remote address.
    pub peer: SocketAddr,
}

/// Handle to an acquired listener.
///
/// Every `acquire` of the same address and port returns the same handle;
/// each must be matched by a `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    id: u64,
    local_addr: SocketAddr,
}

impl ListenerHandle {
    /// Address the listener is bound to, with the real port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Where the outcome of an `acquire` is delivered.
pub type AcquireReply = oneshot::Sender<Result<ListenerHandle, ListenerError>>;

/// A bind started by [`ListenerManager::acquire`] has finished.
///
/// Hand it back to [`ListenerManager::on_bound`].
#[derive(Debug)]
pub struct BindOutcome {
    key: SocketAddr,
    result: Result<TcpListener, ListenerError>,
}

#[derive(Debug)]
struct Entry {
    handle: ListenerHandle,
    refs: usize,
    task: JoinHandle<()>,
}

/// A bind in progress and everyone waiting on it.
#[derive(Debug)]
struct Binding {
    waiters: Vec<AcquireReply>,
    task: JoinHandle<()>,
}

/// Shares one listening socket among every user of an address and port.
///
/// The manager never waits: binding, with its retries, runs on a spawned
/// task whose [`BindOutcome`] the owner feeds back through `on_bound`.
#[derive(Debug)]
pub struct ListenerManager {
    config: ListenerConfig,
    entries: HashMap<SocketAddr, Entry>,
    binding: HashMap<SocketAddr, Binding>,
    accepted: mpsc::Sender<Accepted>,
    bound: mpsc::UnboundedSender<BindOutcome>,
    next_id: u64,
}

impl ListenerManager {
    /// Create a manager that hands accepted connections to `accepted` and
    /// finished binds to `bound`.
    pub fn new(
        config: ListenerConfig,
        accepted: mpsc::Sender<Accepted>,
        bound: mpsc::UnboundedSender<BindOutcome>,
    ) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            binding: HashMap::new(),
            accepted,
            bound,
            next_id: 0,
        }
    }

    /// Listener configuration.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Listen on `addr:port`, sharing an existing listener when there is one.
    ///
    /// Port 0 selects the configured default port. The handle is sent on
    /// `reply` at once when the listener exists, otherwise when its bind
    /// completes. Acquires of a tuple that is still binding join that bind.
    pub fn acquire(&mut self, addr: IpAddr, port: u16, reply: AcquireReply) {
        let port = if port == 0 { self.config.default_port } else { port };
        let key = SocketAddr::new(addr, port);
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refs += 1;
            debug!("listener {}: {} users", key, entry.refs);
            let _ = reply.send(Ok(entry.handle));
            return;
        }
        if let Some(binding) = self.binding.get_mut(&key) {
            binding.waiters.push(reply);
            return;
        }

        let config = self.config.clone();
        let bound = self.bound.clone();
        let task = tokio::spawn(async move {
            let result = bind(key, &config).await;
            let _ = bound.send(BindOutcome { key, result });
        });
        self.binding.insert(
            key,
            Binding {
                waiters: vec![reply],
                task,
            },
        );
    }

    /// Finish an acquire: open the listener or fail its waiters.
    ///
    /// Only waiters still listening for the handle count as users; if none
    /// is left the socket is dropped.
    pub fn on_bound(&mut self, outcome: BindOutcome) {
        let BindOutcome { key, result } = outcome;
        let Some(binding) = self.binding.remove(&key) else {
            return;
        };
        let (listener, local_addr) = match result.and_then(|listener| {
            let local_addr = listener
                .local_addr()
                .map_err(|source| ListenerError::Bind { addr: key, source })?;
            Ok((listener, local_addr))
        }) {
            Ok(bound) => bound,
            Err(e) => {
                warn!("{}", e);
                for waiter in binding.waiters {
                    let _ = waiter.send(Err(e.duplicate()));
                }
                return;
            }
        };

        let handle = ListenerHandle {
            id: self.next_id,
            local_addr,
        };
        self.next_id += 1;
        let refs = binding
            .waiters
            .into_iter()
            .filter(|waiter| !waiter.is_closed())
            .map(|waiter| waiter.send(Ok(handle)))
            .filter(Result::is_ok)
            .count();
        if refs == 0 {
            debug!("listener {}: nobody waiting, closed", local_addr);
            return;
        }
        info!("listening for PPTP connections on {}", local_addr);
        let task = tokio::spawn(accept_loop(listener, local_addr, self.accepted.clone()));
        self.entries.insert(key, Entry { handle, refs, task });
    }

    /// Drop one use of a listener, closing it with the last.
    pub fn release(&mut self, handle: ListenerHandle) -> Result<(), ListenerError> {
        let key = self
            .entries
            .iter()
            .find(|(_, entry)| entry.handle == handle)
            .map(|(key, _)| *key)
            .ok_or(ListenerError::UnknownListener)?;
        let Some(entry) = self.entries.get_mut(&key) else {
            return Err(ListenerError::UnknownListener);
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            debug!("listener {}: {} users", key, entry.refs);
            return Ok(());
        }
        if let Some(entry) = self.entries.remove(&key) {
            entry.task.abort();
            info!("stopped listening on {}", entry.handle.local_addr);
        }
        Ok(())
    }

    /// Users of a listener, `None` once it is closed.
    pub fn refs(&self, handle: ListenerHandle) -> Option<usize> {
        self.entries
            .values()
            .find(|entry| entry.handle == handle)
            .map(|entry| entry.refs)
    }

    /// Number of open listeners.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no listener is open.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of binds still in progress.
    pub fn binding(&self) -> usize {
        self.binding.len()
    }

    /// Close every listener regardless of users and abandon pending binds.
    pub fn close_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.task.abort();
        }
        for (_, binding) in self.binding.drain() {
            binding.task.abort();
        }
    }
}

impl Drop for ListenerManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl ListenerError {
    /// Same error for another waiter; the I/O source keeps kind and text.
    fn duplicate(&self) -> Self {
        let copy = |e: &io::Error| io::Error::new(e.kind(), e.to_string());
        match self {
            Self::Bind { addr, source } => Self::Bind {
                addr: *addr,
                source: copy(source),
            },
            Self::RetriesExhausted {
                addr,
                attempts,
                source,
            } => Self::RetriesExhausted {
                addr: *addr,
                attempts: *attempts,
                source: copy(source),
            },
            Self::UnknownListener => Self::UnknownListener,
        }
    }
}

/// Bind `addr`, retrying address-in-use and address-not-available.
async fn bind(addr: SocketAddr, config: &ListenerConfig) -> Result<TcpListener, ListenerError> {
    let mut attempt = 0;
    loop {
        let source = match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => e,
        };
        let transient = matches!(
            source.kind(),
            io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable
        );
        if !transient {
            return Err(ListenerError::Bind { addr, source });
        }
        if attempt >= config.max_retries {
            return Err(ListenerError::RetriesExhausted {
                addr,
                attempts: attempt + 1,
                source,
            });
        }
        let delay = config.retry_delay(attempt);
        warn!("bind {} failed: {}; retrying in {:?}", addr, source, delay);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

async fn accept_loop(listener: TcpListener, local: SocketAddr, accepted: mpsc::Sender<Accepted>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("{}: accepted connection from {}", local, peer);
                // A wildcard listener learns the real local address per stream.
                let conn_local = stream.local_addr().unwrap_or(local);
                let conn = Accepted {
                    stream,
                    local: conn_local,
                    peer,
                };
                if accepted.send(conn).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("{}: accept failed: {}", local, e),
        }
    }
}
