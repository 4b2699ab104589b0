//! Socket tasks for one control connection.
//!
//! Each connection gets a reader task that forwards bytes to the service and
//! a writer task fed through an unbounded queue. Both report the end of the
//! stream as [`SocketEvent::Closed`].

use std::io;
use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::constants::MAX_MESSAGE_SIZE;
use crate::engine::ConnId;

/// Something happened on a socket owned by the service.
#[derive(Debug)]
pub(crate) enum SocketEvent {
    /// An outbound connect completed.
    Connected { conn: ConnId, stream: TcpStream },
    /// An outbound connect failed.
    ConnectFailed { conn: ConnId, error: io::Error },
    /// Bytes were read.
    Data { conn: ConnId, bytes: Vec<u8> },
    /// The stream ended or failed.
    Closed { conn: ConnId },
}

/// Open a TCP connection to `peer`, bound to `local` when given.
pub(crate) async fn connect(local: Option<IpAddr>, peer: SocketAddr) -> io::Result<TcpStream> {
    let socket = if peer.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(ip) = local.filter(|ip| !ip.is_unspecified()) {
        socket.bind(SocketAddr::new(ip, 0))?;
    }
    socket.connect(peer).await
}

/// Spawn a task that opens the connection and reports the outcome.
pub(crate) fn spawn_connect(
    conn: ConnId,
    local: Option<IpAddr>,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    tokio::spawn(async move {
        let event = match connect(local, peer).await {
            Ok(stream) => SocketEvent::Connected { conn, stream },
            Err(error) => SocketEvent::ConnectFailed { conn, error },
        };
        let _ = events.send(event);
    });
}

/// Reader and writer tasks of a live connection.
#[derive(Debug)]
pub(crate) struct ConnectionTasks {
    writer: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
}

impl ConnectionTasks {
    /// Split `stream` and start its tasks.
    pub fn spawn(conn: ConnId, stream: TcpStream, events: mpsc::UnboundedSender<SocketEvent>) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("{}: TCP_NODELAY: {}", conn, e);
        }
        let (read_half, write_half) = stream.into_split();
        let (writer, queue) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(conn, read_half, events.clone()));
        tokio::spawn(write_loop(conn, write_half, queue, events));
        Self { writer, reader }
    }

    /// Queue bytes for the writer. Returns false once the writer is gone.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        self.writer.send(bytes).is_ok()
    }

    /// Stop reading. The writer flushes what is queued and shuts the stream.
    pub fn close(self) {
        self.reader.abort();
    }
}

async fn read_loop(conn: ConnId, mut stream: OwnedReadHalf, events: mpsc::UnboundedSender<SocketEvent>) {
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE * 4];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = SocketEvent::Data {
                    conn,
                    bytes: buf[..n].to_vec(),
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("{}: read: {}", conn, e);
                break;
            }
        }
    }
    let _ = events.send(SocketEvent::Closed { conn });
}

async fn write_loop(
    conn: ConnId,
    mut stream: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    while let Some(bytes) = queue.recv().await {
        if let Err(e) = stream.write_all(&bytes).await {
            debug!("{}: write: {}", conn, e);
            let _ = events.send(SocketEvent::Closed { conn });
            return;
        }
    }
    let _ = stream.shutdown().await;
}
