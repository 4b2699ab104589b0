//! The control service: one tokio task that owns the engine.
//!
//! The task multiplexes adapter commands, socket events, accepted
//! connections and the engine's next timer deadline. Each event runs to
//! completion against the engine, then queued outputs are carried out and
//! deferred frees are reaped before the next event is taken.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{ConnectionTasks, SocketEvent, spawn_connect};
use crate::core::error::EngineError;
use crate::core::traits::{CallPolicy, LinkOwner};
use crate::engine::{
    CallHandle, CallRequest, ConnId, ConnectionStatus, ControlState, Engine, EngineConfig, Output,
    SessionInfo,
};
use crate::listener::{
    Accepted, BindOutcome, ListenerConfig, ListenerError, ListenerHandle, ListenerManager,
};

/// Capacity of the command queue.
const COMMAND_QUEUE: usize = 256;

/// Capacity of the accepted-connection queue.
const ACCEPT_QUEUE: usize = 64;

/// Wake-up interval when no timer is armed.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

/// Errors returned through a [`ControlHandle`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The engine refused the request.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A listener could not be opened or closed.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// The service task has stopped.
    #[error("control service shut down")]
    Shutdown,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Originate {
        request: CallRequest,
        owner: Box<dyn LinkOwner>,
        reply: Reply<Result<CallHandle, EngineError>>,
    },
    Answer {
        handle: CallHandle,
        result: u8,
        error: u8,
        cause: u16,
        speed: u32,
        reply: Reply<Result<(), EngineError>>,
    },
    CallConnected {
        handle: CallHandle,
        speed: u32,
        reply: Reply<Result<(), EngineError>>,
    },
    CloseCall {
        handle: CallHandle,
        result: u8,
        error: u8,
        cause: u16,
        reply: Reply<Result<(), EngineError>>,
    },
    SetLinkInfo {
        handle: CallHandle,
        send_accm: u32,
        recv_accm: u32,
        reply: Reply<Result<(), EngineError>>,
    },
    CloseConnection {
        conn: ConnId,
        reply: Reply<Result<(), EngineError>>,
    },
    SessionInfo {
        handle: CallHandle,
        reply: Reply<Option<SessionInfo>>,
    },
    Names {
        handle: CallHandle,
        reply: Reply<Option<(String, String)>>,
    },
    Status {
        reply: Reply<Vec<ConnectionStatus>>,
    },
    Listen {
        addr: IpAddr,
        port: u16,
        reply: Reply<Result<ListenerHandle, ListenerError>>,
    },
    Unlisten {
        handle: ListenerHandle,
        reply: Reply<Result<(), ListenerError>>,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running [`ControlService`].
///
/// Every method is a round trip to the service task; they fail with
/// [`ServiceError::Shutdown`] once the service is gone.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Originate { .. } => "Originate",
            Self::Answer { .. } => "Answer",
            Self::CallConnected { .. } => "CallConnected",
            Self::CloseCall { .. } => "CloseCall",
            Self::SetLinkInfo { .. } => "SetLinkInfo",
            Self::CloseConnection { .. } => "CloseConnection",
            Self::SessionInfo { .. } => "SessionInfo",
            Self::Names { .. } => "Names",
            Self::Status { .. } => "Status",
            Self::Listen { .. } => "Listen",
            Self::Unlisten { .. } => "Unlisten",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl ControlHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| ServiceError::Shutdown)?;
        rx.await.map_err(|_| ServiceError::Shutdown)
    }

    /// Propose a call to a peer. See [`Engine::originate_call`].
    pub async fn originate_call(
        &self,
        request: CallRequest,
        owner: Box<dyn LinkOwner>,
    ) -> Result<CallHandle, ServiceError> {
        Ok(self
            .request(|reply| Command::Originate {
                request,
                owner,
                reply,
            })
            .await??)
    }

    /// Report the outcome of a dial the peer asked for.
    pub async fn answer_call(
        &self,
        handle: CallHandle,
        result: u8,
        error: u8,
        cause: u16,
        speed: u32,
    ) -> Result<(), ServiceError> {
        Ok(self
            .request(|reply| Command::Answer {
                handle,
                result,
                error,
                cause,
                speed,
                reply,
            })
            .await??)
    }

    /// Report that an incoming call we offered is connected.
    pub async fn call_connected(&self, handle: CallHandle, speed: u32) -> Result<(), ServiceError> {
        Ok(self
            .request(|reply| Command::CallConnected {
                handle,
                speed,
                reply,
            })
            .await??)
    }

    /// Tear a call down.
    pub async fn close_call(
        &self,
        handle: CallHandle,
        result: u8,
        error: u8,
        cause: u16,
    ) -> Result<(), ServiceError> {
        Ok(self
            .request(|reply| Command::CloseCall {
                handle,
                result,
                error,
                cause,
                reply,
            })
            .await??)
    }

    /// Send new link framing parameters to the peer.
    pub async fn set_link_info(
        &self,
        handle: CallHandle,
        send_accm: u32,
        recv_accm: u32,
    ) -> Result<(), ServiceError> {
        Ok(self
            .request(|reply| Command::SetLinkInfo {
                handle,
                send_accm,
                recv_accm,
                reply,
            })
            .await??)
    }

    /// Close a control connection and every call on it.
    pub async fn close_connection(&self, conn: ConnId) -> Result<(), ServiceError> {
        Ok(self
            .request(|reply| Command::CloseConnection { conn, reply })
            .await??)
    }

    /// Addressing of a live call.
    pub async fn session_info(&self, handle: CallHandle) -> Result<Option<SessionInfo>, ServiceError> {
        self.request(|reply| Command::SessionInfo { handle, reply })
            .await
    }

    /// Host name we advertise on the call's connection.
    pub async fn self_name(&self, handle: CallHandle) -> Result<Option<String>, ServiceError> {
        let names = self.request(|reply| Command::Names { handle, reply }).await?;
        Ok(names.map(|(ours, _)| ours))
    }

    /// Host name the peer advertised on the call's connection.
    pub async fn peer_name(&self, handle: CallHandle) -> Result<Option<String>, ServiceError> {
        let names = self.request(|reply| Command::Names { handle, reply }).await?;
        Ok(names.map(|(_, theirs)| theirs))
    }

    /// One status line per control connection.
    pub async fn status(&self) -> Result<Vec<ConnectionStatus>, ServiceError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Accept PPTP connections on `addr:port`. Port 0 selects the default.
    pub async fn listen(&self, addr: IpAddr, port: u16) -> Result<ListenerHandle, ServiceError> {
        Ok(self
            .request(|reply| Command::Listen { addr, port, reply })
            .await??)
    }

    /// Drop one use of a listener.
    pub async fn unlisten(&self, handle: ListenerHandle) -> Result<(), ServiceError> {
        Ok(self
            .request(|reply| Command::Unlisten { handle, reply })
            .await??)
    }
}

/// A running control service.
///
/// # Example
///
/// ```ignore
/// use pptp_ctrl::prelude::*;
///
/// let service = ControlService::spawn(EngineConfig::default(), ListenerConfig::default(), DenyAll);
/// let handle = service.handle();
/// handle.listen("0.0.0.0".parse()?, 0).await?;
///
/// let call = handle
///     .originate_call(CallRequest::outgoing(peer).called_number("5551234"), owner)
///     .await?;
/// ```
#[derive(Debug)]
pub struct ControlService {
    handle: ControlHandle,
    task: JoinHandle<()>,
}

impl ControlService {
    /// Start the service task on the current tokio runtime.
    pub fn spawn(
        config: EngineConfig,
        listener_config: ListenerConfig,
        policy: impl CallPolicy + 'static,
    ) -> Self {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (accepted_tx, accepted) = mpsc::channel(ACCEPT_QUEUE);
        let (bound_tx, bound) = mpsc::unbounded_channel();

        let driver = Driver {
            engine: Engine::new(config, policy),
            listeners: ListenerManager::new(listener_config, accepted_tx, bound_tx),
            connections: HashMap::new(),
            events_tx,
        };
        let task = tokio::spawn(driver.run(commands, events, accepted, bound));
        Self {
            handle: ControlHandle {
                commands: commands_tx,
            },
            task,
        }
    }

    /// A handle for issuing commands.
    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Stop the service: stop every control connection and close listeners.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        self.handle
            .commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| ServiceError::Shutdown)?;
        self.task.await.map_err(|_| ServiceError::Shutdown)
    }
}

struct Driver {
    engine: Engine,
    listeners: ListenerManager,
    connections: HashMap<ConnId, ConnectionTasks>,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<SocketEvent>,
        mut accepted: mpsc::Receiver<Accepted>,
        mut bound: mpsc::UnboundedReceiver<BindOutcome>,
    ) {
        info!("control service started");
        loop {
            let deadline = self.engine.next_deadline();
            let wake = deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(|| tokio::time::Instant::now() + IDLE_WAKE);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = events.recv() => self.on_socket_event(event),
                Some(conn) = accepted.recv() => self.on_accepted(conn),
                Some(outcome) = bound.recv() => self.listeners.on_bound(outcome),
                () = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    self.engine.advance(Instant::now());
                }
            }
            self.flush();
            self.engine.reap();
        }
        self.stop();
        info!("control service stopped");
    }

    fn on_command(&mut self, command: Command) {
        let now = Instant::now();
        let engine = &mut self.engine;
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            Command::Originate {
                request,
                owner,
                reply,
            } => {
                let _ = reply.send(engine.originate_call(request, owner, now));
            }
            Command::Answer {
                handle,
                result,
                error,
                cause,
                speed,
                reply,
            } => {
                let _ = reply.send(engine.answer_call(handle, result, error, cause, speed, now));
            }
            Command::CallConnected {
                handle,
                speed,
                reply,
            } => {
                let _ = reply.send(engine.call_connected(handle, speed, now));
            }
            Command::CloseCall {
                handle,
                result,
                error,
                cause,
                reply,
            } => {
                let _ = reply.send(engine.close_call(handle, result, error, cause, now));
            }
            Command::SetLinkInfo {
                handle,
                send_accm,
                recv_accm,
                reply,
            } => {
                let _ = reply.send(engine.set_link_info(handle, send_accm, recv_accm, now));
            }
            Command::CloseConnection { conn, reply } => {
                let _ = reply.send(engine.close_connection(conn, now));
            }
            Command::SessionInfo { handle, reply } => {
                let _ = reply.send(engine.session_info(handle));
            }
            Command::Names { handle, reply } => {
                let names = engine
                    .self_name(handle)
                    .zip(engine.peer_name(handle))
                    .map(|(ours, theirs)| (ours.to_string(), theirs.to_string()));
                let _ = reply.send(names);
            }
            Command::Status { reply } => {
                let _ = reply.send(engine.status());
            }
            Command::Listen { addr, port, reply } => {
                self.listeners.acquire(addr, port, reply);
            }
            Command::Unlisten { handle, reply } => {
                let _ = reply.send(self.listeners.release(handle));
            }
            Command::Shutdown => {}
        }
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        let now = Instant::now();
        match event {
            SocketEvent::Connected { conn, stream } => {
                if self.engine.connection_state(conn) != Some(ControlState::Idle) {
                    debug!("{}: connected after it was closed", conn);
                    return;
                }
                match stream.local_addr() {
                    Ok(local) => {
                        let tasks = ConnectionTasks::spawn(conn, stream, self.events_tx.clone());
                        self.connections.insert(conn, tasks);
                        self.engine.on_connected(conn, local, now);
                    }
                    Err(e) => self.engine.on_connect_failed(conn, &e.to_string(), now),
                }
            }
            SocketEvent::ConnectFailed { conn, error } => {
                self.engine.on_connect_failed(conn, &error.to_string(), now);
            }
            SocketEvent::Data { conn, bytes } => self.engine.on_data(conn, &bytes, now),
            SocketEvent::Closed { conn } => {
                self.engine.on_closed(conn, now);
                if let Some(tasks) = self.connections.remove(&conn) {
                    tasks.close();
                }
            }
        }
    }

    fn on_accepted(&mut self, accepted: Accepted) {
        let conn = self
            .engine
            .accept_connection(accepted.local, accepted.peer, Instant::now());
        let tasks = ConnectionTasks::spawn(conn, accepted.stream, self.events_tx.clone());
        self.connections.insert(conn, tasks);
    }

    /// Carry out every queued engine output.
    fn flush(&mut self) {
        while let Some(output) = self.engine.poll_output() {
            match output {
                Output::Connect { conn, local, peer } => {
                    spawn_connect(conn, local, peer, self.events_tx.clone());
                }
                Output::Send { conn, bytes } => match self.connections.get(&conn) {
                    Some(tasks) if tasks.send(bytes) => {}
                    _ => warn!("{}: no socket, message dropped", conn),
                },
                Output::Close { conn } => {
                    if let Some(tasks) = self.connections.remove(&conn) {
                        tasks.close();
                    }
                }
            }
        }
    }

    fn stop(&mut self) {
        let now = Instant::now();
        for status in self.engine.status() {
            let _ = self.engine.close_connection(status.id, now);
        }
        self.flush();
        self.engine.reap();
        for (_, tasks) in self.connections.drain() {
            tasks.close();
        }
        self.listeners.close_all();
    }
}
