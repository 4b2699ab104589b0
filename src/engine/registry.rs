//! The control engine: connection registry, call lifecycle and timers.
//!
//! [`Engine`] is sans-IO. The driver feeds it socket events, adapter calls
//! and the current time; the engine answers with [`Output`] actions and with
//! synchronous callbacks on each call's [`LinkOwner`]. Nothing is freed
//! inside the handler that decided to kill it: kills queue a deferred free
//! that the driver runs with [`Engine::reap`] once the event is done.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::arena::{Arena, Index};
use super::call_id::CallIdPool;
use super::channel::{CallParams, Channel, ChannelState};
use super::config::EngineConfig;
use super::control::{ControlConnection, ControlState};
use super::output::{CallHandle, CallRequest, ConnId, ConnectionStatus, Output, SessionInfo};
use super::pending::{PendingId, PendingReply};
use super::table;
use super::timers::{TimerId, TimerQueue};
use crate::core::constants::{
    BEARCAP_ANY, BEARCAP_DIGITAL, ERROR_NO_RESOURCE, ERROR_PAC_ERROR, FRAMECAP_ANY, HEADER_SIZE,
    PHONE_LEN, PROTOCOL_VERSION, cdn, error_name, icrp, ocrp, stop_reason,
};
use crate::core::error::EngineError;
use crate::core::traits::{CallPolicy, LinkOwner};
use crate::wire::layout;
use crate::wire::{
    CallClearRequest, CallDiscNotify, EchoRequest, InCallConnected, InCallReply, InCallRequest, Message,
    OutCallReply, OutCallRequest, SetLinkInfo, StartControlConnectionReply,
    StartControlConnectionRequest, StopControlConnectionRequest,
};

/// What a timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Peer has been silent for the idle timeout.
    Idle(Index),
    /// Connection has carried no call for the grace period.
    Unused(Index),
    /// A pending reply timed out.
    Reply(Index, PendingId),
}

/// Frees queued by kill paths, run by [`Engine::reap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    FreeChannel(Index, Index),
    FreeConnection(Index),
}

/// Physical channel id reported to the peer.
pub(crate) fn physical_channel(conn: Index, chan: Index) -> u32 {
    (conn.slot() << 16) | (chan.slot() & 0xffff)
}

/// PPTP control engine.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) policy: Box<dyn CallPolicy>,
    pub(crate) conns: Arena<ControlConnection>,
    pub(crate) call_ids: CallIdPool,
    pub(crate) timers: TimerQueue<TimerKind>,
    outputs: VecDeque<Output>,
    deferred: Vec<Deferred>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("connections", &self.conns.len())
            .field("calls", &self.call_ids.in_use())
            .field("timers", &self.timers.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl Engine {
    /// Create an engine.
    pub fn new(config: EngineConfig, policy: impl CallPolicy + 'static) -> Self {
        let call_ids = if config.randomize_call_ids {
            CallIdPool::randomized()
        } else {
            CallIdPool::new(0)
        };
        Self {
            config,
            policy: Box::new(policy),
            conns: Arena::new(),
            call_ids,
            timers: TimerQueue::new(),
            outputs: VecDeque::new(),
            deferred: Vec::new(),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // DRIVER INTERFACE
    // =========================================================================

    /// Next queued action.
    pub fn poll_output(&mut self) -> Option<Output> {
        self.outputs.pop_front()
    }

    /// All queued actions, oldest first.
    pub fn drain_outputs(&mut self) -> Vec<Output> {
        self.outputs.drain(..).collect()
    }

    /// Earliest timer deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at or before `now`.
    pub fn advance(&mut self, now: Instant) {
        while let Some((_, kind)) = self.timers.pop_expired(now) {
            match kind {
                TimerKind::Idle(c) => self.on_idle_timeout(c, now),
                TimerKind::Unused(c) => {
                    if let Some(cc) = self.conns.get_mut(c) {
                        cc.unused_timer = None;
                        debug!("{}: no calls left, closing", ConnId(c));
                        self.close_ctrl(c, now);
                    }
                }
                TimerKind::Reply(c, id) => self.on_reply_timeout(c, id, now),
            }
        }
    }

    /// Free connections and calls killed since the last reap.
    pub fn reap(&mut self) {
        for deferred in std::mem::take(&mut self.deferred) {
            match deferred {
                Deferred::FreeChannel(c, ch) => {
                    if let Some(cc) = self.conns.get_mut(c) {
                        cc.channels.remove(ch);
                    }
                }
                Deferred::FreeConnection(c) => {
                    if self.conns.remove(c).is_some() {
                        debug!("{}: freed", ConnId(c));
                    }
                }
            }
        }
    }

    /// Register a TCP connection accepted by a listener.
    pub fn accept_connection(&mut self, local: SocketAddr, peer: SocketAddr, now: Instant) -> ConnId {
        let host_name = self.config.host_name.clone();
        let c = self.conns.insert_with(|id| {
            let mut cc = ControlConnection::new(id, false, Some(local.ip()), peer);
            cc.local_addr = local;
            cc.self_name = host_name;
            cc
        });
        info!("{}: connection from {}", ConnId(c), peer);
        self.init_ctrl(c, now);
        ConnId(c)
    }

    /// An outbound TCP connection completed.
    pub fn on_connected(&mut self, conn: ConnId, local: SocketAddr, now: Instant) {
        let c = conn.0;
        let Some(cc) = self.conns.get_mut(c) else {
            return;
        };
        if cc.state != ControlState::Idle {
            return;
        }
        cc.local_addr = local;
        info!("{}: connected to {}", conn, cc.peer_addr);
        self.init_ctrl(c, now);
    }

    /// An outbound TCP connection could not be established.
    pub fn on_connect_failed(&mut self, conn: ConnId, error: &str, now: Instant) {
        if let Some(cc) = self.conns.get(conn.0) {
            warn!("{}: connection to {} failed: {}", conn, cc.peer_addr, error);
            self.kill_ctrl(conn.0, now);
        }
    }

    /// The peer closed the TCP connection or it failed.
    pub fn on_closed(&mut self, conn: ConnId, now: Instant) {
        if self.conns.get(conn.0).is_some_and(ControlConnection::is_live) {
            info!("{}: connection closed by peer", conn);
            self.kill_ctrl(conn.0, now);
        }
    }

    /// Bytes arrived on a control connection.
    pub fn on_data(&mut self, conn: ConnId, data: &[u8], now: Instant) {
        let c = conn.0;
        match self.conns.get_mut(c) {
            Some(cc) if cc.is_live() => cc.decoder.extend(data),
            _ => return,
        }
        loop {
            let Some(cc) = self.conns.get_mut(c) else {
                return;
            };
            if !cc.is_live() {
                return;
            }
            match cc.decoder.next_frame() {
                Ok(Some(frame)) => self.process_frame(c, frame, now),
                Ok(None) => return,
                Err(e) => {
                    warn!("{}: {}", conn, e);
                    self.kill_ctrl(c, now);
                    return;
                }
            }
        }
    }

    // =========================================================================
    // LINK-LAYER INTERFACE
    // =========================================================================

    /// Propose a call to a peer.
    ///
    /// Reuses a suitable control connection or opens a new one. The call is
    /// sent as soon as the connection is established; its outcome reaches
    /// `owner`.
    pub fn originate_call(
        &mut self,
        request: CallRequest,
        owner: Box<dyn LinkOwner>,
        now: Instant,
    ) -> Result<CallHandle, EngineError> {
        let port = if request.peer_port == 0 {
            self.config.port
        } else {
            request.peer_port
        };
        let peer = SocketAddr::new(request.peer_addr, port);
        let max_calls = self.config.max_calls_per_connection;
        let existing = self
            .conns
            .iter()
            .find(|(_, cc)| cc.reusable_for(request.local_addr, peer, max_calls))
            .map(|(c, _)| c);

        let (c, created) = match existing {
            Some(c) => (c, false),
            None => {
                let host_name = self.config.host_name.clone();
                let c = self.conns.insert_with(|id| {
                    let mut cc = ControlConnection::new(id, true, request.local_addr, peer);
                    cc.self_name = host_name;
                    cc
                });
                info!("{}: connecting to {}", ConnId(c), peer);
                self.outputs.push_back(Output::Connect {
                    conn: ConnId(c),
                    local: request.local_addr,
                    peer,
                });
                (c, true)
            }
        };

        let ch = match self.new_channel(c, ChannelState::WaitCtrl, true, request.incoming, request.params) {
            Ok(ch) => ch,
            Err(e) => {
                warn!("{}: cannot originate call: {}", ConnId(c), e);
                if created {
                    self.kill_ctrl(c, now);
                }
                return Err(e);
            }
        };
        if let Some(chan) = self.conns.get_mut(c).and_then(|cc| cc.channels.get_mut(ch)) {
            chan.owner = Some(owner);
        }
        self.check_conn(c, now);
        Ok(CallHandle { conn: c, chan: ch })
    }

    /// Report the outcome of a dial the peer asked for.
    ///
    /// Only valid while the call is in `WaitAnswer`. `error` is sent only
    /// when `result` is a general error.
    pub fn answer_call(
        &mut self,
        handle: CallHandle,
        result: u8,
        error: u8,
        cause: u16,
        speed: u32,
        now: Instant,
    ) -> Result<(), EngineError> {
        let (recv_window, processing_delay) = (self.config.recv_window, self.config.processing_delay);
        let chan = self.live_channel_mut(handle)?;
        if chan.state != ChannelState::WaitAnswer {
            return Err(EngineError::InvalidCallState {
                operation: "answer_call",
                state: chan.state.name(),
            });
        }
        let reply = OutCallReply {
            call_id: chan.call_id,
            peer_call_id: chan.peer_call_id,
            result,
            error: if result == ocrp::GENERAL_ERROR { error } else { 0 },
            cause,
            connect_speed: speed,
            recv_window,
            processing_delay,
            physical_channel: physical_channel(handle.conn, handle.chan),
        };
        if result == ocrp::OK {
            chan.state = ChannelState::Established;
            info!("{}: outgoing call connected at {} bps", handle, speed);
        } else {
            self.kill_chan(handle.conn, handle.chan, "local outgoing call failed", now);
        }
        self.send(handle.conn, Some(handle.chan), Message::OutCallReply(reply), now);
        Ok(())
    }

    /// Report that an incoming call we offered is connected.
    ///
    /// Only valid on our side of an incoming call the peer accepted.
    pub fn call_connected(&mut self, handle: CallHandle, speed: u32, now: Instant) -> Result<(), EngineError> {
        let (recv_window, processing_delay) = (self.config.recv_window, self.config.processing_delay);
        let chan = self.live_channel_mut(handle)?;
        if chan.state != ChannelState::WaitConnect || chan.is_pns() {
            return Err(EngineError::InvalidCallState {
                operation: "call_connected",
                state: chan.state.name(),
            });
        }
        let msg = InCallConnected {
            peer_call_id: chan.peer_call_id,
            connect_speed: speed,
            recv_window,
            processing_delay,
            framing_type: chan.params.framing_type,
        };
        chan.state = ChannelState::Established;
        info!("{}: incoming call connected at {} bps", handle, speed);
        self.send(handle.conn, Some(handle.chan), Message::InCallConnected(msg), now);
        Ok(())
    }

    /// Tear a call down.
    ///
    /// `error` is carried only when `result` is a general error. Closing a
    /// call that is already clearing is a no-op.
    pub fn close_call(
        &mut self,
        handle: CallHandle,
        result: u8,
        error: u8,
        cause: u16,
        now: Instant,
    ) -> Result<(), EngineError> {
        self.live_channel_mut(handle)?;
        self.close_chan(handle.conn, handle.chan, result, error, cause, "link layer shutdown", now);
        Ok(())
    }

    /// Send new link framing parameters to the peer.
    ///
    /// Only the network server sends them; on any other call this does
    /// nothing.
    pub fn set_link_info(
        &mut self,
        handle: CallHandle,
        send_accm: u32,
        recv_accm: u32,
        now: Instant,
    ) -> Result<(), EngineError> {
        let chan = self.live_channel_mut(handle)?;
        if !chan.is_pns() {
            return Ok(());
        }
        let msg = SetLinkInfo {
            call_id: chan.peer_call_id,
            send_accm,
            recv_accm,
        };
        self.send(handle.conn, Some(handle.chan), Message::SetLinkInfo(msg), now);
        Ok(())
    }

    /// Close a control connection and every call on it.
    pub fn close_connection(&mut self, conn: ConnId, now: Instant) -> Result<(), EngineError> {
        if !self.conns.contains(conn.0) {
            return Err(EngineError::UnknownConnection);
        }
        self.close_ctrl(conn.0, now);
        Ok(())
    }

    /// Addressing of a live call.
    pub fn session_info(&self, handle: CallHandle) -> Option<SessionInfo> {
        let cc = self.conns.get(handle.conn)?;
        let chan = cc.channels.get(handle.chan).filter(|ch| ch.is_live())?;
        Some(SessionInfo {
            local_addr: cc.local_addr.ip(),
            peer_addr: cc.peer_addr.ip(),
            local_call_id: chan.call_id,
            peer_call_id: chan.peer_call_id,
            peer_window: chan.peer_window,
            peer_ppd: chan.peer_ppd,
        })
    }

    /// Host name we advertise on the call's connection.
    pub fn self_name(&self, handle: CallHandle) -> Option<&str> {
        self.conns.get(handle.conn).map(|cc| cc.self_name.as_str())
    }

    /// Host name the peer advertised on the call's connection.
    pub fn peer_name(&self, handle: CallHandle) -> Option<&str> {
        self.conns.get(handle.conn).map(|cc| cc.peer_name.as_str())
    }

    /// State of a call that has not been freed yet.
    pub fn call_state(&self, handle: CallHandle) -> Option<ChannelState> {
        self.conns
            .get(handle.conn)?
            .channels
            .get(handle.chan)
            .map(|ch| ch.state)
    }

    /// State of a connection that has not been freed yet.
    pub fn connection_state(&self, conn: ConnId) -> Option<ControlState> {
        self.conns.get(conn.0).map(|cc| cc.state)
    }

    /// One status line per connection.
    pub fn status(&self) -> Vec<ConnectionStatus> {
        self.conns
            .iter()
            .map(|(_, cc)| ConnectionStatus {
                id: ConnId(cc.id),
                local_addr: cc.local_addr,
                peer_addr: cc.peer_addr,
                state: cc.state,
                active_calls: cc.active_calls,
            })
            .collect()
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    pub(crate) fn live_channel_mut(&mut self, handle: CallHandle) -> Result<&mut Channel, EngineError> {
        self.conns
            .get_mut(handle.conn)
            .and_then(|cc| cc.channels.get_mut(handle.chan))
            .filter(|ch| ch.is_live())
            .ok_or(EngineError::UnknownCall)
    }

    /// Encode and queue `msg`, tracking the reply it waits for.
    pub(crate) fn send(&mut self, c: Index, chan: Option<Index>, msg: Message, now: Instant) {
        self.transmit(c, chan, msg, true, now);
    }

    pub(crate) fn transmit(&mut self, c: Index, chan: Option<Index>, msg: Message, track: bool, now: Instant) {
        let Some(cc) = self.conns.get_mut(c) else {
            return;
        };
        if !cc.is_live() {
            return;
        }
        let msg_type = msg.message_type();
        let bytes = msg.encode();
        match chan {
            Some(ch) => debug!("{}: send {}", CallHandle { conn: c, chan: ch }, msg_type),
            None => debug!("{}: send {}", ConnId(c), msg_type),
        }
        if tracing::enabled!(tracing::Level::TRACE) {
            for line in layout::dump(layout::fields(msg_type), &bytes[HEADER_SIZE..]) {
                trace!("{}: {}", ConnId(c), line);
            }
        }
        self.outputs.push_back(Output::Send { conn: ConnId(c), bytes });

        let Some(policy) = table::rule(msg_type).reply.filter(|_| track) else {
            return;
        };
        let id = cc.pending.next_id();
        let timer = self.timers.schedule(now + policy.timeout, TimerKind::Reply(c, id));
        cc.pending.register(PendingReply {
            id,
            sent: msg_type,
            expect: policy.expect,
            channel: chan,
            fatal: policy.fatal,
            timeout: policy.timeout,
            timer,
        });
    }

    fn start_request(&self) -> Message {
        Message::StartControlConnectionRequest(StartControlConnectionRequest {
            protocol_version: PROTOCOL_VERSION,
            framing_capabilities: FRAMECAP_ANY,
            bearer_capabilities: BEARCAP_ANY,
            max_channels: 0,
            firmware_revision: self.config.firmware_revision,
            host_name: self.config.host_name.clone(),
            vendor: self.config.vendor.clone(),
        })
    }

    pub(crate) fn start_reply(&self, result: u8) -> Message {
        Message::StartControlConnectionReply(StartControlConnectionReply {
            protocol_version: PROTOCOL_VERSION,
            result,
            error: 0,
            framing_capabilities: FRAMECAP_ANY,
            bearer_capabilities: BEARCAP_ANY,
            max_channels: 0,
            firmware_revision: self.config.firmware_revision,
            host_name: self.config.host_name.clone(),
            vendor: self.config.vendor.clone(),
        })
    }

    /// Start keepalive and, on our own connections, the start handshake.
    fn init_ctrl(&mut self, c: Index, now: Instant) {
        let Some(cc) = self.conns.get_mut(c) else {
            return;
        };
        cc.echo_id = 0;
        let originated = cc.originated;
        self.reset_idle_timer(c, now);
        if originated {
            let msg = self.start_request();
            self.send(c, None, msg, now);
            self.set_ctrl_state(c, ControlState::WaitControlReply);
        }
    }

    pub(crate) fn set_ctrl_state(&mut self, c: Index, state: ControlState) {
        if let Some(cc) = self.conns.get_mut(c) {
            if cc.state != state {
                debug!("{}: state {} -> {}", ConnId(c), cc.state, state);
                cc.state = state;
            }
        }
    }

    pub(crate) fn set_chan_state(&mut self, c: Index, ch: Index, state: ChannelState) {
        if let Some(chan) = self.conns.get_mut(c).and_then(|cc| cc.channels.get_mut(ch)) {
            if chan.state != state {
                debug!("{}: state {} -> {}", CallHandle { conn: c, chan: ch }, chan.state, state);
                chan.state = state;
            }
        }
    }

    pub(crate) fn reset_idle_timer(&mut self, c: Index, now: Instant) {
        let Some(cc) = self.conns.get_mut(c) else {
            return;
        };
        if let Some(timer) = cc.idle_timer.take() {
            self.timers.cancel(timer);
        }
        cc.idle_timer = Some(self.timers.schedule(now + self.config.idle_timeout, TimerKind::Idle(c)));
    }

    fn on_idle_timeout(&mut self, c: Index, now: Instant) {
        let Some(cc) = self.conns.get_mut(c) else {
            return;
        };
        cc.idle_timer = None;
        if cc.state != ControlState::Established {
            // Setup never completed.
            info!("{}: idle in state {}, closing", ConnId(c), cc.state);
            self.kill_ctrl(c, now);
            return;
        }
        cc.echo_id = cc.echo_id.wrapping_add(1);
        let id = cc.echo_id;
        self.send(c, None, Message::EchoRequest(EchoRequest { id }), now);
    }

    fn on_reply_timeout(&mut self, c: Index, id: PendingId, now: Instant) {
        let Some(pending) = self.conns.get_mut(c).and_then(|cc| cc.pending.take(id)) else {
            return;
        };
        let secs = pending.timeout.as_secs();
        let Some(ch) = pending.channel else {
            info!("{}: no reply to {} after {} sec", ConnId(c), pending.sent, secs);
            self.kill_ctrl(c, now);
            return;
        };
        let handle = CallHandle { conn: c, chan: ch };
        let errmsg = format!(
            "{}: no reply to {} after {} sec ({})",
            handle,
            pending.sent,
            secs,
            error_name(ERROR_PAC_ERROR)
        );
        info!("{}", errmsg);
        if pending.fatal {
            self.kill_chan(c, ch, &errmsg, now);
            self.kill_ctrl(c, now);
        } else {
            self.close_chan(c, ch, cdn::GENERAL_ERROR, ERROR_PAC_ERROR, 0, &errmsg, now);
        }
    }

    /// Allocate a call id and add a channel to connection `c`.
    pub(crate) fn new_channel(
        &mut self,
        c: Index,
        state: ChannelState,
        originated: bool,
        incoming: bool,
        params: CallParams,
    ) -> Result<Index, EngineError> {
        let Some(cc) = self.conns.get_mut(c) else {
            return Err(EngineError::UnknownConnection);
        };
        let call_id = self.call_ids.allocate()?;
        let ch = cc
            .channels
            .insert_with(|id| Channel::new(id, state, originated, incoming, call_id, params));
        cc.active_calls += 1;
        if let Some(timer) = cc.unused_timer.take() {
            self.timers.cancel(timer);
        }
        debug!(
            "{}: new call id 0x{:04x} in state {}",
            CallHandle { conn: c, chan: ch },
            call_id,
            state
        );
        Ok(ch)
    }

    /// Send every call waiting for the connection, once it is established.
    pub(crate) fn check_conn(&mut self, c: Index, now: Instant) {
        let Some(cc) = self.conns.get(c) else {
            return;
        };
        if cc.state != ControlState::Established {
            return;
        }
        let waiting: Vec<Index> = cc
            .channels
            .iter()
            .filter(|(_, ch)| ch.state == ChannelState::WaitCtrl)
            .map(|(ch, _)| ch)
            .collect();

        for ch in waiting {
            let Some(chan) = self.conns.get(c).and_then(|cc| cc.channels.get(ch)) else {
                continue;
            };
            let p = &chan.params;
            let (msg, next) = if chan.incoming {
                let req = InCallRequest {
                    call_id: chan.call_id,
                    serial_number: chan.serial_number,
                    bearer_type: BEARCAP_DIGITAL,
                    physical_channel: physical_channel(c, ch),
                    dialed_len: p.called_number.len().min(PHONE_LEN) as u16,
                    dialing_len: p.calling_number.len().min(PHONE_LEN) as u16,
                    dialed_number: p.called_number.clone(),
                    dialing_number: p.calling_number.clone(),
                    sub_address: p.sub_address.clone(),
                };
                (Message::InCallRequest(req), ChannelState::WaitInReply)
            } else {
                let req = OutCallRequest {
                    call_id: chan.call_id,
                    serial_number: chan.serial_number,
                    min_bps: p.min_bps,
                    max_bps: p.max_bps,
                    bearer_type: p.bearer_type,
                    framing_type: p.framing_type,
                    recv_window: self.config.recv_window,
                    processing_delay: self.config.processing_delay,
                    phone_number_len: p.called_number.len().min(PHONE_LEN) as u16,
                    phone_number: p.called_number.clone(),
                    sub_address: p.sub_address.clone(),
                };
                (Message::OutCallRequest(req), ChannelState::WaitOutReply)
            };
            self.set_chan_state(c, ch, next);
            self.send(c, Some(ch), msg, now);
        }
    }

    /// Close a call the protocol way for its state and role.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn close_chan(
        &mut self,
        c: Index,
        ch: Index,
        result: u8,
        error: u8,
        cause: u16,
        reason: &str,
        now: Instant,
    ) {
        let Some(chan) = self.conns.get(c).and_then(|cc| cc.channels.get(ch)) else {
            return;
        };
        let handle = CallHandle { conn: c, chan: ch };
        let (state, is_pns) = (chan.state, chan.is_pns());
        let (call_id, peer_call_id) = (chan.call_id, chan.peer_call_id);
        let pns_clear = match state {
            ChannelState::Established | ChannelState::WaitConnect => is_pns,
            ChannelState::WaitOutReply => true,
            ChannelState::WaitInReply => false,
            ChannelState::WaitAnswer => {
                let reply = OutCallReply {
                    peer_call_id,
                    result: ocrp::ADMIN_PROHIBITED,
                    ..OutCallReply::default()
                };
                self.send(c, Some(ch), Message::OutCallReply(reply), now);
                self.kill_chan(c, ch, reason, now);
                return;
            }
            ChannelState::WaitCtrl => {
                self.kill_chan(c, ch, reason, now);
                return;
            }
            ChannelState::WaitDisconnect | ChannelState::Dying => return,
        };

        info!("{}: clearing call", handle);
        if pns_clear {
            let req = CallClearRequest { call_id };
            self.send(c, Some(ch), Message::CallClearRequest(req), now);
            self.set_chan_state(c, ch, ChannelState::WaitDisconnect);
        } else {
            let notify = CallDiscNotify {
                call_id,
                result,
                error: if result == cdn::GENERAL_ERROR { error } else { 0 },
                cause,
                stats: String::new(),
            };
            self.send(c, Some(ch), Message::CallDiscNotify(notify), now);
            self.kill_chan(c, ch, reason, now);
        }
    }

    /// Terminate a call: notify its owner once, release its id, queue its free.
    pub(crate) fn kill_chan(&mut self, c: Index, ch: Index, errmsg: &str, now: Instant) {
        let Some(cc) = self.conns.get_mut(c) else {
            return;
        };
        let conn_live = cc.is_live();
        let Some(chan) = cc.channels.get_mut(ch) else {
            return;
        };
        if chan.state == ChannelState::Dying {
            return;
        }
        let handle = CallHandle { conn: c, chan: ch };
        debug!("{}: killing call in state {}", handle, chan.state);
        if let Some(owner) = chan.owner.as_mut() {
            if chan.state == ChannelState::WaitAnswer {
                owner.on_cancel();
            } else {
                owner.on_result(Some(errmsg), 0);
            }
        }
        chan.state = ChannelState::Dying;
        let call_id = chan.call_id;

        for pending in cc.pending.take_channel(ch) {
            self.timers.cancel(pending.timer);
        }
        self.call_ids.release(call_id);
        cc.active_calls = cc.active_calls.saturating_sub(1);
        self.deferred.push(Deferred::FreeChannel(c, ch));

        if cc.active_calls == 0 && conn_live {
            if let Some(timer) = cc.unused_timer.take() {
                self.timers.cancel(timer);
            }
            let deadline = now + self.config.unused_timeout;
            cc.unused_timer = Some(self.timers.schedule(deadline, TimerKind::Unused(c)));
        }
    }

    /// Close a connection gracefully when it is up, abruptly otherwise.
    pub(crate) fn close_ctrl(&mut self, c: Index, now: Instant) {
        let Some(cc) = self.conns.get(c) else {
            return;
        };
        match cc.state {
            ControlState::Idle | ControlState::WaitControlReply | ControlState::WaitStopReply => {
                self.kill_ctrl(c, now)
            }
            ControlState::Established => {
                let req = StopControlConnectionRequest {
                    reason: stop_reason::LOCAL_SHUTDOWN,
                };
                self.send(c, None, Message::StopControlConnectionRequest(req), now);
                self.set_ctrl_state(c, ControlState::WaitStopReply);
            }
            ControlState::Dying => {}
        }
    }

    /// Terminate a connection and every call on it.
    pub(crate) fn kill_ctrl(&mut self, c: Index, now: Instant) {
        let Some(cc) = self.conns.get_mut(c) else {
            return;
        };
        if cc.state == ControlState::Dying {
            return;
        }
        info!("{}: killing connection", ConnId(c));
        cc.state = ControlState::Dying;

        for ch in cc.channels.indices() {
            self.kill_chan(c, ch, "control channel shutdown", now);
        }

        let Some(cc) = self.conns.get_mut(c) else {
            return;
        };
        let timers: Vec<TimerId> = cc
            .idle_timer
            .take()
            .into_iter()
            .chain(cc.unused_timer.take())
            .chain(cc.pending.take_all().into_iter().map(|p| p.timer))
            .collect();
        for timer in timers {
            self.timers.cancel(timer);
        }
        self.outputs.push_back(Output::Close { conn: ConnId(c) });
        self.deferred.push(Deferred::FreeConnection(c));
    }

    pub(crate) fn deny_out_call(&mut self, c: Index, peer_call_id: u16, now: Instant) {
        let reply = OutCallReply {
            peer_call_id,
            result: ocrp::ADMIN_PROHIBITED,
            ..OutCallReply::default()
        };
        self.send(c, None, Message::OutCallReply(reply), now);
    }

    pub(crate) fn deny_in_call(&mut self, c: Index, peer_call_id: u16, now: Instant) {
        let reply = InCallReply {
            peer_call_id,
            result: icrp::GENERAL_ERROR,
            error: ERROR_NO_RESOURCE,
            recv_window: self.config.recv_window,
            processing_delay: self.config.processing_delay,
            ..Default::default()
        };
        self.transmit(c, None, Message::InCallReply(reply), false, now);
    }

    /// Resolve a call id to a live channel of connection `c`.
    pub(crate) fn find_channel(&self, c: Index, strategy: table::IdMatch, id: u16) -> Option<Index> {
        self.conns
            .get(c)?
            .channels
            .iter()
            .find(|(_, ch)| ch.is_live() && strategy.matches(ch, id))
            .map(|(ch, _)| ch)
    }

    /// Our IP and the peer's socket address on connection `c`.
    pub(crate) fn conn_addrs(&self, c: Index) -> Option<(IpAddr, SocketAddr)> {
        self.conns.get(c).map(|cc| (cc.local_addr.ip(), cc.peer_addr))
    }
}
