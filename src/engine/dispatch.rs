//! Inbound message handling.
//!
//! A frame is checked in a fixed order: the channel it names must exist,
//! a reply must match a pending request, and the resolved connection or
//! channel must be in a state that admits the type. Only then does the
//! per-type handler run.

use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::arena::Index;
use super::channel::{CallParams, ChannelState};
use super::control::ControlState;
use super::output::{CallHandle, ConnId};
use super::registry::Engine;
use super::table::{self, Admits};
use crate::core::constants::{
    INTERNAL_CALLING_NUMBER, PHONE_LEN, PROTOCOL_VERSION, cdn, cdn_result_name, echo,
    echo_result_name, error_name, icrp, icrp_result_name, ocrp, ocrp_result_name, sccrp,
    sccrp_result_name, stop_reason, stop_reason_name,
};
use crate::core::traits::{IncomingCallOffer, OutgoingCallOffer};
use crate::wire::{
    CallDiscNotify, EchoReply, EchoRequest, InCallConnected, InCallReply, InCallRequest, Message,
    OutCallReply, OutCallRequest, RawFrame, SetLinkInfo, StartControlConnectionReply,
    StartControlConnectionRequest, StopControlConnectionReply, StopControlConnectionRequest,
};

/// Longest prefix of `text` that fits in `len` bytes.
fn clip(text: &str, len: usize) -> &str {
    let mut end = len.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

impl Engine {
    pub(crate) fn process_frame(&mut self, c: Index, frame: RawFrame, now: Instant) {
        let conn = ConnId(c);
        let msg_type = frame.msg_type;
        self.reset_idle_timer(c, now);

        for field in frame.reserved_violations() {
            warn!("{}: rec'd {}: non-zero reserved field {}", conn, msg_type, field);
        }
        debug!("{}: recv {}", conn, msg_type);
        if tracing::enabled!(tracing::Level::TRACE) {
            for line in frame.dump() {
                trace!("{}: {}", conn, line);
            }
        }

        let msg = match frame.message() {
            Ok(msg) => msg,
            Err(e) => {
                warn!("{}: {}", conn, e);
                self.kill_ctrl(c, now);
                return;
            }
        };
        let rule = table::rule(msg_type);

        let chan = match rule.inbound {
            Some((field, strategy)) => {
                let id = msg.call_id_field(field).unwrap_or_default();
                match self.find_channel(c, strategy, id) {
                    Some(ch) => Some(ch),
                    None => {
                        warn!("{}: CID 0x{:04x} in {} not found", conn, id, msg_type);
                        return;
                    }
                }
            }
            None => None,
        };

        let Some(cc) = self.conns.get_mut(c) else {
            return;
        };
        match cc.pending.take_match(msg_type, chan) {
            Some(pending) => {
                self.timers.cancel(pending.timer);
            }
            None if msg_type.is_reply() => {
                warn!("{}: rec'd spurious {}", conn, msg_type);
                return;
            }
            None => {}
        }

        let (admitted, state) = match rule.admits {
            Admits::Control(states) => (states.contains(&cc.state), cc.state.name()),
            Admits::Channel(states) => match chan.and_then(|ch| cc.channels.get(ch)) {
                Some(ch) => (states.contains(&ch.state), ch.state.name()),
                None => (false, "FREE"),
            },
        };
        if !admitted {
            warn!("{}: got {} in state {}", conn, msg_type, state);
            self.kill_ctrl(c, now);
            return;
        }

        match (msg, chan) {
            (Message::StartControlConnectionRequest(m), _) => self.on_start_request(c, m, now),
            (Message::StartControlConnectionReply(m), _) => self.on_start_reply(c, m, now),
            (Message::StopControlConnectionRequest(m), _) => self.on_stop_request(c, m, now),
            (Message::StopControlConnectionReply(m), _) => self.on_stop_reply(c, m, now),
            (Message::EchoRequest(m), _) => self.on_echo_request(c, m, now),
            (Message::EchoReply(m), _) => self.on_echo_reply(c, m, now),
            (Message::OutCallRequest(m), _) => self.on_out_call_request(c, m, now),
            (Message::InCallRequest(m), _) => self.on_in_call_request(c, m, now),
            (Message::OutCallReply(m), Some(ch)) => self.on_out_call_reply(c, ch, m, now),
            (Message::InCallReply(m), Some(ch)) => self.on_in_call_reply(c, ch, m, now),
            (Message::InCallConnected(m), Some(ch)) => self.on_in_call_connected(c, ch, m),
            (Message::CallClearRequest(_), Some(ch)) => self.on_call_clear_request(c, ch, now),
            (Message::CallDiscNotify(m), Some(ch)) => self.on_call_disc_notify(c, ch, m, now),
            (Message::WanErrorNotify(_), Some(ch)) => {
                info!("{}: ignoring {}", CallHandle { conn: c, chan: ch }, msg_type);
            }
            (Message::SetLinkInfo(m), Some(ch)) => self.on_set_link_info(c, ch, m),
            // Call-scoped types always resolve a channel above.
            (_, None) => {}
        }
    }

    // =========================================================================
    // CONTROL CONNECTION
    // =========================================================================

    fn on_start_request(&mut self, c: Index, m: StartControlConnectionRequest, now: Instant) {
        if m.protocol_version != PROTOCOL_VERSION {
            warn!(
                "{}: incompatible protocol version 0x{:04x}",
                ConnId(c),
                m.protocol_version
            );
            let reply = self.start_reply(sccrp::BAD_VERSION);
            self.send(c, None, reply, now);
            self.kill_ctrl(c, now);
            return;
        }
        if let Some(cc) = self.conns.get_mut(c) {
            cc.peer_name = m.host_name;
        }
        self.set_ctrl_state(c, ControlState::Established);
        info!("{}: control connection established", ConnId(c));
        let reply = self.start_reply(sccrp::OK);
        self.send(c, None, reply, now);
        self.check_conn(c, now);
    }

    fn on_start_reply(&mut self, c: Index, m: StartControlConnectionReply, now: Instant) {
        if m.result != 0 && m.result != sccrp::OK {
            warn!(
                "{}: connection rejected: {} ({})",
                ConnId(c),
                sccrp_result_name(m.result),
                error_name(m.error)
            );
            self.kill_ctrl(c, now);
            return;
        }
        if m.protocol_version != PROTOCOL_VERSION {
            warn!(
                "{}: incompatible protocol version 0x{:04x}",
                ConnId(c),
                m.protocol_version
            );
            let req = StopControlConnectionRequest {
                reason: stop_reason::BAD_VERSION,
            };
            self.send(c, None, Message::StopControlConnectionRequest(req), now);
            self.set_ctrl_state(c, ControlState::WaitStopReply);
            return;
        }
        if let Some(cc) = self.conns.get_mut(c) {
            cc.peer_name = m.host_name;
        }
        self.set_ctrl_state(c, ControlState::Established);
        info!("{}: control connection established", ConnId(c));
        self.check_conn(c, now);
    }

    fn on_stop_request(&mut self, c: Index, m: StopControlConnectionRequest, now: Instant) {
        info!("{}: stop requested by peer: {}", ConnId(c), stop_reason_name(m.reason));
        let reply = StopControlConnectionReply {
            result: sccrp::OK,
            error: 0,
        };
        self.send(c, None, Message::StopControlConnectionReply(reply), now);
        self.kill_ctrl(c, now);
    }

    fn on_stop_reply(&mut self, c: Index, m: StopControlConnectionReply, now: Instant) {
        debug!("{}: stop acknowledged: result={} err={}", ConnId(c), m.result, error_name(m.error));
        self.kill_ctrl(c, now);
    }

    fn on_echo_request(&mut self, c: Index, m: EchoRequest, now: Instant) {
        let reply = EchoReply {
            id: m.id,
            result: echo::OK,
            error: 0,
        };
        self.send(c, None, Message::EchoReply(reply), now);
    }

    fn on_echo_reply(&mut self, c: Index, m: EchoReply, now: Instant) {
        let Some(echo_id) = self.conns.get(c).map(|cc| cc.echo_id) else {
            return;
        };
        if m.result != echo::OK {
            warn!(
                "{}: echo reply failed: res={} err={}",
                ConnId(c),
                echo_result_name(m.result),
                error_name(m.error)
            );
            self.kill_ctrl(c, now);
        } else if m.id != echo_id {
            warn!("{}: echo reply id {} != {}", ConnId(c), m.id, echo_id);
            self.kill_ctrl(c, now);
        }
    }

    // =========================================================================
    // PEER-PROPOSED CALLS
    // =========================================================================

    fn on_out_call_request(&mut self, c: Index, m: OutCallRequest, now: Instant) {
        let Some((local_ip, peer)) = self.conn_addrs(c) else {
            return;
        };
        let params = CallParams {
            bearer_type: m.bearer_type,
            framing_type: m.framing_type,
            min_bps: m.min_bps,
            max_bps: m.max_bps,
            calling_number: INTERNAL_CALLING_NUMBER.to_string(),
            called_number: m.phone_number.clone(),
            sub_address: m.sub_address.clone(),
        };
        let ch = match self.new_channel(c, ChannelState::WaitAnswer, false, false, params) {
            Ok(ch) => ch,
            Err(e) => {
                info!("{}: no channel for outgoing call: {}", ConnId(c), e);
                self.deny_out_call(c, m.call_id, now);
                return;
            }
        };
        let handle = CallHandle { conn: c, chan: ch };
        let offer = OutgoingCallOffer {
            handle,
            local_addr: local_ip,
            peer_addr: peer.ip(),
            peer_port: peer.port(),
            bearer_type: m.bearer_type,
            framing_type: m.framing_type,
            min_bps: m.min_bps,
            max_bps: m.max_bps,
            called_number: m.phone_number,
            sub_address: m.sub_address,
        };
        let Some(owner) = self.policy.accept_outgoing(&offer) else {
            info!("{}: peer's outgoing call request denied", ConnId(c));
            self.kill_chan(c, ch, "peer's outgoing call request denied", now);
            self.deny_out_call(c, m.call_id, now);
            return;
        };
        if let Some(chan) = self.conns.get_mut(c).and_then(|cc| cc.channels.get_mut(ch)) {
            chan.serial_number = m.serial_number;
            chan.peer_call_id = m.call_id;
            chan.peer_ppd = m.processing_delay;
            chan.peer_window = m.recv_window;
            chan.owner = Some(owner);
        }
        info!("{}: peer asks us to dial \"{}\"", handle, offer.called_number);
    }

    fn on_in_call_request(&mut self, c: Index, m: InCallRequest, now: Instant) {
        let Some((local_ip, peer)) = self.conn_addrs(c) else {
            return;
        };
        let calling = clip(&m.dialing_number, usize::from(m.dialing_len).min(PHONE_LEN)).to_string();
        let called = clip(&m.dialed_number, usize::from(m.dialed_len).min(PHONE_LEN)).to_string();
        info!("{}: peer incoming call to \"{}\" from \"{}\"", ConnId(c), called, calling);

        let params = CallParams {
            bearer_type: m.bearer_type,
            calling_number: calling.clone(),
            called_number: called.clone(),
            sub_address: m.sub_address.clone(),
            ..CallParams::default()
        };
        let ch = match self.new_channel(c, ChannelState::WaitConnect, false, true, params) {
            Ok(ch) => ch,
            Err(e) => {
                info!("{}: no channel for incoming call: {}", ConnId(c), e);
                self.deny_in_call(c, m.call_id, now);
                return;
            }
        };
        let handle = CallHandle { conn: c, chan: ch };
        let offer = IncomingCallOffer {
            handle,
            local_addr: local_ip,
            peer_addr: peer.ip(),
            peer_port: peer.port(),
            bearer_type: m.bearer_type,
            calling_number: calling,
            called_number: called,
            sub_address: m.sub_address,
        };
        let owner = self.policy.accept_incoming(&offer);

        let Some(chan) = self.conns.get_mut(c).and_then(|cc| cc.channels.get_mut(ch)) else {
            return;
        };
        let mut reply = InCallReply {
            call_id: chan.call_id,
            peer_call_id: m.call_id,
            result: icrp::OK,
            error: 0,
            recv_window: self.config.recv_window,
            processing_delay: self.config.processing_delay,
        };
        match owner {
            Some(owner) => {
                info!("{}: accepting incoming call", handle);
                chan.serial_number = m.serial_number;
                chan.peer_call_id = m.call_id;
                chan.owner = Some(owner);
            }
            None => {
                info!("{}: incoming call request denied", handle);
                reply.result = icrp::NOT_ACCEPTED;
            }
        }
        let accepted = reply.result == icrp::OK;
        self.send(c, Some(ch), Message::InCallReply(reply), now);
        if !accepted {
            self.kill_chan(c, ch, "peer incoming call failed", now);
        }
    }

    // =========================================================================
    // CALLS
    // =========================================================================

    fn on_out_call_reply(&mut self, c: Index, ch: Index, m: OutCallReply, now: Instant) {
        let handle = CallHandle { conn: c, chan: ch };
        if m.result != ocrp::OK {
            let errmsg = format!(
                "{}: outgoing call failed: res={} err={}",
                handle,
                ocrp_result_name(m.result),
                error_name(m.error)
            );
            info!("{}", errmsg);
            self.kill_chan(c, ch, &errmsg, now);
            return;
        }
        info!("{}: outgoing call connected at {} bps", handle, m.connect_speed);
        self.set_chan_state(c, ch, ChannelState::Established);
        if let Some(chan) = self.conns.get_mut(c).and_then(|cc| cc.channels.get_mut(ch)) {
            chan.peer_call_id = m.call_id;
            chan.peer_ppd = m.processing_delay;
            chan.peer_window = m.recv_window;
            let framing = chan.params.framing_type;
            if let Some(owner) = chan.owner.as_mut() {
                owner.on_result(None, framing);
            }
        }
    }

    fn on_in_call_reply(&mut self, c: Index, ch: Index, m: InCallReply, now: Instant) {
        let handle = CallHandle { conn: c, chan: ch };
        if m.result != icrp::OK {
            let errmsg = format!(
                "{}: peer denied incoming call: res={} err={}",
                handle,
                icrp_result_name(m.result),
                error_name(m.error)
            );
            info!("{}", errmsg);
            self.kill_chan(c, ch, &errmsg, now);
            return;
        }
        info!("{}: incoming call accepted by peer", handle);
        self.set_chan_state(c, ch, ChannelState::WaitConnect);
        if let Some(chan) = self.conns.get_mut(c).and_then(|cc| cc.channels.get_mut(ch)) {
            chan.peer_call_id = m.call_id;
            chan.peer_ppd = m.processing_delay;
            chan.peer_window = m.recv_window;
            let framing = chan.params.framing_type;
            if let Some(owner) = chan.owner.as_mut() {
                owner.on_result(None, framing);
            }
        }
    }

    fn on_in_call_connected(&mut self, c: Index, ch: Index, m: InCallConnected) {
        let handle = CallHandle { conn: c, chan: ch };
        info!("{}: peer incoming call connected at {} bps", handle, m.connect_speed);
        if let Some(chan) = self.conns.get_mut(c).and_then(|cc| cc.channels.get_mut(ch)) {
            chan.peer_ppd = m.processing_delay;
            chan.peer_window = m.recv_window;
            chan.params.framing_type = m.framing_type;
            if let Some(owner) = chan.owner.as_mut() {
                owner.on_connected(m.connect_speed);
                owner.on_result(None, m.framing_type);
            }
        }
        self.set_chan_state(c, ch, ChannelState::Established);
    }

    fn on_call_clear_request(&mut self, c: Index, ch: Index, now: Instant) {
        let handle = CallHandle { conn: c, chan: ch };
        let Some(chan) = self.conns.get(c).and_then(|cc| cc.channels.get(ch)) else {
            return;
        };
        if chan.is_pns() {
            warn!("{}: got CallClearRequest, but we are PNS for this call", handle);
            self.kill_ctrl(c, now);
            return;
        }
        info!("{}: call cleared by peer", handle);
        let notify = CallDiscNotify {
            call_id: chan.call_id,
            result: cdn::REQUEST,
            ..CallDiscNotify::default()
        };
        self.kill_chan(c, ch, "cleared by peer", now);
        self.send(c, None, Message::CallDiscNotify(notify), now);
    }

    fn on_call_disc_notify(&mut self, c: Index, ch: Index, m: CallDiscNotify, now: Instant) {
        info!(
            "{}: peer call disconnected res={} err={}",
            CallHandle { conn: c, chan: ch },
            cdn_result_name(m.result),
            error_name(m.error)
        );
        self.kill_chan(c, ch, "disconnected by peer", now);
    }

    fn on_set_link_info(&mut self, c: Index, ch: Index, m: SetLinkInfo) {
        let handle = CallHandle { conn: c, chan: ch };
        match self
            .conns
            .get_mut(c)
            .and_then(|cc| cc.channels.get_mut(ch))
            .and_then(|chan| chan.owner.as_mut())
        {
            Some(owner) => owner.on_set_link_info(m.send_accm, m.recv_accm),
            None => debug!("{}: ignoring SetLinkInfo", handle),
        }
    }
}
