//! Engine scenarios driven with explicit clocks.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::*;
use crate::core::constants::{
    ERROR_PAC_ERROR, FRAMECAP_ANY, FRAMECAP_SYNC, PROTOCOL_VERSION, cdn, echo, icrp, ocrp, sccrp,
    stop_reason,
};
use crate::core::error::EngineError;
use crate::core::traits::{CallPolicy, DenyAll, IncomingCallOffer, LinkOwner, OutgoingCallOffer};
use crate::wire::*;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Result(Option<String>, u32),
    Connected(u32),
    LinkInfo(u32, u32),
    Cancel,
}

#[derive(Debug, Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    fn owner(&self) -> Box<dyn LinkOwner> {
        Box::new(self.clone())
    }

    fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

impl LinkOwner for Recorder {
    fn on_result(&mut self, error: Option<&str>, frame_type: u32) {
        self.0
            .lock()
            .unwrap()
            .push(Event::Result(error.map(str::to_string), frame_type));
    }

    fn on_connected(&mut self, speed: u32) {
        self.0.lock().unwrap().push(Event::Connected(speed));
    }

    fn on_set_link_info(&mut self, send_accm: u32, recv_accm: u32) {
        self.0.lock().unwrap().push(Event::LinkInfo(send_accm, recv_accm));
    }

    fn on_cancel(&mut self) {
        self.0.lock().unwrap().push(Event::Cancel);
    }
}

/// Accepts every peer-proposed call with the same recorder.
#[derive(Clone, Default)]
struct AcceptAll {
    owner: Recorder,
    offers: Arc<Mutex<Vec<CallHandle>>>,
}

impl CallPolicy for AcceptAll {
    fn accept_incoming(&mut self, offer: &IncomingCallOffer) -> Option<Box<dyn LinkOwner>> {
        self.offers.lock().unwrap().push(offer.handle);
        Some(self.owner.owner())
    }

    fn accept_outgoing(&mut self, offer: &OutgoingCallOffer) -> Option<Box<dyn LinkOwner>> {
        self.offers.lock().unwrap().push(offer.handle);
        Some(self.owner.owner())
    }
}

/// Route engine logs to the test harness output.
fn new_engine(config: EngineConfig, policy: impl CallPolicy + 'static) -> Engine {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
    Engine::new(config, policy)
}

fn peer_ip() -> IpAddr {
    "10.0.0.2".parse().unwrap()
}

fn local() -> SocketAddr {
    "10.0.0.1:40000".parse().unwrap()
}

fn sent(engine: &mut Engine) -> Vec<Message> {
    engine
        .drain_outputs()
        .into_iter()
        .filter_map(|out| match out {
            Output::Send { bytes, .. } => Some(Message::decode(&bytes).unwrap()),
            _ => None,
        })
        .collect()
}

fn closes(outputs: &[Output]) -> usize {
    outputs
        .iter()
        .filter(|o| matches!(o, Output::Close { .. }))
        .count()
}

fn feed(engine: &mut Engine, conn: ConnId, msg: Message, now: Instant) {
    engine.on_data(conn, &msg.encode(), now);
}

fn sccrp_ok() -> Message {
    Message::StartControlConnectionReply(StartControlConnectionReply {
        protocol_version: PROTOCOL_VERSION,
        result: sccrp::OK,
        host_name: "peer".into(),
        ..Default::default()
    })
}

fn sccrq(version: u16) -> Message {
    Message::StartControlConnectionRequest(StartControlConnectionRequest {
        protocol_version: version,
        host_name: "peer".into(),
        ..Default::default()
    })
}

/// Originate a call and bring its connection up. Returns the request sent.
fn originate(engine: &mut Engine, request: CallRequest, owner: &Recorder, now: Instant) -> (CallHandle, Message) {
    let handle = engine.originate_call(request, owner.owner(), now).unwrap();
    let conn = handle.connection();
    if engine.connection_state(conn) == Some(ControlState::Idle) {
        engine.on_connected(conn, local(), now);
        sent(engine);
        feed(engine, conn, sccrp_ok(), now);
    }
    let mut msgs = sent(engine);
    assert_eq!(msgs.len(), 1, "{msgs:?}");
    (handle, msgs.remove(0))
}

/// Originate an outgoing call and let the peer accept it.
fn established_call(engine: &mut Engine, owner: &Recorder, now: Instant) -> CallHandle {
    let (handle, msg) = originate(engine, CallRequest::outgoing(peer_ip()), owner, now);
    let Message::OutCallRequest(req) = msg else {
        panic!("expected OutCallRequest, got {msg:?}");
    };
    let reply = OutCallReply {
        call_id: 0x4000,
        peer_call_id: req.call_id,
        result: ocrp::OK,
        connect_speed: 64000,
        recv_window: 8,
        processing_delay: 2,
        ..Default::default()
    };
    feed(engine, handle.connection(), Message::OutCallReply(reply), now);
    assert_eq!(engine.call_state(handle), Some(ChannelState::Established));
    handle
}

/// Accept a connection from the peer and complete the start exchange.
fn accepted(engine: &mut Engine, now: Instant) -> ConnId {
    let conn = engine.accept_connection(
        "10.0.0.1:1723".parse().unwrap(),
        "10.0.0.2:50000".parse().unwrap(),
        now,
    );
    feed(engine, conn, sccrq(PROTOCOL_VERSION), now);
    let msgs = sent(engine);
    assert!(matches!(
        &msgs[..],
        [Message::StartControlConnectionReply(r)] if r.result == sccrp::OK
    ));
    conn
}

#[test]
fn test_outgoing_call_established() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfigBuilder::new().host_name("gw").build(), DenyAll);
    let owner = Recorder::default();

    let request = CallRequest::outgoing(peer_ip()).called_number("5551234");
    let handle = engine.originate_call(request, owner.owner(), t0).unwrap();
    let conn = handle.connection();
    assert_eq!(
        engine.drain_outputs(),
        vec![Output::Connect {
            conn,
            local: None,
            peer: "10.0.0.2:1723".parse().unwrap(),
        }]
    );
    assert_eq!(engine.call_state(handle), Some(ChannelState::WaitCtrl));

    engine.on_connected(conn, local(), t0);
    let msgs = sent(&mut engine);
    let [Message::StartControlConnectionRequest(start)] = &msgs[..] else {
        panic!("expected StartControlConnectionRequest, got {msgs:?}");
    };
    assert_eq!(start.protocol_version, PROTOCOL_VERSION);
    assert_eq!(start.host_name, "gw");
    assert_eq!(engine.connection_state(conn), Some(ControlState::WaitControlReply));

    feed(&mut engine, conn, sccrp_ok(), t0);
    assert_eq!(engine.connection_state(conn), Some(ControlState::Established));
    assert_eq!(engine.peer_name(handle), Some("peer"));
    let msgs = sent(&mut engine);
    let [Message::OutCallRequest(req)] = &msgs[..] else {
        panic!("expected OutCallRequest, got {msgs:?}");
    };
    assert_eq!(req.phone_number, "5551234");
    assert_eq!(req.phone_number_len, 7);
    assert_eq!(req.serial_number, req.call_id);
    assert_eq!(engine.call_state(handle), Some(ChannelState::WaitOutReply));

    let reply = OutCallReply {
        call_id: 0x4000,
        peer_call_id: req.call_id,
        result: ocrp::OK,
        connect_speed: 64000,
        recv_window: 8,
        processing_delay: 2,
        ..Default::default()
    };
    feed(&mut engine, conn, Message::OutCallReply(reply), t0);

    assert_eq!(engine.call_state(handle), Some(ChannelState::Established));
    assert_eq!(owner.events(), vec![Event::Result(None, FRAMECAP_ANY)]);
    let info = engine.session_info(handle).unwrap();
    assert_eq!(info.local_call_id, req.call_id);
    assert_eq!(info.peer_call_id, 0x4000);
    assert_eq!((info.peer_window, info.peer_ppd), (8, 2));
    assert_eq!(info.peer_addr, peer_ip());
    assert_eq!(info.local_addr, local().ip());
}

#[test]
fn test_bad_version_start_request() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let conn = engine.accept_connection(local(), "10.0.0.2:50000".parse().unwrap(), t0);

    feed(&mut engine, conn, sccrq(0x0200), t0);
    let outputs = engine.drain_outputs();
    assert_eq!(outputs.len(), 2);
    let Output::Send { bytes, .. } = &outputs[0] else {
        panic!("expected reply first, got {outputs:?}");
    };
    let Message::StartControlConnectionReply(reply) = Message::decode(bytes).unwrap() else {
        panic!("expected StartControlConnectionReply");
    };
    assert_eq!(reply.result, sccrp::BAD_VERSION);
    assert_eq!(outputs[1], Output::Close { conn });
    assert_eq!(engine.connection_state(conn), Some(ControlState::Dying));

    engine.reap();
    assert_eq!(engine.connection_state(conn), None);
}

#[test]
fn test_version_mismatch_in_reply_stops_gracefully() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let handle = engine
        .originate_call(CallRequest::outgoing(peer_ip()), owner.owner(), t0)
        .unwrap();
    let conn = handle.connection();
    engine.on_connected(conn, local(), t0);
    sent(&mut engine);

    let reply = StartControlConnectionReply {
        protocol_version: 0x0200,
        result: sccrp::OK,
        ..Default::default()
    };
    feed(&mut engine, conn, Message::StartControlConnectionReply(reply), t0);
    let msgs = sent(&mut engine);
    assert!(matches!(
        &msgs[..],
        [Message::StopControlConnectionRequest(r)] if r.reason == stop_reason::BAD_VERSION
    ));
    assert_eq!(engine.connection_state(conn), Some(ControlState::WaitStopReply));

    let stop = StopControlConnectionReply { result: 1, error: 0 };
    feed(&mut engine, conn, Message::StopControlConnectionReply(stop), t0);
    assert_eq!(engine.connection_state(conn), Some(ControlState::Dying));
    assert_eq!(
        owner.events(),
        vec![Event::Result(Some("control channel shutdown".into()), 0)]
    );
}

#[test]
fn test_out_call_reply_timeout() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let (handle, _) = originate(&mut engine, CallRequest::outgoing(peer_ip()), &owner, t0);
    assert_eq!(engine.call_ids.in_use(), 1);

    engine.advance(t0 + Duration::from_secs(89));
    assert!(owner.events().is_empty());

    engine.advance(t0 + Duration::from_secs(90));
    let events = owner.events();
    assert_eq!(events.len(), 1);
    let Event::Result(Some(errmsg), _) = &events[0] else {
        panic!("expected failure, got {events:?}");
    };
    assert_eq!(
        errmsg,
        &format!("{handle}: no reply to OutCallRequest after 90 sec (pac error)")
    );
    assert_eq!(engine.call_ids.in_use(), 0);
    assert_eq!(engine.call_state(handle), Some(ChannelState::Dying));
    assert_eq!(engine.connection_state(handle.connection()), Some(ControlState::Dying));
    assert_eq!(closes(&engine.drain_outputs()), 1);

    engine.reap();
    assert_eq!(engine.call_state(handle), None);
    assert!(engine.status().is_empty());
}

#[test]
fn test_in_call_request_timeout_clears_call_only() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let (handle, msg) = originate(&mut engine, CallRequest::incoming(peer_ip()), &owner, t0);
    let Message::InCallRequest(req) = msg else {
        panic!("expected InCallRequest, got {msg:?}");
    };
    assert_eq!(engine.call_state(handle), Some(ChannelState::WaitInReply));

    // The keepalive echo fires at the same instant.
    engine.advance(t0 + Duration::from_secs(60));
    let msgs = sent(&mut engine);
    let Some(Message::CallDiscNotify(notify)) = msgs
        .iter()
        .find(|m| m.message_type() == MessageType::CallDiscNotify)
    else {
        panic!("expected CallDiscNotify, got {msgs:?}");
    };
    assert_eq!(notify.call_id, req.call_id);
    assert_eq!(notify.result, cdn::GENERAL_ERROR);
    assert_eq!(notify.error, ERROR_PAC_ERROR);

    assert_eq!(owner.events().len(), 1);
    assert_eq!(engine.call_state(handle), Some(ChannelState::Dying));
    assert_eq!(
        engine.connection_state(handle.connection()),
        Some(ControlState::Established)
    );
}

#[test]
fn test_call_ids_unique_across_connections() {
    let t0 = Instant::now();
    let config = EngineConfigBuilder::new()
        .max_calls_per_connection(3)
        .randomize_call_ids(true)
        .build();
    let mut engine = new_engine(config, DenyAll);
    let owner = Recorder::default();

    let handles: Vec<CallHandle> = (0..7)
        .map(|_| {
            engine
                .originate_call(CallRequest::outgoing(peer_ip()), owner.owner(), t0)
                .unwrap()
        })
        .collect();
    let connects = engine
        .drain_outputs()
        .into_iter()
        .filter(|o| matches!(o, Output::Connect { .. }))
        .count();
    assert_eq!(connects, 3);

    let mut ids: Vec<u16> = handles
        .iter()
        .map(|h| engine.session_info(*h).unwrap().local_call_id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 7);

    let gone = engine.session_info(handles[0]).unwrap().local_call_id;
    engine.close_call(handles[0], cdn::ADMIN, 0, 0, t0).unwrap();
    assert!(!engine.call_ids.is_allocated(gone));
    assert!(engine.session_info(handles[0]).is_none());
}

#[test]
fn test_replies_routed_by_call_id() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let (first, second) = (Recorder::default(), Recorder::default());
    let (h1, m1) = originate(&mut engine, CallRequest::outgoing(peer_ip()), &first, t0);
    let (h2, m2) = originate(&mut engine, CallRequest::outgoing(peer_ip()), &second, t0);
    assert_eq!(h1.connection(), h2.connection());
    let conn = h1.connection();
    let (Message::OutCallRequest(r1), Message::OutCallRequest(r2)) = (m1, m2) else {
        panic!("expected two OutCallRequests");
    };

    let reply = |peer_call_id| {
        Message::OutCallReply(OutCallReply {
            call_id: 0x99,
            peer_call_id,
            result: ocrp::OK,
            ..Default::default()
        })
    };
    feed(&mut engine, conn, reply(r2.call_id), t0);
    assert_eq!(engine.call_state(h2), Some(ChannelState::Established));
    assert_eq!(engine.call_state(h1), Some(ChannelState::WaitOutReply));
    assert!(first.events().is_empty());
    assert_eq!(second.events().len(), 1);

    // Unknown call id: dropped, nothing else changes.
    feed(&mut engine, conn, reply(r2.call_id.wrapping_add(1000)), t0);
    assert_eq!(engine.connection_state(conn), Some(ControlState::Established));

    feed(&mut engine, conn, reply(r1.call_id), t0);
    assert_eq!(engine.call_state(h1), Some(ChannelState::Established));

    // A second reply for an answered request is spurious.
    feed(&mut engine, conn, reply(r1.call_id), t0);
    assert_eq!(engine.connection_state(conn), Some(ControlState::Established));
}

#[test]
fn test_unused_connection_closes_once() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let handle = established_call(&mut engine, &owner, t0);
    let conn = handle.connection();

    let notify = CallDiscNotify {
        call_id: 0x4000,
        result: cdn::LOST_CARRIER,
        ..Default::default()
    };
    feed(&mut engine, conn, Message::CallDiscNotify(notify), t0);
    assert_eq!(
        owner.events().last(),
        Some(&Event::Result(Some("disconnected by peer".into()), 0))
    );
    engine.reap();

    engine.advance(t0 + Duration::from_secs(9));
    assert_eq!(engine.connection_state(conn), Some(ControlState::Established));

    let t1 = t0 + Duration::from_secs(10);
    engine.advance(t1);
    let msgs = sent(&mut engine);
    assert!(matches!(
        &msgs[..],
        [Message::StopControlConnectionRequest(r)] if r.reason == stop_reason::LOCAL_SHUTDOWN
    ));
    assert_eq!(engine.connection_state(conn), Some(ControlState::WaitStopReply));

    // No stop reply: the stop request times out and the connection dies.
    engine.advance(t1 + Duration::from_secs(3));
    assert_eq!(engine.connection_state(conn), Some(ControlState::Dying));
    let mut outputs = engine.drain_outputs();
    engine.advance(t1 + Duration::from_secs(600));
    outputs.extend(engine.drain_outputs());
    assert_eq!(closes(&outputs), 1);
}

#[test]
fn test_new_call_cancels_unused_timer() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let handle = established_call(&mut engine, &owner, t0);
    engine.close_call(handle, cdn::ADMIN, 0, 0, t0).unwrap();
    let notify = CallDiscNotify {
        call_id: 0x4000,
        result: cdn::REQUEST,
        ..Default::default()
    };
    sent(&mut engine);
    feed(&mut engine, handle.connection(), Message::CallDiscNotify(notify), t0);
    engine.reap();

    let (again, _) = originate(&mut engine, CallRequest::outgoing(peer_ip()), &owner, t0);
    assert_eq!(again.connection(), handle.connection());
    engine.advance(t0 + Duration::from_secs(30));
    assert_eq!(
        engine.connection_state(handle.connection()),
        Some(ControlState::Established)
    );
}

#[test]
fn test_local_close_as_network_server() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let handle = established_call(&mut engine, &owner, t0);
    let call_id = engine.session_info(handle).unwrap().local_call_id;

    engine.close_call(handle, cdn::ADMIN, 0, 0, t0).unwrap();
    let msgs = sent(&mut engine);
    assert!(matches!(&msgs[..], [Message::CallClearRequest(r)] if r.call_id == call_id));
    assert_eq!(engine.call_state(handle), Some(ChannelState::WaitDisconnect));
    // Already clearing.
    engine.close_call(handle, cdn::ADMIN, 0, 0, t0).unwrap();
    assert!(sent(&mut engine).is_empty());
    assert_eq!(owner.events().len(), 1);
}

#[test]
fn test_state_totality_on_idle_connection() {
    let t0 = Instant::now();
    for msg_type in MessageType::ALL {
        let mut engine = new_engine(EngineConfig::default(), DenyAll);
        let conn = engine.accept_connection(local(), "10.0.0.2:50000".parse().unwrap(), t0);
        let zeros = vec![0u8; layout::payload_len(msg_type)];
        let mut bytes = Message::decode_payload(msg_type, &zeros).unwrap().encode();
        if msg_type == MessageType::StartControlConnectionRequest {
            bytes = sccrq(PROTOCOL_VERSION).encode();
        }
        engine.on_data(conn, &bytes, t0);

        let state = engine.connection_state(conn).unwrap();
        match msg_type {
            MessageType::StartControlConnectionRequest => {
                assert_eq!(state, ControlState::Established)
            }
            MessageType::StopControlConnectionRequest
            | MessageType::EchoRequest
            | MessageType::OutCallRequest
            | MessageType::InCallRequest => assert_eq!(state, ControlState::Dying, "{msg_type}"),
            // Stray replies and calls that do not exist are dropped.
            _ => assert_eq!(state, ControlState::Idle, "{msg_type}"),
        }
    }
}

#[test]
fn test_silent_peer_connection_reaped() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let conn = engine.accept_connection(local(), "10.0.0.2:50000".parse().unwrap(), t0);
    assert!(engine.next_deadline().is_some());

    engine.advance(t0 + Duration::from_secs(59));
    assert_eq!(engine.connection_state(conn), Some(ControlState::Idle));

    engine.advance(t0 + Duration::from_secs(60));
    assert_eq!(engine.connection_state(conn), Some(ControlState::Dying));
    let outputs = engine.drain_outputs();
    assert_eq!(closes(&outputs), 1);

    engine.reap();
    assert_eq!(engine.connection_state(conn), None);
    assert!(engine.status().is_empty());
    assert_eq!(engine.next_deadline(), None);
}

#[test]
fn test_start_reply_never_arrives() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let handle = engine
        .originate_call(CallRequest::outgoing(peer_ip()), owner.owner(), t0)
        .unwrap();
    let conn = handle.connection();
    engine.on_connected(conn, local(), t0);
    assert_eq!(engine.connection_state(conn), Some(ControlState::WaitControlReply));

    engine.advance(t0 + Duration::from_secs(60));
    assert_eq!(engine.connection_state(conn), Some(ControlState::Dying));
    assert_eq!(
        owner
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Result(Some(_), _)))
            .count(),
        1
    );
    engine.reap();
    assert_eq!(engine.connection_state(conn), None);
    assert_eq!(engine.call_ids.in_use(), 0);
}

#[test]
fn test_call_message_in_wrong_state_kills_connection() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let (handle, _) = originate(&mut engine, CallRequest::outgoing(peer_ip()), &owner, t0);

    // Peer call id is still 0 while the call waits for its reply.
    let info = SetLinkInfo {
        call_id: 0,
        send_accm: 1,
        recv_accm: 2,
    };
    feed(&mut engine, handle.connection(), Message::SetLinkInfo(info), t0);
    assert_eq!(
        engine.connection_state(handle.connection()),
        Some(ControlState::Dying)
    );
    assert_eq!(
        owner.events(),
        vec![Event::Result(Some("control channel shutdown".into()), 0)]
    );
}

#[test]
fn test_malformed_frame_kills_connection() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let conn = accepted(&mut engine, t0);
    let mut bytes = Message::EchoRequest(EchoRequest { id: 1 }).encode();
    bytes[4] ^= 0xff;
    engine.on_data(conn, &bytes, t0);
    assert_eq!(engine.connection_state(conn), Some(ControlState::Dying));
}

#[test]
fn test_echo_keepalive() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let conn = accepted(&mut engine, t0);

    let t1 = t0 + Duration::from_secs(60);
    engine.advance(t1);
    let msgs = sent(&mut engine);
    assert!(matches!(&msgs[..], [Message::EchoRequest(r)] if r.id == 1));

    let reply = EchoReply {
        id: 1,
        result: echo::OK,
        error: 0,
    };
    feed(&mut engine, conn, Message::EchoReply(reply), t1);
    assert_eq!(engine.connection_state(conn), Some(ControlState::Established));

    let t2 = t1 + Duration::from_secs(60);
    engine.advance(t2);
    let msgs = sent(&mut engine);
    assert!(matches!(&msgs[..], [Message::EchoRequest(r)] if r.id == 2));

    let reply = EchoReply {
        id: 7,
        result: echo::OK,
        error: 0,
    };
    feed(&mut engine, conn, Message::EchoReply(reply), t2);
    assert_eq!(engine.connection_state(conn), Some(ControlState::Dying));
}

#[test]
fn test_echo_unanswered_kills_connection() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let conn = accepted(&mut engine, t0);

    engine.advance(t0 + Duration::from_secs(60));
    assert_eq!(engine.connection_state(conn), Some(ControlState::Established));
    engine.advance(t0 + Duration::from_secs(120));
    assert_eq!(engine.connection_state(conn), Some(ControlState::Dying));
}

#[test]
fn test_echo_request_answered() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let conn = accepted(&mut engine, t0);
    feed(&mut engine, conn, Message::EchoRequest(EchoRequest { id: 0xabcd }), t0);
    let msgs = sent(&mut engine);
    assert!(matches!(
        &msgs[..],
        [Message::EchoReply(r)] if r.id == 0xabcd && r.result == echo::OK
    ));
}

#[test]
fn test_peer_stop_request() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let handle = established_call(&mut engine, &owner, t0);
    let conn = handle.connection();

    let stop = StopControlConnectionRequest {
        reason: stop_reason::NONE,
    };
    feed(&mut engine, conn, Message::StopControlConnectionRequest(stop), t0);
    let outputs = engine.drain_outputs();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[1], Output::Close { conn });
    assert_eq!(owner.events().len(), 2);
    assert_eq!(engine.call_ids.in_use(), 0);
}

#[test]
fn test_peer_outgoing_call_answered() {
    let t0 = Instant::now();
    let policy = AcceptAll::default();
    let mut engine = new_engine(EngineConfig::default(), policy.clone());
    let conn = accepted(&mut engine, t0);

    let req = OutCallRequest {
        call_id: 77,
        serial_number: 5,
        bearer_type: 2,
        framing_type: 1,
        phone_number_len: 3,
        phone_number: "555".into(),
        recv_window: 32,
        processing_delay: 3,
        ..Default::default()
    };
    feed(&mut engine, conn, Message::OutCallRequest(req), t0);
    assert!(sent(&mut engine).is_empty());
    let handle = policy.offers.lock().unwrap()[0];
    assert_eq!(engine.call_state(handle), Some(ChannelState::WaitAnswer));
    assert_eq!(engine.session_info(handle).unwrap().peer_call_id, 77);

    assert!(matches!(
        engine.call_connected(handle, 1, t0),
        Err(EngineError::InvalidCallState { .. })
    ));
    engine.answer_call(handle, ocrp::OK, 0, 0, 64000, t0).unwrap();
    let msgs = sent(&mut engine);
    let [Message::OutCallReply(reply)] = &msgs[..] else {
        panic!("expected OutCallReply, got {msgs:?}");
    };
    assert_eq!(reply.peer_call_id, 77);
    assert_eq!(reply.result, ocrp::OK);
    assert_eq!(reply.connect_speed, 64000);
    assert_eq!(reply.call_id, engine.session_info(handle).unwrap().local_call_id);
    assert_eq!(reply.physical_channel, (conn.slot() << 16) | handle.chan.slot());
    assert_eq!(engine.call_state(handle), Some(ChannelState::Established));

    // We are the access concentrator: a clear request is honoured.
    feed(
        &mut engine,
        conn,
        Message::CallClearRequest(CallClearRequest { call_id: 77 }),
        t0,
    );
    let msgs = sent(&mut engine);
    assert!(matches!(
        &msgs[..],
        [Message::CallDiscNotify(n)] if n.result == cdn::REQUEST && n.call_id == reply.call_id
    ));
    assert_eq!(
        policy.owner.events(),
        vec![Event::Result(Some("cleared by peer".into()), 0)]
    );
}

#[test]
fn test_peer_outgoing_call_denied() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let conn = accepted(&mut engine, t0);

    let req = OutCallRequest {
        call_id: 77,
        ..Default::default()
    };
    feed(&mut engine, conn, Message::OutCallRequest(req), t0);
    let msgs = sent(&mut engine);
    assert!(matches!(
        &msgs[..],
        [Message::OutCallReply(r)] if r.peer_call_id == 77 && r.result == ocrp::ADMIN_PROHIBITED
    ));
    assert_eq!(engine.call_ids.in_use(), 0);
    assert_eq!(engine.status()[0].active_calls, 0);
}

#[test]
fn test_waiting_answer_closed_cancels_dial() {
    let t0 = Instant::now();
    let policy = AcceptAll::default();
    let mut engine = new_engine(EngineConfig::default(), policy.clone());
    let conn = accepted(&mut engine, t0);
    let req = OutCallRequest {
        call_id: 9,
        ..Default::default()
    };
    feed(&mut engine, conn, Message::OutCallRequest(req), t0);
    let handle = policy.offers.lock().unwrap()[0];

    engine.close_call(handle, cdn::ADMIN, 0, 0, t0).unwrap();
    let msgs = sent(&mut engine);
    assert!(matches!(
        &msgs[..],
        [Message::OutCallReply(r)] if r.peer_call_id == 9 && r.result == ocrp::ADMIN_PROHIBITED
    ));
    assert_eq!(policy.owner.events(), vec![Event::Cancel]);
}

#[test]
fn test_peer_incoming_call() {
    let t0 = Instant::now();
    let policy = AcceptAll::default();
    let mut engine = new_engine(EngineConfig::default(), policy.clone());
    let conn = accepted(&mut engine, t0);

    let req = InCallRequest {
        call_id: 300,
        serial_number: 12,
        bearer_type: 1,
        dialed_len: 3,
        dialing_len: 200,
        dialed_number: "555999".into(),
        dialing_number: "123".into(),
        ..Default::default()
    };
    feed(&mut engine, conn, Message::InCallRequest(req), t0);
    let handle = policy.offers.lock().unwrap()[0];
    let msgs = sent(&mut engine);
    let [Message::InCallReply(reply)] = &msgs[..] else {
        panic!("expected InCallReply, got {msgs:?}");
    };
    assert_eq!(reply.result, icrp::OK);
    assert_eq!(reply.peer_call_id, 300);
    assert_eq!(engine.call_state(handle), Some(ChannelState::WaitConnect));

    let connected = InCallConnected {
        peer_call_id: reply.call_id,
        connect_speed: 33600,
        recv_window: 4,
        processing_delay: 0,
        framing_type: FRAMECAP_SYNC,
    };
    feed(&mut engine, conn, Message::InCallConnected(connected), t0);
    assert_eq!(engine.call_state(handle), Some(ChannelState::Established));
    assert_eq!(
        policy.owner.events(),
        vec![Event::Connected(33600), Event::Result(None, FRAMECAP_SYNC)]
    );

    // We are the network server here: link info goes out with the peer's id.
    engine.set_link_info(handle, 0xffff_ffff, 0, t0).unwrap();
    let msgs = sent(&mut engine);
    assert!(matches!(&msgs[..], [Message::SetLinkInfo(s)] if s.call_id == 300));
}

#[test]
fn test_peer_incoming_call_denied() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let conn = accepted(&mut engine, t0);
    let req = InCallRequest {
        call_id: 300,
        ..Default::default()
    };
    feed(&mut engine, conn, Message::InCallRequest(req), t0);
    let msgs = sent(&mut engine);
    assert!(matches!(
        &msgs[..],
        [Message::InCallReply(r)] if r.result == icrp::NOT_ACCEPTED && r.peer_call_id == 300
    ));
    assert_eq!(engine.call_ids.in_use(), 0);
    // The denied call leaves no reply timer behind.
    assert!(engine.conns.get(conn.0).unwrap().pending.is_empty());
}

#[test]
fn test_local_incoming_call_connects() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let request = CallRequest::incoming(peer_ip())
        .calling_number("5550000")
        .called_number("100");
    let (handle, msg) = originate(&mut engine, request, &owner, t0);
    let Message::InCallRequest(req) = msg else {
        panic!("expected InCallRequest, got {msg:?}");
    };
    assert_eq!((req.dialing_len, req.dialed_len), (7, 3));
    assert_eq!(req.dialing_number, "5550000");

    let reply = InCallReply {
        call_id: 0x55,
        peer_call_id: req.call_id,
        result: icrp::OK,
        recv_window: 10,
        ..Default::default()
    };
    feed(&mut engine, handle.connection(), Message::InCallReply(reply), t0);
    assert_eq!(engine.call_state(handle), Some(ChannelState::WaitConnect));
    assert_eq!(owner.events(), vec![Event::Result(None, FRAMECAP_ANY)]);

    // Access concentrators do not send link info.
    engine.set_link_info(handle, 1, 1, t0).unwrap();
    assert!(sent(&mut engine).is_empty());

    engine.call_connected(handle, 28800, t0).unwrap();
    let msgs = sent(&mut engine);
    assert!(matches!(
        &msgs[..],
        [Message::InCallConnected(c)] if c.peer_call_id == 0x55 && c.connect_speed == 28800
    ));
    assert_eq!(engine.call_state(handle), Some(ChannelState::Established));

    let sli = SetLinkInfo {
        call_id: req.call_id,
        send_accm: 3,
        recv_accm: 4,
    };
    feed(&mut engine, handle.connection(), Message::SetLinkInfo(sli), t0);
    assert_eq!(owner.events().last(), Some(&Event::LinkInfo(3, 4)));
}

#[test]
fn test_clear_while_waiting_for_connect() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let (handle, msg) = originate(&mut engine, CallRequest::incoming(peer_ip()), &owner, t0);
    let Message::InCallRequest(req) = msg else {
        panic!("expected InCallRequest, got {msg:?}");
    };
    let reply = InCallReply {
        call_id: 0x55,
        peer_call_id: req.call_id,
        result: icrp::OK,
        ..Default::default()
    };
    let conn = handle.connection();
    feed(&mut engine, conn, Message::InCallReply(reply), t0);
    assert_eq!(engine.call_state(handle), Some(ChannelState::WaitConnect));

    let clear = CallClearRequest { call_id: 0x55 };
    feed(&mut engine, conn, Message::CallClearRequest(clear), t0);
    let msgs = sent(&mut engine);
    assert!(matches!(
        &msgs[..],
        [Message::CallDiscNotify(n)] if n.call_id == req.call_id && n.result == cdn::REQUEST
    ));
    assert_eq!(
        owner.events().last(),
        Some(&Event::Result(Some("cleared by peer".into()), 0))
    );
    assert_eq!(engine.connection_state(conn), Some(ControlState::Established));
}

#[test]
fn test_failed_out_call_reported_once() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let (handle, msg) = originate(&mut engine, CallRequest::outgoing(peer_ip()), &owner, t0);
    let Message::OutCallRequest(req) = msg else {
        panic!("expected OutCallRequest");
    };
    let reply = OutCallReply {
        peer_call_id: req.call_id,
        result: ocrp::BUSY,
        ..Default::default()
    };
    feed(&mut engine, handle.connection(), Message::OutCallReply(reply), t0);
    assert_eq!(
        owner.events(),
        vec![Event::Result(
            Some(format!("{handle}: outgoing call failed: res=busy err=none")),
            0
        )]
    );
}

#[test]
fn test_clear_request_as_network_server_kills_connection() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let handle = established_call(&mut engine, &owner, t0);
    // The network-server id of our own call is our call id.
    let call_id = engine.session_info(handle).unwrap().local_call_id;
    feed(
        &mut engine,
        handle.connection(),
        Message::CallClearRequest(CallClearRequest { call_id }),
        t0,
    );
    assert_eq!(
        engine.connection_state(handle.connection()),
        Some(ControlState::Dying)
    );
}

#[test]
fn test_connect_failure_reports_to_owner() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let owner = Recorder::default();
    let handle = engine
        .originate_call(CallRequest::outgoing(peer_ip()).peer_port(1724), owner.owner(), t0)
        .unwrap();
    engine.drain_outputs();
    engine.on_connect_failed(handle.connection(), "connection refused", t0);
    assert_eq!(owner.events().len(), 1);
    assert!(engine.session_info(handle).is_none());
    assert!(matches!(
        engine.close_call(handle, cdn::ADMIN, 0, 0, t0),
        Err(EngineError::UnknownCall)
    ));
}

#[test]
fn test_status_and_names() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfigBuilder::new().host_name("gw").build(), DenyAll);
    let owner = Recorder::default();
    let handle = established_call(&mut engine, &owner, t0);
    assert_eq!(engine.self_name(handle), Some("gw"));

    let status = engine.status();
    assert_eq!(status.len(), 1);
    assert_eq!(
        status[0].to_string(),
        "pptp0  10.0.0.1:40000 <=> 10.0.0.2:1723  ESTABLISHED  1 calls"
    );

    engine.close_connection(handle.connection(), t0).unwrap();
    assert_eq!(engine.status()[0].state, ControlState::WaitStopReply);
}

#[test]
fn test_reserved_fields_tolerated() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let conn = accepted(&mut engine, t0);
    let mut bytes = Message::EchoRequest(EchoRequest { id: 3 }).encode();
    bytes[10] = 0x7f;
    engine.on_data(conn, &bytes, t0);
    assert_eq!(engine.connection_state(conn), Some(ControlState::Established));
    assert_eq!(sent(&mut engine).len(), 1);
}

#[test]
fn test_split_frames() {
    let t0 = Instant::now();
    let mut engine = new_engine(EngineConfig::default(), DenyAll);
    let conn = accepted(&mut engine, t0);
    let mut bytes = Message::EchoRequest(EchoRequest { id: 1 }).encode();
    bytes.extend(Message::EchoRequest(EchoRequest { id: 2 }).encode());
    let (a, b) = bytes.split_at(5);
    engine.on_data(conn, a, t0);
    assert!(sent(&mut engine).is_empty());
    engine.on_data(conn, b, t0);
    assert_eq!(sent(&mut engine).len(), 2);
}
