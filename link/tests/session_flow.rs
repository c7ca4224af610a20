//! Drives a full session against a scripted modem.
//!
//! The modem echoes every transmission back before answering, like an
//! ESP8266 with `ATE1`.

use esp_link::{
    ByteSink, ByteSource, FrameReader, LinkError, LinkHandler, LinkSettings, MemoryStore,
    NetworkConfig, Session, SessionState, SharedSerial, Status,
};

struct WireSink<'a> {
    serial: &'a SharedSerial,
    wire: Vec<u8>,
}

impl<'a> WireSink<'a> {
    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.wire)
    }
}

impl ByteSink for WireSink<'_> {
    fn start_transmit(&mut self, first: u8) {
        self.wire.push(first);
        while let Some(byte) = self.serial.on_tx_ready() {
            self.wire.push(byte);
        }
    }
}

#[derive(Default)]
struct Recorder {
    messages: Vec<(Status, u8, Vec<u8>)>,
    ints: Vec<i16>,
    completions: Vec<(Status, Vec<u8>)>,
    links: Vec<(u8, bool)>,
}

impl LinkHandler<Vec<u8>> for Recorder {
    fn on_message(&mut self, status: Status, channel: u8, payload: &(impl ByteSource + ?Sized)) {
        let mut data = vec![0u8; payload.len()];
        payload.copy_to(&mut data);
        self.messages.push((status, channel, data));

        if let Ok(value) = FrameReader::new(payload).take_int() {
            self.ints.push(value);
        }
    }

    fn on_send_complete(&mut self, status: Status, buffer: Vec<u8>) {
        self.completions.push((status, buffer));
    }

    fn on_connection(&mut self, channel: u8, open: bool) {
        self.links.push((channel, open));
    }
}

type TestSession<'a> = Session<'a, WireSink<'a>, MemoryStore, Recorder, Vec<u8>>;

fn new_session(serial: &SharedSerial, configured: bool) -> TestSession<'_> {
    let settings = LinkSettings {
        network: NetworkConfig::new("Elysion", "secret", 61499).unwrap(),
        ..LinkSettings::default()
    };
    let sink = WireSink {
        serial,
        wire: Vec::new(),
    };
    Session::new(serial, sink, MemoryStore::new(configured), Recorder::default(), settings)
}

/// Echo whatever the session transmitted, then send `reply`.
/// Returns the echoed transmission.
fn respond(session: &mut TestSession<'_>, serial: &SharedSerial, reply: &[u8]) -> String {
    let sent = session.sink_mut().take();
    for &b in sent.iter().chain(reply) {
        serial.on_receive(b);
    }
    session.poll_tick();
    String::from_utf8_lossy(&sent).into_owned()
}

/// Modem output that is not a reaction to a transmission
fn inject(session: &mut TestSession<'_>, serial: &SharedSerial, bytes: &[u8]) {
    for &b in bytes {
        serial.on_receive(b);
    }
    session.poll_tick();
}

/// Let the pending delay run out
fn expire(session: &mut TestSession<'_>, serial: &SharedSerial) {
    respond(session, serial, b"");
    for _ in 0..=session.remaining_ticks() {
        session.timed_tick();
    }
}

fn pending_wire(session: &mut TestSession<'_>) -> String {
    String::from_utf8_lossy(&session.sink_mut().wire).into_owned()
}

fn ready_session(serial: &SharedSerial) -> TestSession<'_> {
    let mut session = new_session(serial, true);
    expire(&mut session, serial);
    respond(&mut session, serial, b"\r\nOK\r\n");
    respond(&mut session, serial, b"\r\nOK\r\n");
    assert!(session.is_idle());
    respond(&mut session, serial, b"");
    session
}

#[test]
fn test_provisioning_path() {
    let serial = SharedSerial::new();
    let mut session = new_session(&serial, false);

    // Nothing happens during the settle delay
    for _ in 0..6 {
        session.timed_tick();
    }
    assert_eq!(session.state(), SessionState::InitWait);
    assert!(pending_wire(&mut session).is_empty());

    session.timed_tick();
    assert_eq!(session.state(), SessionState::InitMode);

    let sent = respond(&mut session, &serial, b"\r\nOK\r\n");
    assert_eq!(sent, "AT+CWMODE=1\r\n");
    assert_eq!(session.state(), SessionState::InitNetwork);

    let sent = respond(
        &mut session,
        &serial,
        b"WIFI CONNECTED\r\nWIFI GOT IP\r\n\r\nOK\r\n",
    );
    assert_eq!(sent, "AT+CWJAP=\"Elysion\",\"secret\"\r\n");
    assert_eq!(session.state(), SessionState::InitWait);
    assert_eq!(session.remaining_ticks(), 8);
    assert_eq!(session.store().writes(), 1);
    assert_eq!(pending_wire(&mut session), "AT+RST\r\n");

    // Boot chatter after the reset is ignored
    respond(&mut session, &serial, b"\r\nOK\r\n\r\nready\r\n");
    assert_eq!(session.state(), SessionState::InitWait);

    expire(&mut session, &serial);
    assert_eq!(session.state(), SessionState::InitSetMultiplexing);

    let sent = respond(&mut session, &serial, b"\r\nOK\r\n");
    assert_eq!(sent, "AT+CIPMUX=1\r\n");
    assert_eq!(session.state(), SessionState::InitOpenServer);

    let sent = respond(&mut session, &serial, b"\r\nOK\r\n");
    assert_eq!(sent, "AT+CIPSERVER=1,61499\r\n");
    assert!(session.is_idle());
    assert_eq!(serial.pending(), 0);
}

#[test]
fn test_configured_fast_path() {
    let serial = SharedSerial::new();
    let mut session = new_session(&serial, true);

    expire(&mut session, &serial);
    assert_eq!(session.state(), SessionState::InitSetMultiplexing);
    assert_eq!(pending_wire(&mut session), "AT+CIPMUX=1\r\n");

    // "no change" counts as done during initialization
    respond(&mut session, &serial, b"\r\nno change\r\n");
    assert_eq!(session.state(), SessionState::InitOpenServer);

    respond(&mut session, &serial, b"\r\nOK\r\n");
    assert!(session.is_idle());
    assert_eq!(session.store().writes(), 0);
}

#[test]
fn test_retries_then_long_retry() {
    let serial = SharedSerial::new();
    let mut session = new_session(&serial, false);

    for expected in [2, 1, 0] {
        expire(&mut session, &serial);
        assert_eq!(session.state(), SessionState::InitMode);
        respond(&mut session, &serial, b"\r\nERROR\r\n");
        assert_eq!(session.state(), SessionState::InitWait);
        assert_eq!(session.retries_left(), expected);
        assert_eq!(session.remaining_ticks(), 8);
        assert_eq!(pending_wire(&mut session), "AT+RST\r\n");
    }

    expire(&mut session, &serial);
    respond(&mut session, &serial, b"\r\nERROR\r\n");
    assert_eq!(session.state(), SessionState::InitLongRetry);
    assert_eq!(session.remaining_ticks(), 914);
    assert_eq!(session.retries_left(), 1);

    // The reset acknowledgment does not end the back-off
    respond(&mut session, &serial, b"\r\nOK\r\n");
    assert_eq!(session.state(), SessionState::InitLongRetry);

    // One short retry, then back to the long delay
    expire(&mut session, &serial);
    assert_eq!(session.state(), SessionState::InitMode);
    respond(&mut session, &serial, b"\r\nFAIL\r\n");
    assert_eq!(session.state(), SessionState::InitWait);

    expire(&mut session, &serial);
    respond(&mut session, &serial, b"\r\nFAIL\r\n");
    assert_eq!(session.state(), SessionState::InitLongRetry);
    assert_eq!(session.remaining_ticks(), 914);
}

#[test]
fn test_failure_in_later_step_restarts_from_wait() {
    let serial = SharedSerial::new();
    let mut session = new_session(&serial, true);

    expire(&mut session, &serial);
    respond(&mut session, &serial, b"\r\nOK\r\n");
    assert_eq!(session.state(), SessionState::InitOpenServer);

    respond(&mut session, &serial, b"\r\nERROR\r\n");
    assert_eq!(session.state(), SessionState::InitWait);
    assert_eq!(session.retries_left(), 2);

    expire(&mut session, &serial);
    assert_eq!(session.state(), SessionState::InitSetMultiplexing);
}

#[test]
fn test_send_lifecycle() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    session.send(0, b"HELLO".to_vec()).unwrap();
    assert_eq!(session.state(), SessionState::SendInitiated);
    assert_eq!(pending_wire(&mut session), "AT+CIPSEND=0,5\r");

    // A second send is refused and leaves the first untouched
    let err = session.send(1, b"other".to_vec()).unwrap_err();
    assert_eq!(err.error, LinkError::InvalidState);
    assert_eq!(err.into_buffer(), b"other");
    assert_eq!(session.state(), SessionState::SendInitiated);
    assert_eq!(pending_wire(&mut session), "AT+CIPSEND=0,5\r");

    respond(&mut session, &serial, b"\r\n> ");
    assert_eq!(session.state(), SessionState::SendData);
    assert_eq!(pending_wire(&mut session), "HELLO");

    respond(&mut session, &serial, b"\r\nRecv 5 bytes\r\n\r\nSEND OK\r\n");
    assert!(session.is_idle());
    assert_eq!(
        session.handler().completions,
        vec![(Status::Success, b"HELLO".to_vec())]
    );
}

#[test]
fn test_verdict_right_after_prompt() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    session.send(1, b"HELLO".to_vec()).unwrap();
    respond(&mut session, &serial, b"> ");
    assert_eq!(session.state(), SessionState::SendData);

    respond(&mut session, &serial, b"\r\nSEND OK\r\n");
    assert!(session.is_idle());
    assert_eq!(
        session.handler().completions,
        vec![(Status::Success, b"HELLO".to_vec())]
    );
}

#[test]
fn test_status_before_prompt_completes_send() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    session.send(0, b"HELLO".to_vec()).unwrap();
    respond(&mut session, &serial, b"\r\nOK\r\n");

    assert!(session.is_idle());
    assert_eq!(
        session.handler().completions,
        vec![(Status::Success, b"HELLO".to_vec())]
    );
    assert!(pending_wire(&mut session).is_empty());
}

#[test]
fn test_send_refused_by_modem() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    session.send(3, b"x".to_vec()).unwrap();
    respond(&mut session, &serial, b"\r\nERROR\r\n");

    assert!(session.is_idle());
    assert_eq!(session.handler().completions, vec![(Status::Failure, b"x".to_vec())]);
    assert!(pending_wire(&mut session).is_empty());
}

#[test]
fn test_send_argument_checks() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    assert_eq!(
        session.send(4, b"x".to_vec()).unwrap_err().error,
        LinkError::InvalidChannel
    );
    assert_eq!(
        session.send(0, Vec::new()).unwrap_err().error,
        LinkError::InvalidLength
    );
    assert_eq!(
        session.send(0, vec![0u8; 257]).unwrap_err().error,
        LinkError::InvalidLength
    );
    assert!(session.is_idle());
    assert!(pending_wire(&mut session).is_empty());
}

#[test]
fn test_receive_message() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    inject(&mut session, &serial, b"\r\n+IPD,2,5:HELLO\r\nOK\r\n");
    inject(&mut session, &serial, b"\r\n+IPD,4,5:HELLO\r\nOK\r\n");
    inject(&mut session, &serial, b"\r\n+IPD,1,3:\x43\xff\x85\r\nOK\r\n");

    assert_eq!(
        session.handler().messages,
        vec![
            (Status::Success, 2, b"HELLO".to_vec()),
            (Status::Success, 1, vec![0x43, 0xff, 0x85]),
        ]
    );
    assert_eq!(session.handler().ints, vec![-123]);
    assert!(session.is_idle());
}

#[test]
fn test_messages_during_send() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    session.send(0, b"abc".to_vec()).unwrap();
    respond(&mut session, &serial, b"\r\n+IPD,0,2:hi\r\nOK\r\n\r\n> ");

    assert_eq!(session.handler().messages.len(), 1);
    assert_eq!(session.state(), SessionState::SendData);
}

#[test]
fn test_connection_tracking() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    inject(&mut session, &serial, b"0,CONNECT\r\n3,CONNECT\r\n");
    assert_eq!(session.connections(), 0b1001);

    inject(&mut session, &serial, b"0,CLOSED\r\n");
    assert_eq!(session.connections(), 0b1000);
    assert_eq!(
        session.handler().links,
        vec![(0, true), (3, true), (0, false)]
    );
}

#[test]
fn test_broadcast() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    let err = session.send_to_all(b"PING".to_vec()).unwrap_err();
    assert_eq!(err.error, LinkError::NotConnected);

    inject(&mut session, &serial, b"0,CONNECT\r\n2,CONNECT\r\n");
    session.send_to_all(b"PING".to_vec()).unwrap();
    assert_eq!(pending_wire(&mut session), "AT+CIPSEND=0,4\r");

    respond(&mut session, &serial, b"\r\n> ");
    let sent = respond(&mut session, &serial, b"\r\nRecv 4 bytes\r\n\r\nSEND OK\r\n");
    assert_eq!(sent, "PING");
    assert_eq!(session.state(), SessionState::SendInitiated);
    assert_eq!(pending_wire(&mut session), "AT+CIPSEND=2,4\r");
    assert!(session.handler().completions.is_empty());

    respond(&mut session, &serial, b"\r\n> ");
    respond(&mut session, &serial, b"\r\nSEND OK\r\n");
    assert!(session.is_idle());
    assert_eq!(
        session.handler().completions,
        vec![(Status::Success, b"PING".to_vec())]
    );
}

#[test]
fn test_broadcast_stops_at_first_failure() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    inject(&mut session, &serial, b"0,CONNECT\r\n1,CONNECT\r\n");
    session.send_to_all(b"PING".to_vec()).unwrap();
    respond(&mut session, &serial, b"\r\n> ");
    respond(&mut session, &serial, b"\r\nRecv 4 bytes\r\n\r\nSEND FAIL\r\n");

    assert!(session.is_idle());
    assert_eq!(
        session.handler().completions,
        vec![(Status::Failure, b"PING".to_vec())]
    );
    assert!(pending_wire(&mut session).is_empty());
}

#[test]
fn test_unsolicited_status_in_idle() {
    let serial = SharedSerial::new();
    let mut session = ready_session(&serial);

    inject(&mut session, &serial, b"\r\nERROR\r\n\r\nOK\r\n> ");
    assert!(session.is_idle());
    assert!(session.handler().completions.is_empty());
}
