//! # Modem Session
//!
//! Sequences the modem configuration after power-up and arbitrates the single
//! outbound send slot.
//!
//! ## Initialization
//!
//! ```text
//!                 ┌──────────── configured ───────────────┐
//!                 │                                       ▼
//!  InitWait ──────┴─► InitMode ──► InitNetwork ──► InitSetMultiplexing ──► InitOpenServer ──► Idle
//!     ▲   ▲                            │ persist flag, reset
//!     │   └────────────────────────────┘
//!     │
//!     └── failure: reset, short retry ── budget exhausted ──► InitLongRetry
//! ```
//!
//! Timer-driven transitions only happen in [`Session::timed_tick`], status
//! driven ones while [`Session::poll_tick`] drains the decoder.
//!
//! ## Sending
//!
//! ```text
//!  Idle ──send()──► SendInitiated ──"> "──► SendData ──status──► Idle
//!                        │                                  (on_send_complete)
//!                        └── any other status ─────────────────►
//! ```

use heapless::String;
use log::{debug, error, info, trace, warn};

use crate::buffer::RX_BUFFER_SIZE;
use crate::config::LinkSettings;
use crate::error::{LinkError, Status};
use crate::protocol::{Command, COMMAND_BUFFER_SIZE, MAX_CHANNELS};
use crate::serial::{SharedSerial, TX_BUFFER_SIZE};
use crate::traits::{ByteSink, ByteSource, ConfigStore, LinkHandler};
use crate::transport::{Event, Transport};

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// Ready to accept a send
    Idle,
    /// Waiting for the settle, reset or short retry delay
    InitWait,
    /// `AT+CWMODE` issued
    InitMode,
    /// `AT+CWJAP` issued
    InitNetwork,
    /// `AT+CIPMUX` issued
    InitSetMultiplexing,
    /// `AT+CIPSERVER` issued
    InitOpenServer,
    /// Waiting out the long retry delay
    InitLongRetry,
    /// `AT+CIPSEND` issued, waiting for the prompt
    SendInitiated,
    /// Payload streamed, waiting for the modem's verdict
    SendData,
}

impl SessionState {
    /// True while the configuration sequence is running
    pub fn is_initializing(self) -> bool {
        matches!(
            self,
            SessionState::InitWait
                | SessionState::InitMode
                | SessionState::InitNetwork
                | SessionState::InitSetMultiplexing
                | SessionState::InitOpenServer
                | SessionState::InitLongRetry
        )
    }
}

/// A rejected send, handing the lent buffer back
pub struct SendError<B> {
    pub error: LinkError,
    pub buffer: B,
}

impl<B> SendError<B> {
    fn new(error: LinkError, buffer: B) -> Self {
        Self { error, buffer }
    }

    pub fn into_buffer(self) -> B {
        self.buffer
    }
}

impl<B> core::fmt::Debug for SendError<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SendError").field("error", &self.error).finish()
    }
}

impl<B> core::fmt::Display for SendError<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.error, f)
    }
}

struct Outbound<B> {
    buffer: B,
    channel: u8,
    /// Channels a broadcast still has to visit
    remaining: u8,
}

/// Link session bound to a [`SharedSerial`]
///
/// `B` is the payload buffer type. A buffer passed to [`Session::send`] is
/// owned by the session until [`LinkHandler::on_send_complete`] returns it.
pub struct Session<'a, T, S, H, B, const N: usize = RX_BUFFER_SIZE> {
    transport: Transport<'a, N>,
    sink: T,
    store: S,
    handler: H,
    settings: LinkSettings,
    state: SessionState,
    remaining_ticks: u32,
    retries: u8,
    outbound: Option<Outbound<B>>,
    /// Bit `n` set while a client is connected on channel `n`
    connections: u8,
    command: String<COMMAND_BUFFER_SIZE>,
}

impl<'a, T, S, H, B, const N: usize> Session<'a, T, S, H, B, N>
where
    T: ByteSink,
    S: ConfigStore,
    H: LinkHandler<B>,
    B: AsRef<[u8]>,
{
    /// Create the session and arm the power-up settle delay.
    ///
    /// Must be constructed once, before the first `poll_tick` or
    /// `timed_tick`.
    pub fn new(serial: &'a SharedSerial<N>, sink: T, store: S, handler: H, settings: LinkSettings) -> Self {
        let mut transport = Transport::new(serial);
        transport.reset();

        let remaining_ticks = settings.timing.ticks(settings.timing.settle_ms);
        let retries = settings.timing.short_retries;
        debug!("session created, settling for {} ticks", remaining_ticks);

        Self {
            transport,
            sink,
            store,
            handler,
            settings,
            state: SessionState::InitWait,
            remaining_ticks,
            retries,
            outbound: None,
            connections: 0,
            command: String::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    /// Bit mask of channels with a connected client
    pub fn connections(&self) -> u8 {
        self.connections
    }

    /// Ticks left before the pending timed transition
    pub fn remaining_ticks(&self) -> u32 {
        self.remaining_ticks
    }

    /// Short retries left before the long retry delay
    pub fn retries_left(&self) -> u8 {
        self.retries
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn sink_mut(&mut self) -> &mut T {
        &mut self.sink
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drain every received byte, dispatching events to the handler.
    ///
    /// Never blocks; returns once the receive buffer is empty.
    pub fn poll_tick(&mut self) {
        loop {
            match self.transport.next_event() {
                None => break,
                Some(Event::Message {
                    status,
                    channel,
                    payload,
                }) => {
                    trace!("message on channel {} ({} bytes)", channel, payload.len());
                    self.handler.on_message(status, channel, &payload);
                }
                Some(Event::Status(status)) => self.on_status(status),
                Some(Event::Link { channel, open }) => self.on_link(channel, open),
            }
        }
    }

    /// Advance the delay timer; call at `tick_period_ms`
    pub fn timed_tick(&mut self) {
        if self.remaining_ticks > 0 {
            self.remaining_ticks -= 1;
            return;
        }

        if matches!(self.state, SessionState::InitWait | SessionState::InitLongRetry) {
            if self.store.read_configured() {
                self.enter(SessionState::InitSetMultiplexing);
                self.issue_init(Command::EnableMultiplexing);
            } else {
                self.enter(SessionState::InitMode);
                self.issue_init(Command::StationMode);
            }
        }
    }

    /// Send `buffer` to the client on `channel`.
    ///
    /// Returns once the command is issued; the payload follows after the
    /// modem's prompt and the outcome arrives through
    /// [`LinkHandler::on_send_complete`].
    pub fn send(&mut self, channel: u8, buffer: B) -> Result<(), SendError<B>> {
        if channel >= MAX_CHANNELS {
            return Err(SendError::new(LinkError::InvalidChannel, buffer));
        }
        if let Err(error) = self.check_send(&buffer) {
            return Err(SendError::new(error, buffer));
        }
        self.start_send(Outbound {
            buffer,
            channel,
            remaining: 0,
        })
    }

    /// Send `buffer` to every connected client, lowest channel first.
    ///
    /// The first failing channel ends the broadcast and its status is the one
    /// reported.
    pub fn send_to_all(&mut self, buffer: B) -> Result<(), SendError<B>> {
        if let Err(error) = self.check_send(&buffer) {
            return Err(SendError::new(error, buffer));
        }
        let Some(channel) = lowest_channel(self.connections) else {
            return Err(SendError::new(LinkError::NotConnected, buffer));
        };
        self.start_send(Outbound {
            buffer,
            channel,
            remaining: self.connections & !(1 << channel),
        })
    }

    fn check_send(&self, buffer: &B) -> Result<(), LinkError> {
        if self.state != SessionState::Idle {
            return Err(LinkError::InvalidState);
        }
        let len = buffer.as_ref().len();
        if len == 0 || len > TX_BUFFER_SIZE {
            return Err(LinkError::InvalidLength);
        }
        Ok(())
    }

    fn start_send(&mut self, outbound: Outbound<B>) -> Result<(), SendError<B>> {
        let command = Command::Send {
            channel: outbound.channel,
            length: outbound.buffer.as_ref().len(),
        };
        if let Err(error) = self.issue(command) {
            return Err(SendError::new(error, outbound.buffer));
        }
        self.outbound = Some(outbound);
        self.enter(SessionState::SendInitiated);
        Ok(())
    }

    fn on_status(&mut self, status: Status) {
        match self.state {
            SessionState::Idle | SessionState::InitWait | SessionState::InitLongRetry => {
                trace!("ignoring {:?} in {:?}", status, self.state);
            }

            SessionState::InitMode => self.init_step(status, SessionState::InitNetwork, Command::JoinNetwork),

            SessionState::InitNetwork => {
                if !status.is_ok() {
                    return self.init_error(status);
                }
                self.store.write_configured(true);
                info!("network joined, configuration persisted");
                self.remaining_ticks = self.settings.timing.ticks(self.settings.timing.reset_ms);
                self.enter(SessionState::InitWait);
                self.issue_init(Command::Reset);
            }

            SessionState::InitSetMultiplexing => {
                self.init_step(status, SessionState::InitOpenServer, Command::OpenServer)
            }

            SessionState::InitOpenServer => {
                if !status.is_ok() {
                    return self.init_error(status);
                }
                self.enter(SessionState::Idle);
                info!("server listening on port {}", self.settings.network.port);
            }

            SessionState::SendInitiated => match status {
                Status::InputExpected => self.stream_payload(),
                _ => self.complete_send(status),
            },

            SessionState::SendData => self.on_send_status(status),
        }
    }

    fn init_step(&mut self, status: Status, next: SessionState, command: Command) {
        if !status.is_ok() {
            return self.init_error(status);
        }
        self.enter(next);
        self.issue_init(command);
    }

    fn init_error(&mut self, status: Status) {
        if self.retries > 0 {
            self.retries -= 1;
            self.remaining_ticks = self.settings.timing.ticks(self.settings.timing.retry_ms);
            warn!(
                "{:?} failed with {:?}, {} retries left",
                self.state, status, self.retries
            );
            self.enter(SessionState::InitWait);
        } else {
            self.retries = 1;
            self.remaining_ticks = self.settings.timing.ticks(self.settings.timing.long_retry_ms);
            warn!(
                "{:?} failed with {:?}, backing off for {} ticks",
                self.state, status, self.remaining_ticks
            );
            self.enter(SessionState::InitLongRetry);
        }
        if let Err(e) = self.issue(Command::Reset) {
            error!("reset command rejected: {}", e);
        }
    }

    fn stream_payload(&mut self) {
        let result = match &self.outbound {
            Some(outbound) => self.transport.transmit(outbound.buffer.as_ref(), &mut self.sink),
            None => Err(LinkError::InvalidState),
        };
        match result {
            Ok(()) => self.enter(SessionState::SendData),
            Err(e) => {
                error!("payload rejected: {}", e);
                self.complete_send(Status::Failure);
            }
        }
    }

    fn on_send_status(&mut self, status: Status) {
        let connections = self.connections;
        let next = match self.outbound.as_mut() {
            Some(outbound) if status == Status::Success => {
                outbound.remaining &= connections;
                lowest_channel(outbound.remaining).map(|channel| {
                    outbound.remaining &= !(1 << channel);
                    outbound.channel = channel;
                    (channel, outbound.buffer.as_ref().len())
                })
            }
            _ => None,
        };

        let Some((channel, length)) = next else {
            return self.complete_send(status);
        };
        debug!("broadcast continues on channel {}", channel);
        match self.issue(Command::Send { channel, length }) {
            Ok(()) => self.enter(SessionState::SendInitiated),
            Err(e) => {
                error!("send command rejected: {}", e);
                self.complete_send(Status::Failure);
            }
        }
    }

    fn complete_send(&mut self, status: Status) {
        self.enter(SessionState::Idle);
        if let Some(outbound) = self.outbound.take() {
            debug!("send on channel {} completed with {:?}", outbound.channel, status);
            self.handler.on_send_complete(status, outbound.buffer);
        }
    }

    fn on_link(&mut self, channel: u8, open: bool) {
        let bit = 1 << channel;
        if open {
            self.connections |= bit;
        } else {
            self.connections &= !bit;
        }
        debug!(
            "channel {} {}",
            channel,
            if open { "connected" } else { "closed" }
        );
        self.handler.on_connection(channel, open);
    }

    /// Issue a configuration command; a command that cannot be composed
    /// counts as a failed step
    fn issue_init(&mut self, command: Command) {
        if let Err(e) = self.issue(command) {
            error!("{:?} rejected: {}", command, e);
            self.init_error(Status::Failure);
        }
    }

    fn issue(&mut self, command: Command) -> Result<(), LinkError> {
        command.encode(&self.settings.network, &mut self.command)?;
        trace!("-> {:?}", command);
        self.transport.transmit(self.command.as_bytes(), &mut self.sink)
    }

    fn enter(&mut self, next: SessionState) {
        if self.state != next {
            debug!("session {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

fn lowest_channel(mask: u8) -> Option<u8> {
    let mask = mask & ((1 << MAX_CHANNELS) - 1);
    (mask != 0).then(|| mask.trailing_zeros() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct NullSink;

    impl ByteSink for NullSink {
        fn start_transmit(&mut self, _first: u8) {}
    }

    #[derive(Default)]
    struct Completions(std::vec::Vec<Status>);

    impl LinkHandler<&'static [u8]> for Completions {
        fn on_message(&mut self, _status: Status, _channel: u8, _payload: &(impl ByteSource + ?Sized)) {}

        fn on_send_complete(&mut self, status: Status, _buffer: &'static [u8]) {
            self.0.push(status);
        }
    }

    type TestSession<'a> = Session<'a, NullSink, MemoryStore, Completions, &'static [u8]>;

    fn session(serial: &SharedSerial, configured: bool) -> TestSession<'_> {
        let settings = LinkSettings {
            network: NetworkConfig::new("Elysion", "secret", 61499).unwrap(),
            ..LinkSettings::default()
        };
        Session::new(serial, NullSink, MemoryStore::new(configured), Completions::default(), settings)
    }

    #[test]
    fn test_lowest_channel() {
        assert_eq!(lowest_channel(0), None);
        assert_eq!(lowest_channel(0b1010), Some(1));
        assert_eq!(lowest_channel(0b1000), Some(3));
        assert_eq!(lowest_channel(0b1_0000), None);
    }

    #[test]
    fn test_initial_state() {
        let serial: SharedSerial = SharedSerial::new();
        let session = session(&serial, false);
        assert_eq!(session.state(), SessionState::InitWait);
        assert!(session.state().is_initializing());
        assert_eq!(session.remaining_ticks(), 6);
        assert_eq!(session.retries_left(), 3);
        assert_eq!(session.connections(), 0);
    }

    #[test]
    fn test_send_rejected_while_initializing() {
        let serial: SharedSerial = SharedSerial::new();
        let mut session = session(&serial, false);

        let err = session.send(0, b"data").unwrap_err();
        assert_eq!(err.error, LinkError::InvalidState);
        assert_eq!(err.into_buffer(), b"data");

        let err = session.send(4, b"data").unwrap_err();
        assert_eq!(err.error, LinkError::InvalidChannel);

        assert_eq!(session.state(), SessionState::InitWait);
        assert!(!serial.is_transmitting());
    }

    #[test]
    fn test_broadcast_needs_client() {
        let serial: SharedSerial = SharedSerial::new();
        let mut session = session(&serial, true);
        session.state = SessionState::Idle;

        let err = session.send_to_all(b"data").unwrap_err();
        assert_eq!(err.error, LinkError::NotConnected);
        assert!(session.is_idle());
    }

    #[test]
    fn test_payload_length_limits() {
        static LARGE: [u8; TX_BUFFER_SIZE + 1] = [0; TX_BUFFER_SIZE + 1];

        let serial: SharedSerial = SharedSerial::new();
        let mut session = session(&serial, true);
        session.state = SessionState::Idle;

        assert_eq!(session.send(0, b"").unwrap_err().error, LinkError::InvalidLength);
        assert_eq!(session.send(0, &LARGE).unwrap_err().error, LinkError::InvalidLength);
        assert!(session.is_idle());
    }
}
