//! # AT Response Stream Decoder
//!
//! Byte-at-a-time state machine that turns the modem's output into
//! [`Event`]s. Every step consumes exactly one byte, so draining the receive
//! buffer always terminates. Any unexpected byte sends the decoder to
//! `ErrorSkip`, which resynchronizes on the next `\n`; malformed input is
//! discarded, never reported.
//!
//! ## State Machine
//!
//! ```text
//!            \r            \n                 text \r
//!  Idle ─────────► NewlineSync ──► StatusMessage ─────────► Status
//!   │ +                                  │ +
//!   ▼                                    ▼
//!  BeginMessage ──"IPD,"──► ReadChannel ──,──► ReadLength ──:──► DataIn
//!                                                                  │ <length> bytes
//!                                                                  ▼
//!        Message ◄── \r ── ReadFinalStatus ◄── \n ── ReadTrailingNewline
//!
//!  Idle ──>──► CommandPrompt ──␠──► InputExpected, back to Idle
//!  Idle ──digit──► LinkNotice ──\r──► Link
//! ```
//!
//! Tokens (status text, channel and length digits) are copied into a small
//! scratch buffer and their bytes released immediately. Only the payload of a
//! data notification stays reserved in the ring buffer until the consumer has
//! seen it.

use heapless::Vec;

use crate::buffer::RX_BUFFER_SIZE;
use crate::error::{LinkError, Status};
use crate::protocol::{self, CODE_RECEIVE, MAX_CHANNELS, PROMPT};
use crate::serial::SharedSerial;
use crate::traits::{ByteSink, ByteSource};

/// Bytes kept free in the ring buffer beyond a message payload
pub const LENGTH_HEADROOM: usize = 10;

/// Longest status text, message code or number the decoder collects
pub const MAX_TOKEN_LEN: usize = 32;

/// Decoder states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeState {
    /// Between lines
    #[default]
    Idle,
    /// Discarding input until the next `\n`
    ErrorSkip,
    /// Saw `\r`, expecting `\n`
    NewlineSync,
    /// Collecting a status line
    StatusMessage,
    /// Collecting the code after `+`
    BeginMessage,
    /// Collecting the channel of `+IPD`
    ReadChannel,
    /// Collecting the payload length of `+IPD`
    ReadLength,
    /// Reserving payload bytes
    DataIn,
    /// Payload done, waiting for the end of its line
    ReadTrailingNewline,
    /// Collecting the status that closes a data notification
    ReadFinalStatus,
    /// Saw `>`, expecting a space
    CommandPrompt,
    /// Collecting `<channel>,CONNECT` / `<channel>,CLOSED`
    LinkNotice,
}

/// Received payload of a data notification, read in place from the ring buffer
pub struct Payload<'t, const N: usize> {
    serial: &'t SharedSerial<N>,
    start: usize,
    len: usize,
}

impl<'t, const N: usize> Payload<'t, N> {
    /// Absolute ring buffer index of the first payload byte
    pub fn start(&self) -> usize {
        self.start
    }
}

impl<'t, const N: usize> ByteSource for Payload<'t, N> {
    fn len(&self) -> usize {
        self.len
    }

    fn byte_at(&self, index: usize) -> Option<u8> {
        (index < self.len).then(|| self.serial.byte_at(self.start, index))
    }

    fn copy_to(&self, out: &mut [u8]) -> usize {
        self.serial.copy_region(self.start, self.len, out)
    }
}

impl<'t, const N: usize> core::fmt::Debug for Payload<'t, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Payload")
            .field("start", &self.start)
            .field("len", &self.len)
            .finish()
    }
}

/// Decoded unit of modem output
#[derive(Debug)]
pub enum Event<'t, const N: usize> {
    /// A status line or the input prompt
    Status(Status),
    /// A `+IPD` data notification
    Message {
        status: Status,
        channel: u8,
        payload: Payload<'t, N>,
    },
    /// A client connected (`open`) or disconnected on `channel`
    Link { channel: u8, open: bool },
}

enum Step {
    Continue,
    Status(Status),
    Message(Status),
    Link(u8, bool),
}

/// Foreground half of the serial link
pub struct Transport<'a, const N: usize = RX_BUFFER_SIZE> {
    serial: &'a SharedSerial<N>,
    state: DecodeState,
    channel: u8,
    size: usize,
    token: Vec<u8, MAX_TOKEN_LEN>,
    /// The pending link notice started in status position
    notice_in_status: bool,
    /// The last event lent out a payload that is freed on the next call
    release_pending: bool,
}

impl<'a, const N: usize> Transport<'a, N> {
    pub fn new(serial: &'a SharedSerial<N>) -> Self {
        Self {
            serial,
            state: DecodeState::Idle,
            channel: 0,
            size: 0,
            token: Vec::new(),
            notice_in_status: false,
            release_pending: false,
        }
    }

    /// Return to `Idle` and free anything the decoder still holds
    pub fn reset(&mut self) {
        self.state = DecodeState::Idle;
        self.channel = 0;
        self.size = 0;
        self.token.clear();
        self.notice_in_status = false;
        self.release_pending = false;
        self.serial.release();
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn serial(&self) -> &'a SharedSerial<N> {
        self.serial
    }

    /// Start sending `bytes`; the TX interrupt streams everything after the
    /// first byte
    pub fn transmit(&mut self, bytes: &[u8], sink: &mut impl ByteSink) -> Result<(), LinkError> {
        let first = self.serial.begin_transmit(bytes)?;
        sink.start_transmit(first);
        Ok(())
    }

    /// Decode buffered bytes until an event is complete or the buffer is empty.
    ///
    /// A message payload stays reserved until the next call.
    pub fn next_event(&mut self) -> Option<Event<'_, N>> {
        if self.release_pending {
            self.serial.release();
            self.release_pending = false;
        }

        loop {
            let byte = self.serial.peek()?;
            match self.step(byte) {
                Step::Continue => {}
                Step::Status(status) => return Some(Event::Status(status)),
                Step::Link(channel, open) => return Some(Event::Link { channel, open }),
                Step::Message(status) => {
                    self.release_pending = true;
                    return Some(Event::Message {
                        status,
                        channel: self.channel,
                        payload: Payload {
                            serial: self.serial,
                            start: self.serial.first(),
                            len: self.size,
                        },
                    });
                }
            }
        }
    }

    fn step(&mut self, byte: u8) -> Step {
        use DecodeState::*;

        match self.state {
            Idle => {
                self.state = match byte {
                    b'\r' => NewlineSync,
                    b'\n' => Idle,
                    PROMPT => CommandPrompt,
                    b'+' => self.start_token(BeginMessage),
                    b'0'..=b'9' => {
                        self.token.clear();
                        let _ = self.token.push(byte);
                        self.notice_in_status = false;
                        LinkNotice
                    }
                    _ => ErrorSkip,
                };
                self.serial.consume();
                Step::Continue
            }

            ErrorSkip => {
                if byte == b'\n' {
                    self.state = Idle;
                }
                self.serial.consume();
                Step::Continue
            }

            NewlineSync => {
                match byte {
                    b'\n' => self.state = self.start_token(StatusMessage),
                    b'\r' => {}
                    _ => return self.resync(byte),
                }
                self.serial.consume();
                Step::Continue
            }

            StatusMessage => {
                let empty = self.token.is_empty();
                let step = match byte {
                    b'\r' if empty => {
                        self.state = NewlineSync;
                        Step::Continue
                    }
                    b'\r' if protocol::is_informational(&self.token) => {
                        self.state = ErrorSkip;
                        Step::Continue
                    }
                    b'\r' => {
                        self.state = ErrorSkip;
                        Step::Status(protocol::classify_status(&self.token))
                    }
                    b'\n' if empty => Step::Continue,
                    b'+' if empty => {
                        self.state = BeginMessage;
                        Step::Continue
                    }
                    PROMPT if empty => {
                        self.state = CommandPrompt;
                        Step::Continue
                    }
                    b'0'..=b'9' if empty => {
                        let _ = self.token.push(byte);
                        self.notice_in_status = true;
                        self.state = LinkNotice;
                        Step::Continue
                    }
                    _ => {
                        if self.token.push(byte).is_err() {
                            return self.resync(byte);
                        }
                        Step::Continue
                    }
                };
                self.serial.consume();
                step
            }

            BeginMessage => {
                match byte {
                    b',' if self.token.as_slice() == CODE_RECEIVE => {
                        self.state = self.start_token(ReadChannel);
                    }
                    b',' | b':' | b'\r' | b'\n' => return self.resync(byte),
                    _ => {
                        if self.token.push(byte).is_err() {
                            return self.resync(byte);
                        }
                    }
                }
                self.serial.consume();
                Step::Continue
            }

            ReadChannel => {
                match byte {
                    b',' => {
                        let channel = protocol::parse_decimal(&self.token);
                        if channel >= MAX_CHANNELS as usize {
                            return self.resync(byte);
                        }
                        self.channel = channel as u8;
                        self.state = self.start_token(ReadLength);
                    }
                    b'0'..=b'9' => {
                        if self.token.push(byte).is_err() {
                            return self.resync(byte);
                        }
                    }
                    _ => return self.resync(byte),
                }
                self.serial.consume();
                Step::Continue
            }

            ReadLength => {
                match byte {
                    b':' => {
                        let size = protocol::parse_decimal(&self.token);
                        if size >= N.saturating_sub(LENGTH_HEADROOM) {
                            return self.resync(byte);
                        }
                        self.size = size;
                        self.state = DataIn;
                    }
                    b'0'..=b'9' => {
                        if self.token.push(byte).is_err() {
                            return self.resync(byte);
                        }
                    }
                    _ => return self.resync(byte),
                }
                // Releases the header, the payload starts at `first`
                self.serial.consume();
                Step::Continue
            }

            DataIn => {
                if self.serial.held_len() < self.size {
                    return self.hold(byte);
                }
                match byte {
                    b'\r' => self.hold(byte),
                    b'\n' => {
                        self.state = ReadTrailingNewline;
                        self.token.clear();
                        self.hold(byte)
                    }
                    _ => self.resync(byte),
                }
            }

            ReadTrailingNewline => match byte {
                b'\r' => self.hold(byte),
                b'\n' => {
                    self.state = ReadFinalStatus;
                    self.hold(byte)
                }
                _ => {
                    // Status directly on the line after the payload
                    self.state = ReadFinalStatus;
                    let _ = self.token.push(byte);
                    self.hold(byte)
                }
            },

            ReadFinalStatus => match byte {
                b'\r' | b'\n' if self.token.is_empty() => self.hold(byte),
                b'\r' => {
                    self.serial.hold();
                    self.state = ErrorSkip;
                    Step::Message(protocol::classify_status(&self.token))
                }
                _ => {
                    if self.token.push(byte).is_err() {
                        return self.resync(byte);
                    }
                    self.hold(byte)
                }
            },

            CommandPrompt => {
                if byte != b' ' {
                    return self.resync(byte);
                }
                // The prompt has no line terminator, the verdict follows directly
                self.state = Idle;
                self.serial.consume();
                Step::Status(Status::InputExpected)
            }

            LinkNotice => {
                if byte == b'\r' {
                    self.state = ErrorSkip;
                    self.serial.consume();
                    return match protocol::parse_link_notice(&self.token) {
                        Some((channel, open)) => Step::Link(channel, open),
                        None if self.notice_in_status => Step::Status(Status::Failure),
                        None => Step::Continue,
                    };
                }
                if self.token.push(byte).is_err() {
                    return self.resync(byte);
                }
                self.serial.consume();
                Step::Continue
            }
        }
    }

    fn start_token(&mut self, next: DecodeState) -> DecodeState {
        self.token.clear();
        next
    }

    /// Keep the current byte reserved. Gives up on the notification if the
    /// reserved region would exhaust the ring buffer.
    fn hold(&mut self, byte: u8) -> Step {
        if self.serial.held_len() + 1 >= N {
            return self.resync(byte);
        }
        self.serial.hold();
        Step::Continue
    }

    /// Drop everything reserved and skip to the end of the line
    fn resync(&mut self, byte: u8) -> Step {
        self.state = if byte == b'\n' {
            DecodeState::Idle
        } else {
            DecodeState::ErrorSkip
        };
        self.token.clear();
        self.serial.consume();
        Step::Continue
    }
}
