//! # ESP8266 AT Protocol Literals
//!
//! Commands the session sends and the response texts the transport recognizes.
//!
//! ## Wire Grammar (modem → controller)
//!
//! ```text
//! status line     \r\n <text> \r\n
//! data            \r\n +IPD,<channel>,<length>:<payload> \r\n <status> \r\n
//! prompt          >␠
//! link notice     <channel>,CONNECT \r\n     <channel>,CLOSED \r\n
//! ```
//!
//! Response literals are compared case-sensitively and including their length.

use core::fmt::Write;

use heapless::String;

use crate::config::NetworkConfig;
use crate::error::{LinkError, Status};

/// Size of the session's command buffer
pub const COMMAND_BUFFER_SIZE: usize = 128;

/// Number of logical channels (modem link IDs)
pub const MAX_CHANNELS: u8 = 4;

/// Affirmative acknowledgment
pub const STATUS_OK: &[u8] = b"OK";
/// Acknowledgment of a completed data transmission
pub const STATUS_SEND_OK: &[u8] = b"SEND OK";
/// Requested configuration already in place
pub const STATUS_NO_CHANGE: &[u8] = b"no change";
/// Message code of a received data notification
pub const CODE_RECEIVE: &[u8] = b"IPD";
/// Prompt printed before raw payload input
pub const PROMPT: u8 = b'>';

const NOTICE_CONNECT: &[u8] = b"CONNECT";
const NOTICE_CLOSED: &[u8] = b"CLOSED";

/// Progress lines the modem prints between a command and its status
const INFO_PREFIXES: [&[u8]; 2] = [b"Recv ", b"WIFI "];

/// True for lines such as `Recv 5 bytes` that carry no outcome
pub fn is_informational(text: &[u8]) -> bool {
    INFO_PREFIXES.iter().any(|prefix| text.starts_with(prefix))
}

/// Map a status line to a [`Status`]
pub fn classify_status(text: &[u8]) -> Status {
    match text {
        STATUS_OK | STATUS_SEND_OK => Status::Success,
        STATUS_NO_CHANGE => Status::NoChange,
        _ => Status::Failure,
    }
}

/// Parse an unsigned decimal made of ASCII digits.
///
/// The caller only collects digits; overflow wraps and is caught by the
/// range checks applied to the result.
pub fn parse_decimal(digits: &[u8]) -> usize {
    digits.iter().fold(0usize, |acc, &d| {
        acc.wrapping_mul(10).wrapping_add(d.wrapping_sub(b'0') as usize)
    })
}

/// Parse `<channel>,CONNECT` or `<channel>,CLOSED`
pub fn parse_link_notice(text: &[u8]) -> Option<(u8, bool)> {
    let comma = text.iter().position(|&b| b == b',')?;
    let (digits, rest) = (&text[..comma], &text[comma + 1..]);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let channel = parse_decimal(digits);
    if channel >= MAX_CHANNELS as usize {
        return None;
    }
    let open = match rest {
        NOTICE_CONNECT => true,
        NOTICE_CLOSED => false,
        _ => return None,
    };
    Some((channel as u8, open))
}

/// Commands issued by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// `AT+CWMODE=1`, station mode
    StationMode,
    /// `AT+CWJAP="<ssid>","<password>"`
    JoinNetwork,
    /// `AT+RST`
    Reset,
    /// `AT+CIPMUX=1`, multiple connections
    EnableMultiplexing,
    /// `AT+CIPSERVER=1,<port>`
    OpenServer,
    /// `AT+CIPSEND=<channel>,<length>`
    Send { channel: u8, length: usize },
}

impl Command {
    /// Compose the command including its line terminator into `out`
    pub fn encode(
        &self,
        network: &NetworkConfig,
        out: &mut String<COMMAND_BUFFER_SIZE>,
    ) -> Result<(), LinkError> {
        out.clear();
        self.write(network, out).map_err(|_| LinkError::CommandTooLong)
    }

    fn write(&self, network: &NetworkConfig, out: &mut String<COMMAND_BUFFER_SIZE>) -> core::fmt::Result {
        match *self {
            Command::StationMode => out.write_str("AT+CWMODE=1\r\n"),
            Command::JoinNetwork => {
                out.write_str("AT+CWJAP=\"")?;
                write_escaped(out, &network.ssid)?;
                out.write_str("\",\"")?;
                write_escaped(out, &network.password)?;
                out.write_str("\"\r\n")
            }
            Command::Reset => out.write_str("AT+RST\r\n"),
            Command::EnableMultiplexing => out.write_str("AT+CIPMUX=1\r\n"),
            Command::OpenServer => write!(out, "AT+CIPSERVER=1,{}\r\n", network.port),
            // The modem treats anything after a lone \r as payload
            Command::Send { channel, length } => write!(out, "AT+CIPSEND={},{}\r", channel, length),
        }
    }
}

fn write_escaped(out: &mut String<COMMAND_BUFFER_SIZE>, value: &str) -> core::fmt::Result {
    for c in value.chars() {
        if matches!(c, '"' | ',' | '\\') {
            out.write_char('\\')?;
        }
        out.write_char(c)?;
    }
    Ok(())
}
