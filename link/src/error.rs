//! Status codes reported by the modem and errors returned by the link API.

use core::fmt;

/// Outcome of a modem exchange, delivered through [`crate::LinkHandler`].
///
/// Only [`Status::Success`] corresponds to a fully successful operation.
/// [`Status::NoChange`] is a negative acknowledgment meaning the requested
/// configuration already holds, and [`Status::InputExpected`] is a control
/// signal, not a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// Affirmative acknowledgment (`OK`, `SEND OK`)
    Success,
    /// The modem reported `no change`
    NoChange,
    /// The modem printed its input prompt and waits for raw payload bytes
    InputExpected,
    /// Any other status line (`ERROR`, `FAIL`, unknown text)
    Failure,
}

impl Status {
    /// True for statuses the initialization sequence accepts as done
    #[inline]
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Success | Status::NoChange)
    }
}

/// Errors returned synchronously by the session API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// Channel outside `0..=3`
    InvalidChannel,
    /// The session is initializing or another send is outstanding
    InvalidState,
    /// Empty buffer, or a buffer larger than the outbound stream
    InvalidLength,
    /// Broadcast requested while no client is connected
    NotConnected,
    /// A composed AT command did not fit into the command buffer
    CommandTooLong,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            LinkError::InvalidChannel => "channel out of range",
            LinkError::InvalidState => "session is busy or not initialized",
            LinkError::InvalidLength => "invalid payload length",
            LinkError::NotConnected => "no client connected",
            LinkError::CommandTooLong => "command exceeds buffer",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LinkError {}

/// Errors of the IEC 61499 value codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// The encoder ran past the end of its buffer
    BufferTooSmall,
    /// The frame ended inside a value
    Truncated,
    /// The next value carries a different type tag
    UnexpectedTag,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            CodecError::BufferTooSmall => "frame buffer too small",
            CodecError::Truncated => "frame truncated",
            CodecError::UnexpectedTag => "unexpected type tag",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CodecError {}
