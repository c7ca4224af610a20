//! # Platform & Application Seams
//!
//! The link core never touches hardware or application state directly. The
//! platform layer supplies the output register and the persisted flag, the
//! application supplies a [`LinkHandler`]:
//!
//! - **ByteSink**: starts an interrupt-driven transmission
//! - **ConfigStore**: one durable boolean surviving power loss
//! - **LinkHandler**: receives messages, send completions and connection changes
//! - **ByteSource**: read-only random access to received payload bytes
//!
//! Handler methods run synchronously inside [`crate::Session::poll_tick`],
//! never in the interrupt domain.

use crate::error::Status;

/// Output side of the UART
///
/// The session copies each outbound buffer into
/// [`crate::serial::SharedSerial`] and hands over the first byte. The
/// implementation writes it to the data register and arms the
/// "data register empty" interrupt, whose handler streams the rest through
/// [`crate::serial::SharedSerial::on_tx_ready`].
pub trait ByteSink {
    /// Write the first byte of a new transmission and arm the interrupt
    fn start_transmit(&mut self, first: u8);
}

/// Durable storage for the "chip already configured" flag
pub trait ConfigStore {
    /// Read the flag, `false` if never written
    fn read_configured(&self) -> bool;

    /// Persist the flag
    fn write_configured(&mut self, configured: bool);
}

/// Random access to a received byte sequence
///
/// Implemented for plain slices and for [`crate::transport::Payload`], which
/// reads straight out of the receive ring buffer.
pub trait ByteSource {
    /// Number of bytes available
    fn len(&self) -> usize;

    /// Byte at `index`, `None` past the end
    fn byte_at(&self, index: usize) -> Option<u8>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy as many bytes as fit into `out`, returning the count
    fn copy_to(&self, out: &mut [u8]) -> usize {
        let len = self.len().min(out.len());
        for (i, slot) in out[..len].iter_mut().enumerate() {
            *slot = self.byte_at(i).unwrap_or(0);
        }
        len
    }
}

impl ByteSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn byte_at(&self, index: usize) -> Option<u8> {
        self.get(index).copied()
    }

    fn copy_to(&self, out: &mut [u8]) -> usize {
        let len = <[u8]>::len(self).min(out.len());
        out[..len].copy_from_slice(&self[..len]);
        len
    }
}

/// Application side of the link
///
/// `B` is the payload buffer type lent to [`crate::Session::send`]; it is
/// handed back once the modem has answered.
///
/// Callbacks run inside [`crate::Session::poll_tick`] while the session is
/// mutably borrowed, so they cannot call `send` or `send_to_all`. Record the
/// follow-up work in the handler and start it after `poll_tick` returns,
/// reaching the handler through [`crate::Session::handler_mut`].
pub trait LinkHandler<B> {
    /// A `+IPD` notification was decoded.
    ///
    /// `payload` reads directly from the receive buffer and is only valid for
    /// the duration of the call; copy out whatever must be kept.
    fn on_message(&mut self, status: Status, channel: u8, payload: &(impl ByteSource + ?Sized));

    /// The outstanding send finished with `status`
    fn on_send_complete(&mut self, status: Status, buffer: B);

    /// A client connected to or disconnected from `channel`
    fn on_connection(&mut self, channel: u8, open: bool) {
        let _ = (channel, open);
    }
}
