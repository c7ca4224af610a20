//! # Interrupt-Shared Serial State
//!
//! Everything that both concurrency domains touch lives in [`SharedSerial`]:
//! the receive ring buffer, the outbound byte stream and the echo cursor.
//! Each method takes the critical section for a handful of instructions only;
//! decoding happens outside of it.
//!
//! ## Domains
//!
//! ```text
//!  RX interrupt ──► on_receive() ──► echo check ──► RingBuffer
//!  TX interrupt ◄── on_tx_ready() ◄── outbound stream
//!
//!  poll_tick ──► peek / hold / consume / release   (Transport)
//!  send      ──► begin_transmit                    (Session)
//! ```
//!
//! A typical firmware wires it up like this:
//!
//! ```ignore
//! static SERIAL: SharedSerial = SharedSerial::new();
//!
//! #[interrupt]
//! fn USART_RX() {
//!     SERIAL.on_receive(uart.read_data());
//! }
//!
//! #[interrupt]
//! fn USART_UDRE() {
//!     match SERIAL.on_tx_ready() {
//!         Some(byte) => uart.write_data(byte),
//!         None => uart.disable_udre_interrupt(),
//!     }
//! }
//! ```

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;

use crate::buffer::{RingBuffer, RX_BUFFER_SIZE};
use crate::error::LinkError;

/// Capacity of the outbound stream (largest command or payload)
pub const TX_BUFFER_SIZE: usize = 256;

struct Inner<const N: usize> {
    ring: RingBuffer<N>,
    /// Bytes of the transmission in progress
    tx: Vec<u8, TX_BUFFER_SIZE>,
    /// Next byte of `tx` the TX interrupt will write
    tx_index: usize,
    /// Next byte of `tx` expected back as echo; `>= tx.len()` means none
    next_echo: usize,
    dropped: u32,
    echoed: u32,
}

/// Serial state shared between the UART interrupts and the polled task
pub struct SharedSerial<const N: usize = RX_BUFFER_SIZE> {
    inner: Mutex<RefCell<Inner<N>>>,
}

impl<const N: usize> SharedSerial<N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                ring: RingBuffer::new(),
                tx: Vec::new(),
                tx_index: 0,
                next_echo: 0,
                dropped: 0,
                echoed: 0,
            })),
        }
    }

    #[inline]
    fn with<R>(&self, f: impl FnOnce(&mut Inner<N>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    // ---------------------------------------------------------------------
    // Interrupt domain
    // ---------------------------------------------------------------------

    /// Handle one received byte.
    ///
    /// A byte matching the expected echo of the last transmission is swallowed.
    /// Everything else is appended to the ring buffer, or dropped if the buffer
    /// is full. Returns `true` if the byte was stored.
    pub fn on_receive(&self, byte: u8) -> bool {
        self.with(|inner| {
            if inner.next_echo < inner.tx.len() && inner.tx[inner.next_echo] == byte {
                inner.next_echo += 1;
                inner.echoed = inner.echoed.wrapping_add(1);
                return false;
            }
            match inner.ring.push(byte) {
                Ok(()) => true,
                Err(_) => {
                    inner.dropped = inner.dropped.wrapping_add(1);
                    false
                }
            }
        })
    }

    /// Next byte to write from the "data register empty" interrupt.
    ///
    /// `None` means the transmission is complete and the interrupt should be
    /// disabled.
    pub fn on_tx_ready(&self) -> Option<u8> {
        self.with(|inner| {
            let byte = inner.tx.get(inner.tx_index).copied()?;
            inner.tx_index += 1;
            Some(byte)
        })
    }

    // ---------------------------------------------------------------------
    // Foreground domain
    // ---------------------------------------------------------------------

    /// Load a new transmission and return its first byte.
    ///
    /// The caller writes the returned byte to the data register immediately and
    /// then arms the TX interrupt. Echo tracking restarts at the first byte.
    pub fn begin_transmit(&self, bytes: &[u8]) -> Result<u8, LinkError> {
        let (&first, _) = bytes.split_first().ok_or(LinkError::InvalidLength)?;
        let tx = Vec::from_slice(bytes).map_err(|_| LinkError::InvalidLength)?;
        self.with(|inner| {
            inner.tx = tx;
            inner.tx_index = 1;
            inner.next_echo = 0;
        });
        Ok(first)
    }

    /// True while bytes of the current transmission are still queued
    pub fn is_transmitting(&self) -> bool {
        self.with(|inner| inner.tx_index < inner.tx.len())
    }

    /// Next byte awaiting decoding
    pub(crate) fn peek(&self) -> Option<u8> {
        self.with(|inner| inner.ring.peek(0))
    }

    /// Mark the current byte as decoded but keep it reserved
    pub(crate) fn hold(&self) {
        self.with(|inner| {
            let _ = inner.ring.advance();
        });
    }

    /// Mark the current byte as decoded and free everything decoded so far
    pub(crate) fn consume(&self) {
        self.with(|inner| {
            let _ = inner.ring.advance();
            inner.ring.release();
        });
    }

    /// Free everything decoded so far
    pub(crate) fn release(&self) {
        self.with(|inner| {
            inner.ring.release();
        });
    }

    /// Absolute index of the oldest reserved byte
    pub(crate) fn first(&self) -> usize {
        self.with(|inner| inner.ring.first())
    }

    /// Bytes decoded but not yet released
    pub(crate) fn held_len(&self) -> usize {
        self.with(|inner| inner.ring.held_len())
    }

    /// Byte `offset` positions after the absolute index `start`
    pub(crate) fn byte_at(&self, start: usize, offset: usize) -> u8 {
        self.with(|inner| inner.ring.get(start.wrapping_add(offset)))
    }

    /// Copy a reserved region into `out`, returning the copied length
    pub(crate) fn copy_region(&self, start: usize, len: usize, out: &mut [u8]) -> usize {
        let len = len.min(out.len());
        self.with(|inner| {
            let region = inner.ring.region(start, len);
            for (slot, byte) in out.iter_mut().zip(region.iter()) {
                *slot = *byte;
            }
        });
        len
    }

    /// Bytes still waiting for the decoder
    pub fn pending(&self) -> usize {
        self.with(|inner| inner.ring.unprocessed_len())
    }

    /// Free slots in the ring buffer
    pub fn space(&self) -> usize {
        self.with(|inner| N - inner.ring.len())
    }

    /// Received bytes lost because the ring buffer was full
    pub fn dropped(&self) -> u32 {
        self.with(|inner| inner.dropped)
    }

    /// Received bytes suppressed as echo of our own transmission
    pub fn echoed(&self) -> u32 {
        self.with(|inner| inner.echoed)
    }
}

impl<const N: usize> Default for SharedSerial<N> {
    fn default() -> Self {
        Self::new()
    }
}
