//! # Receive Ring Buffer
//!
//! Fixed-capacity circular byte store filled by the UART receive interrupt and
//! drained by the polled decoder.
//!
//! ## Memory Layout
//!
//! ```text
//! ┌──────────┬──────────────────────┬─────────────────────┬──────────┐
//! │   free   │  held (processed,    │  unprocessed        │   free   │
//! │          │  not yet released)   │  (new input)        │          │
//! └──────────┴──────────────────────┴─────────────────────┴──────────┘
//!            ▲                      ▲                     ▲
//!          first            first_unprocessed    first + allocation
//! ```
//!
//! The producer only ever writes at `first + allocation`. The consumer moves
//! `first_unprocessed` forward and occasionally collapses the held region with
//! [`RingBuffer::release`]. Only `release` touches a cursor the producer also
//! reads, so it is the one operation that must run inside a critical section
//! (see [`crate::serial::SharedSerial`]).

/// Capacity of the receive buffer used by the firmware build
pub const RX_BUFFER_SIZE: usize = 128;

/// A view into the buffer that may wrap around the end of the storage
#[derive(Debug)]
pub struct BufferSlice<'a> {
    /// First contiguous chunk (before wrap-around)
    pub first: &'a [u8],
    /// Second contiguous chunk (after wrap-around, may be empty)
    pub second: &'a [u8],
}

impl<'a> BufferSlice<'a> {
    /// Total length across both chunks
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    /// Check if the slice is empty
    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.second.is_empty()
    }

    /// Iterate over the bytes of both chunks in order
    pub fn iter(&self) -> impl Iterator<Item = &'a u8> {
        self.first.iter().chain(self.second.iter())
    }
}

/// Errors specific to buffer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// The buffer is fully allocated, the byte was dropped
    Overflow,
    /// No unprocessed byte is left
    Underflow,
}

/// Circular receive buffer with a freed cursor, an unprocessed cursor and an
/// allocation count.
///
/// `N` must be a power of two so that index arithmetic reduces to a mask.
pub struct RingBuffer<const N: usize> {
    data: [u8; N],
    /// Index of the oldest byte still reserved
    first: usize,
    /// Distance from `first` to the oldest byte not yet decoded
    processed: usize,
    /// Bytes written by the producer and not yet released
    allocation: usize,
}

impl<const N: usize> RingBuffer<N> {
    const MASK: usize = {
        assert!(N.is_power_of_two(), "ring buffer capacity must be a power of two");
        N - 1
    };

    /// Create an empty buffer
    pub const fn new() -> Self {
        let _ = Self::MASK;
        Self {
            data: [0u8; N],
            first: 0,
            processed: 0,
            allocation: 0,
        }
    }

    /// Total capacity in bytes
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes currently reserved (held plus unprocessed)
    #[inline]
    pub fn len(&self) -> usize {
        self.allocation
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocation == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.allocation == N
    }

    /// Bytes already decoded but not yet released
    #[inline]
    pub fn held_len(&self) -> usize {
        self.processed
    }

    /// Bytes appended by the producer that the decoder has not looked at yet
    #[inline]
    pub fn unprocessed_len(&self) -> usize {
        self.allocation - self.processed
    }

    /// Absolute index of the oldest reserved byte
    #[inline]
    pub fn first(&self) -> usize {
        self.first
    }

    /// Absolute index of the oldest byte not yet decoded
    #[inline]
    pub fn first_unprocessed(&self) -> usize {
        (self.first + self.processed) & Self::MASK
    }

    /// Append a received byte.
    ///
    /// Never blocks and never touches reserved data: if the buffer is full
    /// the new byte is dropped and `Overflow` is returned.
    pub fn push(&mut self, byte: u8) -> Result<(), BufferError> {
        if self.allocation == N {
            return Err(BufferError::Overflow);
        }
        let index = (self.first + self.allocation) & Self::MASK;
        self.data[index] = byte;
        self.allocation += 1;
        Ok(())
    }

    /// Look at the unprocessed byte `offset` positions past `first_unprocessed`
    pub fn peek(&self, offset: usize) -> Option<u8> {
        if offset >= self.unprocessed_len() {
            return None;
        }
        Some(self.data[(self.first_unprocessed() + offset) & Self::MASK])
    }

    /// Mark the next unprocessed byte as decoded without freeing it
    pub fn advance(&mut self) -> Result<(), BufferError> {
        if self.unprocessed_len() == 0 {
            return Err(BufferError::Underflow);
        }
        self.processed += 1;
        Ok(())
    }

    /// Free every decoded byte and return how many were released
    pub fn release(&mut self) -> usize {
        let freed = self.processed;
        self.first = (self.first + freed) & Self::MASK;
        self.allocation -= freed;
        self.processed = 0;
        freed
    }

    /// Read the byte at an absolute index (taken modulo the capacity)
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        self.data[index & Self::MASK]
    }

    /// Borrow `len` bytes starting at an absolute index, split at the wrap point
    pub fn region(&self, start: usize, len: usize) -> BufferSlice<'_> {
        let start = start & Self::MASK;
        let len = len.min(N);
        let end = start + len;

        if end <= N {
            BufferSlice {
                first: &self.data[start..end],
                second: &[],
            }
        } else {
            BufferSlice {
                first: &self.data[start..N],
                second: &self.data[..end - N],
            }
        }
    }

    /// Drop all content and rewind the cursors
    pub fn reset(&mut self) {
        self.first = 0;
        self.processed = 0;
        self.allocation = 0;
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
