//! # IEC 61499 Value Codec
//!
//! Subset of the ASN.1 encoding used by IEC 61499 communication function
//! blocks, enough for the application payloads exchanged over the link.
//!
//! ```text
//! BOOL    0x40 (false) | 0x41 (true)
//! INT     0x43  hi lo          two's complement, big-endian
//! USINT   0x46  value
//! ```

use crate::error::CodecError;
use crate::traits::ByteSource;

const CLASS_APPLICATION: u8 = 0x40;

pub const TAG_BOOL_FALSE: u8 = CLASS_APPLICATION;
pub const TAG_BOOL_TRUE: u8 = CLASS_APPLICATION | 1;
pub const TAG_INT: u8 = CLASS_APPLICATION | 3;
pub const TAG_USINT: u8 = CLASS_APPLICATION | 6;

pub const INT_ENCODED_SIZE: usize = 3;
pub const USINT_ENCODED_SIZE: usize = 2;
pub const BOOL_ENCODED_SIZE: usize = 1;

/// Writes tagged values into a caller-owned buffer.
///
/// A value that does not fit is skipped but still counted, so chained puts
/// need no error handling; [`FrameEncoder::finish`] reports the overflow.
pub struct FrameEncoder<'b> {
    buffer: &'b mut [u8],
    position: usize,
    overflow: bool,
}

impl<'b> FrameEncoder<'b> {
    pub fn new(buffer: &'b mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
            overflow: false,
        }
    }

    pub fn put_int(&mut self, value: i16) -> &mut Self {
        let [hi, lo] = value.to_be_bytes();
        self.put(&[TAG_INT, hi, lo])
    }

    pub fn put_usint(&mut self, value: u8) -> &mut Self {
        self.put(&[TAG_USINT, value])
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put(&[if value { TAG_BOOL_TRUE } else { TAG_BOOL_FALSE }])
    }

    /// Bytes written so far, including skipped values
    pub fn position(&self) -> usize {
        self.position
    }

    /// Length of the encoded frame
    pub fn finish(&self) -> Result<usize, CodecError> {
        if self.overflow {
            return Err(CodecError::BufferTooSmall);
        }
        Ok(self.position)
    }

    fn put(&mut self, bytes: &[u8]) -> &mut Self {
        let end = self.position + bytes.len();
        match self.buffer.get_mut(self.position..end) {
            Some(slot) => slot.copy_from_slice(bytes),
            None => self.overflow = true,
        }
        self.position = end;
        self
    }
}

/// Reads tagged values from a received frame.
///
/// Works directly on a [`crate::transport::Payload`], so values are decoded
/// without copying the frame out of the receive buffer. A failed read leaves
/// the position unchanged.
pub struct FrameReader<'s, S: ByteSource + ?Sized> {
    source: &'s S,
    position: usize,
}

impl<'s, S: ByteSource + ?Sized> FrameReader<'s, S> {
    pub fn new(source: &'s S) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.source.len().saturating_sub(self.position)
    }

    pub fn take_int(&mut self) -> Result<i16, CodecError> {
        self.expect_tag(TAG_INT, INT_ENCODED_SIZE)?;
        let hi = self.byte(1)?;
        let lo = self.byte(2)?;
        self.position += INT_ENCODED_SIZE;
        Ok(i16::from_be_bytes([hi, lo]))
    }

    pub fn take_usint(&mut self) -> Result<u8, CodecError> {
        self.expect_tag(TAG_USINT, USINT_ENCODED_SIZE)?;
        let value = self.byte(1)?;
        self.position += USINT_ENCODED_SIZE;
        Ok(value)
    }

    pub fn take_bool(&mut self) -> Result<bool, CodecError> {
        let value = match self.byte(0)? {
            TAG_BOOL_FALSE => false,
            TAG_BOOL_TRUE => true,
            _ => return Err(CodecError::UnexpectedTag),
        };
        self.position += BOOL_ENCODED_SIZE;
        Ok(value)
    }

    fn expect_tag(&self, tag: u8, size: usize) -> Result<(), CodecError> {
        if self.byte(0)? != tag {
            return Err(CodecError::UnexpectedTag);
        }
        if self.remaining() < size {
            return Err(CodecError::Truncated);
        }
        Ok(())
    }

    fn byte(&self, offset: usize) -> Result<u8, CodecError> {
        self.source
            .byte_at(self.position + offset)
            .ok_or(CodecError::Truncated)
    }
}
