//! XDR value codec and record-mark helpers.
//!
//! Implements the canonical fixed-alignment encoding used by every RPC
//! header and payload field:
//! ```text
//! ┌─────────────┬────────────────────────────────┐
//! │ uint32/int32│ 4 bytes, Big Endian            │
//! │ uint64      │ 8 bytes, Big Endian            │
//! │ bool        │ uint32, 0 = false              │
//! │ opaque<>    │ length (uint32) + data + pad   │
//! │ opaque[n]   │ data + pad (no length prefix)  │
//! │ string<>    │ UTF-8 bytes as opaque<>        │
//! └─────────────┴────────────────────────────────┘
//! ```
//!
//! Every item is padded with zero bytes to the next multiple of 4, so a
//! cursor is always 4-byte aligned between items.
//!
//! The record-mark helpers at the bottom operate on a raw fragment header
//! without constructing a cursor; the frame decoder uses them on the first
//! 4 bytes of each fragment.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, RpcError};

/// Record-mark header size in bytes (fixed, exactly 4).
pub const FRAGMENT_HEADER_SIZE: usize = 4;

/// Top bit of the record mark, set on the final fragment of a message.
pub const LAST_FRAGMENT_BIT: u32 = 0x8000_0000;

/// Largest payload length a single fragment can declare (low 31 bits).
pub const MAX_FRAGMENT_SIZE: u32 = 0x7FFF_FFFF;

/// Round a byte length up to the next multiple of 4.
#[inline]
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Write cursor producing XDR-encoded bytes.
///
/// # Example
///
/// ```
/// use oncrpc::xdr::XdrEncoder;
///
/// let mut enc = XdrEncoder::new();
/// enc.write_u32(42);
/// enc.write_var_opaque(b"hi");
/// assert_eq!(enc.len(), 12); // 4 + 4 + 2 + 2 pad
/// ```
#[derive(Debug, Default)]
pub struct XdrEncoder {
    buf: BytesMut,
}

impl XdrEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Create an encoder with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Current write position (bytes encoded so far).
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View the encoded bytes without consuming the encoder.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Write an unsigned 32-bit integer.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    /// Write a signed 32-bit integer.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Write an unsigned 64-bit integer (two 4-byte words, high first).
    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    /// Write a boolean as uint32 0/1.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u32(u32::from(value));
    }

    /// Write a variable-length opaque: length prefix, data, zero padding.
    pub fn write_var_opaque(&mut self, data: &[u8]) {
        self.buf.put_u32(data.len() as u32);
        self.write_fixed_opaque(data);
    }

    /// Write fixed-length opaque data: no length prefix, zero padding.
    pub fn write_fixed_opaque(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        while self.buf.len() % 4 != 0 {
            self.buf.put_u8(0);
        }
    }

    /// Write a string as its UTF-8 bytes in variable-length opaque form.
    pub fn write_string(&mut self, value: &str) {
        self.write_var_opaque(value.as_bytes());
    }

    /// Append raw pre-encoded bytes without re-aligning them.
    ///
    /// The caller is responsible for `data` already being XDR material
    /// (a multiple of 4 bytes) when alignment matters downstream.
    pub fn write_raw(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Freeze into a read-only view for transmission without copying.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Read cursor over an XDR-encoded buffer.
///
/// Opaque reads return `Bytes` views into the underlying buffer without
/// copying. Every read checks the remaining length first and fails with
/// [`RpcError::Underflow`] instead of panicking, so a truncated or
/// hostile buffer can never crash the decode path.
#[derive(Debug, Clone)]
pub struct XdrDecoder {
    buf: Bytes,
    pos: usize,
}

impl XdrDecoder {
    /// Create a decoder over a complete message buffer.
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read position in bytes.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True if the cursor has reached the end of the buffer.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(RpcError::Underflow { needed, remaining });
        }
        Ok(())
    }

    /// Read an unsigned 32-bit integer.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let mut word = self.buf.slice(self.pos..self.pos + 4);
        self.pos += 4;
        Ok(word.get_u32())
    }

    /// Read a signed 32-bit integer.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Read an unsigned 64-bit integer.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let mut words = self.buf.slice(self.pos..self.pos + 8);
        self.pos += 8;
        Ok(words.get_u64())
    }

    /// Read a boolean. Zero is false; any other value is true.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u32()? != 0)
    }

    /// Read a variable-length opaque, skipping its padding.
    ///
    /// Fails with [`RpcError::Underflow`] if the declared length exceeds
    /// the remaining buffer.
    pub fn read_var_opaque(&mut self) -> Result<Bytes> {
        let len = self.read_u32()? as usize;
        self.read_fixed_opaque(len)
    }

    /// Read `len` bytes of fixed-length opaque data, skipping its padding.
    pub fn read_fixed_opaque(&mut self, len: usize) -> Result<Bytes> {
        let total = padded_len(len);
        self.ensure(total)?;
        let data = self.buf.slice(self.pos..self.pos + len);
        self.pos += total;
        Ok(data)
    }

    /// Read a string encoded as UTF-8 variable-length opaque.
    pub fn read_string(&mut self) -> Result<String> {
        let raw = self.read_var_opaque()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| RpcError::Protocol("string is not valid UTF-8".to_string()))
    }

    /// Consume and return everything from the cursor to the end of the
    /// buffer as a zero-copy view.
    pub fn read_rest(&mut self) -> Bytes {
        let rest = self.buf.slice(self.pos..);
        self.pos = self.buf.len();
        rest
    }
}

impl From<Bytes> for XdrDecoder {
    fn from(buf: Bytes) -> Self {
        Self::new(buf)
    }
}

/// Check the last-fragment bit in the first 4 bytes of a fragment header.
#[inline]
pub fn is_last_fragment(header: &[u8]) -> bool {
    debug_assert!(header.len() >= FRAGMENT_HEADER_SIZE);
    header[0] & 0x80 != 0
}

/// Extract the declared payload length from the first 4 bytes of a
/// fragment header (low 31 bits).
#[inline]
pub fn fragment_size(header: &[u8]) -> u32 {
    debug_assert!(header.len() >= FRAGMENT_HEADER_SIZE);
    u32::from_be_bytes([header[0], header[1], header[2], header[3]]) & MAX_FRAGMENT_SIZE
}

/// Build the record-mark header for a fragment of `len` payload bytes.
#[inline]
pub fn record_mark(len: u32, last: bool) -> [u8; FRAGMENT_HEADER_SIZE] {
    debug_assert!(len <= MAX_FRAGMENT_SIZE);
    let mark = if last { len | LAST_FRAGMENT_BIT } else { len };
    mark.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_big_endian_byte_order() {
        let mut enc = XdrEncoder::new();
        enc.write_u32(0x0102_0304);
        assert_eq!(enc.as_slice(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_u64_high_word_first() {
        let mut enc = XdrEncoder::new();
        enc.write_u64(0x0102_0304_0506_0708);
        assert_eq!(enc.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut dec = XdrDecoder::new(enc.into_bytes());
        assert_eq!(dec.read_u64().unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_i32_roundtrip_negative() {
        let mut enc = XdrEncoder::new();
        enc.write_i32(-7);
        let mut dec = XdrDecoder::new(enc.into_bytes());
        assert_eq!(dec.read_i32().unwrap(), -7);
    }

    #[test]
    fn test_bool_encodes_as_word() {
        let mut enc = XdrEncoder::new();
        enc.write_bool(true);
        enc.write_bool(false);
        assert_eq!(enc.as_slice(), &[0, 0, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_bool_decode_is_lenient() {
        let mut dec = XdrDecoder::new(Bytes::from_static(&[0, 0, 0, 5]));
        assert!(dec.read_bool().unwrap());
    }

    #[test]
    fn test_var_opaque_padding() {
        // Padded sizes for bodies of 0, 1, 4, 17 bytes.
        for (body_len, padded) in [(0usize, 0usize), (1, 4), (4, 4), (17, 20)] {
            let body = vec![0xABu8; body_len];
            let mut enc = XdrEncoder::new();
            enc.write_var_opaque(&body);
            assert_eq!(enc.len(), 4 + padded, "body_len={body_len}");

            let mut dec = XdrDecoder::new(enc.into_bytes());
            assert_eq!(dec.read_var_opaque().unwrap(), body);
            assert!(dec.is_exhausted());
        }
    }

    #[test]
    fn test_padding_bytes_are_zero() {
        let mut enc = XdrEncoder::new();
        enc.write_var_opaque(&[0xFF]);
        assert_eq!(enc.as_slice(), &[0, 0, 0, 1, 0xFF, 0, 0, 0]);
    }

    #[test]
    fn test_fixed_opaque_no_length_prefix() {
        let mut enc = XdrEncoder::new();
        enc.write_fixed_opaque(&[1, 2, 3, 4, 5]);
        assert_eq!(enc.as_slice(), &[1, 2, 3, 4, 5, 0, 0, 0]);

        let mut dec = XdrDecoder::new(enc.into_bytes());
        assert_eq!(dec.read_fixed_opaque(5).unwrap(), &[1, 2, 3, 4, 5][..]);
        assert!(dec.is_exhausted());
    }

    #[test]
    fn test_string_roundtrip() {
        let mut enc = XdrEncoder::new();
        enc.write_string("portmap");
        let mut dec = XdrDecoder::new(enc.into_bytes());
        assert_eq!(dec.read_string().unwrap(), "portmap");
    }

    #[test]
    fn test_string_invalid_utf8_is_error() {
        let mut enc = XdrEncoder::new();
        enc.write_var_opaque(&[0xFF, 0xFE]);
        let mut dec = XdrDecoder::new(enc.into_bytes());
        assert!(matches!(dec.read_string(), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_underflow_is_error_not_panic() {
        let mut dec = XdrDecoder::new(Bytes::from_static(&[0, 0]));
        let err = dec.read_u32().unwrap_err();
        assert!(matches!(
            err,
            RpcError::Underflow {
                needed: 4,
                remaining: 2
            }
        ));
        // Position unchanged after a failed read.
        assert_eq!(dec.position(), 0);
    }

    #[test]
    fn test_declared_opaque_length_exceeds_buffer() {
        // Length prefix says 100 bytes but only 4 follow.
        let mut enc = XdrEncoder::new();
        enc.write_u32(100);
        enc.write_u32(0xDEAD_BEEF);
        let mut dec = XdrDecoder::new(enc.into_bytes());
        assert!(matches!(
            dec.read_var_opaque(),
            Err(RpcError::Underflow { .. })
        ));
    }

    #[test]
    fn test_position_and_remaining() {
        let mut enc = XdrEncoder::new();
        enc.write_u32(1);
        enc.write_u32(2);
        enc.write_u32(3);

        let mut dec = XdrDecoder::new(enc.into_bytes());
        assert_eq!(dec.position(), 0);
        assert_eq!(dec.remaining(), 12);

        dec.read_u32().unwrap();
        assert_eq!(dec.position(), 4);
        assert_eq!(dec.remaining(), 8);

        dec.read_rest();
        assert!(dec.is_exhausted());
    }

    #[test]
    fn test_read_rest_is_zero_copy_view() {
        let mut enc = XdrEncoder::new();
        enc.write_u32(7);
        enc.write_fixed_opaque(&[9, 9, 9, 9]);

        let mut dec = XdrDecoder::new(enc.into_bytes());
        dec.read_u32().unwrap();
        assert_eq!(dec.read_rest(), &[9, 9, 9, 9][..]);
    }

    #[test]
    fn test_is_last_fragment() {
        assert!(is_last_fragment(&[0x80, 0, 0, 10]));
        assert!(!is_last_fragment(&[0x00, 0, 0, 10]));
        // Extra trailing bytes are ignored, only the header matters.
        assert!(is_last_fragment(&[0x80, 0, 0, 1, 0xAA, 0xBB]));
    }

    #[test]
    fn test_fragment_size() {
        assert_eq!(fragment_size(&[0x80, 0, 0, 10]), 10);
        assert_eq!(fragment_size(&[0x00, 0, 0, 10]), 10);
        assert_eq!(fragment_size(&[0x80, 0, 0, 0]), 0);
        assert_eq!(fragment_size(&[0x00, 0, 0, 1]), 1);
        assert_eq!(fragment_size(&[0xFF, 0xFF, 0xFF, 0xFF]), MAX_FRAGMENT_SIZE);
    }

    #[test]
    fn test_record_mark_roundtrip() {
        for (len, last) in [(0u32, true), (1, false), (10, true), (MAX_FRAGMENT_SIZE, false)] {
            let mark = record_mark(len, last);
            assert_eq!(fragment_size(&mark), len);
            assert_eq!(is_last_fragment(&mark), last);
        }
    }

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 4);
        assert_eq!(padded_len(4), 4);
        assert_eq!(padded_len(5), 8);
        assert_eq!(padded_len(17), 20);
    }
}
