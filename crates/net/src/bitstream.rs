//! Sub-byte-aligned stream codec.
//!
//! Every outbound packet is written through [`BitWriter`]; inbound packets
//! are read through a fresh [`BitReader`] per message so a malformed frame
//! can never desynchronize the cursor of a different one. Floats are
//! quantized linearly over a declared `[min, max]` range; the round-trip
//! error is bounded by `(max - min) / (2^bits - 1)`.

use glam::Vec2;
use thiserror::Error;

/// Errors raised by the bit-level codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A read requested more bits than the buffer still holds.
    #[error("read past end of buffer: requested {requested} bits, {remaining} remain")]
    Overrun {
        /// Bits requested by the read.
        requested: usize,
        /// Bits left in the buffer.
        remaining: usize,
    },
    /// A fixed-length string held bytes that are not printable ASCII.
    #[error("string field contains non-ASCII bytes")]
    BadString,
    /// A field carried a value outside its legal range.
    #[error("field value {value} out of range (max {max})")]
    BadValue {
        /// Decoded value.
        value: u32,
        /// Largest legal value.
        max: u32,
    },
}

/// Bit-cursor writer over a growable byte buffer. Bits fill each byte from
/// the least significant end, matching [`BitReader`].
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    /// New empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// New writer with room reserved for `bytes` bytes.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(bytes),
            bit_len: 0,
        }
    }

    /// Number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Write the low `bits` bits of `value` (bits <= 32).
    pub fn write_bits(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        for i in 0..bits {
            let bit = (value >> i) & 1;
            let byte_idx = self.bit_len / 8;
            let bit_idx = self.bit_len % 8;
            if byte_idx == self.buf.len() {
                self.buf.push(0);
            }
            self.buf[byte_idx] |= (bit as u8) << bit_idx;
            self.bit_len += 1;
        }
    }

    /// Single-bit boolean.
    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(value as u32, 1);
    }

    /// Unsigned byte.
    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u32, 8);
    }

    /// Unsigned 16-bit integer.
    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(value as u32, 16);
    }

    /// Unsigned 32-bit integer.
    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value, 32);
    }

    /// Quantize `value` from `[min, max]` onto `bits` bits, clamping first.
    pub fn write_float(&mut self, value: f32, min: f32, max: f32, bits: u32) {
        debug_assert!(min < max);
        let range = (1u64 << bits) - 1;
        let clamped = value.clamp(min, max);
        let t = (clamped - min) / (max - min);
        self.write_bits((t * range as f32 + 0.5) as u32, bits);
    }

    /// Two floats quantized over independent x/y ranges.
    pub fn write_vec(&mut self, v: Vec2, min: Vec2, max: Vec2, bits: u32) {
        self.write_float(v.x, min.x, max.x, bits);
        self.write_float(v.y, min.y, max.y, bits);
    }

    /// Vector with both components range-mapped to `[-1, 1]`.
    pub fn write_unit_vec(&mut self, v: Vec2, bits: u32) {
        self.write_vec(v, Vec2::splat(-1.0), Vec2::splat(1.0), bits);
    }

    /// Fixed-length ASCII string, zero padded.
    pub fn write_fixed_str(&mut self, s: &str, len: usize) {
        let bytes = s.as_bytes();
        for i in 0..len {
            let b = bytes.get(i).copied().unwrap_or(0);
            self.write_u8(if b.is_ascii() { b } else { b'?' });
        }
    }

    /// Pad with zero bits to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        let offset = (8 - self.bit_len % 8) % 8;
        if offset > 0 {
            self.write_bits(0, offset as u32);
        }
    }

    /// Consume the writer, returning the byte buffer (final partial byte
    /// zero padded).
    pub fn finish(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.buf
    }
}

/// Bit-cursor reader over a byte slice.
#[derive(Debug)]
pub struct BitReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> BitReader<'a> {
    /// Wrap a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    /// Bits still available.
    pub fn remaining_bits(&self) -> usize {
        self.buf.len() * 8 - self.cursor
    }

    /// Read `bits` bits (bits <= 32).
    pub fn read_bits(&mut self, bits: u32) -> Result<u32, CodecError> {
        debug_assert!(bits <= 32);
        if (bits as usize) > self.remaining_bits() {
            return Err(CodecError::Overrun {
                requested: bits as usize,
                remaining: self.remaining_bits(),
            });
        }
        let mut value = 0u32;
        for i in 0..bits {
            let byte_idx = self.cursor / 8;
            let bit_idx = self.cursor % 8;
            let bit = (self.buf[byte_idx] >> bit_idx) & 1;
            value |= (bit as u32) << i;
            self.cursor += 1;
        }
        Ok(value)
    }

    /// Single-bit boolean.
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_bits(1)? != 0)
    }

    /// Unsigned byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Unsigned 16-bit integer.
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.read_bits(16)? as u16)
    }

    /// Unsigned 32-bit integer.
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.read_bits(32)
    }

    /// Inverse of [`BitWriter::write_float`].
    pub fn read_float(&mut self, min: f32, max: f32, bits: u32) -> Result<f32, CodecError> {
        let range = (1u64 << bits) - 1;
        let raw = self.read_bits(bits)?;
        Ok(min + (max - min) * raw as f32 / range as f32)
    }

    /// Inverse of [`BitWriter::write_vec`].
    pub fn read_vec(&mut self, min: Vec2, max: Vec2, bits: u32) -> Result<Vec2, CodecError> {
        let x = self.read_float(min.x, max.x, bits)?;
        let y = self.read_float(min.y, max.y, bits)?;
        Ok(Vec2::new(x, y))
    }

    /// Inverse of [`BitWriter::write_unit_vec`].
    pub fn read_unit_vec(&mut self, bits: u32) -> Result<Vec2, CodecError> {
        self.read_vec(Vec2::splat(-1.0), Vec2::splat(1.0), bits)
    }

    /// Fixed-length ASCII string; trailing zero padding is stripped.
    pub fn read_fixed_str(&mut self, len: usize) -> Result<String, CodecError> {
        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            let b = self.read_u8()?;
            if b != 0 {
                if !b.is_ascii() {
                    return Err(CodecError::BadString);
                }
                bytes.push(b);
            }
        }
        String::from_utf8(bytes).map_err(|_| CodecError::BadString)
    }

    /// Skip to the next byte boundary.
    pub fn align_to_byte(&mut self) -> Result<(), CodecError> {
        let offset = (8 - self.cursor % 8) % 8;
        if offset > 0 {
            self.read_bits(offset as u32)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip_across_byte_boundaries() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        w.write_bits(0x3FF, 10);
        w.write_bool(true);
        w.write_u16(0xBEEF);
        let buf = w.finish();

        let mut r = BitReader::new(&buf);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
        assert_eq!(r.read_bits(10).unwrap(), 0x3FF);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u16().unwrap(), 0xBEEF);
    }

    #[test]
    fn float_quantization_stays_within_declared_error() {
        let mut w = BitWriter::new();
        w.write_float(512.37, 0.0, 1024.0, 16);
        w.write_float(73.2, 0.0, 100.0, 8);
        let buf = w.finish();

        let mut r = BitReader::new(&buf);
        let pos = r.read_float(0.0, 1024.0, 16).unwrap();
        assert!((pos - 512.37).abs() <= 1024.0 / 65535.0);
        let health = r.read_float(0.0, 100.0, 8).unwrap();
        assert!((health - 73.2).abs() <= 100.0 / 255.0);
    }

    #[test]
    fn floats_clamp_to_their_range() {
        let mut w = BitWriter::new();
        w.write_float(-50.0, 0.0, 100.0, 8);
        w.write_float(900.0, 0.0, 100.0, 8);
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        assert_eq!(r.read_float(0.0, 100.0, 8).unwrap(), 0.0);
        assert_eq!(r.read_float(0.0, 100.0, 8).unwrap(), 100.0);
    }

    #[test]
    fn unit_vec_round_trips() {
        let dir = Vec2::new(0.6, -0.8);
        let mut w = BitWriter::new();
        w.write_unit_vec(dir, 8);
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        let out = r.read_unit_vec(8).unwrap();
        assert!((out - dir).length() < 2.0 * 2.0 / 255.0);
    }

    #[test]
    fn alignment_pads_to_byte_boundary() {
        let mut w = BitWriter::new();
        w.write_bits(1, 3);
        w.align_to_byte();
        w.write_u8(0xAB);
        assert_eq!(w.bit_len(), 16);
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        r.read_bits(3).unwrap();
        r.align_to_byte().unwrap();
        assert_eq!(r.read_u8().unwrap(), 0xAB);
    }

    #[test]
    fn reading_past_the_end_is_an_error_not_a_panic() {
        let buf = [0u8; 1];
        let mut r = BitReader::new(&buf);
        r.read_bits(6).unwrap();
        let err = r.read_bits(4).unwrap_err();
        assert_eq!(
            err,
            CodecError::Overrun {
                requested: 4,
                remaining: 2
            }
        );
    }

    #[test]
    fn fixed_strings_strip_padding() {
        let mut w = BitWriter::new();
        w.write_fixed_str("rex", 8);
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        assert_eq!(r.read_fixed_str(8).unwrap(), "rex");
    }
}
