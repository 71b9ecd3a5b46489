//! Property tests for the bit-level codec.

use glam::Vec2;
use proptest::prelude::*;
use redzone_net::{BitReader, BitWriter};

proptest! {
    /// Any value in range decodes to within the declared quantization error.
    #[test]
    fn quantized_floats_round_trip_within_error_bound(
        value in 0.0f32..1024.0,
        bits in 4u32..=16,
    ) {
        let mut w = BitWriter::new();
        w.write_float(value, 0.0, 1024.0, bits);
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        let out = r.read_float(0.0, 1024.0, bits).unwrap();
        let max_err = 1024.0 / ((1u64 << bits) - 1) as f32;
        prop_assert!((out - value).abs() <= max_err, "err {} > bound {}", (out - value).abs(), max_err);
    }

    #[test]
    fn arbitrary_bit_fields_round_trip(fields in prop::collection::vec((0u32..=u32::MAX, 1u32..=32), 1..64)) {
        let mut w = BitWriter::new();
        for &(value, bits) in &fields {
            let masked = if bits == 32 { value } else { value & ((1 << bits) - 1) };
            w.write_bits(masked, bits);
        }
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        for &(value, bits) in &fields {
            let masked = if bits == 32 { value } else { value & ((1 << bits) - 1) };
            prop_assert_eq!(r.read_bits(bits).unwrap(), masked);
        }
    }

    #[test]
    fn unit_vectors_round_trip_componentwise(x in -1.0f32..1.0, y in -1.0f32..1.0) {
        let v = Vec2::new(x, y);
        let mut w = BitWriter::new();
        w.write_unit_vec(v, 8);
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        let out = r.read_unit_vec(8).unwrap();
        let bound = 2.0 / 255.0;
        prop_assert!((out.x - v.x).abs() <= bound);
        prop_assert!((out.y - v.y).abs() <= bound);
    }

    /// Interleaved alignment never corrupts later aligned fields.
    #[test]
    fn alignment_preserves_following_bytes(prefix_bits in 0u32..16, byte in any::<u8>()) {
        let mut w = BitWriter::new();
        if prefix_bits > 0 {
            w.write_bits(0x5A5A & ((1 << prefix_bits) - 1), prefix_bits);
        }
        w.align_to_byte();
        w.write_u8(byte);
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        if prefix_bits > 0 {
            r.read_bits(prefix_bits).unwrap();
        }
        r.align_to_byte().unwrap();
        prop_assert_eq!(r.read_u8().unwrap(), byte);
    }
}
