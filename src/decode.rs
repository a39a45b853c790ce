//! Big-endian bit extraction and affine scaling for field values.
//!
//! Bit 0 is the MSB of byte 0. This convention must never be flipped to
//! little-endian or LSB-0 numbering, even when a field spans a byte
//! boundary in a way that looks unintuitive — the database CSVs (an
//! external collaborator) are authored against this exact convention.

/// Extracts the unsigned integer contained in `data[start_bit..=end_bit]`
/// using big-endian bit numbering (bit 0 = MSB of `data[0]`).
///
/// `start_bit` and `end_bit` are inclusive bit offsets into the whole
/// byte slice, which may be arbitrarily long (a reassembled multi-frame
/// payload routinely exceeds 8 bytes). Only the byte window spanning the
/// requested range is folded into an integer, so this is not bounded by
/// `data`'s total length. Panics if `end_bit >= 8 * data.len()`, or if
/// the range spans more than 64 bits — callers are expected to have
/// already checked the response is long enough (see
/// [`crate::engine::Engine::read_field`]).
pub fn extract_bits(data: &[u8], start_bit: usize, end_bit: usize) -> u64 {
    assert!(start_bit <= end_bit, "start_bit must be <= end_bit");
    assert!(end_bit < data.len() * 8, "end_bit out of range for data length");
    let width = end_bit - start_bit + 1;
    assert!(width <= 64, "bit range exceeds 64 bits");

    let start_byte = start_bit / 8;
    let end_byte = end_bit / 8;
    let window = &data[start_byte..=end_byte];
    let window_bits = window.len() * 8;
    let end_bit_in_window = end_bit - start_byte * 8;

    let value = big_endian_unsigned(window);
    let shift = window_bits - end_bit_in_window - 1;
    let mask = if width == 64 { u128::MAX } else { (1u128 << width) - 1 };
    ((value >> shift) & mask) as u64
}

/// Interprets a byte window as a big-endian unsigned integer. Folds into
/// a `u128` rather than `u64`: a 64-bit-wide field misaligned within a
/// byte can span up to 9 bytes (72 bits) of window before it is shifted
/// and masked back down to its true width.
fn big_endian_unsigned(data: &[u8]) -> u128 {
    let mut value: u128 = 0;
    for &byte in data {
        value = (value << 8) | byte as u128;
    }
    value
}

/// Applies the affine scaling law `offset + resolution * raw`.
pub fn decode_value(raw: u64, resolution: f64, offset: f64) -> f64 {
    offset + resolution * raw as f64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn s1_state_of_charge() {
        // 7E8 06 62 20 02 0F A0 00 00 -> response bytes start at 62 20 02 ...
        let data = [0x62u8, 0x20, 0x02, 0x0F, 0xA0, 0x00, 0x00];
        let raw = extract_bits(&data, 24, 39);
        assert_eq!(raw, 0x0FA0);
        assert_eq!(decode_value(raw, 0.02, 0.0), 80.00);
    }

    #[test]
    fn s2_odometer_24_bit_field() {
        let data = [0x62u8, 0x20, 0x06, 0x00, 0x1A, 0x85];
        let raw = extract_bits(&data, 24, 47);
        assert_eq!(raw, 0x001A85);
        assert_eq!(decode_value(raw, 1.0, 0.0), 6789.0);
    }

    #[test]
    fn single_bit_at_byte_boundary() {
        let data = [0b0000_0001u8, 0b1000_0000];
        assert_eq!(extract_bits(&data, 7, 7), 1);
        assert_eq!(extract_bits(&data, 8, 8), 1);
    }

    #[test]
    fn whole_first_byte() {
        let data = [0xABu8, 0xCD];
        assert_eq!(extract_bits(&data, 0, 7), 0xAB);
    }

    #[test]
    fn partition_reconstructs_original_bit_string() {
        let data = [0x9Au8, 0x3C, 0xF1];
        let total = data.len() * 8;
        // Partition into a handful of disjoint ranges covering every bit.
        let ranges: &[(usize, usize)] = &[(0, 3), (4, 7), (8, 15), (16, 20), (21, 23)];
        let mut reconstructed = 0u64;
        let mut bits_seen = 0;
        for &(s, e) in ranges {
            let width = e - s + 1;
            let piece = extract_bits(&data, s, e);
            reconstructed = (reconstructed << width) | piece;
            bits_seen += width;
        }
        assert_eq!(bits_seen, total);
        let expected = extract_bits(&data, 0, total - 1);
        assert_eq!(reconstructed, expected);
    }

    #[test]
    fn affine_law_is_bit_exact() {
        for raw in [0u64, 1, 255, 4095] {
            let v = decode_value(raw, 0.5, -10.0);
            assert_eq!(v, -10.0 + 0.5 * raw as f64);
        }
    }

    #[test]
    fn field_past_the_eighth_byte_does_not_panic() {
        // A reassembled multi-frame payload well over 8 bytes; the field
        // of interest lives entirely past byte 8.
        let mut data = vec![0u8; 20];
        data[10] = 0x12;
        data[11] = 0x34;
        let raw = extract_bits(&data, 80, 95);
        assert_eq!(raw, 0x1234);
    }

    #[test]
    fn sixty_four_bit_field_misaligned_across_nine_bytes() {
        let data = [0xFFu8, 0xFF, 0x9A, 0x3C, 0xF1, 0x00, 0x11, 0x22, 0x33, 0xFF];
        // bits 7..=70: 64 bits wide, spanning bytes 0..=8.
        let raw = extract_bits(&data, 7, 70);
        let bits: Vec<u8> = data
            .iter()
            .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1))
            .collect();
        let mut want: u64 = 0;
        for &bit in &bits[7..=70] {
            want = (want << 1) | bit as u64;
        }
        assert_eq!(raw, want);
    }
}
