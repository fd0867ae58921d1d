//! Shared types, constants and bit-vector primitives.
//!
//! Payload data travels through the codec as a `DataBits` vector, MSB-first
//! when viewed as bytes. Channel codecs consume bits from the front and pad
//! with zeros at the end when a channel's width exceeds the remaining
//! payload.

use bitcoin::{OutPoint, Transaction};
use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;

// ── Constants ────────────────────────────────────────────────────────────────

/// Standard-relay minimum value for a P2SH output, in satoshi.
pub const DUST_THRESHOLD: u64 = 546;

/// Bits carried by one input sequence number.
pub const SEQNR_BITS: usize = 32;

/// Payload bytes in a nulldata output.
pub const NULLDATA_BYTES: usize = 40;

/// Bits carried by one nulldata output.
pub const NULLDATA_BITS: usize = 8 * NULLDATA_BYTES;

/// Payload bits carried by each synthesized (non-keymap) pubkey.
pub const PUBKEY_DATA_BITS: usize = 250;

/// Maximum number of synthesized pubkeys per redeem script (M - 1).
pub const MAX_EXTRA_PUBKEYS: usize = 11;

/// Hard ceiling on P2SH outputs per transaction considered by the planner.
pub const MAX_SCRIPT_HASH_OUTPUTS: usize = 14;

/// Hard ceiling on transactions per embedding chain.
pub const MAX_CHAIN_DEPTH: usize = 100;

// ── Aliases ──────────────────────────────────────────────────────────────────

/// Ordered bit vector, MSB-first when interpreted as bytes.
pub type DataBits = Vec<bool>;

/// Non-empty ordered transaction sequence; every transaction after the first
/// spends outputs of its predecessor.
pub type TransactionChain = Vec<Transaction>;

/// Unspent outputs selected to fund an embedding, with their total value.
#[derive(Clone, Debug, Default)]
pub struct InitInputs {
    /// Accumulated spendable amount in satoshi.
    pub budget: u64,
    /// The selected outpoints, in claim order.
    pub utxo: Vec<OutPoint>,
}

// ── Bit-vector primitives ────────────────────────────────────────────────────

/// Appends `n_bits` zero bits.
pub fn pad_bits(bits: &mut DataBits, n_bits: usize) {
    bits.resize(bits.len() + n_bits, false);
}

/// Cuts the first `n_bits` bits out of `bits` and returns them.
pub fn slice_bits(bits: &mut DataBits, n_bits: usize) -> DataBits {
    assert!(n_bits <= bits.len(), "slice past end of bit vector");
    let rest = bits.split_off(n_bits);
    std::mem::replace(bits, rest)
}

/// Converts exactly eight bits into a byte, first bit most significant.
pub fn bits_to_byte(bits: &[bool]) -> u8 {
    assert_eq!(bits.len(), 8);
    bits.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8)
}

/// Converts a byte into its eight bits, most significant first.
pub fn byte_to_bits(byte: u8) -> DataBits {
    (0..8).map(|i| (byte >> (7 - i)) & 1 == 1).collect()
}

/// Converts a byte slice into a bit vector.
pub fn data_to_bits(data: &[u8]) -> DataBits {
    let mut bits = DataBits::with_capacity(data.len() * 8);
    for &byte in data {
        bits.extend(byte_to_bits(byte));
    }
    bits
}

/// Converts a bit vector with a whole number of bytes back into bytes.
pub fn bits_to_data(bits: &[bool]) -> Vec<u8> {
    assert_eq!(bits.len() % 8, 0, "bit vector is not byte-aligned");
    bits.chunks(8).map(bits_to_byte).collect()
}

/// Interprets a bit vector as a big-endian non-negative integer.
pub fn bits_to_int(bits: &[bool]) -> BigUint {
    let mut num = BigUint::zero();
    for &bit in bits {
        num <<= 1u8;
        if bit {
            num += 1u8;
        }
    }
    num
}

/// Produces the minimal big-endian bit encoding of an integer.
///
/// Zero encodes as the empty vector; callers needing a fixed width left-pad.
pub fn int_to_bits(num: &BigUint) -> DataBits {
    let n_bits = num.bits();
    (0..n_bits).rev().map(|i| num.bit(i)).collect()
}

/// Left-pads a bit vector with zeros to exactly `width` bits.
pub fn left_pad(mut bits: DataBits, width: usize) -> DataBits {
    assert!(bits.len() <= width, "value wider than channel");
    let mut out = vec![false; width - bits.len()];
    out.append(&mut bits);
    out
}

/// Generates `n_bits` random bits from the thread RNG.
pub fn random_bits(n_bits: usize) -> DataBits {
    let mut rng = rand::thread_rng();
    (0..n_bits).map(|_| rng.gen_bool(0.5)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn byte_bit_conversion() {
        let vec = vec![false, true, true, false, false, false, false, true];
        assert_eq!(byte_to_bits(b'a'), vec);
        assert_eq!(bits_to_byte(&vec), b'a');
    }

    #[test]
    fn bits_to_int_known_value() {
        let data = [
            0x41, 0x41, 0x41, 0x41, 0x42, 0x42, 0x42, 0x42, 0x43, 0x43, 0x43, 0x43, 0x44, 0x44,
            0x44, 0x44,
        ];
        let expected: BigUint = "86738642548785208971184551234260714564".parse().unwrap();
        assert_eq!(bits_to_int(&data_to_bits(&data)), expected);
    }

    #[test]
    fn int_to_bits_known_value() {
        let data = [
            0x41, 0x41, 0x41, 0x41, 0x42, 0x42, 0x42, 0x42, 0x43, 0x43, 0x43, 0x43, 0x44, 0x44,
            0x44, 0x44,
        ];
        let num: BigUint = "86738642548785208971184551234260714564".parse().unwrap();
        let mut bits = int_to_bits(&num);
        if bits.len() % 8 != 0 {
            let width = bits.len() + 8 - bits.len() % 8;
            bits = left_pad(bits, width);
        }
        assert_eq!(bits_to_data(&bits), data);
    }

    #[test]
    fn int_of_empty_is_zero() {
        assert_eq!(bits_to_int(&[]), BigUint::zero());
        assert!(int_to_bits(&BigUint::zero()).is_empty());
    }

    #[test]
    fn slice_removes_front() {
        let mut bits = vec![true, false, true, true];
        let head = slice_bits(&mut bits, 3);
        assert_eq!(head, vec![true, false, true]);
        assert_eq!(bits, vec![true]);
    }

    #[test]
    fn pad_appends_zeros() {
        let mut bits = vec![true];
        pad_bits(&mut bits, 3);
        assert_eq!(bits, vec![true, false, false, false]);
    }

    proptest! {
        #[test]
        fn data_round_trips_through_bits(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(bits_to_data(&data_to_bits(&data)), data);
        }

        #[test]
        fn int_round_trips_through_bits(bits in proptest::collection::vec(any::<bool>(), 0..200)) {
            let num = bits_to_int(&bits);
            let minimal = int_to_bits(&num);
            // Leading zeros are stripped by the integer form; the caller
            // restores them by left-padding to the original width.
            prop_assert_eq!(left_pad(minimal, bits.len()), bits);
        }
    }
}
