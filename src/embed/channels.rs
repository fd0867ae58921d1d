//! Reversible codecs between bit vectors and transaction features.
//!
//! Four covert channels carry the payload: input sequence numbers, nulldata
//! output scripts, the public keys of 1-of-M P2SH redeem scripts, and the
//! combinatorial split/claim of the budget across outputs. Each `pack_*`
//! consumes bits from the front of the shared payload vector, padding with
//! zeros when the channel is wider than what remains; each `unpack_*` reads
//! back exactly the channel width.

use bitcoin::blockdata::script::{Builder, PushBytesBuf};
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_EQUAL, OP_HASH160, OP_RETURN};
use bitcoin::{Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut};
use rand::Rng;
use secp256k1::PublicKey;

use crate::error::{BmsError, Result};
use crate::keymap::KeyMap;
use crate::keystore::{placeholder_script_sig, redeem_pubkeys, Keystore};
use crate::maths::{
    composition_to_int, factorial, int_to_composition, int_to_permutation,
    number_of_compositions, permutation_to_int,
};
use crate::types::{
    bits_to_data, bits_to_int, data_to_bits, int_to_bits, left_pad, pad_bits, slice_bits,
    DataBits, MAX_EXTRA_PUBKEYS, NULLDATA_BITS, NULLDATA_BYTES, PUBKEY_DATA_BITS, SEQNR_BITS,
};

/// Attempts at synthesizing one payload pubkey before giving up. With the
/// default 5 random suffix bits the channel offers 32 candidate points, each
/// on the curve with probability ~1/2; exhausting the budget means the
/// payload slice admits no valid point at all.
const PUBKEY_SYNTH_ATTEMPTS: u32 = 4096;

// ── Sequence-number channel ──────────────────────────────────────────────────

/// Packs exactly 32 bits into a sequence number.
pub fn encode_sequence_nr(bits: &[bool]) -> u32 {
    assert_eq!(bits.len(), SEQNR_BITS);
    let bytes = bits_to_data(bits);
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Recovers the 32 bits behind a sequence number.
pub fn decode_sequence_nr(sequence_nr: u32) -> DataBits {
    data_to_bits(&sequence_nr.to_be_bytes())
}

/// Consumes up to 32 bits into the sequence number of `tx_in`.
pub fn pack_into_seq_nr(bits: &mut DataBits, tx_in: &mut TxIn) {
    let n_bits = SEQNR_BITS.min(bits.len());
    pad_bits(bits, SEQNR_BITS - n_bits);
    let slice = slice_bits(bits, SEQNR_BITS);

    tx_in.sequence = Sequence(encode_sequence_nr(&slice));
}

/// Reads the 32 sequence-number bits of `tx_in`.
pub fn unpack_from_seq_nr(tx_in: &TxIn) -> DataBits {
    decode_sequence_nr(tx_in.sequence.to_consensus_u32())
}

// ── Nulldata channel ─────────────────────────────────────────────────────────

/// Consumes up to 320 bits into an `OP_RETURN <40 bytes>` output script.
pub fn pack_into_nulldata(bits: &mut DataBits, tx_out: &mut TxOut) {
    let n_bits = NULLDATA_BITS.min(bits.len());
    pad_bits(bits, NULLDATA_BITS - n_bits);
    let slice = slice_bits(bits, NULLDATA_BITS);

    let payload = PushBytesBuf::try_from(bits_to_data(&slice))
        .expect("nulldata payload is 40 bytes");
    tx_out.script_pubkey = Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(payload)
        .into_script();
    tx_out.value = Amount::ZERO;
}

/// Reads the 320 payload bits of a nulldata output.
pub fn unpack_from_nulldata(tx_out: &TxOut) -> Result<DataBits> {
    let script = tx_out.script_pubkey.as_bytes();
    if script.len() != 2 + NULLDATA_BYTES || script[0] != OP_RETURN.to_u8() {
        return Err(BmsError::ChannelDecode(
            "output is not a 40-byte nulldata script".into(),
        ));
    }

    Ok(data_to_bits(&script[2..]))
}

// ── Pubkey channel ───────────────────────────────────────────────────────────

/// Synthesizes a valid compressed public key carrying `data` in its middle
/// bits.
///
/// Layout of the 33 bytes, bitwise: the fixed prefix `00000010` (the 0x02
/// even-y marker), one zero bit, `255 - n_rand_bits` payload bits, then
/// `n_rand_bits` random bits redrawn until the encoding lands on the curve.
pub fn encode_data_in_pubkey(data: &[bool], n_rand_bits: u32) -> Result<PublicKey> {
    assert!(!data.is_empty());
    assert_eq!(data.len() + n_rand_bits as usize, 255);

    let mut candidate = byte_prefix_bits();
    candidate.push(false);
    candidate.extend_from_slice(data);
    let fixed_len = candidate.len();

    for _ in 0..PUBKEY_SYNTH_ATTEMPTS {
        candidate.truncate(fixed_len);
        let mut rng = rand::thread_rng();
        candidate.extend((0..n_rand_bits).map(|_| rng.gen_bool(0.5)));

        if let Ok(pk) = PublicKey::from_slice(&bits_to_data(&candidate)) {
            return Ok(pk);
        }
    }

    Err(BmsError::KeypairGenFailed)
}

fn byte_prefix_bits() -> DataBits {
    // 0x02: a compressed point with even y.
    vec![false, false, false, false, false, false, true, false]
}

/// Recovers the payload bits from a synthesized public key: everything
/// between the 9 fixed leading bits and the trailing random bits.
pub fn decode_data_in_pubkey(pubkey: &PublicKey, n_rand_bits: u32) -> DataBits {
    let bits = data_to_bits(&pubkey.serialize());
    bits[9..bits.len() - n_rand_bits as usize].to_vec()
}

/// `OP_1 <pk_1> .. <pk_M> <M> OP_CHECKMULTISIG`.
pub fn multisig_script(pubkeys: &[PublicKey]) -> ScriptBuf {
    let mut builder = Builder::new().push_int(1);
    for pk in pubkeys {
        builder = builder.push_slice(pk.serialize());
    }
    builder
        .push_int(pubkeys.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Consumes bits into a P2SH output and the script-sig of the input that
/// will spend it.
///
/// The first redeem-script pubkey comes from the keypair table and carries
/// the suffix bits; each further pubkey is synthesized around 250 payload
/// bits. The downstream input gets a placeholder signature of final shape so
/// fee estimates stay stable until authorization.
pub fn pack_into_p2sh(
    bits: &mut DataBits,
    keymap: &KeyMap,
    store: &mut Keystore,
    tx_out: &mut TxOut,
    next_tx: &mut Transaction,
    input_index: usize,
    n_rand_bits: u32,
) -> Result<()> {
    let suffix_bits = keymap.suffix_bits() as usize;
    let secp = secp256k1::Secp256k1::new();

    // First pubkey: drawn from the table by the next `s` bits.
    let n_bits = suffix_bits.min(bits.len());
    pad_bits(bits, suffix_bits - n_bits);
    let suffix = slice_bits(bits, suffix_bits);

    let secret = *keymap
        .get(&suffix)
        .expect("keypair table covers every suffix pattern");
    let mut pubkeys = vec![PublicKey::from_secret_key(&secp, &secret)];

    // Remaining pubkeys: 250 payload bits each.
    let n_extra = MAX_EXTRA_PUBKEYS.min(bits.len().div_ceil(PUBKEY_DATA_BITS));
    for _ in 0..n_extra {
        let n_bits = PUBKEY_DATA_BITS.min(bits.len());
        pad_bits(bits, PUBKEY_DATA_BITS - n_bits);
        let slice = slice_bits(bits, PUBKEY_DATA_BITS);

        pubkeys.push(encode_data_in_pubkey(&slice, n_rand_bits)?);
    }

    let redeem = multisig_script(&pubkeys);
    tx_out.script_pubkey = ScriptBuf::new_p2sh(&redeem.script_hash());
    next_tx.input[input_index].script_sig = placeholder_script_sig(&redeem);
    store.add_script(redeem);

    Ok(())
}

/// Recovers the payload bits from the script-sig of a P2SH spend: the last
/// `s` bits of the first redeem pubkey, then the middle bits of each further
/// pubkey.
pub fn unpack_from_p2sh(tx_in: &TxIn, suffix_bits: u32, n_rand_bits: u32) -> Result<DataBits> {
    // The redeem script is the final push of the script-sig.
    let redeem_bytes = tx_in
        .script_sig
        .instructions()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| BmsError::ChannelDecode(format!("malformed script-sig: {e}")))?
        .into_iter()
        .filter_map(|inst| inst.push_bytes().map(|p| p.as_bytes().to_vec()))
        .last()
        .ok_or_else(|| BmsError::ChannelDecode("script-sig carries no pushes".into()))?;

    let pubkeys = redeem_pubkeys(ScriptBuf::from_bytes(redeem_bytes).as_script());
    let first = pubkeys.first().ok_or_else(|| {
        BmsError::ChannelDecode("redeem script carries no public keys".into())
    })?;

    let first_bits = data_to_bits(&first.serialize());
    let mut bits = first_bits[first_bits.len() - suffix_bits as usize..].to_vec();

    for pubkey in &pubkeys[1..] {
        bits.extend(decode_data_in_pubkey(pubkey, n_rand_bits));
    }

    Ok(bits)
}

// ── Budget-split channel ─────────────────────────────────────────────────────

/// Exact bit capacity of a weak composition of `n` into `k` parts:
/// `floor(log2 C(n + k - 1, k - 1))`.
pub fn embeddable_bits_in_values(n: u64, k: u16) -> usize {
    number_of_compositions(n, k).bits() as usize - 1
}

/// Encodes exactly `embeddable_bits_in_values(budget, n_parts)` bits as a
/// weak composition of `budget`.
pub fn encode_data_in_values(data: &[bool], budget: u64, n_parts: u16) -> Vec<u64> {
    assert!(n_parts >= 2);
    assert_eq!(data.len(), embeddable_bits_in_values(budget, n_parts));

    int_to_composition(bits_to_int(data), budget, n_parts)
}

/// Recovers the bits behind a weak composition.
pub fn decode_data_in_values(values: &[u64]) -> DataBits {
    assert!(values.len() >= 2);

    let budget: u64 = values.iter().sum();
    let width = embeddable_bits_in_values(budget, values.len() as u16);
    left_pad(int_to_bits(&composition_to_int(values)), width)
}

/// Consumes bits into the values of `tx_outs`, each output receiving its
/// composition part plus the dust floor `lbound`.
pub fn pack_into_budget_split(
    bits: &mut DataBits,
    tx_outs: &mut [TxOut],
    budget: u64,
    lbound: u64,
) {
    let n_outputs = tx_outs.len() as u16;
    assert!(budget >= u64::from(n_outputs) * lbound);

    let spendable = budget - u64::from(n_outputs) * lbound;
    let max_bits = embeddable_bits_in_values(spendable, n_outputs);
    let n_bits = max_bits.min(bits.len());

    let mut slice = slice_bits(bits, n_bits);
    pad_bits(&mut slice, max_bits - n_bits);

    let values = encode_data_in_values(&slice, spendable, n_outputs);
    for (tx_out, part) in tx_outs.iter_mut().zip(values) {
        tx_out.value = Amount::from_sat(part + lbound);
    }
}

/// Reads the bits behind the output values of a budget split.
pub fn unpack_from_budget_split(tx_outs: &[TxOut], lbound: u64) -> Result<DataBits> {
    let values = tx_outs
        .iter()
        .map(|out| {
            out.value.to_sat().checked_sub(lbound).ok_or_else(|| {
                BmsError::ChannelDecode(format!(
                    "output value {} below the dust floor {lbound}",
                    out.value.to_sat()
                ))
            })
        })
        .collect::<Result<Vec<u64>>>()?;

    Ok(decode_data_in_values(&values))
}

// ── Budget-claim channel ─────────────────────────────────────────────────────

/// Exact bit capacity of a permutation of `k` elements: `floor(log2 k!)`.
pub fn embeddable_bits_in_permutation(n_parts: u16) -> usize {
    factorial(u64::from(n_parts)).bits() as usize - 1
}

/// Encodes exactly `embeddable_bits_in_permutation(n_parts)` bits as a
/// permutation of `{0, .., n_parts - 1}`.
pub fn encode_data_in_permutation(data: &[bool], n_parts: u16) -> Vec<u16> {
    assert!(n_parts >= 2);
    assert_eq!(data.len(), embeddable_bits_in_permutation(n_parts));

    int_to_permutation(bits_to_int(data), n_parts)
}

/// Recovers the bits behind a permutation.
pub fn decode_data_in_permutation(perm: &[u16]) -> DataBits {
    assert!(perm.len() >= 2);

    let width = embeddable_bits_in_permutation(perm.len() as u16);
    left_pad(int_to_bits(&permutation_to_int(perm)), width)
}

/// Consumes bits into the claim order: input `i` is pointed at previous
/// output `perm[i]`.
pub fn pack_into_budget_claim(bits: &mut DataBits, tx_ins: &mut [TxIn]) {
    let n_inputs = tx_ins.len() as u16;
    let max_bits = embeddable_bits_in_permutation(n_inputs);
    let n_bits = max_bits.min(bits.len());

    let mut slice = slice_bits(bits, n_bits);
    pad_bits(&mut slice, max_bits - n_bits);

    let perm = encode_data_in_permutation(&slice, n_inputs);
    for (tx_in, target) in tx_ins.iter_mut().zip(perm) {
        tx_in.previous_output.vout = u32::from(target);
    }
}

/// Reads the bits behind the claim order of `tx_ins`.
pub fn unpack_from_budget_claim(tx_ins: &[TxIn]) -> Result<DataBits> {
    let k = tx_ins.len();
    let mut seen = vec![false; k];
    let mut perm = Vec::with_capacity(k);

    for tx_in in tx_ins {
        let n = tx_in.previous_output.vout as usize;
        if n >= k || seen[n] {
            return Err(BmsError::ChannelDecode(
                "claimed output indices do not form a permutation".into(),
            ));
        }
        seen[n] = true;
        perm.push(n as u16);
    }

    Ok(decode_data_in_permutation(&perm))
}

// ── Dummy scripts for the planner ────────────────────────────────────────────

/// `OP_HASH160 <20 zero bytes> OP_EQUAL`: stand-in P2SH output script used
/// for size estimation.
pub fn dummy_p2sh_script() -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_HASH160)
        .push_slice([0u8; 20])
        .push_opcode(OP_EQUAL)
        .into_script()
}

/// `OP_RETURN <40 zero bytes>`: stand-in nulldata script for size estimation.
pub fn dummy_nulldata_script() -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice([0u8; NULLDATA_BYTES])
        .into_script()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::random_bits;
    use bitcoin::{OutPoint, Witness};
    use proptest::prelude::*;

    fn blank_input() -> TxIn {
        TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::default(),
        }
    }

    fn blank_output() -> TxOut {
        TxOut {
            value: Amount::ZERO,
            script_pubkey: ScriptBuf::new(),
        }
    }

    #[test]
    fn capacity_known_values() {
        assert_eq!(embeddable_bits_in_values(100_000_000, 20), 448);
        assert_eq!(embeddable_bits_in_values(1_000_000_000_000_000, 39), 1744);
        assert_eq!(embeddable_bits_in_permutation(15), 40);
        assert_eq!(embeddable_bits_in_permutation(90), 458);
    }

    #[test]
    fn seq_nr_consumes_and_pads() {
        for len in [0usize, 7, 31, 32, 100] {
            let mut bits = random_bits(len);
            let mut expected = bits.clone();
            let mut slice = slice_bits(&mut expected, len.min(32));
            let pad_len = 32 - slice.len();
            pad_bits(&mut slice, pad_len);

            let mut input = blank_input();
            pack_into_seq_nr(&mut bits, &mut input);

            assert_eq!(unpack_from_seq_nr(&input), slice);
            assert_eq!(bits, expected);
        }
    }

    #[test]
    fn nulldata_round_trips() {
        for len in [0usize, 64, 319, 320, 500] {
            let mut bits = random_bits(len);
            let mut expected = bits.clone();
            let mut slice = slice_bits(&mut expected, len.min(320));
            let pad_len = 320 - slice.len();
            pad_bits(&mut slice, pad_len);

            let mut output = blank_output();
            pack_into_nulldata(&mut bits, &mut output);

            assert_eq!(output.value, Amount::ZERO);
            assert_eq!(unpack_from_nulldata(&output).unwrap(), slice);
            assert_eq!(bits, expected);
        }
    }

    #[test]
    fn nulldata_rejects_foreign_script() {
        let mut output = blank_output();
        output.script_pubkey = dummy_p2sh_script();
        assert!(unpack_from_nulldata(&output).is_err());
    }

    proptest! {
        // Pubkey synthesis is the slow path; keep the case count modest.
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn pubkey_round_trips(payload_bits in 1usize..=250, seed in any::<u64>()) {
            let _ = seed;
            let data = random_bits(payload_bits);
            let n_rand = (255 - payload_bits) as u32;

            let pk = encode_data_in_pubkey(&data, n_rand).unwrap();
            prop_assert_eq!(decode_data_in_pubkey(&pk, n_rand), data);
        }

        #[test]
        fn budget_split_round_trips(k in 2u16..=20, seed in any::<u64>()) {
            let _ = seed;
            let budget = 10_000_000u64;
            let lbound = 546u64;
            let width =
                embeddable_bits_in_values(budget - u64::from(k) * lbound, k);

            let mut bits = random_bits(width);
            let expected = bits.clone();

            let mut outs: Vec<TxOut> = (0..k).map(|_| blank_output()).collect();
            pack_into_budget_split(&mut bits, &mut outs, budget, lbound);

            prop_assert!(outs.iter().all(|o| o.value.to_sat() >= lbound));
            prop_assert_eq!(unpack_from_budget_split(&outs, lbound).unwrap(), expected);
            prop_assert!(bits.is_empty());
        }

        #[test]
        fn budget_claim_round_trips(k in 2u16..=20, seed in any::<u64>()) {
            let _ = seed;
            let width = embeddable_bits_in_permutation(k);
            let mut bits = random_bits(width);
            let expected = bits.clone();

            let mut ins: Vec<TxIn> = (0..k).map(|_| blank_input()).collect();
            pack_into_budget_claim(&mut bits, &mut ins);

            prop_assert_eq!(unpack_from_budget_claim(&ins).unwrap(), expected);
            prop_assert!(bits.is_empty());
        }
    }

    #[test]
    fn p2sh_round_trips_through_script_sig() {
        let keymap = crate::keymap::KeyMap::generate(4).unwrap();
        let mut store = Keystore::new();

        for len in [1usize, 200, 800, 2754, 3000] {
            let mut bits = random_bits(len);
            let expected_width = {
                // 4 suffix bits, then 250 per synthesized key, capped at 11.
                let after_suffix = len.saturating_sub(4);
                let extra = MAX_EXTRA_PUBKEYS.min(after_suffix.div_ceil(250));
                4 + extra * 250
            };
            let mut expected = bits.clone();
            let mut slice = slice_bits(&mut expected, len.min(expected_width));
            let pad_len = expected_width - slice.len();
            pad_bits(&mut slice, pad_len);

            let mut next_tx = Transaction {
                version: bitcoin::transaction::Version::ONE,
                lock_time: bitcoin::absolute::LockTime::ZERO,
                input: vec![blank_input()],
                output: vec![],
            };
            let mut out = blank_output();

            pack_into_p2sh(&mut bits, &keymap, &mut store, &mut out, &mut next_tx, 0, 5)
                .unwrap();

            assert!(out.script_pubkey.is_p2sh());
            assert_eq!(
                unpack_from_p2sh(&next_tx.input[0], 4, 5).unwrap(),
                slice,
                "payload length {len}"
            );
            assert_eq!(bits, expected);
        }
    }
}
