//! Chain planning, assembly and extraction.
//!
//! The planner picks, per transaction, the number of P2SH outputs and
//! whether to spend an output slot on nulldata, weighing fee cost against
//! embedding capacity. The builder iterates the planner until the payload is
//! exhausted, threading the remaining budget forward and terminating the
//! chain with a single change output; the extractor walks the finished chain
//! in the exact inverse channel order.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, PubkeyHash, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use secp256k1::{All, Secp256k1};

use crate::config::Config;
use crate::embed::channels::{
    dummy_nulldata_script, dummy_p2sh_script, embeddable_bits_in_permutation,
    embeddable_bits_in_values, pack_into_budget_claim, pack_into_budget_split,
    pack_into_nulldata, pack_into_p2sh, pack_into_seq_nr, unpack_from_budget_claim,
    unpack_from_budget_split, unpack_from_nulldata, unpack_from_p2sh, unpack_from_seq_nr,
};
use crate::error::{BmsError, Result};
use crate::keymap::KeyMap;
use crate::keystore::Keystore;
use crate::types::{
    DataBits, InitInputs, TransactionChain, DUST_THRESHOLD, MAX_CHAIN_DEPTH,
    MAX_EXTRA_PUBKEYS, MAX_SCRIPT_HASH_OUTPUTS, NULLDATA_BITS, SEQNR_BITS,
};
use crate::wallet::Wallet;

/// The tunables the codec core needs; carved out of [`Config`] so chains can
/// be built and read without a wallet or config file in reach.
#[derive(Clone, Copy, Debug)]
pub struct ChainParams {
    /// Keypair-table suffix width `s`.
    pub suffix_bits: u32,
    /// Random bits `r` per synthesized pubkey.
    pub rand_suffix_bits: u32,
    /// Fee rate in satoshi per started kilobyte.
    pub fee_rate: u64,
}

impl From<&Config> for ChainParams {
    fn from(config: &Config) -> Self {
        ChainParams {
            suffix_bits: config.keymap_suffix_bits,
            rand_suffix_bits: config.random_suffix_bits,
            fee_rate: config.tx_fee_rate,
        }
    }
}

/// Planner output for one transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxParameters {
    /// Number of P2SH output/input pairs.
    pub n_script_hash: usize,
    /// Whether a nulldata output is emitted (0 or 1).
    pub n_nulldata: usize,
    /// Fee of the transaction at its estimated final size.
    pub n_fees: u64,
}

// ── Fees ─────────────────────────────────────────────────────────────────────

/// Fee for one transaction: `rate * ceil(serialized_size / 1000)`.
pub fn transaction_fee(fee_rate: u64, tx: &Transaction) -> u64 {
    let size = serialize(tx).len() as u64;
    fee_rate * size.div_ceil(1000)
}

/// Summed fee over a chain.
pub fn chain_fee(fee_rate: u64, chain: &[Transaction]) -> u64 {
    chain.iter().map(|tx| transaction_fee(fee_rate, tx)).sum()
}

// ── Planner ──────────────────────────────────────────────────────────────────

/// Picks `(n_script_hash, n_nulldata, fees)` for the transaction currently
/// holding `tx`'s inputs, given the remaining payload and budget.
///
/// Sweeps the P2SH count from the hard maximum down to 1 and keeps the last
/// candidate whose capacity still covers the payload; smaller transactions
/// cost less, and the maximum is kept when nothing fits so the chain
/// advances by one link. The nulldata decision for a single P2SH output is
/// made against the capacity total before nulldata itself is counted --
/// preserved from the reference behavior.
pub fn optimize_params(
    params: &ChainParams,
    tx: &Transaction,
    n_bits: usize,
    budget: u64,
) -> TxParameters {
    let bits_first_key = params.suffix_bits as usize;
    let bits_extra_key = 255 - params.rand_suffix_bits as usize;

    if n_bits == 0 {
        return TxParameters {
            n_script_hash: 0,
            n_nulldata: 0,
            n_fees: transaction_fee(params.fee_rate, tx),
        };
    }

    let dummy_p2sh = dummy_p2sh_script();
    let dummy_nulldata = dummy_nulldata_script();

    let mut n_script_hash = MAX_SCRIPT_HASH_OUTPUTS;
    let mut chosen = TxParameters::default();

    loop {
        let mut tmp = tx.clone();
        tmp.output.clear();
        for _ in 0..n_script_hash {
            tmp.output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: dummy_p2sh.clone(),
            });
        }

        let mut total = n_script_hash * (bits_first_key + MAX_EXTRA_PUBKEYS * bits_extra_key);
        total += n_script_hash * SEQNR_BITS;

        let n_nulldata = if (n_script_hash == 1 && n_bits > total) || n_script_hash >= 2 {
            tmp.output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: dummy_nulldata.clone(),
            });
            total += NULLDATA_BITS;
            1
        } else {
            0
        };

        let n_fees = transaction_fee(params.fee_rate, &tmp);

        if n_script_hash >= 2 {
            if budget >= n_fees {
                total += embeddable_bits_in_values(budget - n_fees, n_script_hash as u16);
            }
            total += embeddable_bits_in_permutation(n_script_hash as u16);
        }

        if total >= n_bits || n_script_hash == MAX_SCRIPT_HASH_OUTPUTS {
            chosen = TxParameters {
                n_script_hash,
                n_nulldata,
                n_fees,
            };
            n_script_hash -= 1;
        }

        if total < n_bits || n_script_hash == 0 {
            break;
        }
    }

    chosen
}

// ── Builder ──────────────────────────────────────────────────────────────────

fn empty_transaction() -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![],
        output: vec![],
    }
}

fn placeholder_input() -> TxIn {
    TxIn {
        previous_output: OutPoint::null(),
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::default(),
    }
}

fn placeholder_output() -> TxOut {
    TxOut {
        value: Amount::ZERO,
        script_pubkey: ScriptBuf::new(),
    }
}

/// Embeds `data` into a fresh transaction chain.
///
/// The first transaction spends `prev_out`; every later transaction spends
/// its predecessor's P2SH outputs; the final transaction pays the remaining
/// budget to `change_script`. Inputs of the returned chain still reference
/// their predecessors by the null txid -- linkage and signatures are applied
/// by [`authorize_transactions`].
pub fn embed_data(
    params: &ChainParams,
    keymap: &KeyMap,
    store: &mut Keystore,
    data: &DataBits,
    mut budget: u64,
    prev_out: &[OutPoint],
    change_script: &Script,
) -> Result<TransactionChain> {
    let mut txs = vec![empty_transaction(), empty_transaction()];
    let mut bits = data.clone();

    for point in prev_out {
        let mut input = placeholder_input();
        input.previous_output = *point;
        txs[0].input.push(input);
    }

    let mut idx = 0;
    while !bits.is_empty() {
        let TxParameters {
            n_script_hash,
            n_nulldata,
            n_fees,
        } = optimize_params(params, &txs[idx], bits.len(), budget);

        let (head, tail) = txs.split_at_mut(idx + 1);
        let current = &mut head[idx];
        let next = &mut tail[0];

        for _ in 0..n_script_hash {
            current.output.insert(0, placeholder_output());
            next.input.insert(0, placeholder_input());
        }
        for (j, input) in next.input.iter_mut().enumerate().take(n_script_hash) {
            input.previous_output.vout = j as u32;
        }

        if current.output.len() == 1 {
            current.output[0].value = Amount::from_sat(budget.saturating_sub(n_fees));
            next.input[0].previous_output.vout = 0;
        } else if current.output.len() >= 2 {
            if budget >= n_fees {
                pack_into_budget_split(
                    &mut bits,
                    &mut current.output,
                    budget - n_fees,
                    DUST_THRESHOLD,
                );
            }
            pack_into_budget_claim(&mut bits, &mut next.input);
        }

        if n_nulldata == 1 {
            current.output.push(placeholder_output());
            let last = current.output.last_mut().expect("output just pushed");
            pack_into_nulldata(&mut bits, last);
        }

        for j in 0..n_script_hash {
            let n = next.input[j].previous_output.vout as usize;
            pack_into_p2sh(
                &mut bits,
                keymap,
                store,
                &mut current.output[n],
                next,
                j,
                params.rand_suffix_bits,
            )?;
            pack_into_seq_nr(&mut bits, &mut next.input[j]);
        }

        budget = budget.saturating_sub(n_fees);

        if bits.is_empty() {
            break;
        }
        if txs.len() >= MAX_CHAIN_DEPTH {
            return Err(BmsError::CapacityExceeded {
                max_depth: MAX_CHAIN_DEPTH,
            });
        }
        txs.push(empty_transaction());
        idx += 1;
    }

    // Terminator: a single change output funded by what the last planner
    // round left over, at the terminator's own fee.
    let last = optimize_params(params, &txs[idx + 1], 0, budget);
    txs[idx + 1].output.push(TxOut {
        value: Amount::from_sat(budget.saturating_sub(last.n_fees)),
        script_pubkey: change_script.to_owned(),
    });

    Ok(txs)
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Recovers the embedded bit stream from a chain, inverting the builder's
/// channel order exactly. The result may carry trailing zero padding from
/// channel alignment; the decompression layer discards it.
pub fn extract_data(params: &ChainParams, chain: &[Transaction]) -> Result<DataBits> {
    let mut bits = DataBits::new();

    for idx in 0..chain.len().saturating_sub(1) {
        let mut outputs = chain[idx].output.clone();
        let next_inputs = &chain[idx + 1].input;

        let n_nulldata = usize::from(outputs.len() >= 2);
        let n_script_hash = outputs.len() - n_nulldata;

        let nulldata_out = if n_nulldata == 1 { outputs.pop() } else { None };

        if n_script_hash >= 2 {
            bits.extend(unpack_from_budget_split(&outputs, DUST_THRESHOLD)?);
            bits.extend(unpack_from_budget_claim(next_inputs)?);
        }

        if let Some(out) = nulldata_out {
            bits.extend(unpack_from_nulldata(&out)?);
        }

        for j in 0..n_script_hash {
            let input = next_inputs.get(j).ok_or_else(|| {
                BmsError::ChannelDecode(format!(
                    "transaction {} claims {} outputs but its successor has only {} inputs",
                    idx,
                    n_script_hash,
                    next_inputs.len()
                ))
            })?;

            bits.extend(unpack_from_p2sh(
                input,
                params.suffix_bits,
                params.rand_suffix_bits,
            )?);
            bits.extend(unpack_from_seq_nr(input));
        }
    }

    Ok(bits)
}

// ── Budget ───────────────────────────────────────────────────────────────────

/// Minimum budget to embed `n_bits`: the fee of a dry-run chain over an
/// all-zero payload, plus two fee units of headroom.
pub fn minimum_budget(params: &ChainParams, keymap: &KeyMap, n_bits: usize) -> Result<u64> {
    let zeros = vec![false; n_bits];
    let change = ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([0u8; 20]));

    let mut scratch = Keystore::new();
    let chain = embed_data(params, keymap, &mut scratch, &zeros, 0, &[], &change)?;

    Ok(chain_fee(params.fee_rate, &chain) + 2 * params.fee_rate)
}

/// Selects unspent outputs summing to at least `n_min` satoshi.
///
/// Output 0 of the previously recorded last transaction is preferred as the
/// first input so consecutive embeddings stay connected; the rest are taken
/// in descending amount order.
pub fn select_inputs(wallet: &Wallet, last_tx: Txid, n_min: u64) -> Result<InitInputs> {
    let have = (wallet.get_balance()? * 1e8) as u64;
    if have < n_min {
        return Err(BmsError::InsufficientFunds { need: n_min, have });
    }

    let mut unspent = wallet.list_unspent()?;
    unspent.sort_by(|a, b| b.amount.total_cmp(&a.amount));

    let mut inputs = InitInputs::default();

    if let Some(pos) = unspent.iter().position(|u| u.txid == last_tx && u.vout == 0) {
        let utxo = unspent.remove(pos);
        inputs.budget += (utxo.amount * 1e8) as u64;
        inputs.utxo.push(OutPoint {
            txid: utxo.txid,
            vout: utxo.vout,
        });
    }

    for utxo in unspent {
        if inputs.budget >= n_min {
            break;
        }
        inputs.budget += (utxo.amount * 1e8) as u64;
        inputs.utxo.push(OutPoint {
            txid: utxo.txid,
            vout: utxo.vout,
        });
    }

    Ok(inputs)
}

// ── Authorization and broadcast ──────────────────────────────────────────────

/// Links and signs the whole chain: the first transaction through the wallet
/// (it spends wallet coins), every later input through the local keystore
/// over the predecessor's P2SH outputs.
pub fn authorize_transactions(
    secp: &Secp256k1<All>,
    store: &Keystore,
    wallet: &Wallet,
    chain: &mut TransactionChain,
) -> Result<()> {
    let signed = wallet.sign_raw_transaction(&hex::encode(serialize(&chain[0])))?;
    if !signed.complete {
        return Err(BmsError::SignatureFailure(
            "wallet returned an incomplete signature set".into(),
        ));
    }
    chain[0] = decode_tx_hex(&signed.hex)
        .map_err(|e| BmsError::Rpc(format!("undecodable signed transaction: {e}")))?;

    for i in 1..chain.len() {
        let prev_txid = chain[i - 1].txid();
        let prev_outputs = chain[i - 1].output.clone();

        for input in &mut chain[i].input {
            input.previous_output.txid = prev_txid;
        }

        for j in 0..chain[i].input.len() {
            let n = chain[i].input[j].previous_output.vout as usize;
            let script_pubkey = prev_outputs
                .get(n)
                .ok_or_else(|| {
                    BmsError::SignatureFailure(format!(
                        "input {j} of link {i} claims missing output {n}"
                    ))
                })?
                .script_pubkey
                .clone();

            store.sign_p2sh_input(secp, &mut chain[i], j, &script_pubkey)?;
        }
    }

    Ok(())
}

fn decode_tx_hex(tx_hex: &str) -> std::result::Result<Transaction, String> {
    let raw = hex::decode(tx_hex).map_err(|e| e.to_string())?;
    deserialize(&raw).map_err(|e| e.to_string())
}

/// Broadcasts the chain in order; each transaction references the previous.
pub fn send_transactions(wallet: &Wallet, chain: &[Transaction]) -> Result<()> {
    for tx in chain {
        let txid = wallet.send_raw_transaction(&hex::encode(serialize(tx)))?;
        tracing::debug!(%txid, "transaction broadcast");
    }
    Ok(())
}

// ── Chain readers ────────────────────────────────────────────────────────────

fn fetch_transaction(wallet: &Wallet, txid: Txid) -> Result<Transaction> {
    let raw = wallet
        .get_raw_transaction(txid)
        .map_err(|e| BmsError::ChainLinkBroken(format!("cannot fetch {txid}: {e}")))?;
    decode_tx_hex(&raw.hex)
        .map_err(|e| BmsError::ChainLinkBroken(format!("undecodable transaction {txid}: {e}")))
}

/// Walks the chain backwards from `tx_end` to `tx_begin` and splits the
/// result into one subchain per embedded message.
///
/// A subchain ends at a transaction with a single non-P2SH output -- the
/// change-only terminator shape.
pub fn read_transactions(
    wallet: &Wallet,
    tx_begin: Txid,
    tx_end: Txid,
) -> Result<Vec<TransactionChain>> {
    let mut chain = TransactionChain::new();
    let mut cursor = tx_end;

    while cursor != tx_begin {
        let tx = fetch_transaction(wallet, cursor)?;
        cursor = tx
            .input
            .first()
            .ok_or_else(|| {
                BmsError::ChainLinkBroken(format!("{} has no inputs to follow", tx.txid()))
            })?
            .previous_output
            .txid;
        chain.push(tx);
    }

    chain.push(fetch_transaction(wallet, tx_begin)?);
    chain.reverse();

    Ok(split_chain(chain, |tx| {
        tx.output.len() == 1 && !tx.output[0].script_pubkey.is_p2sh()
    }))
}

/// Walks the chain forwards from `tx_begin` through the next `n_blocks`
/// blocks, collecting each transaction that spends the current tip, and
/// splits on single-output transactions.
pub fn read_transactions_forward(
    wallet: &Wallet,
    tx_begin: Txid,
    n_blocks: u32,
) -> Result<Vec<TransactionChain>> {
    let raw = wallet
        .get_raw_transaction(tx_begin)
        .map_err(|e| BmsError::ChainLinkBroken(format!("cannot fetch {tx_begin}: {e}")))?;

    let mut chain = vec![decode_tx_hex(&raw.hex)
        .map_err(|e| BmsError::ChainLinkBroken(format!("undecodable transaction: {e}")))?];
    let mut block_hash = raw.blockhash.ok_or_else(|| {
        BmsError::ChainLinkBroken(format!("{tx_begin} is not in a block yet"))
    })?;

    let mut tip = tx_begin;
    let mut pool: Vec<Transaction> = Vec::new();

    for _ in 0..n_blocks {
        let block = wallet.get_block(&block_hash)?;
        for txid in block.tx {
            pool.push(fetch_transaction(wallet, txid)?);
        }

        while let Some(pos) = pool.iter().position(|t| {
            t.input
                .first()
                .is_some_and(|i| i.previous_output.txid == tip)
        }) {
            let tx = pool.remove(pos);
            tip = tx.txid();
            chain.push(tx);
        }

        block_hash = match block.nextblockhash {
            Some(hash) => hash,
            None => break,
        };
    }

    Ok(split_chain(chain, |tx| tx.output.len() == 1))
}

fn split_chain(
    chain: TransactionChain,
    is_terminator: impl Fn(&Transaction) -> bool,
) -> Vec<TransactionChain> {
    let mut chains = Vec::new();
    let mut current = TransactionChain::new();

    for tx in chain {
        let done = is_terminator(&tx);
        current.push(tx);
        if done {
            chains.push(std::mem::take(&mut current));
        }
    }

    chains
}
