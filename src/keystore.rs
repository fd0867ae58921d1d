//! Local signer for the codec's own P2SH outputs.
//!
//! The wallet daemon cannot sign spends of the multisig scripts this codec
//! invents, so redeem scripts are registered here as they are built and the
//! matching private keys come from the keypair table. Signing is legacy
//! P2SH: the script-sig is `OP_0 <sig> <redeemScript>` with a single
//! SIGHASH_ALL signature from the first (table-drawn) public key.

use std::collections::HashMap;

use bitcoin::blockdata::script::{Builder, PushBytesBuf};
use bitcoin::hashes::Hash;
use bitcoin::sighash::SighashCache;
use bitcoin::{EcdsaSighashType, Script, ScriptBuf, ScriptHash, Transaction};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};

use crate::error::{BmsError, Result};

/// Length of the dummy DER signature (plus sighash byte) used for size
/// estimation before the chain is authorized.
const PLACEHOLDER_SIG_LEN: usize = 72;

/// Redeem-script and private-key registry backing the local signer.
#[derive(Default)]
pub struct Keystore {
    keys: HashMap<PublicKey, SecretKey>,
    scripts: HashMap<ScriptHash, ScriptBuf>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a private key under its compressed public key.
    pub fn add_key(&mut self, secp: &Secp256k1<All>, secret: SecretKey) {
        self.keys.insert(PublicKey::from_secret_key(secp, &secret), secret);
    }

    /// Registers a redeem script under its script hash.
    pub fn add_script(&mut self, redeem: ScriptBuf) {
        self.scripts.insert(redeem.script_hash(), redeem);
    }

    /// Number of registered redeem scripts.
    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    /// Looks up the redeem script behind a P2SH output script.
    pub fn redeem_script(&self, script_pubkey: &Script) -> Option<&ScriptBuf> {
        if !script_pubkey.is_p2sh() {
            return None;
        }
        let hash = ScriptHash::from_slice(&script_pubkey.as_bytes()[2..22]).ok()?;
        self.scripts.get(&hash)
    }

    /// Signs input `index` of `tx`, which spends the P2SH output
    /// `script_pubkey` of the preceding transaction.
    pub fn sign_p2sh_input(
        &self,
        secp: &Secp256k1<All>,
        tx: &mut Transaction,
        index: usize,
        script_pubkey: &Script,
    ) -> Result<()> {
        let redeem = self.redeem_script(script_pubkey).ok_or_else(|| {
            BmsError::SignatureFailure(format!(
                "no redeem script registered for output {script_pubkey}"
            ))
        })?;

        let secret = redeem_pubkeys(redeem)
            .into_iter()
            .find_map(|pk| self.keys.get(&pk))
            .ok_or_else(|| {
                BmsError::SignatureFailure("no private key for any redeem-script pubkey".into())
            })?;

        let sighash = SighashCache::new(&*tx)
            .legacy_signature_hash(index, redeem, EcdsaSighashType::All.to_u32())
            .map_err(|e| BmsError::SignatureFailure(e.to_string()))?;

        let msg = Message::from_digest(sighash.to_byte_array());
        let mut signature = secp.sign_ecdsa(&msg, secret).serialize_der().to_vec();
        signature.push(EcdsaSighashType::All.to_u32() as u8);

        tx.input[index].script_sig = p2sh_script_sig(&signature, redeem)?;
        Ok(())
    }
}

/// Script-sig with a dummy signature, byte-for-byte the shape of the final
/// one, so fee estimates made while building the chain stay valid after
/// authorization.
pub fn placeholder_script_sig(redeem: &Script) -> ScriptBuf {
    p2sh_script_sig(&[0u8; PLACEHOLDER_SIG_LEN], redeem)
        .expect("placeholder signature fits a push")
}

/// `OP_0 <sig> <redeemScript>` for a 1-of-M CHECKMULTISIG redeem script.
/// The leading OP_0 absorbs the CHECKMULTISIG off-by-one pop.
fn p2sh_script_sig(signature: &[u8], redeem: &Script) -> Result<ScriptBuf> {
    let sig_push = PushBytesBuf::try_from(signature.to_vec())
        .map_err(|e| BmsError::SignatureFailure(e.to_string()))?;
    let redeem_push = PushBytesBuf::try_from(redeem.as_bytes().to_vec())
        .map_err(|e| BmsError::SignatureFailure(e.to_string()))?;

    Ok(Builder::new()
        .push_opcode(bitcoin::opcodes::OP_0)
        .push_slice(sig_push)
        .push_slice(redeem_push)
        .into_script())
}

/// Compressed public keys pushed in a redeem script, in script order.
pub fn redeem_pubkeys(redeem: &Script) -> Vec<PublicKey> {
    redeem
        .instructions()
        .flatten()
        .filter_map(|inst| {
            inst.push_bytes()
                .and_then(|push| PublicKey::from_slice(push.as_bytes()).ok())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, TxIn, TxOut, Witness};

    fn one_of_two_redeem(secp: &Secp256k1<All>) -> (SecretKey, ScriptBuf) {
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        let (_, other) = secp.generate_keypair(&mut rand::thread_rng());

        let redeem = Builder::new()
            .push_int(1)
            .push_slice(public.serialize())
            .push_slice(other.serialize())
            .push_int(2)
            .push_opcode(bitcoin::opcodes::all::OP_CHECKMULTISIG)
            .into_script();
        (secret, redeem)
    }

    fn spend_tx() -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(546),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn signs_registered_p2sh_input() {
        let secp = Secp256k1::new();
        let (secret, redeem) = one_of_two_redeem(&secp);

        let mut store = Keystore::new();
        store.add_key(&secp, secret);
        store.add_script(redeem.clone());

        let script_pubkey = ScriptBuf::new_p2sh(&redeem.script_hash());
        let mut tx = spend_tx();
        store
            .sign_p2sh_input(&secp, &mut tx, 0, &script_pubkey)
            .unwrap();

        // Script-sig ends with the redeem script itself.
        let pushes: Vec<_> = tx.input[0]
            .script_sig
            .instructions()
            .flatten()
            .filter_map(|i| i.push_bytes().map(|p| p.as_bytes().to_vec()))
            .collect();
        assert_eq!(pushes.last().unwrap(), &redeem.as_bytes().to_vec());
    }

    #[test]
    fn unknown_script_is_a_signature_failure() {
        let secp = Secp256k1::new();
        let (_, redeem) = one_of_two_redeem(&secp);
        let store = Keystore::new();

        let script_pubkey = ScriptBuf::new_p2sh(&redeem.script_hash());
        let mut tx = spend_tx();
        assert!(matches!(
            store.sign_p2sh_input(&secp, &mut tx, 0, &script_pubkey),
            Err(BmsError::SignatureFailure(_))
        ));
    }

    #[test]
    fn placeholder_matches_final_shape() {
        let secp = Secp256k1::new();
        let (secret, redeem) = one_of_two_redeem(&secp);

        let mut store = Keystore::new();
        store.add_key(&secp, secret);
        store.add_script(redeem.clone());

        let placeholder = placeholder_script_sig(&redeem);

        let script_pubkey = ScriptBuf::new_p2sh(&redeem.script_hash());
        let mut tx = spend_tx();
        store
            .sign_p2sh_input(&secp, &mut tx, 0, &script_pubkey)
            .unwrap();

        // A real DER signature plus sighash byte is at most 72 bytes; the
        // placeholder assumes exactly that, so it never under-estimates.
        let real_len = tx.input[0].script_sig.len();
        assert!(placeholder.len() >= real_len);
        assert!(placeholder.len() - real_len <= 8);
    }
}
