//! Suffix-indexed keypair table.
//!
//! The first pubkey of every payload redeem script is drawn from this table:
//! the next `n` payload bits select the entry whose compressed public key
//! ends in exactly those `n` bits, so the reader can recover them from the
//! key itself while the writer retains the matching private key for the
//! spend. The table is ground once by rejection sampling and persisted.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

use crate::error::{BmsError, Result};
use crate::types::{data_to_bits, DataBits};

/// Grind budget: attempts per suffix slot before giving up.
const ATTEMPTS_PER_SLOT: u64 = 4096;

/// Map from an `n`-bit pubkey suffix to the private key behind it.
///
/// Invariant: every `n`-bit pattern is present exactly once, and the
/// compressed public key of each entry ends in its map key.
pub struct KeyMap {
    suffix_bits: u32,
    keys: BTreeMap<DataBits, SecretKey>,
}

/// Trailing `n` bits of a compressed public key.
pub fn pubkey_suffix(pubkey: &PublicKey, n_bits: u32) -> DataBits {
    let bits = data_to_bits(&pubkey.serialize());
    bits[bits.len() - n_bits as usize..].to_vec()
}

impl KeyMap {
    /// The configured suffix width `n`.
    pub fn suffix_bits(&self) -> u32 {
        self.suffix_bits
    }

    /// Number of entries (always `2^n` for a generated table).
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The private key whose compressed pubkey ends in `suffix`.
    pub fn get(&self, suffix: &[bool]) -> Option<&SecretKey> {
        self.keys.get(suffix)
    }

    /// Iterates over `(suffix, secret)` entries in suffix order.
    pub fn iter(&self) -> impl Iterator<Item = (&DataBits, &SecretKey)> {
        self.keys.iter()
    }

    /// Grinds a full table for `n`-bit suffixes.
    ///
    /// Workers on the rayon pool draw random keypairs, each from its own
    /// CSPRNG, and publish them under the suffix of the compressed pubkey
    /// until all `2^n` slots are filled. The total attempt count is capped
    /// so a pathological grind surfaces [`BmsError::KeypairGenFailed`]
    /// instead of spinning forever.
    pub fn generate(suffix_bits: u32) -> Result<Self> {
        let n_slots = 1usize << suffix_bits;
        let budget = n_slots as u64 * ATTEMPTS_PER_SLOT;

        let keys = Mutex::new(BTreeMap::new());
        let attempts = AtomicU64::new(0);
        let started = Instant::now();

        let workers = rayon::current_num_threads();
        (0..workers).into_par_iter().try_for_each(|_| {
            let secp = Secp256k1::new();
            let mut rng = StdRng::from_entropy();

            loop {
                if attempts.fetch_add(1, Ordering::Relaxed) >= budget {
                    return Err(BmsError::KeypairGenFailed);
                }

                let (secret, public) = secp.generate_keypair(&mut rng);
                let suffix = pubkey_suffix(&public, suffix_bits);

                let mut guard = keys.lock().expect("keymap grind worker panicked");
                if guard.len() >= n_slots {
                    return Ok(());
                }
                guard.entry(suffix).or_insert(secret);
                if guard.len() >= n_slots {
                    return Ok(());
                }
            }
        })?;

        let keys = keys.into_inner().expect("keymap grind worker panicked");
        tracing::info!(
            suffix_bits,
            entries = keys.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "keypair table generated"
        );

        Ok(KeyMap { suffix_bits, keys })
    }

    /// Persists the table as a bincode archive of
    /// `(is_compressed, secret_scalar)` records keyed by suffix bits.
    pub fn save(&self, path: &Path) -> Result<()> {
        let records: BTreeMap<DataBits, (bool, [u8; 32])> = self
            .keys
            .iter()
            .map(|(suffix, secret)| (suffix.clone(), (true, secret.secret_bytes())))
            .collect();

        let archive =
            bincode::serialize(&records).map_err(|e| BmsError::Config(e.to_string()))?;
        fs::write(path, archive)?;
        Ok(())
    }

    /// Loads a table persisted with [`KeyMap::save`].
    ///
    /// The compression flag is carried for format compatibility; every key
    /// this codec produces is compressed.
    pub fn load(path: &Path) -> Result<Self> {
        let archive = fs::read(path)?;
        let records: BTreeMap<DataBits, (bool, [u8; 32])> =
            bincode::deserialize(&archive).map_err(|e| BmsError::Config(e.to_string()))?;

        let mut suffix_bits = 0;
        let mut keys = BTreeMap::new();
        for (suffix, (_compressed, scalar)) in records {
            suffix_bits = suffix.len() as u32;
            let secret = SecretKey::from_slice(&scalar)
                .map_err(|e| BmsError::Config(format!("corrupt keypair record: {e}")))?;
            keys.insert(suffix, secret);
        }

        Ok(KeyMap { suffix_bits, keys })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_table_is_complete_and_consistent() {
        let suffix_bits = 8;
        let keymap = KeyMap::generate(suffix_bits).unwrap();
        let secp = Secp256k1::new();

        assert_eq!(keymap.len(), 1 << suffix_bits);

        for (suffix, secret) in keymap.iter() {
            let public = PublicKey::from_secret_key(&secp, secret);
            assert_eq!(&pubkey_suffix(&public, suffix_bits), suffix);
        }
    }

    #[test]
    fn table_round_trips_through_disk() {
        let keymap = KeyMap::generate(4).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keypair.map");

        keymap.save(&path).unwrap();
        let loaded = KeyMap::load(&path).unwrap();

        assert_eq!(loaded.suffix_bits(), 4);
        assert_eq!(loaded.len(), keymap.len());
        for (suffix, secret) in keymap.iter() {
            assert_eq!(loaded.get(suffix).unwrap(), secret);
        }
    }
}
