//! Process-wide context: configuration and persisted code tables.
//!
//! Loaded once at startup and immutable afterwards. Codec functions take the
//! pieces they need as parameters instead of reaching into ambient state.

use std::path::PathBuf;

use secp256k1::Secp256k1;

use crate::config::{Config, HUFFCODE_FILE, KEYPAIR_FILE};
use crate::error::{BmsError, Result};
use crate::huffman::HuffmanCode;
use crate::keymap::KeyMap;
use crate::keystore::Keystore;

pub struct Context {
    /// Directory holding `bms.conf` and the persisted tables.
    pub dir: PathBuf,
    pub config: Config,
    pub huffcode: HuffmanCode,
    pub keymap: KeyMap,
    /// Local signer, pre-seeded with every keypair-table private key.
    pub store: Keystore,
}

impl Context {
    /// Loads configuration and tables from `dir`, or from the default
    /// location when none is given.
    ///
    /// A missing keypair table is ground and persisted on the spot; a
    /// missing Huffman table is an error, since encoder and decoder must
    /// share one table verbatim.
    pub fn load(dir: Option<PathBuf>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir,
            None => Config::locate_dir()?,
        };
        let config = Config::load(&dir)?;

        let huffcode_path = dir.join(HUFFCODE_FILE);
        let huffcode = HuffmanCode::load(&huffcode_path).map_err(|e| {
            BmsError::Config(format!(
                "cannot load {}: {e}; generate one with `bms train`",
                huffcode_path.display()
            ))
        })?;

        let keypair_path = dir.join(KEYPAIR_FILE);
        let keymap = if keypair_path.exists() {
            KeyMap::load(&keypair_path)?
        } else {
            tracing::info!(
                suffix_bits = config.keymap_suffix_bits,
                "no keypair table on disk, grinding one"
            );
            let keymap = KeyMap::generate(config.keymap_suffix_bits)?;
            keymap.save(&keypair_path)?;
            keymap
        };

        if keymap.suffix_bits() != config.keymap_suffix_bits {
            return Err(BmsError::Config(format!(
                "keypair table was built for {}-bit suffixes but Keymap.SuffixBits is {}",
                keymap.suffix_bits(),
                config.keymap_suffix_bits
            )));
        }

        let secp = Secp256k1::new();
        let mut store = Keystore::new();
        for (_, secret) in keymap.iter() {
            store.add_key(&secp, *secret);
        }

        Ok(Context {
            dir,
            config,
            huffcode,
            keymap,
            store,
        })
    }
}
