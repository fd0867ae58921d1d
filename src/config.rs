//! Configuration file handling.
//!
//! `bms.conf` is a flat `Key = Value` file holding the wallet credentials,
//! the channel tunables, and the chain state of the last embedding. The
//! state keys are rewritten in place after a successful send; every other
//! line is preserved untouched.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use bitcoin::hashes::Hash;
use bitcoin::Txid;

use crate::error::{BmsError, Result};

/// Configuration file name.
pub const CONFIG_FILE: &str = "bms.conf";

/// Persisted Huffman table file name.
pub const HUFFCODE_FILE: &str = "huffcode.map";

/// Persisted keypair table file name.
pub const KEYPAIR_FILE: &str = "keypair.map";

/// Typed view of `bms.conf`.
#[derive(Clone, Debug)]
pub struct Config {
    pub wallet_user: String,
    pub wallet_password: String,
    pub wallet_ip: String,
    pub wallet_port: u16,
    /// Keypair-table suffix width `s`.
    pub keymap_suffix_bits: u32,
    /// Random bits `r` per synthesized pubkey.
    pub random_suffix_bits: u32,
    /// Fee rate in satoshi per started kilobyte.
    pub tx_fee_rate: u64,
    /// First transaction of the first-ever embedding; all zeros until then.
    pub state_first_tx: Txid,
    /// Last transaction of the most recent embedding.
    pub state_last_tx: Txid,
}

impl Config {
    /// Finds the configuration directory: `$HOME/.bms`, then a `config`
    /// directory under the working directory; the first match wins.
    pub fn locate_dir() -> Result<PathBuf> {
        let mut dir = None;

        if let Some(home) = std::env::var_os("HOME") {
            let candidate = PathBuf::from(home).join(".bms");
            if candidate.is_dir() {
                dir = Some(candidate);
            }
        }

        if dir.is_none() {
            let local = PathBuf::from("config");
            if local.is_dir() {
                dir = Some(local);
            }
        }

        dir.ok_or_else(|| {
            BmsError::Config("no configuration directory ($HOME/.bms or ./config)".into())
        })
    }

    /// Loads `bms.conf` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let text = fs::read_to_string(&path)
            .map_err(|e| BmsError::Config(format!("cannot read {}: {e}", path.display())))?;
        let entries = parse_entries(&text);

        Ok(Config {
            wallet_user: get(&entries, "Wallet.User")?.to_owned(),
            wallet_password: get(&entries, "Wallet.Password")?.to_owned(),
            wallet_ip: get(&entries, "Wallet.IP")?.to_owned(),
            wallet_port: parse(&entries, "Wallet.Port")?,
            keymap_suffix_bits: parse(&entries, "Keymap.SuffixBits")?,
            random_suffix_bits: parse(&entries, "Random.SuffixBits")?,
            tx_fee_rate: parse(&entries, "TxFeeRate")?,
            state_first_tx: parse(&entries, "State.FirstTx")?,
            state_last_tx: parse(&entries, "State.LastTx")?,
        })
    }

    /// URL of the wallet's JSON-RPC endpoint.
    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}", self.wallet_ip, self.wallet_port)
    }

    /// Records a successful send: `State.FirstTx` is set once (it stays at
    /// the first-ever embedding), `State.LastTx` on every send. The file in
    /// `dir` is rewritten with only those two lines changed.
    pub fn update_chain_state(&mut self, dir: &Path, first: Txid, last: Txid) -> Result<()> {
        if self.state_first_tx == Txid::all_zeros() {
            self.state_first_tx = first;
        }
        self.state_last_tx = last;

        let path = dir.join(CONFIG_FILE);
        let text = fs::read_to_string(&path)
            .map_err(|e| BmsError::Config(format!("cannot read {}: {e}", path.display())))?;

        let rewritten: Vec<String> = text
            .lines()
            .map(|line| {
                let key = line.split('=').next().unwrap_or("").trim();
                match key {
                    "State.FirstTx" => format!("State.FirstTx = {}", self.state_first_tx),
                    "State.LastTx" => format!("State.LastTx = {}", self.state_last_tx),
                    _ => line.to_owned(),
                }
            })
            .collect();

        fs::write(&path, rewritten.join("\n") + "\n")?;
        Ok(())
    }
}

fn parse_entries(text: &str) -> HashMap<String, String> {
    let mut entries = HashMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            entries
                .entry(key.trim().to_owned())
                .or_insert_with(|| value.trim().to_owned());
        }
    }

    entries
}

fn get<'a>(entries: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    entries
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| BmsError::Config(format!("missing key {key}")))
}

fn parse<T: std::str::FromStr>(entries: &HashMap<String, String>, key: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    get(entries, key)?
        .parse()
        .map_err(|e| BmsError::Config(format!("malformed value for {key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# BMS configuration
Wallet.User = rpcuser
Wallet.Password = rpcpass
Wallet.IP = 127.0.0.1
Wallet.Port = 8332

Keymap.SuffixBits = 8
Random.SuffixBits = 5
TxFeeRate = 10000
State.FirstTx = 0000000000000000000000000000000000000000000000000000000000000000
State.LastTx = 0000000000000000000000000000000000000000000000000000000000000000
";

    fn write_sample(dir: &Path) {
        fs::write(dir.join(CONFIG_FILE), SAMPLE).unwrap();
    }

    #[test]
    fn loads_all_keys() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.wallet_user, "rpcuser");
        assert_eq!(config.wallet_port, 8332);
        assert_eq!(config.keymap_suffix_bits, 8);
        assert_eq!(config.random_suffix_bits, 5);
        assert_eq!(config.tx_fee_rate, 10_000);
        assert_eq!(config.state_first_tx, Txid::all_zeros());
        assert_eq!(config.rpc_url(), "http://127.0.0.1:8332");
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "Wallet.User = x\n").unwrap();

        assert!(matches!(
            Config::load(dir.path()),
            Err(BmsError::Config(_))
        ));
    }

    #[test]
    fn state_update_sets_first_only_once() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());
        let mut config = Config::load(dir.path()).unwrap();

        let a: Txid = "1111111111111111111111111111111111111111111111111111111111111111"
            .parse()
            .unwrap();
        let b: Txid = "2222222222222222222222222222222222222222222222222222222222222222"
            .parse()
            .unwrap();
        let c: Txid = "3333333333333333333333333333333333333333333333333333333333333333"
            .parse()
            .unwrap();

        config.update_chain_state(dir.path(), a, b).unwrap();
        assert_eq!(config.state_first_tx, a);
        assert_eq!(config.state_last_tx, b);

        // A later send moves only the last-transaction pointer.
        config.update_chain_state(dir.path(), c, c).unwrap();
        assert_eq!(config.state_first_tx, a);
        assert_eq!(config.state_last_tx, c);

        let reloaded = Config::load(dir.path()).unwrap();
        assert_eq!(reloaded.state_first_tx, a);
        assert_eq!(reloaded.state_last_tx, c);

        // Non-state lines survive the rewrite.
        let text = fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(text.contains("# BMS configuration"));
        assert!(text.contains("Wallet.User = rpcuser"));
    }
}
