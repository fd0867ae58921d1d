//! Blocking JSON-RPC client for the Bitcoin Core wallet.
//!
//! The codec treats the wallet as an external collaborator: unspent-output
//! listing, wallet-side signing of the first transaction, broadcast, and
//! block inspection for the forward chain reader all go through here.

use bitcoin::{BlockHash, Txid};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{BmsError, Result};

/// One entry of `listunspent`.
#[derive(Debug, Deserialize)]
pub struct UnspentOutput {
    pub txid: Txid,
    pub vout: u32,
    /// Amount in whole BTC, as the wallet reports it.
    pub amount: f64,
}

/// Result of `signrawtransactionwithwallet`.
#[derive(Debug, Deserialize)]
pub struct SignedTransaction {
    pub hex: String,
    pub complete: bool,
}

/// Verbose `getrawtransaction` result, trimmed to what the readers need.
#[derive(Debug, Deserialize)]
pub struct RawTransaction {
    pub hex: String,
    pub blockhash: Option<BlockHash>,
}

/// `getblock` result, trimmed to the transaction list and forward link.
#[derive(Debug, Deserialize)]
pub struct BlockInfo {
    pub tx: Vec<Txid>,
    pub nextblockhash: Option<BlockHash>,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    message: String,
}

/// Wallet RPC connection.
pub struct Wallet {
    client: reqwest::blocking::Client,
    url: String,
    user: String,
    password: String,
}

impl Wallet {
    /// Connects to the wallet endpoint named in the configuration.
    pub fn new(config: &Config) -> Self {
        Wallet {
            client: reqwest::blocking::Client::new(),
            url: config.rpc_url(),
            user: config.wallet_user.clone(),
            password: config.wallet_password.clone(),
        }
    }

    fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "bms",
            "method": method,
            "params": params,
        });

        tracing::debug!(method, "wallet rpc call");

        let resp: RpcResponse<T> = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|e| BmsError::Rpc(format!("{method}: {e}")))?
            .json()
            .map_err(|e| BmsError::Rpc(format!("{method}: {e}")))?;

        if let Some(err) = resp.error {
            return Err(BmsError::Rpc(format!("{method}: {}", err.message)));
        }

        resp.result
            .ok_or_else(|| BmsError::Rpc(format!("{method}: empty result")))
    }

    /// Like [`Wallet::call`] for methods whose result is null.
    fn call_void(&self, method: &str, params: serde_json::Value) -> Result<()> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "bms",
            "method": method,
            "params": params,
        });

        let resp: RpcResponse<serde_json::Value> = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|e| BmsError::Rpc(format!("{method}: {e}")))?
            .json()
            .map_err(|e| BmsError::Rpc(format!("{method}: {e}")))?;

        match resp.error {
            Some(err) => Err(BmsError::Rpc(format!("{method}: {}", err.message))),
            None => Ok(()),
        }
    }

    /// Whether the daemon answers at all.
    pub fn is_running(&self) -> bool {
        self.call::<u64>("getblockcount", serde_json::json!([])).is_ok()
    }

    /// Spendable balance in whole BTC.
    pub fn get_balance(&self) -> Result<f64> {
        self.call("getbalance", serde_json::json!([]))
    }

    /// All unspent outputs of the wallet.
    pub fn list_unspent(&self) -> Result<Vec<UnspentOutput>> {
        self.call("listunspent", serde_json::json!([]))
    }

    /// A fresh receive address.
    pub fn get_new_address(&self) -> Result<String> {
        self.call("getnewaddress", serde_json::json!([]))
    }

    /// Signs a raw transaction with the wallet's own keys.
    pub fn sign_raw_transaction(&self, tx_hex: &str) -> Result<SignedTransaction> {
        self.call("signrawtransactionwithwallet", serde_json::json!([tx_hex]))
    }

    /// Broadcasts a raw transaction.
    pub fn send_raw_transaction(&self, tx_hex: &str) -> Result<Txid> {
        self.call("sendrawtransaction", serde_json::json!([tx_hex]))
    }

    /// Fetches a transaction with its containing block, if confirmed.
    pub fn get_raw_transaction(&self, txid: Txid) -> Result<RawTransaction> {
        self.call("getrawtransaction", serde_json::json!([txid, true]))
    }

    /// Fetches a block's transaction list and forward link.
    pub fn get_block(&self, hash: &BlockHash) -> Result<BlockInfo> {
        self.call("getblock", serde_json::json!([hash]))
    }

    /// Unlocks the wallet for `timeout_secs` seconds.
    pub fn unlock_wallet(&self, password: &str, timeout_secs: u64) -> Result<()> {
        self.call_void(
            "walletpassphrase",
            serde_json::json!([password, timeout_secs]),
        )
    }

    /// Relocks the wallet.
    pub fn lock_wallet(&self) -> Result<()> {
        self.call_void("walletlock", serde_json::json!([]))
    }
}
