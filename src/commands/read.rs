//! Read command: fetch a recorded chain and print the embedded messages.

use std::path::PathBuf;

use anyhow::{ensure, Result};
use bitcoin::Txid;

use crate::commands::prompt;
use crate::context::Context;
use crate::embed::{extract_data, read_transactions, ChainParams};
use crate::wallet::Wallet;

#[derive(clap::Parser, Debug, Default)]
pub struct ReadOpts {
    /// First transaction ID of the chain; prompted for when absent
    #[arg(long)]
    pub first: Option<Txid>,

    /// Last transaction ID of the chain; prompted for when absent
    #[arg(long)]
    pub last: Option<Txid>,
}

pub fn run_read(config_dir: Option<PathBuf>, o: ReadOpts) -> Result<()> {
    let ctx = Context::load(config_dir)?;
    let wallet = Wallet::new(&ctx.config);
    ensure!(
        wallet.is_running(),
        "bitcoin daemon is not reachable at {}",
        ctx.config.rpc_url()
    );

    let first = match o.first {
        Some(txid) => txid,
        None => prompt("First transaction ID: ")?.parse()?,
    };
    let last = match o.last {
        Some(txid) => txid,
        None => prompt("Last transaction ID: ")?.parse()?,
    };

    let chains = read_transactions(&wallet, first, last)?;
    eprintln!(
        "[INFO] Successfully extracted {} message(s)!",
        chains.len()
    );

    let params = ChainParams::from(&ctx.config);
    for chain in &chains {
        let bits = extract_data(&params, chain)?;
        let message = ctx.huffcode.decompress(&bits)?;

        println!("[INFO] Message ({} characters)", message.len());
        println!("{}", String::from_utf8_lossy(&message));
    }

    Ok(())
}
