//! Write command: compress a text file and embed it into the blockchain.

use std::fs;
use std::path::PathBuf;

use anyhow::{ensure, Context as _, Result};
use bitcoin::address::{Address, NetworkUnchecked};
use secp256k1::Secp256k1;

use crate::commands::prompt;
use crate::context::Context;
use crate::embed::{
    authorize_transactions, chain_fee, embed_data, minimum_budget, select_inputs,
    send_transactions, ChainParams,
};
use crate::huffman::filter_alphabet;
use crate::wallet::Wallet;

#[derive(clap::Parser, Debug, Default)]
pub struct WriteOpts {
    /// Path to the text file to embed; prompted for when absent
    #[arg(long)]
    pub file: Option<PathBuf>,
}

pub fn run_write(config_dir: Option<PathBuf>, o: WriteOpts) -> Result<()> {
    let mut ctx = Context::load(config_dir)?;
    let wallet = Wallet::new(&ctx.config);
    ensure!(
        wallet.is_running(),
        "bitcoin daemon is not reachable at {}",
        ctx.config.rpc_url()
    );

    let path = match o.file {
        Some(path) => path,
        None => PathBuf::from(prompt(
            "Please enter the full path to the text file you wish to send to the blockchain: ",
        )?),
    };
    ensure!(path.is_file(), "{} is not a regular file", path.display());
    let raw = fs::read(&path)?;

    // Everything outside the restricted alphabet is dropped up front.
    let text = filter_alphabet(&raw);
    println!("Your text has been converted into:");
    println!("{}", String::from_utf8_lossy(&text));

    let compressed = ctx.huffcode.compress(&text)?;
    eprintln!("[INFO] Original data size: {} bytes", text.len());
    eprintln!(
        "[INFO] Compressed data size: {:.1} bytes",
        compressed.len() as f64 / 8.0
    );

    let params = ChainParams::from(&ctx.config);
    let min_budget = minimum_budget(&params, &ctx.keymap, compressed.len())?;
    let inputs = select_inputs(&wallet, ctx.config.state_last_tx, min_budget)?;

    let change_script = wallet
        .get_new_address()?
        .parse::<Address<NetworkUnchecked>>()
        .context("wallet returned an unparsable address")?
        .assume_checked()
        .script_pubkey();

    let mut chain = embed_data(
        &params,
        &ctx.keymap,
        &mut ctx.store,
        &compressed,
        inputs.budget,
        &inputs.utxo,
        &change_script,
    )?;

    let fees = chain_fee(params.fee_rate, &chain);
    eprintln!(
        "[INFO] The data will be embedded in {} transactions",
        chain.len()
    );
    eprintln!("[INFO] The embedding of the data will cost {fees} Satoshi");

    let password = prompt("If you wish to proceed, please enter your wallet password: ")?;
    wallet.unlock_wallet(&password, 60)?;

    let secp = Secp256k1::new();
    authorize_transactions(&secp, &ctx.store, &wallet, &mut chain)?;
    wallet.lock_wallet()?;

    send_transactions(&wallet, &chain)?;

    let first = chain.first().context("empty chain")?.txid();
    let last = chain.last().context("empty chain")?.txid();
    eprintln!("[INFO] The transactions have been sent successfully!");
    println!("First transaction ID: {first}");
    println!("Last transaction ID: {last}");

    ctx.config.update_chain_state(&ctx.dir, first, last)?;
    eprintln!("[INFO] The chain state configuration has been updated successfully");

    Ok(())
}
