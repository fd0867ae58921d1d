//! Train command: build the shared Huffman table from a text corpus.

use std::fs;
use std::path::PathBuf;

use anyhow::{ensure, Result};

use crate::config::{Config, HUFFCODE_FILE};
use crate::huffman::{compute_frequencies, filter_alphabet, HuffmanCode, EOF_SYMBOL};

#[derive(clap::Parser, Debug)]
pub struct TrainOpts {
    /// Text corpus to derive symbol frequencies from
    #[arg(long)]
    pub corpus: PathBuf,

    /// Output path; defaults to huffcode.map in the configuration directory
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn run_train(config_dir: Option<PathBuf>, o: TrainOpts) -> Result<()> {
    let raw = fs::read(&o.corpus)?;
    let text = filter_alphabet(&raw);
    ensure!(
        !text.is_empty(),
        "{} contains no symbols of the message alphabet",
        o.corpus.display()
    );

    let mut frequencies = compute_frequencies(&text);
    *frequencies.entry(EOF_SYMBOL).or_insert(0) += 1;
    let code = HuffmanCode::generate(&frequencies);

    let out = match o.out {
        Some(path) => path,
        None => {
            let dir = match config_dir {
                Some(dir) => dir,
                None => Config::locate_dir()?,
            };
            dir.join(HUFFCODE_FILE)
        }
    };
    code.save(&out)?;

    eprintln!(
        "Huffman table over {} symbols ({} corpus bytes) written to {}",
        code.len(),
        text.len(),
        out.display()
    );
    Ok(())
}
