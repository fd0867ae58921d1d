//! BMS command-line entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use bms::commands::*;

#[derive(Parser, Debug)]
#[command(
    name = "bms",
    about = "Embed and extract byte streams in chains of standard Bitcoin transactions"
)]
struct Cli {
    /// Configuration directory (default: $HOME/.bms or ./config)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Compress a text file and embed it into a transaction chain
    Write(WriteOpts),
    /// Fetch an embedded chain and print the recovered messages
    Read(ReadOpts),
    /// Train the shared Huffman table from a text corpus
    Train(TrainOpts),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Write(o)) => run_write(cli.config_dir, o),
        Some(Commands::Read(o)) => run_read(cli.config_dir, o),
        Some(Commands::Train(o)) => run_train(cli.config_dir, o),
        None => interactive(cli.config_dir),
    }
}

/// The original stdin-driven flow: choose write or read, then get prompted
/// for the rest.
fn interactive(config_dir: Option<PathBuf>) -> Result<()> {
    loop {
        let mode = prompt("Would you like to write to (W) or read from (R) the blockchain? ")?;
        match mode.as_str() {
            "W" | "w" => break run_write(config_dir.clone(), WriteOpts::default()),
            "R" | "r" => break run_read(config_dir.clone(), ReadOpts::default()),
            _ => println!("Your choice was incorrect, please try again."),
        }
    }
}
