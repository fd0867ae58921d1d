//! Command handlers for each subcommand.

pub mod read;
pub mod train;
pub mod write;

pub use read::*;
pub use train::*;
pub use write::*;

use std::io::Write as _;

/// Prints `message` and reads one trimmed line from stdin.
pub fn prompt(message: &str) -> anyhow::Result<String> {
    print!("{message}");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_owned())
}
