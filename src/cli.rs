use std::path::PathBuf;

use clap::Parser;

/// Parse and validate WebAssembly text files.
#[derive(Debug, Parser)]
#[command(name = "watlite", version)]
pub struct Cli {
    /// WAT files to check
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Print a JSON report instead of a summary
    #[arg(long, conflicts_with_all = ["print", "folded"])]
    pub json: bool,

    /// Print each module with flat bodies
    #[arg(long)]
    pub print: bool,

    /// Print each module with folded bodies
    #[arg(long)]
    pub folded: bool,
}
