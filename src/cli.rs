use clap::Parser;
use std::path::PathBuf;

/// Myco interpreter. Runs FILE, or starts a REPL when no file is given.
#[derive(Parser, Debug)]
#[clap(version)]
pub struct Args {
    /// Path to a .myco source file
    pub file: Option<PathBuf>,

    /// Compile FILE ahead of time instead of interpreting it
    #[arg(long)]
    pub build: bool,

    /// Output path for --build
    #[arg(long, value_name = "FILE", requires = "build")]
    pub output: Option<PathBuf>,

    /// Tokenize and parse FILE, then print its syntax tree
    #[arg(long, conflicts_with = "build")]
    pub check: bool,

    /// Print loop statistics to stderr after the run
    #[arg(long)]
    pub stats: bool,

    /// Iterations allowed per loop before it is stopped
    #[arg(long, value_name = "N", default_value_t = 1_000_000)]
    pub max_iterations: u64,

    /// Maximum nesting of function calls
    #[arg(long, value_name = "N", default_value_t = 200)]
    pub max_call_depth: usize,

    /// Disable coloured error output
    #[arg(long)]
    pub no_color: bool,
}
