//! Command-line interface for the Caldera compiler.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "calderac")]
#[command(about = "Lowers effect-typed HIR to WebAssembly", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile a HIR program to a WebAssembly module
    Compile {
        /// Path to the `.hir.json` program
        input: PathBuf,
        /// Output path (defaults to the input with a `.wasm` extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Print the continuation sites and environment layouts of a program
    Sites {
        /// Path to the `.hir.json` program
        input: PathBuf,
    },
    /// Compile a program and run one of its exports without effect handlers
    #[cfg(feature = "wasmtime")]
    Run {
        /// Path to the `.hir.json` program
        input: PathBuf,
        /// Name of the exported function
        export: String,
        /// Arguments, parsed against the export's parameter types
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Args)]
pub struct OptionArgs {
    /// JSON file with compile options; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Override the module name recorded in the HIR
    #[arg(long)]
    pub module_name: Option<String>,
    /// Do not export pure surfaces next to the effectful entry points
    #[arg(long)]
    pub no_pure_surfaces: bool,
    /// Emit a `name` section with function names
    #[arg(long)]
    pub debug_names: bool,
}
