//! Caldera compiler CLI entry point.

mod cli;

use std::path::{Path, PathBuf};

use anyhow::Context;
use caldera::{CalderaDatabase, CompileOptions, compile_wasm, site_table};
use clap::Parser;
use cli::{Cli, Command, OptionArgs};
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_env("CALDERA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = execute(cli.command) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Compile {
            input,
            output,
            options,
        } => compile_file(&input, output, options),
        Command::Sites { input } => print_sites(&input),
        #[cfg(feature = "wasmtime")]
        Command::Run {
            input,
            export,
            args,
        } => run_file(&input, &export, &args),
    }
}

fn compile_options(args: OptionArgs) -> anyhow::Result<CompileOptions> {
    let mut options = match &args.config {
        Some(path) => CompileOptions::from_file(path)?,
        None => CompileOptions::default(),
    };
    if args.module_name.is_some() {
        options.module_name = args.module_name;
    }
    if args.no_pure_surfaces {
        options.export_pure_surfaces = false;
    }
    if args.debug_names {
        options.debug_names = true;
    }
    Ok(options)
}

fn compile_file(input: &Path, output: Option<PathBuf>, args: OptionArgs) -> anyhow::Result<()> {
    let options = compile_options(args)?;
    let db = CalderaDatabase::default();
    let source = db.load(input)?;
    let artifact = compile_wasm(&db, source, options).clone()?;

    let output = output.unwrap_or_else(|| wasm_path(input));
    std::fs::write(&output, &artifact.bytes)
        .with_context(|| format!("cannot write {}", output.display()))?;
    println!(
        "wrote {} ({} bytes, exports: {})",
        output.display(),
        artifact.bytes.len(),
        artifact.exports.join(", ")
    );
    Ok(())
}

/// `prog.hir.json` becomes `prog.wasm`.
fn wasm_path(input: &Path) -> PathBuf {
    let stem = input
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.strip_suffix(".json").unwrap_or(name))
        .map(|name| name.strip_suffix(".hir").unwrap_or(name))
        .unwrap_or("out");
    input.with_file_name(format!("{stem}.wasm"))
}

fn print_sites(input: &Path) -> anyhow::Result<()> {
    let db = CalderaDatabase::default();
    let source = db.load(input)?;
    let table = site_table(&db, source).clone()?;
    print!("{}", table.dump(source.hir(&db)));
    Ok(())
}

#[cfg(feature = "wasmtime")]
fn run_file(input: &Path, export: &str, args: &[String]) -> anyhow::Result<()> {
    let db = CalderaDatabase::default();
    let source = db.load(input)?;
    let program = source.hir(&db);
    let values = caldera::run::parse_args(program, export, args)?;
    let artifact = compile_wasm(&db, source, CompileOptions::default()).clone()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let value = runtime.block_on(caldera::run::run_export(
        &artifact,
        caldera_host::HandlerRegistry::new(),
        export,
        &values,
    ))?;
    println!("{value}");
    Ok(())
}
