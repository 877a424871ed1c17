//! CLI for the Bloom dataflow interpreter.
//!
//! Usage:
//!   bloom run <file>     Run a program until it is stable (or for `--ticks`)
//!   bloom check <file>   Parse and type-check a program
//!   bloom repl <file>    Step a program interactively

mod config;
mod repl;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use bloom_eval::{Collaborators, Collection, Engine, JsonlStore, Program, Tuple, WriterSink};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, DEFAULT_TICK_LIMIT};

#[derive(Parser, Debug)]
#[command(name = "bloom", version, about = "Interpreter for Bloom-style dataflow programs")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "BLOOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a program
    Run {
        file: PathBuf,

        /// Run exactly this many ticks instead of stopping once stable
        #[arg(long)]
        ticks: Option<usize>,

        /// Directory backing durable (`sqltable`) collections
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Fixpoint passes allowed per tick
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Print every non-empty collection after the last tick
        #[arg(long)]
        dump: bool,
    },
    /// Parse and type-check a program, then describe it
    Check { file: PathBuf },
    /// Load a program and step it interactively
    Repl {
        file: PathBuf,

        /// Directory backing durable (`sqltable`) collections
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // Logging goes to stderr; stdout carries the `stdio` stream.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Run {
            file,
            ticks,
            store_dir,
            max_iterations,
            dump,
        } => {
            if ticks.is_some() {
                config.run.ticks = ticks;
            }
            if store_dir.is_some() {
                config.store.dir = store_dir;
            }
            if max_iterations.is_some() {
                config.engine.max_iterations = max_iterations;
            }
            run(&file, &config, dump)
        }
        Command::Check { file } => check(&file),
        Command::Repl { file, store_dir } => {
            if store_dir.is_some() {
                config.store.dir = store_dir;
            }
            let mut engine = build_engine(&file, &config)?;
            repl::run(&mut engine)
        }
    }
}

fn load_program(file: &Path) -> anyhow::Result<Program> {
    let source =
        fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    bloom_ir::compile(&source).with_context(|| format!("failed to load {}", file.display()))
}

fn build_engine(file: &Path, config: &Config) -> anyhow::Result<Engine> {
    let program = load_program(file)?;
    let mut io = Collaborators::new(WriterSink::stdout());
    if let Some(dir) = &config.store.dir {
        let store = JsonlStore::open(dir)
            .with_context(|| format!("failed to open store at {}", dir.display()))?;
        io = io.with_store(store);
    }
    Ok(Engine::with_collaborators(program, config.engine.clone(), io)?)
}

fn run(file: &Path, config: &Config, dump: bool) -> anyhow::Result<()> {
    let mut engine = build_engine(file, config)?;
    let reports = match config.run.ticks {
        Some(n) => engine.run(n)?,
        None => {
            let reports = engine.run_until_stable(DEFAULT_TICK_LIMIT)?;
            if reports.len() == DEFAULT_TICK_LIMIT {
                tracing::warn!(ticks = DEFAULT_TICK_LIMIT, "program did not stabilize");
            }
            reports
        }
    };
    tracing::info!(
        ticks = reports.len(),
        emitted = reports.iter().map(|r| r.emitted).sum::<usize>(),
        "run finished"
    );
    if dump {
        dump_all(&engine);
    }
    Ok(())
}

fn check(file: &Path) -> anyhow::Result<()> {
    let program = load_program(file)?;
    println!("collections:");
    for decl in program.collections() {
        println!("  {} {}{}", decl.persistence.keyword(), decl.name, decl.schema);
    }
    println!("rules:");
    for (i, stratum) in program.strata().iter().enumerate() {
        for &r in stratum {
            let rule = &program.rules()[r];
            let recursive = if rule.is_recursive() { " (recursive)" } else { "" };
            println!("  [stratum {i}] {}{recursive}", rule.label());
        }
    }
    for &r in program.deferred() {
        println!("  [deferred] {}", program.rules()[r].label());
    }
    Ok(())
}

fn dump_all(engine: &Engine) {
    let mut first = true;
    for collection in engine.collections() {
        if collection.is_empty() {
            continue;
        }
        if !first {
            println!();
        }
        print_tuples(collection, collection.iter().cloned().collect());
        first = false;
    }
}

fn print_tuples(collection: &Collection, mut tuples: Vec<Tuple>) {
    tuples.sort();
    println!(
        "{} ({} tuple{}):",
        collection.name(),
        tuples.len(),
        if tuples.len() == 1 { "" } else { "s" }
    );
    for tuple in tuples {
        print!("  (");
        for (i, val) in tuple.iter().enumerate() {
            if i > 0 {
                print!(", ");
            }
            print!("{val:?}");
        }
        println!(")");
    }
}
