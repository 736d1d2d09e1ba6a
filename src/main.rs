//! Synteruptor main executable.

pub mod blocks;
pub mod breaks;
pub mod common;
pub mod db;
pub mod graph;
pub mod input;
pub mod load;
pub mod orthologs;
pub mod paralogs;
pub mod rank;
pub mod reorder;

use clap::{Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Synteny break detection in bacterial genomes",
    long_about = "This tool runs the synteruptor analysis pipeline, from an all-vs-all \
    protein similarity matrix and a parsed gene catalog down to ranked synteny breaks"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Subcommand)]
enum Commands {
    /// Build ortholog pairs from similarity hits.
    Orthologs(orthologs::Args),
    /// Build within-genome paralog lists from similarity hits.
    Paralogs(paralogs::Args),
    /// Load the gene catalog and ortholog pairs into the store.
    Load(load::Args),
    /// Aggregate consecutive ortholog pairs into maximal synteny blocks.
    Blocks(blocks::Args),
    /// Derive breaks between near-consecutive blocks.
    Breaks(breaks::Args),
    /// Materialize the gene contents of each break side.
    BreakGenes(breaks::genes::Args),
    /// Score break contents and optionally prune low-quality breaks.
    Rank(rank::Args),
    /// Group homologous breaks across species pairs and detect cycles.
    Graph(graph::Args),
    /// Reorder fragmented assemblies against a complete reference.
    Reorder(reorder::Args),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Orthologs(args) => orthologs::run(&cli.common, args)?,
            Commands::Paralogs(args) => paralogs::run(&cli.common, args)?,
            Commands::Load(args) => load::run(&cli.common, args)?,
            Commands::Blocks(args) => blocks::run(&cli.common, args)?,
            Commands::Breaks(args) => breaks::run(&cli.common, args)?,
            Commands::BreakGenes(args) => breaks::genes::run(&cli.common, args)?,
            Commands::Rank(args) => rank::run(&cli.common, args)?,
            Commands::Graph(args) => graph::run(&cli.common, args)?,
            Commands::Reorder(args) => reorder::run(&cli.common, args)?,
        }

        Ok::<(), anyhow::Error>(())
    })?;
    term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

    Ok(())
}
