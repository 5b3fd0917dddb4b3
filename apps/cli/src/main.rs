//! LeadScout CLI: enrich contact records with researched company facts.
//!
//! Enqueues enrichment jobs, runs the worker pool, streams live progress
//! and inspects jobs and stored results.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
