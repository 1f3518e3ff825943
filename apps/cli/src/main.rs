//! Dossier CLI: export research projects to paginated PDF documents.
//!
//! Reads a project from the OSF API or from a JSON snapshot, then writes a
//! PDF with a cover, table of contents and one section per project node.

mod commands;
mod output;

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
