//! prerender CLI — static snapshots for a client-rendered single-page app.
//!
//! Serves the built bundle locally, renders every known route in a headless
//! browser and writes one `index.html` per route.

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
