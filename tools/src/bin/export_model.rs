// Export a binary g2p model file as JSON for inspection or diffing.

use anyhow::{Context, Result};
use clap::Parser;
use libg2p::ModelFile;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "export_model", about = "Dump a g2p model file as JSON")]
struct Cli {
    model: PathBuf,
    /// Output path; stdout when absent.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let file = ModelFile::load(&cli.model)
        .with_context(|| format!("cannot load {}", cli.model.display()))?;
    let json = serde_json::to_string_pretty(&file)?;
    match cli.output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
