// Print summary statistics of a trained g2p model file.

use anyhow::{Context, Result};
use clap::Parser;
use libg2p::ModelFile;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "inspect_model", about = "Summarize a g2p model file")]
struct Cli {
    model: PathBuf,
    /// Also list the n most probable multigrams in the empty history.
    #[arg(long, default_value_t = 10)]
    top: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let file = ModelFile::load(&cli.model)
        .with_context(|| format!("cannot load {}", cli.model.display()))?;

    println!("model file {}", cli.model.display());
    println!("  version:    {}", file.version);
    println!("  graphemes:  {}", file.graphemes.len());
    println!("  phonemes:   {}", file.phonemes.len());
    println!("  multigrams: {}", file.multigrams.len());
    println!("  entries:    {}", file.entries.len());
    println!("  init/term:  {}/{}", file.init, file.term);

    let max_history = file.entries.iter().map(|e| e.history.len()).max().unwrap_or(0);
    println!("  order:      {}", max_history + 1);

    let model = file.into_model()?;
    let mut unigrams: Vec<(u32, f64)> = (1..=model.inventory.size() as u32)
        .map(|q| {
            (
                q,
                model
                    .model
                    .probability(q, model.model.initial())
                    .probability(),
            )
        })
        .collect();
    unigrams.sort_by(|a, b| b.1.total_cmp(&a.1));

    println!("top multigrams in the initial history:");
    for (q, p) in unigrams.into_iter().take(cli.top) {
        let jmg = model.inventory.symbol(q);
        let left: Vec<&str> = jmg
            .left
            .symbols()
            .iter()
            .map(|&s| model.graphemes.symbol(s))
            .collect();
        let right: Vec<&str> = jmg
            .right
            .symbols()
            .iter()
            .map(|&s| model.phonemes.symbol(s))
            .collect();
        println!(
            "  {:>6}  p={:<10.6} {:?} -> {:?}",
            q,
            p,
            left.join(""),
            right.join(" ")
        );
    }
    Ok(())
}
