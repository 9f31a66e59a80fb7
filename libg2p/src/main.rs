use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libg2p::{read_lexicon, ModelFile, Trainer, Transcriber};
use libgraphone_core::Config;
use std::io::BufRead;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "g2p", about = "Joint multigram grapheme-to-phoneme toolkit")]
struct Cli {
    /// TOML configuration file; defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model from a pronunciation lexicon.
    Train {
        #[arg(long)]
        lexicon: PathBuf,
        /// Output model file.
        #[arg(long)]
        model: PathBuf,
        /// Override the configured n-gram order.
        #[arg(long)]
        order: Option<u32>,
    },
    /// Transcribe words with a trained model. Words come from the command
    /// line, or from stdin when none are given.
    Apply {
        #[arg(long)]
        model: PathBuf,
        /// Emit the n best pronunciations per word.
        #[arg(long, default_value_t = 1)]
        nbest: usize,
        words: Vec<String>,
    },
    /// Report phoneme and word error rates against a test lexicon.
    Eval {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        lexicon: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_toml(path)
            .map_err(|e| anyhow::anyhow!("cannot load config {}: {e}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Command::Train {
            lexicon,
            model,
            order,
        } => train(config, &lexicon, &model, order),
        Command::Apply {
            model,
            nbest,
            words,
        } => apply(config, &model, nbest, words),
        Command::Eval { model, lexicon } => eval(config, &model, &lexicon),
    }
}

fn load_transcriber(config: &Config, path: &PathBuf) -> Result<Transcriber> {
    let model = ModelFile::load(path)
        .with_context(|| format!("cannot load model {}", path.display()))?
        .into_model()?;
    let mut transcriber = Transcriber::new(model);
    transcriber.set_stack_limit(config.stack_limit);
    Ok(transcriber)
}

fn train(mut config: Config, lexicon: &PathBuf, model: &PathBuf, order: Option<u32>) -> Result<()> {
    if let Some(order) = order {
        config.ngram_order = order;
    }
    let entries = read_lexicon(lexicon)?;
    let mut trainer = Trainer::new(config);
    trainer.add_lexicon(&entries)?;
    println!("training on {} entries", trainer.pair_count());
    let trained = trainer.train()?;
    println!(
        "model: {} graphemes, {} phonemes, {} multigrams",
        trained.graphemes.size(),
        trained.phonemes.size(),
        trained.inventory.size()
    );
    ModelFile::from_model(&trained).save(model)?;
    println!("saved {}", model.display());
    Ok(())
}

fn apply(config: Config, model: &PathBuf, nbest: usize, words: Vec<String>) -> Result<()> {
    let mut transcriber = load_transcriber(&config, model)?;
    let words: Vec<String> = if words.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<_>>()?
    } else {
        words
    };

    for word in &words {
        if nbest <= 1 {
            match transcriber.transcribe(word) {
                Ok(result) => println!("{word}\t{}", result.phonemes.join(" ")),
                Err(e) => eprintln!("{word}: {e}"),
            }
            continue;
        }
        match transcriber.transcribe_n_best(word, nbest) {
            Ok(results) => {
                for result in results {
                    println!(
                        "{word}\t{:.6}\t{}",
                        result.score,
                        result.phonemes.join(" ")
                    );
                }
            }
            Err(e) => eprintln!("{word}: {e}"),
        }
    }
    Ok(())
}

fn eval(config: Config, model: &PathBuf, lexicon: &PathBuf) -> Result<()> {
    let mut transcriber = load_transcriber(&config, model)?;
    let entries = read_lexicon(lexicon)?;

    let mut phoneme_errors = 0u64;
    let mut phoneme_total = 0u64;
    let mut word_errors = 0u64;
    let mut failures = 0u64;
    for entry in &entries {
        phoneme_total += entry.phonemes.len() as u64;
        match transcriber.transcribe(&entry.word) {
            Ok(result) => {
                let distance =
                    libg2p::edit_distance(&result.phonemes, &entry.phonemes) as u64;
                phoneme_errors += distance;
                if distance > 0 {
                    word_errors += 1;
                }
            }
            Err(_) => {
                failures += 1;
                word_errors += 1;
                phoneme_errors += entry.phonemes.len() as u64;
            }
        }
    }

    let total = entries.len() as u64;
    println!("evaluated {total} entries ({failures} failed outright)");
    if phoneme_total > 0 {
        println!(
            "phoneme error rate: {:.2}% ({phoneme_errors}/{phoneme_total})",
            100.0 * phoneme_errors as f64 / phoneme_total as f64
        );
    }
    if total > 0 {
        println!(
            "word error rate: {:.2}% ({word_errors}/{total})",
            100.0 * word_errors as f64 / total as f64
        );
    }
    Ok(())
}
