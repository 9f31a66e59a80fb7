//! Pronunciation lexicon reader.
//!
//! One entry per line: the word, whitespace, then the phoneme sequence
//! separated by whitespace. Blank lines and lines starting with `#` or `;`
//! are skipped.

use crate::error::G2pError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexiconEntry {
    pub word: String,
    pub phonemes: Vec<String>,
}

pub fn read_lexicon<P: AsRef<Path>>(path: P) -> Result<Vec<LexiconEntry>, G2pError> {
    let file = File::open(path.as_ref()).map_err(|e| G2pError::Corpus {
        line: 0,
        message: format!("cannot open {}: {e}", path.as_ref().display()),
    })?;
    parse_lexicon(BufReader::new(file))
}

pub fn parse_lexicon<R: BufRead>(reader: R) -> Result<Vec<LexiconEntry>, G2pError> {
    let mut entries = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let number = number + 1;
        let line = line.map_err(|e| G2pError::Corpus {
            line: number,
            message: e.to_string(),
        })?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let word = fields.next().expect("non-empty line has a first field");
        let phonemes: Vec<String> = fields.map(str::to_string).collect();
        if phonemes.is_empty() {
            return Err(G2pError::Corpus {
                line: number,
                message: format!("entry {word:?} has no pronunciation"),
            });
        }
        entries.push(LexiconEntry {
            word: word.to_string(),
            phonemes,
        });
    }
    Ok(entries)
}
