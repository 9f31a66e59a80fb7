//! Model persistence.
//!
//! The on-disk format is a bincode-serialized [`ModelFile`]: the two symbol
//! tables, the multigram inventory as symbol tuples in index order, and the
//! sequence model as its external triples. Rebuilding relies on the
//! inventories assigning indices monotonically, so insertion order
//! reproduces the original ids exactly.

use crate::error::G2pError;
use crate::symbols::SymbolInventory;
use crate::G2pModel;
use anyhow::Result;
use libgraphone_core::{JointMultigram, ModelEntry, MultigramInventory, SequenceModel, Symbol, Token};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub const MODEL_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelFile {
    pub version: u32,
    pub graphemes: Vec<String>,
    pub phonemes: Vec<String>,
    pub multigrams: Vec<(Vec<Symbol>, Vec<Symbol>)>,
    pub init: Token,
    pub term: Token,
    pub entries: Vec<ModelEntry>,
}

impl ModelFile {
    pub fn from_model(model: &G2pModel) -> Self {
        let multigrams = (1..=model.inventory.size() as u32)
            .map(|q| {
                let jmg = model.inventory.symbol(q);
                (jmg.left.symbols().to_vec(), jmg.right.symbols().to_vec())
            })
            .collect();
        ModelFile {
            version: MODEL_FILE_VERSION,
            graphemes: model.graphemes.symbols().to_vec(),
            phonemes: model.phonemes.symbols().to_vec(),
            multigrams,
            init: model.model.init(),
            term: model.model.term(),
            entries: model.model.get(),
        }
    }

    pub fn into_model(self) -> Result<G2pModel, G2pError> {
        if self.version != MODEL_FILE_VERSION {
            return Err(G2pError::ModelVersion(self.version));
        }
        let graphemes = SymbolInventory::from_symbols(&self.graphemes)?;
        let phonemes = SymbolInventory::from_symbols(&self.phonemes)?;
        let mut inventory = MultigramInventory::new();
        for (left, right) in &self.multigrams {
            inventory.index(&JointMultigram::new(left, right));
        }
        let mut model = SequenceModel::new();
        model.set_init_and_term(self.init, self.term);
        model.set(&self.entries)?;
        Ok(G2pModel {
            graphemes,
            phonemes,
            inventory,
            model,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let model: Self = bincode::deserialize_from(reader)?;
        Ok(model)
    }
}
