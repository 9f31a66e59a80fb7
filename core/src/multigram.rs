//! Joint multigrams and their content-addressed inventory.
//!
//! A multigram is an ordered tuple of up to [`MAX_MULTIGRAM_LENGTH`] symbols
//! stored in fixed-width form; trailing zero symbols mark unused slots and
//! symbol 0 is reserved as the empty/terminator value. A joint multigram
//! pairs a source-side and a target-side multigram into one atomic alignment
//! unit.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Alphabet symbol. Zero is reserved.
pub type Symbol = u16;

/// Maximum number of symbols per multigram side.
pub const MAX_MULTIGRAM_LENGTH: usize = 8;

/// Fixed-capacity symbol tuple.
///
/// Equality and hashing are defined over the full fixed-width storage, so two
/// multigrams compare equal exactly when their used prefixes match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Multigram {
    data: [Symbol; MAX_MULTIGRAM_LENGTH],
}

impl Multigram {
    pub fn new() -> Self {
        Multigram::default()
    }

    /// Builds a multigram from the given symbols. The slice must fit the
    /// fixed capacity.
    pub fn from_symbols(symbols: &[Symbol]) -> Self {
        assert!(symbols.len() <= MAX_MULTIGRAM_LENGTH);
        let mut data = [0; MAX_MULTIGRAM_LENGTH];
        data[..symbols.len()].copy_from_slice(symbols);
        Multigram { data }
    }

    pub fn get(&self, i: usize) -> Symbol {
        self.data[i]
    }

    /// Number of leading non-zero symbols.
    pub fn length(&self) -> u32 {
        let mut result = 0;
        while result < MAX_MULTIGRAM_LENGTH && self.data[result] != 0 {
            result += 1;
        }
        result as u32
    }

    /// The used prefix as a slice.
    pub fn symbols(&self) -> &[Symbol] {
        &self.data[..self.length() as usize]
    }

    fn hash_value(&self) -> u64 {
        let mut result: u64 = 0;
        for &s in self.data.iter().take_while(|&&s| s != 0) {
            result = (result << 6) ^ u64::from(s);
        }
        result
    }
}

impl Hash for Multigram {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_value());
    }
}

/// A pair of source and target multigrams treated as one alignment unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JointMultigram {
    pub left: Multigram,
    pub right: Multigram,
}

impl JointMultigram {
    pub fn new(left: &[Symbol], right: &[Symbol]) -> Self {
        JointMultigram {
            left: Multigram::from_symbols(left),
            right: Multigram::from_symbols(right),
        }
    }
}

impl Hash for JointMultigram {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.left.hash_value().wrapping_add(self.right.hash_value()));
    }
}

/// Index assigned by the inventory. Zero is the reserved void index.
pub type MultigramIndex = u32;

/// Bijective mapping between joint multigrams and dense indices `1..=N`.
///
/// Insertion is monotone: an index never changes once assigned and the
/// inventory never shrinks.
#[derive(Debug, Clone)]
pub struct MultigramInventory {
    map: ahash::AHashMap<JointMultigram, MultigramIndex>,
    list: Vec<JointMultigram>,
}

impl MultigramInventory {
    pub fn new() -> Self {
        MultigramInventory {
            map: ahash::AHashMap::new(),
            // slot 0 backs the reserved void index
            list: vec![JointMultigram::default()],
        }
    }

    pub fn void_index() -> MultigramIndex {
        0
    }

    /// Number of multigrams, not counting void.
    pub fn size(&self) -> usize {
        self.list.len() - 1
    }

    /// Looks the joint multigram up, inserting it with a fresh index if
    /// absent.
    pub fn index(&mut self, jmg: &JointMultigram) -> MultigramIndex {
        if let Some(&i) = self.map.get(jmg) {
            return i;
        }
        let i = self.list.len() as MultigramIndex;
        self.map.insert(*jmg, i);
        self.list.push(*jmg);
        i
    }

    /// Looks the joint multigram up without inserting; unseen multigrams
    /// yield the void index.
    pub fn test_index(&self, jmg: &JointMultigram) -> MultigramIndex {
        self.map.get(jmg).copied().unwrap_or_else(Self::void_index)
    }

    /// Reverse lookup. The index must be valid and non-void.
    pub fn symbol(&self, i: MultigramIndex) -> &JointMultigram {
        assert!(i > 0 && (i as usize) < self.list.len());
        &self.list[i as usize]
    }
}

impl Default for MultigramInventory {
    fn default() -> Self {
        Self::new()
    }
}
