/*!
Kneser-Ney estimation of a fresh sequence model from accumulated evidence.

The estimator materialises the evidence store into items `(history, token,
evidence)` grouped by history, with every proper prefix of every history
present as a zero-evidence support row. Absolute discounting then moves mass
level by level from longer histories onto their shortened counterparts, and
the interpolated probabilities are assembled bottom-up against a uniform
zero-gram `1 / V`.

Histories are handled as plain token vectors (recent-most first) here, so
shortening a history is a pop and the lexicographic sort keeps each group
contiguous.
*/

use crate::accumulator::EvidenceStore;
use crate::error::InputError;
use crate::probability::LogProbability;
use crate::sequence_model::{InitItem, SequenceModel, Token};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct Item {
    token: Token,
    evidence: f64,
    /// Working mass: starts as the evidence, shrinks by discounting and
    /// grows by credits from longer histories.
    mass: f64,
    /// Final interpolated probability; meaningful only while `mass > 0`.
    probability: f64,
}

#[derive(Debug, Clone)]
struct Group {
    /// History tokens, recent-most first.
    history: Vec<Token>,
    begin: usize,
    end: usize,
    /// Group index of the shortened history; `None` at the root.
    shorter: Option<usize>,
    /// Pre-discount mass of the group at its level.
    total: f64,
    back_off: f64,
}

/// Converts grouped evidence into a Kneser-Ney smoothed [`SequenceModel`].
#[derive(Debug)]
pub struct SequenceModelEstimator {
    items: Vec<Item>,
    groups: Vec<Group>,
    /// Group indices per history length.
    levels: Vec<Vec<usize>>,
    init: Token,
    term: Token,
}

impl EvidenceStore {
    /// Expands the store into estimator form. The model is only consulted
    /// for the history topology (and the reserved tokens carried over to the
    /// estimated model).
    pub fn make_sequence_model_estimator(&self, model: &SequenceModel) -> SequenceModelEstimator {
        // sorted by (history, token); zero rows guarantee that every token
        // of a history is present in all of its shortened counterparts
        let mut table: BTreeMap<(Vec<Token>, Token), f64> = BTreeMap::new();
        for (history, token, mass) in self.as_list(model) {
            let recent_first: Vec<Token> = history.iter().rev().copied().collect();
            let mut prefix = recent_first.clone();
            *table.entry((recent_first, token)).or_insert(0.0) += mass;
            while !prefix.is_empty() {
                prefix.pop();
                table.entry((prefix.clone(), token)).or_insert(0.0);
            }
        }

        let mut items = Vec::with_capacity(table.len());
        let mut groups: Vec<Group> = Vec::new();
        for ((history, token), evidence) in table {
            let fresh = match groups.last() {
                Some(group) => group.history != history,
                None => true,
            };
            if fresh {
                if let Some(group) = groups.last_mut() {
                    group.end = items.len();
                }
                groups.push(Group {
                    history,
                    begin: items.len(),
                    end: items.len(),
                    shorter: None,
                    total: 0.0,
                    back_off: 1.0,
                });
            }
            items.push(Item {
                token,
                evidence,
                mass: evidence,
                probability: 0.0,
            });
        }
        if let Some(group) = groups.last_mut() {
            group.end = items.len();
        }

        let index: ahash::AHashMap<&[Token], usize> = groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.history.as_slice(), i))
            .collect();
        let mut shorter = vec![None; groups.len()];
        let mut levels: Vec<Vec<usize>> = Vec::new();
        for (i, group) in groups.iter().enumerate() {
            let length = group.history.len();
            if length > 0 {
                shorter[i] = Some(index[&group.history[..length - 1]]);
            }
            if levels.len() <= length {
                levels.resize(length + 1, Vec::new());
            }
            levels[length].push(i);
        }
        for (group, s) in groups.iter_mut().zip(shorter) {
            group.shorter = s;
        }

        SequenceModelEstimator {
            items,
            groups,
            levels,
            init: model.init(),
            term: model.term(),
        }
    }
}

impl SequenceModelEstimator {
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Number of history levels, i.e. the longest history length plus one.
    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    /// Applies per-level discounting and interpolation and emits the
    /// resulting model. One discount per level must be supplied.
    pub fn make_sequence_model(
        &mut self,
        vocabulary_size: u32,
        discounts: &[f64],
    ) -> Result<SequenceModel, InputError> {
        if vocabulary_size == 0 {
            return Err(InputError::InvalidVocabularySize);
        }
        if discounts.len() < self.levels.len() {
            return Err(InputError::MissingDiscount {
                provided: discounts.len(),
                required: self.levels.len(),
            });
        }

        let zero_gram = 1.0 / f64::from(vocabulary_size);
        self.discount(discounts);
        self.interpolate(zero_gram);

        let mut entries: Vec<InitItem> = Vec::new();
        for group in &self.groups {
            // the root's emitted weight absorbs the uniform zero-gram, so a
            // query falling through every level yields beta * 1/V
            let emitted = if group.history.is_empty() {
                group.back_off * zero_gram
            } else {
                group.back_off
            };
            entries.push(InitItem {
                history: group.history.clone(),
                token: 0,
                score: back_off_score(emitted),
            });
            for item in &self.items[group.begin..group.end] {
                if item.mass > 0.0 {
                    entries.push(InitItem {
                        history: group.history.clone(),
                        token: item.token,
                        score: LogProbability::from_score(-item.probability.ln()),
                    });
                }
            }
        }
        debug!(
            items = self.items.len(),
            groups = self.groups.len(),
            levels = self.levels.len(),
            "estimated sequence model"
        );

        let mut model = SequenceModel::new();
        model.set_init_and_term(self.init, self.term);
        model.set_items(entries);
        Ok(model)
    }

    /// Absolute discounting, highest level first. Each item cedes at most
    /// `d` mass, credited to the same token under the shortened history; the
    /// group total is fixed before its own sweep so the credits received
    /// from above still count.
    fn discount(&mut self, discounts: &[f64]) {
        for level in (1..self.levels.len()).rev() {
            let d = discounts[level];
            for gi in 0..self.levels[level].len() {
                let gi = self.levels[level][gi];
                let (begin, end) = (self.groups[gi].begin, self.groups[gi].end);
                self.groups[gi].total = self.items[begin..end].iter().map(|i| i.mass).sum();
                let shorter = self.groups[gi].shorter.expect("non-root group lacks a parent");
                let mut j = self.groups[shorter].begin;
                let shorter_end = self.groups[shorter].end;
                for i in begin..end {
                    let credit = if self.items[i].mass > d {
                        self.items[i].mass -= d;
                        d
                    } else {
                        let credit = self.items[i].mass;
                        self.items[i].mass = 0.0;
                        credit
                    };
                    // ordered scan; the support expansion guarantees a hit
                    while j < shorter_end && self.items[j].token < self.items[i].token {
                        j += 1;
                    }
                    debug_assert!(j < shorter_end && self.items[j].token == self.items[i].token);
                    self.items[j].mass += credit;
                }
            }
        }
        // level zero only sheds mass; there is nothing to credit
        if let Some(root_level) = self.levels.first() {
            let d = discounts[0];
            for &gi in root_level {
                let (begin, end) = (self.groups[gi].begin, self.groups[gi].end);
                self.groups[gi].total = self.items[begin..end].iter().map(|i| i.mass).sum();
                for item in &mut self.items[begin..end] {
                    if item.mass > d {
                        item.mass -= d;
                    } else {
                        item.mass = 0.0;
                    }
                }
            }
        }
    }

    /// Computes interpolated probabilities bottom-up, shortest histories
    /// first, so every lookup into a shorter group sees final values.
    fn interpolate(&mut self, zero_gram: f64) {
        for level in 0..self.levels.len() {
            for gi in 0..self.levels[level].len() {
                let gi = self.levels[level][gi];
                let (begin, end) = (self.groups[gi].begin, self.groups[gi].end);
                let total = self.groups[gi].total;
                let sum_used: f64 = self.items[begin..end]
                    .iter()
                    .filter(|i| i.mass > 0.0)
                    .map(|i| i.mass)
                    .sum();
                let back_off = if sum_used <= 0.0 {
                    1.0
                } else if sum_used > total {
                    0.0
                } else {
                    1.0 - sum_used / total
                };
                self.groups[gi].back_off = back_off;
                for i in begin..end {
                    if self.items[i].mass > 0.0 {
                        let lower =
                            self.lower_probability(self.groups[gi].shorter, self.items[i].token, zero_gram);
                        self.items[i].probability = self.items[i].mass / total + back_off * lower;
                    }
                }
            }
        }
    }

    /// The lower-order probability a surviving item interpolates against:
    /// the shortened history's own estimate where it assigns mass, else its
    /// back-off weight times the next shorter one, down to the uniform
    /// zero-gram.
    fn lower_probability(&self, mut group: Option<usize>, token: Token, zero_gram: f64) -> f64 {
        let mut scale = 1.0;
        loop {
            let gi = match group {
                Some(gi) => gi,
                None => return scale * zero_gram,
            };
            let g = &self.groups[gi];
            let slice = &self.items[g.begin..g.end];
            let item = slice
                .binary_search_by_key(&token, |i| i.token)
                .ok()
                .map(|i| &slice[i])
                .expect("support expansion left a hole");
            if item.mass > 0.0 {
                return scale * item.probability;
            }
            scale *= g.back_off;
            group = g.shorter;
        }
    }
}

fn back_off_score(back_off: f64) -> LogProbability {
    if back_off > 0.0 {
        LogProbability::from_score(-back_off.ln())
    } else {
        LogProbability::impossible()
    }
}
