//! Back-off n-gram model over multigram tokens.
//!
//! Histories form a reverse trie: the root is the empty history, each child
//! extends its parent's context by one word, keyed most-recent-first from the
//! root. A node's own token is therefore the oldest word of the history it
//! represents, and shortening a history (dropping the oldest word, the usual
//! back-off step) is just following the parent pointer.
//!
//! After finalisation all nodes live in one contiguous array in
//! parent-before-children order. Each node's children are contiguous and
//! sorted by token, as are its word-probability entries; a sentinel node one
//! past the last bounds every range, so both lookups are binary searches.
//!
//! The model is immutable once built; `set` replaces it wholesale.

use crate::error::InputError;
use crate::probability::LogProbability;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Token identifying a multigram; 0 is reserved for the void/anonymous
/// multigram and never predicted.
pub type Token = u32;

/// Handle to a context node of the model's history trie.
///
/// The cul-de-sac value is the absorbing history reached by the sentence-end
/// token; it produces no further expansions and doubles as the unset marker
/// in per-node lattice maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct History(u32);

impl History {
    const CUL_DE_SAC: History = History(u32::MAX);
    const ROOT: History = History(0);

    pub fn is_cul_de_sac(self) -> bool {
        self == Self::CUL_DE_SAC
    }
}

impl Default for History {
    fn default() -> Self {
        History::CUL_DE_SAC
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    /// Oldest word of the history this node represents; 0 at the root.
    token: Token,
    depth: u16,
    parent: u32,
    /// First child in the node array; the range ends at the next node's
    /// `first_child`.
    first_child: u32,
    /// First prediction entry; the range ends at the next node's
    /// `first_probability`.
    first_probability: u32,
    back_off: LogProbability,
}

#[derive(Debug, Clone, Copy)]
struct WordProbability {
    token: Token,
    probability: LogProbability,
}

/// One triple of the external model representation.
///
/// The history tuple is ordered oldest-first. `token == None` makes the
/// entry a back-off weight for its history; otherwise `score` is the
/// negative natural log of `p(token | history)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub history: Vec<Token>,
    pub token: Option<Token>,
    pub score: f64,
}

/// Internal construction item; the history is kept recent-most first.
#[derive(Debug, Clone)]
pub(crate) struct InitItem {
    pub history: Vec<Token>,
    /// Predicted word, or zero for a back-off weight.
    pub token: Token,
    pub score: LogProbability,
}

#[derive(Debug, Clone)]
pub struct SequenceModel {
    nodes: Vec<Node>,
    probabilities: Vec<WordProbability>,
    sentence_begin: Token,
    sentence_end: Token,
}

impl SequenceModel {
    /// An empty model: one root with back-off weight 1, so every query
    /// returns `certain`.
    pub fn new() -> Self {
        let mut model = SequenceModel {
            nodes: Vec::new(),
            probabilities: Vec::new(),
            sentence_begin: 0,
            sentence_end: 0,
        };
        model.set_items(Vec::new());
        model
    }

    /// Configures the reserved sentence-begin and sentence-end tokens.
    pub fn set_init_and_term(&mut self, init: Token, term: Token) {
        self.sentence_begin = init;
        self.sentence_end = term;
    }

    pub fn init(&self) -> Token {
        self.sentence_begin
    }

    pub fn term(&self) -> Token {
        self.sentence_end
    }

    /// The history in effect at the start of a sequence: the root's child
    /// for the sentence-begin token if the model has one, else the root.
    pub fn initial(&self) -> History {
        match self.find_child(0, self.sentence_begin) {
            Some(n) => History(n as u32),
            None => History::ROOT,
        }
    }

    pub fn cul_de_sac(&self) -> History {
        History::CUL_DE_SAC
    }

    /// Forgets the oldest word, i.e. backs off to the next lower order.
    /// Returns `None` for the empty history.
    pub fn shortened(&self, h: History) -> Option<History> {
        debug_assert!(!h.is_cul_de_sac());
        if h == History::ROOT {
            None
        } else {
            Some(History(self.nodes[h.0 as usize].parent))
        }
    }

    pub fn history_length(&self, h: History) -> u32 {
        debug_assert!(!h.is_cul_de_sac());
        u32::from(self.nodes[h.0 as usize].depth)
    }

    /// The history's tokens ordered oldest-first.
    pub fn history_as_tuple(&self, h: History) -> Vec<Token> {
        debug_assert!(!h.is_cul_de_sac());
        let mut result = Vec::with_capacity(self.history_length(h) as usize);
        let mut n = h.0 as usize;
        while n != 0 {
            result.push(self.nodes[n].token);
            n = self.nodes[n].parent as usize;
        }
        result
    }

    /// The history reached after emitting `w` in context `h`: the deepest
    /// node matched by descending from the root along the new context,
    /// newest word first.
    pub fn advanced(&self, h: History, w: Token) -> History {
        debug_assert!(!h.is_cul_de_sac());
        let depth = self.nodes[h.0 as usize].depth as usize;
        let mut path = vec![0 as Token; depth + 1];
        path[0] = w;
        // walking towards the root yields the old context oldest-first;
        // store it back to front so `path` reads newest-first
        let mut n = h.0 as usize;
        let mut i = depth;
        while i >= 1 {
            path[i] = self.nodes[n].token;
            n = self.nodes[n].parent as usize;
            i -= 1;
        }
        let mut current = 0usize;
        for &t in &path {
            match self.find_child(current, t) {
                Some(child) => current = child,
                None => break,
            }
        }
        History(current as u32)
    }

    /// `p(w | h)` with back-off: back-off weights multiply up while
    /// ascending from `h` until an ancestor predicts `w`. A root without an
    /// entry for `w` still contributes its back-off weight, which yields the
    /// model's finite open-vocabulary fallback mass.
    pub fn probability(&self, w: Token, h: History) -> LogProbability {
        debug_assert!(!h.is_cul_de_sac());
        let mut result = LogProbability::certain();
        let mut n = h.0 as usize;
        loop {
            if let Some(p) = self.find_probability(n, w) {
                return result * p;
            }
            result = result * self.nodes[n].back_off;
            if n == 0 {
                return result;
            }
            n = self.nodes[n].parent as usize;
        }
    }

    /// Replaces the model content from external triples.
    pub fn set(&mut self, entries: &[ModelEntry]) -> Result<(), InputError> {
        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            if !entry.score.is_finite() || entry.score < 0.0 {
                return Err(InputError::InvalidScore(entry.score));
            }
            if entry.token == Some(0) {
                return Err(InputError::ReservedToken);
            }
            if entry.history.contains(&0) {
                return Err(InputError::ReservedToken);
            }
            items.push(InitItem {
                history: entry.history.iter().rev().copied().collect(),
                token: entry.token.unwrap_or(0),
                score: LogProbability::from_score(entry.score),
            });
        }
        self.set_items(items);
        Ok(())
    }

    /// All triples of the model, histories oldest-first. Feeding the result
    /// back through `set` reproduces identical probabilities.
    pub fn get(&self) -> Vec<ModelEntry> {
        let mut result = Vec::new();
        for n in 0..self.nodes.len() - 1 {
            let history = self.history_as_tuple(History(n as u32));
            result.push(ModelEntry {
                history: history.clone(),
                token: None,
                score: self.nodes[n].back_off.score(),
            });
            for wp in &self.probabilities
                [self.nodes[n].first_probability as usize..self.nodes[n + 1].first_probability as usize]
            {
                result.push(ModelEntry {
                    history: history.clone(),
                    token: Some(wp.token),
                    score: wp.probability.score(),
                });
            }
        }
        result
    }

    /// The back-off weight and prediction entries stored at one history
    /// node, without any back-off resolution.
    pub fn get_node(&self, h: History) -> Vec<(Option<Token>, f64)> {
        debug_assert!(!h.is_cul_de_sac());
        let n = h.0 as usize;
        let mut result = vec![(None, self.nodes[n].back_off.score())];
        for wp in &self.probabilities
            [self.nodes[n].first_probability as usize..self.nodes[n + 1].first_probability as usize]
        {
            result.push((Some(wp.token), wp.probability.score()));
        }
        result
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(
            &mut writer,
            &(self.sentence_begin, self.sentence_end, self.get()),
        )?;
        Ok(())
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let (init, term, entries): (Token, Token, Vec<ModelEntry>) =
            bincode::deserialize_from(reader)?;
        let mut model = SequenceModel::new();
        model.set_init_and_term(init, term);
        model.set(&entries)?;
        Ok(model)
    }

    /// Rebuilds the packed trie from construction items.
    ///
    /// Each pending node sorts its item range by (next history word, token),
    /// consumes the exhausted-history prefix as its own back-off weight and
    /// predictions, and partitions the rest into children. Processing is
    /// breadth-first, which makes both the child ranges and the prediction
    /// ranges contiguous in node order.
    pub(crate) fn set_items(&mut self, mut items: Vec<InitItem>) {
        self.nodes.clear();
        self.probabilities.clear();
        self.nodes.push(Node {
            token: 0,
            depth: 0,
            parent: 0,
            first_child: 0,
            first_probability: 0,
            back_off: LogProbability::certain(),
        });

        struct Pending {
            node: usize,
            begin: usize,
            end: usize,
            depth: usize,
        }
        let mut queue = VecDeque::new();
        queue.push_back(Pending {
            node: 0,
            begin: 0,
            end: items.len(),
            depth: 0,
        });

        while let Some(pending) = queue.pop_front() {
            let depth = pending.depth;
            let key = |item: &InitItem| -> (Token, Token) {
                (item.history.get(depth).copied().unwrap_or(0), item.token)
            };
            items[pending.begin..pending.end].sort_by_key(key);

            self.nodes[pending.node].first_probability = self.probabilities.len() as u32;
            let mut i = pending.begin;
            while i < pending.end && items[i].history.len() == depth {
                if items[i].token == 0 {
                    self.nodes[pending.node].back_off = items[i].score;
                } else {
                    self.probabilities.push(WordProbability {
                        token: items[i].token,
                        probability: items[i].score,
                    });
                }
                i += 1;
            }

            self.nodes[pending.node].first_child = self.nodes.len() as u32;
            while i < pending.end {
                let child_token = items[i].history[depth];
                let mut j = i + 1;
                while j < pending.end && items[j].history[depth] == child_token {
                    j += 1;
                }
                let child = self.nodes.len();
                self.nodes.push(Node {
                    token: child_token,
                    depth: (depth + 1) as u16,
                    parent: pending.node as u32,
                    first_child: 0,
                    first_probability: 0,
                    back_off: LogProbability::certain(),
                });
                queue.push_back(Pending {
                    node: child,
                    begin: i,
                    end: j,
                    depth: depth + 1,
                });
                i = j;
            }
        }

        // sentinel bounding the last node's ranges; its own child range is
        // empty by construction
        self.nodes.push(Node {
            token: 0,
            depth: 0,
            parent: 0,
            first_child: self.nodes.len() as u32,
            first_probability: self.probabilities.len() as u32,
            back_off: LogProbability::certain(),
        });
    }

    fn find_child(&self, n: usize, token: Token) -> Option<usize> {
        let begin = self.nodes[n].first_child as usize;
        let end = self.nodes[n + 1].first_child as usize;
        let children = &self.nodes[begin..end];
        children
            .binary_search_by_key(&token, |c| c.token)
            .ok()
            .map(|i| begin + i)
    }

    fn find_probability(&self, n: usize, token: Token) -> Option<LogProbability> {
        let begin = self.nodes[n].first_probability as usize;
        let end = self.nodes[n + 1].first_probability as usize;
        let entries = &self.probabilities[begin..end];
        entries
            .binary_search_by_key(&token, |wp| wp.token)
            .ok()
            .map(|i| entries[i].probability)
    }
}

impl Default for SequenceModel {
    fn default() -> Self {
        Self::new()
    }
}
