//! Evidence collection over estimation lattices.
//!
//! Three accumulators share one target, the [`EvidenceStore`]: the
//! forward-backward accumulator credits posterior-weighted evidence, the
//! Viterbi accumulator credits the single best path, and the one-for-all
//! accumulator credits every edge regardless of probability (used for flat
//! starts). Each carries its own per-node scratch so a lattice can be
//! accumulated by any of them independently.

use crate::estimation::EstimationGraph;
use crate::graph::{EdgeId, NodeMap};
use crate::multigram::{MultigramIndex, MultigramInventory};
use crate::probability::{is_nearly_equal, LogProbability, ProbabilityAccumulator};
use crate::sequence_model::{History, SequenceModel, Token};
use tracing::warn;

/// Accumulated log-weights keyed by `(history, token)`.
///
/// This is the statistics bucket of the EM loop. The void token is never
/// accumulated: it stands for anonymized unknowns and carries no evidence.
#[derive(Debug, Clone, Default)]
pub struct EvidenceStore {
    map: ahash::AHashMap<(History, Token), LogProbability>,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn accumulate(&mut self, history: History, token: Token, weight: LogProbability) {
        if token == MultigramInventory::void_index() {
            return;
        }
        self.map
            .entry((history, token))
            .and_modify(|w| *w += weight)
            .or_insert(weight);
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Total accumulated mass.
    pub fn total(&self) -> LogProbability {
        let mut accu = ProbabilityAccumulator::new();
        for &w in self.map.values() {
            accu.add(w);
        }
        accu.sum()
    }

    /// The largest single evidence value.
    pub fn maximum(&self) -> LogProbability {
        let mut best = LogProbability::impossible();
        for &w in self.map.values() {
            if w > best {
                best = w;
            }
        }
        best
    }

    pub fn maximum_history_length(&self, model: &SequenceModel) -> u32 {
        self.map
            .keys()
            .map(|&(h, _)| model.history_length(h))
            .max()
            .unwrap_or(0)
    }

    /// The store contents as `(history oldest-first, token, mass)` triples,
    /// sorted for deterministic output.
    pub fn as_list(&self, model: &SequenceModel) -> Vec<(Vec<Token>, Token, f64)> {
        let mut result: Vec<(Vec<Token>, Token, f64)> = self
            .map
            .iter()
            .map(|(&(h, t), &w)| (model.history_as_tuple(h), t, w.probability()))
            .collect();
        result.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        result
    }
}

/// Forward-backward (Baum-Welch) evidence over one lattice.
///
/// The two passes run at construction; `accumulate` then credits
/// `weight * gamma(e)` for every edge, where `gamma` is the usual edge
/// posterior. The total likelihood is taken as the geometric mean of the two
/// pass totals, which hedges against small floating point drift between
/// them; a mismatch beyond ULP noise is logged, not raised.
#[derive(Debug)]
pub struct ForwardBackwardAccumulator {
    forward: NodeMap<LogProbability>,
    backward: NodeMap<LogProbability>,
    total: LogProbability,
}

/// Agreement tolerance for diagnostics, in ULPs of the score.
const DIAGNOSTIC_ULPS: u64 = 100;

impl ForwardBackwardAccumulator {
    pub fn new(eg: &EstimationGraph) -> Self {
        let mut forward = NodeMap::new();
        forward.sync(&eg.graph);
        forward.fill(LogProbability::impossible());
        forward[eg.initial] = LogProbability::certain();
        let mut accu = ProbabilityAccumulator::new();
        for &n in eg.topological_order.iter().skip(1) {
            accu.clear();
            for e in eg.graph.incoming_edges(n) {
                accu.add(forward[eg.graph.source(e)] * eg.probabilities[e]);
            }
            forward[n] = accu.sum();
        }

        let mut backward = NodeMap::new();
        backward.sync(&eg.graph);
        backward.fill(LogProbability::impossible());
        backward[eg.terminal] = LogProbability::certain();
        for &n in eg.topological_order.iter().rev().skip(1) {
            accu.clear();
            for e in eg.graph.outgoing_edges(n) {
                accu.add(backward[eg.graph.target(e)] * eg.probabilities[e]);
            }
            backward[n] = accu.sum();
        }

        if !is_nearly_equal(
            forward[eg.terminal].score(),
            backward[eg.initial].score(),
            DIAGNOSTIC_ULPS,
        ) {
            warn!(
                forward = forward[eg.terminal].score(),
                backward = backward[eg.initial].score(),
                "forward and backward totals disagree"
            );
        }
        let total = (forward[eg.terminal] * backward[eg.initial]).pow(0.5);

        ForwardBackwardAccumulator {
            forward,
            backward,
            total,
        }
    }

    /// Likelihood of the pair under the current model.
    pub fn log_lik(&self) -> LogProbability {
        self.total
    }

    pub fn posterior(&self, eg: &EstimationGraph, e: EdgeId) -> LogProbability {
        self.forward[eg.graph.source(e)] * eg.probabilities[e] * self.backward[eg.graph.target(e)]
            / self.total
    }

    pub fn accumulate(&self, eg: &EstimationGraph, weight: LogProbability, store: &mut EvidenceStore) {
        for e in eg.graph.edge_ids() {
            let gamma = self.posterior(eg, e);
            if gamma.score() < 0.0 && !is_nearly_equal(gamma.score(), 0.0, DIAGNOSTIC_ULPS) {
                warn!(edge = e, score = gamma.score(), "excess posterior mass");
            }
            store.accumulate(eg.histories[eg.graph.source(e)], eg.tokens[e], weight * gamma);
        }
    }
}

/// Max-product evidence: remembers the best incoming edge per node and
/// credits the full weight to each edge of the best path.
#[derive(Debug)]
pub struct ViterbiAccumulator {
    forward: NodeMap<LogProbability>,
    best_edge: NodeMap<EdgeId>,
    total: LogProbability,
}

impl ViterbiAccumulator {
    pub fn new(eg: &EstimationGraph) -> Self {
        let mut forward = NodeMap::new();
        forward.sync(&eg.graph);
        forward.fill(LogProbability::impossible());
        forward[eg.initial] = LogProbability::certain();
        let mut best_edge = NodeMap::new();
        best_edge.sync(&eg.graph);
        for &n in eg.topological_order.iter().skip(1) {
            let mut best = LogProbability::impossible();
            let mut best_e = 0;
            for e in eg.graph.incoming_edges(n) {
                let candidate = forward[eg.graph.source(e)] * eg.probabilities[e];
                if candidate > best {
                    best = candidate;
                    best_e = e;
                }
            }
            forward[n] = best;
            best_edge[n] = best_e;
        }
        let total = forward[eg.terminal];
        ViterbiAccumulator {
            forward,
            best_edge,
            total,
        }
    }

    pub fn log_lik(&self) -> LogProbability {
        self.total
    }

    pub fn accumulate(&self, eg: &EstimationGraph, weight: LogProbability, store: &mut EvidenceStore) {
        let mut n = eg.terminal;
        while n != eg.initial {
            let e = self.best_edge[n];
            debug_assert!(e != 0, "accumulating a lattice without a best path");
            store.accumulate(eg.histories[eg.graph.source(e)], eg.tokens[e], weight);
            n = eg.graph.source(e);
        }
    }

    /// The multigram tokens along the best path, in order. The terminator
    /// transition is not part of the segmentation.
    pub fn segment(&self, eg: &EstimationGraph) -> Vec<MultigramIndex> {
        let mut result = Vec::new();
        let mut n = eg.terminal;
        while n != eg.initial {
            let e = self.best_edge[n];
            if eg.graph.target(e) != eg.terminal {
                result.push(eg.tokens[e]);
            }
            n = eg.graph.source(e);
        }
        result.reverse();
        result
    }
}

/// Flat evidence: every edge is credited the full weight, independent of the
/// model. Used to count alignment support before any probabilities exist.
#[derive(Debug, Default)]
pub struct OneForAllAccumulator;

impl OneForAllAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&self, eg: &EstimationGraph, weight: LogProbability, store: &mut EvidenceStore) {
        for e in eg.graph.edge_ids() {
            store.accumulate(eg.histories[eg.graph.source(e)], eg.tokens[e], weight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::{EmergenceMode, EstimationGraphBuilder};
    use crate::probability::Probability;

    fn ambiguous_lattice() -> (EstimationGraph, MultigramInventory, SequenceModel) {
        let mut builder = EstimationGraphBuilder::new();
        builder.add_size_template(1, 1).unwrap();
        builder.add_size_template(2, 2).unwrap();
        builder.set_emergence_mode(EmergenceMode::Emerge);
        let mut inventory = MultigramInventory::new();
        let mut model = SequenceModel::new();
        model.set_init_and_term(8, 9);
        let eg = builder
            .create(&mut inventory, &model, &[1, 2], &[3, 4])
            .unwrap();
        (eg, inventory, model)
    }

    #[test]
    fn forward_equals_backward_within_100_ulps() {
        let (eg, _, _) = ambiguous_lattice();
        let fb = ForwardBackwardAccumulator::new(&eg);
        assert!(is_nearly_equal(
            fb.forward[eg.terminal()].score(),
            fb.backward[eg.initial()].score(),
            100
        ));
    }

    #[test]
    fn posteriors_partition_unity_at_the_split() {
        let (eg, _, model) = ambiguous_lattice();
        let fb = ForwardBackwardAccumulator::new(&eg);
        let mut split_total = 0.0;
        for e in eg.graph.edge_ids() {
            let gamma = fb.posterior(&eg, e);
            // each posterior is a probability
            assert!(gamma.score() > -1e-9);
            if eg.graph.source(e) == eg.initial() {
                split_total += gamma.probability();
            }
            if eg.tokens[e] == model.term() {
                // all mass funnels through the terminator
                assert!(is_nearly_equal(gamma.probability(), 1.0, 100));
            }
        }
        assert!(is_nearly_equal(split_total, 1.0, 100));
    }

    #[test]
    fn forward_backward_evidence_matches_the_path_posteriors() {
        let (eg, _, model) = ambiguous_lattice();
        let fb = ForwardBackwardAccumulator::new(&eg);
        let mut store = EvidenceStore::new();
        fb.accumulate(&eg, LogProbability::certain(), &mut store);
        // tokens 1..3 plus the terminator
        assert_eq!(store.size(), 4);
        // under the uniform model the chain and the diagonal are equally
        // likely, so each of their edges carries posterior 1/2 while the
        // terminator funnels the full mass
        for (history, token, mass) in store.as_list(&model) {
            assert!(history.is_empty());
            let expected = if token == model.term() { 1.0 } else { 0.5 };
            assert!((mass - expected).abs() < 1e-9, "token {token}: {mass}");
        }
    }

    #[test]
    fn viterbi_never_beats_the_forward_total() {
        let (eg, _, _) = ambiguous_lattice();
        let fb = ForwardBackwardAccumulator::new(&eg);
        let viterbi = ViterbiAccumulator::new(&eg);
        assert!(viterbi.log_lik().score() >= fb.log_lik().score());
    }

    #[test]
    fn viterbi_segment_walks_the_best_path() {
        let mut builder = EstimationGraphBuilder::new();
        builder.add_size_template(1, 1).unwrap();
        let mut inventory = MultigramInventory::new();
        let mut model = SequenceModel::new();
        model.set_init_and_term(8, 9);
        let eg = builder
            .create(&mut inventory, &model, &[1], &[1])
            .unwrap();
        let viterbi = ViterbiAccumulator::new(&eg);
        assert_eq!(viterbi.segment(&eg), vec![1]);

        let mut store = EvidenceStore::new();
        viterbi.accumulate(&eg, LogProbability::certain(), &mut store);
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn one_for_all_ignores_probabilities() {
        let (eg, _, model) = ambiguous_lattice();
        let mut store = EvidenceStore::new();
        OneForAllAccumulator::new().accumulate(
            &eg,
            LogProbability::from(Probability::new(0.5)),
            &mut store,
        );
        for (_, _, mass) in store.as_list(&model) {
            assert!((mass - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn void_token_is_never_accumulated() {
        let mut store = EvidenceStore::new();
        let model = SequenceModel::new();
        store.accumulate(model.initial(), 0, LogProbability::certain());
        assert!(store.is_empty());
        store.accumulate(model.initial(), 1, LogProbability::certain());
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn store_totals_and_maximum() {
        let model = SequenceModel::new();
        let h = model.initial();
        let mut store = EvidenceStore::new();
        store.accumulate(h, 1, LogProbability::from(Probability::new(0.25)));
        store.accumulate(h, 2, LogProbability::from(Probability::new(0.5)));
        store.accumulate(h, 1, LogProbability::from(Probability::new(0.25)));
        assert_eq!(store.size(), 2);
        assert!(is_nearly_equal(store.total().probability(), 1.0, 100));
        assert!(is_nearly_equal(store.maximum().probability(), 0.5, 100));
        assert_eq!(store.maximum_history_length(&model), 0);
    }
}
