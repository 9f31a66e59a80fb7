// core/src/translator.rs
//
// A* decoding of a source sequence into the most probable multigram
// sequence under a frozen inventory and sequence model. Single best search
// runs over the implicit (position, history) state space; N-best first
// materialises that space into an explicit chart, then enumerates paths with
// a backward A* whose admissible heuristic is the chart's forward score.

use crate::error::TranslationError;
use crate::graph::{EdgeMap, Graph, NodeId, NodeMap};
use crate::multigram::{Multigram, MultigramIndex, MultigramInventory, Symbol, MAX_MULTIGRAM_LENGTH};
use crate::priority_queue::{PriorityQueue, TracedPriorityQueue};
use crate::probability::LogProbability;
use crate::sequence_model::{History, SequenceModel, Token};
use std::rc::Rc;

/// Shared back-trace record; each search extension allocates one node
/// pointing at its predecessor, so sibling hypotheses share their common
/// prefix.
#[derive(Debug)]
struct Trace {
    back: Option<Rc<Trace>>,
    q: Token,
    p: LogProbability,
}

/// Search state: source positions covered so far plus the language model
/// context in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct State {
    pos: u32,
    history: History,
}

#[derive(Debug, Clone, Copy)]
struct BuildHyp {
    state: State,
    p: LogProbability,
}

#[derive(Debug, Clone)]
struct Hyp {
    state: State,
    p: LogProbability,
    q: Token,
    trace: Option<Rc<Trace>>,
}

fn hyp_key(h: &Hyp) -> State {
    h.state
}

fn hyp_precedes(a: &Hyp, b: &Hyp) -> bool {
    a.p > b.p
}

fn build_hyp_key(h: &BuildHyp) -> State {
    h.state
}

fn build_hyp_precedes(a: &BuildHyp, b: &BuildHyp) -> bool {
    a.p > b.p
}

type Open = TracedPriorityQueue<Hyp, State>;
type Closed = ahash::AHashMap<State, LogProbability>;

pub struct Translator {
    left_map: ahash::AHashMap<Multigram, Vec<Token>>,
    min_left_len: u32,
    max_left_len: u32,
    stack_limit: u32,
    stack_usage: u32,
    open: Open,
    closed: Closed,
    open_nodes: TracedPriorityQueue<BuildHyp, State>,
    state_nodes: ahash::AHashMap<State, NodeId>,
}

impl Translator {
    pub fn new() -> Self {
        Translator {
            left_map: ahash::AHashMap::new(),
            min_left_len: MAX_MULTIGRAM_LENGTH as u32,
            max_left_len: 0,
            stack_limit: u32::MAX,
            stack_usage: 0,
            open: TracedPriorityQueue::new(hyp_key, hyp_precedes),
            closed: Closed::new(),
            open_nodes: TracedPriorityQueue::new(build_hyp_key, build_hyp_precedes),
            state_nodes: ahash::AHashMap::new(),
        }
    }

    /// Indexes the inventory by left multigram. Must be called again after
    /// the inventory changes.
    pub fn set_multigram_inventory(&mut self, inventory: &MultigramInventory) {
        self.left_map.clear();
        self.min_left_len = MAX_MULTIGRAM_LENGTH as u32;
        self.max_left_len = 0;
        for q in 1..=inventory.size() as MultigramIndex {
            let jmg = inventory.symbol(q);
            self.left_map.entry(jmg.left).or_default().push(q);
            self.min_left_len = self.min_left_len.min(jmg.left.length());
            self.max_left_len = self.max_left_len.max(jmg.left.length());
        }
    }

    /// Bounds the open queue; exceeding it aborts the call with a
    /// recoverable error and clean state.
    pub fn set_stack_limit(&mut self, limit: u32) {
        self.stack_limit = limit;
    }

    /// Largest open-queue size observed since the last call; reading resets
    /// the gauge.
    pub fn stack_usage(&mut self) -> u32 {
        let result = self.stack_usage;
        self.stack_usage = 0;
        result
    }

    /// Single best translation of `left` into multigram indices, A* over
    /// the implicit state space. The closed map is monotone: the first pop
    /// of a state is optimal, so re-expansions are skipped wholesale.
    pub fn translate(
        &mut self,
        model: &SequenceModel,
        left: &[Symbol],
    ) -> Result<(LogProbability, Vec<MultigramIndex>), TranslationError> {
        debug_assert!(self.open.is_empty());
        debug_assert!(self.closed.is_empty());
        let mut max_stack_size = 0usize;

        self.open.insert(Hyp {
            state: State {
                pos: 0,
                history: model.initial(),
            },
            p: LogProbability::certain(),
            q: model.init(),
            trace: None,
        });

        let goal = loop {
            let current = match self.open.pop() {
                Some(h) => h,
                None => {
                    self.closed.clear();
                    return Err(TranslationError::TranslationFailed);
                }
            };
            debug_assert!(!self.closed.contains_key(&current.state));
            self.closed.insert(current.state, current.p);

            let trace = Rc::new(Trace {
                back: current.trace.clone(),
                q: current.q,
                p: current.p,
            });

            if current.state.history == model.cul_de_sac() && current.q == model.term() {
                debug_assert_eq!(current.state.pos as usize, left.len());
                break trace;
            }

            let lb = current.state.pos as usize;
            let le_end = (lb + self.max_left_len as usize).min(left.len());
            for le in lb + self.min_left_len as usize..=le_end {
                let lmg = Multigram::from_symbols(&left[lb..le]);
                if let Some(tokens) = self.left_map.get(&lmg) {
                    for &q in tokens {
                        let next = Hyp {
                            state: State {
                                pos: le as u32,
                                history: model.advanced(current.state.history, q),
                            },
                            p: current.p * model.probability(q, current.state.history),
                            q,
                            trace: Some(trace.clone()),
                        };
                        insert_or_relax(&mut self.open, &self.closed, next);
                    }
                }
            }
            if current.state.pos as usize == left.len() {
                let q = model.term();
                let next = Hyp {
                    state: State {
                        pos: left.len() as u32,
                        history: model.cul_de_sac(),
                    },
                    p: current.p * model.probability(q, current.state.history),
                    q,
                    trace: Some(trace.clone()),
                };
                insert_or_relax(&mut self.open, &self.closed, next);
            }

            max_stack_size = max_stack_size.max(self.open.len());
            if self.open.len() > self.stack_limit as usize {
                self.open.clear();
                self.closed.clear();
                return Err(TranslationError::StackLimitExceeded);
            }
        };

        self.stack_usage = self.stack_usage.max(max_stack_size as u32);
        self.open.clear();
        self.closed.clear();

        Ok((goal.p, trace_to_indices(&goal)))
    }

    /// Builds the explicit translation chart for `left` and prepares the
    /// backward N-best enumeration over it.
    pub fn n_best_init(
        &mut self,
        model: &SequenceModel,
        left: &[Symbol],
    ) -> Result<NBestContext, TranslationError> {
        debug_assert!(self.open_nodes.is_empty());
        debug_assert!(self.state_nodes.is_empty());
        let mut max_stack_size = 0usize;

        let mut context = NBestContext::new(self.stack_limit);
        let start = State {
            pos: 0,
            history: model.initial(),
        };
        context.initial = context.graph.new_node();
        self.state_nodes.insert(start, context.initial);
        context.forward.set(context.initial, LogProbability::invalid());
        self.open_nodes.insert(BuildHyp {
            state: start,
            p: LogProbability::certain(),
        });

        while let Some(current) = self.open_nodes.pop() {
            let current_node = self.state_nodes[&current.state];
            debug_assert!(context.forward[current_node] == LogProbability::invalid());
            context.forward[current_node] = current.p;

            if current.state.history == model.cul_de_sac() {
                debug_assert_eq!(current.state.pos as usize, left.len());
                continue;
            }

            let lb = current.state.pos as usize;
            let le_end = (lb + self.max_left_len as usize).min(left.len());
            for le in lb + self.min_left_len as usize..=le_end {
                let lmg = Multigram::from_symbols(&left[lb..le]);
                let Some(tokens) = self.left_map.get(&lmg) else {
                    continue;
                };
                for &q in tokens {
                    let next = BuildHyp {
                        state: State {
                            pos: le as u32,
                            history: model.advanced(current.state.history, q),
                        },
                        p: current.p * model.probability(q, current.state.history),
                    };
                    build_and_insert_or_relax(
                        &mut self.open_nodes,
                        &mut self.state_nodes,
                        &mut context,
                        model,
                        &current,
                        current_node,
                        next,
                        q,
                    );
                }
            }
            if current.state.pos as usize == left.len() {
                let q = model.term();
                let next = BuildHyp {
                    state: State {
                        pos: left.len() as u32,
                        history: model.cul_de_sac(),
                    },
                    p: current.p * model.probability(q, current.state.history),
                };
                build_and_insert_or_relax(
                    &mut self.open_nodes,
                    &mut self.state_nodes,
                    &mut context,
                    model,
                    &current,
                    current_node,
                    next,
                    q,
                );
            }

            max_stack_size = max_stack_size.max(self.open_nodes.len());
            if self.open_nodes.len() > self.stack_limit as usize {
                self.open_nodes.clear();
                self.state_nodes.clear();
                return Err(TranslationError::StackLimitExceeded);
            }
        }

        let goal = State {
            pos: left.len() as u32,
            history: model.cul_de_sac(),
        };
        context.terminal = self.state_nodes.get(&goal).copied().unwrap_or(0);
        self.state_nodes.clear();
        self.stack_usage = self.stack_usage.max(max_stack_size as u32);

        if context.terminal == 0 {
            return Err(TranslationError::TranslationFailed);
        }
        context.init_stack();
        Ok(context)
    }

    /// The next-best translation from an N-best context, in non-increasing
    /// probability order.
    pub fn n_best_next(
        &mut self,
        context: &mut NBestContext,
    ) -> Result<(LogProbability, Vec<MultigramIndex>), TranslationError> {
        match context.next()? {
            Some(trace) => Ok((trace.p, forward_trace_to_indices(&trace, context.term_token))),
            None => Err(TranslationError::NoFurtherTranslations),
        }
    }

    pub fn n_best_best_log_lik(&self, context: &NBestContext) -> LogProbability {
        context.best_log_lik()
    }

    pub fn n_best_total_log_lik(&self, context: &NBestContext) -> LogProbability {
        context.total_log_lik()
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_or_relax(open: &mut Open, closed: &Closed, next: Hyp) -> bool {
    if let Some(&best) = closed.get(&next.state) {
        // the closed map is monotone; a re-derived hypothesis can never win
        debug_assert!(next.p <= best);
        false
    } else {
        open.insert_or_relax(next)
    }
}

#[allow(clippy::too_many_arguments)]
fn build_and_insert_or_relax(
    open_nodes: &mut TracedPriorityQueue<BuildHyp, State>,
    state_nodes: &mut ahash::AHashMap<State, NodeId>,
    context: &mut NBestContext,
    model: &SequenceModel,
    current: &BuildHyp,
    current_node: NodeId,
    next: BuildHyp,
    token: Token,
) -> bool {
    let next_node = match state_nodes.get(&next.state) {
        Some(&n) => n,
        None => {
            let n = context.graph.new_node();
            state_nodes.insert(next.state, n);
            context.forward.set(n, LogProbability::invalid());
            n
        }
    };
    let edge = context.graph.new_edge(current_node, next_node);
    context.tokens.set(edge, token);
    context
        .probabilities
        .set(edge, model.probability(token, current.state.history));
    if context.forward[next_node] == LogProbability::invalid() {
        open_nodes.insert_or_relax(next)
    } else {
        debug_assert!(next.p <= context.forward[next_node]);
        false
    }
}

/// Walks a goal trace of the single-best search. The chain runs newest
/// first, so the reversal yields `[init, q1 .. qn, term]`; the reserved
/// sentinels are stripped from the result.
fn trace_to_indices(goal: &Rc<Trace>) -> Vec<MultigramIndex> {
    let mut result = Vec::new();
    let mut cursor = Some(goal);
    while let Some(t) = cursor {
        result.push(t.q);
        cursor = t.back.as_ref();
    }
    result.reverse();
    result.remove(0);
    result.pop();
    result
}

/// Walks an N-best trace, which is already ordered first edge first; only
/// the trailing terminator needs stripping.
fn forward_trace_to_indices(goal: &Rc<Trace>, term: Token) -> Vec<MultigramIndex> {
    let mut result = Vec::new();
    let mut cursor = Some(goal);
    while let Some(t) = cursor {
        result.push(t.q);
        cursor = t.back.as_ref();
    }
    debug_assert_eq!(result.last(), Some(&term));
    result.pop();
    result
}

#[derive(Debug)]
struct NBestHyp {
    n: NodeId,
    trace: Option<Rc<Trace>>,
    p: LogProbability,
    priority: LogProbability,
}

fn n_best_precedes(a: &NBestHyp, b: &NBestHyp) -> bool {
    a.priority > b.priority
}

/// Explicit translation chart plus the stateful backward enumeration over
/// it. The priority of a partial backward path is its own probability times
/// the chart's best forward score at its node, which is admissible, so
/// completed paths leave the queue in non-increasing probability order.
#[derive(Debug)]
pub struct NBestContext {
    graph: Graph,
    initial: NodeId,
    terminal: NodeId,
    tokens: EdgeMap<Token>,
    probabilities: EdgeMap<LogProbability>,
    forward: NodeMap<LogProbability>,
    open: PriorityQueue<NBestHyp>,
    stack_limit: u32,
    term_token: Token,
}

impl NBestContext {
    fn new(stack_limit: u32) -> Self {
        NBestContext {
            graph: Graph::new(),
            initial: 0,
            terminal: 0,
            tokens: EdgeMap::new(),
            probabilities: EdgeMap::new(),
            forward: NodeMap::new(),
            open: PriorityQueue::new(n_best_precedes),
            stack_limit,
            term_token: 0,
        }
    }

    fn init_stack(&mut self) {
        self.open.clear();
        // remember the terminator for result stripping
        self.term_token = self
            .graph
            .incoming_edges(self.terminal)
            .next()
            .map(|e| self.tokens[e])
            .unwrap_or(0);
        self.open.insert(NBestHyp {
            n: self.terminal,
            trace: None,
            p: LogProbability::certain(),
            priority: self.forward[self.terminal],
        });
    }

    fn next(&mut self) -> Result<Option<Rc<Trace>>, TranslationError> {
        while let Some(current) = self.open.pop() {
            if current.n == self.initial {
                return Ok(current.trace);
            }
            for e in self.graph.incoming_edges(current.n) {
                let p = current.p * self.probabilities[e];
                let source = self.graph.source(e);
                self.open.insert(NBestHyp {
                    n: source,
                    trace: Some(Rc::new(Trace {
                        back: current.trace.clone(),
                        q: self.tokens[e],
                        p,
                    })),
                    p,
                    priority: p * self.forward[source],
                });
            }
            if self.open.len() > self.stack_limit as usize {
                self.open.clear();
                return Err(TranslationError::StackLimitExceeded);
            }
        }
        Ok(None)
    }

    /// Probability of the best path, read off the chart.
    pub fn best_log_lik(&self) -> LogProbability {
        self.forward[self.terminal]
    }

    /// Total probability over all chart paths, by a forward log-sum pass in
    /// topological order.
    ///
    /// Charts containing empty-input multigrams have cycles, which the
    /// sorter silently tolerates; initialising the sums from the chart's
    /// best-per-node values keeps the resulting error low.
    pub fn total_log_lik(&self) -> LogProbability {
        let mut order = Vec::new();
        crate::graph::GraphSorter::new().sort(&self.graph, self.initial, &mut order);

        let mut forward: NodeMap<LogProbability> = NodeMap::new();
        forward.sync(&self.graph);
        for &n in &order {
            forward[n] = self.forward[n];
        }
        let mut accu = crate::probability::ProbabilityAccumulator::new();
        for &n in order.iter().skip(1) {
            accu.clear();
            for e in self.graph.incoming_edges(n) {
                accu.add(forward[self.graph.source(e)] * self.probabilities[e]);
            }
            forward[n] = accu.sum();
        }
        forward[self.terminal]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multigram::JointMultigram;
    use crate::probability::is_nearly_equal;
    use crate::sequence_model::ModelEntry;

    const INIT: Token = 90;
    const TERM: Token = 91;

    fn uniform_model(tokens: &[Token], p: f64) -> SequenceModel {
        let mut entries = vec![ModelEntry {
            history: vec![],
            token: None,
            score: -(1e-4f64).ln(),
        }];
        for &t in tokens {
            entries.push(ModelEntry {
                history: vec![],
                token: Some(t),
                score: -p.ln(),
            });
        }
        entries.push(ModelEntry {
            history: vec![],
            token: Some(TERM),
            score: -p.ln(),
        });
        let mut model = SequenceModel::new();
        model.set_init_and_term(INIT, TERM);
        model.set(&entries).unwrap();
        model
    }

    /// Inventory over graphemes {1, 2}: 1/(7), 2/(8), and the fused 12/(9).
    fn ambiguous_setup() -> (MultigramInventory, SequenceModel, Translator) {
        let mut inventory = MultigramInventory::new();
        inventory.index(&JointMultigram::new(&[1], &[7]));
        inventory.index(&JointMultigram::new(&[2], &[8]));
        inventory.index(&JointMultigram::new(&[1, 2], &[9]));
        let model = uniform_model(&[1, 2, 3], 0.125);
        let mut translator = Translator::new();
        translator.set_multigram_inventory(&inventory);
        (inventory, model, translator)
    }

    #[test]
    fn translates_the_single_symbol_case() {
        let mut inventory = MultigramInventory::new();
        inventory.index(&JointMultigram::new(&[1], &[7]));
        let model = uniform_model(&[1], 0.25);
        let mut translator = Translator::new();
        translator.set_multigram_inventory(&inventory);

        let (p, result) = translator.translate(&model, &[1]).unwrap();
        assert_eq!(result, vec![1]);
        // p(q1) * p(term)
        assert!(is_nearly_equal(p.probability(), 0.25 * 0.25, 100));
    }

    #[test]
    fn prefers_the_shorter_segmentation_when_it_wins() {
        let (_, model, mut translator) = ambiguous_setup();
        // the fused multigram covers both symbols in one step: p * p(term)
        // beats p * p * p(term)
        let (p, result) = translator.translate(&model, &[1, 2]).unwrap();
        assert_eq!(result, vec![3]);
        assert!(is_nearly_equal(p.probability(), 0.125 * 0.125, 100));
    }

    #[test]
    fn translation_of_uncovered_input_fails_cleanly() {
        let (_, model, mut translator) = ambiguous_setup();
        let err = translator.translate(&model, &[5]).unwrap_err();
        assert_eq!(err, TranslationError::TranslationFailed);
        // the search state is reusable afterwards
        assert!(translator.translate(&model, &[1]).is_ok());
    }

    #[test]
    fn stack_limit_aborts_and_leaves_clean_state() {
        let (_, model, mut translator) = ambiguous_setup();
        translator.set_stack_limit(1);
        let err = translator.translate(&model, &[1, 2]).unwrap_err();
        assert_eq!(err, TranslationError::StackLimitExceeded);

        translator.set_stack_limit(u32::MAX);
        assert!(translator.translate(&model, &[1, 2]).is_ok());
    }

    #[test]
    fn n_best_enumerates_in_non_increasing_order_and_exhausts() {
        let (_, model, mut translator) = ambiguous_setup();
        let mut context = translator.n_best_init(&model, &[1, 2]).unwrap();

        let (p1, r1) = translator.n_best_next(&mut context).unwrap();
        let (p2, r2) = translator.n_best_next(&mut context).unwrap();
        assert!(p1 >= p2);
        assert_eq!(r1, vec![3]);
        assert_eq!(r2, vec![1, 2]);

        let err = translator.n_best_next(&mut context).unwrap_err();
        assert_eq!(err, TranslationError::NoFurtherTranslations);
    }

    #[test]
    fn n_best_first_matches_single_best_and_best_log_lik() {
        let (_, model, mut translator) = ambiguous_setup();
        let (best_p, best_r) = translator.translate(&model, &[1, 2]).unwrap();
        let mut context = translator.n_best_init(&model, &[1, 2]).unwrap();
        let (p1, r1) = translator.n_best_next(&mut context).unwrap();

        assert_eq!(best_r, r1);
        assert!(is_nearly_equal(best_p.score(), p1.score(), 100));
        assert!(is_nearly_equal(
            translator.n_best_best_log_lik(&context).score(),
            p1.score(),
            100
        ));
    }

    #[test]
    fn total_log_lik_sums_both_alignments() {
        let (_, model, mut translator) = ambiguous_setup();
        let context = translator.n_best_init(&model, &[1, 2]).unwrap();
        let total = translator.n_best_total_log_lik(&context).probability();
        let fused = 0.125 * 0.125;
        let split = 0.125 * 0.125 * 0.125;
        assert!(is_nearly_equal(total, fused + split, 100));
    }

    #[test]
    fn equally_likely_alignments_both_surface() {
        // two multigrams with the same left side and uniform scores
        let mut inventory = MultigramInventory::new();
        inventory.index(&JointMultigram::new(&[1], &[7]));
        inventory.index(&JointMultigram::new(&[1], &[8]));
        let model = uniform_model(&[1, 2], 0.25);
        let mut translator = Translator::new();
        translator.set_multigram_inventory(&inventory);

        let mut context = translator.n_best_init(&model, &[1]).unwrap();
        let (p1, r1) = translator.n_best_next(&mut context).unwrap();
        let (p2, r2) = translator.n_best_next(&mut context).unwrap();
        assert_eq!(p1.score(), p2.score());
        let mut seen = vec![r1, r2];
        seen.sort();
        assert_eq!(seen, vec![vec![1], vec![2]]);
        assert_eq!(
            translator.n_best_next(&mut context).unwrap_err(),
            TranslationError::NoFurtherTranslations
        );
    }

    #[test]
    fn n_best_respects_the_stack_limit() {
        let (_, model, mut translator) = ambiguous_setup();
        translator.set_stack_limit(1);
        let err = translator.n_best_init(&model, &[1, 2]).unwrap_err();
        assert_eq!(err, TranslationError::StackLimitExceeded);

        translator.set_stack_limit(u32::MAX);
        assert!(translator.n_best_init(&model, &[1, 2]).is_ok());
    }

    #[test]
    fn stack_usage_gauge_reports_and_resets() {
        let (_, model, mut translator) = ambiguous_setup();
        translator.translate(&model, &[1, 2]).unwrap();
        assert!(translator.stack_usage() > 0);
        assert_eq!(translator.stack_usage(), 0);
    }
}
