//! Alignment lattice construction for training pairs.
//!
//! For a pair of symbol sequences the builder enumerates every way of
//! consuming them through the configured size templates, producing a DAG
//! whose nodes are reachable `(left position, right position, history)`
//! states and whose edges carry one sequence-model token each. The graph
//! comes with a topological node order, a per-node history map and a
//! per-edge log-probability map; the latter two can be re-synced against an
//! updated sequence model without rebuilding, which is what the EM loop does
//! between iterations.

use crate::error::{EstimationError, InputError};
use crate::graph::{EdgeMap, Graph, NodeId, NodeMap};
use crate::multigram::{JointMultigram, MultigramInventory, Symbol, MAX_MULTIGRAM_LENGTH};
use crate::probability::LogProbability;
use crate::sequence_model::{History, SequenceModel, Token};

/// Policy for joint multigrams that are not yet in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmergenceMode {
    /// Insert the multigram and assign a fresh index.
    #[default]
    Emerge,
    /// Drop the edge entirely.
    Suppress,
    /// Keep the edge, encoded with the void index.
    Anonymize,
}

/// Alignment DAG for one training pair.
///
/// `topological_order` starts at the initial node and ends at the final
/// node. The history map gives the sequence-model context in effect at each
/// node; the final node is the cul-de-sac.
#[derive(Debug, Clone)]
pub struct EstimationGraph {
    pub(crate) graph: Graph,
    pub(crate) initial: NodeId,
    pub(crate) terminal: NodeId,
    pub(crate) tokens: EdgeMap<Token>,
    pub(crate) probabilities: EdgeMap<LogProbability>,
    pub(crate) topological_order: Vec<NodeId>,
    pub(crate) histories: NodeMap<History>,
}

impl EstimationGraph {
    pub(crate) fn new() -> Self {
        EstimationGraph {
            graph: Graph::new(),
            initial: 0,
            terminal: 0,
            tokens: EdgeMap::new(),
            probabilities: EdgeMap::new(),
            topological_order: Vec::new(),
            histories: NodeMap::new(),
        }
    }

    fn clear(&mut self) {
        self.graph.clear();
        self.initial = 0;
        self.terminal = 0;
        self.tokens.clear();
        self.probabilities.clear();
        self.topological_order.clear();
        self.histories.clear();
    }

    /// Number of nodes, including the final node.
    pub fn node_count(&self) -> u32 {
        self.graph.n_nodes() - 1
    }

    pub fn edge_count(&self) -> u32 {
        self.graph.n_edges() - 1
    }

    pub fn initial(&self) -> NodeId {
        self.initial
    }

    pub fn terminal(&self) -> NodeId {
        self.terminal
    }

    /// Recomputes the node history map by propagating `advanced` along every
    /// edge in topological order. All in-edges of a node must agree on the
    /// resulting history; a disagreement means the lattice no longer fits
    /// the model and is a defect.
    pub fn update_histories(&mut self, model: &SequenceModel) {
        self.histories.sync(&self.graph);
        self.histories.fill(model.cul_de_sac());
        self.histories[self.initial] = model.initial();
        for &n in &self.topological_order {
            if n == self.terminal {
                continue;
            }
            let history = self.histories[n];
            for e in self.graph.outgoing_edges(n) {
                let target = self.graph.target(e);
                if target == self.terminal {
                    continue;
                }
                let advanced = model.advanced(history, self.tokens[e]);
                assert!(
                    self.histories[target] == model.cul_de_sac()
                        || self.histories[target] == advanced,
                    "lattice in-edges disagree on the resulting history"
                );
                self.histories[target] = advanced;
            }
        }
    }

    /// Refreshes every edge's log-probability from the model, given the
    /// current history map.
    pub fn update_probabilities(&mut self, model: &SequenceModel) {
        self.probabilities.sync(&self.graph);
        for e in self.graph.edge_ids() {
            self.probabilities[e] =
                model.probability(self.tokens[e], self.histories[self.graph.source(e)]);
        }
    }

    /// Compacts over-allocated construction scratch.
    pub fn trim(&mut self) {
        self.graph.trim();
        self.tokens.trim();
        self.probabilities.trim();
        self.histories.trim();
        self.topological_order.shrink_to_fit();
    }
}

/// Map value for descriptors whose node is on the DFS stack but has not been
/// materialised yet.
const GREY: NodeId = 0xFFF_FFFF;
/// Map value for descriptors explored without finding a path to the final
/// node.
const DEAD: NodeId = 0xFFF_FFFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeDesc {
    left: u32,
    right: u32,
    history: History,
}

#[derive(Debug, Clone, Copy)]
struct StackItem {
    desc: NodeDesc,
    template: usize,
}

/// Builds estimation lattices; owns the transient DFS scratch, which is
/// reused across pairs. Two builds must not be interleaved on one builder.
#[derive(Debug, Default)]
pub struct EstimationGraphBuilder {
    size_templates: Vec<(u32, u32)>,
    emergence_mode: EmergenceMode,
    states: ahash::AHashMap<NodeDesc, NodeId>,
    stack: Vec<StackItem>,
}

impl EstimationGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permits the alignment to consume `left_len` source and `right_len`
    /// target symbols in one step. Both sides are bounded by the multigram
    /// capacity and at least one side must consume something.
    pub fn add_size_template(&mut self, left_len: u32, right_len: u32) -> Result<(), InputError> {
        if left_len + right_len == 0
            || left_len as usize > MAX_MULTIGRAM_LENGTH
            || right_len as usize > MAX_MULTIGRAM_LENGTH
        {
            return Err(InputError::SizeTemplateOutOfRange(left_len, right_len));
        }
        self.size_templates.push((left_len, right_len));
        Ok(())
    }

    pub fn clear_size_templates(&mut self) {
        self.size_templates.clear();
    }

    pub fn set_emergence_mode(&mut self, mode: EmergenceMode) {
        self.emergence_mode = mode;
    }

    pub fn create(
        &mut self,
        inventory: &mut MultigramInventory,
        model: &SequenceModel,
        left: &[Symbol],
        right: &[Symbol],
    ) -> Result<EstimationGraph, EstimationError> {
        let mut graph = EstimationGraph::new();
        self.build(&mut graph, inventory, model, left, right)?;
        Ok(graph)
    }

    /// Rebuilds `eg` in place for the given pair.
    ///
    /// Nodes are discovered by an explicit-stack DFS over descriptors. A
    /// node is materialised lazily, the first time an edge is attached to
    /// it; descriptors whose every expansion fails are marked dead so other
    /// paths skip them. The post-order of the DFS, reversed, doubles as the
    /// topological node order.
    pub fn build(
        &mut self,
        eg: &mut EstimationGraph,
        inventory: &mut MultigramInventory,
        model: &SequenceModel,
        left: &[Symbol],
        right: &[Symbol],
    ) -> Result<(), EstimationError> {
        eg.clear();
        self.states.clear();
        self.stack.clear();
        let mut post_order: Vec<NodeId> = Vec::new();

        let initial_desc = NodeDesc {
            left: 0,
            right: 0,
            history: model.initial(),
        };
        self.states.insert(initial_desc, GREY);
        self.stack.push(StackItem {
            desc: initial_desc,
            template: 0,
        });

        while let Some(&StackItem { desc, template }) = self.stack.last() {
            if desc.left as usize == left.len() && desc.right as usize == right.len() {
                if eg.terminal == 0 {
                    eg.terminal = eg.graph.new_node();
                    post_order.push(eg.terminal);
                }
                let node = self.materialize(eg, desc);
                let edge = eg.graph.new_edge(node, eg.terminal);
                eg.tokens.set(edge, model.term());
                post_order.push(node);
                self.stack.pop();
                continue;
            }

            if template < self.size_templates.len() {
                self.stack.last_mut().unwrap().template += 1;
                let (l, r) = self.size_templates[template];
                if desc.left + l > left.len() as u32 || desc.right + r > right.len() as u32 {
                    continue;
                }
                let jmg = JointMultigram::new(
                    &left[desc.left as usize..(desc.left + l) as usize],
                    &right[desc.right as usize..(desc.right + r) as usize],
                );
                let token: Token = match self.emergence_mode {
                    EmergenceMode::Emerge => inventory.index(&jmg),
                    EmergenceMode::Suppress => {
                        let i = inventory.test_index(&jmg);
                        if i == MultigramInventory::void_index() {
                            continue;
                        }
                        i
                    }
                    EmergenceMode::Anonymize => inventory.test_index(&jmg),
                };
                let next = NodeDesc {
                    left: desc.left + l,
                    right: desc.right + r,
                    history: model.advanced(desc.history, token),
                };
                match self.states.get(&next).copied() {
                    None => {
                        // revisit this template once the target is resolved
                        self.stack.last_mut().unwrap().template -= 1;
                        self.states.insert(next, GREY);
                        self.stack.push(StackItem {
                            desc: next,
                            template: 0,
                        });
                    }
                    Some(GREY) => {
                        self.states.clear();
                        self.stack.clear();
                        eg.clear();
                        return Err(EstimationError::CycleDetected);
                    }
                    Some(DEAD) => {}
                    Some(target) => {
                        let node = self.materialize(eg, desc);
                        let edge = eg.graph.new_edge(node, target);
                        eg.tokens.set(edge, token);
                    }
                }
            } else {
                match self.states.get(&desc).copied() {
                    Some(GREY) => {
                        // no edge ever left this descriptor
                        self.states.insert(desc, DEAD);
                    }
                    Some(node) => post_order.push(node),
                    None => unreachable!("descriptor vanished from the state map"),
                }
                self.stack.pop();
            }
        }

        let initial_state = self.states.get(&initial_desc).copied();
        self.states.clear();
        match initial_state {
            Some(node) if node != DEAD && node != GREY => eg.initial = node,
            _ => {
                eg.clear();
                return Err(EstimationError::FinalNodeNotReachable);
            }
        }

        post_order.reverse();
        eg.topological_order = post_order;
        debug_assert_eq!(eg.topological_order.first(), Some(&eg.initial));
        debug_assert_eq!(eg.topological_order.last(), Some(&eg.terminal));

        eg.update_histories(model);
        eg.update_probabilities(model);
        Ok(())
    }

    /// Re-syncs a retained lattice against an updated model.
    pub fn update(&self, eg: &mut EstimationGraph, model: &SequenceModel) {
        eg.update_histories(model);
        eg.update_probabilities(model);
    }

    fn materialize(&mut self, eg: &mut EstimationGraph, desc: NodeDesc) -> NodeId {
        let state = self.states.get_mut(&desc).expect("unregistered descriptor");
        if *state == GREY {
            *state = eg.graph.new_node();
        }
        *state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates(builder: &mut EstimationGraphBuilder, specs: &[(u32, u32)]) {
        for &(l, r) in specs {
            builder.add_size_template(l, r).unwrap();
        }
    }

    #[test]
    fn size_template_validation() {
        let mut builder = EstimationGraphBuilder::new();
        assert!(builder.add_size_template(0, 0).is_err());
        assert!(builder.add_size_template(9, 1).is_err());
        assert!(builder.add_size_template(1, 0).is_ok());
        assert!(builder.add_size_template(1, 1).is_ok());
        // duplicates are permitted
        assert!(builder.add_size_template(1, 1).is_ok());
    }

    #[test]
    fn degenerate_pair_builds_a_two_edge_chain() {
        let mut builder = EstimationGraphBuilder::new();
        templates(&mut builder, &[(1, 1)]);
        let mut inventory = MultigramInventory::new();
        let mut model = SequenceModel::new();
        model.set_init_and_term(2, 3);

        let eg = builder
            .create(&mut inventory, &model, &[1], &[1])
            .unwrap();
        // initial, one interior state is the consumed state, plus final
        assert_eq!(eg.node_count(), 3);
        assert_eq!(eg.edge_count(), 2);
        assert_eq!(inventory.size(), 1);
        assert_eq!(eg.topological_order.len(), 3);
        assert_eq!(eg.topological_order[0], eg.initial());
        assert_eq!(*eg.topological_order.last().unwrap(), eg.terminal());
    }

    #[test]
    fn ambiguous_split_has_three_internal_nodes_and_four_edges() {
        let mut builder = EstimationGraphBuilder::new();
        templates(&mut builder, &[(1, 1), (2, 2)]);
        let mut inventory = MultigramInventory::new();
        let mut model = SequenceModel::new();
        model.set_init_and_term(8, 9);

        let eg = builder
            .create(&mut inventory, &model, &[1, 2], &[3, 4])
            .unwrap();
        // (0,0), (1,1), (2,2) plus the final node; two single steps, the
        // diagonal, and the terminator edge
        assert_eq!(eg.node_count(), 4);
        assert_eq!(eg.edge_count(), 4);
        assert_eq!(inventory.size(), 3);
    }

    #[test]
    fn topological_order_respects_every_edge() {
        let mut builder = EstimationGraphBuilder::new();
        templates(&mut builder, &[(1, 1), (1, 2), (2, 1)]);
        let mut inventory = MultigramInventory::new();
        let mut model = SequenceModel::new();
        model.set_init_and_term(98, 99);

        let eg = builder
            .create(&mut inventory, &model, &[1, 2, 3], &[4, 5, 6])
            .unwrap();
        let pos = |n| {
            eg.topological_order
                .iter()
                .position(|&x| x == n)
                .unwrap()
        };
        for e in eg.graph.edge_ids() {
            assert!(pos(eg.graph.source(e)) < pos(eg.graph.target(e)));
        }
    }

    #[test]
    fn suppress_mode_fails_without_inventory_support() {
        let mut builder = EstimationGraphBuilder::new();
        templates(&mut builder, &[(1, 1)]);
        builder.set_emergence_mode(EmergenceMode::Suppress);
        let mut inventory = MultigramInventory::new();
        let model = SequenceModel::new();

        let err = builder
            .create(&mut inventory, &model, &[1], &[1])
            .unwrap_err();
        assert_eq!(err, EstimationError::FinalNodeNotReachable);
        // a later build on the same builder still works
        builder.set_emergence_mode(EmergenceMode::Emerge);
        assert!(builder.create(&mut inventory, &model, &[1], &[1]).is_ok());
    }

    #[test]
    fn suppress_mode_keeps_known_multigrams() {
        let mut builder = EstimationGraphBuilder::new();
        templates(&mut builder, &[(1, 1), (2, 2)]);
        let mut inventory = MultigramInventory::new();
        let model = SequenceModel::new();
        inventory.index(&JointMultigram::new(&[1], &[3]));
        inventory.index(&JointMultigram::new(&[2], &[4]));

        builder.set_emergence_mode(EmergenceMode::Suppress);
        let eg = builder
            .create(&mut inventory, &model, &[1, 2], &[3, 4])
            .unwrap();
        // the diagonal (1 2)/(3 4) is unknown and dropped
        assert_eq!(eg.edge_count(), 3);
        assert_eq!(inventory.size(), 2);
    }

    #[test]
    fn anonymize_mode_keeps_edges_with_the_void_token() {
        let mut builder = EstimationGraphBuilder::new();
        templates(&mut builder, &[(1, 1), (2, 2)]);
        let mut inventory = MultigramInventory::new();
        let model = SequenceModel::new();
        inventory.index(&JointMultigram::new(&[1], &[3]));
        inventory.index(&JointMultigram::new(&[2], &[4]));

        builder.set_emergence_mode(EmergenceMode::Anonymize);
        let eg = builder
            .create(&mut inventory, &model, &[1, 2], &[3, 4])
            .unwrap();
        assert_eq!(eg.edge_count(), 4);
        assert_eq!(inventory.size(), 2);
        let void_edges = eg
            .graph
            .edge_ids()
            .filter(|&e| eg.tokens[e] == MultigramInventory::void_index())
            .count();
        assert_eq!(void_edges, 1);
    }

    #[test]
    fn unalignable_pair_is_reported() {
        let mut builder = EstimationGraphBuilder::new();
        // left-only consumption can never cover the right side
        templates(&mut builder, &[(1, 0)]);
        let mut inventory = MultigramInventory::new();
        let model = SequenceModel::new();

        let err = builder
            .create(&mut inventory, &model, &[1], &[2])
            .unwrap_err();
        assert_eq!(err, EstimationError::FinalNodeNotReachable);
    }

    #[test]
    fn empty_pair_connects_initial_to_final_directly() {
        let mut builder = EstimationGraphBuilder::new();
        templates(&mut builder, &[(1, 1)]);
        let mut inventory = MultigramInventory::new();
        let mut model = SequenceModel::new();
        model.set_init_and_term(1, 2);

        let eg = builder.create(&mut inventory, &model, &[], &[]).unwrap();
        assert_eq!(eg.node_count(), 2);
        assert_eq!(eg.edge_count(), 1);
        assert_eq!(eg.tokens[1], model.term());
    }

    #[test]
    fn update_matches_a_fresh_build() {
        use crate::sequence_model::ModelEntry;

        let mut builder = EstimationGraphBuilder::new();
        templates(&mut builder, &[(1, 1), (2, 2)]);
        let mut inventory = MultigramInventory::new();
        let mut flat = SequenceModel::new();
        flat.set_init_and_term(8, 9);

        let mut eg = builder
            .create(&mut inventory, &flat, &[1, 2], &[3, 4])
            .unwrap();

        // a refreshed unigram model over the discovered tokens
        let mut entries = vec![ModelEntry {
            history: vec![],
            token: None,
            score: -0.1f64.ln(),
        }];
        for q in 1..=inventory.size() as Token {
            entries.push(ModelEntry {
                history: vec![],
                token: Some(q),
                score: -0.2f64.ln(),
            });
        }
        entries.push(ModelEntry {
            history: vec![],
            token: Some(9),
            score: -0.3f64.ln(),
        });
        let mut refreshed = SequenceModel::new();
        refreshed.set_init_and_term(8, 9);
        refreshed.set(&entries).unwrap();

        builder.update(&mut eg, &refreshed);
        let fresh = builder
            .create(&mut inventory, &refreshed, &[1, 2], &[3, 4])
            .unwrap();

        assert_eq!(eg.edge_count(), fresh.edge_count());
        for e in eg.graph.edge_ids() {
            assert_eq!(eg.tokens[e], fresh.tokens[e]);
            assert_eq!(
                eg.probabilities[e].score(),
                fresh.probabilities[e].score()
            );
        }
    }
}
