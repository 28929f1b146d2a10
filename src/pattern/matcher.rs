use smallvec::SmallVec;

use super::{Pattern, PatternId, PatternNode};
use crate::graph::{Graph, NodeId, ValueId};
use crate::ops::OpType;

/// Tracks the values that labels in a pattern have been bound to, and the
/// nodes matched by op patterns.
struct Bindings {
    // Modified only by extending and truncating.
    labels: Vec<(&'static str, ValueId)>,
    nodes: Vec<NodeId>,

    // Stack of checkpoints. Each is the length of `labels` and `nodes` at
    // the time of the checkpoint.
    checkpoints: Vec<(usize, usize)>,
}

impl Bindings {
    fn new() -> Bindings {
        Bindings {
            labels: Vec::new(),
            nodes: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// Save the current state so that it can be restored if the current
    /// alternative fails.
    fn checkpoint(&mut self) {
        self.checkpoints.push((self.labels.len(), self.nodes.len()));
    }

    /// Discard bindings made since the last checkpoint.
    fn revert(&mut self) {
        if let Some((labels, nodes)) = self.checkpoints.pop() {
            self.labels.truncate(labels);
            self.nodes.truncate(nodes);
        }
    }

    /// Keep bindings made since the last checkpoint.
    fn commit(&mut self) {
        self.checkpoints.pop();
    }

    fn find(&self, name: &str) -> Option<ValueId> {
        self.labels
            .iter()
            .find_map(|&(label, value)| (label == name).then_some(value))
    }
}

/// The result of matching a [`Pattern`] against a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match {
    root: ValueId,
    labels: Vec<(&'static str, ValueId)>,
    nodes: Vec<NodeId>,
}

impl Match {
    /// Return the value the pattern's root matched.
    pub fn root(&self) -> ValueId {
        self.root
    }

    /// Return the value bound to a label.
    pub fn get(&self, label: &str) -> Option<ValueId> {
        self.labels
            .iter()
            .find_map(|&(name, value)| (name == label).then_some(value))
    }

    /// Iterate over `(label, value)` bindings in the order they were made.
    pub fn labels(&self) -> impl Iterator<Item = (&'static str, ValueId)> + '_ {
        self.labels.iter().copied()
    }

    /// Return the nodes matched by op patterns, in the order they matched.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

struct Matcher<'a> {
    pattern: &'a Pattern,
    graph: &'a Graph,
    bindings: Bindings,
}

impl Matcher<'_> {
    /// Match pattern node `id` against `value`. On failure the bindings are
    /// left as they were before the call.
    fn match_node(&mut self, id: PatternId, value: ValueId) -> bool {
        self.bindings.checkpoint();
        let matched = self.match_node_impl(id, value);
        if matched {
            self.bindings.commit();
        } else {
            self.bindings.revert();
        }
        matched
    }

    fn match_node_impl(&mut self, id: PatternId, value: ValueId) -> bool {
        let pattern = self.pattern;
        let Some(node) = pattern.node(id) else {
            return false;
        };

        match node {
            PatternNode::Any => self.graph.value(value).is_some(),
            PatternNode::Op {
                op_types,
                inputs,
                variadic,
            } => self.match_op(op_types, inputs, *variadic, value),
            PatternNode::Label { name, inner } => {
                if !self.match_node(*inner, value) {
                    return false;
                }
                match self.bindings.find(name) {
                    Some(bound) => bound == value,
                    None => {
                        self.bindings.labels.push((*name, value));
                        true
                    }
                }
            }
            PatternNode::Or(alternatives) => alternatives
                .iter()
                .any(|&alternative| self.match_node(alternative, value)),
            PatternNode::Branch(destination) => {
                destination.is_some_and(|dest| self.match_node(dest, value))
            }
            PatternNode::Guard { inner, predicate } => {
                predicate.test(self.graph, value) && self.match_node(*inner, value)
            }
        }
    }

    fn match_op(
        &mut self,
        op_types: &[OpType],
        input_patterns: &[PatternId],
        variadic: bool,
        value: ValueId,
    ) -> bool {
        let graph = self.graph;
        let Some(node_id) = graph.value(value).map(|v| v.producer()) else {
            return false;
        };
        let Some(node) = graph.node(node_id) else {
            return false;
        };
        let op_type = node.op_type();
        if !op_types.contains(&op_type) {
            return false;
        }

        let inputs = node.inputs();
        let arity_ok = if variadic {
            inputs.len() >= input_patterns.len()
        } else {
            inputs.len() == input_patterns.len()
        };
        if !arity_ok {
            return false;
        }

        let matched = match (input_patterns, &inputs[..input_patterns.len()]) {
            // Commutative binary ops can match either way around.
            (&[pat_a, pat_b], &[input_a, input_b])
                if graph.registry().is_commutative(op_type) =>
            {
                self.match_all(&[pat_a, pat_b], &[input_a, input_b])
                    || self.match_all(&[pat_b, pat_a], &[input_a, input_b])
            }
            (patterns, inputs) => self.match_all(patterns, inputs),
        };

        if matched {
            self.bindings.nodes.push(node_id);
        }
        matched
    }

    /// Match each pattern against the corresponding value, all or nothing.
    fn match_all(&mut self, patterns: &[PatternId], values: &[ValueId]) -> bool {
        self.bindings.checkpoint();
        let matched = patterns
            .iter()
            .zip(values)
            .all(|(&pattern, &value)| self.match_node(pattern, value));
        if matched {
            self.bindings.commit();
        } else {
            self.bindings.revert();
        }
        matched
    }
}

/// Match `pattern` against `value`.
///
/// Returns `None` if the pattern does not match. This is an expected outcome
/// rather than an error.
pub fn match_value(pattern: &Pattern, graph: &Graph, value: ValueId) -> Option<Match> {
    let mut matcher = Matcher {
        pattern,
        graph,
        bindings: Bindings::new(),
    };
    let matched = matcher.match_node(pattern.root, value);
    tracing::trace!(root = %value, matched, "pattern match attempt");

    matched.then(|| {
        let Bindings { labels, nodes, .. } = matcher.bindings;
        let mut seen = SmallVec::<[NodeId; 8]>::new();
        let nodes = nodes
            .into_iter()
            .filter(|id| {
                if seen.contains(id) {
                    false
                } else {
                    seen.push(*id);
                    true
                }
            })
            .collect();
        Match {
            root: value,
            labels,
            nodes,
        }
    })
}

/// Lazy iterator over the matches of a pattern in a graph.
///
/// Created by [`find_all`]. Candidate values are visited in creation order.
/// A clone resumes from the current position, and calling [`find_all`] again
/// restarts the search from the beginning.
#[derive(Clone)]
pub struct Matches<'a> {
    pattern: &'a Pattern,
    graph: &'a Graph,
    next_value: usize,
}

impl Iterator for Matches<'_> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        while self.next_value < self.graph.value_slots() {
            let value = ValueId::from_usize(self.next_value);
            self.next_value += 1;
            if self.graph.value(value).is_none() {
                continue;
            }
            if let Some(m) = match_value(self.pattern, self.graph, value) {
                return Some(m);
            }
        }
        None
    }
}

/// Find every value in `graph` which matches `pattern`.
pub fn find_all<'a>(pattern: &'a Pattern, graph: &'a Graph) -> Matches<'a> {
    Matches {
        pattern,
        graph,
        next_value: 0,
    }
}
