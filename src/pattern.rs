//! Patterns which describe subgraphs to search for.
//!
//! A [`Pattern`] is a small graph of pattern nodes, created with a
//! [`PatternBuilder`]. Each pattern node describes a condition on a value in
//! a [`Graph`](crate::Graph):
//!
//! - [`any`](PatternBuilder::any) matches every value.
//! - [`op`](PatternBuilder::op) matches values produced by a given kind of
//!   operation whose inputs match sub-patterns.
//! - [`label`](PatternBuilder::label) captures the matched value under a
//!   name. If the same name is used more than once, every occurrence must
//!   match the same value.
//! - [`or`](PatternBuilder::or) matches the first of several alternatives
//!   that succeeds.
//! - [`branch`](PatternBuilder::branch) delegates to a destination which is
//!   set after the branch is created. This allows patterns to refer to nodes
//!   created later, including their own ancestors, to describe repeated
//!   structure.
//! - [`guard`](PatternBuilder::guard) requires a [`Predicate`] to hold.
//!
//! Patterns are matched using [`match_value`] and [`find_all`].

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use thiserror::Error;

use crate::ops::OpType;

mod matcher;
mod predicate;

pub use matcher::{find_all, match_value, Match, Matches};
pub use predicate::Predicate;

/// ID of a node within a [`Pattern`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternId(u32);

impl PatternId {
    fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug)]
enum PatternNode {
    Any,
    Op {
        op_types: SmallVec<[OpType; 2]>,
        inputs: SmallVec<[PatternId; 4]>,

        /// If true, the node may have more inputs than `inputs`. The extra
        /// inputs are not matched.
        variadic: bool,
    },
    Label {
        name: &'static str,
        inner: PatternId,
    },
    Or(SmallVec<[PatternId; 4]>),
    Branch(Option<PatternId>),
    Guard {
        inner: PatternId,
        predicate: Predicate,
    },
}

impl PatternNode {
    /// Return pattern nodes which are matched against the same value as this
    /// node.
    ///
    /// Op nodes are excluded since they match their children against the
    /// node's inputs.
    fn same_value_children(&self) -> SmallVec<[PatternId; 4]> {
        match self {
            PatternNode::Any | PatternNode::Op { .. } => SmallVec::new(),
            PatternNode::Label { inner, .. } | PatternNode::Guard { inner, .. } => {
                SmallVec::from_slice(&[*inner])
            }
            PatternNode::Or(alternatives) => alternatives.clone(),
            PatternNode::Branch(dest) => dest.iter().copied().collect(),
        }
    }

    fn children(&self) -> SmallVec<[PatternId; 4]> {
        match self {
            PatternNode::Op { inputs, .. } => inputs.clone(),
            _ => self.same_value_children(),
        }
    }
}

/// Errors reported when building a pattern.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern node {0} does not exist")]
    InvalidId(PatternId),

    #[error("pattern node {0} is not a branch")]
    NotABranch(PatternId),

    #[error("branch {0} has no destination")]
    UnresolvedBranch(PatternId),

    /// A cycle through branches does not pass through an op pattern, so
    /// matching it would recurse without consuming graph structure.
    #[error("cycle through pattern node {0} does not contain an op pattern")]
    UnguardedCycle(PatternId),
}

/// Builds [`Pattern`]s from combinators.
///
/// Each combinator adds a pattern node and returns its ID, which can be
/// used as an input to later combinators.
///
/// ```
/// use opgraph::ops::OpType;
/// use opgraph::pattern::PatternBuilder;
///
/// // Matches `Multiply(x, c)` where `c` is a constant.
/// let mut pb = PatternBuilder::new();
/// let x = pb.any();
/// let c = pb.constant();
/// let c = pb.label("c", c);
/// let mul = pb.op(OpType::Multiply, &[x, c]);
/// let pattern = pb.build(mul).unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct PatternBuilder {
    nodes: Vec<PatternNode>,
}

impl PatternBuilder {
    pub fn new() -> PatternBuilder {
        PatternBuilder::default()
    }

    fn push(&mut self, node: PatternNode) -> PatternId {
        let id = PatternId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Match any value.
    pub fn any(&mut self) -> PatternId {
        self.push(PatternNode::Any)
    }

    /// Match any value for which `predicate` holds.
    pub fn any_where(&mut self, predicate: Predicate) -> PatternId {
        let any = self.any();
        self.guard(any, predicate)
    }

    /// Match a value produced by an `op_type` node with exactly
    /// `inputs.len()` inputs, each matching the corresponding pattern.
    ///
    /// For commutative binary operations both orders of the inputs are
    /// tried, starting with the declared order.
    pub fn op(&mut self, op_type: OpType, inputs: &[PatternId]) -> PatternId {
        self.op_of(&[op_type], inputs)
    }

    /// Match a value produced by a node of any of `op_types`.
    pub fn op_of(&mut self, op_types: &[OpType], inputs: &[PatternId]) -> PatternId {
        self.push(PatternNode::Op {
            op_types: op_types.into(),
            inputs: inputs.into(),
            variadic: false,
        })
    }

    /// Match a value produced by an `op_type` node whose leading inputs
    /// match `inputs`. Any further inputs are ignored.
    pub fn op_with_leading_inputs(&mut self, op_type: OpType, inputs: &[PatternId]) -> PatternId {
        self.push(PatternNode::Op {
            op_types: SmallVec::from_slice(&[op_type]),
            inputs: inputs.into(),
            variadic: true,
        })
    }

    /// Match the output of a constant.
    pub fn constant(&mut self) -> PatternId {
        self.op(OpType::Constant, &[])
    }

    /// Match `inner` and capture the value under `name`.
    ///
    /// If `name` is already bound when this node is matched, the value must
    /// be the one it is bound to.
    pub fn label(&mut self, name: &'static str, inner: PatternId) -> PatternId {
        self.push(PatternNode::Label { name, inner })
    }

    /// Match the first of `alternatives` that succeeds.
    pub fn or(&mut self, alternatives: &[PatternId]) -> PatternId {
        self.push(PatternNode::Or(alternatives.into()))
    }

    /// Create a branch whose destination is set later using
    /// [`set_destination`](Self::set_destination).
    pub fn branch(&mut self) -> PatternId {
        self.push(PatternNode::Branch(None))
    }

    /// Set the pattern node that a branch delegates to.
    pub fn set_destination(
        &mut self,
        branch: PatternId,
        destination: PatternId,
    ) -> Result<(), PatternError> {
        if destination.as_usize() >= self.nodes.len() {
            return Err(PatternError::InvalidId(destination));
        }
        match self.nodes.get_mut(branch.as_usize()) {
            Some(PatternNode::Branch(dest)) => {
                *dest = Some(destination);
                Ok(())
            }
            Some(_) => Err(PatternError::NotABranch(branch)),
            None => Err(PatternError::InvalidId(branch)),
        }
    }

    /// Match `inner` if `predicate` holds for the value.
    pub fn guard(&mut self, inner: PatternId, predicate: Predicate) -> PatternId {
        self.push(PatternNode::Guard { inner, predicate })
    }

    /// Finish building a pattern with root `root`.
    ///
    /// This checks that every branch reachable from the root has a
    /// destination, and that every cycle through branches passes through an
    /// op pattern.
    pub fn build(self, root: PatternId) -> Result<Pattern, PatternError> {
        let node = |id: PatternId| self.nodes.get(id.as_usize()).ok_or(PatternError::InvalidId(id));

        // Collect nodes reachable from the root.
        let mut reachable = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let pattern_node = node(id)?;
            if std::mem::replace(&mut reachable[id.as_usize()], true) {
                continue;
            }
            if let PatternNode::Branch(None) = pattern_node {
                return Err(PatternError::UnresolvedBranch(id));
            }
            stack.extend(pattern_node.children());
        }

        // Look for cycles among edges which match the same value.
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        for start in (0..self.nodes.len()).filter(|&i| reachable[i]) {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            let start = PatternId(start as u32);
            marks[start.as_usize()] = Mark::InProgress;
            let mut stack = vec![(start, self.nodes[start.as_usize()].same_value_children(), 0)];

            while let Some((id, children, next)) = stack.last_mut() {
                let Some(&child) = children.get(*next) else {
                    marks[id.as_usize()] = Mark::Done;
                    stack.pop();
                    continue;
                };
                *next += 1;
                match marks[child.as_usize()] {
                    Mark::Unvisited => {
                        marks[child.as_usize()] = Mark::InProgress;
                        let grandchildren = node(child)?.same_value_children();
                        stack.push((child, grandchildren, 0));
                    }
                    Mark::InProgress => return Err(PatternError::UnguardedCycle(child)),
                    Mark::Done => {}
                }
            }
        }

        Ok(Pattern {
            nodes: self.nodes.into(),
            root,
        })
    }
}

/// A pattern which can be matched against values in a graph.
///
/// Patterns are immutable and cheap to clone.
#[derive(Clone, Debug)]
pub struct Pattern {
    nodes: Arc<[PatternNode]>,
    root: PatternId,
}

impl Pattern {
    pub fn root(&self) -> PatternId {
        self.root
    }

    fn node(&self, id: PatternId) -> Option<&PatternNode> {
        self.nodes.get(id.as_usize())
    }
}

#[cfg(test)]
mod tests {
    use super::{PatternBuilder, PatternError, PatternId};
    use crate::ops::OpType;

    #[test]
    fn test_build_rejects_unresolved_branch() {
        let mut pb = PatternBuilder::new();
        let branch = pb.branch();
        let relu = pb.op(OpType::Relu, &[branch]);
        assert_eq!(
            pb.build(relu).unwrap_err(),
            PatternError::UnresolvedBranch(branch)
        );
    }

    #[test]
    fn test_build_rejects_unguarded_cycle() {
        let mut pb = PatternBuilder::new();
        let branch = pb.branch();
        let x = pb.any();
        let alt = pb.or(&[branch, x]);
        pb.set_destination(branch, alt).unwrap();
        assert!(matches!(
            pb.build(alt),
            Err(PatternError::UnguardedCycle(_))
        ));
    }

    #[test]
    fn test_build_accepts_cycle_through_op() {
        // Matches a chain of one or more Relu ops ending in any value.
        let mut pb = PatternBuilder::new();
        let branch = pb.branch();
        let relu = pb.op(OpType::Relu, &[branch]);
        let x = pb.any();
        let chain = pb.or(&[relu, x]);
        pb.set_destination(branch, chain).unwrap();
        assert!(pb.build(relu).is_ok());
    }

    #[test]
    fn test_set_destination_errors() {
        let mut pb = PatternBuilder::new();
        let x = pb.any();
        let branch = pb.branch();
        assert_eq!(
            pb.set_destination(x, x),
            Err(PatternError::NotABranch(x))
        );
        assert_eq!(
            pb.set_destination(branch, PatternId(10)),
            Err(PatternError::InvalidId(PatternId(10)))
        );
        assert_eq!(
            pb.set_destination(PatternId(10), x),
            Err(PatternError::InvalidId(PatternId(10)))
        );
        assert_eq!(
            pb.build(PatternId(10)).unwrap_err(),
            PatternError::InvalidId(PatternId(10))
        );
    }
}
