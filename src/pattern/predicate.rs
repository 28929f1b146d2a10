use std::fmt;
use std::sync::Arc;

use crate::element_type::ElementType;
use crate::graph::{Graph, ValueId};

type CheckFn = dyn Fn(&Graph, ValueId) -> bool + Send + Sync;

/// A condition on a value, used to guard pattern matches.
///
/// Predicates are evaluated against the graph as it is when the match is
/// attempted. Conditions on graph state such as the number of consumers can
/// change as rewrites are applied.
#[derive(Clone)]
pub struct Predicate {
    name: Arc<str>,
    check: Arc<CheckFn>,
}

impl Predicate {
    /// Create a predicate from a function.
    ///
    /// `name` is used when formatting the predicate for debugging.
    pub fn new<F>(name: &str, check: F) -> Predicate
    where
        F: Fn(&Graph, ValueId) -> bool + Send + Sync + 'static,
    {
        Predicate {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Value has a known rank equal to `rank`.
    pub fn rank_equals(rank: usize) -> Predicate {
        Predicate::new(&format!("rank_equals({})", rank), move |graph, value| {
            graph.value_type(value).and_then(|ty| ty.rank()) == Some(rank)
        })
    }

    /// Value is consumed by exactly `count` distinct nodes.
    pub fn consumers(count: usize) -> Predicate {
        Predicate::new(&format!("consumers({})", count), move |graph, value| {
            graph.consumer_count(value) == count
        })
    }

    /// Value has a fully static shape.
    pub fn static_shape() -> Predicate {
        Predicate::new("static_shape", |graph, value| {
            graph
                .value_type(value)
                .is_some_and(|ty| ty.shape.is_static())
        })
    }

    /// Value has the element type `element_type`.
    pub fn element_type(element_type: ElementType) -> Predicate {
        Predicate::new(
            &format!("element_type({})", element_type),
            move |graph, value| {
                graph
                    .value_type(value)
                    .is_some_and(|ty| ty.element_type == element_type)
            },
        )
    }

    /// Combine two predicates. The second is only evaluated if the first
    /// holds.
    pub fn and(self, other: Predicate) -> Predicate {
        let name = format!("{} && {}", self.name, other.name);
        Predicate::new(&name, move |graph, value| {
            self.test(graph, value) && other.test(graph, value)
        })
    }

    /// Evaluate the predicate for `value`.
    pub fn test(&self, graph: &Graph, value: ValueId) -> bool {
        (self.check)(graph, value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({})", self.name)
    }
}
