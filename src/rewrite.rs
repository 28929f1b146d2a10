//! Passes which find subgraphs matching a pattern and replace them.
//!
//! A [`RewritePass`] holds an ordered list of rules. Each rule pairs a
//! [`Pattern`] with a callback which builds a replacement for the matched
//! root value. [`run`] applies the rules repeatedly until no rule applies or
//! an iteration cap is reached.
//!
//! Applying a rewrite is a single step from the point of view of the rest of
//! the graph. Either every consumer of the matched value is moved to the
//! replacement and types are re-inferred downstream, or the rewrite is
//! rejected and the graph is left as it was.

use std::fmt;

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::env::{env_flag, env_usize};
use crate::graph::{Graph, GraphError, NodeId, ValidationError, ValueId};
use crate::ops::{Constant, Decompose, OpKind, TensorType};
use crate::pattern::{match_value, Match, Pattern, PatternError};

mod fusions;
mod helpers;

pub use fusions::{DecomposeComposites, IdentityElimination, MultiplyAddFusion};
pub use helpers::{consumers_and_rank, flat_crop, transpose_order_matches};

/// Default cap on the number of sweeps a pass makes over a graph.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Errors returned by a rewrite callback.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum RewriteError {
    /// The rule does not apply to this match. This is not reported as a
    /// rejection.
    #[error("rewrite declined")]
    Declined,

    /// Building the replacement failed.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Reasons why the driver did not apply a rewrite.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum RewriteRejected {
    /// The pattern no longer matches at the root, because an earlier rewrite
    /// changed the graph.
    #[error("match is stale")]
    StaleMatch,

    #[error("failed to build replacement: {0}")]
    InvalidReplacement(ValidationError),

    #[error("replacement type {actual} is incompatible with {expected}")]
    IncompatibleReplacement {
        expected: TensorType,
        actual: TensorType,
    },

    /// The replacement's type is compatible but loses information, which
    /// would weaken the cached types of every downstream value.
    #[error("replacement type {actual} is less specific than {expected}")]
    LessSpecificReplacement {
        expected: TensorType,
        actual: TensorType,
    },

    /// A consumer of the matched value failed validation with the
    /// replacement as input.
    #[error("consumer rejected replacement: {0}")]
    ConsumerRejected(ValidationError),

    #[error("replacement depends on a consumer of the matched value")]
    WouldCreateCycle,
}

/// Record of a rewrite that the driver rejected.
#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    pub rule: String,
    pub root: ValueId,
    pub reason: RewriteRejected,
}

/// Graph access for rewrite callbacks.
///
/// Callbacks can read the whole graph but may only add nodes. Nodes added by
/// a rewrite which is declined or rejected are removed again.
pub struct RewriteContext<'a> {
    graph: &'a mut Graph,
}

impl<'a> RewriteContext<'a> {
    pub fn new(graph: &'a mut Graph) -> RewriteContext<'a> {
        RewriteContext { graph }
    }

    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    pub fn value_type(&self, id: ValueId) -> Option<&TensorType> {
        self.graph.value_type(id)
    }

    /// Add a node. See [`Graph::add_op`].
    pub fn add_op(
        &mut self,
        name: Option<&str>,
        op: impl Into<OpKind>,
        inputs: &[ValueId],
    ) -> Result<NodeId, ValidationError> {
        self.graph.add_op(name, op, inputs)
    }

    /// Add a node and return its first output. See [`Graph::add_simple_op`].
    pub fn add_simple_op(
        &mut self,
        name: Option<&str>,
        op: impl Into<OpKind>,
        inputs: &[ValueId],
    ) -> Result<ValueId, ValidationError> {
        self.graph.add_simple_op(name, op, inputs)
    }

    pub fn add_constant(
        &mut self,
        name: Option<&str>,
        constant: Constant,
    ) -> Result<ValueId, ValidationError> {
        self.graph.add_constant(name, constant)
    }

    /// Add the expansion of a composite operation applied to `inputs`.
    pub fn expand(
        &mut self,
        op: &dyn Decompose,
        inputs: &[ValueId],
    ) -> Result<ValueId, ValidationError> {
        op.decompose(self.graph, inputs)
    }
}

/// A rule which replaces values matching a pattern.
pub trait PatternRewrite {
    /// Return an identifier for this rule, used in logs and reports.
    fn name(&self) -> &str;

    /// Build the pattern to match.
    fn pattern(&self) -> Result<Pattern, PatternError>;

    /// Build a replacement for the root of a match and return it.
    ///
    /// The replacement must have a type compatible with the matched value.
    fn rewrite(&self, pat_match: &Match, ctx: &mut RewriteContext)
        -> Result<ValueId, RewriteError>;
}

/// Rule defined by a closure. Created by [`RewritePass::add_fn`].
struct FnRewrite<F> {
    name: String,
    pattern: Pattern,
    rewrite: F,
}

impl<F> PatternRewrite for FnRewrite<F>
where
    F: Fn(&Match, &mut RewriteContext) -> Result<ValueId, RewriteError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn pattern(&self) -> Result<Pattern, PatternError> {
        Ok(self.pattern.clone())
    }

    fn rewrite(
        &self,
        pat_match: &Match,
        ctx: &mut RewriteContext,
    ) -> Result<ValueId, RewriteError> {
        (self.rewrite)(pat_match, ctx)
    }
}

/// Controls when a sweep over the graph looks for matches.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SweepMode {
    /// Match each value against the graph as it is when the sweep reaches
    /// it, and apply the first matching rule straight away.
    #[default]
    FirstMatch,

    /// Find the first matching rule for every value, then apply each of
    /// those rewrites in turn. Matches invalidated by earlier rewrites in the
    /// sweep are rejected as stale.
    AllMatches,
}

/// Configuration for a [`RewritePass`].
#[derive(Clone, Debug, PartialEq)]
pub struct PassOptions {
    /// Maximum number of sweeps before giving up.
    pub max_iterations: usize,

    pub sweep_mode: SweepMode,

    /// Check the graph's structural invariants after every applied rewrite.
    pub verify_after_rewrite: bool,
}

impl Default for PassOptions {
    /// Create options with defaults which can be overridden using the
    /// `OPGRAPH_MAX_REWRITE_ITERATIONS` and `OPGRAPH_VERIFY_REWRITES`
    /// environment variables.
    fn default() -> Self {
        PassOptions {
            max_iterations: env_usize("OPGRAPH_MAX_REWRITE_ITERATIONS", DEFAULT_MAX_ITERATIONS),
            sweep_mode: SweepMode::default(),
            verify_after_rewrite: env_flag("OPGRAPH_VERIFY_REWRITES", false),
        }
    }
}

/// Outcome of running a pass.
#[derive(Clone, Debug, PartialEq)]
pub enum PassStatus {
    /// The last sweep applied no rewrites.
    Converged,

    /// Every allowed sweep applied at least one rewrite.
    IterationCapExceeded,

    /// The graph failed verification after a rewrite. The pass stopped
    /// after that rewrite.
    VerificationFailed { rule: String, error: GraphError },
}

/// Errors produced by [`RewriteReport::into_result`].
#[derive(Clone, Debug, PartialEq, Error)]
pub enum PassError {
    #[error("rewrites did not converge within {iterations} iterations")]
    IterationCapExceeded { iterations: usize },

    #[error("graph is invalid after rewrite by {rule}: {error}")]
    VerificationFailed { rule: String, error: GraphError },
}

/// Summary of a pass over a graph.
#[derive(Clone, Debug, PartialEq)]
pub struct RewriteReport {
    pub applied_count: usize,

    /// Number of sweeps made over the graph.
    pub iterations_used: usize,

    /// Rewrites which matched but were not applied.
    pub rejected: Vec<Rejection>,

    pub status: PassStatus,
}

impl RewriteReport {
    pub fn converged(&self) -> bool {
        self.status == PassStatus::Converged
    }

    /// Convert a report whose status is not [`PassStatus::Converged`] into
    /// an error.
    pub fn into_result(self) -> Result<RewriteReport, PassError> {
        match self.status {
            PassStatus::Converged => Ok(self),
            PassStatus::IterationCapExceeded => Err(PassError::IterationCapExceeded {
                iterations: self.iterations_used,
            }),
            PassStatus::VerificationFailed { rule, error } => {
                Err(PassError::VerificationFailed { rule, error })
            }
        }
    }
}

struct Rule {
    pattern: Pattern,
    rewrite: Box<dyn PatternRewrite + Send + Sync>,
}

/// An ordered list of rewrite rules, applied to a fixed point by [`run`].
///
/// When several rules match the same value, the one added first is applied.
pub struct RewritePass {
    name: String,
    rules: Vec<Rule>,
    options: PassOptions,
}

impl RewritePass {
    pub fn new(name: &str) -> RewritePass {
        RewritePass {
            name: name.to_string(),
            rules: Vec::new(),
            options: PassOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PassOptions) -> RewritePass {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &PassOptions {
        &self.options
    }

    /// Add a rule. Fails if the rule's pattern is invalid.
    pub fn add_rule<R>(&mut self, rule: R) -> Result<(), PatternError>
    where
        R: PatternRewrite + Send + Sync + 'static,
    {
        let pattern = rule.pattern()?;
        self.rules.push(Rule {
            pattern,
            rewrite: Box::new(rule),
        });
        Ok(())
    }

    /// Add a rule defined by a pattern and a closure.
    pub fn add_fn<F>(&mut self, name: &str, pattern: Pattern, rewrite: F)
    where
        F: Fn(&Match, &mut RewriteContext) -> Result<ValueId, RewriteError>
            + Send
            + Sync
            + 'static,
    {
        self.rules.push(Rule {
            pattern: pattern.clone(),
            rewrite: Box::new(FnRewrite {
                name: name.to_string(),
                pattern,
                rewrite,
            }),
        });
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Return the first rule which matches `value`, and the match.
    fn find_match(&self, graph: &Graph, value: ValueId) -> Option<(&Rule, Match)> {
        self.rules.iter().find_map(|rule| {
            match_value(&rule.pattern, graph, value).map(|pat_match| (rule, pat_match))
        })
    }
}

impl fmt::Debug for RewritePass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewritePass")
            .field("name", &self.name)
            .field(
                "rules",
                &self
                    .rules
                    .iter()
                    .map(|rule| rule.rewrite.name())
                    .collect::<Vec<_>>(),
            )
            .field("options", &self.options)
            .finish()
    }
}

/// Remove nodes added by a rewrite which was not applied.
fn discard_nodes(graph: &mut Graph, created: &[NodeId]) {
    // Later nodes may consume earlier ones.
    for &id in created.iter().rev() {
        graph.remove_node(id);
    }
}

/// Apply a rule at the root of a match found earlier.
///
/// Returns the replacement value, or `None` if the rule declined.
fn apply_rewrite(
    graph: &mut Graph,
    rule: &Rule,
    root: ValueId,
) -> Result<Option<ValueId>, RewriteRejected> {
    // Predicates are re-evaluated, since earlier rewrites may have changed
    // the state they depend on.
    let pat_match =
        match_value(&rule.pattern, graph, root).ok_or(RewriteRejected::StaleMatch)?;
    let (old_type, old_producer) = graph
        .value(root)
        .map(|value| (value.ty().clone(), value.producer()))
        .ok_or(RewriteRejected::StaleMatch)?;

    let watermark = graph.node_slots();
    let result = rule
        .rewrite
        .rewrite(&pat_match, &mut RewriteContext::new(&mut *graph));
    let created: Vec<NodeId> = (watermark..graph.node_slots())
        .map(NodeId::from_usize)
        .filter(|&id| graph.node(id).is_some())
        .collect();

    let new = match result {
        Ok(new) if new != root => new,
        Ok(_) | Err(RewriteError::Declined) => {
            discard_nodes(graph, &created);
            return Ok(None);
        }
        Err(RewriteError::Invalid(err)) => {
            discard_nodes(graph, &created);
            return Err(RewriteRejected::InvalidReplacement(err));
        }
    };

    let Some(new_type) = graph.value_type(new).cloned() else {
        discard_nodes(graph, &created);
        return Err(RewriteRejected::InvalidReplacement(
            ValidationError::InvalidValue(new),
        ));
    };
    if !new_type.compatible(&old_type) {
        discard_nodes(graph, &created);
        return Err(RewriteRejected::IncompatibleReplacement {
            expected: old_type,
            actual: new_type,
        });
    }
    if !old_type.relaxes(&new_type) {
        discard_nodes(graph, &created);
        return Err(RewriteRejected::LessSpecificReplacement {
            expected: old_type,
            actual: new_type,
        });
    }

    // Nodes created by the callback may consume the old value, eg. if the
    // replacement wraps it. Those uses are kept.
    let created_set: FxHashSet<NodeId> = created.iter().copied().collect();
    let consumers: FxHashSet<NodeId> = graph
        .value(root)
        .map(|value| {
            value
                .uses()
                .iter()
                .map(|u| u.node)
                .filter(|node| !created_set.contains(node))
                .collect()
        })
        .unwrap_or_default();
    if graph.depends_on_any(new, &consumers) {
        discard_nodes(graph, &created);
        return Err(RewriteRejected::WouldCreateCycle);
    }

    let redirect = graph.redirect_uses(root, new, &created_set);
    let redirected: Vec<NodeId> = redirect.consumers().collect();
    if let Err(err) = graph.propagate(&redirected) {
        graph.undo_redirect(redirect);
        discard_nodes(graph, &created);
        return Err(RewriteRejected::ConsumerRejected(err));
    }

    graph.remove_dead_nodes(std::iter::once(old_producer).chain(created));
    Ok(Some(new))
}

/// State of a single call to [`run`].
struct PassRun<'a> {
    pass: &'a RewritePass,
    report: RewriteReport,

    /// Rule and root of each recorded rejection. A match which is rejected
    /// again in a later sweep is only reported once.
    rejected: FxHashSet<(&'a str, ValueId)>,
}

impl<'a> PassRun<'a> {
    /// Apply the rewrite for a match and update the report. Returns true if
    /// the rewrite was applied.
    fn apply(
        &mut self,
        graph: &mut Graph,
        rule: &'a Rule,
        root: ValueId,
    ) -> Result<bool, PassStatus> {
        let rule_name = rule.rewrite.name();
        match apply_rewrite(graph, rule, root) {
            Ok(Some(replacement)) => {
                tracing::debug!(
                    pass = %self.pass.name,
                    rule = rule_name,
                    root = %root,
                    replacement = %replacement,
                    "applied rewrite"
                );
                self.report.applied_count += 1;
                if self.pass.options.verify_after_rewrite {
                    graph
                        .verify()
                        .map_err(|error| PassStatus::VerificationFailed {
                            rule: rule_name.to_string(),
                            error,
                        })?;
                }
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(reason) => {
                tracing::debug!(
                    pass = %self.pass.name,
                    rule = rule_name,
                    root = %root,
                    reason = %reason,
                    "rejected rewrite"
                );
                if self.rejected.insert((rule_name, root)) {
                    self.report.rejected.push(Rejection {
                        rule: rule_name.to_string(),
                        root,
                        reason,
                    });
                }
                Ok(false)
            }
        }
    }

    /// Scan the graph once and return the number of rewrites applied.
    fn sweep(&mut self, graph: &mut Graph) -> Result<usize, PassStatus> {
        // Values created during the sweep are left for the next one.
        let end = graph.value_slots();
        let candidates = (0..end).map(ValueId::from_usize);
        let pass = self.pass;

        match pass.options.sweep_mode {
            SweepMode::FirstMatch => {
                let mut applied = 0;
                for value in candidates {
                    if graph.value(value).is_none() {
                        continue;
                    }
                    let Some((rule, _)) = pass.find_match(graph, value) else {
                        continue;
                    };
                    if self.apply(graph, rule, value)? {
                        applied += 1;
                    }
                }
                Ok(applied)
            }
            SweepMode::AllMatches => {
                let matches: Vec<(&Rule, ValueId)> = candidates
                    .filter(|&value| graph.value(value).is_some())
                    .filter_map(|value| pass.find_match(graph, value).map(|(rule, _)| (rule, value)))
                    .collect();
                let mut applied = 0;
                for (rule, value) in matches {
                    if self.apply(graph, rule, value)? {
                        applied += 1;
                    }
                }
                Ok(applied)
            }
        }
    }
}

/// Apply a pass to a graph until no rule applies, or the pass's iteration
/// cap is reached.
///
/// Rejected rewrites are recorded in the report and do not stop the pass.
/// Whatever the status, the graph is left in a valid state.
pub fn run(pass: &RewritePass, graph: &mut Graph) -> RewriteReport {
    let mut state = PassRun {
        pass,
        report: RewriteReport {
            applied_count: 0,
            iterations_used: 0,
            rejected: Vec::new(),
            status: PassStatus::IterationCapExceeded,
        },
        rejected: FxHashSet::default(),
    };

    while state.report.iterations_used < pass.options.max_iterations {
        state.report.iterations_used += 1;
        match state.sweep(graph) {
            Ok(0) => {
                state.report.status = PassStatus::Converged;
                break;
            }
            Ok(_) => {}
            Err(status) => {
                tracing::warn!(pass = %pass.name, status = ?status, "rewrite pass stopped");
                state.report.status = status;
                break;
            }
        }
    }

    let report = state.report;
    if report.status == PassStatus::IterationCapExceeded {
        tracing::warn!(
            pass = %pass.name,
            iterations = report.iterations_used,
            applied = report.applied_count,
            "rewrite pass did not converge"
        );
    } else {
        tracing::debug!(
            pass = %pass.name,
            iterations = report.iterations_used,
            applied = report.applied_count,
            rejected = report.rejected.len(),
            "rewrite pass finished"
        );
    }
    report
}

/// Apply a pass to each of several independent graphs in parallel.
///
/// Reports are returned in the same order as `graphs`.
pub fn run_parallel(pass: &RewritePass, graphs: &mut [Graph]) -> Vec<RewriteReport> {
    graphs.par_iter_mut().map(|graph| run(pass, graph)).collect()
}
