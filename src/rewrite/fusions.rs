//! Built-in rewrite rules.

use smallvec::SmallVec;

use super::{PatternRewrite, RewriteContext, RewriteError};
use crate::graph::ValueId;
use crate::ops::{FusedMultiplyAdd, OpKind, OpType};
use crate::pattern::{Match, Pattern, PatternBuilder, PatternError, Predicate};

/// Look up a label which the rule's pattern always binds.
fn label(pat_match: &Match, name: &str) -> Result<ValueId, RewriteError> {
    pat_match.get(name).ok_or(RewriteError::Declined)
}

/// Fuse `Add(Multiply(a, b), c)` into `FusedMultiplyAdd(a, b, c)`.
///
/// The product must have no other uses, otherwise the multiplication would
/// be computed twice.
#[derive(Clone, Copy, Debug, Default)]
pub struct MultiplyAddFusion;

impl PatternRewrite for MultiplyAddFusion {
    fn name(&self) -> &str {
        "MultiplyAddFusion"
    }

    fn pattern(&self) -> Result<Pattern, PatternError> {
        let mut pb = PatternBuilder::new();
        let a = pb.any();
        let a = pb.label("a", a);
        let b = pb.any();
        let b = pb.label("b", b);
        let product = pb.op(OpType::Multiply, &[a, b]);
        let product = pb.guard(
            product,
            Predicate::new("single_use", |graph, value| {
                graph.consumer_count(value) == 1 && !graph.is_result(value)
            }),
        );
        let c = pb.any();
        let c = pb.label("c", c);
        let sum = pb.op(OpType::Add, &[product, c]);
        pb.build(sum)
    }

    fn rewrite(
        &self,
        pat_match: &Match,
        ctx: &mut RewriteContext,
    ) -> Result<ValueId, RewriteError> {
        let a = label(pat_match, "a")?;
        let b = label(pat_match, "b")?;
        let c = label(pat_match, "c")?;
        let name = ctx
            .graph()
            .producer(pat_match.root())
            .and_then(|node| node.name())
            .map(|name| name.to_string());
        Ok(ctx.add_simple_op(name.as_deref(), FusedMultiplyAdd, &[a, b, c])?)
    }
}

/// Replace composite operations with their expansions.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecomposeComposites;

impl PatternRewrite for DecomposeComposites {
    fn name(&self) -> &str {
        "DecomposeComposites"
    }

    fn pattern(&self) -> Result<Pattern, PatternError> {
        let mut pb = PatternBuilder::new();
        let inputs = [pb.any(), pb.any(), pb.any()];
        let composite = pb.op_of(&[OpType::HardSigmoid, OpType::FusedMultiplyAdd], &inputs);
        pb.build(composite)
    }

    fn rewrite(
        &self,
        pat_match: &Match,
        ctx: &mut RewriteContext,
    ) -> Result<ValueId, RewriteError> {
        let node = ctx
            .graph()
            .producer(pat_match.root())
            .ok_or(RewriteError::Declined)?;
        let op = node.op().clone();
        let inputs: SmallVec<[ValueId; 4]> = node.inputs().into();
        let composite = op.as_composite().ok_or(RewriteError::Declined)?;
        Ok(ctx.expand(composite, &inputs)?)
    }
}

/// Remove operations which return their input unchanged.
///
/// This covers `Convert` to the input's element type, `Transpose` with the
/// identity permutation and `Reshape` of a static shape to itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityElimination;

impl PatternRewrite for IdentityElimination {
    fn name(&self) -> &str {
        "IdentityElimination"
    }

    fn pattern(&self) -> Result<Pattern, PatternError> {
        let mut pb = PatternBuilder::new();
        let input = pb.any();
        let input = pb.label("input", input);
        let op = pb.op_of(
            &[OpType::Convert, OpType::Transpose, OpType::Reshape],
            &[input],
        );
        pb.build(op)
    }

    fn rewrite(
        &self,
        pat_match: &Match,
        ctx: &mut RewriteContext,
    ) -> Result<ValueId, RewriteError> {
        let input = label(pat_match, "input")?;
        let graph = ctx.graph();
        let (Some(node), Some(input_type), Some(output_type)) = (
            graph.producer(pat_match.root()),
            graph.value_type(input),
            graph.value_type(pat_match.root()),
        ) else {
            return Err(RewriteError::Declined);
        };

        let is_identity = match node.op() {
            OpKind::Convert(convert) => convert.to == input_type.element_type,
            OpKind::Transpose(transpose) => input_type
                .rank()
                .is_some_and(|rank| transpose.is_identity(rank)),
            OpKind::Reshape(_) => {
                input_type.shape.is_static() && output_type.shape == input_type.shape
            }
            _ => false,
        };

        if is_identity {
            Ok(input)
        } else {
            Err(RewriteError::Declined)
        }
    }
}
