//! Memoized graph traversal: the transforming rewriter and the analyzing
//! visitor share one walk discipline.
//!
//! The walk is post-order over the DAG with an explicit frame stack, so
//! graph depth never turns into native stack depth. Results are memoized by
//! node id; a node with fan-in `k` is processed once, not `k` times.
//!
//! Rewriting rebuilds bottom-up: when a node is reached, its operands have
//! already been mapped, the node is re-interned in the target session with
//! the mapped operands, and only then does the rule see it. Keeping the
//! rebuild inside the engine means a rule cannot accidentally reintroduce
//! duplicates — everything it returns or receives is interned.
//!
//! Rules may call back into [`Rewriter::map`] for other roots (for example
//! to splice in a rewritten subgraph). A re-entrant request for a node whose
//! own rewrite is still in progress cannot terminate and fails fast with
//! [`GraphError::TraversalCycle`].

pub mod analyses;

use std::collections::BTreeMap;

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::array::{ArrayKind, ArrayRef, DictOfNamedArrays, NodeId};
use crate::error::{GraphError, Result};
use crate::session::Session;
use crate::shape::ReshapeDim;

enum Frame {
    Enter(ArrayRef),
    Exit(ArrayRef),
}

/// Per-node rewrite hooks.
///
/// [`enter`](RewriteRule::enter) runs before a node's operands are visited
/// and sees the original node; returning a replacement short-circuits the
/// walk there, so the subgraph below is never touched.
/// [`rewrite`](RewriteRule::rewrite) runs after, on the node already rebuilt with
/// mapped operands and interned in the target session; return `Some` to
/// replace it, `None` to keep the rebuild.
pub trait RewriteRule {
    fn enter(&mut self, _node: &ArrayRef, _rewriter: &mut Rewriter) -> Result<Option<ArrayRef>> {
        Ok(None)
    }

    fn rewrite(&mut self, node: &ArrayRef, rewriter: &mut Rewriter) -> Result<Option<ArrayRef>>;
}

/// Rule that keeps every rebuilt node. Mapping a graph through it into a
/// session is a structural copy, and thanks to interning also a
/// deduplication pass.
pub struct IdentityRewrite;

impl RewriteRule for IdentityRewrite {
    fn rewrite(&mut self, _node: &ArrayRef, _rewriter: &mut Rewriter) -> Result<Option<ArrayRef>> {
        Ok(None)
    }
}

/// The transforming mapper: owns the memo table and drives the walk. One
/// rewriter may map any number of roots; shared subgraphs stay shared in
/// the output.
pub struct Rewriter<'a> {
    session: &'a Session,
    memo: FxHashMap<NodeId, ArrayRef>,
    in_flight: FxHashSet<NodeId>,
}

impl<'a> Rewriter<'a> {
    /// Creates a rewriter targeting `session`. The target may be the
    /// source's own session (in-place style rewriting) or a fresh one
    /// (copy/deduplicate).
    pub fn new(session: &'a Session) -> Self {
        Rewriter {
            session,
            memo: FxHashMap::default(),
            in_flight: FxHashSet::default(),
        }
    }

    pub fn session(&self) -> &Session {
        self.session
    }

    /// Maps one root, reusing results memoized by earlier calls on this
    /// rewriter.
    pub fn map<R: RewriteRule>(&mut self, rule: &mut R, root: &ArrayRef) -> Result<ArrayRef> {
        if let Some(done) = self.memo.get(&root.id()) {
            return Ok(done.clone());
        }
        if self.in_flight.contains(&root.id()) {
            return Err(GraphError::TraversalCycle { node: root.id() });
        }
        let mut stack = vec![Frame::Enter(root.clone())];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(node) => {
                    if self.memo.contains_key(&node.id()) {
                        continue;
                    }
                    if !self.in_flight.insert(node.id()) {
                        return Err(GraphError::TraversalCycle { node: node.id() });
                    }
                    if let Some(replacement) = rule.enter(&node, self)? {
                        self.in_flight.remove(&node.id());
                        self.memo.insert(node.id(), replacement);
                        continue;
                    }
                    let operands = node.operands();
                    stack.push(Frame::Exit(node));
                    for operand in operands {
                        stack.push(Frame::Enter(operand));
                    }
                }
                Frame::Exit(node) => {
                    let rebuilt = self.rebuild(&node)?;
                    let mapped = match rule.rewrite(&rebuilt, self)? {
                        Some(replacement) => replacement,
                        None => rebuilt,
                    };
                    trace!("mapped {} {} -> {}", node.kind().name(), node.id(), mapped.id());
                    self.in_flight.remove(&node.id());
                    self.memo.insert(node.id(), mapped);
                }
            }
        }
        Ok(self.memo[&root.id()].clone())
    }

    /// Re-interns `node` in the target session with its operands replaced by
    /// their mapped results. Shape and dtype inference runs again, so a rule
    /// that substituted a differently-shaped operand gets a hard error here
    /// rather than an inconsistent graph.
    fn rebuild(&self, node: &ArrayRef) -> Result<ArrayRef> {
        let rebuilt = match node.kind() {
            ArrayKind::Placeholder { name } => {
                self.session
                    .placeholder(name.clone(), node.shape().clone(), node.dtype())?
            }
            ArrayKind::Constant { literal } => self.session.constant(literal.clone()),
            ArrayKind::DataWrapper { name } => {
                self.session
                    .data_wrapper(name.clone(), node.shape().clone(), node.dtype())
            }
            ArrayKind::IndexLambda { expr, bindings } => {
                let bindings: BTreeMap<String, ArrayRef> = bindings
                    .iter()
                    .map(|(name, operand)| (name.clone(), self.mapped(operand)))
                    .collect();
                self.session.index_lambda(
                    expr.clone(),
                    bindings,
                    node.shape().clone(),
                    node.dtype(),
                )?
            }
            ArrayKind::Reshape { input } => {
                let target = node
                    .shape()
                    .dims()
                    .iter()
                    .cloned()
                    .map(ReshapeDim::Explicit);
                self.session.reshape(&self.mapped(input), target)?
            }
            ArrayKind::AxisPermutation { input, axes } => self
                .session
                .axis_permutation(&self.mapped(input), axes.clone())?,
            ArrayKind::Stack { operands, axis } => {
                let operands: Vec<ArrayRef> = operands.iter().map(|o| self.mapped(o)).collect();
                self.session.stack(&operands, *axis)?
            }
            ArrayKind::Concatenate { operands, axis } => {
                let operands: Vec<ArrayRef> = operands.iter().map(|o| self.mapped(o)).collect();
                self.session.concatenate(&operands, *axis)?
            }
        };
        if node.tags().is_empty() {
            Ok(rebuilt)
        } else {
            Ok(self.session.with_tags(&rebuilt, node.tags().clone()))
        }
    }

    fn mapped(&self, operand: &ArrayRef) -> ArrayRef {
        self.memo[&operand.id()].clone()
    }
}

/// Maps a single root through `rule` into `session`.
pub fn rewrite_root<R: RewriteRule>(
    session: &Session,
    rule: &mut R,
    root: &ArrayRef,
) -> Result<ArrayRef> {
    Rewriter::new(session).map(rule, root)
}

/// Maps every root of `outputs` through `rule` into `session`, preserving
/// sharing between roots.
pub fn rewrite_dict<R: RewriteRule>(
    session: &Session,
    rule: &mut R,
    outputs: &DictOfNamedArrays,
) -> Result<DictOfNamedArrays> {
    let mut rewriter = Rewriter::new(session);
    let mut result = DictOfNamedArrays::new();
    for (name, root) in outputs {
        result.insert(name.clone(), rewriter.map(rule, root)?);
    }
    debug!(
        "rewrote {} outputs over {} distinct nodes",
        outputs.len(),
        rewriter.memo.len()
    );
    Ok(result)
}

/// Structural copy of `outputs` into `session`. Re-interning merges nodes
/// that are structurally equal but were distinct in the source, so this is
/// the standalone common-subexpression elimination pass.
pub fn deduplicate(session: &Session, outputs: &DictOfNamedArrays) -> Result<DictOfNamedArrays> {
    rewrite_dict(session, &mut IdentityRewrite, outputs)
}

/// An analysis computes one value per node from the node and its operands'
/// values; results are memoized so shared subgraphs are analyzed once.
pub trait Analysis {
    type Value: Clone;

    fn analyze(&mut self, node: &ArrayRef, operands: &[Self::Value]) -> Self::Value;
}

/// The analyzing mapper. Like [`Rewriter`] it may be run over several roots
/// and keeps its memo across them, so aggregate analyses see each node once
/// regardless of how many outputs reach it.
pub struct Analyzer<A: Analysis> {
    analysis: A,
    memo: FxHashMap<NodeId, A::Value>,
}

impl<A: Analysis> Analyzer<A> {
    pub fn new(analysis: A) -> Self {
        Analyzer {
            analysis,
            memo: FxHashMap::default(),
        }
    }

    pub fn run(&mut self, root: &ArrayRef) -> A::Value {
        let mut stack = vec![Frame::Enter(root.clone())];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(node) => {
                    if self.memo.contains_key(&node.id()) {
                        continue;
                    }
                    let operands = node.operands();
                    stack.push(Frame::Exit(node));
                    for operand in operands {
                        stack.push(Frame::Enter(operand));
                    }
                }
                Frame::Exit(node) => {
                    let operand_values: Vec<A::Value> = node
                        .operands()
                        .iter()
                        .map(|operand| self.memo[&operand.id()].clone())
                        .collect();
                    let value = self.analysis.analyze(&node, &operand_values);
                    self.memo.insert(node.id(), value);
                }
            }
        }
        self.memo[&root.id()].clone()
    }

    /// Number of distinct nodes analyzed so far.
    pub fn visited(&self) -> usize {
        self.memo.len()
    }

    pub fn into_inner(self) -> A {
        self.analysis
    }
}
