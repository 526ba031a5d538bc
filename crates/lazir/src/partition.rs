//! Placement-driven partitioning of an expression DAG.
//!
//! Every node is assigned to the part named by a caller-supplied placement
//! function. Operand edges between nodes of different parts become
//! part-level dependencies; the parts are ordered topologically, and each
//! crossing operand is materialized in the consuming part as a placeholder
//! with a generated name that the producing part exports under the same
//! name. The result is a sequence of self-contained sub-graphs that can be
//! compiled and scheduled independently, feeding each other through their
//! named inputs and outputs.
//!
//! A placement that makes two parts depend on each other is rejected with
//! [`GraphError::PartitionCycle`]: the node-level graph is acyclic by
//! construction, but collapsing nodes into parts can still fold a path
//! `A -> B -> A` into a part-level cycle.

use std::fmt;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use smallvec::SmallVec;

use crate::array::{ArrayKind, ArrayRef, DictOfNamedArrays, NodeId};
use crate::dtype::DType;
use crate::error::{GraphError, Result};
use crate::session::Session;
use crate::shape::Shape;
use crate::transform::{RewriteRule, Rewriter};

/// Name of the part a node is placed into. Derived however the caller
/// likes; deriving it from a placement tag is the common case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(name: impl Into<String>) -> Self {
        PartitionKey(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(name: &str) -> Self {
        PartitionKey(name.to_string())
    }
}

/// One cross-partition input of a part: a placeholder fed by an output of
/// an earlier part.
#[derive(Debug, Clone)]
pub struct PartInput {
    pub name: String,
    /// Index of the producing part in [`PartitionedGraph::parts`]; always
    /// strictly less than the consuming part's own index.
    pub source_part: usize,
    pub shape: Shape,
    pub dtype: DType,
}

/// A self-contained sub-graph produced by partitioning.
#[derive(Debug)]
pub struct GraphPart {
    pub key: PartitionKey,
    /// User outputs rooted in this part plus the exports consumed by later
    /// parts, under their generated names.
    pub outputs: DictOfNamedArrays,
    pub inputs: Vec<PartInput>,
}

/// Parts in dependency order: a part only consumes outputs of parts with a
/// smaller index.
#[derive(Debug)]
pub struct PartitionedGraph {
    pub parts: Vec<GraphPart>,
}

/// Serializable digest of a partitioning, for logs and test fixtures.
#[derive(Debug, Serialize)]
pub struct PartitionSummary {
    pub parts: Vec<PartSummary>,
}

#[derive(Debug, Serialize)]
pub struct PartSummary {
    pub key: PartitionKey,
    pub outputs: Vec<String>,
    pub inputs: Vec<(String, usize)>,
}

impl PartitionedGraph {
    pub fn summary(&self) -> PartitionSummary {
        PartitionSummary {
            parts: self
                .parts
                .iter()
                .map(|part| PartSummary {
                    key: part.key.clone(),
                    outputs: part.outputs.names().cloned().collect(),
                    inputs: part
                        .inputs
                        .iter()
                        .map(|input| (input.name.clone(), input.source_part))
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Partitions `outputs` by the placement function, rebuilding every part in
/// `session`.
pub fn partition<F>(
    session: &Session,
    outputs: &DictOfNamedArrays,
    place: F,
) -> Result<PartitionedGraph>
where
    F: Fn(&ArrayRef) -> PartitionKey,
{
    let nodes = reachable_nodes(outputs);

    // Node -> part key, and the keys in deterministic first-seen order.
    // Placeholder names already present in the graph are reserved so export
    // names cannot capture a user input.
    let mut keys: FxHashMap<NodeId, PartitionKey> = FxHashMap::default();
    let mut part_keys: Vec<PartitionKey> = Vec::new();
    let mut taken_names: FxHashSet<String> = FxHashSet::default();
    for node in &nodes {
        let key = place(node);
        if !part_keys.contains(&key) {
            part_keys.push(key.clone());
        }
        keys.insert(node.id(), key);
        if let ArrayKind::Placeholder { name } = node.kind() {
            taken_names.insert(name.clone());
        }
    }
    let index_of = |key: &PartitionKey| {
        part_keys
            .iter()
            .position(|k| k == key)
            .expect("every key was recorded on first sight")
    };

    // Part-level dependency edges and, per crossing node, its export name.
    let mut deps: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); part_keys.len()];
    let mut exports: FxHashMap<NodeId, String> = FxHashMap::default();
    let mut export_order: Vec<ArrayRef> = Vec::new();
    for node in &nodes {
        let consumer = index_of(&keys[&node.id()]);
        for operand in node.operands() {
            let producer = index_of(&keys[&operand.id()]);
            if producer != consumer {
                deps[consumer].insert(producer);
                if !exports.contains_key(&operand.id()) {
                    let mut name = format!("__part_input_{}", operand.id().0);
                    while !taken_names.insert(name.clone()) {
                        name.push('_');
                    }
                    exports.insert(operand.id(), name);
                    export_order.push(operand.clone());
                }
            }
        }
    }

    let order = topological_order(&part_keys, &deps)?;
    // Position of each part in the final ordering, by first-seen index.
    let rank: FxHashMap<usize, usize> = order
        .iter()
        .enumerate()
        .map(|(rank, original)| (*original, rank))
        .collect();
    // Exported node -> final index of the part that produces it.
    let export_rank: FxHashMap<NodeId, usize> = exports
        .keys()
        .map(|id| (*id, rank[&index_of(&keys[id])]))
        .collect();

    let mut parts = Vec::with_capacity(order.len());
    for original in &order {
        let key = part_keys[*original].clone();
        let mut rule = ExtractPart {
            key: key.clone(),
            keys: &keys,
            exports: &exports,
            export_rank: &export_rank,
            inputs: Vec::new(),
        };
        let mut rewriter = Rewriter::new(session);
        let mut part_outputs = DictOfNamedArrays::new();
        for export in &export_order {
            if keys[&export.id()] == key {
                let root = rewriter.map(&mut rule, export)?;
                part_outputs.insert(exports[&export.id()].clone(), root);
            }
        }
        for (name, root) in outputs {
            if keys[&root.id()] == key {
                let root = rewriter.map(&mut rule, root)?;
                part_outputs.insert(name.clone(), root);
            }
        }
        let mut inputs = rule.inputs;
        inputs.sort_by(|a, b| a.name.cmp(&b.name));
        parts.push(GraphPart {
            key,
            outputs: part_outputs,
            inputs,
        });
    }

    debug!(
        "partitioned {} outputs into {} parts",
        outputs.len(),
        parts.len()
    );
    Ok(PartitionedGraph { parts })
}

/// Rule that extracts one part: a node placed elsewhere becomes a
/// placeholder named like the producing part's export, and the walk stops
/// there.
struct ExtractPart<'a> {
    key: PartitionKey,
    keys: &'a FxHashMap<NodeId, PartitionKey>,
    exports: &'a FxHashMap<NodeId, String>,
    export_rank: &'a FxHashMap<NodeId, usize>,
    inputs: Vec<PartInput>,
}

impl RewriteRule for ExtractPart<'_> {
    fn enter(&mut self, node: &ArrayRef, rewriter: &mut Rewriter) -> Result<Option<ArrayRef>> {
        if self.keys[&node.id()] == self.key {
            return Ok(None);
        }
        let name = self.exports[&node.id()].clone();
        let placeholder =
            rewriter
                .session()
                .placeholder(name.clone(), node.shape().clone(), node.dtype())?;
        self.inputs.push(PartInput {
            name,
            source_part: self.export_rank[&node.id()],
            shape: node.shape().clone(),
            dtype: node.dtype(),
        });
        Ok(Some(placeholder))
    }

    fn rewrite(&mut self, _node: &ArrayRef, _rewriter: &mut Rewriter) -> Result<Option<ArrayRef>> {
        Ok(None)
    }
}

/// All nodes reachable from the outputs, in post order, each exactly once.
fn reachable_nodes(outputs: &DictOfNamedArrays) -> Vec<ArrayRef> {
    enum Frame {
        Enter(ArrayRef),
        Exit(ArrayRef),
    }

    let mut seen: FxHashSet<NodeId> = FxHashSet::default();
    let mut nodes = Vec::new();
    let mut stack: Vec<Frame> = outputs.roots().cloned().map(Frame::Enter).collect();
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(node) => {
                if !seen.insert(node.id()) {
                    continue;
                }
                let operands = node.operands();
                stack.push(Frame::Exit(node));
                for operand in operands {
                    stack.push(Frame::Enter(operand));
                }
            }
            Frame::Exit(node) => nodes.push(node),
        }
    }
    nodes
}

/// Kahn's algorithm over the part dependency graph, with the smallest
/// first-seen index always picked first so the order is deterministic.
fn topological_order(
    part_keys: &[PartitionKey],
    deps: &[FxHashSet<usize>],
) -> Result<Vec<usize>> {
    let count = part_keys.len();
    let mut remaining: SmallVec<[usize; 8]> = (0..count).collect();
    let mut done: FxHashSet<usize> = FxHashSet::default();
    let mut order = Vec::with_capacity(count);
    while !remaining.is_empty() {
        let ready = remaining
            .iter()
            .position(|part| deps[*part].iter().all(|dep| done.contains(dep)));
        match ready {
            Some(position) => {
                let part = remaining.remove(position);
                done.insert(part);
                order.push(part);
            }
            None => {
                // Every remaining part waits on another remaining part;
                // report one offending pair.
                let a = remaining[0];
                let b = *deps[a]
                    .iter()
                    .find(|dep| !done.contains(dep))
                    .expect("a stuck part has an unsatisfied dependency");
                return Err(GraphError::PartitionCycle {
                    a: part_keys[a].to_string(),
                    b: part_keys[b].to_string(),
                });
            }
        }
    }
    Ok(order)
}
