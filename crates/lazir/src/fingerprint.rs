//! Session-independent structural digests.
//!
//! Node identity (`ArrayRef` equality) is only meaningful within one
//! session. To compare graphs across sessions, for example after a
//! serialization round trip or between two independent constructions, we
//! hash the structure itself: variant, parameters, shape, dtype, tags, and
//! the digests of the operands. Digests are computed iteratively with a
//! memo, so shared subgraphs are hashed once.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

use crate::array::{ArrayKind, ArrayRef, DictOfNamedArrays, NodeId};

pub struct FingerprintHasher {
    inner: FxHasher,
}

impl FingerprintHasher {
    pub fn new() -> Self {
        Self {
            inner: FxHasher::default(),
        }
    }

    pub fn write<T: Hash>(&mut self, value: &T) {
        value.hash(&mut self.inner);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.inner.write_u8(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.inner.write_u64(value);
    }

    pub fn finish(self) -> u64 {
        self.inner.finish()
    }
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest of a single subgraph rooted at `root`.
pub fn structural_digest(root: &ArrayRef) -> u64 {
    let mut memo = FxHashMap::default();
    digest_into(root, &mut memo)
}

/// Digest of a whole named-results dict: output names and their subgraph
/// digests, order-independent by construction (the dict iterates sorted).
pub fn dict_digest(dict: &DictOfNamedArrays) -> u64 {
    let mut memo = FxHashMap::default();
    let mut hasher = FingerprintHasher::new();
    for (name, root) in dict {
        hasher.write(name);
        hasher.write_u64(digest_into(root, &mut memo));
    }
    hasher.finish()
}

fn digest_into(root: &ArrayRef, memo: &mut FxHashMap<NodeId, u64>) -> u64 {
    // Post-order over the DAG with an explicit stack; the second visit of a
    // node folds its (already memoized) operand digests.
    enum Frame {
        Enter(ArrayRef),
        Exit(ArrayRef),
    }

    let mut stack = vec![Frame::Enter(root.clone())];
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(node) => {
                if memo.contains_key(&node.id()) {
                    continue;
                }
                let operands = node.operands();
                stack.push(Frame::Exit(node));
                for operand in operands {
                    stack.push(Frame::Enter(operand));
                }
            }
            Frame::Exit(node) => {
                let digest = digest_node(&node, memo);
                memo.insert(node.id(), digest);
            }
        }
    }
    memo[&root.id()]
}

fn digest_node(node: &ArrayRef, memo: &FxHashMap<NodeId, u64>) -> u64 {
    let mut hasher = FingerprintHasher::new();
    hasher.write(&node.shape().dims().to_vec());
    hasher.write(&node.dtype());
    hasher.write(node.tags());
    match node.kind() {
        ArrayKind::Placeholder { name } => {
            hasher.write_u8(0);
            hasher.write(name);
        }
        ArrayKind::Constant { literal } => {
            hasher.write_u8(1);
            hasher.write(literal);
        }
        ArrayKind::DataWrapper { name } => {
            hasher.write_u8(2);
            hasher.write(name);
        }
        ArrayKind::IndexLambda { expr, bindings } => {
            hasher.write_u8(3);
            hasher.write(expr);
            for (name, operand) in bindings {
                hasher.write(name);
                hasher.write_u64(memo[&operand.id()]);
            }
        }
        ArrayKind::Reshape { input } => {
            hasher.write_u8(4);
            hasher.write_u64(memo[&input.id()]);
        }
        ArrayKind::AxisPermutation { input, axes } => {
            hasher.write_u8(5);
            hasher.write(axes);
            hasher.write_u64(memo[&input.id()]);
        }
        ArrayKind::Stack { operands, axis } => {
            hasher.write_u8(6);
            hasher.write(axis);
            for operand in operands {
                hasher.write_u64(memo[&operand.id()]);
            }
        }
        ArrayKind::Concatenate { operands, axis } => {
            hasher.write_u8(7);
            hasher.write(axis);
            for operand in operands {
                hasher.write_u64(memo[&operand.id()]);
            }
        }
    }
    hasher.finish()
}
