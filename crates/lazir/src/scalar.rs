//! Scalar index-expression language used by `IndexLambda` nodes.
//!
//! An index lambda describes one output element as a scalar expression over
//! the output index variables (`Index(i)` for axis `i`) and subscripted
//! references into named operand bindings. Reductions introduce their own
//! bound indices (`ReduceIndex`) scoped to the reduction body. The code
//! generator consumes these expressions verbatim; the core only builds and
//! rewrites them.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::shape::{Dim, Shape};

/// A literal scalar embedded in an expression or a constant array.
///
/// Floats compare and hash by bit pattern so that structurally identical
/// expressions (including NaN literals) deduplicate reliably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarLiteral {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ScalarLiteral {
    /// Natural dtype of the literal on its own.
    pub fn dtype(&self) -> DType {
        match self {
            ScalarLiteral::Bool(_) => DType::Bool,
            ScalarLiteral::Int(_) => DType::I64,
            ScalarLiteral::Float(_) => DType::F64,
        }
    }

    /// Whether the literal can populate an array of the given dtype.
    pub fn fits(&self, dtype: DType) -> bool {
        match self {
            ScalarLiteral::Bool(_) => dtype == DType::Bool,
            ScalarLiteral::Int(_) => dtype.is_integer(),
            ScalarLiteral::Float(_) => dtype.is_float(),
        }
    }
}

impl PartialEq for ScalarLiteral {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScalarLiteral::Bool(a), ScalarLiteral::Bool(b)) => a == b,
            (ScalarLiteral::Int(a), ScalarLiteral::Int(b)) => a == b,
            (ScalarLiteral::Float(a), ScalarLiteral::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for ScalarLiteral {}

impl Hash for ScalarLiteral {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ScalarLiteral::Bool(value) => {
                state.write_u8(0);
                value.hash(state);
            }
            ScalarLiteral::Int(value) => {
                state.write_u8(1);
                value.hash(state);
            }
            ScalarLiteral::Float(value) => {
                state.write_u8(2);
                value.to_bits().hash(state);
            }
        }
    }
}

impl From<bool> for ScalarLiteral {
    fn from(value: bool) -> Self {
        ScalarLiteral::Bool(value)
    }
}

impl From<i64> for ScalarLiteral {
    fn from(value: i64) -> Self {
        ScalarLiteral::Int(value)
    }
}

impl From<f64> for ScalarLiteral {
    fn from(value: f64) -> Self {
        ScalarLiteral::Float(value)
    }
}

/// Elementwise unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryScalarOp {
    Neg,
    Abs,
    Exp,
    Log,
    Tanh,
    Erf,
    Rsqrt,
    Reciprocal,
}

impl UnaryScalarOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryScalarOp::Neg => "neg",
            UnaryScalarOp::Abs => "abs",
            UnaryScalarOp::Exp => "exp",
            UnaryScalarOp::Log => "log",
            UnaryScalarOp::Tanh => "tanh",
            UnaryScalarOp::Erf => "erf",
            UnaryScalarOp::Rsqrt => "rsqrt",
            UnaryScalarOp::Reciprocal => "reciprocal",
        }
    }
}

/// Elementwise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryScalarOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
}

impl BinaryScalarOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryScalarOp::Add => "add",
            BinaryScalarOp::Sub => "sub",
            BinaryScalarOp::Mul => "mul",
            BinaryScalarOp::Div => "div",
            BinaryScalarOp::Maximum => "maximum",
            BinaryScalarOp::Minimum => "minimum",
        }
    }
}

/// Reduction combiners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Product,
    Max,
    Min,
}

impl ReduceOp {
    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "reduce_sum",
            ReduceOp::Product => "reduce_product",
            ReduceOp::Max => "reduce_max",
            ReduceOp::Min => "reduce_min",
        }
    }
}

/// Scalar expression tree of an index lambda.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarExpr {
    Literal(ScalarLiteral),
    /// Output index variable for the given axis.
    Index(usize),
    /// Bound index of the `k`-th enclosing reduction extent.
    ReduceIndex(usize),
    /// Subscripted reference into a named operand binding.
    Ref {
        binding: String,
        indices: Vec<ScalarExpr>,
    },
    Unary {
        op: UnaryScalarOp,
        inner: Box<ScalarExpr>,
    },
    Binary {
        op: BinaryScalarOp,
        lhs: Box<ScalarExpr>,
        rhs: Box<ScalarExpr>,
    },
    /// Reduction over the given extents; `ReduceIndex(k)` in the body ranges
    /// over `extents[k]`.
    Reduce {
        op: ReduceOp,
        extents: Vec<Dim>,
        body: Box<ScalarExpr>,
    },
}

impl ScalarExpr {
    /// Reference to `binding` subscripted with the full output index,
    /// `binding[_0, .., _{rank-1}]`.
    pub fn full_ref(binding: impl Into<String>, rank: usize) -> Self {
        ScalarExpr::Ref {
            binding: binding.into(),
            indices: (0..rank).map(ScalarExpr::Index).collect(),
        }
    }

    /// Reference to `binding` whose shape broadcasts against an output of
    /// rank `out_rank`: trailing axes align and size-1 axes are pinned to
    /// index 0.
    pub fn broadcast_ref(binding: impl Into<String>, operand: &Shape, out_rank: usize) -> Self {
        let offset = out_rank - operand.rank();
        let indices = operand
            .dims()
            .iter()
            .enumerate()
            .map(|(axis, dim)| {
                if matches!(dim, Dim::Static(1)) {
                    ScalarExpr::Literal(ScalarLiteral::Int(0))
                } else {
                    ScalarExpr::Index(axis + offset)
                }
            })
            .collect();
        ScalarExpr::Ref {
            binding: binding.into(),
            indices,
        }
    }

    /// Names of all operand bindings referenced anywhere in the expression.
    pub fn referenced_bindings(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_bindings(&mut names);
        names
    }

    fn collect_bindings(&self, names: &mut BTreeSet<String>) {
        match self {
            ScalarExpr::Literal(_) | ScalarExpr::Index(_) | ScalarExpr::ReduceIndex(_) => {}
            ScalarExpr::Ref { binding, indices } => {
                names.insert(binding.clone());
                for index in indices {
                    index.collect_bindings(names);
                }
            }
            ScalarExpr::Unary { inner, .. } => inner.collect_bindings(names),
            ScalarExpr::Binary { lhs, rhs, .. } => {
                lhs.collect_bindings(names);
                rhs.collect_bindings(names);
            }
            ScalarExpr::Reduce { body, .. } => body.collect_bindings(names),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape;

    #[test]
    fn nan_literals_compare_equal() {
        let a = ScalarLiteral::Float(f64::NAN);
        let b = ScalarLiteral::Float(f64::NAN);
        assert_eq!(a, b);
    }

    #[test]
    fn broadcast_ref_pins_unit_axes() {
        let expr = ScalarExpr::broadcast_ref("in0", &shape![3, 1], 2);
        let ScalarExpr::Ref { indices, .. } = &expr else {
            panic!("expected a reference");
        };
        assert_eq!(indices[0], ScalarExpr::Index(0));
        assert_eq!(indices[1], ScalarExpr::Literal(ScalarLiteral::Int(0)));
    }

    #[test]
    fn referenced_bindings_walks_nested_expressions() {
        let expr = ScalarExpr::Binary {
            op: BinaryScalarOp::Add,
            lhs: Box::new(ScalarExpr::full_ref("a", 1)),
            rhs: Box::new(ScalarExpr::Reduce {
                op: ReduceOp::Sum,
                extents: vec![Dim::Static(4)],
                body: Box::new(ScalarExpr::full_ref("b", 1)),
            }),
        };
        let names: Vec<_> = expr.referenced_bindings().into_iter().collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
