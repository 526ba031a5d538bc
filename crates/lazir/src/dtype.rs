//! Scalar element types and the promotion table applied by every operation.
//!
//! One explicit NumPy-style lattice is used uniformly instead of per-op ad
//! hoc rules: bool promotes to anything, integers widen among themselves,
//! floats widen among themselves, and mixing an integer with a float picks
//! the narrowest float that can represent the integer (`I32`/`I64` with
//! `F32` therefore lands on `F64`). Arithmetic on `Bool` is rejected rather
//! than silently promoted.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::scalar::{BinaryScalarOp, ReduceOp, UnaryScalarOp};

/// Logical dtype of an array expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn is_integer(self) -> bool {
        matches!(self, DType::I8 | DType::I16 | DType::I32 | DType::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Storage width in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::I8 => 1,
            DType::I16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    fn bitwidth(self) -> usize {
        self.size_in_bytes() * 8
    }
}

/// Combines two dtypes under the documented promotion lattice.
///
/// Promotion itself is total over this closed set; operations layer their own
/// restrictions (e.g. no arithmetic on `Bool`) on top of it.
pub fn promote(a: DType, b: DType) -> DType {
    use DType::*;
    if a == b {
        return a;
    }
    match (a, b) {
        (Bool, other) | (other, Bool) => other,
        _ if a.is_integer() && b.is_integer() => {
            if a.bitwidth() >= b.bitwidth() {
                a
            } else {
                b
            }
        }
        _ if a.is_float() && b.is_float() => {
            if a.bitwidth() >= b.bitwidth() {
                a
            } else {
                b
            }
        }
        _ => {
            // Exactly one side is an integer, the other a float.
            let (int, float) = if a.is_integer() { (a, b) } else { (b, a) };
            if float == F64 || int.bitwidth() > 16 {
                F64
            } else {
                F32
            }
        }
    }
}

/// Result dtype of an elementwise binary operation, or the reason it is
/// rejected.
pub fn binary_result_dtype(op: BinaryScalarOp, lhs: DType, rhs: DType) -> Result<DType> {
    if lhs == DType::Bool || rhs == DType::Bool {
        return Err(GraphError::dtype(op.name(), lhs, rhs));
    }
    let promoted = promote(lhs, rhs);
    Ok(match op {
        // True division always produces a float.
        BinaryScalarOp::Div => to_float(promoted),
        _ => promoted,
    })
}

/// Result dtype of an elementwise unary operation.
pub fn unary_result_dtype(op: UnaryScalarOp, input: DType) -> Result<DType> {
    if input == DType::Bool {
        return Err(GraphError::dtype(op.name(), input, input));
    }
    Ok(match op {
        UnaryScalarOp::Neg | UnaryScalarOp::Abs => input,
        // Transcendental results are float-valued regardless of input.
        _ => to_float(input),
    })
}

/// Accumulation dtype for a reduction. Integer and bool sums/products widen
/// to `I64` so that long reductions do not overflow narrow accumulators;
/// max/min keep the input dtype.
pub fn reduce_result_dtype(op: ReduceOp, input: DType) -> DType {
    match op {
        ReduceOp::Sum | ReduceOp::Product => match input {
            DType::Bool | DType::I8 | DType::I16 | DType::I32 | DType::I64 => DType::I64,
            DType::F32 | DType::F64 => input,
        },
        ReduceOp::Max | ReduceOp::Min => input,
    }
}

fn to_float(dtype: DType) -> DType {
    if dtype.is_float() {
        dtype
    } else {
        DType::F64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_float_mixing_picks_a_wide_enough_float() {
        assert_eq!(promote(DType::I16, DType::F32), DType::F32);
        assert_eq!(promote(DType::I32, DType::F32), DType::F64);
        assert_eq!(promote(DType::I64, DType::F32), DType::F64);
        assert_eq!(promote(DType::I8, DType::F64), DType::F64);
    }

    #[test]
    fn bool_arithmetic_is_rejected() {
        let err = binary_result_dtype(BinaryScalarOp::Add, DType::Bool, DType::I32);
        assert!(matches!(err, Err(GraphError::DtypeMismatch { .. })));
    }

    #[test]
    fn integer_sums_widen() {
        assert_eq!(reduce_result_dtype(ReduceOp::Sum, DType::I8), DType::I64);
        assert_eq!(reduce_result_dtype(ReduceOp::Max, DType::I8), DType::I8);
        assert_eq!(reduce_result_dtype(ReduceOp::Sum, DType::F32), DType::F32);
    }
}
