//! Shape and dtype inference at construction time.

use std::collections::BTreeMap;

use lazir::shape;
use lazir::{
    BinaryScalarOp, DType, GraphError, ReduceOp, ReshapeDim, ScalarExpr, Session, UnaryScalarOp,
};

#[test]
fn broadcasting_stretches_unit_axes() {
    let session = Session::new();
    let a = session.placeholder("a", shape![3, 1], DType::F32).unwrap();
    let b = session.placeholder("b", shape![1, 4], DType::F32).unwrap();

    let out = session.add(&a, &b).unwrap();
    assert_eq!(out.shape(), &shape![3, 4]);
}

#[test]
fn broadcasting_aligns_trailing_axes() {
    let session = Session::new();
    let a = session
        .placeholder("a", shape![2, 3, 4], DType::F32)
        .unwrap();
    let b = session.placeholder("b", shape![4], DType::F32).unwrap();

    let out = session.mul(&a, &b).unwrap();
    assert_eq!(out.shape(), &shape![2, 3, 4]);
}

#[test]
fn incompatible_shapes_are_rejected() {
    let session = Session::new();
    let a = session.placeholder("a", shape![3], DType::F32).unwrap();
    let b = session.placeholder("b", shape![4], DType::F32).unwrap();

    let err = session.add(&a, &b);
    assert!(matches!(err, Err(GraphError::ShapeMismatch { .. })));
}

#[test]
fn symbolic_axes_match_by_name_only() {
    let session = Session::new();
    let n = session.size_param("n");
    let m = session.size_param("m");

    let a = session
        .placeholder("a", shape![n.clone(), 4], DType::F32)
        .unwrap();
    let b = session
        .placeholder("b", shape![n.clone(), 4], DType::F32)
        .unwrap();
    let c = session.placeholder("c", shape![m, 4], DType::F32).unwrap();

    assert!(session.add(&a, &b).is_ok());
    assert!(session.add(&a, &c).is_err());
}

#[test]
fn dtype_promotion_follows_the_lattice() {
    let session = Session::new();
    let i = session.placeholder("i", shape![4], DType::I32).unwrap();
    let f = session.placeholder("f", shape![4], DType::F32).unwrap();

    // I32 does not fit in F32, so the result widens to F64.
    let mixed = session.add(&i, &f).unwrap();
    assert_eq!(mixed.dtype(), DType::F64);

    // True division of integers is float-valued.
    let ratio = session.div(&i, &i).unwrap();
    assert_eq!(ratio.dtype(), DType::F64);
}

#[test]
fn bool_arithmetic_is_rejected() {
    let session = Session::new();
    let p = session.placeholder("p", shape![4], DType::Bool).unwrap();
    let x = session.placeholder("x", shape![4], DType::I32).unwrap();

    let err = session.binary(BinaryScalarOp::Add, &p, &x);
    assert!(matches!(err, Err(GraphError::DtypeMismatch { .. })));
}

#[test]
fn transcendentals_are_float_valued() {
    let session = Session::new();
    let i = session.placeholder("i", shape![4], DType::I32).unwrap();

    let e = session.unary(UnaryScalarOp::Exp, &i).unwrap();
    assert_eq!(e.dtype(), DType::F64);

    let n = session.unary(UnaryScalarOp::Neg, &i).unwrap();
    assert_eq!(n.dtype(), DType::I32);
}

#[test]
fn index_lambda_subscripts_must_match_operand_rank() {
    let session = Session::new();
    let x = session.placeholder("x", shape![4, 4], DType::F32).unwrap();

    // One subscript against a rank-2 operand.
    let err = session.index_lambda(
        ScalarExpr::full_ref("in0", 1),
        BTreeMap::from([("in0".to_string(), x.clone())]),
        shape![4, 4],
        DType::F32,
    );
    assert!(matches!(err, Err(GraphError::ShapeMismatch { .. })));

    // An output index variable past the declared rank.
    let err = session.index_lambda(
        ScalarExpr::full_ref("in0", 2),
        BTreeMap::from([("in0".to_string(), x.clone())]),
        shape![4],
        DType::F32,
    );
    assert!(matches!(err, Err(GraphError::ShapeMismatch { .. })));

    // A reference to a binding that was never supplied.
    let err = session.index_lambda(
        ScalarExpr::full_ref("in1", 2),
        BTreeMap::from([("in0".to_string(), x)]),
        shape![4, 4],
        DType::F32,
    );
    assert!(matches!(err, Err(GraphError::ShapeMismatch { .. })));
}

#[test]
fn reductions_drop_the_axis_and_widen_accumulators() {
    let session = Session::new();
    let x = session.placeholder("x", shape![2, 3, 4], DType::I8).unwrap();

    let summed = session.reduce_sum(&x, 1).unwrap();
    assert_eq!(summed.shape(), &shape![2, 4]);
    assert_eq!(summed.dtype(), DType::I64);

    let maxed = session.reduce_max(&x, 1).unwrap();
    assert_eq!(maxed.dtype(), DType::I8);

    let err = session.reduce(ReduceOp::Sum, &x, 3);
    assert!(matches!(err, Err(GraphError::ShapeMismatch { .. })));
}

#[test]
fn reducing_to_a_scalar() {
    let session = Session::new();
    let x = session.placeholder("x", shape![5], DType::F64).unwrap();
    let total = session.reduce_sum(&x, 0).unwrap();
    assert_eq!(total.ndim(), 0);
}

#[test]
fn reshape_infers_at_most_one_axis() {
    let session = Session::new();
    let x = session.placeholder("x", shape![6, 4], DType::F32).unwrap();

    let out = session
        .reshape(&x, [ReshapeDim::from(8), ReshapeDim::Inferred])
        .unwrap();
    assert_eq!(out.shape(), &shape![8, 3]);

    let err = session.reshape(&x, [ReshapeDim::from(5), ReshapeDim::Inferred]);
    assert!(matches!(err, Err(GraphError::ShapeMismatch { .. })));

    let err = session.reshape(&x, [ReshapeDim::Inferred, ReshapeDim::Inferred]);
    assert!(matches!(err, Err(GraphError::ShapeMismatch { .. })));
}

#[test]
fn reshape_keeps_symbolic_factors() {
    let session = Session::new();
    let n = session.size_param("n");
    let x = session
        .placeholder("x", shape![n.clone(), 6], DType::F32)
        .unwrap();

    let out = session
        .reshape(&x, [ReshapeDim::from(n.clone()), 2.into(), 3.into()])
        .unwrap();
    assert_eq!(out.shape(), &shape![n, 2, 3]);

    // The symbolic factor cannot be silently dropped or renamed.
    let err = session.reshape(&x, [ReshapeDim::from(6), ReshapeDim::Inferred]);
    assert!(err.is_err());
}

#[test]
fn axis_permutation_validates_the_permutation() {
    let session = Session::new();
    let x = session
        .placeholder("x", shape![2, 3, 4], DType::F32)
        .unwrap();

    let t = session.axis_permutation(&x, vec![2, 0, 1]).unwrap();
    assert_eq!(t.shape(), &shape![4, 2, 3]);

    assert!(session.axis_permutation(&x, vec![0, 1]).is_err());
    assert!(session.axis_permutation(&x, vec![0, 0, 1]).is_err());
}

#[test]
fn stack_requires_identical_shapes() {
    let session = Session::new();
    let a = session.placeholder("a", shape![2, 3], DType::F32).unwrap();
    let b = session.placeholder("b", shape![2, 3], DType::F32).unwrap();

    let stacked = session.stack(&[a.clone(), b.clone()], 1).unwrap();
    assert_eq!(stacked.shape(), &shape![2, 2, 3]);

    let c = session.placeholder("c", shape![3, 2], DType::F32).unwrap();
    assert!(session.stack(&[a.clone(), c], 0).is_err());

    let d = session.placeholder("d", shape![2, 3], DType::F64).unwrap();
    assert!(matches!(
        session.stack(&[a, d], 0),
        Err(GraphError::DtypeMismatch { .. })
    ));
}

#[test]
fn concatenate_sums_static_lengths_only() {
    let session = Session::new();
    let a = session.placeholder("a", shape![2, 3], DType::F32).unwrap();
    let b = session.placeholder("b", shape![4, 3], DType::F32).unwrap();

    let joined = session.concatenate(&[a.clone(), b], 0).unwrap();
    assert_eq!(joined.shape(), &shape![6, 3]);

    let n = session.size_param("n");
    let s = session.placeholder("s", shape![n, 3], DType::F32).unwrap();
    assert!(session.concatenate(&[a, s], 0).is_err());
}
