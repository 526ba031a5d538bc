//! Graph construction, interning, and session bookkeeping.

use lazir::shape;
use lazir::{DType, DictOfNamedArrays, GraphError, Literal, ScalarLiteral, Session};

#[test]
fn identical_calls_return_the_identical_node() {
    let session = Session::new();
    let x = session.placeholder("x", shape![4, 4], DType::F32).unwrap();
    let y = session.placeholder("y", shape![4, 4], DType::F32).unwrap();

    let before = session.node_count();
    let a = session.add(&x, &y).unwrap();
    let b = session.add(&x, &y).unwrap();

    assert_eq!(a, b);
    assert_eq!(a.id(), b.id());
    assert_eq!(session.node_count(), before + 1);
}

#[test]
fn different_operations_are_distinct_nodes() {
    let session = Session::new();
    let x = session.placeholder("x", shape![4], DType::F32).unwrap();
    let y = session.placeholder("y", shape![4], DType::F32).unwrap();

    let sum = session.add(&x, &y).unwrap();
    let product = session.mul(&x, &y).unwrap();
    assert_ne!(sum, product);
}

#[test]
fn operand_order_matters() {
    let session = Session::new();
    let x = session.placeholder("x", shape![4], DType::F32).unwrap();
    let y = session.placeholder("y", shape![4], DType::F32).unwrap();

    let xy = session.sub(&x, &y).unwrap();
    let yx = session.sub(&y, &x).unwrap();
    assert_ne!(xy, yx);
}

#[test]
fn placeholder_redeclaration_must_agree() {
    let session = Session::new();
    let first = session.placeholder("x", shape![2, 3], DType::F32).unwrap();
    let again = session.placeholder("x", shape![2, 3], DType::F32).unwrap();
    assert_eq!(first, again);

    let bad_shape = session.placeholder("x", shape![3, 2], DType::F32);
    assert!(matches!(bad_shape, Err(GraphError::ShapeMismatch { .. })));

    let bad_dtype = session.placeholder("x", shape![2, 3], DType::F64);
    assert!(matches!(bad_dtype, Err(GraphError::DtypeMismatch { .. })));
}

#[test]
fn tags_participate_in_identity() {
    let session = Session::new();
    let x = session.placeholder("x", shape![4], DType::F32).unwrap();

    let tagged = session.tagged(&x, "device", "gpu:0");
    assert_ne!(x, tagged);
    assert_eq!(tagged.tags().get("device").map(String::as_str), Some("gpu:0"));

    // Same tagging twice lands on the same interned node.
    assert_eq!(tagged, session.tagged(&x, "device", "gpu:0"));
    // Removing the tag round-trips to the original.
    assert_eq!(x, session.without_tag(&tagged, "device"));
}

#[test]
fn failed_construction_leaves_the_session_untouched() {
    let session = Session::new();
    let a = session.placeholder("a", shape![3], DType::F32).unwrap();
    let b = session.placeholder("b", shape![4], DType::F32).unwrap();

    let before = session.node_count();
    assert!(session.add(&a, &b).is_err());
    assert_eq!(session.node_count(), before);
}

#[test]
fn constants_validate_their_payload() {
    let bad_count = Literal::new(
        DType::F32,
        vec![2, 2],
        vec![ScalarLiteral::Float(1.0); 3],
    );
    assert!(matches!(bad_count, Err(GraphError::ShapeMismatch { .. })));

    let bad_class = Literal::new(DType::I32, vec![1], vec![ScalarLiteral::Float(1.5)]);
    assert!(matches!(bad_class, Err(GraphError::DtypeMismatch { .. })));

    let session = Session::new();
    let c = session.constant(Literal::vector_f64(vec![1.0, 2.0, 3.0]));
    assert_eq!(c.shape(), &shape![3]);
    assert_eq!(c.dtype(), DType::F64);
}

#[test]
fn scalar_constants_intern_by_value() {
    let session = Session::new();
    assert_eq!(session.scalar(2.0), session.scalar(2.0));
    assert_ne!(session.scalar(2.0), session.scalar(2i64));
}

#[test]
fn size_params_bind_once() {
    let session = Session::new();
    let n = session.size_param("n");
    let x = session
        .placeholder("x", shape![n.clone(), 4], DType::F32)
        .unwrap();

    assert!(matches!(
        session.concretize(x.shape()),
        Err(GraphError::UnboundSizeParam { .. })
    ));

    session.bind_size_param("n", 8).unwrap();
    assert_eq!(session.concretize(x.shape()).unwrap(), vec![8, 4]);

    // Rebinding to the same value is allowed, a conflict is not.
    session.bind_size_param("n", 8).unwrap();
    assert!(session.bind_size_param("n", 9).is_err());
}

#[test]
fn index_axis_checks_static_bounds() {
    let session = Session::new();
    let x = session.placeholder("x", shape![3, 5], DType::F32).unwrap();

    let row = session.index_axis(&x, 0, 2).unwrap();
    assert_eq!(row.shape(), &shape![5]);

    assert!(session.index_axis(&x, 0, 3).is_err());
    assert!(session.index_axis(&x, 2, 0).is_err());
}

#[test]
#[should_panic(expected = "already taken")]
fn named_outputs_reject_duplicate_names() {
    let session = Session::new();
    let x = session.placeholder("x", shape![2], DType::F32).unwrap();
    let mut outputs = DictOfNamedArrays::new();
    outputs.insert("out", x.clone());
    outputs.insert("out", x);
}

#[test]
#[should_panic(expected = "one session")]
fn named_outputs_reject_mixed_sessions() {
    let a = Session::new();
    let b = Session::new();
    let from_a = a.placeholder("x", shape![2], DType::F32).unwrap();
    let from_b = b.placeholder("y", shape![2], DType::F32).unwrap();
    let mut outputs = DictOfNamedArrays::new();
    outputs.insert("a", from_a);
    outputs.insert("b", from_b);
}
