//! The memoized rewrite engine and the stock analyses.

use lazir::fingerprint::{dict_digest, structural_digest};
use lazir::shape;
use lazir::transform::analyses::{dict_node_count, node_count, used_placeholders};
use lazir::transform::{deduplicate, IdentityRewrite};
use lazir::{
    Analysis, Analyzer, ArrayKind, ArrayRef, DType, DictOfNamedArrays, GraphError, Result,
    RewriteRule, Rewriter, Session, rewrite_root,
};

fn diamond(session: &Session) -> ArrayRef {
    let x = session.placeholder("x", shape![4, 4], DType::F32).unwrap();
    let left = session.exp(&x).unwrap();
    let right = session.neg(&x).unwrap();
    session.add(&left, &right).unwrap()
}

#[test]
fn identity_rewrite_preserves_structure() {
    let source = Session::new();
    let root = diamond(&source);

    let target = Session::new();
    let copied = rewrite_root(&target, &mut IdentityRewrite, &root).unwrap();

    assert_eq!(structural_digest(&root), structural_digest(&copied));
    assert_eq!(node_count(&root), node_count(&copied));
    assert_eq!(copied.session_id(), target.id());
}

#[test]
fn rewriting_into_the_same_session_is_a_no_op() {
    let session = Session::new();
    let root = diamond(&session);

    let before = session.node_count();
    let mapped = rewrite_root(&session, &mut IdentityRewrite, &root).unwrap();
    assert_eq!(mapped, root);
    assert_eq!(session.node_count(), before);
}

#[test]
fn deduplicate_merges_across_sessions() {
    // Two sessions build the same expression independently; each session is
    // internally deduplicated, but the dict glue has to come from one
    // session, so copy both graphs through a third.
    let build = |session: &Session| diamond(session);
    let a = build(&Session::new());

    let target = Session::new();
    let b = rewrite_root(&target, &mut IdentityRewrite, &a).unwrap();
    let c = rewrite_root(&target, &mut IdentityRewrite, &diamond(&Session::new())).unwrap();
    // Structurally equal graphs from different origins collapse to the same
    // interned nodes.
    assert_eq!(b, c);

    let outputs = DictOfNamedArrays::from_pairs([
        ("first".to_string(), b.clone()),
        ("second".to_string(), c),
    ]);
    let fresh = Session::new();
    let deduped = deduplicate(&fresh, &outputs).unwrap();
    assert_eq!(dict_digest(&outputs), dict_digest(&deduped));
    assert_eq!(dict_node_count(&outputs), dict_node_count(&deduped));
}

/// Replaces every placeholder of the given name with a fixed substitute.
struct SubstitutePlaceholder {
    name: String,
    replacement: ArrayRef,
}

impl RewriteRule for SubstitutePlaceholder {
    fn rewrite(&mut self, node: &ArrayRef, _rewriter: &mut Rewriter) -> Result<Option<ArrayRef>> {
        match node.kind() {
            ArrayKind::Placeholder { name } if *name == self.name => {
                Ok(Some(self.replacement.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[test]
fn rules_substitute_subgraphs() {
    let session = Session::new();
    let root = diamond(&session);

    let replacement = session.placeholder("y", shape![4, 4], DType::F32).unwrap();
    let mut rule = SubstitutePlaceholder {
        name: "x".to_string(),
        replacement,
    };
    let rewritten = rewrite_root(&session, &mut rule, &root).unwrap();

    let names = used_placeholders(&rewritten);
    assert!(names.contains("y"));
    assert!(!names.contains("x"));
    // Same structure either way, only the leaf name changed.
    assert_eq!(node_count(&rewritten), node_count(&root));
}

#[test]
fn substituted_operands_must_keep_their_rank() {
    let session = Session::new();
    let root = diamond(&session);

    // Swapping the rank-2 leaf for a rank-1 array would leave the lambda
    // bodies subscripting past the operand's axes; the rebuild must refuse.
    let replacement = session.placeholder("v", shape![4], DType::F32).unwrap();
    let mut rule = SubstitutePlaceholder {
        name: "x".to_string(),
        replacement,
    };
    let err = rewrite_root(&session, &mut rule, &root);
    assert!(matches!(err, Err(GraphError::ShapeMismatch { .. })));
}

struct ReenterSelf;

impl RewriteRule for ReenterSelf {
    fn enter(&mut self, node: &ArrayRef, rewriter: &mut Rewriter) -> Result<Option<ArrayRef>> {
        // Asking for the node whose mapping is in progress cannot terminate.
        rewriter.map(self, node).map(Some)
    }

    fn rewrite(&mut self, _node: &ArrayRef, _rewriter: &mut Rewriter) -> Result<Option<ArrayRef>> {
        Ok(None)
    }
}

#[test]
fn reentrant_mapping_of_an_in_flight_node_fails_fast() {
    let session = Session::new();
    let root = diamond(&session);

    let err = rewrite_root(&session, &mut ReenterSelf, &root);
    assert!(matches!(err, Err(GraphError::TraversalCycle { .. })));
}

struct CountVisits {
    visits: usize,
}

impl Analysis for CountVisits {
    type Value = usize;

    fn analyze(&mut self, _node: &ArrayRef, operands: &[usize]) -> usize {
        self.visits += 1;
        1 + operands.iter().sum::<usize>()
    }
}

#[test]
fn analyses_visit_shared_nodes_once() {
    let session = Session::new();
    let root = diamond(&session);

    let mut analyzer = Analyzer::new(CountVisits { visits: 0 });
    // Path count through the diamond is 3 (x is reached twice), but the
    // hook must fire once per distinct node.
    let paths = analyzer.run(&root);
    assert_eq!(paths, 5);
    assert_eq!(analyzer.visited(), 4);
    assert_eq!(analyzer.into_inner().visits, 4);
}

#[test]
fn analyzer_memo_spans_roots() {
    let session = Session::new();
    let root = diamond(&session);
    let other = session.exp(&root).unwrap();

    let mut analyzer = Analyzer::new(CountVisits { visits: 0 });
    analyzer.run(&root);
    analyzer.run(&other);
    assert_eq!(analyzer.into_inner().visits, 5);
}

#[test]
fn used_placeholders_reports_every_leaf() {
    let session = Session::new();
    let a = session.placeholder("a", shape![2], DType::F32).unwrap();
    let b = session.placeholder("b", shape![2], DType::F32).unwrap();
    let c = session.constant(lazir::Literal::vector_f64(vec![1.0, 2.0]));

    let sum = session.add(&a, &b).unwrap();
    let out = session.mul(&sum, &sum).unwrap();
    assert_eq!(
        used_placeholders(&out).into_iter().collect::<Vec<_>>(),
        vec!["a".to_string(), "b".to_string()]
    );
    assert!(used_placeholders(&c).is_empty());
}
