//! Stock analyses built on the analyzing mapper.

use std::collections::BTreeSet;

use crate::array::{ArrayKind, ArrayRef, DictOfNamedArrays};
use crate::transform::{Analysis, Analyzer};

/// Collects the names of all placeholders a graph depends on.
#[derive(Default)]
pub struct UsedPlaceholders {
    names: BTreeSet<String>,
}

impl UsedPlaceholders {
    pub fn into_names(self) -> BTreeSet<String> {
        self.names
    }
}

impl Analysis for UsedPlaceholders {
    type Value = ();

    fn analyze(&mut self, node: &ArrayRef, _operands: &[()]) {
        if let ArrayKind::Placeholder { name } = node.kind() {
            self.names.insert(name.clone());
        }
    }
}

/// Placeholder names reachable from `root`.
pub fn used_placeholders(root: &ArrayRef) -> BTreeSet<String> {
    let mut analyzer = Analyzer::new(UsedPlaceholders::default());
    analyzer.run(root);
    analyzer.into_inner().into_names()
}

/// Placeholder names reachable from any output of `outputs`.
pub fn dict_used_placeholders(outputs: &DictOfNamedArrays) -> BTreeSet<String> {
    let mut analyzer = Analyzer::new(UsedPlaceholders::default());
    for root in outputs.roots() {
        analyzer.run(root);
    }
    analyzer.into_inner().into_names()
}

struct CountNodes;

impl Analysis for CountNodes {
    type Value = ();

    fn analyze(&mut self, _node: &ArrayRef, _operands: &[()]) {}
}

/// Number of distinct nodes reachable from `root`. Shared subgraphs count
/// once.
pub fn node_count(root: &ArrayRef) -> usize {
    let mut analyzer = Analyzer::new(CountNodes);
    analyzer.run(root);
    analyzer.visited()
}

/// Number of distinct nodes reachable from the outputs of `outputs`.
pub fn dict_node_count(outputs: &DictOfNamedArrays) -> usize {
    let mut analyzer = Analyzer::new(CountNodes);
    for root in outputs.roots() {
        analyzer.run(root);
    }
    analyzer.visited()
}
