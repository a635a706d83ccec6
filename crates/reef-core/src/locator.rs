use crate::node::{Child, Node};

/// Finds the node with identity `target` in `root`.
///
/// Pre-order depth-first: a node is checked before its children, children are
/// visited in order, and a node's fallback child is visited after its regular
/// children. With duplicate identities the first one in that order wins.
/// Absence is an ordinary outcome and yields `None`.
pub fn locate<'a>(root: &'a Node, target: &str) -> Option<&'a Node> {
    if root.identity() == target {
        return Some(root);
    }

    for child in root.child_slots() {
        if let Child::Node(node) = child {
            if let Some(found) = locate(node, target) {
                return Some(found);
            }
        }
    }

    root.fallback_child()
        .and_then(|fallback| locate(fallback, target))
}

impl Node {
    pub fn find(&self, target: &str) -> Option<&Node> {
        locate(self, target)
    }
}
