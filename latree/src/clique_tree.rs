//! Rooted trees of factor-bearing cliques.

use serde::{Deserialize, Serialize};

use crate::factor::Factor;
use crate::vars::VarList;

/// Stable handle into the node arena of a [`CliqueTree`]. Ids survive
/// cloning, so per-node state kept outside the tree stays valid across tree
/// copies.
pub type NodeId = usize;

/// One clique: a potential over the clique scope plus its tree links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtNode {
    pot: Factor,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl CtNode {
    pub fn potential(&self) -> &Factor {
        &self.pot
    }

    pub fn variables(&self) -> &VarList {
        self.pot.variables()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// A clique tree: an arena of [`CtNode`]s addressed by [`NodeId`] plus a
/// root. Neighboring cliques are assumed to share a nonempty separator and
/// the tree is assumed to satisfy the running-intersection property over
/// shared variables; neither is runtime-checked.
///
/// Cloning deep-copies every potential (variable handles stay shared), so
/// clones never alias table state — EM restart candidates and expectation
/// workers each own one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliqueTree {
    nodes: Vec<CtNode>,
    root: Option<NodeId>,
    score: f64,
}

impl CliqueTree {
    pub fn new() -> Self {
        CliqueTree::default()
    }

    /// Adds a detached node holding `pot`. The first node added becomes the
    /// root.
    pub fn add_node(&mut self, pot: Factor) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(CtNode {
            pot,
            parent: None,
            children: Vec::new(),
        });
        if self.root.is_none() {
            self.root = Some(id);
        }
        id
    }

    /// Links `child` under `parent`, setting both directions. This is the
    /// sole structural mutator, which keeps the parent/child links a simple
    /// rooted tree.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(self.nodes[child].parent.is_none(), "child already linked");
        self.nodes[parent].children.push(child);
        self.nodes[child].parent = Some(parent);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &CtNode {
        &self.nodes[id]
    }

    pub fn node_ids(&self) -> std::ops::Range<NodeId> {
        0..self.nodes.len()
    }

    pub fn potential(&self, id: NodeId) -> &Factor {
        &self.nodes[id].pot
    }

    pub fn potential_mut(&mut self, id: NodeId) -> &mut Factor {
        &mut self.nodes[id].pot
    }

    pub fn set_potential(&mut self, id: NodeId, pot: Factor) {
        self.nodes[id].pot = pot;
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn scope(&self, id: NodeId) -> &VarList {
        self.nodes[id].pot.variables()
    }

    /// Node ids in breadth-first order from the root, so every node follows
    /// its parent. Recompute after structural edits; traversal passes are
    /// driven by this order.
    ///
    /// Panics on a rootless tree; calibrating or linearizing an empty tree
    /// is a programmer error.
    pub fn bfs_order(&self) -> Vec<NodeId> {
        let root = self.root.expect("clique tree has no root");
        let mut order = vec![root];
        let mut i = 0;
        while i < order.len() {
            let id = order[i];
            i += 1;
            order.extend_from_slice(&self.nodes[id].children);
        }
        order
    }

    /// The node whose clique is exactly `vs`, if any.
    pub fn find_node(&self, vs: &VarList) -> Option<NodeId> {
        self.node_ids().find(|&id| self.scope(id) == vs)
    }

    /// A node whose clique is a superset of `vs`, if any. Used to attach new
    /// cliques to their structural parent while building trees.
    pub fn find_node_containing(&self, vs: &VarList) -> Option<NodeId> {
        self.node_ids().find(|&id| self.scope(id).contains(vs))
    }

    /// Union of all clique scopes.
    pub fn variables(&self) -> VarList {
        let mut vs = VarList::new();
        for nd in &self.nodes {
            vs = vs.union(nd.variables());
        }
        vs
    }

    /// Model score attached by learners (log-likelihood of the fitted
    /// parameters).
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn set_score(&mut self, score: f64) {
        self.score = score;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::VarList;

    fn clique(ids: &[usize]) -> Factor {
        Factor::new(VarList::with_cards(ids, &[]))
    }

    #[test]
    fn first_node_is_root() {
        let mut ct = CliqueTree::new();
        let a = ct.add_node(clique(&[0, 1]));
        let b = ct.add_node(clique(&[1, 2]));
        ct.add_child(a, b);
        assert_eq!(ct.root(), Some(a));
        assert_eq!(ct.parent(b), Some(a));
        assert_eq!(ct.children(a), &[b]);
    }

    #[test]
    fn bfs_order_parents_first() {
        let mut ct = CliqueTree::new();
        let a = ct.add_node(clique(&[0, 1]));
        let b = ct.add_node(clique(&[1, 2]));
        let c = ct.add_node(clique(&[2, 3]));
        let d = ct.add_node(clique(&[1, 4]));
        ct.add_child(a, b);
        ct.add_child(b, c);
        ct.add_child(a, d);
        let order = ct.bfs_order();
        assert_eq!(order[0], a);
        for &id in &order {
            if let Some(pa) = ct.parent(id) {
                let pos = |x| order.iter().position(|&y| y == x).unwrap();
                assert!(pos(pa) < pos(id));
            }
        }
    }

    #[test]
    fn find_node_containing_matches_superset() {
        let mut ct = CliqueTree::new();
        ct.add_node(clique(&[0, 1, 2]));
        ct.add_node(clique(&[2, 3]));
        let probe = VarList::with_cards(&[1, 2], &[]);
        assert_eq!(ct.find_node_containing(&probe), Some(0));
        assert_eq!(ct.find_node(&probe), None);
        let missing = VarList::with_cards(&[4], &[]);
        assert_eq!(ct.find_node_containing(&missing), None);
    }

    #[test]
    fn clone_does_not_alias_potentials() {
        let mut ct = CliqueTree::new();
        let a = ct.add_node(clique(&[0]));
        let mut copy = ct.clone();
        copy.potential_mut(a).set_values(&[1.0, 0.0]);
        assert_eq!(ct.potential(a).values(), &[0.5, 0.5]);
        assert_eq!(copy.potential(a).values(), &[1.0, 0.0]);
    }
}
