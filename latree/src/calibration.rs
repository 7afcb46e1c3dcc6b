//! Two-pass sum-product calibration over a clique tree.
//!
//! A calibration session binds one tree to one evidence assignment at a time.
//! Applying evidence copies the stored potentials, so inference never mutates
//! the model; message state is rebuilt on every [`run`]/[`posterior`] call and
//! the session is reused across many EM iterations. Sessions are not shared:
//! concurrent inference takes one session per worker over a private tree
//! clone.
//!
//! Messages are memoized to keep the passes linear in the number of cliques:
//! the upward pass stores, per node, the running products of the initial
//! potential with the messages of the first `i` children (`prev`), and the
//! downward pass stores suffix products of the parent message with the
//! messages of the later siblings (`post`), so no node ever rebuilds a
//! product of all its neighbors from scratch.
//!
//! [`run`]: TreeCalibration::run
//! [`posterior`]: TreeCalibration::posterior

use crate::clique_tree::{CliqueTree, NodeId};
use crate::factor::Factor;
use crate::vars::{Evidence, VarList};

/// Calibration session over an owned [`CliqueTree`].
#[derive(Debug)]
pub struct TreeCalibration {
    tree: CliqueTree,
    /// Breadth-first node order; reversed it is a valid post-order.
    order: Vec<NodeId>,
    /// Per-node initial potential: stored potential with evidence applied.
    init: Vec<Factor>,
    /// Per-node calibrated potential, present after a full [`run`].
    ///
    /// [`run`]: TreeCalibration::run
    calibrated: Vec<Option<Factor>>,
    /// Message each node sends up to its parent.
    send: Vec<Option<Factor>>,
    /// Message each node receives from its parent.
    receive: Vec<Option<Factor>>,
    /// `prev[v][i]`: product of `v`'s initial potential and the messages of
    /// its first `i` children.
    prev: Vec<Vec<Factor>>,
    /// `post[v][i]`: product of the parent message and the messages of
    /// children `i+1..`.
    post: Vec<Vec<Option<Factor>>>,
    /// Query variables kept in upward messages while answering a posterior.
    preserve: Option<VarList>,
}

impl TreeCalibration {
    /// Binds a session to `tree`. Panics if the tree has no root.
    pub fn new(tree: CliqueTree) -> Self {
        let order = tree.bfs_order();
        let n = tree.len();
        TreeCalibration {
            tree,
            order,
            init: Vec::new(),
            calibrated: vec![None; n],
            send: vec![None; n],
            receive: vec![None; n],
            prev: vec![Vec::new(); n],
            post: vec![Vec::new(); n],
            preserve: None,
        }
    }

    pub fn tree(&self) -> &CliqueTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut CliqueTree {
        &mut self.tree
    }

    pub fn into_tree(self) -> CliqueTree {
        self.tree
    }

    /// Calibrated potential of a node. Panics before the first full [`run`].
    ///
    /// [`run`]: TreeCalibration::run
    pub fn calibrated(&self, id: NodeId) -> &Factor {
        self.calibrated[id]
            .as_ref()
            .expect("node is not calibrated; run the session first")
    }

    /// Full two-pass calibration under `evidence`. Afterwards every node
    /// holds the joint of its clique and the observations, and the sum over
    /// any calibrated potential is the probability of the evidence, which is
    /// returned.
    pub fn run(&mut self, evidence: &Evidence) -> f64 {
        self.preserve = None;
        self.apply_evidence(evidence);
        self.upward_pass();
        self.downward_pass();
        let root = self.order[0];
        self.calibrated(root).values().iter().sum()
    }

    /// Joint posterior of `vs` given `evidence`, using an upward pass only:
    /// the query variables are preserved in every upward message and the
    /// root-accumulated product is marginalized onto them. Cheaper than
    /// [`run`] when a single marginal or joint is needed.
    ///
    /// [`run`]: TreeCalibration::run
    pub fn posterior(&mut self, vs: &VarList, evidence: &Evidence) -> Factor {
        self.preserve = (!vs.is_empty()).then(|| vs.clone());
        self.apply_evidence(evidence);
        self.upward_pass();
        let root = self.order[0];
        let mut f = self.prev[root].last().unwrap().clone();
        f.marginalize(vs);
        self.preserve = None;
        f
    }

    /// Sets every node's initial potential to a copy of its stored potential
    /// with the evidence applied, and discards message state from any
    /// previous call.
    fn apply_evidence(&mut self, evidence: &Evidence) {
        self.init = self
            .tree
            .node_ids()
            .map(|id| {
                let mut p = self.tree.potential(id).clone();
                p.reduce(evidence);
                p
            })
            .collect();
        self.calibrated.iter_mut().for_each(|f| *f = None);
        self.send.iter_mut().for_each(|f| *f = None);
        self.receive.iter_mut().for_each(|f| *f = None);
        self.prev.iter_mut().for_each(|f| f.clear());
        self.post.iter_mut().for_each(|f| f.clear());
    }

    /// Post-order sweep toward the root: builds the `prev` running products
    /// and sends each node's message up to its parent, marginalized onto the
    /// parent scope (plus the preserve-set while a posterior query is
    /// active).
    fn upward_pass(&mut self) {
        for k in (0..self.order.len()).rev() {
            let v = self.order[k];
            let children = self.tree.children(v).to_vec();
            let mut prev = Vec::with_capacity(children.len() + 1);
            prev.push(self.init[v].clone());
            for &ch in &children {
                let mut p = self.send[ch].as_ref().unwrap().clone();
                p.times(prev.last().unwrap());
                prev.push(p);
            }
            if let Some(pa) = self.tree.parent(v) {
                let mut msg = prev.last().unwrap().clone();
                let target = match &self.preserve {
                    Some(ps) => self.tree.scope(pa).union(ps),
                    None => self.tree.scope(pa).clone(),
                };
                msg.marginalize(&target);
                self.send[v] = Some(msg);
            }
            self.prev[v] = prev;
        }
    }

    /// Pre-order sweep from the root: combines each node's accumulated
    /// product with its parent message into the calibrated potential, and
    /// dispatches child messages through the `post` suffix products.
    fn downward_pass(&mut self) {
        for k in 0..self.order.len() {
            let v = self.order[k];
            let children = self.tree.children(v).to_vec();
            let mut calib = self.prev[v].last().unwrap().clone();
            if self.tree.parent(v).is_some() {
                calib.times(self.receive[v].as_ref().unwrap());
            }
            self.calibrated[v] = Some(calib);
            if children.is_empty() {
                continue;
            }
            let n = children.len();
            let mut post: Vec<Option<Factor>> = vec![None; n];
            post[n - 1] = self.receive[v].clone();
            for i in (0..n - 1).rev() {
                let mut p = self.send[children[i + 1]].as_ref().unwrap().clone();
                if let Some(nxt) = &post[i + 1] {
                    p.times(nxt);
                }
                post[i] = Some(p);
            }
            for (i, &ch) in children.iter().enumerate() {
                let mut msg = self.prev[v][i].clone();
                if let Some(p) = &post[i] {
                    msg.times(p);
                }
                msg.marginalize(self.tree.scope(ch));
                self.receive[ch] = Some(msg);
            }
            self.post[v] = post;
        }
    }
}
