//! Variables, ordered variable scopes, and mixed-radix joint-state cursors.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type VarId = usize;

/// Shared handle to a variable. Scopes share variable references, they never
/// own them.
pub type VarRef = Arc<Var>;

/// Partial assignment of variables to observed state indices. An absent id
/// means the variable is unobserved.
pub type Evidence = IndexMap<VarId, usize>;

/// Number of states assumed when none is given.
pub const DEFAULT_CARD: usize = 2;

/// A categorical variable. Identity is the id; the cardinality is fixed for
/// the lifetime of the handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Var {
    id: VarId,
    card: usize,
    name: String,
    latent: bool,
}

impl Var {
    pub fn new(id: VarId, card: usize) -> VarRef {
        Arc::new(Var {
            id,
            card,
            name: format!("x{}", id),
            latent: false,
        })
    }

    pub fn named(id: VarId, card: usize, name: impl Into<String>, latent: bool) -> VarRef {
        let name = name.into();
        let name = if name.is_empty() {
            format!("x{}", id)
        } else {
            name
        };
        Arc::new(Var {
            id,
            card,
            name,
            latent,
        })
    }

    pub fn id(&self) -> VarId {
        self.id
    }

    /// Number of states.
    pub fn card(&self) -> usize {
        self.card
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for variables absent from the observed dataset.
    pub fn latent(&self) -> bool {
        self.latent
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Var {}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}[{}]", self.id, self.card)
    }
}

/// An ordered set of variables, strictly increasing by id. All set algebra
/// runs as linear merges over the sorted contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VarList(Vec<VarRef>);

impl VarList {
    pub fn new() -> Self {
        VarList(Vec::new())
    }

    /// Builds a sorted list from ids and matching cardinalities; missing
    /// cardinalities default to [`DEFAULT_CARD`].
    pub fn with_cards(ids: &[VarId], cards: &[usize]) -> Self {
        let mut vs: Vec<VarRef> = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| Var::new(id, cards.get(i).copied().unwrap_or(DEFAULT_CARD)))
            .collect();
        vs.sort_by_key(|v| v.id());
        VarList(vs)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VarRef> {
        self.0.iter()
    }

    /// Number of joint states of the variables; an empty scope has one.
    pub fn n_states(&self) -> usize {
        self.0.iter().map(|v| v.card()).product()
    }

    /// True if every element of `other` is present in `self`.
    pub fn contains(&self, other: &VarList) -> bool {
        if self.len() < other.len() {
            return false;
        }
        let mut j = 0;
        for v in &self.0 {
            if j < other.len() && other.0[j].id() == v.id() {
                j += 1;
            }
        }
        j == other.len()
    }

    /// Elements of `self` that are not in `other`.
    pub fn diff(&self, other: &VarList) -> VarList {
        let mut w = Vec::with_capacity(self.len());
        let mut j = 0;
        for v in &self.0 {
            while j < other.len() && other.0[j].id() < v.id() {
                j += 1;
            }
            if j < other.len() && other.0[j].id() == v.id() {
                j += 1;
                continue;
            }
            w.push(v.clone());
        }
        VarList(w)
    }

    /// Merge of both lists, deduplicated by id.
    pub fn union(&self, other: &VarList) -> VarList {
        let mut w = Vec::with_capacity(self.len() + other.len());
        let mut j = 0;
        for v in &self.0 {
            while j < other.len() && other.0[j].id() < v.id() {
                w.push(other.0[j].clone());
                j += 1;
            }
            if j < other.len() && other.0[j].id() == v.id() {
                j += 1;
            }
            w.push(v.clone());
        }
        w.extend(other.0[j..].iter().cloned());
        VarList(w)
    }

    /// Elements present in both lists.
    pub fn intersect(&self, other: &VarList) -> VarList {
        let mut w = Vec::with_capacity(self.len().min(other.len()));
        let mut j = 0;
        for v in &self.0 {
            while j < other.len() && other.0[j].id() < v.id() {
                j += 1;
            }
            if j < other.len() && other.0[j].id() == v.id() {
                w.push(v.clone());
                j += 1;
            }
        }
        VarList(w)
    }

    /// Inserts `x` at its sorted position; if a variable with the same id is
    /// already present the list is unchanged.
    pub fn add(&mut self, x: VarRef) {
        match self.0.binary_search_by_key(&x.id(), |v| v.id()) {
            Ok(_) => {}
            Err(i) => self.0.insert(i, x),
        }
    }

    /// Removes the variable with the given id, if present.
    pub fn remove(&mut self, id: VarId) {
        if let Ok(i) = self.0.binary_search_by_key(&id, |v| v.id()) {
            self.0.remove(i);
        }
    }

    pub fn find_by_id(&self, id: VarId) -> Option<&VarRef> {
        self.0
            .binary_search_by_key(&id, |v| v.id())
            .ok()
            .map(|i| &self.0[i])
    }

    pub fn find_by_name(&self, name: &str) -> Option<&VarRef> {
        self.0.iter().find(|v| v.name() == name)
    }
}

impl PartialEq for VarList {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| a.id() == b.id())
    }
}

impl Eq for VarList {}

impl std::ops::Index<usize> for VarList {
    type Output = VarRef;

    fn index(&self, i: usize) -> &VarRef {
        &self.0[i]
    }
}

impl FromIterator<VarRef> for VarList {
    fn from_iter<T: IntoIterator<Item = VarRef>>(iter: T) -> Self {
        let mut vs: Vec<VarRef> = iter.into_iter().collect();
        vs.sort_by_key(|v| v.id());
        vs.dedup_by_key(|v| v.id());
        VarList(vs)
    }
}

impl<'a> IntoIterator for &'a VarList {
    type Item = &'a VarRef;
    type IntoIter = std::slice::Iter<'a, VarRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Mixed-radix cursor over the joint states of a superset scope, yielding at
/// every position the linear offset into a table defined over a subset scope.
///
/// For each superset dimension the stride is the running product of the
/// cardinalities of the subset variables consumed so far, and zero for
/// dimensions outside the subset, so advancing through every joint assignment
/// of the superset reproduces the correct subset-table offset for that
/// assignment. The cursor is single-pass and restartable through [`reset`].
///
/// [`reset`]: Index::reset
#[derive(Debug, Clone)]
pub struct Index {
    offset: usize,
    ended: bool,
    attrb: Vec<usize>,
    stride: Vec<usize>,
    vars: VarList,
}

impl Index {
    pub fn new(subset: &VarList, superset: &VarList) -> Self {
        let mut stride = vec![0; superset.len()];
        let mut j = 0;
        let mut s = 1;
        for v in subset {
            while j < superset.len() && superset[j].id() < v.id() {
                j += 1;
            }
            if j < superset.len() && superset[j].id() == v.id() {
                stride[j] = s;
                j += 1;
            }
            s *= v.card();
        }
        Index {
            offset: 0,
            ended: false,
            attrb: vec![0; superset.len()],
            stride,
            vars: superset.clone(),
        }
    }

    /// Current linear offset into the subset's table.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Current state of each superset variable, aligned with [`vars`].
    ///
    /// [`vars`]: Index::vars
    pub fn attribution(&self) -> &[usize] {
        &self.attrb
    }

    /// Current assignment keyed by variable id.
    pub fn attribution_map(&self) -> Evidence {
        self.vars
            .iter()
            .zip(self.attrb.iter())
            .map(|(v, &a)| (v.id(), a))
            .collect()
    }

    /// The superset scope this cursor walks.
    pub fn vars(&self) -> &VarList {
        &self.vars
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    pub fn reset(&mut self) {
        self.offset = 0;
        self.ended = false;
        self.attrb.iter_mut().for_each(|a| *a = 0);
    }

    /// Odometer increment, least-significant (first) superset variable first.
    /// Returns false once every joint assignment has been visited.
    pub fn next(&mut self) -> bool {
        if self.ended {
            return false;
        }
        for i in 0..self.attrb.len() {
            self.offset += self.stride[i];
            self.attrb[i] += 1;
            if self.attrb[i] < self.vars[i].card() {
                return true;
            }
            self.offset -= self.stride[i] * self.vars[i].card();
            self.attrb[i] = 0;
        }
        self.ended = true;
        false
    }

    /// Odometer increment advancing the most-significant (last) variable
    /// first, for re-expressing a table read in one variable ordering into
    /// another.
    pub fn next_right(&mut self) -> bool {
        if self.ended {
            return false;
        }
        for i in (0..self.attrb.len()).rev() {
            self.offset += self.stride[i];
            self.attrb[i] += 1;
            if self.attrb[i] < self.vars[i].card() {
                return true;
            }
            self.offset -= self.stride[i] * self.vars[i].card();
            self.attrb[i] = 0;
        }
        self.ended = true;
        false
    }
}
