//! Dense potential tables over discrete variable scopes.

use ndarray::{azip, Array1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::vars::{Evidence, Index, VarList, VarRef};
use crate::{LatreeError, Result};

/// Tolerance used by [`Factor::equal`].
const EQ_TOL: f64 = 1e-14;

/// A function from the joint states of a variable scope to nonnegative
/// reals; a probability table when normalized.
///
/// Values are stored in the fixed mixed-radix layout shared with
/// [`Index`]: the first (lowest-id) scope variable is the least-significant
/// digit. Unless stated otherwise, operations mutate the receiver in place;
/// they also return it so steps can be chained. The contract is the final
/// receiver state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factor {
    vars: VarList,
    values: Array1<f64>,
}

impl Factor {
    /// Uniform distribution over the scope. An empty scope yields the
    /// single-cell identity factor with value one.
    pub fn new(vars: VarList) -> Self {
        let n = vars.n_states();
        Factor {
            vars,
            values: Array1::from_elem(n, 1.0 / n as f64),
        }
    }

    /// All-zero table over the scope.
    pub fn zeros(vars: VarList) -> Self {
        let n = vars.n_states();
        Factor {
            vars,
            values: Array1::zeros(n),
        }
    }

    /// One-hot factor: a single state of `var` set to one.
    pub fn indicator(var: VarRef, state: usize) -> Self {
        assert!(state < var.card(), "indicator state out of range");
        let mut vars = VarList::new();
        vars.add(var);
        let mut values = Array1::zeros(vars.n_states());
        values[state] = 1.0;
        Factor { vars, values }
    }

    pub fn variables(&self) -> &VarList {
        &self.vars
    }

    pub fn values(&self) -> &[f64] {
        self.values.as_slice().unwrap()
    }

    /// Overwrites the table; the length must match the scope.
    pub fn set_values(&mut self, values: &[f64]) -> &mut Self {
        assert_eq!(
            values.len(),
            self.values.len(),
            "value count does not match the scope"
        );
        self.values = Array1::from_vec(values.to_vec());
        self
    }

    pub fn plus(&mut self, g: &Factor) -> &mut Self {
        self.binary_op(g, |a, b| a + b)
    }

    pub fn minus(&mut self, g: &Factor) -> &mut Self {
        self.binary_op(g, |a, b| a - b)
    }

    /// Generalized factor product: on equal scopes an elementwise multiply,
    /// otherwise both operands are realigned over the union scope.
    pub fn times(&mut self, g: &Factor) -> &mut Self {
        self.binary_op(g, |a, b| a * b)
    }

    fn binary_op(&mut self, g: &Factor, op: fn(f64, f64) -> f64) -> &mut Self {
        if self.vars == g.vars {
            azip!((a in &mut self.values, &b in &g.values) *a = op(*a, b));
            return self;
        }
        let union = self.vars.union(&g.vars);
        let mut ixf = Index::new(&self.vars, &union);
        let mut ixg = Index::new(&g.vars, &union);
        let mut values = Vec::with_capacity(union.n_states());
        for _ in 0..union.n_states() {
            values.push(op(self.values[ixf.offset()], g.values[ixg.offset()]));
            ixf.next();
            ixg.next();
        }
        self.vars = union;
        self.values = Array1::from_vec(values);
        self
    }

    /// Scales the whole table to sum to one. A zero total leaves the table
    /// untouched and reports [`LatreeError::ZeroSum`].
    pub fn normalize(&mut self) -> Result<()> {
        let sum = self.values.sum();
        if sum == 0.0 {
            return Err(LatreeError::ZeroSum);
        }
        self.values.mapv_inplace(|v| v / sum);
        Ok(())
    }

    /// Conditional normalization: partitions the table by the assignment of
    /// the complement of `xs` and normalizes each partition independently,
    /// turning P(X,Y) into P(X|Y). Zero-sum groups are zero-filled and the
    /// sentinel is reported once all groups have been processed. An empty
    /// `xs` (or an empty complement) degrades to [`normalize`].
    ///
    /// [`normalize`]: Factor::normalize
    pub fn normalize_over(&mut self, xs: &VarList) -> Result<()> {
        if xs.is_empty() {
            return self.normalize();
        }
        let cond = self.vars.diff(xs);
        if cond.is_empty() {
            return self.normalize();
        }
        let mut ix = Index::new(&cond, &self.vars);
        let mut sums = vec![0.0; cond.n_states()];
        for &v in self.values.iter() {
            sums[ix.offset()] += v;
            ix.next();
        }
        ix.reset();
        let mut status = Ok(());
        for v in self.values.iter_mut() {
            let s = sums[ix.offset()];
            if s != 0.0 {
                *v /= s;
            } else {
                status = Err(LatreeError::ZeroSum);
                *v = 0.0;
            }
            ix.next();
        }
        status
    }

    /// Eliminates the given variables by summation, rebuilding the table at
    /// the reduced scope.
    pub fn sum_out(&mut self, xs: &VarList) -> &mut Self {
        if xs.is_empty() {
            return self;
        }
        let keep = self.vars.diff(xs);
        let mut ix = Index::new(&keep, &self.vars);
        let mut values = Array1::zeros(keep.n_states());
        for &v in self.values.iter() {
            values[ix.offset()] += v;
            ix.next();
        }
        self.vars = keep;
        self.values = values;
        self
    }

    /// Projects the table onto `xs`: sums out the complement of `xs`.
    pub fn marginalize(&mut self, xs: &VarList) -> &mut Self {
        let drop = self.vars.diff(xs);
        self.sum_out(&drop)
    }

    /// Zeroes every entry inconsistent with the given partial assignment.
    pub fn reduce(&mut self, e: &Evidence) -> &mut Self {
        let mut step = 1;
        let mut ind = 0;
        let mut observed = VarList::new();
        for v in &self.vars {
            if let Some(&a) = e.get(&v.id()) {
                ind += a * step;
                step *= v.card();
                observed.add(v.clone());
            }
        }
        if observed.is_empty() {
            return self;
        }
        if observed.len() == self.vars.len() {
            for (i, v) in self.values.iter_mut().enumerate() {
                if i != ind {
                    *v = 0.0;
                }
            }
            return self;
        }
        let mut ix = Index::new(&observed, &self.vars);
        for v in self.values.iter_mut() {
            if ix.offset() != ind {
                *v = 0.0;
            }
            ix.next();
        }
        self
    }

    /// Refills the table with strictly positive random values (zero is
    /// excluded so later logarithms stay finite) and renormalizes.
    pub fn random_distribute<R: Rng + ?Sized>(&mut self, rng: &mut R) -> &mut Self {
        self.random_distribute_over(rng, &VarList::new())
    }

    /// As [`random_distribute`], normalizing each block conditioned on the
    /// complement of `xs`.
    ///
    /// [`random_distribute`]: Factor::random_distribute
    pub fn random_distribute_over<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        xs: &VarList,
    ) -> &mut Self {
        for v in self.values.iter_mut() {
            let mut x: f64 = rng.gen();
            while x <= 0.0 {
                x = rng.gen();
            }
            *v = x;
        }
        // values are strictly positive, no group can sum to zero
        let _ = self.normalize_over(xs);
        self
    }

    /// Refills the table uniformly and renormalizes.
    pub fn uniform_distribute(&mut self) -> &mut Self {
        self.uniform_distribute_over(&VarList::new())
    }

    pub fn uniform_distribute_over(&mut self, xs: &VarList) -> &mut Self {
        let n = self.values.len() as f64;
        self.values.mapv_inplace(|_| 1.0 / n);
        let _ = self.normalize_over(xs);
        self
    }

    /// Direct lookup of a fully assigned scope.
    ///
    /// Panics when the assignment leaves any scope variable unset; that is a
    /// caller bug, not a data condition.
    pub fn get(&self, e: &Evidence) -> f64 {
        let mut step = 1;
        let mut ind = 0;
        for v in &self.vars {
            let a = e
                .get(&v.id())
                .copied()
                .unwrap_or_else(|| panic!("evidence does not assign {}", v));
            ind += a * step;
            step *= v.card();
        }
        self.values[ind]
    }

    /// Scope equality plus elementwise closeness within a 1e-14 tolerance.
    pub fn equal(&self, g: &Factor) -> bool {
        self.vars == g.vars
            && self
                .values
                .iter()
                .zip(g.values.iter())
                .all(|(&a, &b)| close(a, b, EQ_TOL))
    }
}

fn close(a: f64, b: f64, tol: f64) -> bool {
    let d = (a - b).abs();
    d <= tol || d <= tol * a.abs().max(b.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::VarList;

    #[test]
    fn new_is_uniform() {
        let f = Factor::new(VarList::with_cards(&[1, 3], &[4, 2]));
        assert_eq!(f.values().len(), 8);
        assert!((f.values().iter().sum::<f64>() - 1.0).abs() < EQ_TOL);
    }

    #[test]
    fn empty_scope_is_identity() {
        let f = Factor::new(VarList::new());
        assert_eq!(f.values(), &[1.0]);
        let mut g = Factor::new(VarList::with_cards(&[0], &[2]));
        g.set_values(&[0.3, 0.7]).times(&f);
        assert_eq!(g.values(), &[0.3, 0.7]);
    }

    #[test]
    fn indicator_is_one_hot() {
        let f = Factor::indicator(crate::vars::Var::new(2, 3), 1);
        assert_eq!(f.values(), &[0.0, 1.0, 0.0]);
    }
}
