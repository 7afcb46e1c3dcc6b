//! Expectation-Maximization parameter estimation over a fixed clique-tree
//! shape.
//!
//! The search runs a multi-restart tournament: every restart candidate owns a
//! private tree clone with randomized potentials, all candidates take a few
//! warm-up steps, then rounds of doubling length eliminate the weaker half by
//! score until a single candidate survives and is refined to convergence.
//! Within one EM step the expectation pass may fan evidence shards out to a
//! worker pool; each worker calibrates a private tree clone and the
//! coordinator reduces the per-shard statistics by addition, which is
//! order-independent.

use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
use itertools::izip;
use log::debug;
use rand::Rng;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::calibration::TreeCalibration;
use crate::clique_tree::CliqueTree;
use crate::factor::Factor;
use crate::vars::Evidence;
use crate::{LatreeError, Result};

const DEFAULT_MAX_ITERS: usize = 5;
const DEFAULT_THRESHOLD: f64 = 1e-1;
const DEFAULT_RESTARTS: usize = 1;
const DEFAULT_INIT_ITERS: usize = 1;

/// Expectation-Maximization learner.
///
/// ```no_run
/// # use latree::{CliqueTree, EmLearner, Evidence};
/// # use rand::SeedableRng;
/// # let mut tree = CliqueTree::new();
/// # let data: Vec<Evidence> = Vec::new();
/// let mut rng = rand_xoshiro::Xoshiro256StarStar::seed_from_u64(7);
/// let (ll, iters) = EmLearner::new()
///     .max_iters(40)
///     .threshold(1e-4)
///     .restarts(8)
///     .run(&mut tree, &data, &mut rng)
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct EmLearner {
    max_iters: usize,
    threshold: f64,
    restarts: usize,
    init_iters: usize,
    threads: usize,
    reuse_params: bool,
    show_progress: bool,
    n_iters: usize,
}

impl Default for EmLearner {
    fn default() -> Self {
        EmLearner {
            max_iters: DEFAULT_MAX_ITERS,
            threshold: DEFAULT_THRESHOLD,
            restarts: DEFAULT_RESTARTS,
            init_iters: DEFAULT_INIT_ITERS,
            threads: 0,
            reuse_params: false,
            show_progress: false,
            n_iters: 0,
        }
    }
}

impl EmLearner {
    pub fn new() -> Self {
        EmLearner::default()
    }

    /// Iteration budget across warm-up, tournament and refinement.
    pub fn max_iters(mut self, n: usize) -> Self {
        self.max_iters = n;
        self
    }

    /// Minimum log-likelihood improvement counted as progress.
    pub fn threshold(mut self, t: f64) -> Self {
        self.threshold = t;
        self
    }

    /// Number of random starting points entered into the tournament.
    pub fn restarts(mut self, n: usize) -> Self {
        self.restarts = n;
        self
    }

    /// Warm-up steps every candidate takes before elimination begins.
    pub fn init_iters(mut self, n: usize) -> Self {
        self.init_iters = n;
        self
    }

    /// Worker count for the expectation pass; 0 or 1 runs sequentially.
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }

    /// Keep the parameters already on the given tree as one starting point
    /// instead of randomizing it.
    pub fn reuse_params(mut self, reuse: bool) -> Self {
        self.reuse_params = reuse;
        self
    }

    /// Show a progress bar over the iteration budget.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Fits the tree's potentials to `data`, mutating `tree` in place, and
    /// returns the final log-likelihood together with the number of EM
    /// iterations actually run.
    ///
    /// Potentials are randomized from `rng` unless reuse is requested, so a
    /// seeded generator makes the whole search reproducible.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        tree: &mut CliqueTree,
        data: &[Evidence],
        rng: &mut R,
    ) -> Result<(f64, usize)> {
        self.validate()?;
        debug!(
            "em run: max_iters={} threshold={} restarts={} init_iters={} threads={} reuse_params={}",
            self.max_iters,
            self.threshold,
            self.restarts,
            self.init_iters,
            self.threads,
            self.reuse_params,
        );
        self.n_iters = 0;
        let pool = self.build_pool()?;
        let pb = self.show_progress.then(|| {
            ProgressBar::new(self.max_iters as u64)
                .with_style(
                    ProgressStyle::default_bar()
                        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] ({pos}/{len})")
                        .unwrap(),
                )
                .with_finish(ProgressFinish::AndClear)
                .with_message("EM")
        });

        let mut best = self.start(tree, data, rng, pool.as_ref(), pb.as_ref())?;
        let mut ll_prev = 0.0;
        let ll = loop {
            let ll_new = self.step(&mut best, data, pool.as_ref())?;
            self.n_iters += 1;
            if let Some(pb) = &pb {
                pb.set_position(self.n_iters as u64);
            }
            if self.n_iters >= self.max_iters || (ll_new - ll_prev).abs() < self.threshold {
                break ll_new;
            }
            ll_prev = ll_new;
        };
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        debug!("em done: ll={} iters={}", ll, self.n_iters);

        best.tree_mut().set_score(ll);
        *tree = best.into_tree();
        Ok((ll, self.n_iters))
    }

    /// One EM step: expectation over every record followed by maximization.
    /// Returns the log-likelihood of the parameters the step started from.
    pub fn run_step(&self, calib: &mut TreeCalibration, data: &[Evidence]) -> Result<f64> {
        let pool = self.build_pool()?;
        self.step(calib, data, pool.as_ref())
    }

    fn validate(&self) -> Result<()> {
        fn positive(name: &'static str, v: usize) -> Result<()> {
            if v == 0 {
                return Err(LatreeError::InvalidProperty {
                    name,
                    value: v.to_string(),
                });
            }
            Ok(())
        }
        positive("max_iters", self.max_iters)?;
        positive("restarts", self.restarts)?;
        positive("init_iters", self.init_iters)?;
        if self.threshold <= 0.0 {
            return Err(LatreeError::InvalidProperty {
                name: "threshold",
                value: self.threshold.to_string(),
            });
        }
        Ok(())
    }

    fn build_pool(&self) -> Result<Option<ThreadPool>> {
        if self.threads <= 1 {
            return Ok(None);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()?;
        Ok(Some(pool))
    }

    /// Builds the restart candidates, warms each one up, then eliminates the
    /// weaker half in rounds of doubling length until one survives, the
    /// iteration budget runs out, or a round passes without improvement
    /// (early exit with the current front-runner).
    fn start<R: Rng + ?Sized>(
        &mut self,
        tree: &CliqueTree,
        data: &[Evidence],
        rng: &mut R,
        pool: Option<&ThreadPool>,
        pb: Option<&ProgressBar>,
    ) -> Result<TreeCalibration> {
        let mut candidates = Vec::with_capacity(self.restarts);
        for i in 0..self.restarts {
            let mut c = TreeCalibration::new(tree.clone());
            if i > 0 || !self.reuse_params {
                for id in c.tree().node_ids() {
                    c.tree_mut().potential_mut(id).random_distribute(rng);
                }
            }
            candidates.push(c);
        }

        for _ in 0..self.init_iters {
            for c in candidates.iter_mut() {
                let ll = self.step(c, data, pool)?;
                c.tree_mut().set_score(ll);
            }
            self.n_iters += 1;
            if let Some(pb) = pb {
                pb.set_position(self.n_iters as u64);
            }
        }

        let mut round_len = 1;
        while candidates.len() > 1 && self.n_iters < self.max_iters {
            for _ in 0..round_len {
                let mut improved = false;
                for c in candidates.iter_mut() {
                    let ll = self.step(c, data, pool)?;
                    if ll - c.tree().score() > self.threshold {
                        improved = true;
                    }
                    c.tree_mut().set_score(ll);
                }
                self.n_iters += 1;
                if let Some(pb) = pb {
                    pb.set_position(self.n_iters as u64);
                }
                if !improved {
                    debug!("em start: no candidate improved, early exit");
                    return Ok(candidates.swap_remove(0));
                }
            }
            candidates.sort_by(|a, b| b.tree().score().total_cmp(&a.tree().score()));
            debug!(
                "em round: iters={} candidates={} best={}",
                self.n_iters,
                candidates.len(),
                candidates[0].tree().score(),
            );
            round_len = (round_len * 2).min(self.max_iters - self.n_iters);
            candidates.truncate(candidates.len() / 2);
        }
        Ok(candidates.swap_remove(0))
    }

    fn step(
        &self,
        calib: &mut TreeCalibration,
        data: &[Evidence],
        pool: Option<&ThreadPool>,
    ) -> Result<f64> {
        let (stats, ll) = match pool {
            Some(pool) => self.expect_parallel(calib, data, pool)?,
            None => Self::expect(calib, data, 0)?,
        };
        Self::maximize(calib, stats);
        Ok(ll)
    }

    /// Expectation pass: calibrates every record, accumulating each node's
    /// calibrated-and-locally-normalized potential as its sufficient
    /// statistic and summing the evidence log-likelihoods. `base` offsets
    /// record indices in errors when running over a shard.
    fn expect(
        calib: &mut TreeCalibration,
        data: &[Evidence],
        base: usize,
    ) -> Result<(Vec<Option<Factor>>, f64)> {
        let n = calib.tree().len();
        let mut stats: Vec<Option<Factor>> = vec![None; n];
        let mut ll = 0.0;
        for (i, ev) in data.iter().enumerate() {
            let p = calib.run(ev);
            if p == 0.0 {
                return Err(LatreeError::ZeroLikelihood { record: base + i });
            }
            ll += p.ln();
            for (id, stat) in stats.iter_mut().enumerate() {
                let mut q = calib.calibrated(id).clone();
                // all-zero calibrated tables are tolerated here; the group
                // stays zero and the sentinel is dropped
                let _ = q.normalize();
                match stat {
                    Some(s) => {
                        s.plus(&q);
                    }
                    None => *stat = Some(q),
                }
            }
        }
        Ok((stats, ll))
    }

    /// Parallel expectation: contiguous evidence shards, one private session
    /// per worker, additive reduction of the per-shard results by the
    /// coordinator.
    fn expect_parallel(
        &self,
        calib: &mut TreeCalibration,
        data: &[Evidence],
        pool: &ThreadPool,
    ) -> Result<(Vec<Option<Factor>>, f64)> {
        if data.is_empty() {
            return Ok((vec![None; calib.tree().len()], 0.0));
        }
        let shard = data.len().div_ceil(self.threads);
        let tree = calib.tree();
        let shards: Result<Vec<_>> = pool.install(|| {
            data.par_chunks(shard)
                .enumerate()
                .map(|(i, chunk)| {
                    let mut worker = TreeCalibration::new(tree.clone());
                    Self::expect(&mut worker, chunk, i * shard)
                })
                .collect()
        });
        let mut shards = shards?.into_iter();
        let (mut stats, mut ll) = shards.next().unwrap();
        for (shard_stats, shard_ll) in shards {
            ll += shard_ll;
            for (stat, other) in izip!(stats.iter_mut(), shard_stats) {
                match stat {
                    Some(s) => {
                        if let Some(o) = other {
                            s.plus(&o);
                        }
                    }
                    None => *stat = other,
                }
            }
        }
        Ok((stats, ll))
    }

    /// Maximization pass: every node's potential becomes its accumulated
    /// statistic normalized over the variables not shared with its parent,
    /// i.e. a conditional distribution given the separator; the root
    /// normalizes unconditionally.
    fn maximize(calib: &mut TreeCalibration, stats: Vec<Option<Factor>>) {
        for (id, stat) in stats.into_iter().enumerate() {
            let Some(mut p) = stat else { continue };
            match calib.tree().parent(id) {
                Some(pa) => {
                    let own = calib.tree().scope(id).diff(calib.tree().scope(pa));
                    let _ = p.normalize_over(&own);
                }
                None => {
                    let _ = p.normalize();
                }
            }
            calib.tree_mut().set_potential(id, p);
        }
    }
}
