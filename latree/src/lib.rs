//! Exact inference and parameter learning on latent tree-structured discrete
//! models.
//!
//! The crate is organized bottom-up: [`vars`] provides variable scopes and the
//! mixed-radix cursors that align tables defined over different scopes,
//! [`factor`] the dense potential-table algebra built on those cursors,
//! [`clique_tree`] the rooted tree of factor-bearing cliques,
//! [`calibration`] the two-pass sum-product calibration that performs exact
//! inference on such a tree, and [`em`] the multi-restart
//! Expectation-Maximization loop that drives calibration to fit parameters
//! from (possibly partial) evidence records.

pub mod calibration;
pub mod clique_tree;
pub mod em;
pub mod factor;
pub mod vars;

pub use calibration::TreeCalibration;
pub use clique_tree::{CliqueTree, CtNode, NodeId};
pub use em::EmLearner;
pub use factor::Factor;
pub use vars::{Evidence, Index, Var, VarId, VarList, VarRef};

use thiserror::Error;

type Result<T> = std::result::Result<T, LatreeError>;

#[derive(Error, Debug)]
pub enum LatreeError {
    /// Recoverable: the offending group is left zero-filled and the factor
    /// stays usable.
    #[error("A normalization group sums to zero.")]
    ZeroSum,
    /// Fatal to an EM run; callers are expected to pre-filter impossible
    /// records.
    #[error("Evidence record {record} has probability zero under the current parameters.")]
    ZeroLikelihood { record: usize },
    #[error("EM property {name} must be strictly positive (got {value}).")]
    InvalidProperty { name: &'static str, value: String },
    #[error("Could not build the expectation worker pool.")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
