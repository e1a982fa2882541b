#![deny(dead_code)]
#![deny(unused_imports)]

//! Hypergradients of sparse linear models fit by proximal coordinate descent.
//!
//! The main engine, [`backward::Backward`], records the iterate after every
//! forward epoch and replays those epochs in reverse to obtain
//! `vᵀ ∂β/∂log_alpha` for a direction `v` chosen by an outer criterion.
//! [`forward::Forward`] and [`implicit::Implicit`] compute the same quantity by
//! carrying the Jacobian through the solve or by solving the optimality system
//! on the support.

pub mod backward;
pub mod config;
pub mod criterion;
pub mod faer_ndarray;
pub mod forward;
pub mod implicit;
pub mod matrix;
pub mod models;
pub mod solver;

pub use backward::{Backward, BetaJacV, HypergradEngine, HypergradError, get_only_jac_backward};
pub use config::{HypergradConfig, SolverOptions};
pub use criterion::{CrossVal, Criterion, HeldOutMse, Val, ValGrad};
pub use forward::Forward;
pub use implicit::Implicit;
pub use matrix::{DesignMatrix, alpha_max};
pub use models::{ElasticNet, Lasso, Model, WeightedLasso};
pub use solver::{ForwardSolution, Trace, WarmStart, solve};
