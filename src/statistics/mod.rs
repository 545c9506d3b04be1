//! Time-averaging computations
//!
//! # Organization
//!
//! - [`parallel`]: Parallel mean reduction along one array axis
//! - [`epoch`]: Dataset-level mean over the `time` dimension

pub mod epoch;
pub mod parallel;

pub use epoch::{epoch_mean, mean_over_dim, TIME_DIM};
pub use parallel::{parallel_mean_axis, AxisMean};
