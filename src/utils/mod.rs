pub mod stats_ext;

pub use stats_ext::{weighted_mean, weighted_variance, StatsExt};
