//! Statistics engine.
//!
//! Free functions over plain `ndarray` data, independent of sessions:
//!
//! - [`descriptive`]: mean/median with std/sem (or quartiles) along an axis.
//! - [`magnitude`]: binary comparisons, magnitude and L2 change, unit scaling.
//! - [`permutation`]: permutation tests with tail thresholds and labels.
//! - [`groups`]: ROI groups from first/last quintile significance labels.

pub mod descriptive;
pub mod groups;
pub mod magnitude;
pub mod permutation;

pub use descriptive::{
    center, center_along, get_stats, n_stats, percentile, quartile_spread, summarize, ErrorStat, NanPolicy,
    Spread, Statistic, Stats,
};
pub use groups::{group_stats, RoiGroups};
pub use magnitude::{calc_op, l2_change, mag_change, magnitude_set, scale_unit, MagnitudeSet, Op};
pub use permutation::{permutation_test, permute_diff, permute_group_stats, tail_thresholds, PermResult, TailLabel, Tails, Thresholds};
