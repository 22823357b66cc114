//! Sliding-window smoothers.
//!
//! - [`median`]: zero-padded median filter (`scipy.signal.medfilt`
//!   semantics) and an edge-truncated rolling median for baselines.
//! - [`apply`]: row-wise application over `[ROI, frame]` arrays.

pub mod apply;
pub mod median;

pub use apply::{medfilt_rows, map_rows};
pub use median::{medfilt, rolling_mean, rolling_median};
