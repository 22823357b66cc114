//! Trace normalisation.
//!
//! `compute_dff` — dF/F against a sliding baseline:
//!   b = rolling_mean(rolling_median(x, 2·basewin + 1), basewin)
//!   dff = (x − b) / b
//!
//! `subtract_baseline` — per sequence: x[.., t] −= stat(x[.., 0..n_base])
//!
//! `integrate` — per sequence: Σ x[.., t] / fps
use ndarray::{Array2, ArrayD, ArrayViewD, Axis};

use crate::error::{Error, Result};
use crate::filter::{map_rows, rolling_mean, rolling_median};
use crate::stats::{center, NanPolicy, Statistic};

/// dF/F of each ROI (row) of `raw` ([ROI, frame]).
pub fn compute_dff(raw: &Array2<f64>, basewin: usize) -> Array2<f64> {
    map_rows(raw, |row| {
        let base = rolling_mean(&rolling_median(row, basewin), basewin);
        row.iter().zip(&base).map(|(&x, &b)| (x - b) / b).collect()
    })
}

/// Subtract, from every sequence along the last axis, the `stat` of its
/// first `n_base` frames.
pub fn subtract_baseline(data: &mut ArrayD<f64>, n_base: usize, stat: Statistic) -> Result<()> {
    let last = data.ndim().checked_sub(1).ok_or_else(|| Error::config("cannot baseline a 0-d array"))?;
    let n_frames = data.len_of(Axis(last));
    if n_base == 0 {
        return Err(Error::config("baseline must span at least one frame"));
    }
    if n_base > n_frames {
        return Err(Error::config(format!(
            "baseline of {n_base} frame(s) is longer than the {n_frames}-frame window"
        )));
    }
    for mut lane in data.lanes_mut(Axis(last)) {
        let base: Vec<f64> = lane.iter().take(n_base).copied().collect();
        let b = center(&base, stat, NanPolicy::Propagate);
        lane.mapv_inplace(|v| v - b);
    }
    Ok(())
}

/// Frames in a baseline of `seconds` at `fps`.
pub fn baseline_frames(seconds: f64, fps: f64) -> usize {
    (seconds * fps).round().max(0.0) as usize
}

/// Collapse the last (frame) axis: `Σ x / fps`.
///
/// With [`NanPolicy::Omit`] NaN frames are skipped; a sequence with no
/// finite frame integrates to NaN.
pub fn integrate(data: ArrayViewD<f64>, fps: f64, nan: NanPolicy) -> Result<ArrayD<f64>> {
    if !(fps > 0.0) {
        return Err(Error::config(format!("frame rate must be positive, got {fps}")));
    }
    let last = data.ndim().checked_sub(1).ok_or_else(|| Error::config("cannot integrate a 0-d array"))?;
    Ok(data.map_axis(Axis(last), |lane| {
        match nan {
            NanPolicy::Propagate => lane.sum() / fps,
            NanPolicy::Omit => {
                let mut n = 0usize;
                let s: f64 = lane.iter().filter(|v| !v.is_nan()).inspect(|_| n += 1).sum();
                if n == 0 { f64::NAN } else { s / fps }
            }
        }
    }))
}
