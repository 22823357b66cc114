//! Running-speed outlier repair.
//!
//! Outliers are detected from jumps between consecutive samples. A jump larger
//! than `diff_thr` opens a run that continues while samples stay further than
//! `diff_thr` from the last good value. Two outputs are produced: one with the
//! run set to NaN and one with the run linearly interpolated between the last
//! good value before it and the first good value after it.
//!
//! The repair is a pure function; applying it to its own output changes
//! nothing.
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::Result;
use crate::filter::medfilt;

/// Runs longer than this many samples are reported.
const LONG_RUN: usize = 5;

/// Running speed (cm/s) per stimulus-clock frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningSpeed {
    /// Outliers replaced with NaN.
    pub excluded: Vec<f64>,
    /// Outliers and NaNs replaced by linear interpolation.
    pub interpolated: Vec<f64>,
}

impl RunningSpeed {
    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    /// The interpolated array when `remove_nans`, the NaN-marked one otherwise.
    pub fn values(&self, remove_nans: bool) -> &[f64] {
        if remove_nans { &self.interpolated } else { &self.excluded }
    }
}

/// Repair `run`. Samples that are already NaN are set aside, the remaining
/// samples are repaired as a contiguous series, and the NaNs are put back.
///
/// `filter_ks > 1` median-filters the series first.
pub fn repair_running(
    run: &[f64],
    diff_thr: f64,
    filter_ks: usize,
) -> Result<(RunningSpeed, Diagnostics)> {
    let mut diags = Diagnostics::new();

    let keep: Vec<usize> = (0..run.len()).filter(|&i| !run[i].is_nan()).collect();
    let mut vals: Vec<f64> = keep.iter().map(|&i| run[i]).collect();
    if filter_ks > 1 {
        vals = medfilt(&vals, filter_ks)?;
    }

    let (excl, interp, n_out, long_runs) = repair_series(&vals, diff_thr);
    if n_out > 0 {
        diags.warn(
            DiagnosticKind::RunningOutliers,
            format!("{n_out} running values were replaced with NaNs"),
        );
    }
    for (start, len) in long_runs {
        diags.warn(
            DiagnosticKind::RunningOutliers,
            format!("{len} consecutive running values had to be dropped (from sample {})", keep[start]),
        );
    }

    let mut excluded = vec![f64::NAN; run.len()];
    let mut interpolated = vec![f64::NAN; run.len()];
    for (k, &i) in keep.iter().enumerate() {
        excluded[i] = excl[k];
        interpolated[i] = interp[k];
    }
    fill_nans_linear(&mut interpolated);

    Ok((RunningSpeed { excluded, interpolated }, diags))
}

/// Returns `(excluded, interpolated, n_outliers, long_runs)` where each long
/// run is `(start, len)` in series coordinates.
fn repair_series(vals: &[f64], thr: f64) -> (Vec<f64>, Vec<f64>, usize, Vec<(usize, usize)>) {
    let n = vals.len();
    let mut excl = vals.to_vec();
    let mut interp = vals.to_vec();
    let mut n_out = 0;
    let mut long_runs = Vec::new();
    let mut done_to: Option<usize> = None;

    for idx0 in 0..n.saturating_sub(1) {
        if (vals[idx0 + 1] - vals[idx0]).abs() <= thr {
            continue;
        }
        if done_to.is_some_and(|d| idx0 <= d) {
            continue;
        }
        // A first sample far from 0 is itself the anomaly.
        let (comp, start) = if idx0 == 0 && vals[0].abs() > thr {
            excl[0] = f64::NAN;
            (0.0, 0)
        } else {
            (vals[idx0], idx0 + 1)
        };
        let mut idx = idx0;
        while idx + 1 < n && (vals[idx + 1] - comp).abs() > thr {
            excl[idx + 1] = f64::NAN;
            idx += 1;
        }
        let len = idx + 1 - start;
        match vals.get(idx + 1) {
            Some(&after) => {
                for k in 0..len {
                    let frac = (k + 1) as f64 / (len + 1) as f64;
                    interp[start + k] = comp + (after - comp) * frac;
                }
            }
            None => interp[start..].fill(comp),
        }
        n_out += len;
        if len > LONG_RUN {
            long_runs.push((start, len));
        }
        done_to = Some(idx);
    }
    (excl, interp, n_out, long_runs)
}

/// Linear interpolation over NaN gaps; leading and trailing gaps take the
/// nearest finite value.
pub(crate) fn fill_nans_linear(x: &mut [f64]) {
    let good: Vec<usize> = (0..x.len()).filter(|&i| !x[i].is_nan()).collect();
    let (Some(&first), Some(&last)) = (good.first(), good.last()) else {
        return;
    };
    let (head, tail) = (x[first], x[last]);
    x[..first].fill(head);
    x[last + 1..].fill(tail);
    for w in good.windows(2) {
        let (a, b) = (w[0], w[1]);
        if b - a > 1 {
            let (va, vb) = (x[a], x[b]);
            for i in a + 1..b {
                x[i] = va + (vb - va) * (i - a) as f64 / (b - a) as f64;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn single_spike_excluded_and_interpolated() {
        let (r, d) = repair_running(&[0.0, 1.0, 2.0, 200.0, 3.0, 4.0], 50.0, 0).unwrap();
        assert!(r.excluded[3].is_nan());
        assert_eq!(r.excluded.iter().filter(|v| v.is_nan()).count(), 1);
        assert_abs_diff_eq!(r.interpolated[3], 2.5, epsilon = 1e-12);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn multi_sample_run_is_linear() {
        let run = [10.0, 10.0, 300.0, 310.0, 305.0, 16.0];
        let (r, _) = repair_running(&run, 50.0, 0).unwrap();
        assert!(r.excluded[2..5].iter().all(|v| v.is_nan()));
        assert_abs_diff_eq!(r.interpolated[2], 11.5, epsilon = 1e-12);
        assert_abs_diff_eq!(r.interpolated[3], 13.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.interpolated[4], 14.5, epsilon = 1e-12);
    }

    #[test]
    fn first_sample_relative_to_zero() {
        let (r, _) = repair_running(&[120.0, 2.0, 3.0], 50.0, 0).unwrap();
        assert!(r.excluded[0].is_nan());
        assert_abs_diff_eq!(r.excluded[1], 2.0);
        assert_abs_diff_eq!(r.interpolated[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn run_to_end_holds_last_good_value() {
        let (r, _) = repair_running(&[1.0, 2.0, 90.0, 95.0], 50.0, 0).unwrap();
        assert!(r.excluded[2].is_nan() && r.excluded[3].is_nan());
        assert_eq!(&r.interpolated[2..], &[2.0, 2.0]);
    }

    #[test]
    fn long_runs_are_reported() {
        let mut run = vec![0.0; 3];
        run.extend(std::iter::repeat(500.0).take(7));
        run.extend([1.0, 1.0]);
        let (_, d) = repair_running(&run, 50.0, 0).unwrap();
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn existing_nans_are_kept_aside() {
        let run = [0.0, f64::NAN, 1.0, 2.0, 200.0, 3.0];
        let (r, _) = repair_running(&run, 50.0, 0).unwrap();
        assert!(r.excluded[1].is_nan());
        assert!(r.excluded[4].is_nan());
        assert_abs_diff_eq!(r.interpolated[1], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(r.interpolated[4], 2.5, epsilon = 1e-12);
    }

    #[test]
    fn repair_is_idempotent() {
        let run = [0.0, 1.0, 2.0, 200.0, 3.0, 4.0, 4.0, -90.0, 5.0];
        let (once, _) = repair_running(&run, 50.0, 0).unwrap();
        let (twice, d) = repair_running(&once.excluded, 50.0, 0).unwrap();
        assert!(d.is_empty());
        for (a, b) in once.excluded.iter().zip(&twice.excluded) {
            assert!(a.is_nan() && b.is_nan() || a == b);
        }
        let (again, _) = repair_running(&once.interpolated, 50.0, 0).unwrap();
        assert_eq!(again.excluded, once.interpolated);
    }
}
