//! Median and mean sliding windows over 1-D signals.
//!
//! [`medfilt`] pads with zeros at both ends, like `scipy.signal.medfilt`, so
//! the first and last `k / 2` outputs are pulled towards zero. The rolling
//! variants instead shrink the window at the edges and ignore NaN samples.
use crate::error::{Error, Result};

/// Zero-padded median filter with odd kernel size `k`.
///
/// `k == 1` returns the input unchanged.
pub fn medfilt(x: &[f64], k: usize) -> Result<Vec<f64>> {
    if k == 0 || k % 2 == 0 {
        return Err(Error::config(format!("median filter kernel must be odd, got {k}")));
    }
    let half = k / 2;
    let n = x.len();
    let mut buf = Vec::with_capacity(k);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        buf.clear();
        for j in 0..k {
            let idx = i as isize + j as isize - half as isize;
            if idx < 0 || idx as usize >= n {
                buf.push(0.0);
            } else {
                buf.push(x[idx as usize]);
            }
        }
        out.push(select_median(&mut buf));
    }
    Ok(out)
}

/// Median over `[i - half, i + half]`, truncated at the edges, NaN ignored.
///
/// Windows holding only NaN produce NaN.
pub fn rolling_median(x: &[f64], half: usize) -> Vec<f64> {
    let n = x.len();
    let mut buf = Vec::with_capacity(2 * half + 1);
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            buf.clear();
            buf.extend(x[lo..hi].iter().copied().filter(|v| !v.is_nan()));
            if buf.is_empty() { f64::NAN } else { select_median(&mut buf) }
        })
        .collect()
}

/// Centred mean over a window of `win` samples, truncated at the edges,
/// NaN ignored.
pub fn rolling_mean(x: &[f64], win: usize) -> Vec<f64> {
    let n = x.len();
    let win = win.max(1);
    let before = (win - 1) / 2;
    let after = win - 1 - before;

    // Prefix sums over non-NaN values and their counts.
    let mut sums = vec![0.0; n + 1];
    let mut counts = vec![0usize; n + 1];
    for (i, &v) in x.iter().enumerate() {
        let ok = !v.is_nan();
        sums[i + 1] = sums[i] + if ok { v } else { 0.0 };
        counts[i + 1] = counts[i] + ok as usize;
    }
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(n);
            let c = counts[hi] - counts[lo];
            if c == 0 { f64::NAN } else { (sums[hi] - sums[lo]) / c as f64 }
        })
        .collect()
}

/// Median of `buf` (reordered in place). Even lengths average the two middle
/// values.
fn select_median(buf: &mut [f64]) -> f64 {
    let n = buf.len();
    let mid = n / 2;
    let (lower, m, _) = buf.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *m;
    if n % 2 == 1 {
        upper
    } else {
        let below = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (below + upper) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn medfilt_removes_spike_and_zero_pads() {
        let x = [1.0, 1.0, 9.0, 1.0, 1.0];
        let y = medfilt(&x, 3).unwrap();
        assert_eq!(y, vec![1.0, 1.0, 1.0, 1.0, 1.0]);

        // zero padding only wins once it outnumbers the samples
        let y = medfilt(&[4.0; 5], 5).unwrap();
        assert_eq!(y, vec![4.0, 4.0, 4.0, 4.0, 4.0]);
        let y = medfilt(&[4.0, 4.0], 5).unwrap();
        assert_eq!(y, vec![0.0, 0.0]);
    }

    #[test]
    fn medfilt_rejects_even_kernel() {
        assert!(medfilt(&[1.0, 2.0], 4).is_err());
    }

    #[test]
    fn rolling_median_truncates_edges() {
        let x = [5.0, 1.0, 3.0, f64::NAN, 2.0];
        let y = rolling_median(&x, 1);
        assert_abs_diff_eq!(y[0], 3.0, epsilon = 1e-12); // median(5, 1)
        assert_abs_diff_eq!(y[1], 3.0, epsilon = 1e-12); // median(5, 1, 3)
        assert_abs_diff_eq!(y[3], 2.5, epsilon = 1e-12); // median(3, 2)
    }

    #[test]
    fn rolling_mean_constant() {
        let y = rolling_mean(&[2.0; 7], 4);
        for v in y {
            assert_abs_diff_eq!(v, 2.0, epsilon = 1e-12);
        }
    }
}
