//! Centre and spread along one axis.
//!
//! `std` is the population standard deviation (ddof 0), `sem` uses the sample
//! standard deviation (ddof 1). A median paired with `std` reports the 25th
//! and 75th percentiles instead of a single spread value.
use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Central statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    #[default]
    Mean,
    Median,
}

/// Spread statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStat {
    Std,
    #[default]
    Sem,
}

/// NaN handling for reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NanPolicy {
    /// Any NaN makes the result NaN.
    #[default]
    Propagate,
    /// NaNs are dropped before reducing.
    Omit,
}

impl FromStr for Statistic {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Statistic::Mean),
            "median" => Ok(Statistic::Median),
            _ => Err(Error::config(format!("unknown statistic {s:?} (expected mean or median)"))),
        }
    }
}

impl FromStr for ErrorStat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "std" => Ok(ErrorStat::Std),
            "sem" => Ok(ErrorStat::Sem),
            _ => Err(Error::config(format!("unknown error statistic {s:?} (expected std or sem)"))),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Statistic::Mean => "mean",
            Statistic::Median => "median",
        })
    }
}

/// Spread reported alongside a centre.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Spread<T> {
    Single(T),
    Quartiles { q1: T, q3: T },
}

/// Centre and spread, either per lane (`T = ArrayD<f64>`) or for one set of
/// values (`T = f64`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats<T = ArrayD<f64>> {
    pub center: T,
    pub spread: Spread<T>,
}

impl Stats<f64> {
    pub fn nan(stat: Statistic, err: ErrorStat) -> Self {
        let spread = if quartile_spread(stat, err) {
            Spread::Quartiles { q1: f64::NAN, q3: f64::NAN }
        } else {
            Spread::Single(f64::NAN)
        };
        Self { center: f64::NAN, spread }
    }

    /// `[centre, spread]` or `[centre, q1, q3]`.
    pub fn to_vec(&self) -> Vec<f64> {
        match self.spread {
            Spread::Single(s) => vec![self.center, s],
            Spread::Quartiles { q1, q3 } => vec![self.center, q1, q3],
        }
    }
}

impl Stats<ArrayD<f64>> {
    /// All-NaN stats of the given lane shape.
    pub fn nan_shaped(shape: &[usize], stat: Statistic, err: ErrorStat) -> Self {
        let nan = || ArrayD::from_elem(IxDyn(shape), f64::NAN);
        let spread = if quartile_spread(stat, err) {
            Spread::Quartiles { q1: nan(), q3: nan() }
        } else {
            Spread::Single(nan())
        };
        Self { center: nan(), spread }
    }
}

/// Whether `stat`/`err` report quartiles rather than one spread value.
pub fn quartile_spread(stat: Statistic, err: ErrorStat) -> bool {
    stat == Statistic::Median && err == ErrorStat::Std
}

/// Number of values [`Stats::to_vec`] yields.
pub fn n_stats(stat: Statistic, err: ErrorStat) -> usize {
    2 + quartile_spread(stat, err) as usize
}

// ── Scalar reductions ─────────────────────────────────────────────────────────

fn retained(values: &[f64], nan: NanPolicy) -> Option<Vec<f64>> {
    match nan {
        NanPolicy::Propagate if values.iter().any(|v| v.is_nan()) => None,
        _ => Some(values.iter().copied().filter(|v| !v.is_nan()).collect()),
    }
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() { f64::NAN } else { v.iter().sum::<f64>() / v.len() as f64 }
}

fn std(v: &[f64], ddof: usize) -> f64 {
    if v.len() <= ddof {
        return f64::NAN;
    }
    let m = mean(v);
    (v.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (v.len() - ddof) as f64).sqrt()
}

/// Linear-interpolated percentile (`q` in `[0, 100]`) of NaN-free values.
fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Linear-interpolated percentile, `q` in `[0, 100]`. NaN if any value is NaN
/// or `values` is empty.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, q)
}

/// Mean or median of `values`.
pub fn center(values: &[f64], stat: Statistic, nan: NanPolicy) -> f64 {
    let Some(mut v) = retained(values, nan) else { return f64::NAN };
    match stat {
        Statistic::Mean => mean(&v),
        Statistic::Median => {
            v.sort_by(f64::total_cmp);
            percentile_sorted(&v, 50.0)
        }
    }
}

/// Centre and spread of `values`.
pub fn summarize(values: &[f64], stat: Statistic, err: ErrorStat, nan: NanPolicy) -> Stats<f64> {
    let Some(mut v) = retained(values, nan) else { return Stats::<f64>::nan(stat, err) };
    v.sort_by(f64::total_cmp);
    let center = match stat {
        Statistic::Mean => mean(&v),
        Statistic::Median => percentile_sorted(&v, 50.0),
    };
    let spread = match (stat, err) {
        (Statistic::Median, ErrorStat::Std) => {
            Spread::Quartiles { q1: percentile_sorted(&v, 25.0), q3: percentile_sorted(&v, 75.0) }
        }
        (_, ErrorStat::Std) => Spread::Single(std(&v, 0)),
        (_, ErrorStat::Sem) => Spread::Single(std(&v, 1) / (v.len() as f64).sqrt()),
    };
    Stats { center, spread }
}

// ── Axis reductions ───────────────────────────────────────────────────────────

fn check_axis(data: &ArrayViewD<f64>, axis: Axis) -> Result<()> {
    if axis.index() >= data.ndim() {
        return Err(Error::config(format!("axis {} out of range for {}-d data", axis.index(), data.ndim())));
    }
    Ok(())
}

/// Mean or median along `axis`.
pub fn center_along(data: ArrayViewD<f64>, axis: Axis, stat: Statistic, nan: NanPolicy) -> Result<ArrayD<f64>> {
    check_axis(&data, axis)?;
    Ok(data.map_axis(axis, |lane| center(&lane.to_vec(), stat, nan)))
}

/// Centre and spread along `axis`.
pub fn get_stats(
    data: ArrayViewD<f64>,
    axis: Axis,
    stat: Statistic,
    err: ErrorStat,
    nan: NanPolicy,
) -> Result<Stats<ArrayD<f64>>> {
    check_axis(&data, axis)?;
    let per_lane = data.map_axis(axis, |lane| summarize(&lane.to_vec(), stat, err, nan));
    let center = per_lane.mapv(|s| s.center);
    let spread = if quartile_spread(stat, err) {
        let q = |upper: bool| {
            per_lane.mapv(|s| match s.spread {
                Spread::Quartiles { q1, q3 } => if upper { q3 } else { q1 },
                Spread::Single(v) => v,
            })
        };
        Spread::Quartiles { q1: q(false), q3: q(true) }
    } else {
        Spread::Single(per_lane.mapv(|s| match s.spread {
            Spread::Single(v) => v,
            Spread::Quartiles { q1, .. } => q1,
        }))
    };
    Ok(Stats { center, spread })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn mean_sem() {
        let s = summarize(&[1.0, 2.0, 3.0, 4.0], Statistic::Mean, ErrorStat::Sem, NanPolicy::Propagate);
        approx::assert_abs_diff_eq!(s.center, 2.5);
        let Spread::Single(sem) = s.spread else { panic!("expected single spread") };
        approx::assert_abs_diff_eq!(sem, (5.0f64 / 3.0).sqrt() / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn mean_std_population() {
        let s = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], Statistic::Mean, ErrorStat::Std, NanPolicy::Omit);
        assert_eq!(s.to_vec(), vec![5.0, 2.0]);
    }

    #[test]
    fn median_std_gives_quartiles() {
        let s = summarize(&[1.0, 2.0, 3.0, 4.0, 5.0], Statistic::Median, ErrorStat::Std, NanPolicy::Propagate);
        assert_eq!(s.to_vec(), vec![3.0, 2.0, 4.0]);
        assert_eq!(n_stats(Statistic::Median, ErrorStat::Std), 3);
        assert_eq!(n_stats(Statistic::Median, ErrorStat::Sem), 2);
    }

    #[test]
    fn nan_policy() {
        let v = [1.0, f64::NAN, 3.0];
        assert!(center(&v, Statistic::Mean, NanPolicy::Propagate).is_nan());
        approx::assert_abs_diff_eq!(center(&v, Statistic::Mean, NanPolicy::Omit), 2.0);
    }

    #[test]
    fn percentile_interpolates() {
        approx::assert_abs_diff_eq!(percentile(&[4.0, 1.0, 3.0, 2.0], 50.0), 2.5);
        approx::assert_abs_diff_eq!(percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 2.5), 1.1, epsilon = 1e-12);
    }

    #[test]
    fn stats_along_axis() {
        let data = array![[1.0, 2.0, 3.0], [4.0, 6.0, 8.0]].into_dyn();
        let s = get_stats(data.view(), Axis(1), Statistic::Mean, ErrorStat::Std, NanPolicy::Propagate).unwrap();
        assert_eq!(s.center, array![2.0, 6.0].into_dyn());
        assert!(get_stats(data.view(), Axis(2), Statistic::Mean, ErrorStat::Std, NanPolicy::Propagate).is_err());
    }
}
