//! Permutation significance test for the difference between two groups of
//! observations.
//!
//! Observations of every tested unit (e.g. ROI) are pooled along the last
//! axis: the first `n_a` columns are group A, the rest group B. Each
//! permutation shuffles the column order once for all units, so the null
//! distributions of different units share their partitions.
use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::descriptive::{center, percentile, NanPolicy, Statistic};
use super::magnitude::Op;
use crate::config::PermConfig;
use crate::error::{Error, Result};

/// Tail(s) of the null distribution tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tails {
    Lo,
    Up,
    #[default]
    Both,
}

impl Tails {
    pub fn as_str(self) -> &'static str {
        match self {
            Tails::Lo => "lo",
            Tails::Up => "up",
            Tails::Both => "2",
        }
    }

    pub fn is_two_tailed(self) -> bool {
        self == Tails::Both
    }
}

impl fmt::Display for Tails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tails {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lo" => Ok(Tails::Lo),
            "up" | "hi" => Ok(Tails::Up),
            "2" | "both" => Ok(Tails::Both),
            _ => Err(Error::config(format!("unknown tails {s:?} (expected lo, up or 2)"))),
        }
    }
}

impl Serialize for Tails {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Tails {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Num(u8),
        }
        let s = match Raw::deserialize(d)? {
            Raw::Text(s) => s,
            Raw::Num(n) => n.to_string(),
        };
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Significance outcome for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailLabel {
    Up,
    Lo,
    No,
}

impl TailLabel {
    pub fn is_significant(self) -> bool {
        self != TailLabel::No
    }
}

impl fmt::Display for TailLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TailLabel::Up => "up",
            TailLabel::Lo => "lo",
            TailLabel::No => "no",
        })
    }
}

/// Null-distribution thresholds; `None` for an untested tail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub lo: Option<f64>,
    pub up: Option<f64>,
}

impl Thresholds {
    /// Strictly beyond a threshold is significant; NaN never is.
    pub fn classify(&self, actual: f64) -> TailLabel {
        if actual.is_nan() {
            return TailLabel::No;
        }
        match (self.lo, self.up) {
            (Some(lo), _) if actual < lo => TailLabel::Lo,
            (_, Some(up)) if actual > up => TailLabel::Up,
            _ => TailLabel::No,
        }
    }
}

/// Percentile thresholds of `null` at level `p_val`: `p/2` on each side for
/// two tails, `p` on the tested side otherwise.
pub fn tail_thresholds(null: &[f64], tails: Tails, p_val: f64) -> Thresholds {
    let q = 100.0 * p_val;
    match tails {
        Tails::Lo => Thresholds { lo: Some(percentile(null, q)), up: None },
        Tails::Up => Thresholds { lo: None, up: Some(percentile(null, 100.0 - q)) },
        Tails::Both => Thresholds {
            lo: Some(percentile(null, q / 2.0)),
            up: Some(percentile(null, 100.0 - q / 2.0)),
        },
    }
}

fn check_split(n_obs: usize, n_a: usize) -> Result<()> {
    if n_obs < 2 {
        return Err(Error::config(format!("permutation test needs at least 2 observations, got {n_obs}")));
    }
    if n_a == 0 || n_a >= n_obs {
        return Err(Error::config(format!("group A size {n_a} must be in [1, {n_obs})")));
    }
    Ok(())
}

/// `op(stat(A), stat(B))` per unit (row) for the given column order.
fn group_op(data: &ArrayView2<f64>, order: &[usize], n_a: usize, stat: Statistic, nan: NanPolicy, op: Op) -> Vec<f64> {
    let mut a = Vec::with_capacity(n_a);
    let mut b = Vec::with_capacity(order.len() - n_a);
    data.rows()
        .into_iter()
        .map(|row| {
            a.clear();
            b.clear();
            a.extend(order[..n_a].iter().map(|&j| row[j]));
            b.extend(order[n_a..].iter().map(|&j| row[j]));
            op.apply(center(&a, stat, nan), center(&b, stat, nan))
        })
        .collect()
}

/// Group statistics over random partitions: `[2, unit, n_perms]`, index 0
/// holding `stat(A)` and index 1 `stat(B)`.
pub fn permute_group_stats<R: Rng + ?Sized>(
    data: ArrayView2<f64>,
    n_a: usize,
    n_perms: usize,
    stat: Statistic,
    nan: NanPolicy,
    rng: &mut R,
) -> Result<Array3<f64>> {
    let (n_units, n_obs) = data.dim();
    check_split(n_obs, n_a)?;
    let mut out = Array3::<f64>::zeros((2, n_units, n_perms));
    let mut order: Vec<usize> = (0..n_obs).collect();
    let mut a = Vec::with_capacity(n_a);
    let mut b = Vec::with_capacity(n_obs - n_a);
    for p in 0..n_perms {
        order.shuffle(rng);
        for (u, row) in data.rows().into_iter().enumerate() {
            a.clear();
            b.clear();
            a.extend(order[..n_a].iter().map(|&j| row[j]));
            b.extend(order[n_a..].iter().map(|&j| row[j]));
            out[[0, u, p]] = center(&a, stat, nan);
            out[[1, u, p]] = center(&b, stat, nan);
        }
    }
    Ok(out)
}

/// Null distribution, `[unit, n_perms]`, of `op(stat(A), stat(B))` over
/// random partitions of each row of `data` (`[unit, obs]`).
pub fn permute_diff<R: Rng + ?Sized>(
    data: ArrayView2<f64>,
    n_a: usize,
    n_perms: usize,
    stat: Statistic,
    nan: NanPolicy,
    op: Op,
    rng: &mut R,
) -> Result<Array2<f64>> {
    let groups = permute_group_stats(data, n_a, n_perms, stat, nan, rng)?;
    Ok(Zip::from(groups.index_axis(Axis(0), 0))
        .and(groups.index_axis(Axis(0), 1))
        .map_collect(|&a, &b| op.apply(a, b)))
}

/// Result of [`permutation_test`], one entry per unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermResult {
    /// Observed `op(stat(A), stat(B))`.
    pub actual: Vec<f64>,
    pub thresholds: Vec<Thresholds>,
    pub labels: Vec<TailLabel>,
    pub n_perms: usize,
    pub p_val: f64,
    pub tails: Tails,
}

impl PermResult {
    /// Indices of the units labelled `label`.
    pub fn units(&self, label: TailLabel) -> Vec<usize> {
        self.labels.iter().enumerate().filter(|&(_, &l)| l == label).map(|(i, _)| i).collect()
    }

    pub fn n_significant(&self) -> usize {
        self.labels.iter().filter(|l| l.is_significant()).count()
    }
}

/// Test, per unit (row of `pooled`), whether `op(stat(A), stat(B))` is
/// extreme relative to `perm.n_perms` random partitions.
///
/// Fails when `pooled` has fewer than 2 observations per unit or `n_a` is
/// not in `[1, n_obs)`.
pub fn permutation_test<R: Rng + ?Sized>(
    pooled: ArrayView2<f64>,
    n_a: usize,
    perm: &PermConfig,
    stat: Statistic,
    nan: NanPolicy,
    op: Op,
    rng: &mut R,
) -> Result<PermResult> {
    let n_obs = pooled.ncols();
    check_split(n_obs, n_a)?;
    if perm.n_perms == 0 {
        return Err(Error::config("n_perms must be at least 1"));
    }
    let identity: Vec<usize> = (0..n_obs).collect();
    let actual = group_op(&pooled, &identity, n_a, stat, nan, op);
    let null = permute_diff(pooled, n_a, perm.n_perms, stat, nan, op, rng)?;

    let thresholds: Vec<Thresholds> = null
        .rows()
        .into_iter()
        .map(|row| {
            let finite: Vec<f64> = row.iter().copied().filter(|v| !v.is_nan()).collect();
            tail_thresholds(&finite, perm.tails, perm.p_val)
        })
        .collect();
    let labels: Vec<TailLabel> = actual.iter().zip(&thresholds).map(|(&a, th)| th.classify(a)).collect();
    log::debug!(
        "permutation test: {}/{} unit(s) significant (p = {}, {} perms, tails {})",
        labels.iter().filter(|l| l.is_significant()).count(),
        labels.len(),
        perm.p_val,
        perm.n_perms,
        perm.tails
    );
    Ok(PermResult { actual, thresholds, labels, n_perms: perm.n_perms, p_val: perm.p_val, tails: perm.tails })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn tails_parse_and_serde() {
        assert_eq!("2".parse::<Tails>().unwrap(), Tails::Both);
        assert_eq!(serde_json::to_string(&Tails::Both).unwrap(), "\"2\"");
        assert_eq!(serde_json::from_str::<Tails>("2").unwrap(), Tails::Both);
        assert_eq!(serde_json::from_str::<Tails>("\"lo\"").unwrap(), Tails::Lo);
        assert!("sideways".parse::<Tails>().is_err());
    }

    #[test]
    fn classify_strict_and_nan() {
        let th = Thresholds { lo: Some(-1.0), up: Some(1.0) };
        assert_eq!(th.classify(1.0), TailLabel::No);
        assert_eq!(th.classify(1.5), TailLabel::Up);
        assert_eq!(th.classify(-2.0), TailLabel::Lo);
        assert_eq!(th.classify(f64::NAN), TailLabel::No);
    }

    #[test]
    fn separated_groups_are_significant() {
        let pooled = array![[1.0, 1.0, 1.0, 1.0, 5.0, 5.0, 5.0, 5.0]];
        let mut rng = StdRng::seed_from_u64(7);
        let res = permutation_test(
            pooled.view(),
            4,
            &PermConfig::default(),
            Statistic::Mean,
            NanPolicy::Propagate,
            Op::Diff,
            &mut rng,
        )
        .unwrap();
        approx::assert_abs_diff_eq!(res.actual[0], 4.0);
        assert_eq!(res.labels, vec![TailLabel::Up]);
    }

    #[test]
    fn invalid_splits_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let cfg = PermConfig::default();
        let one = array![[1.0]];
        assert!(permutation_test(one.view(), 1, &cfg, Statistic::Mean, NanPolicy::Omit, Op::Diff, &mut rng).is_err());
        let two = array![[1.0, 2.0]];
        assert!(permutation_test(two.view(), 2, &cfg, Statistic::Mean, NanPolicy::Omit, Op::Diff, &mut rng).is_err());
        assert!(permutation_test(two.view(), 0, &cfg, Statistic::Mean, NanPolicy::Omit, Op::Diff, &mut rng).is_err());
    }

    #[test]
    fn null_distribution_shape() {
        let data = array![[1.0, 2.0, 3.0, 4.0], [0.0, 0.0, 1.0, 1.0]];
        let mut rng = StdRng::seed_from_u64(1);
        let null = permute_diff(data.view(), 2, 50, Statistic::Median, NanPolicy::Propagate, Op::Diff, &mut rng).unwrap();
        assert_eq!(null.dim(), (2, 50));
        assert!(null.iter().all(|v| v.abs() <= 3.0));
    }
}
