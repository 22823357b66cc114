//! ROI groups by significance pattern across two quintiles.
//!
//! Elementary groups partition the ROIs. Names read `<first>_<last>`, where
//! each half is `reg` (not significant) or `surp` (significant), with the
//! tail appended (`surpup`, `surplo`) for two-tailed tests. Composite sets
//! are unions of elementary groups.
use ndarray::{Array2, ArrayView2, Axis, Ix2};
use serde::Serialize;

use super::descriptive::{summarize, ErrorStat, NanPolicy, Statistic, Stats};
use super::magnitude::scale_unit;
use super::permutation::{TailLabel, Tails};
use crate::config::GroupSet;
use crate::error::{Error, Result};

const ONE_TAILED: [&str; 4] = ["surp_surp", "surp_reg", "reg_surp", "reg_reg"];

const TWO_TAILED: [&str; 9] = [
    "surpup_surpup",
    "surpup_surplo",
    "surplo_surpup",
    "surplo_surplo",
    "surpup_reg",
    "surplo_reg",
    "reg_surpup",
    "reg_surplo",
    "reg_reg",
];

/// Elementary ROI groups: a partition of `0..n_rois`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoiGroups {
    pub tails: Tails,
    pub names: Vec<&'static str>,
    /// ROI indices per group, ascending.
    pub groups: Vec<Vec<usize>>,
    /// Group index of each ROI.
    pub membership: Vec<usize>,
}

fn one_tailed_index(first: TailLabel, last: TailLabel) -> usize {
    match (first.is_significant(), last.is_significant()) {
        (true, true) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    }
}

fn two_tailed_index(first: TailLabel, last: TailLabel) -> usize {
    use TailLabel::{Lo, No, Up};
    match (first, last) {
        (Up, Up) => 0,
        (Up, Lo) => 1,
        (Lo, Up) => 2,
        (Lo, Lo) => 3,
        (Up, No) => 4,
        (Lo, No) => 5,
        (No, Up) => 6,
        (No, Lo) => 7,
        (No, No) => 8,
    }
}

impl RoiGroups {
    /// Partition ROIs given their labels in the first and last quintile.
    pub fn from_labels(first: &[TailLabel], last: &[TailLabel], tails: Tails) -> Result<Self> {
        if first.len() != last.len() {
            return Err(Error::config(format!(
                "label lists differ in length ({} vs {})",
                first.len(),
                last.len()
            )));
        }
        let names: Vec<&'static str> =
            if tails.is_two_tailed() { TWO_TAILED.to_vec() } else { ONE_TAILED.to_vec() };
        let mut groups = vec![Vec::new(); names.len()];
        let membership: Vec<usize> = first
            .iter()
            .zip(last)
            .enumerate()
            .map(|(roi, (&f, &l))| {
                let g = if tails.is_two_tailed() { two_tailed_index(f, l) } else { one_tailed_index(f, l) };
                groups[g].push(roi);
                g
            })
            .collect();
        Ok(Self { tails, names, groups, membership })
    }

    pub fn n_rois(&self) -> usize {
        self.membership.len()
    }

    /// Index of the group holding no ROI significant in either quintile.
    pub fn reg_index(&self) -> usize {
        self.names.len() - 1
    }

    /// Elementary group indices making up `set`, plus `reg_reg` if `add_reg`.
    pub fn set_indices(&self, set: GroupSet, add_reg: bool) -> Vec<usize> {
        let mut idx: Vec<usize> = match (self.tails.is_two_tailed(), set) {
            (_, GroupSet::All) => (0..self.names.len()).collect(),
            (false, GroupSet::Change) => vec![1, 2],
            (false, GroupSet::NoChange) => vec![0, 3],
            (false, GroupSet::Reduc) => vec![1],
            (false, GroupSet::Incr) => vec![2],
            (true, GroupSet::Change) => vec![1, 2, 4, 5, 6, 7],
            (true, GroupSet::NoChange) => vec![0, 3, 8],
            (true, GroupSet::Reduc) => vec![1, 4, 7],
            (true, GroupSet::Incr) => vec![2, 5, 6],
        };
        if add_reg && !idx.contains(&self.reg_index()) {
            idx.push(self.reg_index());
        }
        idx.sort_unstable();
        idx
    }

    /// `(name, ROIs)` for each elementary group in `set`.
    pub fn select(&self, set: GroupSet, add_reg: bool) -> Vec<(&'static str, Vec<usize>)> {
        self.set_indices(set, add_reg).into_iter().map(|i| (self.names[i], self.groups[i].clone())).collect()
    }

    /// Every ROI in `set`, ascending.
    pub fn union(&self, set: GroupSet) -> Vec<usize> {
        let mut rois: Vec<usize> =
            self.set_indices(set, false).into_iter().flat_map(|i| self.groups[i].iter().copied()).collect();
        rois.sort_unstable();
        rois
    }

    /// Name of the group `roi` belongs to.
    pub fn group_of(&self, roi: usize) -> Option<&'static str> {
        self.membership.get(roi).map(|&g| self.names[g])
    }
}

/// Statistics across each group's ROIs, per quintile.
///
/// `data` is `[quintile, ROI]`. With `scale`, each ROI is first rescaled to
/// `[-1, 1]` anchored at the first quintile. Empty groups yield NaN stats.
/// Returns `[quintile][group]`.
pub fn group_stats(
    data: ArrayView2<f64>,
    groups: &[Vec<usize>],
    stat: Statistic,
    err: ErrorStat,
    scale: bool,
) -> Result<Vec<Vec<Stats<f64>>>> {
    let n_rois = data.ncols();
    if let Some(bad) = groups.iter().flatten().find(|&&r| r >= n_rois) {
        return Err(Error::out_of_range(format!("ROI {bad} outside [0, {n_rois})")));
    }
    let data: Array2<f64> = if scale {
        scale_unit(data.into_dyn(), Axis(1))?
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::config(e.to_string()))?
    } else {
        data.to_owned()
    };
    Ok(data
        .axis_iter(Axis(0))
        .map(|quint| {
            groups
                .iter()
                .map(|g| {
                    if g.is_empty() {
                        Stats::<f64>::nan(stat, err)
                    } else {
                        let vals: Vec<f64> = g.iter().map(|&r| quint[r]).collect();
                        summarize(&vals, stat, err, NanPolicy::Omit)
                    }
                })
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use TailLabel::{Lo, No, Up};

    #[test]
    fn two_tailed_partition_is_exhaustive() {
        let first = [Up, Up, Lo, No, No, Lo, Up, No];
        let last = [Up, No, Up, No, Lo, Lo, Lo, Up];
        let g = RoiGroups::from_labels(&first, &last, Tails::Both).unwrap();
        assert_eq!(g.groups.iter().map(Vec::len).sum::<usize>(), first.len());
        let mut seen: Vec<usize> = g.groups.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..first.len()).collect::<Vec<_>>());
        assert_eq!(g.group_of(3), Some("reg_reg"));
        assert_eq!(g.group_of(6), Some("surpup_surplo"));
        assert_eq!(g.union(GroupSet::NoChange), vec![0, 3, 5]);
    }

    #[test]
    fn one_tailed_sets() {
        let g = RoiGroups::from_labels(&[Up, Up, No, No], &[Up, No, Up, No], Tails::Up).unwrap();
        assert_eq!(g.names, ONE_TAILED.to_vec());
        assert_eq!(g.groups, vec![vec![0], vec![1], vec![2], vec![3]]);
        let sel = g.select(GroupSet::Reduc, true);
        assert_eq!(sel, vec![("surp_reg", vec![1]), ("reg_reg", vec![3])]);
    }

    #[test]
    fn length_mismatch_rejected() {
        assert!(RoiGroups::from_labels(&[Up], &[], Tails::Both).is_err());
    }

    #[test]
    fn stats_per_group() {
        let data = array![[1.0, 3.0, 10.0], [2.0, 4.0, 20.0]];
        let st = group_stats(data.view(), &[vec![0, 1], vec![], vec![2]], Statistic::Mean, ErrorStat::Std, false)
            .unwrap();
        assert_eq!(st.len(), 2);
        approx::assert_abs_diff_eq!(st[0][0].center, 2.0);
        assert!(st[1][1].center.is_nan());
        approx::assert_abs_diff_eq!(st[1][2].center, 20.0);
        assert!(group_stats(data.view(), &[vec![3]], Statistic::Mean, ErrorStat::Std, false).is_err());
    }
}
