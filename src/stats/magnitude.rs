//! Change between two groups (e.g. first vs last quintile), summarised as a
//! statistic of its magnitude or as an L2 norm across items.
use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, Axis, Ix2};
use serde::{Deserialize, Serialize};

use super::descriptive::{summarize, ErrorStat, NanPolicy, Statistic, Stats};
use crate::error::{Error, Result};

/// Binary comparison between a first and a second value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    /// `second − first`
    #[default]
    Diff,
    /// `second / first`
    Ratio,
}

impl Op {
    pub fn apply(self, first: f64, second: f64) -> f64 {
        match self {
            Op::Diff => second - first,
            Op::Ratio => second / first,
        }
    }
}

impl FromStr for Op {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "diff" => Ok(Op::Diff),
            "ratio" => Ok(Op::Ratio),
            _ => Err(Error::config(format!("unknown operation {s:?} (expected diff or ratio)"))),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Diff => "diff",
            Op::Ratio => "ratio",
        })
    }
}

/// Apply `op` between index 0 and index 1 of `axis`, removing that axis.
pub fn calc_op(data: ArrayViewD<f64>, axis: Axis, op: Op) -> Result<ArrayD<f64>> {
    if axis.index() >= data.ndim() {
        return Err(Error::config(format!("axis {} out of range for {}-d data", axis.index(), data.ndim())));
    }
    let n = data.len_of(axis);
    if n != 2 {
        return Err(Error::config(format!("comparison needs exactly 2 groups along axis {}, got {n}", axis.index())));
    }
    Ok(data.map_axis(axis, |lane| op.apply(lane[0], lane[1])))
}

/// Rescale each item (index along `item_axis`) to `[-1, 1]`, anchored at its
/// first element: `x' = (x − x₀) / max|x − x₀|`. Items with no spread become
/// all zeros.
pub fn scale_unit(data: ArrayViewD<f64>, item_axis: Axis) -> Result<ArrayD<f64>> {
    if item_axis.index() >= data.ndim() {
        return Err(Error::config(format!("axis {} out of range for {}-d data", item_axis.index(), data.ndim())));
    }
    let mut out = data.to_owned();
    for mut item in out.axis_iter_mut(item_axis) {
        let Some(&anchor) = item.iter().next() else { continue };
        let max = item.iter().map(|&v| (v - anchor).abs()).fold(0.0, f64::max);
        item.mapv_inplace(|v| if max > 0.0 { (v - anchor) / max } else { 0.0 });
    }
    Ok(out)
}

/// `|op(row 0, row 1)|` per item of a `[2, item]` array.
fn abs_change(data: ArrayView2<f64>, op: Op) -> Result<Vec<f64>> {
    if data.nrows() != 2 {
        return Err(Error::config(format!("magnitude change needs exactly 2 groups, got {}", data.nrows())));
    }
    Ok(data.columns().into_iter().map(|c| op.apply(c[0], c[1]).abs()).collect())
}

/// Statistic across items of the absolute change between the two rows of
/// `data` (`[2, item]`).
pub fn mag_change(
    data: ArrayView2<f64>,
    op: Op,
    stat: Statistic,
    err: ErrorStat,
    nan: NanPolicy,
) -> Result<Stats<f64>> {
    Ok(summarize(&abs_change(data, op)?, stat, err, nan))
}

/// L2 norm across items of the change between the two rows of `data`
/// (`[2, item]`).
pub fn l2_change(data: ArrayView2<f64>, op: Op) -> Result<f64> {
    Ok(abs_change(data, op)?.iter().map(|v| v * v).sum::<f64>().sqrt())
}

/// [`mag_change`] and [`l2_change`] of `[group, 2, item]` data, unscaled and
/// after [`scale_unit`] across each item's `[group, 2]` values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MagnitudeSet {
    /// `[scaled][group]`
    pub mag: [Vec<Stats<f64>>; 2],
    /// `[scaled][group]`
    pub l2: [Vec<f64>; 2],
}

pub fn magnitude_set(
    data: ArrayViewD<f64>,
    op: Op,
    stat: Statistic,
    err: ErrorStat,
    nan: NanPolicy,
) -> Result<MagnitudeSet> {
    if data.ndim() != 3 {
        return Err(Error::config(format!("expected [group, 2, item] data, got {}-d", data.ndim())));
    }
    let scaled = scale_unit(data.view(), Axis(2))?;
    let mut mag: [Vec<Stats<f64>>; 2] = Default::default();
    let mut l2: [Vec<f64>; 2] = Default::default();
    for (s, arr) in [data.to_owned(), scaled].iter().enumerate() {
        for group in arr.axis_iter(Axis(0)) {
            let g: Array2<f64> = group
                .into_dimensionality::<Ix2>()
                .map_err(|e| Error::config(e.to_string()))?
                .to_owned();
            mag[s].push(mag_change(g.view(), op, stat, err, nan)?);
            l2[s].push(l2_change(g.view(), op)?);
        }
    }
    Ok(MagnitudeSet { mag, l2 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn op_direction() {
        assert_eq!(Op::Diff.apply(1.0, 5.0), 4.0);
        assert_eq!(Op::Ratio.apply(2.0, 5.0), 2.5);
    }

    #[test]
    fn calc_op_needs_two() {
        let d = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn();
        assert_eq!(calc_op(d.view(), Axis(0), Op::Diff).unwrap(), array![3.0, 3.0, 3.0].into_dyn());
        assert!(calc_op(d.view(), Axis(1), Op::Diff).is_err());
    }

    #[test]
    fn magnitude_and_l2() {
        let d = array![[0.0, 0.0], [3.0, -4.0]];
        let m = mag_change(d.view(), Op::Diff, Statistic::Mean, ErrorStat::Std, NanPolicy::Propagate).unwrap();
        assert_eq!(m.to_vec(), vec![3.5, 0.5]);
        approx::assert_abs_diff_eq!(l2_change(d.view(), Op::Diff).unwrap(), 5.0);
        assert!(l2_change(array![[1.0, 2.0]].view(), Op::Diff).is_err());
    }

    #[test]
    fn unit_scaling_anchors_first_element() {
        let d = array![[2.0, 4.0, 0.0], [1.0, 1.0, 1.0]].into_dyn();
        let s = scale_unit(d.view(), Axis(0)).unwrap();
        assert_eq!(s, array![[0.0, 1.0, -1.0], [0.0, 0.0, 0.0]].into_dyn());
    }

    #[test]
    fn magnitude_set_shapes() {
        let d = ndarray::Array3::from_shape_fn((2, 2, 5), |(g, q, i)| (g + q * i) as f64).into_dyn();
        let set = magnitude_set(d.view(), Op::Diff, Statistic::Mean, ErrorStat::Sem, NanPolicy::Propagate).unwrap();
        assert_eq!(set.mag[0].len(), 2);
        assert_eq!(set.l2[1].len(), 2);
        approx::assert_abs_diff_eq!(set.mag[0][0].center, 2.0);
    }
}
