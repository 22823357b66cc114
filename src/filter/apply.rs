//! Row-wise application of 1-D smoothers to `[ROI, frame]` arrays.
use ndarray::{Array1, Array2, Axis};

use super::median::medfilt;
use crate::error::Result;

/// Median-filter every row of `data` along the frame axis.
pub fn medfilt_rows(data: &Array2<f64>, k: usize) -> Result<Array2<f64>> {
    let mut out = Array2::<f64>::zeros(data.raw_dim());
    for (row, mut dst) in data.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        let filtered = medfilt(&row.to_vec(), k)?;
        dst.assign(&Array1::from(filtered));
    }
    Ok(out)
}

/// Apply `f` to every row of `data`; `f` must preserve the row length.
pub fn map_rows<F>(data: &Array2<f64>, mut f: F) -> Array2<f64>
where
    F: FnMut(&[f64]) -> Vec<f64>,
{
    let mut out = Array2::<f64>::zeros(data.raw_dim());
    for (row, mut dst) in data.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        dst.assign(&Array1::from(f(&row.to_vec())));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn filters_each_row_independently() {
        let data = array![[1.0, 8.0, 1.0, 1.0], [2.0, 2.0, -7.0, 2.0]];
        let out = medfilt_rows(&data, 3).unwrap();
        assert_eq!(out.row(0).to_vec(), vec![1.0, 1.0, 1.0, 1.0]);
        assert_eq!(out.row(1).to_vec(), vec![2.0, 2.0, 2.0, 0.0]);
    }
}
