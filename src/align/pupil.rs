//! Pupil diameter and position per pupil-camera frame.
use crate::raw::PupilStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Pupil {
    pub diameter: Vec<f64>,
    /// `diameter` with blinks and non-finite values replaced by NaN.
    pub diameter_no_blinks: Vec<f64>,
    pub center: Vec<[f64; 2]>,
    /// Distance moved by the centre since the previous frame; NaN for the
    /// first frame.
    pub center_diff: Vec<f64>,
}

impl Pupil {
    pub fn from_store(store: &PupilStore, blink_thr: f64) -> Self {
        let center_diff = std::iter::once(f64::NAN)
            .chain(store.center.windows(2).map(|w| {
                let (dx, dy) = (w[1][0] - w[0][0], w[1][1] - w[0][1]);
                (dx * dx + dy * dy).sqrt()
            }))
            .take(store.center.len())
            .collect();
        Self {
            diameter: store.diameter.clone(),
            diameter_no_blinks: remove_blinks(&store.diameter, blink_thr),
            center: store.center.clone(),
            center_diff,
        }
    }

    pub fn len(&self) -> usize {
        self.diameter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diameter.is_empty()
    }

    pub fn values(&self, remove_blinks: bool) -> &[f64] {
        if remove_blinks { &self.diameter_no_blinks } else { &self.diameter }
    }
}

/// Diameters below `thr` (a collapsed fit during a blink) become NaN.
pub fn remove_blinks(diameter: &[f64], thr: f64) -> Vec<f64> {
    diameter
        .iter()
        .map(|&d| if d.is_finite() && d >= thr { d } else { f64::NAN })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blinks_become_nan() {
        let out = remove_blinks(&[20.0, 3.0, f64::INFINITY, 5.0], 5.0);
        assert_eq!(out[0], 20.0);
        assert!(out[1].is_nan() && out[2].is_nan());
        assert_eq!(out[3], 5.0);
    }

    #[test]
    fn center_diff_is_euclidean() {
        let store = PupilStore {
            diameter: vec![10.0; 3],
            center: vec![[0.0, 0.0], [3.0, 4.0], [3.0, 4.0]],
        };
        let p = Pupil::from_store(&store, 5.0);
        assert!(p.center_diff[0].is_nan());
        assert_eq!(&p.center_diff[1..], &[5.0, 0.0]);
    }
}
