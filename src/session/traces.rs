//! ROI trace accessors.
use ndarray::{Array2, Array3, ArrayD, Axis};

use super::{SeqArray, Session};
use crate::config::TraceKind;
use crate::epoch::{extend_sequences, frame_windows};
use crate::error::{Error, Result};
use crate::normalize::{baseline_frames, integrate, subtract_baseline};
use crate::stats::{center_along, get_stats, ErrorStat, NanPolicy, Statistic, Stats};

/// How windowed ROI data is read and reduced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceOptions {
    pub kind: TraceKind,
    /// Drop ROIs with NaN/Inf anywhere in the session.
    pub exclude_nan_rois: bool,
    /// Seconds at the start of each window used as baseline.
    pub baseline: Option<f64>,
    pub baseline_stat: Statistic,
    /// Collapse the frame axis (`Σ x / fps`).
    pub integrate: bool,
    pub nan_policy: NanPolicy,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            kind: TraceKind::Dff,
            exclude_nan_rois: true,
            baseline: None,
            baseline_stat: Statistic::Mean,
            integrate: false,
            nan_policy: NanPolicy::Propagate,
        }
    }
}

/// Apply the optional baseline and integration steps of `data`
/// (`[.., sequence, frame]`).
pub(crate) fn reduce_windows(
    mut data: ArrayD<f64>,
    fps: f64,
    baseline: Option<f64>,
    baseline_stat: Statistic,
    integrate_frames: bool,
    nan: NanPolicy,
) -> Result<ArrayD<f64>> {
    if let Some(b) = baseline {
        subtract_baseline(&mut data, baseline_frames(b, fps), baseline_stat)?;
    }
    if integrate_frames {
        data = integrate(data.view(), fps, nan)?;
    }
    Ok(data)
}

impl Session {
    /// ROI × frame traces at `frames` (2p clock).
    pub fn roi_traces(&self, frames: &[usize], kind: TraceKind, exclude_nan_rois: bool) -> Result<Array2<f64>> {
        let traces = self.traces.get(kind);
        let n = traces.ncols();
        if let Some(&bad) = frames.iter().find(|&&f| f >= n) {
            return Err(Error::out_of_range(format!("2p frame {bad} outside [0, {n})")));
        }
        let rois = self.valid_rois(kind, exclude_nan_rois);
        Ok(traces.select(Axis(0), &rois).select(Axis(1), frames))
    }

    /// ROI × sequence × frame traces.
    ///
    /// Each sequence is first extended by `pre_pad`/`post_pad` frames at its
    /// own edges. Sequences reaching outside the recording are dropped and
    /// logged; shorter sequences are NaN-padded at the tail. Returns the
    /// array and the indices of the dropped sequences.
    pub fn roi_sequences(
        &self,
        seqs: &[Vec<usize>],
        pre_pad: usize,
        post_pad: usize,
        kind: TraceKind,
        exclude_nan_rois: bool,
    ) -> Result<(Array3<f64>, Vec<usize>)> {
        let traces = self.traces.get(kind);
        let (kept, dropped) = extend_sequences(seqs, pre_pad, post_pad, traces.ncols());
        if !dropped.is_empty() {
            log::warn!(
                "session {}: dropping {} sequence(s) outside the recording: {:?}",
                self.id(),
                dropped.len(),
                dropped
            );
        }
        if kept.is_empty() {
            return Err(Error::empty("No frames: every sequence falls outside the recording"));
        }
        let rois = self.valid_rois(kind, exclude_nan_rois);
        let max_len = kept.iter().map(Vec::len).max().unwrap_or(0);
        let mut out = Array3::<f64>::from_elem((rois.len(), kept.len(), max_len), f64::NAN);
        for (r_out, &r) in rois.iter().enumerate() {
            for (s, seq) in kept.iter().enumerate() {
                for (t, &f) in seq.iter().enumerate() {
                    out[[r_out, s, t]] = traces[[r, f]];
                }
            }
        }
        Ok((out, dropped))
    }

    /// ROI × sequence (× frame) windows of `[-pre, post]` seconds around
    /// each 2p reference frame.
    pub fn roi_trace_array(&self, ref_frames: &[usize], pre: f64, post: f64, opts: &TraceOptions) -> Result<SeqArray> {
        let fps = self.twop_fps();
        let windows = frame_windows(ref_frames, pre, post, fps, self.traces.n_frames())?;
        let traces = self.traces.get(opts.kind);
        let rois = self.valid_rois(opts.kind, opts.exclude_nan_rois);
        let n_fr = windows.n_frames();
        let mut data = Array3::<f64>::zeros((rois.len(), windows.len(), n_fr));
        for (r_out, &r) in rois.iter().enumerate() {
            for (s, seq) in windows.seqs.iter().enumerate() {
                for (t, &f) in seq.iter().enumerate() {
                    data[[r_out, s, t]] = traces[[r, f]];
                }
            }
        }
        let data =
            reduce_windows(data.into_dyn(), fps, opts.baseline, opts.baseline_stat, opts.integrate, opts.nan_policy)?;
        let xran = if opts.integrate { Vec::new() } else { windows.xran };
        Ok(SeqArray { xran, data, dropped: windows.dropped })
    }

    /// Statistics across sequences of [`Session::roi_trace_array`].
    ///
    /// With `by_roi`, stats are per ROI (`[ROI(, frame)]`). Otherwise each
    /// ROI is first reduced across sequences with `stat`, then stats are
    /// taken across ROIs (`[(frame)]`).
    pub fn roi_trace_stats(
        &self,
        ref_frames: &[usize],
        pre: f64,
        post: f64,
        opts: &TraceOptions,
        stat: Statistic,
        err: ErrorStat,
        by_roi: bool,
    ) -> Result<(Vec<f64>, Stats, SeqArray)> {
        let arr = self.roi_trace_array(ref_frames, pre, post, opts)?;
        let stats = if by_roi {
            get_stats(arr.data.view(), Axis(1), stat, err, opts.nan_policy)?
        } else {
            let per_roi = center_along(arr.data.view(), Axis(1), stat, opts.nan_policy)?;
            get_stats(per_roi.view(), Axis(0), stat, err, opts.nan_policy)?
        };
        Ok((arr.xran.clone(), stats, arr))
    }
}
