//! Running speed and pupil accessors.
use ndarray::{Array2, Axis};

use super::traces::reduce_windows;
use super::{SeqArray, Session};
use crate::align::interp;
use crate::epoch::frame_windows;
use crate::error::{Error, Result};
use crate::stats::{get_stats, ErrorStat, NanPolicy, Statistic, Stats};
use crate::stimulus::StimulusKind;

/// Clock a frame index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    Stim,
    Twop,
}

/// How windowed behavioural data is read and reduced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorOptions {
    /// Interpolated running values, or pupil diameters with blinks removed.
    pub remove_nans: bool,
    pub baseline: Option<f64>,
    pub baseline_stat: Statistic,
    pub integrate: bool,
    pub nan_policy: NanPolicy,
}

impl Default for BehaviorOptions {
    fn default() -> Self {
        Self {
            remove_nans: true,
            baseline: None,
            baseline_stat: Statistic::Mean,
            integrate: false,
            nan_policy: NanPolicy::Propagate,
        }
    }
}

fn window_array(values: &[f64], seqs: &[Vec<usize>], n_fr: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((seqs.len(), n_fr));
    for (s, seq) in seqs.iter().enumerate() {
        for (t, &f) in seq.iter().enumerate() {
            out[[s, t]] = values[f];
        }
    }
    out
}

impl Session {
    /// Running speed at `frames`. Stimulus frames index the repaired trace
    /// directly; 2p frames are interpolated over the stimulus → 2p mapping.
    pub fn run_speed_by_frames(&self, frames: &[usize], clock: Clock, remove_nans: bool) -> Result<Vec<f64>> {
        let run = self.running.values(remove_nans);
        match clock {
            Clock::Stim => frames
                .iter()
                .map(|&f| {
                    run.get(f).copied().ok_or_else(|| {
                        Error::out_of_range(format!("stimulus frame {f} outside [0, {})", run.len()))
                    })
                })
                .collect(),
            Clock::Twop => {
                let n_twop = self.alignment.n_twop_frames();
                if let Some(&bad) = frames.iter().find(|&&f| f >= n_twop) {
                    return Err(Error::out_of_range(format!("2p frame {bad} outside [0, {n_twop})")));
                }
                let xp: Vec<f64> = self.alignment.stim_to_twop_all().iter().map(|&v| v as f64).collect();
                Ok(frames.iter().map(|&f| interp(f as f64, &xp, run)).collect())
            }
        }
    }

    /// Sequence × frame running windows around stimulus reference frames.
    pub fn run_array(&self, stim_ref_frames: &[usize], pre: f64, post: f64, opts: &BehaviorOptions) -> Result<SeqArray> {
        let fps = self.stim_fps();
        let run = self.running.values(opts.remove_nans);
        let windows = frame_windows(stim_ref_frames, pre, post, fps, run.len())?;
        let data = window_array(run, &windows.seqs, windows.n_frames()).into_dyn();
        let data = reduce_windows(data, fps, opts.baseline, opts.baseline_stat, opts.integrate, opts.nan_policy)?;
        let xran = if opts.integrate { Vec::new() } else { windows.xran };
        Ok(SeqArray { xran, data, dropped: windows.dropped })
    }

    /// Statistics across sequences of [`Session::run_array`].
    pub fn run_array_stats(
        &self,
        stim_ref_frames: &[usize],
        pre: f64,
        post: f64,
        opts: &BehaviorOptions,
        stat: Statistic,
        err: ErrorStat,
    ) -> Result<(Vec<f64>, Stats, SeqArray)> {
        let arr = self.run_array(stim_ref_frames, pre, post, opts)?;
        let stats = get_stats(arr.data.view(), Axis(0), stat, err, opts.nan_policy)?;
        Ok((arr.xran.clone(), stats, arr))
    }

    /// Sequence × frame pupil-diameter windows around 2p reference frames,
    /// mapped to the pupil clock with the configured delay.
    ///
    /// References whose delayed pupil frame falls past the recording are
    /// dropped like windows that overrun it.
    pub fn pupil_array(&self, twop_ref_frames: &[usize], pre: f64, post: f64, opts: &BehaviorOptions) -> Result<SeqArray> {
        let pupil = self.pupil()?;
        let fps = self.alignment.pupil_fps();
        let mut kept = Vec::with_capacity(twop_ref_frames.len());
        let mut refs = Vec::with_capacity(twop_ref_frames.len());
        let mut dropped = Vec::new();
        for (i, &f) in twop_ref_frames.iter().enumerate() {
            match self.alignment.twop_to_pupil_frame(f, self.config.pupil_delay_s) {
                Ok(p) => {
                    kept.push(i);
                    refs.push(p);
                }
                Err(Error::OutOfRange(_)) => dropped.push(i),
                Err(e) => return Err(e),
            }
        }
        if !dropped.is_empty() {
            log::debug!("{} of {} reference(s) map past the pupil recording", dropped.len(), twop_ref_frames.len());
        }
        if refs.is_empty() {
            return Err(Error::empty("No frames: every reference maps outside the pupil recording"));
        }

        let diam = pupil.values(opts.remove_nans);
        let windows = frame_windows(&refs, pre, post, fps, diam.len())?;
        dropped.extend(windows.dropped.iter().map(|&j| kept[j]));
        dropped.sort_unstable();
        let data = window_array(diam, &windows.seqs, windows.n_frames()).into_dyn();
        let data = reduce_windows(data, fps, opts.baseline, opts.baseline_stat, opts.integrate, opts.nan_policy)?;
        let xran = if opts.integrate { Vec::new() } else { windows.xran };
        Ok(SeqArray { xran, data, dropped })
    }

    /// Running values over each block of a stimulus, display sequence ×
    /// block.
    pub fn run_by_block(&self, kind: StimulusKind, remove_nans: bool) -> Result<Vec<Vec<Vec<f64>>>> {
        let view = self.stim(kind)?;
        let run = self.running.values(remove_nans);
        view.stim
            .blocks
            .iter()
            .map(|disp| {
                disp.iter()
                    .map(|b| {
                        run.get(b.stim_frames.clone()).map(<[f64]>::to_vec).ok_or_else(|| {
                            Error::out_of_range(format!(
                                "{kind} block frames {:?} outside the running trace",
                                b.stim_frames
                            ))
                        })
                    })
                    .collect()
            })
            .collect()
    }
}
