//! Cross-clock frame mappings for one session.
//!
//! The stimulus clock runs over the whole session including the pre- and
//! post-blank periods. The 2p clock is the reference every other stream is
//! mapped onto.
//!
//! ```text
//! stim frame ──stim_to_twop──▶ 2p frame ──twop_to_pupil──▶ pupil frame
//!      ▲                          │  └────twop_to_body───▶ body frame
//!      └──────twop_to_stim────────┘
//! ```
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::{Error, Result};
use crate::raw::{StimLog, SyncStore};

/// The four frame mappings plus the clock rates they were recorded at.
#[derive(Debug, Clone)]
pub struct FrameAlignment {
    stim_to_twop: Vec<usize>,
    /// First stimulus frame shown during each 2p frame, `None` outside the
    /// stimulus span.
    twop_to_stim: Vec<Option<usize>>,
    twop_to_pupil: Vec<usize>,
    twop_to_body: Vec<usize>,
    stim_fps: f64,
    twop_fps: f64,
    pupil_fps: f64,
    n_pupil: usize,
    /// Number of gaps in `stim_to_twop` repaired by repetition.
    n_repaired_gaps: usize,
    dropped_prop: f64,
}

impl FrameAlignment {
    /// Validate the sync arrays against the stimulus log and derive the
    /// reverse mapping.
    pub fn build(stim_log: &StimLog, sync: &SyncStore, drop_tol: f64) -> Result<(Self, Diagnostics)> {
        let mut diags = Diagnostics::new();
        let n_stim = stim_log.n_stim_frames();

        if stim_log.fps <= 0.0 || sync.twop_fps <= 0.0 {
            return Err(Error::config(format!(
                "frame rates must be positive (stim {} Hz, 2p {} Hz)",
                stim_log.fps, sync.twop_fps
            )));
        }
        if sync.stim_to_twop.len() != n_stim {
            return Err(Error::integrity(format!(
                "stimulus alignment has {} frames, stimulus log implies {n_stim}",
                sync.stim_to_twop.len()
            )));
        }
        if stim_log.running_velocity.len() != n_stim {
            return Err(Error::integrity(format!(
                "running array has {} samples, stimulus alignment has {n_stim}",
                stim_log.running_velocity.len()
            )));
        }
        if sync.twop_to_pupil.len() != sync.twop_to_body.len() {
            return Err(Error::integrity(format!(
                "pupil alignment ({}) and body alignment ({}) lengths differ",
                sync.twop_to_pupil.len(),
                sync.twop_to_body.len()
            )));
        }
        if let Some(i) = sync.stim_to_twop.windows(2).position(|w| w[1] < w[0]) {
            return Err(Error::integrity(format!(
                "stimulus alignment decreases at stimulus frame {}",
                i + 1
            )));
        }
        let n_twop = sync.twop_to_pupil.len();
        match sync.stim_to_twop.last() {
            Some(&last) if last < n_twop => {}
            Some(&last) => {
                return Err(Error::integrity(format!(
                    "stimulus alignment reaches 2p frame {last}, only {n_twop} recorded"
                )))
            }
            None => return Err(Error::integrity("empty stimulus alignment")),
        }
        if sync.pupil_frame_intervals.is_empty() {
            return Err(Error::integrity("no pupil frame intervals"));
        }
        let mean_interval = sync.pupil_frame_intervals.iter().sum::<f64>()
            / sync.pupil_frame_intervals.len() as f64;
        let pupil_fps = 1.0 / mean_interval;

        let dropped_prop = if stim_log.total_frames == 0 {
            0.0
        } else {
            stim_log.dropped_frames.len() as f64 / stim_log.total_frames as f64
        };
        if dropped_prop > drop_tol {
            diags.warn(
                DiagnosticKind::DroppedFrames,
                format!(
                    "{:.4}% of stimulus frames dropped ({} frames, tolerance {:.4}%)",
                    dropped_prop * 100.0,
                    stim_log.dropped_frames.len(),
                    drop_tol * 100.0
                ),
            );
        }

        let (twop_to_stim, n_repaired_gaps) = reverse_alignment(&sync.stim_to_twop, n_twop);
        if n_repaired_gaps > 0 {
            diags.warn(
                DiagnosticKind::DroppedFrames,
                format!("{n_repaired_gaps} dropped stimulus frame sequences repaired in 2p alignment"),
            );
        }
        log::debug!(
            "aligned {n_stim} stimulus frames onto {n_twop} 2p frames (pupil {pupil_fps:.2} Hz)"
        );

        Ok((
            Self {
                stim_to_twop: sync.stim_to_twop.clone(),
                twop_to_stim,
                twop_to_pupil: sync.twop_to_pupil.clone(),
                twop_to_body: sync.twop_to_body.clone(),
                stim_fps: stim_log.fps,
                twop_fps: sync.twop_fps,
                pupil_fps,
                n_pupil: sync.pupil_frame_intervals.len() + 1,
                n_repaired_gaps,
                dropped_prop,
            },
            diags,
        ))
    }

    pub fn n_stim_frames(&self) -> usize {
        self.stim_to_twop.len()
    }

    pub fn n_twop_frames(&self) -> usize {
        self.twop_to_pupil.len()
    }

    pub fn n_pupil_frames(&self) -> usize {
        self.n_pupil
    }

    pub fn stim_fps(&self) -> f64 {
        self.stim_fps
    }

    pub fn twop_fps(&self) -> f64 {
        self.twop_fps
    }

    pub fn pupil_fps(&self) -> f64 {
        self.pupil_fps
    }

    pub fn dropped_prop(&self) -> f64 {
        self.dropped_prop
    }

    pub fn n_repaired_gaps(&self) -> usize {
        self.n_repaired_gaps
    }

    /// Full stimulus → 2p mapping.
    pub fn stim_to_twop_all(&self) -> &[usize] {
        &self.stim_to_twop
    }

    /// Full 2p → stimulus table; `None` where no stimulus frame started.
    pub fn twop_to_stim_all(&self) -> &[Option<usize>] {
        &self.twop_to_stim
    }

    pub fn twop_to_body_all(&self) -> &[usize] {
        &self.twop_to_body
    }

    pub fn stim_frame_to_twop(&self, stim_fr: usize) -> Result<usize> {
        self.stim_to_twop.get(stim_fr).copied().ok_or_else(|| {
            Error::out_of_range(format!(
                "stimulus frame {stim_fr} outside [0, {})",
                self.stim_to_twop.len()
            ))
        })
    }

    /// Stimulus frame shown at the start of a 2p frame, clamped to the first
    /// or last stimulus frame outside the stimulus span.
    pub fn twop_to_stim_frame(&self, twop_fr: usize) -> Result<usize> {
        let entry = self.twop_to_stim.get(twop_fr).ok_or_else(|| {
            Error::out_of_range(format!(
                "2p frame {twop_fr} outside [0, {})",
                self.twop_to_stim.len()
            ))
        })?;
        Ok(match entry {
            Some(f) => *f,
            None if twop_fr < self.stim_to_twop[0] => 0,
            None => self.stim_to_twop.len() - 1,
        })
    }

    /// Pupil frame recorded when a 2p frame's content was on screen, offset
    /// by the display latency `delay_s`.
    pub fn twop_to_pupil_frame(&self, twop_fr: usize, delay_s: f64) -> Result<usize> {
        let base = self.twop_to_pupil.get(twop_fr).copied().ok_or_else(|| {
            Error::out_of_range(format!(
                "2p frame {twop_fr} outside [0, {})",
                self.twop_to_pupil.len()
            ))
        })?;
        let delay = (self.twop_fps * delay_s).round().max(0.0) as usize;
        let pup = base + delay;
        if pup >= self.n_pupil {
            return Err(Error::out_of_range(format!(
                "pupil frame {pup} outside [0, {})",
                self.n_pupil
            )));
        }
        Ok(pup)
    }

    pub fn twop_to_body_frame(&self, twop_fr: usize) -> Result<usize> {
        self.twop_to_body.get(twop_fr).copied().ok_or_else(|| {
            Error::out_of_range(format!(
                "2p frame {twop_fr} outside [0, {})",
                self.twop_to_body.len()
            ))
        })
    }
}

/// First stimulus frame per 2p frame. 2p frames skipped by the forward
/// mapping repeat the previous 2p frame's stimulus frame.
fn reverse_alignment(stim_to_twop: &[usize], n_twop: usize) -> (Vec<Option<usize>>, usize) {
    let mut table = vec![None; n_twop];
    let mut n_gaps = 0;
    let mut prev: Option<(usize, usize)> = None; // (2p frame, its first stim frame)
    for (stim_fr, &twop_fr) in stim_to_twop.iter().enumerate() {
        match prev {
            Some((p, _)) if p == twop_fr => continue,
            Some((p, first)) if twop_fr > p + 1 => {
                n_gaps += 1;
                for slot in &mut table[p + 1..twop_fr] {
                    *slot = Some(first);
                }
            }
            _ => {}
        }
        table[twop_fr] = Some(stim_fr);
        prev = Some((twop_fr, stim_fr));
    }
    (table, n_gaps)
}

/// Piecewise-linear interpolation with `np.interp` semantics: `xp` must be
/// non-decreasing, values outside the range clamp to the end points, and
/// repeated `xp` values resolve to the last occurrence.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return f64::NAN;
    }
    if x <= xp[0] {
        return if x == xp[0] { fp[xp[..n].partition_point(|&v| v <= x) - 1] } else { fp[0] };
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    // xp[hi - 1] <= x < xp[hi]
    let hi = xp[..n].partition_point(|&v| v <= x);
    let lo = hi - 1;
    let span = xp[hi] - xp[lo];
    if span == 0.0 {
        return fp[lo];
    }
    fp[lo] + (x - xp[lo]) * (fp[hi] - fp[lo]) / span
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn reverse_alignment_takes_first_stim_frame() {
        let (t, gaps) = reverse_alignment(&[0, 0, 1, 1, 2, 2], 3);
        assert_eq!(t, vec![Some(0), Some(2), Some(4)]);
        assert_eq!(gaps, 0);
    }

    #[test]
    fn reverse_alignment_repeats_across_every_gap() {
        // 2p frames 2 and 5 have no stimulus frame starting in them
        let (t, gaps) = reverse_alignment(&[1, 1, 3, 4, 6], 8);
        assert_eq!(
            t,
            vec![None, Some(0), Some(0), Some(2), Some(3), Some(3), Some(4), None]
        );
        assert_eq!(gaps, 2);
    }

    #[test]
    fn interp_matches_numpy() {
        let xp = [0.0, 1.0, 1.0, 3.0];
        let fp = [0.0, 10.0, 20.0, 40.0];
        assert_abs_diff_eq!(interp(-1.0, &xp, &fp), 0.0);
        assert_abs_diff_eq!(interp(0.5, &xp, &fp), 5.0);
        assert_abs_diff_eq!(interp(1.0, &xp, &fp), 20.0);
        assert_abs_diff_eq!(interp(2.0, &xp, &fp), 30.0);
        assert_abs_diff_eq!(interp(9.0, &xp, &fp), 40.0);
    }
}
