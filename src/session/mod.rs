//! A fully loaded recording session.
//!
//! [`Session`] is assembled by [`SessionBuilder`] and is immutable afterwards,
//! apart from the lazily computed NaN-ROI and active-ROI caches, which are
//! filled on first use and only recomputed through
//! [`Session::refresh_caches`].
//!
//! - [`builder`]: staged construction from the raw inputs.
//! - [`traces`]: ROI trace accessors, frame windows and their statistics.
//! - [`behavior`]: running speed and pupil accessors.

pub mod behavior;
pub mod builder;
pub mod traces;

pub use behavior::{BehaviorOptions, Clock};
pub use builder::{build_session, SessionBuilder};
pub use traces::TraceOptions;

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;

use ndarray::{Array2, ArrayD, Axis};
use serde::Serialize;

use crate::align::{FrameAlignment, Pupil, RunningSpeed};
use crate::config::{SessionConfig, TraceKind};
use crate::error::{Error, Result};
use crate::filter::medfilt_rows;
use crate::raw::SessionMetadata;
use crate::segments::SegmentTable;
use crate::stats::{center, summarize, ErrorStat, NanPolicy, Spread, Statistic};
use crate::stimulus::{Grayscreen, StimView, Stimulus, StimulusKind};

/// Windowed data around reference frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeqArray {
    /// Seconds relative to the reference frame; empty once integrated.
    pub xran: Vec<f64>,
    /// `[(ROI,) sequence(, frame)]`
    pub data: ArrayD<f64>,
    /// Reference frames whose window fell outside the recording.
    pub dropped: Vec<usize>,
}

/// ROI × 2p frame traces of one session.
#[derive(Debug, Clone)]
pub struct RoiTraces {
    pub raw: Array2<f64>,
    pub dff: Array2<f64>,
    pub roi_names: Vec<String>,
}

impl RoiTraces {
    pub fn get(&self, kind: TraceKind) -> &Array2<f64> {
        match kind {
            TraceKind::Raw => &self.raw,
            TraceKind::Dff => &self.dff,
        }
    }

    pub fn n_rois(&self) -> usize {
        self.raw.nrows()
    }

    pub fn n_frames(&self) -> usize {
        self.raw.ncols()
    }
}

#[derive(Debug, Default)]
struct Caches {
    nan_raw: OnceCell<Vec<usize>>,
    nan_dff: OnceCell<Vec<usize>>,
    active: RefCell<HashMap<(TraceKind, Option<StimulusKind>), Vec<usize>>>,
}

impl Caches {
    fn nan(&self, kind: TraceKind) -> &OnceCell<Vec<usize>> {
        match kind {
            TraceKind::Raw => &self.nan_raw,
            TraceKind::Dff => &self.nan_dff,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    metadata: SessionMetadata,
    config: SessionConfig,
    alignment: FrameAlignment,
    table: SegmentTable,
    stimuli: Vec<Stimulus>,
    grayscreen: Grayscreen,
    running: RunningSpeed,
    pupil: Option<Pupil>,
    traces: RoiTraces,
    caches: Caches,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.metadata.session_id
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn alignment(&self) -> &FrameAlignment {
        &self.alignment
    }

    pub fn segment_table(&self) -> &SegmentTable {
        &self.table
    }

    pub fn stimuli(&self) -> &[Stimulus] {
        &self.stimuli
    }

    pub fn has_stimulus(&self, kind: StimulusKind) -> bool {
        self.stimuli.iter().any(|s| s.kind() == kind)
    }

    /// Query view over the stimulus of `kind`.
    pub fn stim(&self, kind: StimulusKind) -> Result<StimView<'_>> {
        let stim = self
            .stimuli
            .iter()
            .find(|s| s.kind() == kind)
            .ok_or_else(|| Error::empty(format!("session {} has no {kind} stimulus", self.id())))?;
        Ok(StimView { stim, table: &self.table, alignment: &self.alignment })
    }

    pub fn grayscreen(&self) -> &Grayscreen {
        &self.grayscreen
    }

    pub fn running(&self) -> &RunningSpeed {
        &self.running
    }

    pub fn pupil(&self) -> Result<&Pupil> {
        self.pupil.as_ref().ok_or(Error::NotLoaded("pupil"))
    }

    pub fn traces(&self) -> &RoiTraces {
        &self.traces
    }

    pub fn n_rois(&self) -> usize {
        self.traces.n_rois()
    }

    pub fn roi_names(&self) -> &[String] {
        &self.traces.roi_names
    }

    pub fn twop_fps(&self) -> f64 {
        self.alignment.twop_fps()
    }

    pub fn stim_fps(&self) -> f64 {
        self.alignment.stim_fps()
    }

    // ── Cached ROI sets ───────────────────────────────────────────────────────

    /// ROIs with any NaN or infinite value anywhere in the `kind` trace.
    pub fn nan_rois(&self, kind: TraceKind) -> &[usize] {
        self.caches.nan(kind).get_or_init(|| {
            let rois: Vec<usize> = self
                .traces
                .get(kind)
                .axis_iter(Axis(0))
                .enumerate()
                .filter(|(_, row)| row.iter().any(|v| !v.is_finite()))
                .map(|(i, _)| i)
                .collect();
            if !rois.is_empty() {
                log::info!("session {}: {} {kind:?} ROI(s) contain NaN/Inf", self.id(), rois.len());
            }
            rois
        })
    }

    /// ROIs kept for analysis: all of them, or those without NaN/Inf.
    pub fn valid_rois(&self, kind: TraceKind, exclude_nan: bool) -> Vec<usize> {
        if !exclude_nan {
            return (0..self.n_rois()).collect();
        }
        let nan = self.nan_rois(kind);
        (0..self.n_rois()).filter(|r| nan.binary_search(r).is_err()).collect()
    }

    /// ROIs whose median-filtered trace exceeds `median + n_std·std` of the
    /// filtered full-session trace at least once, optionally only within the
    /// blocks of one stimulus.
    pub fn active_rois(&self, kind: TraceKind, during: Option<StimulusKind>) -> Result<Vec<usize>> {
        if let Some(hit) = self.caches.active.borrow().get(&(kind, during)) {
            return Ok(hit.clone());
        }
        let filtered = medfilt_rows(self.traces.get(kind), self.config.active_filter_ks)?;
        let window: Option<Vec<usize>> = match during {
            None => None,
            Some(k) => {
                let view = self.stim(k)?;
                Some(view.stim.all_blocks().flat_map(|b| b.twop_frames.clone()).collect())
            }
        };
        let mut active = Vec::new();
        for (roi, row) in filtered.axis_iter(Axis(0)).enumerate() {
            let vals: Vec<f64> = row.iter().copied().filter(|v| v.is_finite()).collect();
            let med = center(&vals, Statistic::Median, NanPolicy::Omit);
            let std = match summarize(&vals, Statistic::Mean, ErrorStat::Std, NanPolicy::Omit).spread {
                Spread::Single(s) => s,
                Spread::Quartiles { .. } => f64::NAN,
            };
            let thr = med + self.config.active_n_std * std;
            let hit = match &window {
                None => row.iter().any(|&v| v > thr),
                Some(frames) => frames.iter().any(|&f| row.get(f).is_some_and(|&v| v > thr)),
            };
            if hit {
                active.push(roi);
            }
        }
        log::debug!("session {}: {}/{} active ROI(s)", self.id(), active.len(), self.n_rois());
        self.caches.active.borrow_mut().insert((kind, during), active.clone());
        Ok(active)
    }

    /// Drop cached ROI sets so they are recomputed on next use.
    pub fn refresh_caches(&mut self) {
        self.caches = Caches::default();
    }
}
