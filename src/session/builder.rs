//! Staged session construction.
//!
//! ```text
//! new(metadata, config)
//!   → alignment(stim_log, sync)   frame alignment + running repair
//!   → segments()                  multi-part merge + segment table
//!   → stimuli()                   block model per stimulus
//!   → traces(trace_store)         dF/F computed if missing
//!   → pupil(Option<store>)        optional
//!   → build()                     Loaded<Session>
//! ```
//!
//! A stage called before its prerequisite fails with [`Error::NotLoaded`].
use crate::align::{repair_running, FrameAlignment, Pupil, RunningSpeed};
use crate::config::SessionConfig;
use crate::diagnostics::{DiagnosticKind, Diagnostics, Loaded};
use crate::error::{Error, Result};
use crate::normalize::compute_dff;
use crate::raw::{PupilStore, SessionInputs, SessionMetadata, StimLog, SyncStore, TraceStore};
use crate::segments::{build_segment_table, merge_stimuli, MergedStimulus, SegmentTable};
use crate::stimulus::{Grayscreen, Stimulus};

use super::{Caches, RoiTraces, Session};

#[derive(Debug)]
pub struct SessionBuilder {
    metadata: SessionMetadata,
    config: SessionConfig,
    diags: Diagnostics,
    stim_log: Option<StimLog>,
    alignment: Option<FrameAlignment>,
    running: Option<RunningSpeed>,
    merged: Option<Vec<MergedStimulus>>,
    table: Option<SegmentTable>,
    stimuli: Option<Vec<Stimulus>>,
    traces: Option<RoiTraces>,
    pupil: Option<Pupil>,
}

impl SessionBuilder {
    pub fn new(metadata: SessionMetadata, config: SessionConfig) -> Self {
        Self {
            metadata,
            config,
            diags: Diagnostics::new(),
            stim_log: None,
            alignment: None,
            running: None,
            merged: None,
            table: None,
            stimuli: None,
            traces: None,
            pupil: None,
        }
    }

    fn aligned(&self) -> Result<&FrameAlignment> {
        self.alignment.as_ref().ok_or(Error::NotLoaded("alignment"))
    }

    /// Build the frame alignment and repair the running speed.
    pub fn alignment(mut self, stim_log: StimLog, sync: &SyncStore) -> Result<Self> {
        let (alignment, diags) = FrameAlignment::build(&stim_log, sync, self.config.drop_tol)?;
        self.diags.extend(diags);

        let (running, diags) =
            repair_running(&stim_log.running_velocity, self.config.run_diff_thr, self.config.run_filter_ks)?;
        self.diags.extend(diags);
        let n_nan = running.excluded.iter().filter(|v| v.is_nan()).count();
        let prop = n_nan as f64 / running.len().max(1) as f64;
        if prop > self.config.drop_tol {
            self.diags.warn(
                DiagnosticKind::RunningOutliers,
                format!("{:.2}% of running frames are NaN (tolerance {:.2}%)", prop * 100.0, self.config.drop_tol * 100.0),
            );
        }

        log::info!(
            "session {}: {} stim / {} 2p / {} pupil frames",
            self.metadata.session_id,
            alignment.n_stim_frames(),
            alignment.n_twop_frames(),
            alignment.n_pupil_frames()
        );
        self.alignment = Some(alignment);
        self.running = Some(running);
        self.stim_log = Some(stim_log);
        Ok(self)
    }

    /// Merge multi-part stimuli and build the segment table.
    pub fn segments(mut self) -> Result<Self> {
        let alignment = self.aligned()?;
        let log = self.stim_log.as_ref().ok_or(Error::NotLoaded("alignment"))?;
        let merged = merge_stimuli(log)?;
        let table = build_segment_table(&merged, alignment, log.pre_blank_frames(), log.total_frames)?;
        log::debug!("session {}: {} segment row(s)", self.metadata.session_id, table.len());
        self.merged = Some(merged);
        self.table = Some(table);
        Ok(self)
    }

    /// Lay out the blocks of every stimulus.
    pub fn stimuli(mut self) -> Result<Self> {
        let stim_fps = self.aligned()?.stim_fps();
        let (Some(merged), Some(table)) = (&self.merged, &self.table) else {
            return Err(Error::NotLoaded("segments"));
        };
        let mut stimuli = Vec::with_capacity(merged.len());
        let mut diags = Diagnostics::new();
        for m in merged {
            let (stim, d) = Stimulus::build(m, table, stim_fps, self.config.run_type)?;
            diags.extend(d);
            stimuli.push(stim);
        }
        self.diags.extend(diags);
        self.stimuli = Some(stimuli);
        Ok(self)
    }

    /// Attach ROI traces, computing dF/F from the raw traces when absent.
    pub fn traces(mut self, store: TraceStore) -> Result<Self> {
        let n_twop = self.aligned()?.n_twop_frames();
        if store.raw.ncols() != n_twop {
            return Err(Error::integrity(format!(
                "raw traces have {} frames, alignment expects {n_twop}",
                store.raw.ncols()
            )));
        }
        if store.roi_names.len() != store.raw.nrows() {
            return Err(Error::integrity(format!(
                "{} ROI names for {} ROI traces",
                store.roi_names.len(),
                store.raw.nrows()
            )));
        }
        let dff = match store.dff {
            Some(dff) if dff.dim() == store.raw.dim() => dff,
            Some(dff) => {
                return Err(Error::integrity(format!(
                    "dF/F traces have shape {:?}, raw traces {:?}",
                    dff.dim(),
                    store.raw.dim()
                )))
            }
            None => {
                log::info!("session {}: computing dF/F (basewin {})", self.metadata.session_id, self.config.dff_basewin);
                compute_dff(&store.raw, self.config.dff_basewin)
            }
        };
        self.traces = Some(RoiTraces { raw: store.raw, dff, roi_names: store.roi_names });
        Ok(self)
    }

    /// Attach pupil data, if recorded.
    pub fn pupil(mut self, store: Option<PupilStore>) -> Result<Self> {
        let n_pupil = self.aligned()?.n_pupil_frames();
        let Some(store) = store else {
            return Ok(self);
        };
        if store.diameter.len() != store.center.len() {
            return Err(Error::integrity(format!(
                "pupil diameter ({}) and centre ({}) lengths differ",
                store.diameter.len(),
                store.center.len()
            )));
        }
        if store.diameter.len() < n_pupil {
            return Err(Error::integrity(format!(
                "pupil data covers {} frames, alignment expects {n_pupil}",
                store.diameter.len()
            )));
        }
        self.pupil = Some(Pupil::from_store(&store, self.config.blink_thr));
        Ok(self)
    }

    pub fn build(self) -> Result<Loaded<Session>> {
        let alignment = self.alignment.ok_or(Error::NotLoaded("alignment"))?;
        let running = self.running.ok_or(Error::NotLoaded("alignment"))?;
        let table = self.table.ok_or(Error::NotLoaded("segments"))?;
        let stimuli = self.stimuli.ok_or(Error::NotLoaded("stimuli"))?;
        let traces = self.traces.ok_or(Error::NotLoaded("traces"))?;
        let grayscreen = Grayscreen::from_table(&table);
        let session = Session {
            metadata: self.metadata,
            config: self.config,
            alignment,
            table,
            stimuli,
            grayscreen,
            running,
            pupil: self.pupil,
            traces,
            caches: Caches::default(),
        };
        Ok(Loaded::new(session, self.diags))
    }
}

/// Run every builder stage in order.
pub fn build_session(inputs: SessionInputs, config: &SessionConfig) -> Result<Loaded<Session>> {
    SessionBuilder::new(inputs.metadata, config.clone())
        .alignment(inputs.stim_log, &inputs.sync)?
        .segments()?
        .stimuli()?
        .traces(inputs.traces)?
        .pupil(inputs.pupil)?
        .build()
}
