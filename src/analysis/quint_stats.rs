//! Trace statistics per quintile.
use ndarray::{Array2, ArrayD, Axis, Ix2};
use rand::Rng;
use serde::Serialize;

use super::{Datatype, Lock};
use crate::config::{AnalysisConfig, QuintConfig, StimPar};
use crate::epoch::linspace;
use crate::error::{Error, Result};
use crate::quintile::{quintile_segments, sample_quintile_segments, QuintOptions, Quintiles};
use crate::segments::Criterion;
use crate::session::{BehaviorOptions, Session, TraceOptions};
use crate::stats::Stats;
use crate::stimulus::{StimView, StimulusKind};

/// Options shared by the quintile trace analyses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuintAnalysisOptions {
    pub lock: Lock,
    /// Report regular and surprise segments separately (ignored when
    /// `lock` fixes the surprise values).
    pub by_surprise: bool,
    /// Stats per ROI rather than across ROIs.
    pub by_roi: bool,
    pub integrate: bool,
    /// Empty quintiles give NaN stats instead of an error.
    pub nan_empty: bool,
    /// Baseline, in seconds from the window start.
    pub baseline: Option<f64>,
    pub datatype: Datatype,
    /// Keep the per-quintile data arrays.
    pub keep_arrays: bool,
}

impl Default for QuintAnalysisOptions {
    fn default() -> Self {
        Self {
            lock: Lock::None,
            by_surprise: false,
            by_roi: true,
            integrate: false,
            nan_empty: false,
            baseline: None,
            datatype: Datatype::Roi,
            keep_arrays: false,
        }
    }
}

/// Stats for one surprise condition, per quintile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuintileData {
    /// `None` when regular and surprise segments are pooled.
    pub surprise: Option<bool>,
    /// Surprise-run length, for by-length splits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_consec: Option<usize>,
    pub quintiles: Vec<usize>,
    /// Sequences contributing to each quintile.
    pub counts: Vec<usize>,
    /// `[(ROI,) (frame)]` stats per quintile.
    pub stats: Vec<Stats>,
    /// `[(ROI,) sequence (, frame)]` data per quintile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrays: Option<Vec<ArrayD<f64>>>,
}

/// Quintile trace statistics of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuintileTraceStats {
    pub session_id: u64,
    pub mouse_n: u32,
    pub line: String,
    pub kind: StimulusKind,
    pub datatype: Datatype,
    pub lock: Lock,
    /// Seconds relative to segment onset; empty when integrated.
    pub xran: Vec<f64>,
    pub data: Vec<QuintileData>,
}

/// Quintile trace statistics split by surprise-run length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurpriseLengthStats {
    pub session_id: u64,
    pub kind: StimulusKind,
    /// Distinct run lengths, ascending; one [`QuintileData`] each.
    pub n_consec: Vec<usize>,
    pub xran: Vec<f64>,
    pub data: Vec<QuintileData>,
}

fn trace_options(analysis: &AnalysisConfig, opts: &QuintAnalysisOptions) -> TraceOptions {
    TraceOptions {
        kind: analysis.trace_kind,
        exclude_nan_rois: analysis.exclude_nan_rois,
        baseline: opts.baseline,
        integrate: opts.integrate,
        nan_policy: analysis.nan_policy,
        ..TraceOptions::default()
    }
}

fn behavior_options(analysis: &AnalysisConfig, opts: &QuintAnalysisOptions) -> BehaviorOptions {
    BehaviorOptions {
        baseline: opts.baseline,
        integrate: opts.integrate,
        nan_policy: analysis.nan_policy,
        ..BehaviorOptions::default()
    }
}

/// `(xran, stats, data)` shaped like a real result but all NaN, with one
/// sequence.
fn placeholder(
    session: &Session,
    stimpar: &StimPar,
    analysis: &AnalysisConfig,
    opts: &QuintAnalysisOptions,
) -> (Vec<f64>, Stats, ArrayD<f64>) {
    let fps = match opts.datatype {
        Datatype::Roi => session.twop_fps(),
        Datatype::Run => session.stim_fps(),
    };
    let n_fr = ((stimpar.post * fps).round() - (-stimpar.pre * fps).round()).max(0.0) as usize;
    let xran = if opts.integrate { Vec::new() } else { linspace(-stimpar.pre, stimpar.post, n_fr) };
    let frames: &[usize] = if opts.integrate { &[] } else { std::slice::from_ref(&n_fr) };

    let mut stat_shape = Vec::new();
    let mut data_shape = Vec::new();
    if opts.datatype == Datatype::Roi {
        let n_rois = session.valid_rois(analysis.trace_kind, analysis.exclude_nan_rois).len();
        if opts.by_roi {
            stat_shape.push(n_rois);
        }
        data_shape.push(n_rois);
    }
    data_shape.push(1);
    stat_shape.extend_from_slice(frames);
    data_shape.extend_from_slice(frames);
    (
        xran,
        Stats::<ArrayD<f64>>::nan_shaped(&stat_shape, analysis.stat, analysis.error),
        ArrayD::from_elem(data_shape, f64::NAN),
    )
}

/// Stats (and optionally data) for each quintile of `quints`, referenced to
/// the first frame of every segment.
pub fn trace_stats_by_quintile(
    session: &Session,
    view: &StimView<'_>,
    stimpar: &StimPar,
    quints: &Quintiles,
    analysis: &AnalysisConfig,
    opts: &QuintAnalysisOptions,
) -> Result<(Vec<f64>, Vec<Stats>, Option<Vec<ArrayD<f64>>>)> {
    let mut xran = None;
    let mut stats = Vec::with_capacity(quints.len());
    let mut arrays = opts.keep_arrays.then(Vec::new);

    for (q, segs) in quints.indices.iter().zip(&quints.segs) {
        let result = if segs.is_empty() {
            Err(Error::empty(format!("No frames: quintile {q} has no segments")))
        } else {
            match opts.datatype {
                Datatype::Roi => view.first_twop_frames(segs).and_then(|fr| {
                    session.roi_trace_stats(
                        &fr,
                        stimpar.pre,
                        stimpar.post,
                        &trace_options(analysis, opts),
                        analysis.stat,
                        analysis.error,
                        opts.by_roi,
                    )
                }),
                Datatype::Run => view.first_stim_frames(segs).and_then(|fr| {
                    session.run_array_stats(
                        &fr,
                        stimpar.pre,
                        stimpar.post,
                        &behavior_options(analysis, opts),
                        analysis.stat,
                        analysis.error,
                    )
                }),
            }
        };
        let (x, st, data) = match result {
            Ok((x, st, arr)) => (x, st, arr.data),
            Err(e) if opts.nan_empty && e.is_empty_result() => {
                log::info!("session {}: quintile {q} empty, using NaN placeholder", session.id());
                placeholder(session, stimpar, analysis, opts)
            }
            Err(e) => return Err(e),
        };
        xran.get_or_insert(x);
        stats.push(st);
        if let Some(a) = arrays.as_mut() {
            a.push(data);
        }
    }
    Ok((xran.unwrap_or_default(), stats, arrays))
}

/// Surprise values analysed, whether runs are collapsed to onsets, and
/// whether one segment is sampled per run.
fn lock_plan(lock: Lock, by_surprise: bool) -> (Vec<Option<bool>>, bool, bool) {
    match lock {
        Lock::Surprise => (vec![Some(true)], true, false),
        Lock::Regular => (vec![Some(false)], true, false),
        Lock::Both => (vec![Some(false), Some(true)], true, false),
        Lock::RegularSampled => (vec![Some(false)], false, true),
        Lock::None if by_surprise => (vec![Some(false), Some(true)], false, false),
        Lock::None => (vec![None], false, false),
    }
}

/// Release a gabor frame constraint, which onset locking would otherwise
/// contradict.
fn release_gabfr(stimpar: &StimPar) -> StimPar {
    let mut sp = stimpar.clone();
    if sp.kind == StimulusKind::Gabors && !sp.criteria.gabfr.is_all() {
        log::info!("locking to run onsets: gabor frame criterion set to any");
        sp.criteria.gabfr = Criterion::All;
    }
    sp
}

/// Quintile trace statistics for one session, per surprise condition.
pub fn trace_stats_by_quintile_session<R: Rng + ?Sized>(
    session: &Session,
    stimpar: &StimPar,
    quint: &QuintConfig,
    analysis: &AnalysisConfig,
    opts: &QuintAnalysisOptions,
    rng: &mut R,
) -> Result<QuintileTraceStats> {
    let (surp_vals, remove_consecutive, sample) = lock_plan(opts.lock, opts.by_surprise);
    let stimpar = if remove_consecutive { release_gabfr(stimpar) } else { stimpar.clone() };
    let view = session.stim(stimpar.kind)?;

    let mut xran = Vec::new();
    let mut data = Vec::with_capacity(surp_vals.len());
    for surprise in surp_vals {
        let criteria = match surprise {
            Some(s) => stimpar.criteria.clone().surprise(s),
            None => stimpar.criteria.clone(),
        };
        let mut quints = quintile_segments(
            &view,
            &criteria,
            quint,
            QuintOptions { remove_consecutive, by_surp_len: false, empty_ok: opts.nan_empty },
        )?;
        if sample {
            let seg_len = view.stim.seg_len_s;
            let seg_pre = (stimpar.pre / seg_len).round() as usize;
            let seg_post = (stimpar.post / seg_len).round() as usize;
            quints = sample_quintile_segments(&quints, seg_pre, seg_post, opts.nan_empty, rng)?;
        }
        let (x, stats, arrays) = trace_stats_by_quintile(session, &view, &stimpar, &quints, analysis, opts)?;
        xran = x;
        data.push(QuintileData {
            surprise,
            n_consec: None,
            quintiles: quints.indices.clone(),
            counts: quints.counts(),
            stats,
            arrays,
        });
    }

    let meta = session.metadata();
    Ok(QuintileTraceStats {
        session_id: meta.session_id,
        mouse_n: meta.mouse_n,
        line: meta.line.clone(),
        kind: stimpar.kind,
        datatype: opts.datatype,
        lock: opts.lock,
        xran,
        data,
    })
}

/// Surprise-onset quintile statistics split by the length of the surprise
/// run each onset starts.
pub fn trace_stats_by_surprise_length(
    session: &Session,
    stimpar: &StimPar,
    quint: &QuintConfig,
    analysis: &AnalysisConfig,
    opts: &QuintAnalysisOptions,
) -> Result<SurpriseLengthStats> {
    let stimpar = release_gabfr(stimpar);
    let view = session.stim(stimpar.kind)?;
    let quints = quintile_segments(
        &view,
        &stimpar.criteria.clone().surprise(true),
        quint,
        QuintOptions { remove_consecutive: true, by_surp_len: true, empty_ok: opts.nan_empty },
    )?;
    let n_consec = quints.n_consec.clone().unwrap_or_default();
    let mut lengths: Vec<usize> = n_consec.iter().flatten().copied().collect();
    lengths.sort_unstable();
    lengths.dedup();

    let mut xran = Vec::new();
    let mut data = Vec::with_capacity(lengths.len());
    for &len in &lengths {
        let segs: Vec<Vec<i64>> = quints
            .segs
            .iter()
            .zip(&n_consec)
            .map(|(segs, ns)| segs.iter().zip(ns).filter(|&(_, &n)| n == len).map(|(&s, _)| s).collect())
            .collect();
        let sub = Quintiles { indices: quints.indices.clone(), segs, n_consec: None };
        let (x, stats, arrays) = trace_stats_by_quintile(session, &view, &stimpar, &sub, analysis, opts)?;
        xran = x;
        data.push(QuintileData {
            surprise: Some(true),
            n_consec: Some(len),
            quintiles: sub.indices.clone(),
            counts: sub.counts(),
            stats,
            arrays,
        });
    }
    Ok(SurpriseLengthStats { session_id: session.id(), kind: stimpar.kind, n_consec: lengths, xran, data })
}

/// Integrated `[unit, sequence]` data per quintile, regular and surprise.
#[derive(Debug, Clone, PartialEq)]
pub struct SurpriseQuintileArrays {
    pub session_id: u64,
    pub mouse_n: u32,
    pub line: String,
    pub quintiles: Vec<usize>,
    pub reg: Vec<Array2<f64>>,
    pub surp: Vec<Array2<f64>>,
}

impl SurpriseQuintileArrays {
    pub fn n_units(&self) -> usize {
        self.reg.first().map_or(0, Array2::nrows)
    }
}

fn as_unit_seq(arr: ArrayD<f64>) -> Result<Array2<f64>> {
    let arr = if arr.ndim() == 1 { arr.insert_axis(Axis(0)) } else { arr };
    arr.into_dimensionality::<Ix2>().map_err(|e| Error::config(format!("expected [unit, sequence] data: {e}")))
}

/// Integrated regular and surprise data per quintile, the input of the
/// magnitude and significant-ROI analyses. Running data gets a single unit.
pub fn surprise_quintile_arrays<R: Rng + ?Sized>(
    session: &Session,
    stimpar: &StimPar,
    quint: &QuintConfig,
    analysis: &AnalysisConfig,
    datatype: Datatype,
    nan_empty: bool,
    rng: &mut R,
) -> Result<SurpriseQuintileArrays> {
    let opts = QuintAnalysisOptions {
        by_surprise: true,
        integrate: true,
        keep_arrays: true,
        nan_empty,
        datatype,
        ..QuintAnalysisOptions::default()
    };
    let res = trace_stats_by_quintile_session(session, stimpar, quint, analysis, &opts, rng)?;
    let mut split = [Vec::new(), Vec::new()];
    let mut quintiles = Vec::new();
    for d in res.data {
        let idx = usize::from(d.surprise == Some(true));
        quintiles = d.quintiles;
        for arr in d.arrays.unwrap_or_default() {
            split[idx].push(as_unit_seq(arr)?);
        }
    }
    let [reg, surp] = split;
    Ok(SurpriseQuintileArrays {
        session_id: res.session_id,
        mouse_n: res.mouse_n,
        line: res.line,
        quintiles,
        reg,
        surp,
    })
}
