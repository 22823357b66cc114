//! Session and analysis configuration.
//!
//! Each struct holds the tunables for one stage. All fields are `pub` and every
//! struct implements [`Default`] with the values the recordings were analysed
//! with, so overrides use struct-update syntax:
//!
//! ```
//! use calcium_quint::{PermConfig, Tails};
//!
//! let perm = PermConfig {
//!     n_perms: 2_000,
//!     tails:   Tails::Up,
//!     ..PermConfig::default()
//! };
//! assert_eq!(perm.p_val, 0.05);
//! ```
//!
//! All structs deserialize from JSON with missing fields taking their default,
//! which is how the command-line tools read `--config`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::segments::SegmentCriteria;
use crate::stats::{ErrorStat, NanPolicy, Op, Statistic, Tails};
use crate::stimulus::StimulusKind;

/// Recording protocol. Selects the expected number of blocks per stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Pilot,
    #[default]
    Prod,
}

/// Which ROI trace store to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    Raw,
    #[default]
    Dff,
}

// ── Session loading ───────────────────────────────────────────────────────────

/// Parameters used while assembling a [`Session`](crate::Session).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pilot or production protocol.
    ///
    /// Default: [`RunType::Prod`].
    pub run_type: RunType,

    /// Proportion of dropped stimulus frames tolerated before a warning is
    /// recorded. Never fatal.
    ///
    /// Default: `0.0003`.
    pub drop_tol: f64,

    /// Absolute jump between consecutive running-speed samples (cm/s) above
    /// which samples are treated as outliers.
    ///
    /// Default: `50.0`.
    pub run_diff_thr: f64,

    /// Median filter kernel applied to running speed before outlier removal.
    /// `0` disables filtering.
    ///
    /// Default: `0`.
    pub run_filter_ks: usize,

    /// Half-width of the sliding-median baseline used when dF/F has to be
    /// computed from raw traces, in 2p frames.
    ///
    /// Default: `1000`.
    pub dff_basewin: usize,

    /// Pupil diameters below this value (pixels) are blinks and become NaN.
    ///
    /// Default: `5.0`.
    pub blink_thr: f64,

    /// Delay added when mapping 2p frames to pupil frames, in seconds.
    ///
    /// Default: `0.1`.
    pub pupil_delay_s: f64,

    /// Median filter width used before thresholding for active ROIs.
    ///
    /// Default: `5`.
    pub active_filter_ks: usize,

    /// Number of standard deviations above the median a smoothed trace must
    /// reach for the ROI to count as active.
    ///
    /// Default: `3.0`.
    pub active_n_std: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            run_type: RunType::Prod,
            drop_tol: 0.0003,
            run_diff_thr: 50.0,
            run_filter_ks: 0,
            dff_basewin: 1000,
            blink_thr: 5.0,
            pupil_delay_s: 0.1,
            active_filter_ks: 5,
            active_n_std: 3.0,
        }
    }
}

// ── Analysis ──────────────────────────────────────────────────────────────────

/// How traces are read and summarised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub trace_kind: TraceKind,
    /// Drop ROIs with NaN/Inf values anywhere in the session.
    pub exclude_nan_rois: bool,
    pub stat: Statistic,
    pub error: ErrorStat,
    pub nan_policy: NanPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            trace_kind: TraceKind::Dff,
            exclude_nan_rois: true,
            stat: Statistic::Mean,
            error: ErrorStat::Sem,
            nan_policy: NanPolicy::Propagate,
        }
    }
}

/// Permutation test settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermConfig {
    /// Number of random partitions drawn.
    ///
    /// Default: `10_000`.
    pub n_perms: usize,
    /// Significance level before multiple-comparison correction.
    ///
    /// Default: `0.05`.
    pub p_val: f64,
    /// Default: [`Tails::Both`].
    pub tails: Tails,
}

impl Default for PermConfig {
    fn default() -> Self {
        Self { n_perms: 10_000, p_val: 0.05, tails: Tails::Both }
    }
}

impl PermConfig {
    /// Bonferroni-style correction: `p_val / n_comp`, with enough permutations
    /// to resolve the corrected level (`n_perms >= ceil(1 / p)`).
    pub fn corrected(&self, n_comp: usize) -> Result<PermConfig> {
        if n_comp == 0 {
            return Err(Error::config("number of comparisons must be at least 1"));
        }
        let p_val = self.p_val / n_comp as f64;
        let inv = 1.0 / p_val;
        let min_perms = (if (inv - inv.round()).abs() < 1e-9 { inv.round() } else { inv.ceil() }) as usize;
        Ok(PermConfig { n_perms: self.n_perms.max(min_perms), p_val, tails: self.tails })
    }
}

/// Quintile segmentation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuintConfig {
    /// Number of bins.
    ///
    /// Default: `4`.
    pub n_quints: usize,
    /// Subset of bins to keep. Negative indices count from the end.
    /// `None` keeps all bins.
    ///
    /// Default: `None`.
    pub qu_idx: Option<Vec<isize>>,
}

impl Default for QuintConfig {
    fn default() -> Self {
        Self { n_quints: 4, qu_idx: None }
    }
}

impl QuintConfig {
    /// Resolve `qu_idx` to sorted, unique, in-range bin indices.
    pub fn indices(&self) -> Result<Vec<usize>> {
        if self.n_quints == 0 {
            return Err(Error::config("n_quints must be at least 1"));
        }
        let n = self.n_quints as isize;
        let mut out = match &self.qu_idx {
            None => (0..self.n_quints).collect::<Vec<_>>(),
            Some(idx) => {
                let mut v = Vec::with_capacity(idx.len());
                for &i in idx {
                    let j = if i < 0 { i + n } else { i };
                    if j < 0 || j >= n {
                        return Err(Error::config(format!(
                            "quintile index {i} invalid for {} quintiles",
                            self.n_quints
                        )));
                    }
                    v.push(j as usize);
                }
                v
            }
        };
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }
}

/// Which surprise condition(s) group statistics are computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotVals {
    Surprise,
    Regular,
    #[default]
    Both,
}

/// Named ROI group sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupSet {
    #[default]
    All,
    Change,
    NoChange,
    Reduc,
    Incr,
}

/// ROI grouping settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiGroupConfig {
    /// Operation comparing surprise to regular.
    pub op: Op,
    pub plot_vals: PlotVals,
    pub group_set: GroupSet,
    /// Also report `reg_reg` when the chosen set omits it.
    pub add_reg: bool,
}

impl Default for RoiGroupConfig {
    fn default() -> Self {
        Self { op: Op::Diff, plot_vals: PlotVals::Both, group_set: GroupSet::All, add_reg: false }
    }
}

/// Stimulus selection and window around each reference frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StimPar {
    pub kind: StimulusKind,
    pub criteria: SegmentCriteria,
    /// Seconds before each reference frame.
    pub pre: f64,
    /// Seconds after each reference frame.
    pub post: f64,
}

impl StimPar {
    pub fn new(kind: StimulusKind, pre: f64, post: f64) -> Self {
        Self { kind, criteria: SegmentCriteria::default(), pre, post }
    }
}

/// Everything `--config` can override, one section per stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub session: SessionConfig,
    pub analysis: AnalysisConfig,
    pub perm: PermConfig,
    pub quint: QuintConfig,
    pub groups: RoiGroupConfig,
}
