//! Cross-session quintile analyses.
//!
//! - [`quint_stats`]: trace statistics per quintile, optionally split by
//!   surprise, locked to run onsets or split by surprise-run length.
//! - [`magnitude`]: magnitude and L2 change between first and last quintile,
//!   surprise vs regular, with a permutation test.
//! - [`signif`]: ROIs with a significant surprise response in the first
//!   and/or last quintile, grouped by pattern.
//!
//! Every result type serializes to the JSON schema written by the
//! `quint_analysis` binary.

pub mod magnitude;
pub mod quint_stats;
pub mod signif;

pub use magnitude::{quintile_magnitudes, MagnitudeResults, SessionMagnitudes};
pub use quint_stats::{
    surprise_quintile_arrays, trace_stats_by_quintile, trace_stats_by_quintile_session,
    trace_stats_by_surprise_length, QuintAnalysisOptions, QuintileData, QuintileTraceStats, SurpriseLengthStats,
    SurpriseQuintileArrays,
};
pub use signif::{signif_rois_by_group, SessionSignif, SignifRoiResults};

use serde::{Deserialize, Serialize};

/// Which segments of each quintile are used as reference events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lock {
    /// Every matching segment.
    #[default]
    None,
    /// Surprise run onsets.
    Surprise,
    /// Regular run onsets.
    Regular,
    /// Regular and surprise run onsets, reported separately.
    Both,
    /// One regular segment sampled per run, away from the run edges.
    RegularSampled,
}

/// Data stream a quintile analysis reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    #[default]
    Roi,
    Run,
}
