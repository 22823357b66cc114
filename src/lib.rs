//! # calcium-quint — two-photon session alignment and quintile surprise statistics
//!
//! `calcium-quint` loads one two-photon calcium-imaging session (stimulus log,
//! synchronisation arrays, ROI fluorescence traces, running wheel and pupil
//! tracking), aligns every stream onto a frame-indexed representation and runs
//! segment-based comparisons of regular versus surprise stimulus presentations
//! across the session, split into quintiles.
//!
//! ## Pipeline overview
//!
//! ```text
//! session dir (stim_log.json, sync/traces/pupil .safetensors)
//!   │
//!   ├─ io::load_session_dir()        JSON + safetensors → SessionInputs
//!   ├─ align::FrameAlignment          stimulus ↔ 2p ↔ pupil frame maps, drop repair
//!   ├─ align::repair_running          outlier runs → linear interpolation
//!   ├─ segments::build_segment_table  multi-part merge, one row per segment
//!   ├─ stimulus::Stimulus::build      blocks, display sequences, parameter checks
//!   └─ session::SessionBuilder        → Loaded<Session> (+ diagnostics)
//!        │
//!        ├─ StimView queries          segments / stim frames / 2p frames by criteria
//!        ├─ quintile_segments         equal-width bins over the stimulus span
//!        ├─ roi_trace_array           windows → baseline → integrate
//!        └─ analysis                  quintile stats, magnitudes, significant ROIs
//!             │
//!             └─→ MagnitudeResults / SignifRoiResults / QuintileTraceStats (JSON)
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use calcium_quint::{
//!     load_session, quintile_magnitudes, surprise_quintile_arrays, AnalysisConfig, Datatype, Op,
//!     PermConfig, QuintConfig, SessionConfig, StimPar, StimulusKind,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! // 1. Load and align a session directory
//! let loaded  = load_session("data/sess_758519303".as_ref(), &SessionConfig::default()).unwrap();
//! let session = loaded.value;
//! for d in loaded.diagnostics.iter() {
//!     eprintln!("{d}");
//! }
//!
//! // 2. Integrated regular/surprise responses in the first and last quintile
//! let stimpar = StimPar::new(StimulusKind::Gabors, 0.0, 1.5);
//! let quint   = QuintConfig { qu_idx: Some(vec![0, -1]), ..QuintConfig::default() };
//! let mut rng = StdRng::seed_from_u64(905);
//! let arrays  = surprise_quintile_arrays(
//!     &session, &stimpar, &quint, &AnalysisConfig::default(), Datatype::Roi, false, &mut rng,
//! ).unwrap();
//!
//! // 3. Magnitude of change, with a permutation test on surprise − regular
//! let mags = quintile_magnitudes(
//!     &arrays, &PermConfig::default(), &AnalysisConfig::default(), Op::Diff, Op::Diff, &mut rng,
//! ).unwrap();
//! println!("surprise magnitude: {:?}", mags.mag_sig);
//! ```
//!
//! ## Running individual steps
//!
//! Every stage is also usable on its own: [`SessionBuilder`] runs the
//! construction stages one at a time, [`StimView`] answers segment and frame
//! queries, and the [`stats`] module works on plain `ndarray` data.
//!
//! ```no_run
//! use calcium_quint::{permutation_test, NanPolicy, Op, PermConfig, Statistic};
//! use ndarray::Array2;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! // [unit, observation]: the first 40 observations are group A
//! let pooled: Array2<f64> = Array2::zeros((12, 60));
//! let perm = PermConfig::default().corrected(12).unwrap();
//! let res  = permutation_test(
//!     pooled.view(), 40, &perm, Statistic::Mean, NanPolicy::Propagate, Op::Diff,
//!     &mut StdRng::seed_from_u64(0),
//! ).unwrap();
//! println!("{} significant unit(s)", res.n_significant());
//! ```

pub mod align;
pub mod analysis;
pub mod config;
pub mod diagnostics;
pub mod epoch;
pub mod error;
pub mod filter;
pub mod io;
pub mod normalize;
pub mod quintile;
pub mod raw;
pub mod segments;
pub mod session;
pub mod stats;
pub mod stimulus;

use anyhow::Context;
use std::path::Path;

// ── Crate-root re-exports ─────────────────────────────────────────────────
//
// Everything a downstream user is likely to need is available directly as
// `calcium_quint::Foo` without having to know the internal module layout.

// config
pub use config::{
    AnalysisConfig, ConfigFile, GroupSet, PermConfig, PlotVals, QuintConfig, RoiGroupConfig, RunType, SessionConfig,
    StimPar, TraceKind,
};

// errors and diagnostics
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Loaded};
pub use error::{Error, Result};

// inputs
pub use raw::{PupilStore, SegmentParams, SessionInputs, SessionMetadata, StimLog, StimulusLog, StimulusParams, SyncStore, TraceStore};

// alignment
pub use align::{interp, repair_running, FrameAlignment, Pupil, RunningSpeed};

// segments and stimuli
pub use segments::{Criterion, GroupBy, Grouped, ParamValue, Segment, SegmentCriteria, SegmentTable, SemanticParam};
pub use stimulus::{Block, Grayscreen, KindParams, QueryOptions, StimView, Stimulus, StimulusKind};

// session
pub use session::{build_session, BehaviorOptions, Clock, RoiTraces, SeqArray, Session, SessionBuilder, TraceOptions};

// windows and normalisation
pub use epoch::{frame_windows, FrameWindows};
pub use normalize::{compute_dff, integrate, subtract_baseline};

// quintiles
pub use quintile::{quintile_segments, sample_quintile_segments, QuintOptions, Quintiles};

// statistics
pub use stats::{
    get_stats, group_stats, magnitude_set, permutation_test, ErrorStat, NanPolicy, Op, PermResult, RoiGroups,
    Statistic, Stats, TailLabel, Tails, Thresholds,
};

// analysis
pub use analysis::{
    quintile_magnitudes, signif_rois_by_group, surprise_quintile_arrays, trace_stats_by_quintile_session,
    trace_stats_by_surprise_length, Datatype, Lock, MagnitudeResults, QuintAnalysisOptions, QuintileTraceStats,
    SignifRoiResults,
};

/// Load a session directory and build the [`Session`].
///
/// Equivalent to [`io::load_session_dir`] followed by [`build_session`].
/// Non-fatal conditions such as dropped frames above tolerance are logged as
/// they occur and returned in [`Loaded::diagnostics`].
///
/// # Errors
///
/// File-level failures carry the offending path as context. Core errors
/// remain reachable with `err.downcast_ref::<calcium_quint::Error>()`.
pub fn load_session(dir: &Path, config: &SessionConfig) -> anyhow::Result<Loaded<Session>> {
    let inputs = io::load_session_dir(dir)?;
    let id = inputs.metadata.session_id;
    let loaded = build_session(inputs, config).with_context(|| format!("building session {id}"))?;
    log::info!("session {id}: built with {} diagnostic(s)", loaded.diagnostics.len());
    Ok(loaded)
}
