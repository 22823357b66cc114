//! Input records consumed from the stimulus log, sync store, trace store,
//! pupil store and metadata table.
//!
//! These are plain data: validation happens when a
//! [`SessionBuilder`](crate::session::SessionBuilder) stage consumes them.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::segments::ParamValue;
use crate::stimulus::{KindParams, StimulusKind};

/// Parsed stimulus log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StimLog {
    /// Stimulus display rate (Hz).
    pub fps: f64,
    /// Frames shown between the pre- and post-blank periods.
    pub total_frames: usize,
    pub pre_blank_sec: f64,
    pub post_blank_sec: f64,
    /// Indices of stimulus frames the display reported as dropped.
    #[serde(default)]
    pub dropped_frames: Vec<usize>,
    /// Running velocity (cm/s), one value per stimulus-clock frame.
    pub running_velocity: Vec<f64>,
    pub stimuli: Vec<StimulusLog>,
}

impl StimLog {
    pub fn pre_blank_frames(&self) -> usize {
        (self.pre_blank_sec * self.fps).round() as usize
    }

    pub fn post_blank_frames(&self) -> usize {
        (self.post_blank_sec * self.fps).round() as usize
    }

    /// Length of the stimulus clock including both blank periods.
    pub fn n_stim_frames(&self) -> usize {
        self.pre_blank_frames() + self.total_frames + self.post_blank_frames()
    }
}

/// One stimulus (or one part of a multi-part stimulus) from the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StimulusLog {
    pub kind_params: KindParams,
    /// Segment id for each recorded frame after the pre-blank, `-1` when the
    /// stimulus was not on screen. May be shorter than `total_frames`.
    pub frame_list: Vec<i64>,
    /// `[start, end]` of each display sequence, in seconds.
    pub display_sequence: Vec<[f64; 2]>,
    pub blank_sweeps: usize,
    pub params: StimulusParams,
    /// Parameters per local segment id.
    pub segments: Vec<SegmentParams>,
}

impl StimulusLog {
    pub fn kind(&self) -> StimulusKind {
        self.kind_params.kind()
    }
}

/// Timing parameters shared by every segment of a stimulus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusParams {
    /// Duration of one segment (s).
    pub seg_len_s: f64,
    /// Range of surprise sequence durations (s).
    pub surp_len: [f64; 2],
    /// Range of regular sequence durations (s).
    pub reg_len: [f64; 2],
    /// Expected block duration (s).
    pub block_len_s: f64,
    /// Remaining free-form parameters, compared verbatim across parts.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Per-segment parameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentParams {
    pub par1: ParamValue,
    pub par2: ParamValue,
    pub surprise: bool,
    /// Position within a gabor set (0..n_seg_per_set); `-1` for bricks.
    #[serde(default = "no_gabfr")]
    pub gabfr: i64,
}

fn no_gabfr() -> i64 {
    -1
}

/// Frame alignment arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStore {
    /// 2p frame for each stimulus-clock frame.
    pub stim_to_twop: Vec<usize>,
    /// Pupil frame for each 2p frame.
    pub twop_to_pupil: Vec<usize>,
    /// Body-camera frame for each 2p frame.
    pub twop_to_body: Vec<usize>,
    /// Intervals between consecutive pupil frames (s).
    pub pupil_frame_intervals: Vec<f64>,
    /// 2p acquisition rate (Hz).
    pub twop_fps: f64,
}

/// ROI traces, `[ROI, 2p frame]`.
#[derive(Debug, Clone)]
pub struct TraceStore {
    pub raw: Array2<f64>,
    pub dff: Option<Array2<f64>>,
    pub roi_names: Vec<String>,
}

/// Pupil tracking output, one value per pupil frame.
#[derive(Debug, Clone, Default)]
pub struct PupilStore {
    pub diameter: Vec<f64>,
    pub center: Vec<[f64; 2]>,
}

/// One row of the session metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: u64,
    pub mouse_n: u32,
    /// Recording depth (µm).
    pub depth: u32,
    /// `"soma"` or `"dend"`.
    pub layer: String,
    /// Mouse line, e.g. `"L5-Rbp4"`.
    pub line: String,
    /// General session number.
    pub sess_gen: u32,
    /// Session number within `sess_gen`.
    pub sess_within: u32,
    /// Overall session number.
    pub sess_n: u32,
    /// `"P"` or `"F"` quality control outcome.
    #[serde(default)]
    pub pass_fail: String,
    #[serde(default)]
    pub all_files: bool,
    #[serde(default)]
    pub any_files: bool,
    #[serde(default)]
    pub notes: String,
}

impl SessionMetadata {
    pub fn passed(&self) -> bool {
        self.pass_fail == "P"
    }
}

/// Everything needed to build one session.
#[derive(Debug, Clone)]
pub struct SessionInputs {
    pub metadata: SessionMetadata,
    pub stim_log: StimLog,
    pub sync: SyncStore,
    pub traces: TraceStore,
    pub pupil: Option<PupilStore>,
}
