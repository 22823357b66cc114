//! The Segment Table: one row per stimulus presentation unit.
//!
//! - [`build`]: builds the table from the stimulus log and frame alignment,
//!   merging multi-part stimuli.
//! - [`criteria`]: per-column selection criteria resolved against the live
//!   table.

pub mod build;
pub mod criteria;

pub use build::{build_segment_table, merge_stimuli, MergedStimulus};
pub use criteria::{
    remove_consecutive, Criterion, GroupBy, Grouped, ParamColumn, ResolvedCriteria, SegmentCriteria,
    SemanticParam,
};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::Range;

use crate::error::{Error, Result};
use crate::stimulus::StimulusKind;

/// Segment id reserved for grayscreen rows.
pub const GRAYSCREEN_SEG: i64 = -1;

/// A categorical stimulus parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Text(String),
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl std::str::FromStr for ParamValue {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(s.parse::<i64>().map(ParamValue::Int).unwrap_or_else(|_| ParamValue::Text(s.to_string())))
    }
}

/// One row of the segment table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// `None` for grayscreen rows.
    pub kind: Option<StimulusKind>,
    pub par1: ParamValue,
    pub par2: ParamValue,
    pub surprise: bool,
    pub seg_id: i64,
    /// Position within a gabor set; `-1` when not applicable.
    pub gabfr: i64,
    /// First 2p frame (inclusive).
    pub start_twop: usize,
    /// End 2p frame (exclusive).
    pub end_twop: usize,
    pub n_twop: usize,
}

impl Segment {
    pub fn is_grayscreen(&self) -> bool {
        self.kind.is_none()
    }

    /// Last 2p frame of the segment, never before its first.
    pub fn last_twop(&self) -> usize {
        self.start_twop.max(self.end_twop.saturating_sub(1))
    }

    pub fn twop_range(&self) -> Range<usize> {
        self.start_twop..self.end_twop
    }
}

/// All segments of a session, ordered by start frame.
#[derive(Debug, Clone, Default)]
pub struct SegmentTable {
    rows: Vec<Segment>,
    index: HashMap<(StimulusKind, i64), usize>,
}

impl SegmentTable {
    pub fn new(mut rows: Vec<Segment>) -> Result<Self> {
        rows.sort_by_key(|r| (r.start_twop, r.end_twop));
        let mut index = HashMap::with_capacity(rows.len());
        for (i, r) in rows.iter().enumerate() {
            if let Some(kind) = r.kind {
                if index.insert((kind, r.seg_id), i).is_some() {
                    return Err(Error::integrity(format!(
                        "segment {} of {kind} appears twice",
                        r.seg_id
                    )));
                }
            }
        }
        Ok(Self { rows, index })
    }

    pub fn rows(&self) -> &[Segment] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stimulus rows of `kind`, grayscreen excluded.
    pub fn rows_for(&self, kind: StimulusKind) -> impl Iterator<Item = &Segment> {
        self.rows.iter().filter(move |r| r.kind == Some(kind))
    }

    pub fn grayscreen_rows(&self) -> impl Iterator<Item = &Segment> {
        self.rows.iter().filter(|r| r.is_grayscreen())
    }

    pub fn kinds(&self) -> BTreeSet<StimulusKind> {
        self.rows.iter().filter_map(|r| r.kind).collect()
    }

    pub fn get(&self, kind: StimulusKind, seg_id: i64) -> Result<&Segment> {
        self.index
            .get(&(kind, seg_id))
            .map(|&i| &self.rows[i])
            .ok_or_else(|| Error::out_of_range(format!("no {kind} segment {seg_id}")))
    }

    /// Smallest and largest segment id recorded for `kind`.
    pub fn seg_id_bounds(&self, kind: StimulusKind) -> Option<(i64, i64)> {
        let mut ids = self.rows_for(kind).map(|r| r.seg_id);
        let first = ids.next()?;
        Some(ids.fold((first, first), |(lo, hi), s| (lo.min(s), hi.max(s))))
    }

    /// Rows of `kind` satisfying resolved criteria, in segment id order.
    pub fn select(&self, kind: StimulusKind, crit: &ResolvedCriteria) -> Vec<&Segment> {
        let mut out: Vec<&Segment> = self.rows_for(kind).filter(|r| crit.matches(r)).collect();
        out.sort_by_key(|r| r.seg_id);
        out
    }
}
