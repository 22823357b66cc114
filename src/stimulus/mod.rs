//! Stimulus Block Model.
//!
//! A [`Stimulus`] is a single data type tagged by [`StimulusKind`] and carrying
//! a kind-specific [`KindParams`] record. Kind-dependent behaviour (block
//! length, expected block count, parameter names) lives in free functions
//! that match on the tag.
//!
//! - [`blocks`]: display sequence → block partition of the segment range.
//! - [`query`]: segment and frame queries over one stimulus.
//! - [`grayscreen`]: intervals with no stimulus on screen.

pub mod blocks;
pub mod grayscreen;
pub mod query;

pub use blocks::{block_segment_ranges, Block, BlockLayout, BlockParams};
pub use grayscreen::Grayscreen;
pub use query::{QueryOptions, StimView};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::config::RunType;
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::segments::{MergedStimulus, SegmentTable};

/// Closed set of stimulus kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StimulusKind {
    Gabors,
    Bricks,
}

impl StimulusKind {
    pub const ALL: [StimulusKind; 2] = [StimulusKind::Gabors, StimulusKind::Bricks];

    pub fn name(self) -> &'static str {
        match self {
            StimulusKind::Gabors => "gabors",
            StimulusKind::Bricks => "bricks",
        }
    }

    /// Meaning of the two generic parameter columns.
    pub fn param_names(self) -> (&'static str, &'static str) {
        match self {
            StimulusKind::Gabors => ("orientation", "kappa"),
            StimulusKind::Bricks => ("size", "direction"),
        }
    }
}

impl fmt::Display for StimulusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StimulusKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gabors" | "gabor" | "g" => Ok(StimulusKind::Gabors),
            "bricks" | "brick" | "b" => Ok(StimulusKind::Bricks),
            other => Err(Error::config(format!("unknown stimulus '{other}' (expected gabors or bricks)"))),
        }
    }
}

/// Kind-specific stimulus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KindParams {
    Gabors {
        /// Segments per gabor set (A, B, C, D/E).
        n_seg_per_set: usize,
    },
    Bricks,
}

impl KindParams {
    pub fn kind(&self) -> StimulusKind {
        match self {
            KindParams::Gabors { .. } => StimulusKind::Gabors,
            KindParams::Bricks => StimulusKind::Bricks,
        }
    }
}

/// Number of blocks the protocol schedules for a stimulus.
pub fn expected_n_blocks(kind: StimulusKind, run_type: RunType) -> usize {
    match (kind, run_type) {
        (StimulusKind::Gabors, RunType::Pilot) => 2,
        (StimulusKind::Gabors, RunType::Prod) => 1,
        (StimulusKind::Bricks, RunType::Pilot) => 4,
        (StimulusKind::Bricks, RunType::Prod) => 2,
    }
}

/// Block duration in seconds including blank segments. Gabor block lengths
/// already include blanks; brick block lengths are stretched by the blank
/// proportion.
pub fn block_len_s(kind: StimulusKind, exp_block_len_s: f64, seg_ps_wibl: f64, seg_ps_nobl: f64) -> f64 {
    match kind {
        StimulusKind::Gabors => exp_block_len_s,
        StimulusKind::Bricks => exp_block_len_s * seg_ps_wibl / seg_ps_nobl,
    }
}

/// One stimulus of a session with its block partition.
#[derive(Debug, Clone)]
pub struct Stimulus {
    pub kind_params: KindParams,
    /// Segment id per stimulus-clock frame, `-1` when not on screen.
    pub seg_list: Vec<i64>,
    pub n_parts: usize,
    pub stim_fps: f64,
    /// Segment duration (s).
    pub seg_len_s: f64,
    /// One blank segment every `blank_per` segments; 0 for none.
    pub blank_per: usize,
    /// Segments per second, blanks included.
    pub seg_ps_wibl: f64,
    /// Segments per second, blanks excluded.
    pub seg_ps_nobl: f64,
    pub surp_len_s: [f64; 2],
    pub reg_len_s: [f64; 2],
    pub exp_block_len_s: f64,
    pub exp_n_blocks: usize,
    pub act_n_blocks: usize,
    /// Segments shown beyond the expected blocks, blanks included.
    pub extra_segs: f64,
    pub display_sequence: Vec<[f64; 2]>,
    /// Display sequence × block.
    pub blocks: Vec<Vec<Block>>,
}

impl Stimulus {
    /// Lay out blocks for a merged stimulus and validate them against the
    /// segment table.
    pub fn build(
        merged: &MergedStimulus,
        table: &SegmentTable,
        stim_fps: f64,
        run_type: RunType,
    ) -> Result<(Self, Diagnostics)> {
        let kind = merged.kind();
        if merged.params.seg_len_s <= 0.0 {
            return Err(Error::integrity(format!("{kind} segment length must be positive")));
        }
        let seg_ps_wibl = 1.0 / merged.params.seg_len_s;
        let blank_per = merged.blank_sweeps;
        let seg_ps_nobl = if blank_per == 0 {
            seg_ps_wibl
        } else {
            seg_ps_wibl * blank_per as f64 / (1.0 + blank_per as f64)
        };
        let exp_n_blocks = expected_n_blocks(kind, run_type);

        let mut diags = Diagnostics::new();
        let layout = block_segment_ranges(
            kind,
            &merged.display_sequence,
            block_len_s(kind, merged.params.block_len_s, seg_ps_wibl, seg_ps_nobl),
            seg_ps_wibl,
            seg_ps_nobl,
            exp_n_blocks,
            &mut diags,
        );
        let blocks = layout
            .seg_ranges
            .iter()
            .map(|disp| {
                disp.iter()
                    .map(|r| Block::locate(kind, r.clone(), &merged.seg_list, table))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "{kind}: {} display sequence(s), {} block(s), {} segment(s)",
            blocks.len(),
            layout.act_n_blocks,
            table.rows_for(kind).count()
        );

        Ok((
            Self {
                kind_params: merged.kind_params.clone(),
                seg_list: merged.seg_list.clone(),
                n_parts: merged.n_parts,
                stim_fps,
                seg_len_s: merged.params.seg_len_s,
                blank_per,
                seg_ps_wibl,
                seg_ps_nobl,
                surp_len_s: merged.params.surp_len,
                reg_len_s: merged.params.reg_len,
                exp_block_len_s: merged.params.block_len_s,
                exp_n_blocks,
                act_n_blocks: layout.act_n_blocks,
                extra_segs: layout.extra_segs,
                display_sequence: merged.display_sequence.clone(),
                blocks,
            },
            diags,
        ))
    }

    pub fn kind(&self) -> StimulusKind {
        self.kind_params.kind()
    }

    pub fn all_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().flatten()
    }

    /// Segment ranges, display sequence × block.
    pub fn block_seg_ranges(&self) -> Vec<Vec<Range<i64>>> {
        self.blocks.iter().map(|d| d.iter().map(|b| b.seg_range.clone()).collect()).collect()
    }

    /// Smallest and largest segment id covered by any block.
    pub fn seg_span(&self) -> Option<Range<i64>> {
        let first = self.all_blocks().map(|b| b.seg_range.start).min()?;
        let end = self.all_blocks().map(|b| b.seg_range.end).max()?;
        Some(first..end)
    }
}
