//! Block partition of a stimulus' segment range.
//!
//! Each display sequence is cut into `ceil(duration / block_len)` blocks of
//! `round(block_len · seg_ps_nobl)` segments. When a sequence ends partway
//! through a block, the missing duration is carried into the next sequence's
//! budget and the trailing segments of that block are pushed into the next
//! sequence (or omitted after the last one). Both cases are reported.
use std::collections::BTreeSet;
use std::ops::Range;

use serde::Serialize;

use super::StimulusKind;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::{Error, Result};
use crate::segments::{ParamValue, SegmentTable};

/// Segment ranges per display sequence and the block count actually started.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockLayout {
    /// Display sequence × block, end exclusive.
    pub seg_ranges: Vec<Vec<Range<i64>>>,
    pub act_n_blocks: usize,
    pub extra_segs: f64,
}

/// Partition the segment range of a stimulus into blocks.
pub fn block_segment_ranges(
    kind: StimulusKind,
    display_sequence: &[[f64; 2]],
    block_len: f64,
    seg_ps_wibl: f64,
    seg_ps_nobl: f64,
    exp_n_blocks: usize,
    diags: &mut Diagnostics,
) -> BlockLayout {
    let tot_disp = display_sequence.iter().map(|d| d[1] - d[0]).sum::<f64>().trunc();
    let act_n_blocks = (tot_disp / block_len).ceil() as usize;
    let mut extra_segs = 0.0;
    if act_n_blocks != exp_n_blocks {
        diags.warn(
            DiagnosticKind::BlockCount,
            format!("{act_n_blocks} {kind} blocks started instead of the expected {exp_n_blocks}"),
        );
        if act_n_blocks > exp_n_blocks {
            extra_segs = (tot_disp - exp_n_blocks as f64 * block_len) * seg_ps_wibl;
            diags.warn(
                DiagnosticKind::BlockCount,
                format!("in total, {extra_segs} extra {kind} segments were shown, including blanks"),
            );
        }
    }

    let block_segs = (block_len * seg_ps_nobl).round() as i64;
    let n_disp = display_sequence.len();
    let mut rem_sec_all = 0.0;
    let mut start = 0i64;
    let mut seg_ranges = Vec::with_capacity(n_disp);
    for (i, d) in display_sequence.iter().enumerate() {
        let length = (d[1] - d[0]) - rem_sec_all;
        let n_bl = ((length / block_len).ceil() as i64).max(1);
        let missing = n_bl as f64 * block_len - length;
        rem_sec_all += missing;
        let rem_seg = (missing * seg_ps_wibl).round() as i64;
        let cut = (rem_seg - 1).max(0);

        let mut disp = Vec::with_capacity(n_bl as usize);
        for _ in 0..n_bl - 1 {
            disp.push(start..start + block_segs);
            start += block_segs;
        }
        // The final segment of a cut block is a blank.
        let end = start + block_segs - cut;
        disp.push(start..end);
        start = end + cut;
        seg_ranges.push(disp);

        let last = i + 1 == n_disp;
        match (rem_seg, last) {
            (1, true) => diags.warn(
                DiagnosticKind::BlockRemainder,
                format!("during the last {kind} sequence, the last blank segment of block {n_bl} was omitted"),
            ),
            (1, false) => diags.warn(
                DiagnosticKind::BlockRemainder,
                format!(
                    "during {kind} sequence {}, the last blank segment of block {n_bl} was pushed to the next sequence",
                    i + 1
                ),
            ),
            (r, true) if r > 1 => diags.warn(
                DiagnosticKind::BlockRemainder,
                format!("during the last {kind} sequence, {r} segments (incl. blanks) of block {n_bl} were omitted"),
            ),
            (r, false) if r > 1 => diags.warn(
                DiagnosticKind::BlockRemainder,
                format!(
                    "during {kind} sequence {}, {r} segments (incl. blanks) of block {n_bl} were pushed to the \
                     next sequence and are omitted from analysis",
                    i + 1
                ),
            ),
            _ => {}
        }
    }

    BlockLayout { seg_ranges, act_n_blocks, extra_segs }
}

/// Parameter held fixed over a block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockParams {
    /// Fixed for bricks; gabor orientation varies within a block.
    pub par1: Option<ParamValue>,
    pub par2: ParamValue,
}

/// A run of segments with fixed governing parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    /// Segment ids, end exclusive.
    pub seg_range: Range<i64>,
    /// Stimulus-clock frames, end exclusive.
    pub stim_frames: Range<usize>,
    /// 2p frames, end exclusive.
    pub twop_frames: Range<usize>,
    pub params: BlockParams,
}

impl Block {
    /// Resolve frame ranges and the fixed parameters of a block.
    pub fn locate(
        kind: StimulusKind,
        seg_range: Range<i64>,
        seg_list: &[i64],
        table: &SegmentTable,
    ) -> Result<Self> {
        if seg_range.is_empty() {
            return Err(Error::integrity(format!("{kind} block {seg_range:?} holds no segments")));
        }
        let last_seg = seg_range.end - 1;
        let first_fr = seg_list.iter().position(|&s| s == seg_range.start);
        let last_fr = seg_list.iter().rposition(|&s| s == last_seg);
        let (Some(first_fr), Some(last_fr)) = (first_fr, last_fr) else {
            return Err(Error::integrity(format!(
                "{kind} block {seg_range:?} is not fully displayed in the frame list"
            )));
        };
        let twop_start = table.get(kind, seg_range.start)?.start_twop;
        let twop_end = table.get(kind, last_seg)?.end_twop;

        let mut par1 = BTreeSet::new();
        let mut par2 = BTreeSet::new();
        for r in table.rows_for(kind).filter(|r| seg_range.contains(&r.seg_id)) {
            par1.insert(r.par1.clone());
            par2.insert(r.par2.clone());
        }
        let single = |set: BTreeSet<ParamValue>, name: &str| -> Result<ParamValue> {
            let mut it = set.into_iter();
            match (it.next(), it.next()) {
                (Some(v), None) => Ok(v),
                (None, _) => Err(Error::integrity(format!("{kind} block {seg_range:?} has no {name} value"))),
                (Some(a), Some(b)) => Err(Error::integrity(format!(
                    "{kind} block {seg_range:?} has more than one {name} value ({a}, {b}, ...)"
                ))),
            }
        };
        let (name1, name2) = kind.param_names();
        let params = match kind {
            StimulusKind::Gabors => BlockParams { par1: None, par2: single(par2, name2)? },
            StimulusKind::Bricks => BlockParams {
                par1: Some(single(par1, name1)?),
                par2: single(par2, name2)?,
            },
        };

        Ok(Self {
            seg_range,
            stim_frames: first_fr..last_fr + 1,
            twop_frames: twop_start..twop_end,
            params,
        })
    }

    pub fn n_segs(&self) -> usize {
        (self.seg_range.end - self.seg_range.start) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(disp: &[[f64; 2]], block_len: f64, wibl: f64, nobl: f64, exp: usize) -> (BlockLayout, Diagnostics) {
        let mut d = Diagnostics::new();
        let l = block_segment_ranges(StimulusKind::Bricks, disp, block_len, wibl, nobl, exp, &mut d);
        (l, d)
    }

    #[test]
    fn exact_fit_single_sequence() {
        let (l, d) = layout(&[[0.0, 60.0]], 60.0, 1.0 / 0.3, 1.0 / 0.3, 1);
        assert_eq!(l.seg_ranges, vec![vec![0..200]]);
        assert_eq!(l.act_n_blocks, 1);
        assert!(d.is_empty());
    }

    #[test]
    fn two_sequences_partition_without_gaps() {
        let (l, d) = layout(&[[0.0, 20.0], [25.0, 45.0]], 20.0, 1.0, 1.0, 2);
        assert_eq!(l.seg_ranges, vec![vec![0..20], vec![20..40]]);
        assert!(d.is_empty());
    }

    #[test]
    fn remainder_is_pushed_and_reported() {
        // 25 s sequence with 10 s blocks: third block is 5 s short.
        let (l, d) = layout(&[[0.0, 25.0], [30.0, 45.0]], 10.0, 1.0, 1.0, 4);
        assert_eq!(l.act_n_blocks, 4);
        assert_eq!(l.seg_ranges[0], vec![0..10, 10..20, 20..26]);
        // second sequence budget shrinks by the carried 5 s
        assert_eq!(l.seg_ranges[1], vec![30..40]);
        assert_eq!(d.of_kind(DiagnosticKind::BlockRemainder).count(), 1);
    }

    #[test]
    fn extra_blocks_are_counted() {
        let (l, d) = layout(&[[0.0, 30.0]], 10.0, 1.0, 1.0, 2);
        assert_eq!(l.act_n_blocks, 3);
        approx::assert_abs_diff_eq!(l.extra_segs, 10.0);
        assert_eq!(d.of_kind(DiagnosticKind::BlockCount).count(), 2);
    }
}
