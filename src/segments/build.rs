//! Segment table construction.
//!
//! Stimuli recorded in several parts (consecutive log entries of the same
//! kind, each numbering segments from zero) are merged first: part `k`'s ids
//! are shifted past the largest id of the parts before it, and every part must
//! carry the same non-segment parameters.
use std::collections::BTreeMap;

use super::{ParamValue, Segment, SegmentTable, GRAYSCREEN_SEG};
use crate::align::FrameAlignment;
use crate::error::{Error, Result};
use crate::raw::{SegmentParams, StimLog, StimulusLog, StimulusParams};
use crate::stimulus::{KindParams, StimulusKind};

/// All parts of one stimulus kind, on the session stimulus clock.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedStimulus {
    pub kind_params: KindParams,
    /// Segment id per stimulus-clock frame, `-1` when not on screen.
    pub seg_list: Vec<i64>,
    pub display_sequence: Vec<[f64; 2]>,
    pub blank_sweeps: usize,
    pub params: StimulusParams,
    /// Parameters keyed by (renumbered) segment id.
    pub segments: BTreeMap<i64, SegmentParams>,
    pub n_parts: usize,
}

impl MergedStimulus {
    pub fn kind(&self) -> StimulusKind {
        self.kind_params.kind()
    }
}

/// Merge the log's stimuli by kind, in order of first appearance.
pub fn merge_stimuli(log: &StimLog) -> Result<Vec<MergedStimulus>> {
    let n_stim = log.n_stim_frames();
    let pre = log.pre_blank_frames();
    let mut merged: Vec<MergedStimulus> = Vec::new();

    for part in &log.stimuli {
        let kind = part.kind();
        match merged.iter_mut().find(|m| m.kind() == kind) {
            None => {
                let mut m = MergedStimulus {
                    kind_params: part.kind_params.clone(),
                    seg_list: vec![GRAYSCREEN_SEG; n_stim],
                    display_sequence: Vec::new(),
                    blank_sweeps: part.blank_sweeps,
                    params: part.params.clone(),
                    segments: BTreeMap::new(),
                    n_parts: 0,
                };
                add_part(&mut m, part, 0, pre)?;
                merged.push(m);
            }
            Some(m) => {
                check_parts_match(m, part)?;
                let offset = m.segments.keys().next_back().map_or(0, |&s| s + 1);
                add_part(m, part, offset, pre)?;
                log::info!("{kind}: part {} renumbered from segment {offset}", m.n_parts);
            }
        }
    }
    Ok(merged)
}

fn add_part(m: &mut MergedStimulus, part: &StimulusLog, offset: i64, pre: usize) -> Result<()> {
    let kind = part.kind();
    let n_stim = m.seg_list.len();
    let mut max_id = None;
    for (i, &seg) in part.frame_list.iter().enumerate() {
        if seg < 0 {
            continue;
        }
        let fr = pre + i;
        if fr >= n_stim {
            return Err(Error::integrity(format!(
                "{kind} frame list runs past the session end ({} frames)",
                n_stim
            )));
        }
        if seg as usize >= part.segments.len() {
            return Err(Error::integrity(format!(
                "{kind} frame list references segment {seg}, only {} described",
                part.segments.len()
            )));
        }
        if m.seg_list[fr] != GRAYSCREEN_SEG {
            return Err(Error::integrity(format!("{kind} parts overlap at stimulus frame {fr}")));
        }
        m.seg_list[fr] = seg + offset;
        max_id = Some(max_id.map_or(seg, |x: i64| x.max(seg)));
    }
    if let Some(max_id) = max_id {
        for s in 0..=max_id {
            m.segments.insert(s + offset, part.segments[s as usize].clone());
        }
    }
    m.display_sequence.extend_from_slice(&part.display_sequence);
    m.n_parts += 1;
    Ok(())
}

/// Itemized comparison of the non-segment parameters of two parts.
fn check_parts_match(m: &MergedStimulus, part: &StimulusLog) -> Result<()> {
    let mut diffs = Vec::new();
    if m.kind_params != part.kind_params {
        diffs.push(format!("kind parameters: {:?} vs {:?}", m.kind_params, part.kind_params));
    }
    if m.blank_sweeps != part.blank_sweeps {
        diffs.push(format!("blank_sweeps: {} vs {}", m.blank_sweeps, part.blank_sweeps));
    }
    let (a, b) = (&m.params, &part.params);
    if a.seg_len_s != b.seg_len_s {
        diffs.push(format!("seg_len_s: {} vs {}", a.seg_len_s, b.seg_len_s));
    }
    if a.surp_len != b.surp_len {
        diffs.push(format!("surp_len: {:?} vs {:?}", a.surp_len, b.surp_len));
    }
    if a.reg_len != b.reg_len {
        diffs.push(format!("reg_len: {:?} vs {:?}", a.reg_len, b.reg_len));
    }
    if a.block_len_s != b.block_len_s {
        diffs.push(format!("block_len_s: {} vs {}", a.block_len_s, b.block_len_s));
    }
    for key in a.extra.keys().chain(b.extra.keys().filter(|k| !a.extra.contains_key(*k))) {
        if a.extra.get(key) != b.extra.get(key) {
            diffs.push(format!("{key}: {:?} vs {:?}", a.extra.get(key), b.extra.get(key)));
        }
    }
    if diffs.is_empty() {
        Ok(())
    } else {
        Err(Error::integrity(format!(
            "cannot merge {} parts, parameters differ:\n- {}",
            part.kind(),
            diffs.join("\n- ")
        )))
    }
}

/// One row per stimulus segment plus one row per grayscreen interval between
/// the pre- and post-blank periods.
pub fn build_segment_table(
    merged: &[MergedStimulus],
    alignment: &FrameAlignment,
    pre_blank_frames: usize,
    total_frames: usize,
) -> Result<SegmentTable> {
    let stim_to_twop = alignment.stim_to_twop_all();
    let n_stim = stim_to_twop.len();
    let mut rows = Vec::new();

    for m in merged {
        let kind = m.kind();
        let mut spans: BTreeMap<i64, (usize, usize)> = BTreeMap::new();
        for (fr, &seg) in m.seg_list.iter().enumerate() {
            if seg >= 0 {
                spans.entry(seg).and_modify(|s| s.1 = fr).or_insert((fr, fr));
            }
        }
        for (seg, (first, last)) in spans {
            let p = m.segments.get(&seg).ok_or_else(|| {
                Error::integrity(format!("{kind} segment {seg} has no parameters"))
            })?;
            let (start, end) = twop_span(stim_to_twop, first, last);
            rows.push(Segment {
                kind: Some(kind),
                par1: p.par1.clone(),
                par2: p.par2.clone(),
                surprise: p.surprise,
                seg_id: seg,
                gabfr: p.gabfr,
                start_twop: start,
                end_twop: end,
                n_twop: end - start,
            });
        }
    }

    // Grayscreen: stimulus period frames no stimulus claims.
    let stim_end = (pre_blank_frames + total_frames).min(n_stim);
    let mut run_start: Option<usize> = None;
    for fr in pre_blank_frames..=stim_end {
        let blank = fr < stim_end && merged.iter().all(|m| m.seg_list[fr] == GRAYSCREEN_SEG);
        match (blank, run_start) {
            (true, None) => run_start = Some(fr),
            (false, Some(first)) => {
                let (start, end) = twop_span(stim_to_twop, first, fr - 1);
                rows.push(Segment {
                    kind: None,
                    par1: ParamValue::Int(-1),
                    par2: ParamValue::Int(-1),
                    surprise: false,
                    seg_id: GRAYSCREEN_SEG,
                    gabfr: -1,
                    start_twop: start,
                    end_twop: end,
                    n_twop: end - start,
                });
                run_start = None;
            }
            _ => {}
        }
    }

    SegmentTable::new(rows)
}

/// 2p frames covered by stimulus frames `first..=last`, end exclusive.
fn twop_span(stim_to_twop: &[usize], first: usize, last: usize) -> (usize, usize) {
    let start = stim_to_twop[first];
    let end = match stim_to_twop.get(last + 1) {
        Some(&next) => next,
        None => stim_to_twop[last] + 1,
    };
    (start, end.max(start + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg_params(n: usize) -> Vec<SegmentParams> {
        (0..n)
            .map(|i| SegmentParams {
                par1: 128.into(),
                par2: "right".into(),
                surprise: i % 3 == 2,
                gabfr: -1,
            })
            .collect()
    }

    fn part(frame_list: Vec<i64>, blank_sweeps: usize) -> StimulusLog {
        StimulusLog {
            kind_params: KindParams::Bricks,
            frame_list,
            display_sequence: vec![[0.0, 3.0]],
            blank_sweeps,
            params: StimulusParams {
                seg_len_s: 1.0,
                surp_len: [2.0, 3.0],
                reg_len: [30.0, 90.0],
                block_len_s: 3.0,
                extra: BTreeMap::new(),
            },
            segments: seg_params(3),
        }
    }

    fn log(stimuli: Vec<StimulusLog>) -> StimLog {
        StimLog {
            fps: 1.0,
            total_frames: 8,
            pre_blank_sec: 1.0,
            post_blank_sec: 1.0,
            dropped_frames: vec![],
            running_velocity: vec![0.0; 10],
            stimuli,
        }
    }

    #[test]
    fn second_part_is_renumbered() {
        let l = log(vec![
            part(vec![0, 1, 2], 0),
            part(vec![-1, -1, -1, -1, 0, 1, 2], 0),
        ]);
        let merged = merge_stimuli(&l).unwrap();
        assert_eq!(merged.len(), 1);
        let m = &merged[0];
        assert_eq!(m.n_parts, 2);
        assert_eq!(m.seg_list, vec![-1, 0, 1, 2, -1, 3, 4, 5, -1, -1]);
        assert_eq!(m.segments.len(), 6);
        assert_eq!(m.display_sequence.len(), 2);
    }

    #[test]
    fn mismatched_parts_report_every_difference() {
        let mut second = part(vec![-1, -1, -1, 0], 1);
        second.params.block_len_s = 4.0;
        let err = merge_stimuli(&log(vec![part(vec![0], 0), second])).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::DataIntegrity(_)));
        assert!(msg.contains("blank_sweeps") && msg.contains("block_len_s"));
    }
}
