//! Segment and frame queries over one stimulus.
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use super::{Stimulus, StimulusKind};
use crate::align::{interp, FrameAlignment};
use crate::error::{Error, Result};
use crate::segments::{
    remove_consecutive, Criterion, GroupBy, Grouped, ParamValue, SegmentCriteria, SegmentTable,
};

/// Options shared by criteria queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// Keep only the first segment of each run of consecutive ids within a
    /// block.
    pub remove_consecutive: bool,
    /// Return an empty result instead of [`Error::Empty`].
    pub empty_ok: bool,
}

impl QueryOptions {
    pub fn onsets() -> Self {
        Self { remove_consecutive: true, empty_ok: false }
    }
}

/// Borrowed view of one stimulus together with the session tables it is
/// queried against.
#[derive(Debug, Clone, Copy)]
pub struct StimView<'a> {
    pub stim: &'a Stimulus,
    pub table: &'a SegmentTable,
    pub alignment: &'a FrameAlignment,
}

impl<'a> StimView<'a> {
    pub fn kind(&self) -> StimulusKind {
        self.stim.kind()
    }

    // ── Criteria queries ──────────────────────────────────────────────────────

    /// Matching segment ids, display sequence × block × id, empty blocks
    /// and sequences removed. Segments outside every block are never
    /// returned.
    fn nested_segments(&self, criteria: &SegmentCriteria, opts: QueryOptions) -> Result<Vec<Vec<Vec<i64>>>> {
        let kind = self.kind();
        let resolved = criteria.resolve(kind, self.table)?;
        let ids: Vec<i64> = self.table.select(kind, &resolved).iter().map(|r| r.seg_id).collect();

        let mut nested = Vec::new();
        for disp in &self.stim.blocks {
            let mut blocks = Vec::new();
            for block in disp {
                let lo = ids.partition_point(|&s| s < block.seg_range.start);
                let hi = ids.partition_point(|&s| s < block.seg_range.end);
                let mut segs = ids[lo..hi].to_vec();
                if opts.remove_consecutive {
                    segs = remove_consecutive(&segs);
                }
                if !segs.is_empty() {
                    blocks.push(segs);
                }
            }
            if !blocks.is_empty() {
                nested.push(blocks);
            }
        }
        if nested.is_empty() && !opts.empty_ok {
            return Err(Error::empty(format!("no {kind} segments fit these criteria")));
        }
        Ok(nested)
    }

    pub fn segments(&self, criteria: &SegmentCriteria, by: GroupBy, opts: QueryOptions) -> Result<Grouped<i64>> {
        Ok(Grouped::from_nested(self.nested_segments(criteria, opts)?, by))
    }

    /// First stimulus frame of each matching segment.
    pub fn stim_frames(&self, criteria: &SegmentCriteria, by: GroupBy, opts: QueryOptions) -> Result<Grouped<usize>> {
        let grouped = Grouped::from_nested(self.nested_segments(criteria, opts)?, by);
        let firsts = self.first_stim_frames(&grouped.clone().flatten())?;
        let mut firsts = firsts.into_iter();
        Ok(grouped.map(|_| firsts.next().unwrap_or_default()))
    }

    /// Every stimulus frame of every matching segment, flattened per block.
    pub fn all_stim_frames(
        &self,
        criteria: &SegmentCriteria,
        by: GroupBy,
        opts: QueryOptions,
    ) -> Result<Grouped<usize>> {
        let nested = self.nested_segments(criteria, opts)?;
        let frames: Vec<Vec<Vec<usize>>> = nested
            .into_iter()
            .map(|disp| {
                disp.into_iter()
                    .map(|segs| {
                        let (lo, hi) = (segs[0], segs[segs.len() - 1]);
                        self.stim
                            .seg_list
                            .iter()
                            .enumerate()
                            .filter(|&(_, &s)| s >= lo && s <= hi && segs.binary_search(&s).is_ok())
                            .map(|(f, _)| f)
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Ok(Grouped::from_nested(frames, by))
    }

    /// First 2p frame of each matching segment.
    pub fn twop_frames(&self, criteria: &SegmentCriteria, by: GroupBy, opts: QueryOptions) -> Result<Grouped<usize>> {
        let nested = self.nested_segments(criteria, opts)?;
        let kind = self.kind();
        let mut out = Vec::with_capacity(nested.len());
        for disp in nested {
            let mut blocks = Vec::with_capacity(disp.len());
            for segs in disp {
                blocks.push(
                    segs.iter()
                        .map(|&s| self.table.get(kind, s).map(|r| r.start_twop))
                        .collect::<Result<Vec<_>>>()?,
                );
            }
            out.push(blocks);
        }
        Ok(Grouped::from_nested(out, by))
    }

    // ── Per-segment frame lookups ─────────────────────────────────────────────

    /// `(first, last)` stimulus frame per displayed segment.
    fn stim_spans(&self) -> HashMap<i64, (usize, usize)> {
        let mut spans = HashMap::new();
        for (fr, &s) in self.stim.seg_list.iter().enumerate() {
            if s >= 0 {
                spans.entry(s).and_modify(|e: &mut (usize, usize)| e.1 = fr).or_insert((fr, fr));
            }
        }
        spans
    }

    fn lookup_spans(&self, segs: &[i64]) -> Result<Vec<(usize, usize)>> {
        let spans = self.stim_spans();
        segs.iter()
            .map(|s| {
                spans.get(s).copied().ok_or_else(|| {
                    Error::out_of_range(format!("{} segment {s} was never displayed", self.kind()))
                })
            })
            .collect()
    }

    pub fn first_stim_frames(&self, segs: &[i64]) -> Result<Vec<usize>> {
        Ok(self.lookup_spans(segs)?.into_iter().map(|s| s.0).collect())
    }

    pub fn last_stim_frames(&self, segs: &[i64]) -> Result<Vec<usize>> {
        Ok(self.lookup_spans(segs)?.into_iter().map(|s| s.1).collect())
    }

    /// Every stimulus frame showing each segment.
    pub fn stim_frame_lists(&self, segs: &[i64]) -> Result<Vec<Vec<usize>>> {
        self.lookup_spans(segs)?;
        Ok(segs
            .iter()
            .map(|&s| {
                self.stim.seg_list.iter().enumerate().filter(|&(_, &v)| v == s).map(|(f, _)| f).collect()
            })
            .collect())
    }

    pub fn first_twop_frames(&self, segs: &[i64]) -> Result<Vec<usize>> {
        segs.iter().map(|&s| self.table.get(self.kind(), s).map(|r| r.start_twop)).collect()
    }

    /// Last 2p frame of each segment (`max(start, end - 1)`).
    pub fn last_twop_frames(&self, segs: &[i64]) -> Result<Vec<usize>> {
        segs.iter().map(|&s| self.table.get(self.kind(), s).map(|r| r.last_twop())).collect()
    }

    pub fn twop_frame_ranges(&self, segs: &[i64]) -> Result<Vec<Range<usize>>> {
        segs.iter().map(|&s| self.table.get(self.kind(), s).map(|r| r.twop_range())).collect()
    }

    pub fn n_twop_frames(&self, segs: &[i64]) -> Result<Vec<usize>> {
        segs.iter().map(|&s| self.table.get(self.kind(), s).map(|r| r.n_twop)).collect()
    }

    /// Segment on screen at each 2p frame, interpolated over the stimulus
    /// clock and truncated; `-1` where this stimulus is not shown.
    pub fn segs_by_twop_frames(&self, frames: &[usize]) -> Result<Vec<i64>> {
        let n_twop = self.alignment.n_twop_frames();
        if let Some(&bad) = frames.iter().find(|&&f| f >= n_twop) {
            return Err(Error::out_of_range(format!("2p frame {bad} outside [0, {n_twop})")));
        }
        let xp: Vec<f64> = self.alignment.stim_to_twop_all().iter().map(|&v| v as f64).collect();
        let fp: Vec<f64> = self.stim.seg_list.iter().map(|&v| v as f64).collect();
        Ok(frames.iter().map(|&f| interp(f as f64, &xp, &fp) as i64).collect())
    }

    // ── Surprise helpers ──────────────────────────────────────────────────────

    /// `(regular, surprise)` onset segments: the first segment of every run.
    pub fn first_surprise_segments(&self, by: GroupBy) -> Result<(Grouped<i64>, Grouped<i64>)> {
        let opts = QueryOptions::onsets();
        Ok((
            self.segments(&SegmentCriteria::default().surprise(false), by, opts)?,
            self.segments(&SegmentCriteria::default().surprise(true), by, opts)?,
        ))
    }

    /// `(regular, surprise)` segments.
    pub fn all_surprise_segments(&self, by: GroupBy) -> Result<(Grouped<i64>, Grouped<i64>)> {
        let opts = QueryOptions::default();
        Ok((
            self.segments(&SegmentCriteria::default().surprise(false), by, opts)?,
            self.segments(&SegmentCriteria::default().surprise(true), by, opts)?,
        ))
    }

    /// `(regular, surprise)` first stimulus frames at run onsets.
    pub fn first_surprise_stim_frames(&self, by: GroupBy) -> Result<(Grouped<usize>, Grouped<usize>)> {
        let opts = QueryOptions::onsets();
        Ok((
            self.stim_frames(&SegmentCriteria::default().surprise(false), by, opts)?,
            self.stim_frames(&SegmentCriteria::default().surprise(true), by, opts)?,
        ))
    }

    /// `(regular, surprise)` stimulus frames, every frame of every segment.
    pub fn all_surprise_stim_frames(&self, by: GroupBy) -> Result<(Grouped<usize>, Grouped<usize>)> {
        let opts = QueryOptions::default();
        Ok((
            self.all_stim_frames(&SegmentCriteria::default().surprise(false), by, opts)?,
            self.all_stim_frames(&SegmentCriteria::default().surprise(true), by, opts)?,
        ))
    }

    // ── Kind-specific ─────────────────────────────────────────────────────────

    /// Gabor segments at the first position of each set ("A" frames).
    pub fn gabor_a_segments(&self, by: GroupBy) -> Result<Grouped<i64>> {
        self.require(StimulusKind::Gabors)?;
        self.segments(&SegmentCriteria::default().gabfr(Criterion::exact(0)), by, QueryOptions::default())
    }

    /// Regular brick segments per motion direction.
    pub fn regular_direction_segments(&self, by: GroupBy) -> Result<BTreeMap<ParamValue, Grouped<i64>>> {
        self.require(StimulusKind::Bricks)?;
        let directions: Vec<ParamValue> = self
            .table
            .rows_for(StimulusKind::Bricks)
            .map(|r| r.par2.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut out = BTreeMap::new();
        for dir in directions {
            let crit = SegmentCriteria::default()
                .surprise(false)
                .with(crate::segments::SemanticParam::Direction, Criterion::Exact(dir.clone()));
            out.insert(dir, self.segments(&crit, by, QueryOptions::default())?);
        }
        Ok(out)
    }

    fn require(&self, kind: StimulusKind) -> Result<()> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(Error::config(format!("{kind}-only query called on {}", self.kind())))
        }
    }
}
